//! # Runtime
//!
//! Process wiring around the reconciler.
//!
//! - `initialization`: logging, metrics, probe server, client and reconciler setup
//! - `watch_loop`: the controller over `ResourceFieldExport`
//! - `export_watch`: releases source watch bindings of deleted exports
//! - `error_policy`: retry backoff and controller error logging

pub mod error_policy;
pub mod export_watch;
pub mod initialization;
pub mod watch_loop;
