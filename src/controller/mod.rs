//! # Controller
//!
//! Core controller modules for the field exporter.
//!
//! - `backoff`: Exponential backoff for transient reconcile failures
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks

pub mod backoff;
pub mod reconciler;
pub mod server;
