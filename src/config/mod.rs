//! # Configuration
//!
//! Process-level configuration, read once at startup from environment variables.
//!
//! - `controller`: reconciliation, retry and watch settings
//! - `server`: metrics and probe server settings

mod controller;
mod server;

pub use controller::ControllerConfig;
pub use server::ServerConfig;

use std::sync::Arc;

/// Controller configuration shared between the runtime and the reconciler
pub type SharedControllerConfig = Arc<ControllerConfig>;
