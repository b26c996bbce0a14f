//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Field manager name used for status patches
pub const FIELD_MANAGER: &str = "field-exporter";

/// Annotation set by `fexctl reconcile` to request an immediate reconciliation
pub const RECONCILE_ANNOTATION: &str = "gdp.deliveryhero.io/reconcile";

/// Source group suffixes accepted when no allow-list is configured
pub const DEFAULT_SUPPORTED_GROUP_SUFFIXES: &[&str] =
    &["cnrm.cloud.google.com", "services.k8s.aws"];

/// Condition type maintained on every export
pub const READY_CONDITION: &str = "Ready";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default number of exports reconciled concurrently
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Default periodic resync interval for a healthy export (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Default deadline for a single reconcile invocation (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 30;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Consecutive transient failures tolerated before an export is reported Degraded
pub const DEFAULT_RETRY_BUDGET: u32 = 5;

/// Read-modify-write attempts on a destination before giving up on conflicts
pub const DEFAULT_DESTINATION_CONFLICT_RETRIES: u32 = 5;

/// Default delay before re-opening a failed or ended source watch (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;
