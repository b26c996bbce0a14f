//! # Logging
//!
//! `tracing` subscriber setup. `RUST_LOG` wins when set; otherwise the filter is
//! built from `LOG_LEVEL`. `LOG_FORMAT=json` switches to structured JSON lines.

use tracing_subscriber::EnvFilter;

/// Builds the env filter used when `RUST_LOG` is not set
pub fn default_filter(log_level: &str) -> String {
    let level = log_level.to_ascii_lowercase();
    format!("field_exporter={level},kube_runtime=warn,kube_client=warn")
}

/// Installs the global subscriber
///
/// Returns an error if a subscriber is already installed.
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn init_logging(log_level: &str, log_format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(log_level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log_format.eq_ignore_ascii_case("json") {
        builder
            .json()
            .with_current_span(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {e}"))
    }
}
