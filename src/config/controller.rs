//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Group suffixes a source `apiVersion` must end with to be exported
    pub supported_group_suffixes: Vec<String>,
    /// Maximum concurrent reconciliations (worker pool size)
    pub max_concurrent_reconciliations: u16,
    /// Requeue interval after a successful or gated reconciliation (seconds)
    pub resync_interval_secs: u64,
    /// Deadline for a single reconcile invocation (seconds)
    pub reconcile_timeout_secs: u64,
    /// Exponential backoff starting value (milliseconds)
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// Consecutive transient failures before the export is reported Degraded
    pub retry_budget: u32,
    /// Create the destination ConfigMap/Secret when it does not exist yet
    /// Default is to only write into destinations that already exist
    pub destination_create_missing: bool,
    /// Read-modify-write attempts on a destination when updates conflict
    pub destination_conflict_retries: u32,
    /// Delay before re-opening a failed or ended source watch (seconds)
    pub watch_restart_delay_secs: u64,
    /// Global log level (ERROR, WARN, INFO, DEBUG, TRACE)
    pub log_level: String,
    /// Log format (json, text)
    pub log_format: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            supported_group_suffixes: DEFAULT_SUPPORTED_GROUP_SUFFIXES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            retry_budget: DEFAULT_RETRY_BUDGET,
            destination_create_missing: false,
            destination_conflict_retries: DEFAULT_DESTINATION_CONFLICT_RETRIES,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            log_level: "INFO".to_string(),
            log_format: "text".to_string(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// `from_env` delegates here; tests pass a map instead of mutating the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            supported_group_suffixes: lookup("SUPPORTED_GROUP_SUFFIXES")
                .map(|v| parse_list(&v))
                .filter(|list| !list.is_empty())
                .unwrap_or(defaults.supported_group_suffixes),
            max_concurrent_reconciliations: parse_or(
                &lookup,
                "MAX_CONCURRENT_RECONCILIATIONS",
                defaults.max_concurrent_reconciliations,
            ),
            resync_interval_secs: parse_or(
                &lookup,
                "RESYNC_INTERVAL_SECS",
                defaults.resync_interval_secs,
            ),
            reconcile_timeout_secs: parse_or(
                &lookup,
                "RECONCILE_TIMEOUT_SECS",
                defaults.reconcile_timeout_secs,
            ),
            backoff_start_ms: parse_or(&lookup, "BACKOFF_START_MS", defaults.backoff_start_ms),
            backoff_max_ms: parse_or(&lookup, "BACKOFF_MAX_MS", defaults.backoff_max_ms),
            retry_budget: parse_or(&lookup, "RETRY_BUDGET", defaults.retry_budget),
            destination_create_missing: lookup("DESTINATION_CREATE_MISSING")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.destination_create_missing),
            destination_conflict_retries: parse_or(
                &lookup,
                "DESTINATION_CONFLICT_RETRIES",
                defaults.destination_conflict_retries,
            ),
            watch_restart_delay_secs: parse_or(
                &lookup,
                "WATCH_RESTART_DELAY_SECS",
                defaults.watch_restart_delay_secs,
            ),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: lookup("LOG_FORMAT").unwrap_or(defaults.log_format),
        }
    }

    /// Get resync interval duration
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get reconcile deadline duration
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Get backoff start duration
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Get backoff max duration
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Get watch restart delay duration
    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> bool {
    let v_lower = value.trim().to_lowercase();
    v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
}

/// Split a comma separated list, dropping blanks
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
