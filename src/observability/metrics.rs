//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `field_exporter_reconciliations_total` - Total number of reconciliations
//! - `field_exporter_reconciliation_errors_total` - Reconciliation errors by kind (`config`, `transient`)
//! - `field_exporter_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `field_exporter_reconciliations_gated_total` - Reconciliations skipped by required conditions
//! - `field_exporter_destination_updates_total` - Destination writes by destination type
//! - `field_exporter_keys_written_total` - Keys changed in destinations
//! - `field_exporter_unresolved_outputs_total` - Output paths that did not resolve
//! - `field_exporter_source_watch_events_total` - Source watch events by kind and event type
//! - `field_exporter_active_source_watches` - Current number of per-kind source watches

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "field_exporter_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "field_exporter_reconciliation_errors_total",
            "Total number of reconciliation errors by error kind",
        ),
        &["kind"],
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "field_exporter_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static RECONCILIATIONS_GATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "field_exporter_reconciliations_gated_total",
        "Total number of reconciliations skipped because required source conditions were not met",
    )
    .expect("Failed to create RECONCILIATIONS_GATED_TOTAL metric - this should never happen")
});

static DESTINATION_UPDATES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "field_exporter_destination_updates_total",
            "Total number of destination writes by destination type",
        ),
        &["type"],
    )
    .expect("Failed to create DESTINATION_UPDATES_TOTAL metric - this should never happen")
});

static KEYS_WRITTEN_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "field_exporter_keys_written_total",
        "Total number of destination keys changed",
    )
    .expect("Failed to create KEYS_WRITTEN_TOTAL metric - this should never happen")
});

static UNRESOLVED_OUTPUTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "field_exporter_unresolved_outputs_total",
        "Total number of output paths that did not resolve against the source",
    )
    .expect("Failed to create UNRESOLVED_OUTPUTS_TOTAL metric - this should never happen")
});

static SOURCE_WATCH_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "field_exporter_source_watch_events_total",
            "Total number of source watch events by source kind and event type",
        ),
        &["kind", "event"],
    )
    .expect("Failed to create SOURCE_WATCH_EVENTS_TOTAL metric - this should never happen")
});

static ACTIVE_SOURCE_WATCHES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "field_exporter_active_source_watches",
        "Current number of per-kind source watches",
    )
    .expect("Failed to create ACTIVE_SOURCE_WATCHES metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATIONS_GATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DESTINATION_UPDATES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KEYS_WRITTEN_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNRESOLVED_OUTPUTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SOURCE_WATCH_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_SOURCE_WATCHES.clone()))?;

    Ok(())
}

/// Renders all registered metrics in the Prometheus text format
#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn gather_text() -> Result<String> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

/// `kind` is `config` or `transient`
pub fn increment_reconciliation_errors(kind: &str) {
    RECONCILIATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_reconciliations_gated() {
    RECONCILIATIONS_GATED_TOTAL.inc();
}

pub fn increment_destination_updates(destination_type: &str) {
    DESTINATION_UPDATES_TOTAL
        .with_label_values(&[destination_type])
        .inc();
}

pub fn increment_keys_written(count: usize) {
    KEYS_WRITTEN_TOTAL.inc_by(count as u64);
}

pub fn increment_unresolved_outputs(count: usize) {
    UNRESOLVED_OUTPUTS_TOTAL.inc_by(count as u64);
}

pub fn increment_source_watch_events(kind: &str, event: &str) {
    SOURCE_WATCH_EVENTS_TOTAL
        .with_label_values(&[kind, event])
        .inc();
}

pub fn set_active_source_watches(count: usize) {
    ACTIVE_SOURCE_WATCHES.set(i64::try_from(count).unwrap_or(i64::MAX));
}
