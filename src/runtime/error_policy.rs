//! # Error Policy
//!
//! Error handling and backoff logic for the controller.
//! This module handles reconciliation errors and controller stream errors.

use crate::controller::reconciler::{resource_key, Reconciler, ReconcilerError};
use crate::crd::ResourceFieldExport;
use crate::observability;
use kube::runtime::controller::{self, Action};
use kube::runtime::watcher;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Handle reconciliation errors with exponential backoff
///
/// Backoff state is tracked per export so one failing export never slows down
/// the retries of another. Configuration errors never reach this point under
/// normal operation; if one does, the export waits for a spec change.
pub fn handle_reconciliation_error(
    obj: Arc<ResourceFieldExport>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.reconciliation_error",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    observability::metrics::increment_reconciliation_errors(error.kind());

    if error.is_config() {
        error!("Configuration error for {}/{}: {}", namespace, name, error);
        return Action::await_change();
    }

    let (delay, error_count) = ctx.record_failure(&resource_key(&namespace, &name));
    let next_trigger_time = chrono::Utc::now()
        + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

    warn!("Reconciliation error for {}/{}: {}", namespace, name, error);
    info!(
        "Retrying in {:?} (error count: {}, next retry: {})",
        delay,
        error_count,
        next_trigger_time.to_rfc3339()
    );

    Action::requeue(delay)
}

/// Logs an error surfaced by the controller stream
///
/// Reconciler failures are already handled by [`handle_reconciliation_error`].
pub fn handle_controller_error(error: &controller::Error<ReconcilerError, watcher::Error>) {
    match error {
        controller::Error::ReconcilerFailed(e, obj) => {
            debug!("Reconcile of {} failed: {}", obj, e);
        }
        controller::Error::ObjectNotFound(obj) => {
            // Deleted between being queued and being reconciled
            debug!("{} no longer exists, skipping", obj);
        }
        controller::Error::QueueError(e) => {
            warn!("Controller watch error: {}", e);
        }
        other => {
            error!("Controller stream error: {}", other);
        }
    }
}
