//! # Reconcile
//!
//! One pass over an export: `Resolving → Fetching → Gating → Extracting → Writing → Reporting`.
//!
//! - Configuration errors are reported as `InvalidReference` and the export waits
//!   for a spec change. Its source watch binding is released.
//! - Transient errors are reported as `Pending` (or `Degraded` once the retry
//!   budget is spent) and returned to the runtime, whose error policy schedules
//!   the retry with exponential backoff.
//! - Everything else requeues at the resync interval.
//!
//! All reads happen before the single destination write, and the whole pipeline
//! runs under the reconcile deadline.

use crate::constants::RECONCILE_ANNOTATION;
use crate::controller::reconciler::destination::{KeyValues, WriteOutcome};
use crate::controller::reconciler::gate;
use crate::controller::reconciler::path::{Document, FieldPath};
use crate::controller::reconciler::status::Outcome;
use crate::controller::reconciler::types::{resource_key, Reconciler, ReconcilerError, TriggerSource};
use crate::crd::{Output, ResourceFieldExport};
use crate::observability::metrics;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, field, info, warn, Instrument, Span};

/// Pipeline stage, recorded on the reconcile span
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Fetching,
    Gating,
    Extracting,
    Writing,
    Reporting,
}

impl Stage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Resolving => "resolving",
            Stage::Fetching => "fetching",
            Stage::Gating => "gating",
            Stage::Extracting => "extracting",
            Stage::Writing => "writing",
            Stage::Reporting => "reporting",
        }
    }
}

fn enter(stage: Stage) {
    Span::current().record("stage", stage.as_str());
}

/// Determines why this reconcile is running
///
/// A reconcile request counts as manual only until a status has been reported
/// for that annotation value.
pub fn trigger_source(export: &ResourceFieldExport) -> TriggerSource {
    let status = export.status.as_ref();
    let observed = status.and_then(|s| s.observed_generation);
    if observed.is_none() || observed != export.metadata.generation {
        return TriggerSource::SpecChange;
    }
    let requested = export.annotations().get(RECONCILE_ANNOTATION);
    let handled = status.and_then(|s| s.last_handled_reconcile_at.as_ref());
    if requested.is_some() && requested != handled {
        return TriggerSource::ManualCli;
    }
    TriggerSource::Requeue
}

/// Controller entry point
pub async fn reconcile(
    export: Arc<ResourceFieldExport>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = export.name_any();
    let namespace = export.namespace().unwrap_or_default();
    let trigger = trigger_source(&export);

    let span = tracing::info_span!(
        "reconcile",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        source.kind = export.spec.from.kind.as_str(),
        trigger = trigger.as_str(),
        stage = field::Empty,
    );

    async move {
        debug!("reconcile.start");
        metrics::increment_reconciliations();
        let started = Instant::now();
        let deadline = ctx.config.reconcile_timeout();

        let result = match tokio::time::timeout(deadline, sync_export(&export, &ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ReconcilerError::Timeout(deadline)),
        };
        metrics::observe_reconciliation_duration(started.elapsed().as_secs_f64());

        let key = resource_key(&namespace, &name);
        enter(Stage::Reporting);
        match result {
            Ok(outcome) => {
                ctx.reset_backoff(&key);
                let condition = ctx
                    .reporter
                    .report(&export, &outcome)
                    .await
                    .map_err(ReconcilerError::Status)?;
                info!(
                    reason = condition.reason.as_deref().unwrap_or_default(),
                    "reconcile.done: {}",
                    outcome.message()
                );
                Ok(Action::requeue(ctx.config.resync_interval()))
            }
            Err(e) if e.is_config() => {
                warn!("Invalid ResourceFieldExport {}/{}: {}", namespace, name, e);
                metrics::increment_reconciliation_errors(e.kind());
                ctx.reset_backoff(&key);
                ctx.watches.unbind(&ObjectRef::from_obj(&*export));
                ctx.reporter
                    .report(&export, &Outcome::InvalidReference(e.to_string()))
                    .await
                    .map_err(ReconcilerError::Status)?;
                Ok(Action::await_change())
            }
            Err(e) => {
                // Identical failures must yield an identical condition
                let failures = ctx.error_count(&key) + 1;
                let outcome = if failures >= ctx.config.retry_budget {
                    warn!("Retry budget spent after {} consecutive failures", failures);
                    Outcome::Degraded(e.to_string())
                } else {
                    Outcome::Pending(e.to_string())
                };
                if let Err(status_err) = ctx.reporter.report(&export, &outcome).await {
                    error!("Failed to report {} status: {}", outcome.reason(), status_err);
                }
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

/// Runs the pipeline up to, but not including, status reporting
pub async fn sync_export(
    export: &ResourceFieldExport,
    ctx: &Reconciler,
) -> Result<Outcome, ReconcilerError> {
    let spec = &export.spec;
    let namespace = export.namespace().ok_or(ReconcilerError::MissingNamespace)?;

    enter(Stage::Resolving);
    let gvk = ctx
        .resolver
        .resolve_kind(&spec.from.api_version, &spec.from.kind)?;
    let outputs = parse_outputs(&spec.outputs)?;
    // Bind before reading so the source appearing later still triggers us
    ctx.watches.bind(
        &ObjectRef::from_obj(export),
        export.uid().as_deref(),
        &gvk,
        &namespace,
        &spec.from.name,
    );

    enter(Stage::Fetching);
    let document = ctx.accessor.get(&namespace, &gvk, &spec.from.name).await?;

    enter(Stage::Gating);
    let unmet = gate::unmet(&document, spec.required_conditions());
    if !unmet.is_empty() {
        metrics::increment_reconciliations_gated();
        let unmet: Vec<String> = unmet.iter().map(ToString::to_string).collect();
        debug!("Required conditions not met: {}", unmet.join(", "));
        return Ok(Outcome::Gated { unmet });
    }

    enter(Stage::Extracting);
    let (values, missing) = extract_outputs(&document, &outputs);
    if !missing.is_empty() {
        metrics::increment_unresolved_outputs(missing.len());
        debug!("Unresolved outputs: {}", missing.join(", "));
    }

    enter(Stage::Writing);
    let written = ctx.writer.apply(&namespace, &spec.to, &values).await?;
    if written != WriteOutcome::Unchanged {
        metrics::increment_destination_updates(spec.to.r#type.as_str());
        metrics::increment_keys_written(written.changed_keys());
        info!(
            "Wrote {} key(s) to {} {}/{}",
            written.changed_keys(),
            spec.to.r#type,
            namespace,
            spec.to.name
        );
    }

    if missing.is_empty() {
        Ok(Outcome::Synced { keys: values.len() })
    } else {
        Ok(Outcome::PartiallySynced {
            written: values.len(),
            missing,
        })
    }
}

/// Parses every output path and rejects duplicate keys
pub fn parse_outputs(outputs: &[Output]) -> Result<Vec<(String, FieldPath)>, ReconcilerError> {
    let mut seen = HashSet::new();
    outputs
        .iter()
        .map(|output| {
            if !seen.insert(output.key.as_str()) {
                return Err(ReconcilerError::DuplicateKey(output.key.clone()));
            }
            let path = FieldPath::parse(&output.path).map_err(|source| ReconcilerError::Path {
                key: output.key.clone(),
                source,
            })?;
            Ok((output.key.clone(), path))
        })
        .collect()
}

/// Resolves outputs against the document; returns found values and missing keys in declaration order
pub fn extract_outputs(
    document: &Document,
    outputs: &[(String, FieldPath)],
) -> (KeyValues, Vec<String>) {
    let mut values = KeyValues::new();
    let mut missing = Vec::new();
    for (key, path) in outputs {
        match path.extract(document) {
            Some(value) => {
                values.insert(key.clone(), value);
            }
            None => missing.push(key.clone()),
        }
    }
    (values, missing)
}
