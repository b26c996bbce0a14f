//! # Status Reporter
//!
//! Computes the export's `Ready` condition from the outcome of a reconcile pass
//! and persists it through the status subresource.
//!
//! | Outcome           | Ready   | Reason             |
//! |-------------------|---------|--------------------|
//! | Synced            | True    | `Synced`           |
//! | PartiallySynced   | True    | `PartiallySynced`  |
//! | Gated             | False   | `ConditionsNotMet` |
//! | InvalidReference  | False   | `InvalidReference` |
//! | Pending           | Unknown | `Pending`          |
//! | Degraded          | False   | `Degraded`         |
//!
//! `lastTransitionTime` moves only when the status value changes.

use crate::constants::{FIELD_MANAGER, READY_CONDITION, RECONCILE_ANNOTATION};
use crate::crd::{Condition, ResourceFieldExport, ResourceFieldExportStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use std::sync::Arc;
use tracing::debug;

/// Result of one reconcile pass, as reported on the export
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// All outputs resolved and written
    Synced { keys: usize },
    /// Gate passed; some output paths did not resolve and were skipped
    PartiallySynced { written: usize, missing: Vec<String> },
    /// Required source conditions not met; nothing written
    Gated { unmet: Vec<String> },
    /// Terminal configuration error; waits for a spec change
    InvalidReference(String),
    /// Transient failure, still within the retry budget
    Pending(String),
    /// Transient failure, retry budget exhausted
    Degraded(String),
}

impl Outcome {
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Synced { .. } | Outcome::PartiallySynced { .. } => "True",
            Outcome::Gated { .. } | Outcome::InvalidReference(_) | Outcome::Degraded(_) => "False",
            Outcome::Pending(_) => "Unknown",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Outcome::Synced { .. } => "Synced",
            Outcome::PartiallySynced { .. } => "PartiallySynced",
            Outcome::Gated { .. } => "ConditionsNotMet",
            Outcome::InvalidReference(_) => "InvalidReference",
            Outcome::Pending(_) => "Pending",
            Outcome::Degraded(_) => "Degraded",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Outcome::Synced { keys } => format!("{keys} key(s) synced"),
            Outcome::PartiallySynced { written, missing } => format!(
                "{written} key(s) synced, unresolved: {}",
                missing.join(", ")
            ),
            Outcome::Gated { unmet } => {
                format!("required conditions not met: {}", unmet.join(", "))
            }
            Outcome::InvalidReference(msg) | Outcome::Pending(msg) | Outcome::Degraded(msg) => {
                msg.clone()
            }
        }
    }
}

/// Builds the new `Ready` condition, carrying `lastTransitionTime` over when the
/// status value is unchanged
pub fn compute_ready_condition(
    existing: Option<&Condition>,
    outcome: &Outcome,
    now: DateTime<Utc>,
) -> Condition {
    let status = outcome.status();
    let last_transition_time = match existing {
        Some(c) if c.status == status && c.last_transition_time.is_some() => {
            c.last_transition_time.clone()
        }
        _ => Some(now.to_rfc3339()),
    };

    Condition {
        r#type: READY_CONDITION.to_string(),
        status: status.to_string(),
        last_transition_time,
        reason: Some(outcome.reason().to_string()),
        message: Some(outcome.message()),
    }
}

/// Builds the full status for `export`, replacing only the `Ready` condition
pub fn compute_status(
    export: &ResourceFieldExport,
    outcome: &Outcome,
    now: DateTime<Utc>,
) -> ResourceFieldExportStatus {
    let existing = export.status.clone().unwrap_or_default();
    let ready = compute_ready_condition(existing.condition(READY_CONDITION), outcome, now);

    let mut conditions: Vec<Condition> = existing
        .conditions
        .into_iter()
        .filter(|c| c.r#type != READY_CONDITION)
        .collect();
    conditions.push(ready);

    ResourceFieldExportStatus {
        conditions,
        observed_generation: export.metadata.generation,
        last_handled_reconcile_at: export.annotations().get(RECONCILE_ANNOTATION).cloned(),
    }
}

/// Persists export status
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ResourceFieldExportStatus,
    ) -> Result<(), kube::Error>;
}

/// [`StatusStore`] writing through the `status` subresource
#[derive(Clone)]
pub struct KubeStatusStore {
    client: Client,
}

impl std::fmt::Debug for KubeStatusStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStatusStore").finish_non_exhaustive()
    }
}

impl KubeStatusStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusStore for KubeStatusStore {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ResourceFieldExportStatus,
    ) -> Result<(), kube::Error> {
        let api: Api<ResourceFieldExport> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        match api
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                debug!(
                    "ResourceFieldExport {}/{} was deleted during reconciliation, skipping status update",
                    namespace, name
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Computes and persists the `Ready` condition
#[derive(Clone)]
pub struct StatusReporter {
    store: Arc<dyn StatusStore>,
}

impl std::fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusReporter").finish_non_exhaustive()
    }
}

impl StatusReporter {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Reports `outcome` on `export` and returns the resulting `Ready` condition
    ///
    /// The patch is skipped when neither the condition nor `observedGeneration` changed,
    /// so an unchanged reconcile produces no status write.
    pub async fn report(
        &self,
        export: &ResourceFieldExport,
        outcome: &Outcome,
    ) -> Result<Condition, kube::Error> {
        let status = compute_status(export, outcome, Utc::now());
        let ready = status
            .condition(READY_CONDITION)
            .cloned()
            .unwrap_or_else(|| compute_ready_condition(None, outcome, Utc::now()));

        if export.status.as_ref() == Some(&status) {
            debug!(
                "Status unchanged for {}/{}, skipping patch",
                export.namespace().unwrap_or_default(),
                export.name_any()
            );
            return Ok(ready);
        }

        let namespace = export.namespace().unwrap_or_else(|| "default".to_string());
        self.store
            .patch_status(&namespace, &export.name_any(), &status)
            .await?;
        Ok(ready)
    }
}
