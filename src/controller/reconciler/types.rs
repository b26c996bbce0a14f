//! # Types
//!
//! Core types for the reconciler.

use crate::config::SharedControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::reconciler::destination::{
    DestinationClient, DestinationWriter, KubeDestinationClient, WriteError,
};
use crate::controller::reconciler::group::{GroupResolver, ResolveError};
use crate::controller::reconciler::path::PathError;
use crate::controller::reconciler::source::{AccessError, DynamicResourceAccessor, KubeSourceAccessor};
use crate::controller::reconciler::status::{KubeStatusStore, StatusReporter, StatusStore};
use crate::controller::reconciler::watches::{ExportRef, WatchRegistry};
use futures::channel::mpsc::UnboundedSender;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("invalid path for output {key:?}: {source}")]
    Path {
        key: String,
        #[source]
        source: PathError,
    },
    #[error("duplicate output key {0:?}")]
    DuplicateKey(String),
    #[error("ResourceFieldExport has no namespace")]
    MissingNamespace,
    #[error("source: {0}")]
    Source(#[from] AccessError),
    #[error("destination: {0}")]
    Destination(#[from] WriteError),
    #[error("failed to update status: {0}")]
    Status(#[source] kube::Error),
    #[error("reconcile did not finish within {0:?}")]
    Timeout(Duration),
}

impl ReconcilerError {
    /// Configuration errors are terminal until the export's spec changes
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            ReconcilerError::Resolve(_)
                | ReconcilerError::Path { .. }
                | ReconcilerError::DuplicateKey(_)
                | ReconcilerError::MissingNamespace
        )
    }

    /// Metric label for this error class
    #[must_use]
    pub fn kind(&self) -> &'static str {
        if self.is_config() {
            "config"
        } else {
            "transient"
        }
    }
}

/// Why a reconciliation was triggered, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// First reconcile or `generation` moved past `observedGeneration`
    SpecChange,
    /// Manual trigger via CLI annotation (fexctl reconcile)
    ManualCli,
    /// Periodic resync, source watch event or error retry
    Requeue,
}

impl TriggerSource {
    /// Get human-readable string representation
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::SpecChange => "spec-change",
            TriggerSource::ManualCli => "manual-cli",
            TriggerSource::Requeue => "requeue",
        }
    }
}

/// Backoff state for a specific export
/// Tracks consecutive transient failures and the retry delay calculator
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: ExponentialBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(start: Duration, max: Duration) -> Self {
        Self {
            backoff: ExponentialBackoff::new(start, max),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared reconcile context
#[derive(Clone)]
pub struct Reconciler {
    pub resolver: GroupResolver,
    pub accessor: Arc<dyn DynamicResourceAccessor>,
    pub writer: DestinationWriter,
    pub reporter: StatusReporter,
    pub watches: WatchRegistry,
    pub config: SharedControllerConfig,
    // Backoff state per export (identified by namespace/name)
    // Owned by the error policy so failing exports never block each other
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("resolver", &self.resolver)
            .field("writer", &self.writer)
            .field("watches", &self.watches)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Context talking to the cluster through `client`
    ///
    /// Source watch events are sent on `trigger` as export references.
    pub fn new(
        client: Client,
        config: SharedControllerConfig,
        trigger: UnboundedSender<ExportRef>,
    ) -> Self {
        Self::with_clients(
            config,
            Arc::new(KubeSourceAccessor::new(client.clone())),
            Arc::new(KubeDestinationClient::new(client.clone())),
            Arc::new(KubeStatusStore::new(client)),
            trigger,
        )
    }

    /// Context over arbitrary source, destination and status implementations
    pub fn with_clients(
        config: SharedControllerConfig,
        accessor: Arc<dyn DynamicResourceAccessor>,
        destinations: Arc<dyn DestinationClient>,
        statuses: Arc<dyn StatusStore>,
        trigger: UnboundedSender<ExportRef>,
    ) -> Self {
        Self {
            resolver: GroupResolver::new(config.supported_group_suffixes.iter().cloned()),
            watches: WatchRegistry::new(accessor.clone(), trigger, config.watch_restart_delay()),
            writer: DestinationWriter::new(
                destinations,
                config.destination_create_missing,
                config.destination_conflict_retries,
            ),
            reporter: StatusReporter::new(statuses),
            accessor,
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn backoff_states(&self) -> MutexGuard<'_, HashMap<String, BackoffState>> {
        self.backoff_states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Consecutive transient failures recorded for `resource_key`
    pub fn error_count(&self, resource_key: &str) -> u32 {
        self.backoff_states()
            .get(resource_key)
            .map_or(0, |s| s.error_count)
    }

    /// Records a transient failure and returns the next retry delay with the new count
    pub fn record_failure(&self, resource_key: &str) -> (Duration, u32) {
        let mut states = self.backoff_states();
        let state = states
            .entry(resource_key.to_string())
            .or_insert_with(|| {
                BackoffState::new(
                    self.config.backoff_start_duration(),
                    self.config.backoff_max_duration(),
                )
            });
        state.increment_error();
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Forgets failures after a successful or terminal reconcile
    pub fn reset_backoff(&self, resource_key: &str) {
        self.backoff_states().remove(resource_key);
    }
}

/// Key used for per-export bookkeeping
pub fn resource_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
