//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, and Kubernetes client setup.

use crate::config::{ControllerConfig, ServerConfig, SharedControllerConfig};
use crate::controller::reconciler::{ExportRef, Reconciler};
use crate::controller::server::{start_server, ServerState};
use crate::crd::ResourceFieldExport;
use crate::observability;
use anyhow::{Context, Result};
use futures::channel::mpsc::{self, UnboundedReceiver};
use kube::{api::Api, api::ListParams, Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for ResourceFieldExport CRD in all namespaces
    pub exports: Api<ResourceFieldExport>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    /// Controller configuration
    pub controller_config: SharedControllerConfig,
    /// Export references requeued by source watches
    pub source_events: UnboundedReceiver<ExportRef>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .field("controller_config", &self.controller_config)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler setup
/// - Startup summary of existing exports
pub async fn initialize() -> Result<InitializationResult> {
    // Required for rustls 0.23+ when no default provider is set via features
    // Fails only when a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    let controller_config: SharedControllerConfig = Arc::new(ControllerConfig::from_env());
    let server_config = ServerConfig::from_env();

    observability::init_logging(&controller_config.log_level, &controller_config.log_format)
        .context("Failed to initialize logging")?;

    info!("Starting field exporter v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Supported source groups: {}",
        controller_config.supported_group_suffixes.join(", ")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());

    // Start HTTP server for metrics and probes
    // We start it in a background task but wait for it to be ready before proceeding
    let server_state_clone = server_state.clone();
    let server_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    // Exports may live in any namespace
    let exports: Api<ResourceFieldExport> = Api::all(client.clone());

    let (trigger, source_events) = mpsc::unbounded();
    let reconciler = Arc::new(Reconciler::new(
        client.clone(),
        controller_config.clone(),
        trigger,
    ));

    summarize_existing_resources(&exports).await;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        exports,
        reconciler,
        server_state,
        controller_config,
        source_events,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = server_config.startup_timeout();
    let poll_interval = server_config.poll_interval();
    let start_time = std::time::Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

/// Groups export names by namespace, both sorted
pub fn group_by_namespace(exports: &[ResourceFieldExport]) -> BTreeMap<String, Vec<String>> {
    let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for export in exports {
        by_namespace
            .entry(export.namespace().unwrap_or_else(|| "default".to_string()))
            .or_default()
            .push(export.name_any());
    }
    for names in by_namespace.values_mut() {
        names.sort();
    }
    by_namespace
}

/// Logs a per-namespace summary of the exports present at startup
///
/// The controller reconciles all of them on its initial list; this only checks
/// that the CRD is queryable and gives operators a picture of the workload.
async fn summarize_existing_resources(exports: &Api<ResourceFieldExport>) {
    let span = tracing::span!(
        tracing::Level::INFO,
        "controller.startup.summary",
        operation = "summarize_existing_resources"
    );
    let _guard = span.enter();

    match exports.list(&ListParams::default()).await {
        Ok(list) if list.items.is_empty() => {
            info!("No existing ResourceFieldExport resources found, watch will pick up new resources");
        }
        Ok(list) => {
            let by_namespace = group_by_namespace(&list.items);

            info!("Field Exporter - Startup Resource Summary");
            info!("Resource Kind: ResourceFieldExport");
            info!("Total Resources: {}", list.items.len());
            info!("Namespaces: {}", by_namespace.len());

            for (namespace, names) in &by_namespace {
                info!("Namespace: {}", namespace);
                info!(
                    "  Resources ({}): {}",
                    names.len(),
                    if names.len() <= 3 {
                        names.join(", ")
                    } else {
                        format!("{}, ... ({} total)", names[..3].join(", "), names.len())
                    }
                );
            }
        }
        Err(e) => {
            error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: crdgen | kubectl apply -f -");
            // Don't exit - the controller watch retries with backoff
            warn!("Continuing despite CRD queryability check failure - controller will retry");
        }
    }
}
