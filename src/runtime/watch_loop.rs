//! # Watch Loop
//!
//! Controller watch loop that monitors ResourceFieldExport resources and triggers
//! reconciliation when an export changes, when its resync is due, or when its
//! source object changes.

use crate::controller::reconciler::{reconcile, ExportRef, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::ResourceFieldExport;
use crate::runtime::error_policy::{handle_controller_error, handle_reconciliation_error};
use crate::runtime::export_watch::start_export_lifecycle_watch;
use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::{controller, watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info, Instrument};

/// Run the controller until a shutdown signal is received
///
/// The controller's work queue deduplicates by export and never runs two
/// reconciles of the same export at once. `source_events` feeds source watch
/// notifications into that same queue.
pub async fn run_watch_loop(
    exports: Api<ResourceFieldExport>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    source_events: UnboundedReceiver<ExportRef>,
) -> Result<(), anyhow::Error> {
    let config = reconciler.config.clone();

    // Mark server as not ready when SIGTERM/SIGINT is received
    let shutdown_server_state = server_state.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_server_state.set_ready(false);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    let lifecycle = start_export_lifecycle_watch(exports.clone(), reconciler.clone());

    let watch_span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch",
        operation = "watch_loop"
    );

    info!(
        "Starting controller watch loop (concurrency: {}, resync: {:?})",
        config.max_concurrent_reconciliations,
        config.resync_interval()
    );

    Controller::new(exports, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(config.max_concurrent_reconciliations))
        .reconcile_on(source_events)
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(resource = %obj, action = ?action, "watch.event.reconciled");
                }
                Err(e) => handle_controller_error(&e),
            }
        })
        .instrument(watch_span)
        .await;

    lifecycle.abort();
    server_state.set_ready(false);
    info!("Controller stopped gracefully");
    Ok(())
}
