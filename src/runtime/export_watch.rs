//! # Export Lifecycle Watch
//!
//! Releases an export's source watch binding when the export is deleted.
//!
//! A deleted export stays remembered by the registry, so a reconcile of it that
//! is still in flight cannot bind its source again. Deletions missed while the
//! watch was down are caught on relist: any bound export absent from the fresh
//! listing is released once the relist completes, and the remembered deletions
//! are dropped since the listing now covers them.

use crate::controller::reconciler::{resource_key, ExportRef, Reconciler};
use crate::crd::ResourceFieldExport;
use futures::StreamExt;
use kube::api::Api;
use kube::ResourceExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawns the lifecycle watch in the background
pub fn start_export_lifecycle_watch(
    exports: Api<ResourceFieldExport>,
    reconciler: Arc<Reconciler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = kube::runtime::watcher(exports, watcher::Config::default())
            .default_backoff()
            .boxed();
        let mut listed: HashSet<ExportRef> = HashSet::new();

        while let Some(event) = events.next().await {
            match event {
                Ok(Event::Delete(export)) => release(&reconciler, &export),
                Ok(Event::Init) => listed.clear(),
                Ok(Event::InitApply(export)) => {
                    listed.insert(ObjectRef::from_obj(&export));
                }
                Ok(Event::InitDone) => {
                    reconciler.watches.forget_released();
                    let released = release_unlisted(&reconciler, &listed);
                    if released > 0 {
                        info!("Released {} source binding(s) of exports deleted while not watching", released);
                    }
                    listed.clear();
                }
                Ok(Event::Apply(_)) => {}
                Err(e) => warn!("ResourceFieldExport lifecycle watch error: {}", e),
            }
        }
        warn!("ResourceFieldExport lifecycle watch ended");
    })
}

/// Drops the watch binding and retry state held for a deleted `export`
pub fn release(reconciler: &Reconciler, export: &ResourceFieldExport) {
    let export_ref = ObjectRef::from_obj(export);
    reset_retry_state(reconciler, &export_ref);
    if reconciler
        .watches
        .release(&export_ref, export.uid().as_deref())
    {
        debug!("Released last reference to source kind held by {}", export_ref);
    } else {
        debug!("Released {}", export_ref);
    }
}

fn reset_retry_state(reconciler: &Reconciler, export_ref: &ExportRef) {
    let namespace = export_ref.namespace.as_deref().unwrap_or_default();
    reconciler.reset_backoff(&resource_key(namespace, &export_ref.name));
}

/// Releases bound exports missing from `listed`; returns how many were released
pub fn release_unlisted(reconciler: &Reconciler, listed: &HashSet<ExportRef>) -> usize {
    let stale: Vec<ExportRef> = reconciler
        .watches
        .bound_exports()
        .into_iter()
        .filter(|export| !listed.contains(export))
        .collect();
    for export in &stale {
        reset_retry_state(reconciler, export);
        reconciler.watches.unbind(export);
        debug!("Released {}", export);
    }
    stale.len()
}
