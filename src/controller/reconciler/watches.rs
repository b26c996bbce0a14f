//! # Source Watch Registry
//!
//! One shared watch per source group/version/kind, reference counted by the
//! exports that source from it.
//!
//! Each export holds at most one binding (its current `from` reference). Binding
//! the first export of a kind spawns the watch task; releasing the last one aborts
//! it. Watch events are routed to the exports bound to that exact source object
//! and pushed into the controller's work queue over an unbounded channel.
//!
//! Deleted exports are remembered (by uid) until the next relist of exports, so
//! a reconcile still in flight for a deleted export cannot bind it again.
//!
//! All bookkeeping lives behind one mutex that is never held across an await.

use crate::controller::reconciler::source::{DynamicResourceAccessor, SourceEvent};
use crate::crd::ResourceFieldExport;
use crate::observability::metrics;
use futures::channel::mpsc::UnboundedSender;
use futures::StreamExt;
use kube::core::GroupVersionKind;
use kube::runtime::reflector::ObjectRef;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Identity of an export in the work queue
pub type ExportRef = ObjectRef<ResourceFieldExport>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SourceKey {
    gvk: GroupVersionKind,
    namespace: String,
    name: String,
}

struct KindWatch {
    refs: usize,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    watches: HashMap<GroupVersionKind, KindWatch>,
    bindings: HashMap<ExportRef, SourceKey>,
    subscribers: HashMap<SourceKey, HashSet<ExportRef>>,
    /// Deleted exports and their uid
    released: HashMap<ExportRef, Option<String>>,
}

impl Registry {
    fn subscribe(&mut self, export: ExportRef, key: SourceKey) {
        self.subscribers
            .entry(key.clone())
            .or_default()
            .insert(export.clone());
        self.bindings.insert(export, key);
    }

    /// Removes the binding and subscription of `export`, leaving kind counts alone
    fn detach(&mut self, export: &ExportRef) -> Option<SourceKey> {
        let key = self.bindings.remove(export)?;
        if let Some(set) = self.subscribers.get_mut(&key) {
            set.remove(export);
            if set.is_empty() {
                self.subscribers.remove(&key);
            }
        }
        Some(key)
    }

    /// Drops the binding of `export` and returns the kind whose count reached zero
    fn unsubscribe(&mut self, export: &ExportRef) -> Option<GroupVersionKind> {
        let key = self.detach(export)?;

        let watch = self.watches.get_mut(&key.gvk)?;
        watch.refs = watch.refs.saturating_sub(1);
        if watch.refs > 0 {
            return None;
        }
        if let Some(watch) = self.watches.remove(&key.gvk) {
            watch.task.abort();
        }
        Some(key.gvk)
    }
}

/// Shared registry of per-kind source watches
#[derive(Clone)]
pub struct WatchRegistry {
    registry: Arc<Mutex<Registry>>,
    accessor: Arc<dyn DynamicResourceAccessor>,
    trigger: UnboundedSender<ExportRef>,
    restart_delay: Duration,
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("active_watches", &self.active_watches().len())
            .finish_non_exhaustive()
    }
}

impl WatchRegistry {
    pub fn new(
        accessor: Arc<dyn DynamicResourceAccessor>,
        trigger: UnboundedSender<ExportRef>,
        restart_delay: Duration,
    ) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            accessor,
            trigger,
            restart_delay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds `export` to the source `namespace/name` of kind `gvk`
    ///
    /// Idempotent for an unchanged reference. A changed reference within the
    /// same kind only moves the subscription; a different kind releases the
    /// previous one first. An export released with the same `uid` is not bound.
    /// Returns true when a new kind watch was started.
    pub fn bind(
        &self,
        export: &ExportRef,
        uid: Option<&str>,
        gvk: &GroupVersionKind,
        namespace: &str,
        name: &str,
    ) -> bool {
        let key = SourceKey {
            gvk: gvk.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        };

        let mut registry = self.lock();
        if let Some(released_uid) = registry.released.get(export).cloned() {
            if released_uid.as_deref() == uid {
                debug!("{} was deleted, not binding its source", export);
                return false;
            }
            // Recreated under the same name
            registry.released.remove(export);
        }

        let current = registry.bindings.get(export).cloned();
        match current {
            Some(current) if current == key => return false,
            Some(current) if current.gvk == key.gvk => {
                registry.detach(export);
                registry.subscribe(export.clone(), key);
                return false;
            }
            _ => {}
        }
        if let Some(stopped) = registry.unsubscribe(export) {
            info!("Stopped source watch for {}/{} {}", stopped.group, stopped.version, stopped.kind);
        }
        registry.subscribe(export.clone(), key);

        let started = match registry.watches.get_mut(gvk) {
            Some(watch) => {
                watch.refs += 1;
                false
            }
            None => {
                let task = tokio::spawn(run_kind_watch(
                    gvk.clone(),
                    self.accessor.clone(),
                    self.registry.clone(),
                    self.trigger.clone(),
                    self.restart_delay,
                ));
                registry.watches.insert(gvk.clone(), KindWatch { refs: 1, task });
                info!("Started source watch for {}/{} {}", gvk.group, gvk.version, gvk.kind);
                true
            }
        };
        metrics::set_active_source_watches(registry.watches.len());
        started
    }

    /// Releases the binding held by `export`, if any
    ///
    /// Returns true when this was the last export sourcing from that kind and
    /// its watch was torn down.
    pub fn unbind(&self, export: &ExportRef) -> bool {
        let mut registry = self.lock();
        let stopped = registry.unsubscribe(export);
        metrics::set_active_source_watches(registry.watches.len());
        match stopped {
            Some(gvk) => {
                info!("Stopped source watch for {}/{} {}", gvk.group, gvk.version, gvk.kind);
                true
            }
            None => false,
        }
    }

    /// Releases `export` after its deletion and remembers it as deleted
    ///
    /// Returns true when its kind watch was torn down.
    pub fn release(&self, export: &ExportRef, uid: Option<&str>) -> bool {
        let mut registry = self.lock();
        registry.released.insert(export.clone(), uid.map(str::to_string));
        let stopped = registry.unsubscribe(export);
        metrics::set_active_source_watches(registry.watches.len());
        if let Some(gvk) = &stopped {
            info!("Stopped source watch for {}/{} {}", gvk.group, gvk.version, gvk.kind);
        }
        stopped.is_some()
    }

    /// Forgets deleted exports once a fresh listing of exports is authoritative
    pub fn forget_released(&self) {
        self.lock().released.clear();
    }

    pub fn is_released(&self, export: &ExportRef) -> bool {
        self.lock().released.contains_key(export)
    }

    pub fn bound_exports(&self) -> Vec<ExportRef> {
        self.lock().bindings.keys().cloned().collect()
    }

    pub fn is_bound(&self, export: &ExportRef) -> bool {
        self.lock().bindings.contains_key(export)
    }

    /// Number of exports currently sourcing from `gvk`
    pub fn refcount(&self, gvk: &GroupVersionKind) -> usize {
        self.lock().watches.get(gvk).map_or(0, |w| w.refs)
    }

    pub fn active_watches(&self) -> Vec<GroupVersionKind> {
        self.lock().watches.keys().cloned().collect()
    }
}

async fn run_kind_watch(
    gvk: GroupVersionKind,
    accessor: Arc<dyn DynamicResourceAccessor>,
    registry: Arc<Mutex<Registry>>,
    trigger: UnboundedSender<ExportRef>,
    restart_delay: Duration,
) {
    loop {
        match accessor.watch(&gvk).await {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    metrics::increment_source_watch_events(&gvk.kind, event.kind.as_str());
                    for export in subscribers_of(&registry, &gvk, &event) {
                        debug!(
                            "Source {} {}/{} {}, requeueing {}",
                            gvk.kind,
                            event.namespace,
                            event.name,
                            event.kind.as_str(),
                            export
                        );
                        if trigger.unbounded_send(export).is_err() {
                            debug!("Work queue closed, stopping source watch for {}", gvk.kind);
                            return;
                        }
                    }
                }
                warn!(
                    "Source watch for {} ended, restarting in {:?}",
                    gvk.kind, restart_delay
                );
            }
            Err(e) => {
                warn!(
                    "Failed to open source watch for {}: {}, retrying in {:?}",
                    gvk.kind, e, restart_delay
                );
            }
        }
        tokio::time::sleep(restart_delay).await;
    }
}

fn subscribers_of(
    registry: &Mutex<Registry>,
    gvk: &GroupVersionKind,
    event: &SourceEvent,
) -> Vec<ExportRef> {
    let key = SourceKey {
        gvk: gvk.clone(),
        namespace: event.namespace.clone(),
        name: event.name.clone(),
    };
    registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .subscribers
        .get(&key)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default()
}
