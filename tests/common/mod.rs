//! Common test utilities for the reconcile integration tests
//!
//! Provides in-memory stand-ins for the cluster behind the reconciler's three
//! seams (source access, destination objects, export status) plus builders
//! for exports and reconciler contexts.

#![allow(dead_code, reason = "not every test binary uses every helper")]

use async_trait::async_trait;
use field_exporter::config::ControllerConfig;
use field_exporter::controller::reconciler::destination::{
    ClientError, DestinationClient, Entries, Snapshot,
};
use field_exporter::controller::reconciler::path::Document;
use field_exporter::controller::reconciler::source::{
    AccessError, DynamicResourceAccessor, SourceEvent, SourceEventKind,
};
use field_exporter::controller::reconciler::status::StatusStore;
use field_exporter::controller::reconciler::{ExportRef, Reconciler};
use field_exporter::crd::{DestinationRef, DestinationType, ResourceFieldExport, ResourceFieldExportStatus};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::core::GroupVersionKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
///
/// Uses a `Once` to ensure it's only called once across all tests.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

type SourceKey = (GroupVersionKind, String, String);

/// Source objects of arbitrary kinds, with controllable watch streams
#[derive(Default)]
pub struct FakeSources {
    objects: Mutex<HashMap<SourceKey, Document>>,
    watchers: Mutex<HashMap<GroupVersionKind, Vec<UnboundedSender<SourceEvent>>>>,
    pub gets: AtomicUsize,
    get_delay: Mutex<Option<Duration>>,
}

impl FakeSources {
    /// Makes every later `get` stall for `delay` before answering
    pub fn set_get_delay(&self, delay: Duration) {
        *self.get_delay.lock().unwrap() = Some(delay);
    }

    /// Stores (or replaces) the source object and notifies open watches
    pub fn put(&self, gvk: &GroupVersionKind, namespace: &str, name: &str, document: Document) {
        self.objects
            .lock()
            .unwrap()
            .insert((gvk.clone(), namespace.to_string(), name.to_string()), document);
        self.notify(gvk, SourceEventKind::Applied, namespace, name);
    }

    pub fn remove(&self, gvk: &GroupVersionKind, namespace: &str, name: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&(gvk.clone(), namespace.to_string(), name.to_string()));
        self.notify(gvk, SourceEventKind::Deleted, namespace, name);
    }

    fn notify(&self, gvk: &GroupVersionKind, kind: SourceEventKind, namespace: &str, name: &str) {
        if let Some(senders) = self.watchers.lock().unwrap().get_mut(gvk) {
            senders.retain(|tx| {
                tx.unbounded_send(SourceEvent {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
                .is_ok()
            });
        }
    }

    /// Number of open watch streams for `gvk`
    pub fn open_watches(&self, gvk: &GroupVersionKind) -> usize {
        self.watchers
            .lock()
            .unwrap()
            .get(gvk)
            .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
    }

    /// Waits until the registry has opened a watch for `gvk`
    pub async fn wait_for_watch(&self, gvk: &GroupVersionKind) {
        for _ in 0..200 {
            if self.open_watches(gvk) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no watch opened for {}", gvk.kind);
    }
}

#[async_trait]
impl DynamicResourceAccessor for FakeSources {
    async fn get(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
    ) -> Result<Document, AccessError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let delay = *self.get_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.objects
            .lock()
            .unwrap()
            .get(&(gvk.clone(), namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| AccessError::NotFound {
                kind: gvk.kind.clone(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn watch(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<BoxStream<'static, SourceEvent>, AccessError> {
        let (tx, rx) = mpsc::unbounded();
        self.watchers
            .lock()
            .unwrap()
            .entry(gvk.clone())
            .or_default()
            .push(tx);
        Ok(rx.boxed())
    }
}

type DestinationKey = (DestinationType, String, String);

#[derive(Debug, Clone, Default)]
struct StoredDestination {
    resource_version: u64,
    entries: Entries,
}

/// ConfigMaps and Secrets with optimistic concurrency on `resourceVersion`
#[derive(Default)]
pub struct FakeDestinations {
    objects: Mutex<HashMap<DestinationKey, StoredDestination>>,
    pub updates: AtomicUsize,
    pub creates: AtomicUsize,
}

impl FakeDestinations {
    pub fn create_empty(&self, kind: DestinationType, namespace: &str, name: &str) {
        self.objects.lock().unwrap().insert(
            (kind, namespace.to_string(), name.to_string()),
            StoredDestination::default(),
        );
    }

    /// Writes a key directly, as another writer would
    pub fn set(&self, kind: DestinationType, namespace: &str, name: &str, key: &str, value: &str) {
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .entry((kind, namespace.to_string(), name.to_string()))
            .or_default();
        stored.entries.insert(key.to_string(), value.as_bytes().to_vec());
        stored.resource_version += 1;
    }

    pub fn exists(&self, kind: DestinationType, namespace: &str, name: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(kind, namespace.to_string(), name.to_string()))
    }

    /// Stored value of `key` as UTF-8
    pub fn value(&self, kind: DestinationType, namespace: &str, name: &str, key: &str) -> Option<String> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind, namespace.to_string(), name.to_string()))
            .and_then(|stored| stored.entries.get(key))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn writes(&self) -> usize {
        self.updates.load(Ordering::SeqCst) + self.creates.load(Ordering::SeqCst)
    }

    fn key(namespace: &str, destination: &DestinationRef) -> DestinationKey {
        (destination.r#type, namespace.to_string(), destination.name.clone())
    }
}

#[async_trait]
impl DestinationClient for FakeDestinations {
    async fn fetch(
        &self,
        namespace: &str,
        destination: &DestinationRef,
    ) -> Result<Option<Snapshot>, ClientError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&Self::key(namespace, destination))
            .map(|stored| Snapshot {
                resource_version: Some(stored.resource_version.to_string()),
                entries: stored.entries.clone(),
            }))
    }

    async fn update(
        &self,
        namespace: &str,
        destination: &DestinationRef,
        changes: &Entries,
        resource_version: Option<&str>,
    ) -> Result<(), ClientError> {
        let mut objects = self.objects.lock().unwrap();
        let stored = objects
            .get_mut(&Self::key(namespace, destination))
            .ok_or(ClientError::NotFound)?;
        if resource_version.is_some_and(|rv| rv != stored.resource_version.to_string()) {
            return Err(ClientError::Conflict);
        }
        stored.entries.extend(changes.clone());
        stored.resource_version += 1;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create(
        &self,
        namespace: &str,
        destination: &DestinationRef,
        entries: &Entries,
    ) -> Result<(), ClientError> {
        let mut objects = self.objects.lock().unwrap();
        let key = Self::key(namespace, destination);
        if objects.contains_key(&key) {
            return Err(ClientError::Conflict);
        }
        objects.insert(
            key,
            StoredDestination {
                resource_version: 1,
                entries: entries.clone(),
            },
        );
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records every status patch
#[derive(Default)]
pub struct FakeStatuses {
    patches: Mutex<Vec<(String, String, ResourceFieldExportStatus)>>,
}

impl FakeStatuses {
    pub fn patch_count(&self) -> usize {
        self.patches.lock().unwrap().len()
    }

    /// Latest status patched onto `namespace/name`
    pub fn latest(&self, namespace: &str, name: &str) -> Option<ResourceFieldExportStatus> {
        self.patches
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(ns, n, _)| ns == namespace && n == name)
            .map(|(_, _, status)| status.clone())
    }
}

#[async_trait]
impl StatusStore for FakeStatuses {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ResourceFieldExportStatus,
    ) -> Result<(), kube::Error> {
        self.patches
            .lock()
            .unwrap()
            .push((namespace.to_string(), name.to_string(), status.clone()));
        Ok(())
    }
}

/// A reconciler context wired to in-memory fakes
pub struct Harness {
    pub ctx: Arc<Reconciler>,
    pub sources: Arc<FakeSources>,
    pub destinations: Arc<FakeDestinations>,
    pub statuses: Arc<FakeStatuses>,
    pub requeued: UnboundedReceiver<ExportRef>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ControllerConfig) -> Self {
        init_rustls();
        let sources = Arc::new(FakeSources::default());
        let destinations = Arc::new(FakeDestinations::default());
        let statuses = Arc::new(FakeStatuses::default());
        let (trigger, requeued) = mpsc::unbounded();
        let ctx = Arc::new(Reconciler::with_clients(
            Arc::new(config),
            sources.clone(),
            destinations.clone(),
            statuses.clone(),
            trigger,
        ));
        Self {
            ctx,
            sources,
            destinations,
            statuses,
            requeued,
        }
    }

    /// Copies the latest patched status onto `export`, as the API server would
    pub fn refresh(&self, export: &mut ResourceFieldExport) {
        let namespace = export.metadata.namespace.clone().unwrap_or_default();
        let name = export.metadata.name.clone().unwrap_or_default();
        if let Some(status) = self.statuses.latest(&namespace, &name) {
            export.status = Some(status);
        }
    }
}

/// Controller configuration with short delays for tests
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        watch_restart_delay_secs: 1,
        reconcile_timeout_secs: 5,
        backoff_start_ms: 10,
        backoff_max_ms: 100,
        ..ControllerConfig::default()
    }
}

/// Builds a namespaced export at generation 1 from a YAML spec
pub fn export(namespace: &str, name: &str, spec_yaml: &str) -> ResourceFieldExport {
    let spec = serde_yaml::from_str(spec_yaml).expect("export spec should deserialize");
    let mut export = ResourceFieldExport::new(name, spec);
    export.metadata.namespace = Some(namespace.to_string());
    export.metadata.generation = Some(1);
    export
}

pub fn sql_instance() -> GroupVersionKind {
    GroupVersionKind::gvk("sql.cnrm.cloud.google.com", "v1beta1", "SQLInstance")
}

pub fn redis_instance() -> GroupVersionKind {
    GroupVersionKind::gvk("redis.cnrm.cloud.google.com", "v1beta1", "RedisInstance")
}

pub fn elasticache_group() -> GroupVersionKind {
    GroupVersionKind::gvk("elasticache.services.k8s.aws", "v1alpha1", "ReplicationGroup")
}
