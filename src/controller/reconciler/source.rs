//! # Source Access
//!
//! Schema-less get/watch against any resource kind, keyed by group/version/kind.
//!
//! Sources are read as `DynamicObject`s and handed to the rest of the pipeline as a
//! generic [`Document`] holding the full `metadata`/`spec`/`status` tree.

use crate::controller::reconciler::path::Document;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, ResourceExt};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AccessError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("failed to discover {group}/{version} {kind}: {source}")]
    Discovery {
        group: String,
        version: String,
        kind: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to read {kind} {namespace}/{name}: {source}")]
    Api {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
    #[error("failed to encode {kind} {namespace}/{name}: {source}")]
    Encode {
        kind: String,
        namespace: String,
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// What happened to a watched source object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEventKind {
    Applied,
    Deleted,
}

impl SourceEventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceEventKind::Applied => "applied",
            SourceEventKind::Deleted => "deleted",
        }
    }
}

/// Change notification for one object of a watched kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    pub kind: SourceEventKind,
    pub namespace: String,
    pub name: String,
}

/// Get/watch capability over arbitrary resource kinds
#[async_trait]
pub trait DynamicResourceAccessor: Send + Sync {
    /// Fetches the live document; a missing object is [`AccessError::NotFound`]
    async fn get(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
    ) -> Result<Document, AccessError>;

    /// Opens a cluster-wide change stream for `gvk`
    ///
    /// The stream ends when the underlying watch gives up; callers re-open it.
    async fn watch(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<BoxStream<'static, SourceEvent>, AccessError>;
}

/// [`DynamicResourceAccessor`] backed by the cluster API
///
/// API resources are discovered once per kind and cached, so the plural name
/// and scope come from the server rather than being guessed from the kind.
#[derive(Clone)]
pub struct KubeSourceAccessor {
    client: Client,
    resources: Arc<AsyncMutex<HashMap<GroupVersionKind, ApiResource>>>,
}

impl std::fmt::Debug for KubeSourceAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("KubeSourceAccessor");
        if let Ok(resources) = self.resources.try_lock() {
            out.field("discovered_kinds", &resources.len());
        }
        out.finish_non_exhaustive()
    }
}

impl KubeSourceAccessor {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: Arc::new(AsyncMutex::new(HashMap::new())),
        }
    }

    async fn api_resource(&self, gvk: &GroupVersionKind) -> Result<ApiResource, AccessError> {
        let mut resources = self.resources.lock().await;
        if let Some(ar) = resources.get(gvk) {
            return Ok(ar.clone());
        }

        let (ar, _caps) = kube::discovery::pinned_kind(&self.client, gvk)
            .await
            .map_err(|source| AccessError::Discovery {
                group: gvk.group.clone(),
                version: gvk.version.clone(),
                kind: gvk.kind.clone(),
                source,
            })?;
        debug!("Discovered {} as {}", gvk.kind, ar.plural);
        resources.insert(gvk.clone(), ar.clone());
        Ok(ar)
    }
}

#[async_trait]
impl DynamicResourceAccessor for KubeSourceAccessor {
    async fn get(
        &self,
        namespace: &str,
        gvk: &GroupVersionKind,
        name: &str,
    ) -> Result<Document, AccessError> {
        let ar = self.api_resource(gvk).await?;
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);

        match api.get(name).await {
            Ok(obj) => serde_json::to_value(&obj).map_err(|source| AccessError::Encode {
                kind: gvk.kind.clone(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            }),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => Err(AccessError::NotFound {
                kind: gvk.kind.clone(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            }),
            Err(source) => Err(AccessError::Api {
                kind: gvk.kind.clone(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                source,
            }),
        }
    }

    async fn watch(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<BoxStream<'static, SourceEvent>, AccessError> {
        let ar = self.api_resource(gvk).await?;
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let kind = gvk.kind.clone();

        let stream = kube::runtime::watcher(api, watcher::Config::default())
            .default_backoff()
            .filter_map(move |event| {
                let kind = kind.clone();
                async move {
                    match event {
                        Ok(Event::Apply(obj)) | Ok(Event::InitApply(obj)) => {
                            Some(to_source_event(SourceEventKind::Applied, &obj))
                        }
                        Ok(Event::Delete(obj)) => {
                            Some(to_source_event(SourceEventKind::Deleted, &obj))
                        }
                        Ok(Event::Init) | Ok(Event::InitDone) => None,
                        Err(e) => {
                            warn!("Watch error for {}: {}", kind, e);
                            None
                        }
                    }
                }
            })
            .boxed();

        Ok(stream)
    }
}

fn to_source_event(kind: SourceEventKind, obj: &DynamicObject) -> SourceEvent {
    SourceEvent {
        kind,
        namespace: obj.namespace().unwrap_or_default(),
        name: obj.name_any(),
    }
}
