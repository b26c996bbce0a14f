//! # Destination Writer
//!
//! Merges extracted key/values into a ConfigMap or Secret in the export's namespace.
//!
//! Writes are additive: keys not produced by the export are never removed and the
//! destination object itself is never deleted. A write is only issued when at
//! least one stored value differs from the desired value.
//!
//! Every update carries the `resourceVersion` of the snapshot it was computed
//! from, so concurrent writers surface as conflicts and the merge is recomputed
//! against the fresh object.

use crate::crd::{DestinationRef, DestinationType};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Extracted values keyed by destination key
pub type KeyValues = BTreeMap<String, String>;

/// Stored destination entries; ConfigMap text and Secret bytes share this form
pub type Entries = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: DestinationType,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} kept changing, gave up after {attempts} attempts")]
    Conflict {
        kind: DestinationType,
        namespace: String,
        name: String,
        attempts: u32,
    },
    #[error("{kind} {namespace}/{name}: {source}")]
    Api {
        kind: DestinationType,
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },
}

/// Error returned by a [`DestinationClient`] call, before it is attributed to a destination
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error(transparent)]
    Api(kube::Error),
}

/// Maps API status codes onto [`ClientError`] variants
fn classify(err: kube::Error) -> ClientError {
    match err {
        kube::Error::Api(ref e) if e.code == 404 => ClientError::NotFound,
        kube::Error::Api(ref e) if e.code == 409 => ClientError::Conflict,
        other => ClientError::Api(other),
    }
}

/// Snapshot of a destination taken before computing a merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub resource_version: Option<String>,
    pub entries: Entries,
}

/// Read/update access to destination objects
#[async_trait]
pub trait DestinationClient: Send + Sync {
    /// Returns `None` when the destination does not exist
    async fn fetch(
        &self,
        namespace: &str,
        destination: &DestinationRef,
    ) -> Result<Option<Snapshot>, ClientError>;

    /// Writes `changes` on top of the object at `resource_version`
    async fn update(
        &self,
        namespace: &str,
        destination: &DestinationRef,
        changes: &Entries,
        resource_version: Option<&str>,
    ) -> Result<(), ClientError>;

    async fn create(
        &self,
        namespace: &str,
        destination: &DestinationRef,
        entries: &Entries,
    ) -> Result<(), ClientError>;
}

/// Result of a successful [`DestinationWriter::apply`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every key already held the desired value
    Unchanged,
    /// Existing destination updated with this many changed keys
    Updated(usize),
    /// Destination created with this many keys
    Created(usize),
}

impl WriteOutcome {
    pub fn changed_keys(&self) -> usize {
        match self {
            WriteOutcome::Unchanged => 0,
            WriteOutcome::Updated(n) | WriteOutcome::Created(n) => *n,
        }
    }
}

/// Computes the entries that must be written to bring `existing` up to `desired`
///
/// Returns `None` when the merge is a no-op. Keys absent from `desired` are never
/// part of the result.
///
/// # Example
///
/// ```rust
/// use field_exporter::controller::reconciler::destination::{compute_merge, Entries, KeyValues};
///
/// let mut existing = Entries::new();
/// existing.insert("host".to_string(), b"db".to_vec());
/// existing.insert("unrelated".to_string(), b"keep".to_vec());
///
/// let mut desired = KeyValues::new();
/// desired.insert("host".to_string(), "db".to_string());
/// assert!(compute_merge(&existing, &desired).is_none());
///
/// desired.insert("port".to_string(), "5432".to_string());
/// let changes = compute_merge(&existing, &desired).unwrap();
/// assert_eq!(changes.len(), 1);
/// assert_eq!(changes["port"], b"5432".to_vec());
/// ```
pub fn compute_merge(existing: &Entries, desired: &KeyValues) -> Option<Entries> {
    let changes: Entries = desired
        .iter()
        .filter(|(key, value)| {
            existing
                .get(key.as_str())
                .is_none_or(|stored| stored.as_slice() != value.as_bytes())
        })
        .map(|(key, value)| (key.clone(), value.as_bytes().to_vec()))
        .collect();

    if changes.is_empty() {
        None
    } else {
        Some(changes)
    }
}

/// Applies key/values to destinations with read-modify-write conflict retries
#[derive(Clone)]
pub struct DestinationWriter {
    client: Arc<dyn DestinationClient>,
    create_missing: bool,
    conflict_retries: u32,
}

impl std::fmt::Debug for DestinationWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationWriter")
            .field("create_missing", &self.create_missing)
            .field("conflict_retries", &self.conflict_retries)
            .finish_non_exhaustive()
    }
}

impl DestinationWriter {
    pub fn new(client: Arc<dyn DestinationClient>, create_missing: bool, conflict_retries: u32) -> Self {
        Self {
            client,
            create_missing,
            conflict_retries: conflict_retries.max(1),
        }
    }

    pub async fn apply(
        &self,
        namespace: &str,
        destination: &DestinationRef,
        values: &KeyValues,
    ) -> Result<WriteOutcome, WriteError> {
        let attribute = |err: ClientError| self.attribute(namespace, destination, err);

        for attempt in 1..=self.conflict_retries {
            let Some(snapshot) = self
                .client
                .fetch(namespace, destination)
                .await
                .map_err(attribute)?
            else {
                if !self.create_missing {
                    return Err(self.attribute(namespace, destination, ClientError::NotFound));
                }
                let entries: Entries = values
                    .iter()
                    .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
                    .collect();
                match self.client.create(namespace, destination, &entries).await {
                    Ok(()) => {
                        info!(
                            "Created {} {}/{} with {} key(s)",
                            destination.r#type,
                            namespace,
                            destination.name,
                            entries.len()
                        );
                        return Ok(WriteOutcome::Created(entries.len()));
                    }
                    // Someone else created it first; merge into theirs
                    Err(ClientError::Conflict) => continue,
                    Err(e) => return Err(attribute(e)),
                }
            };

            let Some(changes) = compute_merge(&snapshot.entries, values) else {
                debug!(
                    "{} {}/{} already up to date",
                    destination.r#type, namespace, destination.name
                );
                return Ok(WriteOutcome::Unchanged);
            };

            match self
                .client
                .update(
                    namespace,
                    destination,
                    &changes,
                    snapshot.resource_version.as_deref(),
                )
                .await
            {
                Ok(()) => return Ok(WriteOutcome::Updated(changes.len())),
                Err(ClientError::Conflict) => {
                    warn!(
                        "Conflict writing {} {}/{} (attempt {}/{}), re-reading",
                        destination.r#type,
                        namespace,
                        destination.name,
                        attempt,
                        self.conflict_retries
                    );
                }
                Err(e) => return Err(attribute(e)),
            }
        }

        Err(WriteError::Conflict {
            kind: destination.r#type,
            namespace: namespace.to_string(),
            name: destination.name.clone(),
            attempts: self.conflict_retries,
        })
    }

    fn attribute(&self, namespace: &str, destination: &DestinationRef, err: ClientError) -> WriteError {
        let kind = destination.r#type;
        let namespace = namespace.to_string();
        let name = destination.name.clone();
        match err {
            ClientError::NotFound => WriteError::NotFound {
                kind,
                namespace,
                name,
            },
            ClientError::Conflict => WriteError::Conflict {
                kind,
                namespace,
                name,
                attempts: self.conflict_retries,
            },
            ClientError::Api(source) => WriteError::Api {
                kind,
                namespace,
                name,
                source,
            },
        }
    }
}

/// [`DestinationClient`] backed by the cluster API
#[derive(Clone)]
pub struct KubeDestinationClient {
    client: Client,
}

impl std::fmt::Debug for KubeDestinationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeDestinationClient").finish_non_exhaustive()
    }
}

impl KubeDestinationClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DestinationClient for KubeDestinationClient {
    async fn fetch(
        &self,
        namespace: &str,
        destination: &DestinationRef,
    ) -> Result<Option<Snapshot>, ClientError> {
        match destination.r#type {
            DestinationType::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                let Some(cm) = api.get_opt(&destination.name).await.map_err(classify)? else {
                    return Ok(None);
                };
                Ok(Some(Snapshot {
                    resource_version: cm.metadata.resource_version,
                    entries: cm
                        .data
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(k, v)| (k, v.into_bytes()))
                        .collect(),
                }))
            }
            DestinationType::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                let Some(secret) = api.get_opt(&destination.name).await.map_err(classify)? else {
                    return Ok(None);
                };
                Ok(Some(Snapshot {
                    resource_version: secret.metadata.resource_version,
                    entries: secret
                        .data
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(k, v)| (k, v.0))
                        .collect(),
                }))
            }
        }
    }

    async fn update(
        &self,
        namespace: &str,
        destination: &DestinationRef,
        changes: &Entries,
        resource_version: Option<&str>,
    ) -> Result<(), ClientError> {
        let data = match destination.r#type {
            DestinationType::ConfigMap => json!(changes
                .iter()
                .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
                .collect::<BTreeMap<_, _>>()),
            // ByteString serializes as base64
            DestinationType::Secret => json!(changes
                .iter()
                .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                .collect::<BTreeMap<_, _>>()),
        };
        let mut body = json!({ "data": data });
        if let Some(rv) = resource_version {
            body["metadata"] = json!({ "resourceVersion": rv });
        }
        let patch = Patch::Merge(body);
        let params = PatchParams::apply(crate::constants::FIELD_MANAGER);

        match destination.r#type {
            DestinationType::ConfigMap => {
                let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
                api.patch(&destination.name, &params, &patch)
                    .await
                    .map_err(classify)?;
            }
            DestinationType::Secret => {
                let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
                api.patch(&destination.name, &params, &patch)
                    .await
                    .map_err(classify)?;
            }
        }
        Ok(())
    }

    async fn create(
        &self,
        namespace: &str,
        destination: &DestinationRef,
        entries: &Entries,
    ) -> Result<(), ClientError> {
        let metadata = ObjectMeta {
            name: Some(destination.name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        };
        let params = PostParams {
            field_manager: Some(crate::constants::FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        match destination.r#type {
            DestinationType::ConfigMap => {
                let cm = ConfigMap {
                    metadata,
                    data: Some(
                        entries
                            .iter()
                            .map(|(k, v)| (k.clone(), String::from_utf8_lossy(v).into_owned()))
                            .collect(),
                    ),
                    ..Default::default()
                };
                Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
                    .create(&params, &cm)
                    .await
                    .map_err(classify)?;
            }
            DestinationType::Secret => {
                let secret = Secret {
                    metadata,
                    data: Some(
                        entries
                            .iter()
                            .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                            .collect(),
                    ),
                    ..Default::default()
                };
                Api::<Secret>::namespaced(self.client.clone(), namespace)
                    .create(&params, &secret)
                    .await
                    .map_err(classify)?;
            }
        }
        Ok(())
    }
}
