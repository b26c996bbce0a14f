//! # ResourceFieldExport Spec
//!
//! Main CRD specification types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// ResourceFieldExport Custom Resource Definition
///
/// Declares which fields of a cloud-managed resource are copied into a
/// ConfigMap or Secret in the same namespace.
///
/// # Example
///
/// ```yaml
/// apiVersion: gdp.deliveryhero.io/v1alpha1
/// kind: ResourceFieldExport
/// metadata:
///   name: redis-endpoint
///   namespace: default
/// spec:
///   from:
///     apiVersion: redis.cnrm.cloud.google.com/v1beta1
///     kind: RedisInstance
///     name: redis-instance
///   to:
///     type: ConfigMap
///     name: target-cm
///   outputs:
///     - key: host
///       path: .status.host
///   requiredFields:
///     statusConditions:
///       - type: Ready
///         status: "True"
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[kube(
    kind = "ResourceFieldExport",
    group = "gdp.deliveryhero.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::ResourceFieldExportStatus",
    shortname = "rfe",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Reason", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFieldExportSpec {
    /// Source resource, looked up in the export's namespace
    pub from: ResourceRef,
    /// Destination object, looked up in the export's namespace
    pub to: DestinationRef,
    /// Fields to copy; keys must be unique within one export
    pub outputs: Vec<Output>,
    /// Gates that must hold on the source before anything is copied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_fields: Option<RequiredFields>,
}

/// Reference to the source resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// `<group>/<version>` of the source, e.g. `rds.services.k8s.aws/v1alpha1`
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// Reference to the destination object
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRef {
    pub r#type: DestinationType,
    pub name: String,
}

/// Kind of object the fields are written into
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash, schemars::JsonSchema)]
pub enum DestinationType {
    ConfigMap,
    Secret,
}

impl DestinationType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::ConfigMap => "ConfigMap",
            DestinationType::Secret => "Secret",
        }
    }
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field copied from the source into the destination
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    /// Key written in the destination
    pub key: String,
    /// Field path into the source, e.g. `.status.nodeGroups[0].primaryEndpoint.address`
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequiredFields {
    /// All listed conditions must be present on the source with the given status
    #[serde(default)]
    pub status_conditions: Vec<StatusCondition>,
}

/// A `(type, status)` pair matched against the source's `status.conditions`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    pub r#type: String,
    pub status: String,
}

impl fmt::Display for StatusCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.r#type, self.status)
    }
}

impl ResourceFieldExportSpec {
    /// Required source conditions, empty when none are declared
    pub fn required_conditions(&self) -> &[StatusCondition] {
        self.required_fields
            .as_ref()
            .map_or(&[], |r| r.status_conditions.as_slice())
    }
}
