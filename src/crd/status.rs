//! # ResourceFieldExport Status
//!
//! Status types owned by the controller.

use serde::{Deserialize, Serialize};

/// Status of the ResourceFieldExport resource
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFieldExportStatus {
    /// Conditions represent the latest available observations
    /// Exactly one condition of type `Ready` is maintained
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Generation of the spec the conditions were computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Value of the reconcile annotation the last report was made for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_handled_reconcile_at: Option<String>,
}

impl ResourceFieldExportStatus {
    pub fn condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the status value changed (RFC3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Machine readable reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}
