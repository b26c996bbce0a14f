//! # Condition Gate
//!
//! Checks required `(type, status)` pairs against the source's `status.conditions`.

use crate::controller::reconciler::path::Document;
use crate::crd::StatusCondition;

/// Returns true when every required condition is present with the exact status
///
/// An empty requirement list is always satisfied. A source without
/// `status.conditions` satisfies nothing.
pub fn satisfied(document: &Document, required: &[StatusCondition]) -> bool {
    unmet(document, required).is_empty()
}

/// Required conditions that the source does not report with the expected status
pub fn unmet<'a>(document: &Document, required: &'a [StatusCondition]) -> Vec<&'a StatusCondition> {
    let conditions = document
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(|c| c.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    required
        .iter()
        .filter(|req| {
            !conditions.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some(req.r#type.as_str())
                    && c.get("status").and_then(|s| s.as_str()) == Some(req.status.as_str())
            })
        })
        .collect()
}
