//! # Field Path Extraction
//!
//! Evaluates output paths such as `.status.nodeGroups[0].primaryEndpoint.address`
//! against a schema-less source document.
//!
//! Grammar: a leading `.` followed by dot separated field names. Each field name
//! may be followed by one or more `[i]` zero-based sequence indexes.
//!
//! Extraction never fails on a well-formed path: an absent field, an index out
//! of range, a step into a scalar, or a non-scalar terminal value all yield
//! `None`. Only parsing reports errors.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Generic structured document (maps, sequences, strings, numbers, bools, null)
pub type Document = Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("path {0:?} must start with '.'")]
    MissingLeadingDot(String),
    #[error("path {path:?} has an empty field name at position {position}")]
    EmptyField { path: String, position: usize },
    #[error("path {path:?} has an invalid index in segment {segment:?}")]
    InvalidIndex { path: String, segment: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Field(String),
    Index(usize),
}

/// A parsed output path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    steps: Vec<Step>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let rest = path
            .strip_prefix('.')
            .ok_or_else(|| PathError::MissingLeadingDot(path.to_string()))?;

        let mut steps = Vec::new();
        for (position, segment) in rest.split('.').enumerate() {
            let (name, mut indexes) = match segment.find('[') {
                Some(open) => (&segment[..open], &segment[open..]),
                None => (segment, ""),
            };
            if name.is_empty() {
                return Err(PathError::EmptyField {
                    path: path.to_string(),
                    position,
                });
            }
            steps.push(Step::Field(name.to_string()));

            while !indexes.is_empty() {
                let invalid = || PathError::InvalidIndex {
                    path: path.to_string(),
                    segment: segment.to_string(),
                };
                let inner = indexes.strip_prefix('[').ok_or_else(invalid)?;
                let close = inner.find(']').ok_or_else(invalid)?;
                let index = inner[..close].parse::<usize>().map_err(|_| invalid())?;
                steps.push(Step::Index(index));
                indexes = &inner[close + 1..];
            }
        }

        Ok(Self {
            raw: path.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Walks the document and stringifies a terminal scalar
    pub fn extract(&self, document: &Document) -> Option<String> {
        let mut current = document;
        for step in &self.steps {
            current = match step {
                Step::Field(name) => current.as_object()?.get(name)?,
                Step::Index(index) => current.as_array()?.get(*index)?,
            };
        }
        scalar_to_string(current)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parses and evaluates `path` in one go
pub fn extract(document: &Document, path: &str) -> Result<Option<String>, PathError> {
    Ok(FieldPath::parse(path)?.extract(document))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
