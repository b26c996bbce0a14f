//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ## Usage
//!
//! ```rust
//! use field_exporter::prelude::*;
//! ```
//!
//! This brings into scope:
//! - All CRD types (ResourceFieldExport, DestinationType, etc.)
//! - The source and destination seams (DynamicResourceAccessor, DestinationClient, StatusStore)
//! - Reconciler types (Reconciler, ReconcilerError, etc.)
//! - Config types (ControllerConfig, ServerConfig)

// CRD types - most commonly used
pub use crate::crd::*;

// Seams to the cluster - implemented by the kube-backed clients and by test fakes
pub use crate::controller::reconciler::destination::{DestinationClient, DestinationWriter, WriteOutcome};
pub use crate::controller::reconciler::source::{DynamicResourceAccessor, SourceEvent, SourceEventKind};
pub use crate::controller::reconciler::status::{StatusReporter, StatusStore};

// Reconciler types - core controller functionality
pub use crate::controller::reconciler::{
    reconcile, sync_export, BackoffState, ExportRef, Outcome, Reconciler, ReconcilerError,
    TriggerSource,
};
pub use crate::controller::reconciler::path::{Document, FieldPath};

// Config types - for configuration management
pub use crate::config::{ControllerConfig, ServerConfig, SharedControllerConfig};
