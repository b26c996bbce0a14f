//! # Reconciler
//!
//! Core reconciliation logic for `ResourceFieldExport` resources.
//!
//! The reconciler:
//! - Resolves the source `apiVersion` against the supported group suffixes
//! - Reads the source as a schema-less document and keeps one shared watch per kind
//! - Gates on the source's `status.conditions`
//! - Extracts output paths and merges them into the destination ConfigMap or Secret
//! - Reports the export's `Ready` condition
//!
//! ## Reconciliation Flow
//!
//! 1. `group`: resolve `from.apiVersion` to a group/version/kind
//! 2. `watches`: bind the export to the shared watch for that kind
//! 3. `source`: fetch the live source document
//! 4. `gate`: check required status conditions
//! 5. `path`: extract every output path
//! 6. `destination`: merge resolved values into the destination
//! 7. `status`: report the outcome

pub mod destination;
pub mod gate;
pub mod group;
pub mod path;
pub mod reconcile;
pub mod source;
pub mod status;
pub mod types;
pub mod watches;

// Re-export public API
pub use reconcile::{reconcile, sync_export, Stage};
pub use status::Outcome;
pub use types::{resource_key, BackoffState, Reconciler, ReconcilerError, TriggerSource};
pub use watches::{ExportRef, WatchRegistry};
