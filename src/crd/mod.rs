//! # Custom Resource Definitions
//!
//! CRD types for the field exporter.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `ResourceFieldExport` specification and references
//! - `status.rs` - Status and condition types

mod spec;
mod status;

pub use spec::{
    DestinationRef, DestinationType, Output, RequiredFields, ResourceFieldExport,
    ResourceFieldExportSpec, ResourceRef, StatusCondition,
};
pub use status::{Condition, ResourceFieldExportStatus};
