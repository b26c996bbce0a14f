//! Field Exporter Library
//!
//! This library provides the core functionality for the field exporter, a
//! Kubernetes controller that copies fields of cloud-managed resources (Config
//! Connector, ACK) into ConfigMaps and Secrets.
//! Tests are included in the module files (e.g., controller/reconciler/path.rs).
//!
//! ## Quick Start
//!
//! ```rust
//! use field_exporter::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod runtime;
