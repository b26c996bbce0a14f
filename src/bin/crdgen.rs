//! # CRD Generator
//!
//! Generates the Kubernetes CustomResourceDefinition (CRD) YAML from the Rust type definitions.
//!
//! This binary uses the `kube` crate's `CustomResourceExt` trait to generate
//! the CRD YAML for the `ResourceFieldExport` resource.
//!
//! ## Usage
//!
//! ```bash
//! # Generate CRD YAML
//! cargo run --bin crdgen > config/crd/resourcefieldexport.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use field_exporter::crd::ResourceFieldExport;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crd = ResourceFieldExport::crd();
    print!("{}", serde_yaml::to_string(&crd)?);
    Ok(())
}
