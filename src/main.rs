//! # Field Exporter
//!
//! A Kubernetes controller that exports fields of cloud-managed resources into
//! ConfigMaps and Secrets.
//!
//! ## Overview
//!
//! For every `ResourceFieldExport` the controller:
//!
//! 1. **Resolves the source** - Checks `from.apiVersion` against the supported API group suffixes
//! 2. **Watches the source** - Shares one watch per source kind across all exports
//! 3. **Gates on readiness** - Waits for the required `status.conditions` on the source
//! 4. **Extracts fields** - Evaluates each output path against the live source object
//! 5. **Writes the destination** - Merges the values into the target ConfigMap or Secret
//!
//! ## Usage
//!
//! See the [README.md](../README.md) for detailed usage instructions and examples.

use anyhow::Result;
use field_exporter::runtime::{initialization::initialize, watch_loop::run_watch_loop};

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;

    run_watch_loop(
        init.exports,
        init.reconciler,
        init.server_state,
        init.source_events,
    )
    .await
}
