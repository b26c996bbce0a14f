//! # List Command
//!
//! Command to list ResourceFieldExport resources.

use anyhow::{Context, Result};
use field_exporter::constants::READY_CONDITION;
use field_exporter::crd::ResourceFieldExport;
use kube::{api::Api, api::ListParams, Client};

/// List ResourceFieldExport resources in one namespace or all of them
pub async fn list_command(client: Client, namespace: Option<String>) -> Result<()> {
    let api: Api<ResourceFieldExport> = if let Some(ns) = &namespace {
        println!("Listing ResourceFieldExport resources in namespace '{ns}'...");
        Api::namespaced(client, ns)
    } else {
        println!("Listing ResourceFieldExport resources in all namespaces...");
        Api::all(client)
    };

    let exports = api
        .list(&ListParams::default())
        .await
        .context("Failed to list ResourceFieldExport resources")?;

    if exports.items.is_empty() {
        println!("No ResourceFieldExport resources found.");
        return Ok(());
    }

    println!(
        "\n{:<30} {:<20} {:<10} {:<10} {:<20} {:<8}",
        "NAME", "NAMESPACE", "DEST", "READY", "REASON", "OUTPUTS"
    );
    println!("{}", "-".repeat(103));

    for export in &exports.items {
        let name = export.metadata.name.as_deref().unwrap_or("<unknown>");
        let ns = export.metadata.namespace.as_deref().unwrap_or("<unknown>");
        let destination = export.spec.to.r#type.as_str();
        let (ready, reason) = ready_columns(export);
        let outputs = export.spec.outputs.len();

        println!("{name:<30} {ns:<20} {destination:<10} {ready:<10} {reason:<20} {outputs:<8}");
    }

    Ok(())
}

/// Ready status and reason, `Unknown`/`-` before the first reconcile
fn ready_columns(export: &ResourceFieldExport) -> (&str, &str) {
    export
        .status
        .as_ref()
        .and_then(|s| s.condition(READY_CONDITION))
        .map(|c| (c.status.as_str(), c.reason.as_deref().unwrap_or("-")))
        .unwrap_or(("Unknown", "-"))
}
