//! # Reconcile Command
//!
//! Command to trigger reconciliation for ResourceFieldExport resources.

use anyhow::{Context, Result};
use field_exporter::constants::RECONCILE_ANNOTATION;
use field_exporter::crd::ResourceFieldExport;
use kube::{api::Api, api::Patch, api::PatchParams, Client};
use serde_json::json;

/// Trigger reconciliation by adding/updating an annotation
/// The controller watches the export, so any metadata change requeues it
pub async fn reconcile_command(client: Client, name: String, namespace: Option<String>) -> Result<()> {
    let ns = namespace.as_deref().unwrap_or("default");
    let api: Api<ResourceFieldExport> = Api::namespaced(client, ns);

    println!("🔄 Triggering reconciliation for ResourceFieldExport '{ns}/{name}'...");

    // Fail early with a clear message when the export does not exist
    api.get(&name)
        .await
        .with_context(|| format!("Failed to get ResourceFieldExport '{ns}/{name}'"))?;

    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let patch = json!({
        "metadata": {
            "annotations": {
                RECONCILE_ANNOTATION: timestamp
            }
        }
    });

    api.patch(&name, &PatchParams::default(), &Patch::Merge(patch))
        .await
        .with_context(|| {
            format!("Failed to trigger reconciliation for ResourceFieldExport '{ns}/{name}'")
        })?;

    println!("✅ Reconciliation triggered successfully");
    println!("   Resource: {ns}/{name}");
    println!("   Annotation: {RECONCILE_ANNOTATION}={timestamp}");
    println!("\nThe controller will reconcile this resource shortly.");

    Ok(())
}
