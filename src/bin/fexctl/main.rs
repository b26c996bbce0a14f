//! # FEXCTL CLI
//!
//! Command-line interface for the field exporter.
//!
//! Similar to `fluxctl`, this CLI tool allows users to trigger reconciliations
//! and inspect `ResourceFieldExport` resources running in Kubernetes.
//!
//! ## Usage
//!
//! ```bash
//! # List all ResourceFieldExport resources
//! fexctl list
//!
//! # List resources in one namespace
//! fexctl list -n payments
//!
//! # Trigger reconciliation for a ResourceFieldExport
//! fexctl reconcile redis-endpoint -n payments
//!
//! # Check whether a source apiVersion is accepted by the controller
//! fexctl check-api-version sql.cnrm.cloud.google.com/v1beta1
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kube::Client;

mod check;
mod list;
mod reconcile;

/// Field Exporter CLI
#[derive(Parser)]
#[command(name = "fexctl")]
#[command(
    about = "Field Exporter CLI",
    long_about = None,
    after_help = "\
Examples:
  fexctl list
  fexctl reconcile redis-endpoint --namespace payments
  fexctl check-api-version rds.services.k8s.aws/v1alpha1
"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes namespace (defaults to all namespaces for list, "default" otherwise)
    #[arg(short, long, global = true)]
    namespace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List ResourceFieldExport resources with their Ready condition
    List,
    /// Trigger reconciliation for a ResourceFieldExport resource
    Reconcile {
        /// Name of the ResourceFieldExport resource
        #[arg(value_name = "NAME")]
        name: String,
    },
    /// Check a source apiVersion against the supported API groups
    /// Uses the same SUPPORTED_GROUP_SUFFIXES environment variable as the controller
    #[command(name = "check-api-version")]
    CheckApiVersion {
        /// Source apiVersion, e.g. redis.cnrm.cloud.google.com/v1beta1
        #[arg(value_name = "APIVERSION")]
        api_version: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Required for rustls 0.23+ when no default provider is set via features
    // Fails only when a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fexctl=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::CheckApiVersion { api_version } => check::check_api_version_command(&api_version),
        Commands::List => list::list_command(client().await?, cli.namespace).await,
        Commands::Reconcile { name } => {
            reconcile::reconcile_command(client().await?, name, cli.namespace).await
        }
    }
}

async fn client() -> Result<Client> {
    Client::try_default()
        .await
        .context("Failed to create Kubernetes client. Ensure kubeconfig is configured.")
}
