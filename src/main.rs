//! # Extension Sync Controller
//!
//! Kubernetes controller that registers `Extension` resources of the management
//! cluster as `ControllerRegistration` and `ControllerDeployment` objects in the
//! tenant (virtual) cluster once the `Garden` is ready.
//!
//! ## Usage
//!
//! ```bash
//! # Run the controller (default)
//! extension-sync-controller
//!
//! # Print the CRDs
//! extension-sync-controller crd | kubectl apply -f -
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use extension_sync_controller::crd::{ControllerDeployment, ControllerRegistration, Extension, Garden};
use extension_sync_controller::runtime::{initialize, run_watch_loop};
use kube::CustomResourceExt;
use tracing::info;

/// Extension Sync Controller
#[derive(Parser)]
#[command(name = "extension-sync-controller")]
#[command(
    about = "Syncs Extension resources into the tenant virtual cluster",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller (default)
    Run,
    /// Print the CustomResourceDefinitions as multi-document YAML
    Crd,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run().await,
        Commands::Crd => print_crds(),
    }
}

async fn run() -> Result<()> {
    let init = initialize().await?;
    info!(?init, "Initialization complete");
    run_watch_loop(init.client, init.reconciler, init.server_state).await
}

fn print_crds() -> Result<()> {
    let documents = [
        serde_yaml::to_string(&Extension::crd()),
        serde_yaml::to_string(&Garden::crd()),
        serde_yaml::to_string(&ControllerRegistration::crd()),
        serde_yaml::to_string(&ControllerDeployment::crd()),
    ]
    .into_iter()
    .collect::<Result<Vec<_>, _>>()
    .context("Failed to serialize CRD")?;

    print!("{}", documents.join("---\n"));
    Ok(())
}
