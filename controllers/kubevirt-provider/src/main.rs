//! KubeVirt Infrastructure Provider
//!
//! Provisions Talos Linux machines as KubeVirt virtual machines:
//! - Registers a boot image schematic with the Talos Image Factory
//! - Imports each distinct boot image once into a shared DataVolume
//! - Creates one VirtualMachine per `MachineRequest`, cloning its disk
//!   from the shared boot volume
//!
//! Requests are handled only when labelled for this provider's ID.

mod backoff;
mod config;
mod controller;
mod error;
mod probes;
mod provider;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod watcher;

use clap::Parser;
use config::ProviderArgs;
use controller::Controller;
use crate::error::ControllerError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let args = ProviderArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting KubeVirt provider");
    info!("Configuration:");
    info!("  Provider: {} ({})", args.provider_name, args.provider_description);
    info!("  Provider ID: {}", args.provider_id);
    info!("  Namespace: {}", args.namespace);
    info!("  Watch namespace: {}", args.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Image Factory: {}", args.image_factory_url);
    info!(
        "  Data volume mode: {}",
        args.data_volume_mode.map_or("storage class default", |mode| mode.as_str())
    );

    // Initialize and run controller
    let controller = Controller::new(&args).await?;
    controller.run().await?;

    Ok(())
}
