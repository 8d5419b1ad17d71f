//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the provisioner,
//! the MachineRequest watcher and the health probes together.

use crate::config::ProviderArgs;
use crate::error::ControllerError;
use crate::probes;
use crate::provider::{Provisioner, ProvisionerConfig};
use crate::reconciler::Reconciler;
use crate::watcher::{Context, Watcher};
use crds::MachineRequest;
use image_factory_client::ImageFactoryClient;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client};
use kubevirt_client::KubeVirtClient;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for the KubeVirt provider.
#[derive(Debug)]
pub struct Controller {
    watcher: JoinHandle<Result<(), ControllerError>>,
    probes: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(args: &ProviderArgs) -> Result<Self, ControllerError> {
        info!("Initializing KubeVirt provider {} ({})", args.provider_name, args.provider_id);

        let config_patches = args.load_config_patches()?;
        info!("Loaded {} config patches", config_patches.len());

        let kube_client = kube_client(args.kubeconfig_file.as_deref()).await?;

        let store = KubeVirtClient::new(kube_client.clone(), &args.namespace, args.request_timeout());
        let schematics = ImageFactoryClient::new(args.image_factory_url.clone(), args.insecure_skip_verify)?;

        let provisioner = Provisioner::new(
            Arc::new(store),
            ProvisionerConfig {
                image_factory_url: args.image_factory_url.clone(),
                volume_mode: args.data_volume_mode,
                provider_id: args.provider_id.clone(),
            },
        );
        let reconciler = Reconciler::new(provisioner, Arc::new(schematics), config_patches);

        let api: Api<MachineRequest> = match args.watch_namespace.as_deref() {
            Some(namespace) => Api::namespaced(kube_client.clone(), namespace),
            None => Api::all(kube_client.clone()),
        };
        let context = Arc::new(Context {
            client: kube_client,
            reconciler,
        });

        let ready = Arc::new(AtomicBool::new(false));
        let watcher_instance = Watcher::new(context, api, args.provider_id.clone(), Arc::clone(&ready));

        // Start watcher and probes in background tasks
        let watcher = tokio::spawn(watcher_instance.watch_machine_requests());
        let probes = tokio::spawn(probes::serve(args.probe_addr, ready));

        Ok(Self { watcher, probes })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("KubeVirt provider running");

        // The watcher returns on shutdown signal; the probe server only on failure
        tokio::select! {
            result = &mut self.watcher => {
                result.map_err(|e| ControllerError::Watch(format!("MachineRequest watcher panicked: {}", e)))??;
            }
            result = &mut self.probes => {
                result.map_err(|e| ControllerError::Watch(format!("Probe server panicked: {}", e)))??;
            }
        }

        self.probes.abort();
        info!("KubeVirt provider stopped");
        Ok(())
    }
}

async fn kube_client(kubeconfig: Option<&Path>) -> Result<Client, ControllerError> {
    let Some(path) = kubeconfig else {
        return Ok(Client::try_default().await?);
    };

    info!("Using kubeconfig {}", path.display());
    let kubeconfig = Kubeconfig::read_from(path)
        .map_err(|e| ControllerError::InvalidConfig(format!("failed to read kubeconfig {}: {}", path.display(), e)))?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ControllerError::InvalidConfig(format!("invalid kubeconfig {}: {}", path.display(), e)))?;
    Ok(Client::try_from(config)?)
}
