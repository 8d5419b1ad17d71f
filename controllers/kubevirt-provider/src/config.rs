//! Provider configuration.
//!
//! Command line flags with environment fallbacks. Config patches are loaded
//! and validated once at startup; a bad patch stops the provider before it
//! touches any request.

use crate::error::ControllerError;
use crate::provider::volume::VolumeMode;
use clap::Parser;
use crds::ConfigPatchStatus;
use image_factory_client::DEFAULT_IMAGE_FACTORY_URL;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// KubeVirt infrastructure provider
#[derive(Debug, Parser)]
#[command(name = "kubevirt-provider")]
#[command(about = "Provisions Talos machines as KubeVirt virtual machines", long_about = None)]
#[command(version)]
pub struct ProviderArgs {
    /// Kubeconfig to use instead of the in-cluster or default config
    #[arg(long)]
    pub kubeconfig_file: Option<PathBuf>,

    /// Namespace where virtual machines and boot volumes are created
    #[arg(long, env = "PROVIDER_NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Namespace to watch for machine requests (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Provider instance ID, selects which machine requests are handled
    #[arg(long = "id", env = "PROVIDER_ID", default_value = "kubevirt")]
    pub provider_id: String,

    #[arg(long, env = "PROVIDER_NAME", default_value = "KubeVirt")]
    pub provider_name: String,

    #[arg(long, env = "PROVIDER_DESCRIPTION", default_value = "KubeVirt infrastructure provider")]
    pub provider_description: String,

    /// Volume mode for created data volumes (storage class default when unset)
    #[arg(long, value_enum)]
    pub data_volume_mode: Option<VolumeMode>,

    /// Config patch applied to every machine, YAML `{prefix, data}`; `@path` reads a file
    #[arg(long = "config-patch")]
    pub config_patches: Vec<String>,

    /// Talos Image Factory base URL
    #[arg(long, env = "IMAGE_FACTORY_URL", default_value = DEFAULT_IMAGE_FACTORY_URL)]
    pub image_factory_url: String,

    /// Skip TLS verification toward the Image Factory
    #[arg(long)]
    pub insecure_skip_verify: bool,

    /// Timeout for every Kubernetes API call made while provisioning
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,

    /// Listen address of the health probes
    #[arg(long, env = "PROBE_ADDR", default_value = "0.0.0.0:8080")]
    pub probe_addr: SocketAddr,
}

impl ProviderArgs {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load and validate every `--config-patch`.
    pub fn load_config_patches(&self) -> Result<Vec<ConfigPatch>, ControllerError> {
        self.config_patches.iter().map(|raw| ConfigPatch::load(raw)).collect()
    }
}

/// Machine config patch applied to every machine of this provider.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ConfigPatch {
    /// Name prefix, the request ID is appended
    pub prefix: String,
    /// Patch document
    pub data: String,
}

impl ConfigPatch {
    /// Parse a patch given inline or as `@path`.
    pub fn load(raw: &str) -> Result<Self, ControllerError> {
        let document = match raw.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                ControllerError::InvalidConfig(format!("failed to read config patch {path}: {e}"))
            })?,
            None => raw.to_string(),
        };
        Self::parse(&document)
    }

    pub fn parse(document: &str) -> Result<Self, ControllerError> {
        let patch: ConfigPatch = serde_yaml::from_str(document)
            .map_err(|e| ControllerError::InvalidConfig(format!("invalid config patch: {e}")))?;

        if patch.prefix.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "config patch prefix must not be empty".to_string(),
            ));
        }
        serde_yaml::from_str::<serde_yaml::Value>(&patch.data).map_err(|e| {
            ControllerError::InvalidConfig(format!("config patch {} is not valid YAML: {e}", patch.prefix))
        })?;

        Ok(patch)
    }

    /// Patch as published for one request.
    pub fn for_request(&self, request_id: &str) -> ConfigPatchStatus {
        ConfigPatchStatus {
            name: format!("{}-{}", self.prefix, request_id),
            data: self.data.clone(),
        }
    }
}
