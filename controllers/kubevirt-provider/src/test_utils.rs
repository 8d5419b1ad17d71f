//! Test utilities for unit testing the provisioner and reconciler
//!
//! This module provides a fake schematic generator and a ready-wired
//! provisioner on top of the in-memory object store.

use crate::provider::volume::VolumeMode;
use crate::provider::{ConnectionParams, ProvisionContext, Provisioner, ProvisionerConfig};
use image_factory_client::{ImageFactoryError, SchematicGenerator, SchematicRequest};
use kubevirt_client::MockKubeVirtStore;
use std::sync::{Arc, Mutex, PoisonError};

/// Provider data of the reference machine: amd64, 2 cores, 2048 MiB, 10 GiB disk.
pub const AMD64_PROVIDER_DATA: &str = "architecture: amd64\ncores: 2\nmemory: 2048\ndisk_size: 10\n";

pub const JOIN_CONFIG: &str = "apiVersion: v1alpha1\nkind: SideroLinkConfig\n";

/// Schematic generator that returns a fixed ID and remembers what it was asked.
#[derive(Debug, Clone, Default)]
pub struct FakeSchematics {
    id: String,
    fail: bool,
    requests: Arc<Mutex<Vec<SchematicRequest>>>,
}

impl FakeSchematics {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn last_kernel_args(&self) -> Option<Vec<String>> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|r| r.customization.extra_kernel_args.clone())
    }
}

#[async_trait::async_trait]
impl SchematicGenerator for FakeSchematics {
    async fn generate_schematic(&self, request: &SchematicRequest) -> Result<String, ImageFactoryError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if self.fail {
            return Err(ImageFactoryError::Api("factory returned 503".to_string()));
        }
        Ok(self.id.clone())
    }
}

/// Provisioner wired to a mock store and fake schematic generator.
#[derive(Debug)]
pub struct TestEnv {
    pub store: MockKubeVirtStore,
    pub schematics: FakeSchematics,
    pub provisioner: Provisioner,
}

impl TestEnv {
    pub const NAMESPACE: &'static str = "vms";
    pub const PROVIDER_ID: &'static str = "kubevirt";
    pub const FACTORY_URL: &'static str = "https://factory.talos.dev";
    pub const SCHEMATIC_ID: &'static str = "376567988ad370138ad8b2698212367b8edcb69b5fd68c80be1f2ec7d603b4ba";

    pub fn new() -> Self {
        Self::with_schematics(FakeSchematics::new(Self::SCHEMATIC_ID))
    }

    pub fn with_schematics(schematics: FakeSchematics) -> Self {
        Self::build(schematics, None)
    }

    pub fn with_volume_mode(volume_mode: VolumeMode) -> Self {
        Self::build(FakeSchematics::new(Self::SCHEMATIC_ID), Some(volume_mode))
    }

    fn build(schematics: FakeSchematics, volume_mode: Option<VolumeMode>) -> Self {
        let store = MockKubeVirtStore::new(Self::NAMESPACE);
        let provisioner = Provisioner::new(
            Arc::new(store.clone()),
            ProvisionerConfig {
                image_factory_url: Self::FACTORY_URL.to_string(),
                volume_mode,
                provider_id: Self::PROVIDER_ID.to_string(),
            },
        );
        Self {
            store,
            schematics,
            provisioner,
        }
    }

    pub fn context<'a>(&'a self, request_id: &str, provider_data: &str) -> ProvisionContext<'a> {
        self.context_with_version(request_id, "v1.9.0", provider_data)
    }

    pub fn context_with_version<'a>(
        &'a self,
        request_id: &str,
        talos_version: &str,
        provider_data: &str,
    ) -> ProvisionContext<'a> {
        ProvisionContext::new(
            request_id,
            talos_version,
            provider_data,
            ConnectionParams {
                join_config: JOIN_CONFIG.to_string(),
                kernel_args: vec!["siderolink.api=grpc://omni.example:8090".to_string()],
            },
            &self.schematics,
        )
    }
}
