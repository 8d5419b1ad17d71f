//! Kubernetes-backed object store
//!
//! Implements `KubeVirtStore` on top of `kube::Api`. Every call is bounded by
//! a timeout so a hung API server cannot stall a reconciliation forever.

use crate::error::StoreError;
use crate::store_trait::KubeVirtStore;
use crds::{DataVolume, VirtualMachine};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client, ResourceExt};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Object store for one namespace of a KubeVirt cluster
#[derive(Clone)]
pub struct KubeVirtClient {
    namespace: String,
    data_volumes: Api<DataVolume>,
    virtual_machines: Api<VirtualMachine>,
    timeout: Duration,
}

impl std::fmt::Debug for KubeVirtClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeVirtClient")
            .field("namespace", &self.namespace)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl KubeVirtClient {
    /// Create a new store bound to `namespace`
    ///
    /// # Arguments
    /// * `client` - Kubernetes client
    /// * `namespace` - Namespace for DataVolumes and VirtualMachines
    /// * `timeout` - Upper bound for every individual API call
    pub fn new(client: Client, namespace: impl Into<String>, timeout: Duration) -> Self {
        let namespace = namespace.into();
        Self {
            data_volumes: Api::namespaced(client.clone(), &namespace),
            virtual_machines: Api::namespaced(client, &namespace),
            namespace,
            timeout,
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = kube::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_elapsed) => Err(StoreError::Timeout {
                operation,
                timeout: self.timeout,
            }),
        }
    }
}

fn object_name(vm: &VirtualMachine) -> Result<String, StoreError> {
    vm.metadata
        .name
        .clone()
        .ok_or_else(|| StoreError::Api("object has no metadata.name".to_string()))
}

#[async_trait::async_trait]
impl KubeVirtStore for KubeVirtClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_data_volume(&self, name: &str) -> Result<Option<DataVolume>, StoreError> {
        debug!("GET datavolume {}/{}", self.namespace, name);
        self.bounded("get datavolume", self.data_volumes.get_opt(name))
            .await
    }

    async fn create_data_volume(&self, volume: &DataVolume) -> Result<DataVolume, StoreError> {
        debug!("CREATE datavolume {}/{}", self.namespace, volume.name_any());
        self.bounded(
            "create datavolume",
            self.data_volumes.create(&PostParams::default(), volume),
        )
        .await
    }

    async fn get_virtual_machine(&self, name: &str) -> Result<Option<VirtualMachine>, StoreError> {
        debug!("GET virtualmachine {}/{}", self.namespace, name);
        self.bounded("get virtualmachine", self.virtual_machines.get_opt(name))
            .await
    }

    async fn create_virtual_machine(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        debug!("CREATE virtualmachine {}/{}", self.namespace, vm.name_any());
        self.bounded(
            "create virtualmachine",
            self.virtual_machines.create(&PostParams::default(), vm),
        )
        .await
    }

    async fn update_virtual_machine(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        let name = object_name(vm)?;
        debug!("REPLACE virtualmachine {}/{}", self.namespace, name);
        self.bounded(
            "update virtualmachine",
            self.virtual_machines.replace(&name, &PostParams::default(), vm),
        )
        .await
    }

    async fn delete_virtual_machine(&self, name: &str) -> Result<(), StoreError> {
        debug!("DELETE virtualmachine {}/{}", self.namespace, name);
        self.bounded(
            "delete virtualmachine",
            self.virtual_machines.delete(name, &DeleteParams::default()),
        )
        .await
        .map(|_| ())
    }
}
