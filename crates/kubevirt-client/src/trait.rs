//! KubeVirtStore trait for mocking
//!
//! Abstracts the cluster object store so the provisioning pipeline can be
//! unit tested against an in-memory implementation.

use crate::error::StoreError;
use crds::{DataVolume, VirtualMachine};

/// Namespaced CRUD operations on the resources the provider manages.
///
/// Every method must be safe to call repeatedly with the same arguments.
/// Lookups return `Ok(None)` for missing objects rather than an error.
#[async_trait::async_trait]
pub trait KubeVirtStore: Send + Sync {
    /// Namespace all objects live in
    fn namespace(&self) -> &str;

    /// Fetch a DataVolume by name.
    async fn get_data_volume(&self, name: &str) -> Result<Option<DataVolume>, StoreError>;
    /// Create a DataVolume; `StoreError::AlreadyExists` if the name is taken.
    async fn create_data_volume(&self, volume: &DataVolume) -> Result<DataVolume, StoreError>;

    /// Fetch a VirtualMachine by name.
    async fn get_virtual_machine(&self, name: &str) -> Result<Option<VirtualMachine>, StoreError>;
    /// Create a VirtualMachine; `StoreError::AlreadyExists` if the name is taken.
    async fn create_virtual_machine(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError>;
    /// Replaces the object; fails with `StoreError::Conflict` on a stale resourceVersion.
    async fn update_virtual_machine(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError>;
    /// Delete a VirtualMachine; `StoreError::NotFound` if it is already gone.
    async fn delete_virtual_machine(&self, name: &str) -> Result<(), StoreError>;
}
