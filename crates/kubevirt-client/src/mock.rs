//! Mock KubeVirtStore for unit testing
//!
//! Stores objects in memory, records every call and lets tests inject
//! one-shot failures or simulate KubeVirt/CDI progressing objects.

use crate::error::StoreError;
use crate::store_trait::KubeVirtStore;
use crds::{DataVolume, DataVolumeStatus, VirtualMachine, VirtualMachineStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Store operation, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetDataVolume,
    CreateDataVolume,
    GetVirtualMachine,
    CreateVirtualMachine,
    UpdateVirtualMachine,
    DeleteVirtualMachine,
}

/// A recorded call with the object name it targeted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub name: String,
}

/// Failure to return from the next call of an operation
#[derive(Debug, Clone)]
enum Injected {
    NotFound,
    Conflict,
    AlreadyExists,
    Api(String),
}

impl Injected {
    fn into_error(self, name: &str) -> StoreError {
        match self {
            Injected::NotFound => StoreError::NotFound(format!("{name} not found")),
            Injected::Conflict => StoreError::Conflict(format!("{name} was modified")),
            Injected::AlreadyExists => StoreError::AlreadyExists(format!("{name} already exists")),
            Injected::Api(message) => StoreError::Api(message),
        }
    }
}

/// Mock object store for testing
#[derive(Clone, Default)]
pub struct MockKubeVirtStore {
    namespace: String,
    data_volumes: Arc<Mutex<HashMap<String, DataVolume>>>,
    virtual_machines: Arc<Mutex<HashMap<String, VirtualMachine>>>,
    calls: Arc<Mutex<Vec<StoreCall>>>,
    failures: Arc<Mutex<HashMap<StoreOp, VecDeque<Injected>>>>,
}

impl std::fmt::Debug for MockKubeVirtStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockKubeVirtStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockKubeVirtStore {
    /// Create an empty mock store for `namespace`
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Next call of `op` fails with not-found
    pub fn fail_next_not_found(&self, op: StoreOp) {
        self.inject(op, Injected::NotFound);
    }

    /// Next call of `op` fails with a concurrent-modification conflict
    pub fn fail_next_conflict(&self, op: StoreOp) {
        self.inject(op, Injected::Conflict);
    }

    /// Next call of `op` fails with already-exists
    pub fn fail_next_already_exists(&self, op: StoreOp) {
        self.inject(op, Injected::AlreadyExists);
    }

    /// Next call of `op` fails with an unexpected API error
    pub fn fail_next(&self, op: StoreOp, message: impl Into<String>) {
        self.inject(op, Injected::Api(message.into()));
    }

    fn inject(&self, op: StoreOp, failure: Injected) {
        lock(&self.failures).entry(op).or_default().push_back(failure);
    }

    fn record(&self, op: StoreOp, name: &str) -> Result<(), StoreError> {
        lock(&self.calls).push(StoreCall {
            op,
            name: name.to_string(),
        });
        match lock(&self.failures).get_mut(&op).and_then(VecDeque::pop_front) {
            Some(failure) => Err(failure.into_error(name)),
            None => Ok(()),
        }
    }

    /// All calls made so far, in order
    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls made for `op`
    pub fn call_count(&self, op: StoreOp) -> usize {
        lock(&self.calls).iter().filter(|c| c.op == op).count()
    }

    /// Forget recorded calls, keeping stored objects
    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Snapshot of a stored DataVolume
    pub fn data_volume(&self, name: &str) -> Option<DataVolume> {
        lock(&self.data_volumes).get(name).cloned()
    }

    /// Number of stored DataVolumes
    pub fn data_volume_count(&self) -> usize {
        lock(&self.data_volumes).len()
    }

    /// Snapshot of a stored VirtualMachine
    pub fn virtual_machine(&self, name: &str) -> Option<VirtualMachine> {
        lock(&self.virtual_machines).get(name).cloned()
    }

    /// Add a VirtualMachine directly (for test setup)
    pub fn insert_virtual_machine(&self, mut vm: VirtualMachine) {
        vm.metadata.namespace = Some(self.namespace.clone());
        let name = vm.metadata.name.clone().unwrap_or_default();
        lock(&self.virtual_machines).insert(name, vm);
    }

    /// Simulate CDI moving a DataVolume to `phase`
    pub fn set_data_volume_phase(&self, name: &str, phase: &str) {
        if let Some(volume) = lock(&self.data_volumes).get_mut(name) {
            volume.status = Some(DataVolumeStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            });
        }
    }

    /// Simulate KubeVirt reporting a VirtualMachine ready (or not)
    pub fn set_virtual_machine_ready(&self, name: &str, ready: bool) {
        if let Some(vm) = lock(&self.virtual_machines).get_mut(name) {
            vm.status = Some(VirtualMachineStatus {
                ready,
                ..Default::default()
            });
        }
    }

    /// Simulate an external actor removing a VirtualMachine
    pub fn remove_virtual_machine(&self, name: &str) {
        lock(&self.virtual_machines).remove(name);
    }
}

#[async_trait::async_trait]
impl KubeVirtStore for MockKubeVirtStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn get_data_volume(&self, name: &str) -> Result<Option<DataVolume>, StoreError> {
        self.record(StoreOp::GetDataVolume, name)?;
        Ok(self.data_volume(name))
    }

    async fn create_data_volume(&self, volume: &DataVolume) -> Result<DataVolume, StoreError> {
        let name = volume.metadata.name.clone().unwrap_or_default();
        self.record(StoreOp::CreateDataVolume, &name)?;

        let mut volumes = lock(&self.data_volumes);
        if volumes.contains_key(&name) {
            return Err(Injected::AlreadyExists.into_error(&name));
        }
        let mut stored = volume.clone();
        stored.metadata.namespace = Some(self.namespace.clone());
        volumes.insert(name, stored.clone());
        Ok(stored)
    }

    async fn get_virtual_machine(&self, name: &str) -> Result<Option<VirtualMachine>, StoreError> {
        self.record(StoreOp::GetVirtualMachine, name)?;
        Ok(self.virtual_machine(name))
    }

    async fn create_virtual_machine(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        let name = vm.metadata.name.clone().unwrap_or_default();
        self.record(StoreOp::CreateVirtualMachine, &name)?;

        let mut vms = lock(&self.virtual_machines);
        if vms.contains_key(&name) {
            return Err(Injected::AlreadyExists.into_error(&name));
        }
        let mut stored = vm.clone();
        stored.metadata.namespace = Some(self.namespace.clone());
        vms.insert(name, stored.clone());
        Ok(stored)
    }

    async fn update_virtual_machine(&self, vm: &VirtualMachine) -> Result<VirtualMachine, StoreError> {
        let name = vm.metadata.name.clone().unwrap_or_default();
        self.record(StoreOp::UpdateVirtualMachine, &name)?;

        let mut vms = lock(&self.virtual_machines);
        let Some(existing) = vms.get_mut(&name) else {
            return Err(Injected::NotFound.into_error(&name));
        };
        // status is a subresource and is not written through a replace
        let status = existing.status.take();
        *existing = vm.clone();
        existing.status = status;
        Ok(existing.clone())
    }

    async fn delete_virtual_machine(&self, name: &str) -> Result<(), StoreError> {
        self.record(StoreOp::DeleteVirtualMachine, name)?;
        match lock(&self.virtual_machines).remove(name) {
            Some(_) => Ok(()),
            None => Err(Injected::NotFound.into_error(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{DataVolumeSpec, VirtualMachineSpec};

    #[tokio::test]
    async fn test_create_twice_reports_already_exists() {
        let store = MockKubeVirtStore::new("default");
        let volume = DataVolume::new("vol", DataVolumeSpec::default());

        store.create_data_volume(&volume).await.unwrap();
        let err = store.create_data_volume(&volume).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.data_volume_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let store = MockKubeVirtStore::new("default");
        store.insert_virtual_machine(VirtualMachine::new("vm", VirtualMachineSpec::default()));
        store.fail_next_conflict(StoreOp::UpdateVirtualMachine);

        let vm = store.virtual_machine("vm").unwrap();
        assert!(store.update_virtual_machine(&vm).await.unwrap_err().is_conflict());
        assert!(store.update_virtual_machine(&vm).await.is_ok());
        assert_eq!(store.call_count(StoreOp::UpdateVirtualMachine), 2);
    }

    #[tokio::test]
    async fn test_update_preserves_status() {
        let store = MockKubeVirtStore::new("default");
        store.insert_virtual_machine(VirtualMachine::new("vm", VirtualMachineSpec::default()));
        store.set_virtual_machine_ready("vm", true);

        let mut vm = VirtualMachine::new("vm", VirtualMachineSpec::default());
        vm.spec.running = Some(true);
        store.update_virtual_machine(&vm).await.unwrap();

        let stored = store.virtual_machine("vm").unwrap();
        assert!(stored.is_ready());
        assert_eq!(stored.spec.running, Some(true));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = MockKubeVirtStore::new("default");
        let err = store.delete_virtual_machine("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
