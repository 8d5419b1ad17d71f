//! Machine teardown.
//!
//! Deletes the VirtualMachine of a request. Its per-machine disk goes with it
//! (owned DataVolume template); the shared boot volume is kept for other
//! machines using the same image.

use crate::provider::error::ProviderError;
use crate::provider::{Provisioner, StepOutcome, DEPROVISION_RETRY_INTERVAL};
use tracing::{debug, info};

impl Provisioner {
    /// Remove the machine of `request_id`.
    ///
    /// Returns `Done` once the VirtualMachine is gone, `RetryAfter` while a
    /// delete is in flight.
    pub async fn deprovision(&self, request_id: &str) -> Result<StepOutcome, ProviderError> {
        if self.store.get_virtual_machine(request_id).await?.is_none() {
            info!(request_id, "machine deprovisioned");
            return Ok(StepOutcome::Done);
        }

        match self.store.delete_virtual_machine(request_id).await {
            Ok(()) => info!(request_id, "machine delete requested"),
            Err(e) if e.is_not_found() => debug!(request_id, "machine already gone"),
            Err(e) => return Err(e.into()),
        }

        Ok(StepOutcome::RetryAfter(DEPROVISION_RETRY_INTERVAL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;
    use crds::{VirtualMachine, VirtualMachineSpec};
    use kubevirt_client::StoreOp;

    #[tokio::test]
    async fn test_absent_machine_is_done_without_delete() {
        let env = TestEnv::new();

        let outcome = env.provisioner.deprovision("req-1").await.unwrap();
        assert_eq!(outcome, StepOutcome::Done);
        assert_eq!(env.store.call_count(StoreOp::DeleteVirtualMachine), 0);
    }

    #[tokio::test]
    async fn test_present_machine_is_deleted_then_done() {
        let env = TestEnv::new();
        env.store
            .insert_virtual_machine(VirtualMachine::new("req-1", VirtualMachineSpec::default()));

        let outcome = env.provisioner.deprovision("req-1").await.unwrap();
        assert_eq!(outcome, StepOutcome::RetryAfter(DEPROVISION_RETRY_INTERVAL));
        assert_eq!(env.store.call_count(StoreOp::DeleteVirtualMachine), 1);

        let outcome = env.provisioner.deprovision("req-1").await.unwrap();
        assert_eq!(outcome, StepOutcome::Done);
    }

    #[tokio::test]
    async fn test_delete_race_is_tolerated() {
        let env = TestEnv::new();
        env.store
            .insert_virtual_machine(VirtualMachine::new("req-1", VirtualMachineSpec::default()));
        env.store.fail_next_not_found(StoreOp::DeleteVirtualMachine);

        let outcome = env.provisioner.deprovision("req-1").await.unwrap();
        assert_eq!(outcome, StepOutcome::RetryAfter(DEPROVISION_RETRY_INTERVAL));
    }

    #[tokio::test]
    async fn test_boot_volume_is_kept() {
        let env = TestEnv::new();
        let ctx = env.context("req-1", crate::test_utils::AMD64_PROVIDER_DATA);
        let mut state = crds::RequestState::default();
        env.provisioner.provision(&ctx, &mut state, None).await.unwrap();
        env.store.set_data_volume_phase(&state.volume_id, crds::DATA_VOLUME_SUCCEEDED);
        env.provisioner
            .provision(&ctx, &mut state, Some("ensureVolume"))
            .await
            .unwrap();

        while env.provisioner.deprovision("req-1").await.unwrap() != StepOutcome::Done {}

        assert!(env.store.virtual_machine("req-1").is_none());
        assert!(env.store.data_volume(&state.volume_id).is_some());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_fatal() {
        let env = TestEnv::new();
        env.store.fail_next(StoreOp::GetVirtualMachine, "forbidden");

        let err = env.provisioner.deprovision("req-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::Store(_)));
    }
}
