//! Reconciliation logic for MachineRequest resources.
//!
//! Apply runs the provisioning pipeline from the persisted step cursor and
//! writes the new request state back to the status subresource after every
//! run, failed runs included. Cleanup runs the deprovisioner until the
//! VirtualMachine is gone.

use crate::backoff::RequestBackoffs;
use crate::config::ConfigPatch;
use crate::error::ControllerError;
use crate::provider::{
    ConnectionParams, ProvisionContext, ProvisionReport, Provisioner, StepOutcome,
};
use chrono::Utc;
use crds::{MachinePhase, MachineRequest, MachineRequestStatus};
use image_factory_client::SchematicGenerator;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Finalizer that keeps a request around until its machine is deleted.
pub const DEPROVISION_FINALIZER: &str = "kubevirt.microscaler.io/deprovision";

/// When to look at a request again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    After(Duration),
    AwaitChange,
}

impl From<Requeue> for Action {
    fn from(requeue: Requeue) -> Self {
        match requeue {
            Requeue::After(delay) => Action::requeue(delay),
            Requeue::AwaitChange => Action::await_change(),
        }
    }
}

/// Provider-side ID of a request: `namespace.name`.
///
/// Requests from every watched namespace share one machine namespace, so the
/// request name alone is not unique. Namespaces cannot contain dots, which
/// keeps the mapping one-to-one. The ID names the machine, its disk and its
/// config patches, and keys the per-request backoff.
pub fn request_id(request: &MachineRequest) -> String {
    format!(
        "{}.{}",
        request.namespace().unwrap_or_default(),
        request.name_any()
    )
}

/// Reconciles MachineRequest resources.
pub struct Reconciler {
    pub(crate) provisioner: Provisioner,
    schematics: Arc<dyn SchematicGenerator>,
    config_patches: Vec<ConfigPatch>,
    backoffs: RequestBackoffs,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("provisioner", &self.provisioner)
            .field("config_patches", &self.config_patches)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        provisioner: Provisioner,
        schematics: Arc<dyn SchematicGenerator>,
        config_patches: Vec<ConfigPatch>,
    ) -> Self {
        Self {
            provisioner,
            schematics,
            config_patches,
            backoffs: RequestBackoffs::default(),
        }
    }

    /// Delay before retrying a request whose reconciliation errored.
    pub fn backoff_delay(&self, key: &str) -> Duration {
        self.backoffs.next_delay(key)
    }

    /// Run the provisioning pipeline for `request` and compute its next status.
    ///
    /// A request that is `Ready` for its current generation is not touched
    /// again. A spec change restarts the pipeline at its first step.
    pub async fn provision_request(&self, request: &MachineRequest) -> (MachineRequestStatus, Requeue) {
        let request_id = request_id(request);
        let key = request_id.as_str();
        let previous = request.status.clone().unwrap_or_default();
        let generation = request.metadata.generation;
        let spec_changed = previous.observed_generation != generation;

        if !spec_changed && previous.phase == MachinePhase::Ready {
            debug!(request_id = %request_id, "machine ready, nothing to do");
            return (previous, Requeue::AwaitChange);
        }

        let resume_from = if spec_changed { None } else { previous.step.clone() };
        let ctx = ProvisionContext::new(
            request_id.as_str(),
            request.spec.talos_version.as_str(),
            request.spec.provider_data.as_str(),
            ConnectionParams {
                join_config: request.spec.join_config.clone(),
                kernel_args: request.spec.kernel_args.clone(),
            },
            self.schematics.as_ref(),
        );

        let mut status = previous.clone();
        let result = self
            .provisioner
            .provision(&ctx, &mut status.state, resume_from.as_deref())
            .await;

        status.observed_generation = generation;
        status.config_patches = self
            .config_patches
            .iter()
            .map(|patch| patch.for_request(&request_id))
            .collect();

        let requeue = match result {
            Ok(ProvisionReport::Ready) => {
                self.backoffs.reset(key);
                status.phase = MachinePhase::Ready;
                status.step = None;
                status.error = None;
                Requeue::AwaitChange
            }
            Ok(ProvisionReport::Pending { step, retry_after }) => {
                self.backoffs.reset(key);
                status.phase = MachinePhase::Provisioning;
                status.step = Some(step.name().to_string());
                status.error = None;
                Requeue::After(retry_after)
            }
            Err(failure) => {
                status.phase = MachinePhase::Failed;
                status.step = Some(failure.step.name().to_string());
                status.error = Some(failure.error.to_string());
                if failure.error.is_terminal() {
                    warn!(request_id = %request_id, step = %failure.step, "provisioning failed permanently: {}", failure.error);
                    Requeue::AwaitChange
                } else {
                    let delay = self.backoffs.next_delay(key);
                    warn!(request_id = %request_id, step = %failure.step, ?delay, "provisioning failed: {}", failure.error);
                    Requeue::After(delay)
                }
            }
        };

        if status.phase != previous.phase {
            status.last_reconciled = Some(Utc::now());
        }
        (status, requeue)
    }

    /// Finalizer apply: provision and persist the outcome.
    pub async fn apply(&self, api: &Api<MachineRequest>, request: &MachineRequest) -> Result<Action, ControllerError> {
        let name = request.name_any();
        let (status, requeue) = self.provision_request(request).await;

        if request.status.as_ref() == Some(&status) {
            debug!(request_id = %name, "status unchanged");
        } else {
            patch_status(api, &name, &status).await?;
        }
        Ok(requeue.into())
    }

    /// Finalizer cleanup: succeeds only once the machine is gone.
    pub async fn cleanup(&self, api: &Api<MachineRequest>, request: &MachineRequest) -> Result<Action, ControllerError> {
        let name = request.name_any();
        let request_id = request_id(request);

        match self.provisioner.deprovision(&request_id).await? {
            StepOutcome::Done => {
                self.backoffs.forget(&request_id);
                info!(request_id = %request_id, "releasing machine request");
                Ok(Action::await_change())
            }
            StepOutcome::RetryAfter(delay) => {
                let mut status = request.status.clone().unwrap_or_default();
                if status.phase != MachinePhase::Deprovisioning {
                    status.phase = MachinePhase::Deprovisioning;
                    status.step = None;
                    status.error = None;
                    status.last_reconciled = Some(Utc::now());
                    patch_status(api, &name, &status).await?;
                }
                Err(ControllerError::DeprovisionPending(delay))
            }
        }
    }
}

/// Status merge patch for `status`.
///
/// Merge patches only touch the keys they carry, so cleared optional fields
/// are sent as explicit nulls.
pub(crate) fn status_patch(status: &MachineRequestStatus) -> Result<serde_json::Value, serde_json::Error> {
    let mut value = serde_json::to_value(status)?;
    if let Some(fields) = value.as_object_mut() {
        for key in ["step", "error"] {
            fields.entry(key).or_insert(serde_json::Value::Null);
        }
        fields
            .entry("configPatches")
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
    }
    Ok(serde_json::json!({ "status": value }))
}

async fn patch_status(
    api: &Api<MachineRequest>,
    name: &str,
    status: &MachineRequestStatus,
) -> Result<(), ControllerError> {
    let patch = status_patch(status)?;
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    debug!(request_id = name, phase = ?status.phase, step = ?status.step, "status patched");
    Ok(())
}
