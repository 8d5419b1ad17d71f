//! Machine provisioning core.
//!
//! A machine request is provisioned by an ordered list of idempotent steps:
//! - `validateRequest`: request ID fits into a KubeVirt object name
//! - `createSchematic`: register the boot image customization once
//! - `ensureVolume`: shared, content-addressed boot volume exists and is ready
//! - `syncMachine`: the VirtualMachine exists, is configured and ready
//!
//! Each step reads and mutates the persisted [`RequestState`] and returns
//! either [`StepOutcome::Done`] or [`StepOutcome::RetryAfter`]. Nothing
//! sleeps in-process; the caller re-invokes the pipeline later, resuming at
//! the first unfinished step.

pub mod context;
pub mod data;
pub mod deprovision;
pub mod error;
pub mod machine;
pub mod volume;

pub use context::{ConnectionParams, ProvisionContext, SchematicOptions};
pub use error::ProviderError;

use crds::RequestState;
use kubevirt_client::KubeVirtStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Longest request ID that still leaves room for KubeVirt generated names.
pub const MAX_REQUEST_ID_LEN: usize = 62;

/// Retry interval while waiting on volumes or machines.
pub const PROVISION_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Retry interval while waiting for a machine to go away.
pub const DEPROVISION_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Kernel argument baked into every schematic.
pub const SERIAL_CONSOLE_KERNEL_ARG: &str = "console=ttyS0,38400n8";

/// Result of a step that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Step is complete, continue with the next one
    Done,
    /// Step is waiting on something external, call again after the delay
    RetryAfter(Duration),
}

/// Provisioning steps in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProvisionStep {
    /// Reject request IDs that cannot name a machine
    ValidateRequest,
    /// Resolve the boot image schematic
    CreateSchematic,
    /// Import the shared boot volume
    EnsureVolume,
    /// Create or update the VirtualMachine
    SyncMachine,
}

impl ProvisionStep {
    /// All steps, in the order they run.
    pub const ALL: [ProvisionStep; 4] = [
        ProvisionStep::ValidateRequest,
        ProvisionStep::CreateSchematic,
        ProvisionStep::EnsureVolume,
        ProvisionStep::SyncMachine,
    ];

    /// Name persisted as the step cursor.
    pub fn name(self) -> &'static str {
        match self {
            ProvisionStep::ValidateRequest => "validateRequest",
            ProvisionStep::CreateSchematic => "createSchematic",
            ProvisionStep::EnsureVolume => "ensureVolume",
            ProvisionStep::SyncMachine => "syncMachine",
        }
    }

    /// Step with the given cursor name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.name() == name)
    }
}

impl std::fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Provider-wide settings shared by every request.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// Image Factory base URL the boot images are downloaded from
    pub image_factory_url: String,
    /// Volume mode for created claims, cluster default when unset
    pub volume_mode: Option<volume::VolumeMode>,
    /// Provider instance ID, stamped onto created machines
    pub provider_id: String,
}

/// Where a pipeline run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionReport {
    /// Every step reported `Done`
    Ready,
    /// `step` asked to be called again after `retry_after`
    Pending {
        step: ProvisionStep,
        retry_after: Duration,
    },
}

/// A step failed; the pipeline stopped there.
#[derive(Debug, Error)]
#[error("step {step} failed: {error}")]
pub struct StepFailure {
    pub step: ProvisionStep,
    #[source]
    pub error: ProviderError,
}

/// Runs provisioning steps and deprovisioning against one object store.
pub struct Provisioner {
    pub(crate) store: Arc<dyn KubeVirtStore>,
    pub(crate) config: ProvisionerConfig,
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("namespace", &self.store.namespace())
            .field("config", &self.config)
            .finish()
    }
}

impl Provisioner {
    /// Creates a provisioner over `store`.
    pub fn new(store: Arc<dyn KubeVirtStore>, config: ProvisionerConfig) -> Self {
        Self { store, config }
    }

    /// Namespace holding machines and boot volumes.
    pub fn namespace(&self) -> &str {
        self.store.namespace()
    }

    /// Run a single step.
    pub async fn run_step(
        &self,
        step: ProvisionStep,
        ctx: &ProvisionContext<'_>,
        state: &mut RequestState,
    ) -> Result<StepOutcome, ProviderError> {
        match step {
            ProvisionStep::ValidateRequest => validate_request(ctx),
            ProvisionStep::CreateSchematic => create_schematic(ctx, state).await,
            ProvisionStep::EnsureVolume => self.ensure_volume(ctx, state).await,
            ProvisionStep::SyncMachine => self.sync_machine(ctx, state).await,
        }
    }

    /// Run the pipeline starting at `resume_from` (the first step when unset
    /// or unknown) until a step is pending, fails, or all steps are done.
    ///
    /// `state` keeps every mutation made before a failure, so the caller can
    /// persist partial progress.
    pub async fn provision(
        &self,
        ctx: &ProvisionContext<'_>,
        state: &mut RequestState,
        resume_from: Option<&str>,
    ) -> Result<ProvisionReport, StepFailure> {
        let start = match resume_from {
            None => 0,
            Some(name) => match ProvisionStep::from_name(name) {
                Some(step) => ProvisionStep::ALL.iter().position(|s| *s == step).unwrap_or(0),
                None => {
                    warn!(request_id = %ctx.request_id(), step = name, "unknown step cursor, starting over");
                    0
                }
            },
        };

        for step in &ProvisionStep::ALL[start..] {
            debug!(request_id = %ctx.request_id(), %step, "running step");
            match self.run_step(*step, ctx, state).await {
                Ok(StepOutcome::Done) => continue,
                Ok(StepOutcome::RetryAfter(retry_after)) => {
                    debug!(request_id = %ctx.request_id(), %step, ?retry_after, "step pending");
                    return Ok(ProvisionReport::Pending {
                        step: *step,
                        retry_after,
                    });
                }
                Err(error) => return Err(StepFailure { step: *step, error }),
            }
        }

        info!(request_id = %ctx.request_id(), "machine provisioned");
        Ok(ProvisionReport::Ready)
    }
}

fn validate_request(ctx: &ProvisionContext<'_>) -> Result<StepOutcome, ProviderError> {
    let len = ctx.request_id().len();
    if len > MAX_REQUEST_ID_LEN {
        return Err(ProviderError::RequestIdTooLong {
            request_id: ctx.request_id().to_string(),
            len,
            max: MAX_REQUEST_ID_LEN,
        });
    }
    Ok(StepOutcome::Done)
}

async fn create_schematic(
    ctx: &ProvisionContext<'_>,
    state: &mut RequestState,
) -> Result<StepOutcome, ProviderError> {
    if !state.schematic.is_empty() {
        return Ok(StepOutcome::Done);
    }

    // connection params stay out of the image, they reach the machine through the join config
    let options = SchematicOptions::default()
        .with_extra_kernel_args([SERIAL_CONSOLE_KERNEL_ARG])
        .without_connection_params();
    state.schematic = ctx.generate_schematic_id(&options).await?;
    info!(request_id = %ctx.request_id(), schematic = %state.schematic, "schematic created");

    Ok(StepOutcome::Done)
}
