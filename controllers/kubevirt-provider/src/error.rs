//! Controller-specific error types.
//!
//! Errors of the `MachineRequest` driver. Step failures of the provisioning
//! pipeline are recorded in the request status and never surface here;
//! deprovisioning failures do, because they keep the finalizer in place.

use crate::provider::ProviderError;
use image_factory_client::ImageFactoryError;
use kube::Error as KubeError;
use kube_runtime::finalizer;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur in the KubeVirt provider controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Deprovisioning failed
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Machine deletion is still in progress, check again after the delay
    #[error("Deprovisioning in progress, retry after {0:?}")]
    DeprovisionPending(Duration),

    /// Finalizer handling failed
    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<finalizer::Error<ControllerError>>),

    /// Image Factory client could not be built
    #[error("Image Factory error: {0}")]
    ImageFactory(#[from] ImageFactoryError),

    /// Status could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// IO error (probe listener)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Requeue delay for errors that only signal "not finished yet".
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            ControllerError::DeprovisionPending(delay) => Some(*delay),
            ControllerError::Finalizer(inner) => match inner.as_ref() {
                finalizer::Error::ApplyFailed(err) | finalizer::Error::CleanupFailed(err) => err.requeue_after(),
                _ => None,
            },
            _ => None,
        }
    }
}
