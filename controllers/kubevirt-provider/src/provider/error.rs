//! Provisioning errors

use image_factory_client::ImageFactoryError;
use kubevirt_client::StoreError;
use thiserror::Error;

/// Errors a provisioning step or the deprovisioner can fail with.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Request ID can not be used as a KubeVirt object name
    #[error("the machine request name can not be longer than {max} characters: {request_id:?} has {len}")]
    RequestIdTooLong {
        request_id: String,
        len: usize,
        max: usize,
    },

    /// Provider data did not deserialize
    #[error("Invalid provider data: {0}")]
    InvalidProviderData(#[from] serde_yaml::Error),

    /// Tolerations in provider data are not a JSON toleration list
    #[error("Invalid tolerations: {0}")]
    InvalidTolerations(#[source] serde_json::Error),

    /// Unexpected object store failure
    #[error("Object store error: {0}")]
    Store(#[from] StoreError),

    /// Schematic generation failed
    #[error("Schematic generation failed: {0}")]
    Schematic(#[from] ImageFactoryError),
}

impl ProviderError {
    /// Retrying can never succeed without the request itself changing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProviderError::RequestIdTooLong { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_request_id_violation_is_terminal() {
        let too_long = ProviderError::RequestIdTooLong {
            request_id: "x".repeat(63),
            len: 63,
            max: 62,
        };
        assert!(too_long.is_terminal());
        assert!(!ProviderError::Store(StoreError::Api("boom".to_string())).is_terminal());
    }
}
