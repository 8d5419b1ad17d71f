//! Object store errors

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when talking to the cluster object store.
///
/// `NotFound`, `Conflict` and `AlreadyExists` are separated out so callers can
/// decide which of them are transient for the operation they issued.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed (stale resourceVersion)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Object with the same name already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Call did not finish in time
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Object store rejected the request
    #[error("Object store error: {0}")]
    Api(String),

    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(kube::Error),
}

impl StoreError {
    /// Object did not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Write lost an optimistic concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// Create hit an existing object.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        if let kube::Error::Api(response) = &err {
            match response.code {
                404 => return StoreError::NotFound(response.message.clone()),
                409 if response.reason == "AlreadyExists" => {
                    return StoreError::AlreadyExists(response.message.clone());
                }
                409 => return StoreError::Conflict(response.message.clone()),
                _ => {}
            }
        }
        StoreError::Kube(err)
    }
}
