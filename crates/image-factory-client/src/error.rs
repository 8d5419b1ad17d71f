//! Image Factory client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Image Factory API
#[derive(Debug, Error)]
pub enum ImageFactoryError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Image Factory returned an error
    #[error("Image Factory API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request (e.g., malformed base URL)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
