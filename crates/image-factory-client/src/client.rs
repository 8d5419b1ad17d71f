//! Image Factory API client
//!
//! Implements schematic registration against `POST /schematics`.

use crate::error::ImageFactoryError;
use crate::generator::SchematicGenerator;
use crate::models::{SchematicRequest, SchematicResponse};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Public Sidero Labs Image Factory
pub const DEFAULT_IMAGE_FACTORY_URL: &str = "https://factory.talos.dev";

/// Image Factory API client
#[derive(Debug, Clone)]
pub struct ImageFactoryClient {
    client: Client,
    base_url: String,
}

impl ImageFactoryClient {
    /// Create a new Image Factory client
    ///
    /// # Arguments
    /// * `base_url` - Image Factory base URL (e.g., "https://factory.talos.dev")
    /// * `insecure_skip_verify` - Accept untrusted TLS certificates
    pub fn new(base_url: String, insecure_skip_verify: bool) -> Result<Self, ImageFactoryError> {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ImageFactoryError::InvalidRequest(format!(
                "Image Factory URL must be http(s): {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(insecure_skip_verify)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait::async_trait]
impl SchematicGenerator for ImageFactoryClient {
    async fn generate_schematic(&self, request: &SchematicRequest) -> Result<String, ImageFactoryError> {
        let url = format!("{}/schematics", self.base_url);
        debug!("POST {}", url);

        let response = self.client
            .post(&url)
            .header("Accept", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ImageFactoryError::Api(format!(
                "POST /schematics failed: {status} - {body}"
            )));
        }

        let schematic: SchematicResponse = serde_json::from_str(&body)?;
        debug!("Generated schematic {}", schematic.id);
        Ok(schematic.id)
    }
}
