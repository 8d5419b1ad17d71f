//! SchematicGenerator trait for mocking

use crate::error::ImageFactoryError;
use crate::models::SchematicRequest;

/// Turns a boot image customization into a schematic ID.
///
/// The same request always yields the same ID, so callers may retry freely.
#[async_trait::async_trait]
pub trait SchematicGenerator: Send + Sync {
    async fn generate_schematic(&self, request: &SchematicRequest) -> Result<String, ImageFactoryError>;
}
