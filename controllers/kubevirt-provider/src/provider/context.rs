//! Per-request provisioning context
//!
//! Everything a step may read about the request it is working on: identity,
//! declared Talos version, provider data, connection parameters and the
//! ability to register schematics.

use crate::provider::data::ProviderData;
use crate::provider::error::ProviderError;
use image_factory_client::{SchematicGenerator, SchematicRequest};
use tracing::debug;

/// Connection parameters issued by the control plane for one machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Join configuration, delivered as cloud-init user data
    pub join_config: String,
    /// Kernel arguments that point the machine at the control plane
    pub kernel_args: Vec<String>,
}

/// Options for generating a schematic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchematicOptions {
    /// Kernel arguments added to the schematic
    pub extra_kernel_args: Vec<String>,
    /// Append the request's connection kernel arguments
    pub include_connection_params: bool,
}

impl Default for SchematicOptions {
    fn default() -> Self {
        Self {
            extra_kernel_args: Vec::new(),
            include_connection_params: true,
        }
    }
}

impl SchematicOptions {
    /// Add kernel arguments to the schematic.
    pub fn with_extra_kernel_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_kernel_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Keep connection kernel arguments out of the image.
    pub fn without_connection_params(mut self) -> Self {
        self.include_connection_params = false;
        self
    }
}

/// Read-only view of one machine request.
pub struct ProvisionContext<'a> {
    request_id: String,
    talos_version: String,
    provider_data: String,
    connection: ConnectionParams,
    schematics: &'a dyn SchematicGenerator,
}

impl std::fmt::Debug for ProvisionContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionContext")
            .field("request_id", &self.request_id)
            .field("talos_version", &self.talos_version)
            .finish_non_exhaustive()
    }
}

impl<'a> ProvisionContext<'a> {
    /// Context for the request identified by `request_id`.
    pub fn new(
        request_id: impl Into<String>,
        talos_version: impl Into<String>,
        provider_data: impl Into<String>,
        connection: ConnectionParams,
        schematics: &'a dyn SchematicGenerator,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            talos_version: talos_version.into(),
            provider_data: provider_data.into(),
            connection,
            schematics,
        }
    }

    /// Unique request ID; names the machine and its disk.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Talos version to boot.
    pub fn talos_version(&self) -> &str {
        &self.talos_version
    }

    /// How the machine reaches the control plane.
    pub fn connection(&self) -> &ConnectionParams {
        &self.connection
    }

    /// Decode the provider data document.
    pub fn provider_data(&self) -> Result<ProviderData, ProviderError> {
        ProviderData::parse(&self.provider_data)
    }

    /// Register a schematic for this request and return its ID.
    pub async fn generate_schematic_id(&self, options: &SchematicOptions) -> Result<String, ProviderError> {
        let mut kernel_args = options.extra_kernel_args.clone();
        if options.include_connection_params {
            kernel_args.extend(self.connection.kernel_args.iter().cloned());
        }
        debug!(request_id = %self.request_id, ?kernel_args, "generating schematic");

        let request = SchematicRequest::with_kernel_args(kernel_args);
        Ok(self.schematics.generate_schematic(&request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FakeSchematics;

    fn context(schematics: &FakeSchematics) -> ProvisionContext<'_> {
        ProvisionContext::new(
            "req-1",
            "v1.9.0",
            "",
            ConnectionParams {
                join_config: "join".to_string(),
                kernel_args: vec!["siderolink.api=grpc://omni:8090".to_string()],
            },
            schematics,
        )
    }

    #[tokio::test]
    async fn test_connection_params_are_appended_by_default() {
        let schematics = FakeSchematics::new("abc");
        let ctx = context(&schematics);

        let options = SchematicOptions::default().with_extra_kernel_args(["console=ttyS0"]);
        assert_eq!(ctx.generate_schematic_id(&options).await.unwrap(), "abc");
        assert_eq!(
            schematics.last_kernel_args(),
            Some(vec!["console=ttyS0".to_string(), "siderolink.api=grpc://omni:8090".to_string()])
        );
    }

    #[tokio::test]
    async fn test_connection_params_can_be_suppressed() {
        let schematics = FakeSchematics::new("abc");
        let ctx = context(&schematics);

        let options = SchematicOptions::default()
            .with_extra_kernel_args(["console=ttyS0"])
            .without_connection_params();
        ctx.generate_schematic_id(&options).await.unwrap();
        assert_eq!(schematics.last_kernel_args(), Some(vec!["console=ttyS0".to_string()]));
    }
}
