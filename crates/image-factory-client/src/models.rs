//! Image Factory API models

use serde::{Deserialize, Serialize};

/// Body of `POST /schematics`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchematicRequest {
    pub customization: Customization,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Customization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_kernel_args: Vec<String>,
}

impl SchematicRequest {
    /// Schematic that only adds kernel arguments
    pub fn with_kernel_args(extra_kernel_args: Vec<String>) -> Self {
        Self {
            customization: Customization { extra_kernel_args },
        }
    }
}

/// Response of `POST /schematics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchematicResponse {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let request = SchematicRequest::with_kernel_args(vec!["console=ttyS0,38400n8".to_string()]);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"customization": {"extraKernelArgs": ["console=ttyS0,38400n8"]}})
        );
    }

    #[test]
    fn test_empty_customization_omits_kernel_args() {
        let json = serde_json::to_value(SchematicRequest::default()).unwrap();
        assert_eq!(json, serde_json::json!({"customization": {}}));
    }
}
