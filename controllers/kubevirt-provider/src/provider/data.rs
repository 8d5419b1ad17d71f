//! Per-request provider data
//!
//! The control plane hands every request an opaque YAML (or JSON) document
//! describing the machine shape. Unknown keys are ignored, missing keys fall
//! back to their defaults.

use crate::provider::error::ProviderError;
use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Network binding plugin that replaces the default bridge interface.
pub const PASST_BINDING: &str = "passt";

/// Machine shape requested by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderData {
    /// CPU architecture, e.g. `amd64` or `arm64`
    pub architecture: String,
    /// `passt` selects the passt binding, anything else the bridge interface
    pub network_binding: String,
    /// Storage class for both the boot volume and the machine disk
    pub storage_class_name: String,
    pub cores: u32,
    /// Root disk size in GiB
    pub disk_size: u32,
    /// Memory in MiB
    pub memory: u64,
    /// JSON encoded list of Kubernetes tolerations
    pub tolerations: String,
    /// Extra labels for the virtual machine instance
    pub vm_labels: BTreeMap<String, String>,
}

impl Default for ProviderData {
    fn default() -> Self {
        Self {
            architecture: "amd64".to_string(),
            network_binding: String::new(),
            storage_class_name: String::new(),
            cores: 0,
            disk_size: 0,
            memory: 0,
            tolerations: String::new(),
            vm_labels: BTreeMap::new(),
        }
    }
}

impl ProviderData {
    /// Parse a provider data document. An empty document yields the defaults.
    pub fn parse(raw: &str) -> Result<Self, ProviderError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn uses_passt(&self) -> bool {
        self.network_binding == PASST_BINDING
    }

    /// Memory request as a plain byte count.
    pub fn memory_quantity(&self) -> Quantity {
        Quantity(self.memory.saturating_mul(1024 * 1024).to_string())
    }

    pub fn disk_quantity(&self) -> Quantity {
        Quantity(format!("{}Gi", self.disk_size))
    }

    pub fn storage_class(&self) -> Option<String> {
        (!self.storage_class_name.is_empty()).then(|| self.storage_class_name.clone())
    }

    /// Decode the toleration list. `None` when no tolerations were given.
    pub fn parse_tolerations(&self) -> Result<Option<Vec<Toleration>>, ProviderError> {
        if self.tolerations.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&self.tolerations)
            .map(Some)
            .map_err(ProviderError::InvalidTolerations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_document() {
        let data = ProviderData::parse(
            "architecture: arm64\ncores: 4\nmemory: 4096\ndisk_size: 20\nnetwork_binding: passt\nvm_labels:\n  team: infra\n",
        )
        .unwrap();
        assert_eq!(data.architecture, "arm64");
        assert_eq!(data.cores, 4);
        assert!(data.uses_passt());
        assert_eq!(data.vm_labels.get("team").map(String::as_str), Some("infra"));
    }

    #[test]
    fn test_parse_json_document() {
        let data = ProviderData::parse(r#"{"cores": 2, "memory": 2048, "storage_class_name": "fast"}"#).unwrap();
        assert_eq!(data.cores, 2);
        assert_eq!(data.storage_class(), Some("fast".to_string()));
        assert_eq!(data.architecture, "amd64");
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        assert_eq!(ProviderData::parse("  \n").unwrap(), ProviderData::default());
    }

    #[test]
    fn test_malformed_document_is_rejected() {
        let err = ProviderData::parse("cores: [not, a, number]").unwrap_err();
        assert!(matches!(err, ProviderError::InvalidProviderData(_)));
    }

    #[test]
    fn test_quantities() {
        let data = ProviderData {
            memory: 2048,
            disk_size: 10,
            ..Default::default()
        };
        assert_eq!(data.memory_quantity(), Quantity("2147483648".to_string()));
        assert_eq!(data.disk_quantity(), Quantity("10Gi".to_string()));
        assert_eq!(data.storage_class(), None);
    }

    #[test]
    fn test_tolerations() {
        let mut data = ProviderData::default();
        assert!(data.parse_tolerations().unwrap().is_none());

        data.tolerations = r#"[{"key": "dedicated", "operator": "Equal", "value": "vm", "effect": "NoSchedule"}]"#.to_string();
        let tolerations = data.parse_tolerations().unwrap().unwrap();
        assert_eq!(tolerations.len(), 1);
        assert_eq!(tolerations[0].key.as_deref(), Some("dedicated"));

        data.tolerations = "not json".to_string();
        assert!(matches!(data.parse_tolerations(), Err(ProviderError::InvalidTolerations(_))));
    }
}
