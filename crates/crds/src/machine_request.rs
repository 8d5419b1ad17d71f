//! MachineRequest CRD
//!
//! A request from the fleet-management control plane for one provisioned
//! KubeVirt machine. The spec is written by the control-plane adapter; the
//! status is owned exclusively by the provider and carries the persisted
//! provisioning state between reconciliation ticks.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label that routes a request to a specific provider instance.
pub const PROVIDER_ID_LABEL: &str = "kubevirt.microscaler.io/provider";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "kubevirt.microscaler.io",
    version = "v1alpha1",
    kind = "MachineRequest",
    namespaced,
    status = "MachineRequestStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Step","type":"string","jsonPath":".status.step"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineRequestSpec {
    /// Declared Talos version (e.g. "v1.9.0")
    pub talos_version: String,

    /// Provider configuration data (YAML or JSON document)
    #[serde(default)]
    pub provider_data: String,

    /// Join configuration handed to the machine as cloud-init user data
    #[serde(default)]
    pub join_config: String,

    /// Connection kernel arguments issued by the control plane
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel_args: Vec<String>,
}

/// Provisioning state persisted between pipeline runs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestState {
    /// Image Factory schematic ID. Set once, never recomputed.
    #[serde(default)]
    pub schematic: String,

    /// Talos version the boot volume was resolved for
    #[serde(default)]
    pub talos_version: String,

    /// SHA-256 of the resolved boot image URL, names the shared boot volume
    #[serde(default)]
    pub volume_id: String,

    /// Firmware UUID of the virtual machine. Generated once.
    #[serde(default)]
    pub instance_uuid: String,
}

/// Coarse lifecycle phase of a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum MachinePhase {
    /// Not reconciled yet
    #[default]
    Pending,

    /// Pipeline is running
    Provisioning,

    /// Virtual machine reports ready
    Ready,

    /// Last pipeline run failed
    Failed,

    /// Virtual machine is being torn down
    Deprovisioning,
}

/// A provider-wide config patch rendered for one request.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatchStatus {
    /// Patch name, `<prefix>-<request id>`
    pub name: String,

    /// Raw patch document
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineRequestStatus {
    /// Persisted provisioning state
    #[serde(default)]
    pub state: RequestState,

    /// First unfinished pipeline step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,

    /// Lifecycle phase
    #[serde(default)]
    pub phase: MachinePhase,

    /// Error message of the last failed run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Spec generation the pipeline last ran against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Config patches that apply to this machine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_patches: Vec<ConfigPatchStatus>,

    /// Last phase transition timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}
