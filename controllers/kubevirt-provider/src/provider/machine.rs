//! Virtual machine synchronisation.
//!
//! The VirtualMachine is named after the request ID. Its boot disk is a
//! per-machine DataVolume cloned from the shared boot volume; the join
//! config reaches the guest as NoCloud user data.

use crate::provider::context::ProvisionContext;
use crate::provider::data::{ProviderData, PASST_BINDING};
use crate::provider::error::ProviderError;
use crate::provider::volume::{claim_spec, VolumeMode};
use crate::provider::{Provisioner, StepOutcome, PROVISION_RETRY_INTERVAL};
use crds::{
    CloudInitNoCloudSource, Cpu, DataVolumeRef, DataVolumeSource, DataVolumeSourcePvc, DataVolumeSpec,
    DataVolumeTemplateSpec, Devices, Disk, DiskTarget, Firmware, Interface, InterfaceBridge, Network,
    PluginBinding, PodNetwork, RequestState, VirtualMachine, VirtualMachineSpec, Volume, DISK_BUS_VIRTIO,
    PROVIDER_ID_LABEL,
};
use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

const BOOT_DISK: &str = "kv";
const CLOUD_INIT_DISK: &str = "cloudinitdisk";
const DEFAULT_NETWORK: &str = "default";
const NETWORK_DATA: &str = "version: 1";

/// Inputs that shape the desired VirtualMachine.
#[derive(Debug)]
pub(crate) struct MachineInput<'a> {
    pub request_id: &'a str,
    pub namespace: &'a str,
    pub provider_id: &'a str,
    pub state: &'a RequestState,
    pub join_config: &'a str,
    pub data: &'a ProviderData,
    pub tolerations: Option<Vec<Toleration>>,
    pub volume_mode: Option<VolumeMode>,
}

/// Write the desired configuration into `vm`.
///
/// Sections the provider owns are replaced; everything else the VM already
/// carries (unknown fields, labels, other tolerations when none are given)
/// is left alone.
pub(crate) fn apply_machine_spec(vm: &mut VirtualMachine, input: MachineInput<'_>) {
    vm.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(PROVIDER_ID_LABEL.to_string(), input.provider_id.to_string());

    vm.spec.running = Some(true);

    let template = vm.spec.template.get_or_insert_with(Default::default);
    if !input.data.vm_labels.is_empty() {
        template
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(input.data.vm_labels.clone());
    }

    let spec = &mut template.spec;
    spec.architecture = (!input.data.architecture.is_empty()).then(|| input.data.architecture.clone());

    let domain = &mut spec.domain;
    domain.firmware = Some(Firmware {
        uuid: Some(input.state.instance_uuid.clone()),
    });
    domain.cpu = Some(Cpu {
        cores: Some(input.data.cores),
    });
    domain
        .resources
        .requests
        .insert("memory".to_string(), input.data.memory_quantity());
    domain.devices = Devices {
        disks: vec![Disk {
            name: BOOT_DISK.to_string(),
            boot_order: Some(1),
            disk: Some(DiskTarget {
                bus: DISK_BUS_VIRTIO.to_string(),
            }),
        }],
        interfaces: vec![default_interface(input.data)],
    };

    spec.networks = vec![Network {
        name: DEFAULT_NETWORK.to_string(),
        pod: Some(PodNetwork {}),
    }];
    spec.volumes = vec![
        Volume {
            name: BOOT_DISK.to_string(),
            data_volume: Some(DataVolumeRef {
                name: input.request_id.to_string(),
            }),
            cloud_init_no_cloud: None,
        },
        Volume {
            name: CLOUD_INIT_DISK.to_string(),
            data_volume: None,
            cloud_init_no_cloud: Some(CloudInitNoCloudSource {
                user_data: input.join_config.to_string(),
                network_data: NETWORK_DATA.to_string(),
            }),
        },
    ];
    if let Some(tolerations) = input.tolerations {
        spec.tolerations = tolerations;
    }

    vm.spec.data_volume_templates = vec![DataVolumeTemplateSpec {
        metadata: ObjectMeta {
            name: Some(input.request_id.to_string()),
            ..Default::default()
        },
        spec: DataVolumeSpec {
            source: Some(DataVolumeSource {
                http: None,
                pvc: Some(DataVolumeSourcePvc {
                    name: input.state.volume_id.clone(),
                    namespace: input.namespace.to_string(),
                }),
            }),
            pvc: Some(claim_spec(
                &input.data.disk_quantity().0,
                input.data,
                input.volume_mode,
            )),
            extra: BTreeMap::new(),
        },
    }];
}

fn default_interface(data: &ProviderData) -> Interface {
    if data.uses_passt() {
        Interface {
            name: DEFAULT_NETWORK.to_string(),
            bridge: None,
            binding: Some(PluginBinding {
                name: PASST_BINDING.to_string(),
            }),
        }
    } else {
        Interface {
            name: DEFAULT_NETWORK.to_string(),
            bridge: Some(InterfaceBridge {}),
            binding: None,
        }
    }
}

impl Provisioner {
    /// `syncMachine`: create or update the VirtualMachine until KubeVirt
    /// reports it ready.
    pub(crate) async fn sync_machine(
        &self,
        ctx: &ProvisionContext<'_>,
        state: &mut RequestState,
    ) -> Result<StepOutcome, ProviderError> {
        if state.instance_uuid.is_empty() {
            state.instance_uuid = Uuid::new_v4().to_string();
        }
        let request_id = ctx.request_id();

        let existing = self.store.get_virtual_machine(request_id).await?;
        if existing.as_ref().is_some_and(VirtualMachine::is_ready) {
            info!(request_id, instance_uuid = %state.instance_uuid, "machine is ready");
            return Ok(StepOutcome::Done);
        }

        let data = ctx.provider_data()?;
        let tolerations = data.parse_tolerations()?;

        let exists = existing.is_some();
        let mut vm = existing.unwrap_or_else(|| {
            let mut vm = VirtualMachine::new(request_id, VirtualMachineSpec::default());
            vm.metadata.namespace = Some(self.namespace().to_string());
            vm
        });
        apply_machine_spec(
            &mut vm,
            MachineInput {
                request_id,
                namespace: self.namespace(),
                provider_id: &self.config.provider_id,
                state: &*state,
                join_config: &ctx.connection().join_config,
                data: &data,
                tolerations,
                volume_mode: self.config.volume_mode,
            },
        );

        if exists {
            match self.store.update_virtual_machine(&vm).await {
                Ok(_) => debug!(request_id, "machine updated"),
                // someone else wrote the VM since our read, try again next tick
                Err(e) if e.is_conflict() => debug!(request_id, "machine update conflicted"),
                Err(e) => return Err(e.into()),
            }
        } else {
            self.store.create_virtual_machine(&vm).await?;
            info!(request_id, instance_uuid = %state.instance_uuid, volume_id = %state.volume_id, "machine created");
        }

        Ok(StepOutcome::RetryAfter(PROVISION_RETRY_INTERVAL))
    }
}
