//! Shared boot volumes.
//!
//! Boot images are imported once per (schematic, Talos version, architecture)
//! into a DataVolume named after the SHA-256 of the image URL. Every machine
//! with the same image clones that volume instead of downloading it again.

use crate::provider::context::ProvisionContext;
use crate::provider::data::ProviderData;
use crate::provider::error::ProviderError;
use crate::provider::{Provisioner, StepOutcome, PROVISION_RETRY_INTERVAL};
use clap::ValueEnum;
use crds::{
    DataVolume, DataVolumeSource, DataVolumeSourceHttp, DataVolumeSpec, RequestState,
    BIND_IMMEDIATE_ANNOTATION,
};
use k8s_openapi::api::core::v1::{PersistentVolumeClaimSpec, VolumeResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Capacity of a shared boot volume.
pub const BOOT_VOLUME_SIZE: &str = "5Gi";

const READ_WRITE_ONCE: &str = "ReadWriteOnce";

/// PVC volume mode for created claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VolumeMode {
    #[value(name = "Block")]
    Block,
    #[value(name = "Filesystem")]
    Filesystem,
}

impl VolumeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            VolumeMode::Block => "Block",
            VolumeMode::Filesystem => "Filesystem",
        }
    }
}

/// Download URL of a NoCloud disk image on the Image Factory.
pub fn image_url(factory_url: &str, schematic: &str, talos_version: &str, architecture: &str) -> String {
    format!(
        "{}/image/{}/{}/nocloud-{}.qcow2",
        factory_url.trim_end_matches('/'),
        schematic,
        talos_version,
        architecture
    )
}

/// Content address of an image: lowercase hex SHA-256 of its URL.
pub fn volume_id(image_url: &str) -> String {
    hex::encode(Sha256::digest(image_url.as_bytes()))
}

/// Single-writer claim of `size`, with storage class and volume mode applied.
pub(crate) fn claim_spec(size: &str, data: &ProviderData, volume_mode: Option<VolumeMode>) -> PersistentVolumeClaimSpec {
    PersistentVolumeClaimSpec {
        access_modes: Some(vec![READ_WRITE_ONCE.to_string()]),
        resources: Some(VolumeResourceRequirements {
            requests: Some(BTreeMap::from([("storage".to_string(), Quantity(size.to_string()))])),
            ..Default::default()
        }),
        storage_class_name: data.storage_class(),
        volume_mode: volume_mode.map(|mode| mode.as_str().to_string()),
        ..Default::default()
    }
}

/// DataVolume importing `url` into the shared boot volume `volume_id`.
pub(crate) fn boot_volume(
    volume_id: &str,
    namespace: &str,
    url: &str,
    data: &ProviderData,
    volume_mode: Option<VolumeMode>,
) -> DataVolume {
    DataVolume {
        metadata: ObjectMeta {
            name: Some(volume_id.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(BTreeMap::from([(
                BIND_IMMEDIATE_ANNOTATION.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        spec: DataVolumeSpec {
            source: Some(DataVolumeSource {
                http: Some(DataVolumeSourceHttp { url: url.to_string() }),
                pvc: None,
            }),
            pvc: Some(claim_spec(BOOT_VOLUME_SIZE, data, volume_mode)),
            extra: BTreeMap::new(),
        },
        status: None,
    }
}

impl Provisioner {
    /// `ensureVolume`: resolve the image for the declared Talos version and
    /// make sure its shared boot volume exists and finished importing.
    pub(crate) async fn ensure_volume(
        &self,
        ctx: &ProvisionContext<'_>,
        state: &mut RequestState,
    ) -> Result<StepOutcome, ProviderError> {
        state.talos_version = ctx.talos_version().to_string();

        let data = ctx.provider_data()?;
        let url = image_url(
            &self.config.image_factory_url,
            &state.schematic,
            &state.talos_version,
            &data.architecture,
        );
        state.volume_id = volume_id(&url);

        match self.store.get_data_volume(&state.volume_id).await? {
            Some(volume) if volume.is_ready() => {
                debug!(request_id = %ctx.request_id(), volume_id = %state.volume_id, "boot volume ready");
                return Ok(StepOutcome::Done);
            }
            Some(_) => {
                debug!(request_id = %ctx.request_id(), volume_id = %state.volume_id, "boot volume still importing");
            }
            None => {
                let volume = boot_volume(&state.volume_id, self.namespace(), &url, &data, self.config.volume_mode);
                match self.store.create_data_volume(&volume).await {
                    Ok(_) => {
                        info!(request_id = %ctx.request_id(), volume_id = %state.volume_id, %url, "boot volume created");
                    }
                    // another request for the same image won the race
                    Err(e) if e.is_already_exists() => {
                        debug!(request_id = %ctx.request_id(), volume_id = %state.volume_id, "boot volume created concurrently");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        Ok(StepOutcome::RetryAfter(PROVISION_RETRY_INTERVAL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProvisionStep;
    use crate::test_utils::{TestEnv, AMD64_PROVIDER_DATA};
    use kubevirt_client::StoreOp;

    fn resolved_state() -> RequestState {
        RequestState {
            schematic: TestEnv::SCHEMATIC_ID.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_image_url_layout() {
        assert_eq!(
            image_url("https://factory.talos.dev/", "abc", "v1.9.0", "arm64"),
            "https://factory.talos.dev/image/abc/v1.9.0/nocloud-arm64.qcow2"
        );
    }

    #[test]
    fn test_volume_id_is_sha256_hex() {
        // sha256("abc")
        assert_eq!(
            volume_id("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let id = volume_id("https://factory.talos.dev/image/abc/v1.9.0/nocloud-amd64.qcow2");
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_boot_volume_shape() {
        let data = ProviderData {
            storage_class_name: "fast".to_string(),
            ..Default::default()
        };
        let volume = boot_volume("vol", "vms", "https://img", &data, Some(VolumeMode::Block));

        let annotations = volume.metadata.annotations.unwrap();
        assert_eq!(annotations.get(BIND_IMMEDIATE_ANNOTATION).map(String::as_str), Some("true"));

        let source = volume.spec.source.unwrap();
        assert_eq!(source.http.unwrap().url, "https://img");

        let pvc = volume.spec.pvc.unwrap();
        assert_eq!(pvc.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
        assert_eq!(pvc.storage_class_name.as_deref(), Some("fast"));
        assert_eq!(pvc.volume_mode.as_deref(), Some("Block"));
        let requests = pvc.resources.unwrap().requests.unwrap();
        assert_eq!(requests.get("storage"), Some(&Quantity("5Gi".to_string())));
    }

    #[test]
    fn test_cluster_defaults_when_unset() {
        let volume = boot_volume("vol", "vms", "https://img", &ProviderData::default(), None);
        let pvc = volume.spec.pvc.unwrap();
        assert!(pvc.storage_class_name.is_none());
        assert!(pvc.volume_mode.is_none());
    }

    #[tokio::test]
    async fn test_missing_volume_is_created() {
        let env = TestEnv::new();
        let ctx = env.context("req-1", AMD64_PROVIDER_DATA);
        let mut state = resolved_state();

        let outcome = env
            .provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::RetryAfter(PROVISION_RETRY_INTERVAL));

        let expected_url = format!(
            "{}/image/{}/v1.9.0/nocloud-amd64.qcow2",
            TestEnv::FACTORY_URL,
            TestEnv::SCHEMATIC_ID
        );
        assert_eq!(state.volume_id, volume_id(&expected_url));

        let volume = env.store.data_volume(&state.volume_id).unwrap();
        assert_eq!(volume.metadata.namespace.as_deref(), Some(TestEnv::NAMESPACE));
        assert_eq!(volume.spec.source.unwrap().http.unwrap().url, expected_url);
    }

    #[tokio::test]
    async fn test_configured_volume_mode_is_applied() {
        let env = TestEnv::with_volume_mode(VolumeMode::Filesystem);
        let ctx = env.context("req-1", AMD64_PROVIDER_DATA);
        let mut state = resolved_state();

        env.provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut state)
            .await
            .unwrap();

        let volume = env.store.data_volume(&state.volume_id).unwrap();
        assert_eq!(volume.spec.pvc.unwrap().volume_mode.as_deref(), Some("Filesystem"));
    }

    #[tokio::test]
    async fn test_importing_volume_is_not_recreated() {
        let env = TestEnv::new();
        let ctx = env.context("req-1", AMD64_PROVIDER_DATA);
        let mut state = resolved_state();

        env.provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut state)
            .await
            .unwrap();
        env.store.set_data_volume_phase(&state.volume_id, "ImportInProgress");

        let outcome = env
            .provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::RetryAfter(PROVISION_RETRY_INTERVAL));
        assert_eq!(env.store.call_count(StoreOp::CreateDataVolume), 1);
    }

    #[tokio::test]
    async fn test_ready_volume_is_done() {
        let env = TestEnv::new();
        let ctx = env.context("req-1", AMD64_PROVIDER_DATA);
        let mut state = resolved_state();

        env.provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut state)
            .await
            .unwrap();
        env.store.set_data_volume_phase(&state.volume_id, crds::DATA_VOLUME_SUCCEEDED);

        let outcome = env
            .provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Done);
    }

    #[tokio::test]
    async fn test_concurrent_create_is_tolerated() {
        let env = TestEnv::new();
        let ctx = env.context("req-1", AMD64_PROVIDER_DATA);
        let mut state = resolved_state();
        env.store.fail_next_already_exists(StoreOp::CreateDataVolume);

        let outcome = env
            .provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut state)
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::RetryAfter(PROVISION_RETRY_INTERVAL));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_fatal() {
        let env = TestEnv::new();
        let ctx = env.context("req-1", AMD64_PROVIDER_DATA);
        let mut state = resolved_state();
        env.store.fail_next(StoreOp::GetDataVolume, "apiserver unavailable");

        let err = env
            .provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Store(_)));
        assert_eq!(env.store.call_count(StoreOp::CreateDataVolume), 0);
    }

    #[tokio::test]
    async fn test_requests_with_same_image_share_one_volume() {
        let env = TestEnv::new();
        let mut first = resolved_state();
        let mut second = resolved_state();

        let ctx = env.context("req-1", AMD64_PROVIDER_DATA);
        env.provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut first)
            .await
            .unwrap();
        let ctx = env.context("req-2", AMD64_PROVIDER_DATA);
        env.provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut second)
            .await
            .unwrap();

        assert_eq!(first.volume_id, second.volume_id);
        assert_eq!(env.store.data_volume_count(), 1);
        assert_eq!(env.store.call_count(StoreOp::CreateDataVolume), 1);
    }

    #[tokio::test]
    async fn test_version_change_moves_to_new_volume() {
        let env = TestEnv::new();
        let mut state = resolved_state();

        let ctx = env.context("req-1", AMD64_PROVIDER_DATA);
        env.provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut state)
            .await
            .unwrap();
        let old_volume = state.volume_id.clone();

        let ctx = env.context_with_version("req-1", "v1.10.0", AMD64_PROVIDER_DATA);
        env.provisioner
            .run_step(ProvisionStep::EnsureVolume, &ctx, &mut state)
            .await
            .unwrap();

        assert_eq!(state.talos_version, "v1.10.0");
        assert_ne!(state.volume_id, old_volume);
        assert_eq!(env.store.data_volume_count(), 2);
    }
}
