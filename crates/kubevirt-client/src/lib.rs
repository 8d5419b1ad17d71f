//! KubeVirt Object Store Client
//!
//! The narrow create/get/update/delete contract the provisioning pipeline
//! needs from the cluster, bound to a single namespace.
//!
//! # Example
//!
//! ```no_run
//! use kubevirt_client::{KubeVirtClient, KubeVirtStore};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeVirtClient::new(client, "default", Duration::from_secs(30));
//!
//! if let Some(vm) = store.get_virtual_machine("machine-1").await? {
//!     println!("ready: {}", vm.is_ready());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeVirtClient;
pub use error::StoreError;
pub use store_trait::KubeVirtStore;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockKubeVirtStore, StoreCall, StoreOp};
