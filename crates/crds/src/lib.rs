//! KubeVirt Provider CRD Definitions
//!
//! The `MachineRequest` custom resource driven by the provider, plus typed
//! views of the KubeVirt and CDI resources it produces.

pub mod machine_request;
pub mod kubevirt;
pub mod cdi;

pub use machine_request::*;
pub use kubevirt::*;
pub use cdi::*;
