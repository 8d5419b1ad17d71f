//! Prints the `MachineRequest` CRD manifest as YAML.

use crds::MachineRequest;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&MachineRequest::crd())?);
    Ok(())
}
