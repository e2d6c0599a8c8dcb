//! Prints the operator CRDs as a multi-document YAML stream.

use crds::{PreflightValidation, SpecialResource, SpecialResourceModule};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        SpecialResource::crd(),
        SpecialResourceModule::crd(),
        PreflightValidation::crd(),
    ];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
