//! Prints the `Infrastructure` CustomResourceDefinition as YAML.

use crds::Infrastructure;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&Infrastructure::crd())?);
    Ok(())
}
