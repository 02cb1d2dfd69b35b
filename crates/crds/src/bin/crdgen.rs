//! Prints the IPReservation CRD as YAML.
//!
//! Calico normally installs this CRD itself; the output is for clusters
//! (and test environments) that run the controller without Calico's API server.

use crds::IPReservation;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&IPReservation::crd())?);
    Ok(())
}
