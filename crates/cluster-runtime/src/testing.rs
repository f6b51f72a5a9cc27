//! Shared fixtures for unit tests

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crds::Cluster;
use infra_driver::{HostInventory, InfraDriver, MockShell};

pub(crate) const CLUSTERFILE: &str = r#"
apiVersion: dcops.microscaler.io/v1alpha1
kind: Cluster
metadata:
  name: test
spec:
  image: kubernetes:v1.22.15
  env:
    - PodCIDR=100.64.0.0/10
  ssh:
    passwd: secret
  hosts:
    - ips: [10.0.0.1, 10.0.0.2, 10.0.0.3]
      roles: [master]
    - ips: [10.0.0.11, 10.0.0.12]
      roles: [node]
"#;

pub(crate) fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub(crate) fn cluster() -> Cluster {
    serde_yaml::from_str(CLUSTERFILE).unwrap()
}

pub(crate) fn driver(shell: &MockShell) -> InfraDriver {
    let inventory = HostInventory::from_cluster(&cluster().spec).unwrap();
    InfraDriver::new(inventory, Arc::new(shell.clone()), Duration::from_secs(5))
}
