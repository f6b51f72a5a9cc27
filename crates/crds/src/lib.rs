//! DCops CRD Definitions
//!
//! The `Cluster` custom resource doubles as the Clusterfile: the declarative
//! description of hosts, credentials, registry and Kubernetes settings that the
//! cluster lifecycle engine consumes and persists.

pub mod cluster;
pub mod host;
pub mod kubernetes;
pub mod registry;
pub mod taint;

pub use cluster::*;
pub use host::*;
pub use kubernetes::*;
pub use registry::*;
pub use taint::*;
