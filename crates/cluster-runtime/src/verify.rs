//! Post-install node verification through the fetched admin kubeconfig

use std::path::Path;

use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use tracing::{info, warn};

use crate::error::RuntimeError;

/// Ready and total node counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSummary {
    pub ready: usize,
    pub total: usize,
}

pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

pub fn summarize(nodes: &[Node]) -> NodeSummary {
    NodeSummary {
        ready: nodes.iter().filter(|n| node_is_ready(n)).count(),
        total: nodes.len(),
    }
}

/// List nodes with `kubeconfig` and warn when fewer than `expected` are Ready
pub async fn verify_nodes(kubeconfig: &Path, expected: usize) -> Result<NodeSummary, RuntimeError> {
    let kubeconfig = Kubeconfig::read_from(kubeconfig)
        .map_err(|e| RuntimeError::State(format!("failed to read kubeconfig: {e}")))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| RuntimeError::State(format!("failed to load kubeconfig: {e}")))?;
    let client = Client::try_from(config)?;

    let nodes = Api::<Node>::all(client).list(&ListParams::default()).await?;
    let summary = summarize(&nodes.items);
    if summary.ready < expected {
        warn!(
            "Only {}/{} nodes are Ready ({} registered)",
            summary.ready, expected, summary.total
        );
    } else {
        info!("All {} nodes are Ready", summary.ready);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};

    fn node(ready: &str) -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(vec![
                    NodeCondition {
                        type_: "MemoryPressure".to_string(),
                        status: "False".to_string(),
                        ..NodeCondition::default()
                    },
                    NodeCondition {
                        type_: "Ready".to_string(),
                        status: ready.to_string(),
                        ..NodeCondition::default()
                    },
                ]),
                ..NodeStatus::default()
            }),
            ..Node::default()
        }
    }

    #[test]
    fn test_summarize() {
        let nodes = vec![node("True"), node("False"), node("Unknown"), Node::default()];

        assert_eq!(summarize(&nodes), NodeSummary { ready: 1, total: 4 });
    }
}
