//! Persisted cluster state
//!
//! The Clusterfile doubles as the durable record: after every lifecycle
//! operation the runtime writes back the inventory and status so a later run
//! starts from the last known-good state.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use crds::Cluster;
use tracing::debug;

use crate::error::RuntimeError;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self) -> Result<Cluster, RuntimeError>;

    async fn save(&self, cluster: &Cluster) -> Result<(), RuntimeError>;
}

/// YAML Clusterfile on local disk
#[derive(Debug, Clone)]
pub struct ClusterfileStore {
    path: PathBuf,
}

impl ClusterfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for ClusterfileStore {
    async fn load(&self) -> Result<Cluster, RuntimeError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| RuntimeError::State(format!("failed to read {}: {e}", self.path.display())))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| RuntimeError::Config(format!("invalid clusterfile {}: {e}", self.path.display())))
    }

    /// Write next to the target, then rename over it
    async fn save(&self, cluster: &Cluster) -> Result<(), RuntimeError> {
        let yaml = serde_yaml::to_string(cluster)
            .map_err(|e| RuntimeError::State(format!("failed to serialize cluster: {e}")))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        tokio::fs::write(&staging, yaml).await?;
        tokio::fs::rename(&staging, &self.path).await?;
        debug!("Saved cluster state to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    cluster: Mutex<Option<Cluster>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new(cluster: Cluster) -> Self {
        Self {
            cluster: Mutex::new(Some(cluster)),
            saves: Mutex::new(0),
        }
    }

    /// Last saved cluster
    pub fn snapshot(&self) -> Option<Cluster> {
        self.cluster.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<Cluster, RuntimeError> {
        self.snapshot()
            .ok_or_else(|| RuntimeError::State("no cluster stored".to_string()))
    }

    async fn save(&self, cluster: &Cluster) -> Result<(), RuntimeError> {
        *self.cluster.lock().unwrap_or_else(|e| e.into_inner()) = Some(cluster.clone());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::cluster;
    use crds::{ClusterPhase, ClusterStatus};

    #[tokio::test]
    async fn test_clusterfile_round_trips_status_and_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterfileStore::new(dir.path().join("state/Clusterfile"));
        let mut cluster = cluster();
        cluster.status = Some(ClusterStatus {
            phase: ClusterPhase::Ready,
            kubernetes_version: Some("v1.22.15".to_string()),
            ..ClusterStatus::default()
        });

        store.save(&cluster).await.unwrap();
        let loaded = store.load().await.unwrap();

        assert_eq!(loaded.status.unwrap().phase, ClusterPhase::Ready);
        assert_eq!(loaded.spec.master_ips(), vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        assert!(!dir.path().join("state/Clusterfile.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_clusterfile_is_a_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ClusterfileStore::new(dir.path().join("Clusterfile"));

        assert!(matches!(store.load().await, Err(RuntimeError::State(_))));
    }

    #[tokio::test]
    async fn test_invalid_clusterfile_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Clusterfile");
        std::fs::write(&path, "kind: [").unwrap();

        assert!(matches!(
            ClusterfileStore::new(path).load().await,
            Err(RuntimeError::Config(_))
        ));
    }
}
