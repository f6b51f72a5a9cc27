//! Lifecycle sequencing against a recording mock transport

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cluster_runtime::{
    AutoConfirm, CertGenerator, CertRequest, ClusterRuntime, Collaborators, KubeconfigRequest, LocalRootfs,
    MemoryStore, RuntimeConfig, RuntimeError,
};
use crds::{Cluster, ClusterPhase, ClusterStatus};
use infra_driver::{MockShell, RemoteCall};
use tempfile::TempDir;

const CLUSTERFILE: &str = r#"
apiVersion: dcops.microscaler.io/v1alpha1
kind: Cluster
metadata:
  name: test
spec:
  image: kubernetes:v1.22.15
  ssh:
    passwd: secret
  hosts:
    - ips: [10.0.0.1, 10.0.0.2, 10.0.0.3]
      roles: [master]
    - ips: [10.0.0.11, 10.0.0.12]
      roles: [node]
  hostAliases:
    - ip: 10.0.0.100
      hostnames: [mirror.local]
"#;

const INIT_OUTPUT: &str = "\
Your Kubernetes control-plane has initialized successfully!

You can now join any number of the control-plane node running the following command on each as root:

  kubeadm join apiserver.cluster.local:6443 --token 9vr73a.a8uxyaju799qwdjv \\
\t--discovery-token-ca-cert-hash sha256:7c2e69131a36ae2a042a339b33381c6d0d43887e2de83720eff5359e26aec866 \\
\t--control-plane --certificate-key f8902e114ef118304e561c3ecd4d0b543adc226b7a07f675f56564185ffe0c07

Please note that the certificate-key gives access to cluster sensitive data, keep it secret!
";

const UPLOAD_CERTS_OUTPUT: &str = "\
[upload-certs] Storing the certificates in Secret \"kubeadm-certs\" in the \"kube-system\" Namespace
[upload-certs] Using certificate key:
0c8f3bbd3b8b2c9f0e1d4a7e6b5c2d1e0f9a8b7c6d5e4f3a2b1c0d9e8f7a6b5c
";

const JOIN_COMMAND_OUTPUT: &str = "kubeadm join apiserver.cluster.local:6443 --token abcdef.0123456789abcdef \
    --discovery-token-ca-cert-hash sha256:7c2e69131a36ae2a042a339b33381c6d0d43887e2de83720eff5359e26aec866 \n";

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn ips(list: &[&str]) -> Vec<IpAddr> {
    list.iter().map(|s| ip(s)).collect()
}

#[derive(Default)]
struct RecordingCerts {
    hostnames: Mutex<Vec<String>>,
}

#[async_trait]
impl CertGenerator for RecordingCerts {
    async fn generate(&self, request: &CertRequest) -> Result<(), RuntimeError> {
        self.hostnames.lock().unwrap().push(request.hostname.clone());
        Ok(())
    }

    async fn create_kubeconfigs(&self, _request: &KubeconfigRequest) -> Result<(), RuntimeError> {
        Ok(())
    }
}

struct Harness {
    shell: MockShell,
    store: Arc<MemoryStore>,
    certs: Arc<RecordingCerts>,
    dir: TempDir,
    runtime: ClusterRuntime,
}

fn cluster(phase: Option<ClusterPhase>) -> Cluster {
    let mut cluster: Cluster = serde_yaml::from_str(CLUSTERFILE).unwrap();
    cluster.status = phase.map(|phase| ClusterStatus {
        phase,
        kubernetes_version: (phase == ClusterPhase::Ready).then(|| "v1.22.15".to_string()),
        ..ClusterStatus::default()
    });
    cluster
}

fn harness(phase: Option<ClusterPhase>, confirm: bool) -> Harness {
    harness_for(cluster(phase), confirm)
}

fn harness_for(cluster: Cluster, confirm: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("rootfs/scripts")).unwrap();
    let shell = MockShell::new();
    shell.respond("kubeadm init --config", INIT_OUTPUT);
    shell.respond("kubeadm init phase upload-certs", UPLOAD_CERTS_OUTPUT);
    shell.respond("kubeadm token create", JOIN_COMMAND_OUTPUT);
    shell.remote_file("/etc/kubernetes/admin.conf", "apiVersion: v1\nkind: Config\n");

    let store = Arc::new(MemoryStore::new(cluster.clone()));
    let certs = Arc::new(RecordingCerts::default());
    let config = RuntimeConfig::new("test", &dir.path().join("state"));
    let runtime = ClusterRuntime::new(
        cluster,
        config,
        Collaborators {
            shell: Arc::new(shell.clone()),
            rootfs: Arc::new(LocalRootfs::new(dir.path().join("rootfs"))),
            certs: certs.clone(),
            confirmer: Arc::new(AutoConfirm(confirm)),
            store: store.clone(),
        },
    )
    .unwrap();

    Harness {
        shell,
        store,
        certs,
        dir,
        runtime,
    }
}

fn pos(shell: &MockShell, host: &str, needle: &str) -> usize {
    shell
        .position(ip(host), needle)
        .unwrap_or_else(|| panic!("{host} never ran {needle:?}"))
}

/// Backends in the last lvscare manifest written on `host`
fn lvscare_backends(shell: &MockShell, host: &str) -> BTreeSet<String> {
    let command = shell
        .commands_on(ip(host))
        .into_iter()
        .rev()
        .find(|c| c.contains("kube-lvscare.yaml"))
        .unwrap_or_else(|| panic!("{host} has no lvscare manifest"));
    let tokens: Vec<&str> = command
        .split(|c: char| c.is_whitespace() || c == '"')
        .filter(|t| !t.is_empty() && *t != "-")
        .collect();
    tokens
        .windows(2)
        .filter(|w| w[0] == "--rs")
        .map(|w| w[1].to_string())
        .collect()
}

/// Index of the first rootfs copy to `host`
fn rootfs_copy(shell: &MockShell, host: &str) -> usize {
    shell
        .calls()
        .iter()
        .position(|c| {
            matches!(c, RemoteCall::Copy { host: h, remote, .. } if *h == ip(host) && remote.ends_with("/rootfs"))
        })
        .unwrap_or_else(|| panic!("{host} never received the rootfs"))
}

fn backend_set(masters: &[&str]) -> BTreeSet<String> {
    masters.iter().map(|m| format!("{m}:6443")).collect()
}

#[tokio::test]
async fn test_install_orders_tiers_and_reaches_ready() {
    let mut h = harness(None, true);

    h.runtime.install().await.unwrap();

    let shell = &h.shell;
    let init = pos(shell, "10.0.0.1", "kubeadm init --config");
    let master_joins = [pos(shell, "10.0.0.2", "kubeadm join"), pos(shell, "10.0.0.3", "kubeadm join")];
    let worker_joins = [pos(shell, "10.0.0.11", "kubeadm join"), pos(shell, "10.0.0.12", "kubeadm join")];
    assert!(master_joins.iter().all(|j| *j > init));
    assert!(master_joins.iter().max() < worker_joins.iter().min());
    assert!(shell.position(ip("10.0.0.1"), "kubeadm join").is_none());

    // rootfs and aliases land everywhere before master-zero bootstraps
    for host in ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.11", "10.0.0.12"] {
        assert!(pos(shell, host, "bash init.sh") < init);
        assert!(pos(shell, host, "10.0.0.100 mirror.local") < init);
    }

    // workers reach the control plane through the VIP, balanced over every master
    for worker in ["10.0.0.11", "10.0.0.12"] {
        assert!(pos(shell, worker, "10.103.97.2 apiserver.cluster.local") < pos(shell, worker, "kubeadm join"));
        assert!(pos(shell, worker, "seautil ipvs --vs 10.103.97.2:6443") < pos(shell, worker, "kubeadm join"));
        assert_eq!(lvscare_backends(shell, worker), backend_set(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]));
    }
    // secondary masters point the API domain at themselves once joined
    assert!(pos(shell, "10.0.0.2", "10.0.0.2 apiserver.cluster.local") > pos(shell, "10.0.0.2", "kubeadm join"));

    assert_eq!(*h.certs.hostnames.lock().unwrap(), vec!["node-10-0-0-1"]);
    assert!(h.dir.path().join("state/test/admin.conf").is_file());

    assert_eq!(h.runtime.phase(), ClusterPhase::Ready);
    let saved = h.store.snapshot().unwrap();
    let status = saved.status.unwrap();
    assert_eq!(status.phase, ClusterPhase::Ready);
    assert_eq!(status.kubernetes_version.as_deref(), Some("v1.22.15"));
}

#[tokio::test]
async fn test_install_on_ready_cluster_is_rejected_without_remote_calls() {
    let mut h = harness(Some(ClusterPhase::Ready), true);

    let err = h.runtime.install().await.unwrap_err();

    assert!(matches!(err, RuntimeError::AlreadyInitialized(ClusterPhase::Ready)));
    assert!(h.shell.calls().is_empty());
    assert_eq!(h.store.save_count(), 0);
}

#[tokio::test]
async fn test_install_twice_does_not_rebootstrap() {
    let mut h = harness(None, true);
    h.runtime.install().await.unwrap();
    h.shell.clear_calls();

    let err = h.runtime.install().await.unwrap_err();

    assert!(matches!(err, RuntimeError::AlreadyInitialized(_)));
    assert!(h.shell.calls().is_empty());
    assert_eq!(h.runtime.inventory().masters(), ips(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]));
}

#[tokio::test]
async fn test_failed_worker_join_names_exactly_the_failed_hosts() {
    let mut h = harness(None, true);
    h.shell.fail_on(ip("10.0.0.12"), "kubeadm join", "[preflight] port 10250 is in use");

    let err = h.runtime.install().await.unwrap_err();

    assert_eq!(err.failed_hosts(), vec![ip("10.0.0.12")]);
    assert!(err.is_retryable());
    assert!(err.to_string().contains("join workers failed"));
    // the sibling still finished
    assert!(h.shell.commands_on(ip("10.0.0.11")).iter().any(|c| c.contains("kube-lvscare.yaml")));

    let status = h.store.snapshot().unwrap().status.unwrap();
    assert_eq!(status.phase, ClusterPhase::Bootstrapping);
    assert!(status.last_error.unwrap().contains("10.0.0.12"));
}

#[tokio::test]
async fn test_install_without_join_command_is_a_protocol_error() {
    let mut h = harness(None, true);
    h.shell.respond("kubeadm init --config", "[init] Using Kubernetes version: v1.22.15\n");

    let err = h.runtime.install().await.unwrap_err();

    assert!(matches!(err, RuntimeError::Protocol(_)));
    assert!(!err.is_retryable());
    assert!(h.shell.position(ip("10.0.0.2"), "kubeadm join").is_none());
}

#[tokio::test]
async fn test_scale_up_uses_fresh_token_and_updates_every_backend_list() {
    let mut h = harness(Some(ClusterPhase::Ready), true);

    h.runtime
        .scale_up(&ips(&["10.0.0.4"]), &ips(&["10.0.0.13"]))
        .await
        .unwrap();

    let shell = &h.shell;
    assert!(pos(shell, "10.0.0.1", "kubeadm token create") < pos(shell, "10.0.0.4", "kubeadm join"));
    assert!(pos(shell, "10.0.0.4", "kubeadm join") < pos(shell, "10.0.0.13", "kubeadm join"));
    let join_config = shell
        .commands_on(ip("10.0.0.4"))
        .into_iter()
        .find(|c| c.contains("kubeadm-join.yaml") && c.contains("certificateKey"))
        .unwrap();
    assert!(join_config.contains("0c8f3bbd3b8b2c9f0e1d4a7e6b5c2d1e0f9a8b7c6d5e4f3a2b1c0d9e8f7a6b5c"));
    assert!(join_config.contains("token: abcdef.0123456789abcdef"));

    // only the new hosts receive the rootfs
    let initialized: BTreeSet<IpAddr> = shell.hosts_running("bash init.sh").into_iter().collect();
    assert_eq!(initialized, ips(&["10.0.0.4", "10.0.0.13"]).into_iter().collect());

    let expected = backend_set(&["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]);
    for worker in ["10.0.0.11", "10.0.0.12", "10.0.0.13"] {
        assert_eq!(lvscare_backends(shell, worker), expected);
    }

    assert_eq!(h.runtime.phase(), ClusterPhase::Ready);
    let saved = h.store.snapshot().unwrap();
    assert_eq!(saved.spec.master_ips(), vec!["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"]);
    assert_eq!(saved.spec.worker_ips(), vec!["10.0.0.11", "10.0.0.12", "10.0.0.13"]);
}

fn with_launch_commands(phase: Option<ClusterPhase>) -> Harness {
    let mut launching = cluster(phase);
    launching.spec.cmd = vec![
        "kubectl apply -f manifests/app.yaml".to_string(),
        "helm upgrade --install app charts/app".to_string(),
    ];
    harness_for(launching, true)
}

#[tokio::test]
async fn test_install_runs_launch_commands_on_master_zero_last() {
    let mut h = with_launch_commands(None);

    h.runtime.install().await.unwrap();

    let shell = &h.shell;
    let apply = pos(shell, "10.0.0.1", "kubectl apply -f manifests/app.yaml");
    let helm = pos(shell, "10.0.0.1", "helm upgrade --install app charts/app");
    assert!(apply < helm);
    assert!(pos(shell, "10.0.0.12", "kubeadm join") < apply);
    let command = shell
        .commands_on(ip("10.0.0.1"))
        .into_iter()
        .find(|c| c.contains("manifests/app.yaml"))
        .unwrap();
    assert!(command.starts_with("cd '/var/lib/dcops/data/test/rootfs' && "));
    assert!(command.contains("export HostIP='10.0.0.1'; "));
    assert_eq!(shell.hosts_running("manifests/app.yaml"), vec![ip("10.0.0.1")]);
}

#[tokio::test]
async fn test_scale_up_reruns_launch_commands_after_join() {
    let mut h = with_launch_commands(Some(ClusterPhase::Ready));

    h.runtime.scale_up(&[], &ips(&["10.0.0.13"])).await.unwrap();

    let shell = &h.shell;
    assert!(pos(shell, "10.0.0.13", "kubeadm join") < pos(shell, "10.0.0.1", "kubectl apply -f manifests/app.yaml"));
    assert_eq!(shell.hosts_running("charts/app"), vec![ip("10.0.0.1")]);
}

#[tokio::test]
async fn test_failed_launch_command_fails_install() {
    let mut h = with_launch_commands(None);
    h.shell.fail_on(ip("10.0.0.1"), "kubectl apply", "no matches for kind");

    let err = h.runtime.install().await.unwrap_err();

    assert_eq!(err.failed_hosts(), vec![ip("10.0.0.1")]);
    assert!(h.shell.position(ip("10.0.0.1"), "helm upgrade").is_none());
    assert_eq!(h.runtime.phase(), ClusterPhase::Bootstrapping);
}

#[tokio::test]
async fn test_scale_up_rejects_existing_member_before_remote_calls() {
    let mut h = harness(Some(ClusterPhase::Ready), true);

    let err = h.runtime.scale_up(&[], &ips(&["10.0.0.11"])).await.unwrap_err();

    assert!(matches!(err, RuntimeError::Config(_)));
    assert!(h.shell.calls().is_empty());
}

#[tokio::test]
async fn test_failed_scale_up_keeps_inventory() {
    let mut h = harness(Some(ClusterPhase::Ready), true);
    h.shell.fail_on(ip("10.0.0.13"), "kubeadm join", "connection refused");

    let err = h.runtime.scale_up(&[], &ips(&["10.0.0.13"])).await.unwrap_err();

    assert_eq!(err.failed_hosts(), vec![ip("10.0.0.13")]);
    assert_eq!(h.runtime.phase(), ClusterPhase::Ready);
    assert!(!h.runtime.inventory().contains(ip("10.0.0.13")));
    assert_eq!(h.store.snapshot().unwrap().spec.worker_ips(), vec!["10.0.0.11", "10.0.0.12"]);
}

#[tokio::test]
async fn test_scale_down_refuses_to_remove_every_master() {
    let mut h = harness(Some(ClusterPhase::Ready), false);

    let err = h
        .runtime
        .scale_down(&ips(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]), &[])
        .await
        .unwrap_err();

    // configuration error, raised before the (declining) prompt
    assert!(matches!(err, RuntimeError::Config(_)));
    assert!(!err.is_retryable());
    assert!(h.shell.calls().is_empty());
    assert_eq!(h.runtime.inventory().masters().len(), 3);
}

#[tokio::test]
async fn test_declined_scale_down_touches_nothing() {
    let mut h = harness(Some(ClusterPhase::Ready), false);

    let err = h.runtime.scale_down(&[], &ips(&["10.0.0.12"])).await.unwrap_err();

    assert!(matches!(err, RuntimeError::Aborted(_)));
    assert!(h.shell.calls().is_empty());
    assert_eq!(h.runtime.phase(), ClusterPhase::Ready);
    assert!(h.runtime.inventory().contains(ip("10.0.0.12")));
}

#[tokio::test]
async fn test_scale_down_removes_workers_then_masters_and_rebalances() {
    let mut h = harness(Some(ClusterPhase::Ready), true);

    h.runtime
        .scale_down(&ips(&["10.0.0.3"]), &ips(&["10.0.0.12"]))
        .await
        .unwrap();

    let shell = &h.shell;
    assert!(pos(shell, "10.0.0.12", "kubeadm reset -f") < pos(shell, "10.0.0.3", "kubeadm reset -f"));
    assert!(shell.position(ip("10.0.0.12"), "rm -rf '/var/lib/dcops/data/test/rootfs'").is_some());
    assert!(
        shell
            .commands_on(ip("10.0.0.1"))
            .iter()
            .any(|c| c == "kubectl delete node 'node-10-0-0-12' --ignore-not-found")
    );
    assert_eq!(lvscare_backends(shell, "10.0.0.11"), backend_set(&["10.0.0.1", "10.0.0.2"]));
    assert!(shell.position(ip("10.0.0.12"), "kube-lvscare.yaml").is_none());

    assert_eq!(h.runtime.inventory().masters(), ips(&["10.0.0.1", "10.0.0.2"]));
    assert_eq!(h.runtime.inventory().workers(), ips(&["10.0.0.11"]));
    assert_eq!(h.store.snapshot().unwrap().spec.master_ips(), vec!["10.0.0.1", "10.0.0.2"]);
}

#[tokio::test]
async fn test_removing_master_zero_designates_a_new_primary() {
    let mut h = harness(Some(ClusterPhase::Ready), true);

    h.runtime.scale_down(&ips(&["10.0.0.1"]), &[]).await.unwrap();

    assert_eq!(h.runtime.inventory().primary_master(), Some(ip("10.0.0.2")));
    assert!(
        h.shell
            .commands_on(ip("10.0.0.2"))
            .iter()
            .any(|c| c.contains("kubectl delete node 'node-10-0-0-1'"))
    );
    assert_eq!(lvscare_backends(&h.shell, "10.0.0.12"), backend_set(&["10.0.0.2", "10.0.0.3"]));
}

#[tokio::test]
async fn test_upgrade_replaces_master_zero_then_masters_then_workers() {
    let mut h = harness(Some(ClusterPhase::Ready), true);

    h.runtime.upgrade().await.unwrap();

    let shell = &h.shell;
    let step = "systemctl stop kubelet";
    let m0 = pos(shell, "10.0.0.1", step);
    let masters = [pos(shell, "10.0.0.2", step), pos(shell, "10.0.0.3", step)];
    let workers = [pos(shell, "10.0.0.11", step), pos(shell, "10.0.0.12", step)];
    assert!(masters.iter().all(|m| *m > m0));
    assert!(masters.iter().max() < workers.iter().min());
    assert!(pos(shell, "10.0.0.1", "kubeadm upgrade apply v1.22.15 -y") > m0);
    assert!(shell.position(ip("10.0.0.2"), "kubeadm upgrade apply").is_none());
    assert!(shell.position(ip("10.0.0.11"), "kubeadm upgrade node").is_some());
    assert_eq!(h.runtime.phase(), ClusterPhase::Ready);
}

#[tokio::test]
async fn test_upgrade_delivers_rootfs_host_by_host_without_reinit() {
    let mut h = harness(Some(ClusterPhase::Ready), true);

    h.runtime.upgrade().await.unwrap();

    let shell = &h.shell;
    assert!(shell.hosts_running("init.sh").is_empty());

    let step = "systemctl stop kubelet";
    let m0 = pos(shell, "10.0.0.1", step);
    assert!(rootfs_copy(shell, "10.0.0.1") < m0);
    // nothing else is touched until master-zero is through
    for host in ["10.0.0.2", "10.0.0.3", "10.0.0.11", "10.0.0.12"] {
        assert!(rootfs_copy(shell, host) > m0, "{host}");
        assert!(rootfs_copy(shell, host) < pos(shell, host, step), "{host}");
    }
    assert!(pos(shell, "10.0.0.2", "kubeadm upgrade node") < rootfs_copy(shell, "10.0.0.3"));
}

#[tokio::test]
async fn test_failed_master_upgrade_leaves_later_tiers_alone() {
    let mut h = harness(Some(ClusterPhase::Ready), true);
    h.shell.fail_on(ip("10.0.0.2"), "kubeadm upgrade node", "etcd member unhealthy");

    let err = h.runtime.upgrade().await.unwrap_err();

    assert_eq!(err.failed_hosts(), vec![ip("10.0.0.2")]);
    for host in ["10.0.0.3", "10.0.0.11", "10.0.0.12"] {
        assert!(h.shell.position(ip(host), "systemctl stop kubelet").is_none(), "{host}");
    }
    let status = h.store.snapshot().unwrap().status.unwrap();
    assert_eq!(status.phase, ClusterPhase::Ready);
    assert_eq!(status.kubernetes_version.as_deref(), Some("v1.22.15"));
}

#[tokio::test]
async fn test_upgrade_refuses_downgrade() {
    let mut running = cluster(Some(ClusterPhase::Ready));
    running.status.as_mut().unwrap().kubernetes_version = Some("v1.23.4".to_string());
    let mut h = harness_for(running, true);

    let err = h.runtime.upgrade().await.unwrap_err();

    assert!(matches!(err, RuntimeError::Config(_)));
    assert!(h.shell.calls().is_empty());
    assert_eq!(h.runtime.phase(), ClusterPhase::Ready);
}

#[tokio::test]
async fn test_reset_tears_down_workers_before_masters_and_keeps_inventory() {
    let mut h = harness(Some(ClusterPhase::Ready), true);

    h.runtime.reset().await.unwrap();

    let shell = &h.shell;
    let step = "kubeadm reset -f";
    let workers = [pos(shell, "10.0.0.11", step), pos(shell, "10.0.0.12", step)];
    let masters = [
        pos(shell, "10.0.0.1", step),
        pos(shell, "10.0.0.2", step),
        pos(shell, "10.0.0.3", step),
    ];
    assert!(workers.iter().max() < masters.iter().min());
    assert_eq!(shell.hosts_running("/#dcops-mirror\\.local$/d").len(), 5);

    assert_eq!(h.runtime.phase(), ClusterPhase::Reset);
    let saved = h.store.snapshot().unwrap();
    assert_eq!(saved.spec.master_ips().len() + saved.spec.worker_ips().len(), 5);
    assert!(saved.status.unwrap().kubernetes_version.is_none());
}

#[tokio::test]
async fn test_reset_requires_an_installed_cluster() {
    let mut h = harness(None, true);

    let err = h.runtime.reset().await.unwrap_err();

    assert!(matches!(
        err,
        RuntimeError::InvalidPhase {
            phase: ClusterPhase::Uninitialized,
            ..
        }
    ));
    assert!(h.shell.calls().is_empty());
}

#[tokio::test]
async fn test_scale_requires_ready() {
    let mut h = harness(Some(ClusterPhase::Resetting), true);

    let err = h.runtime.scale_up(&[], &ips(&["10.0.0.13"])).await.unwrap_err();

    assert!(matches!(err, RuntimeError::InvalidPhase { operation: "scale-up", .. }));
}
