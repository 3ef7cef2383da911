//! kubeadm-driven Kubernetes runtime
//!
//! Master-0 is bootstrapped with `kubeadm init`. Additional masters join the
//! control plane one at a time; workers join concurrently through the VIP,
//! which every worker load-balances locally with IPVS and an lvscare static
//! pod.

pub(crate) mod commands;
mod delete;
mod init;
mod join;
mod kubeadm;
mod local;
mod lvscare;
mod metadata;
mod registry;
mod reset;
mod upgrade;

pub use kubeadm::{JoinToken, KubeadmConfig};
pub use metadata::{Metadata, METADATA_FILE};

use async_trait::async_trait;
use std::future::Future;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use kf_core::config::{remote_rootfs_dir, RegistryConfig, RuntimeConfig};
use kf_core::traits::{CertService, RemoteExecutor};
use kf_core::{Cluster, KfError};

use super::{ClusterRuntime, ConfirmFn, Operation, RuntimeSetup, RuntimeState, StateMachine};
use crate::fanout::FanOut;
use crate::readiness::wait_ssh_ready;
use commands::{API_SERVER_PORT, KUBEADM_CONFIG};
use kubeadm::MergeInput;

/// Read-only facts every operation of one runtime shares
#[derive(Debug)]
pub(crate) struct RuntimeContext {
    pub cluster: Cluster,
    pub config: RuntimeConfig,
    pub master0: IpAddr,
    /// Registry settings with the IP resolved
    pub registry: RegistryConfig,
    pub registry_ip: IpAddr,
    /// Rootfs directory on every host
    pub rootfs: String,
    /// Rootfs of the locally mounted image
    pub local_rootfs: PathBuf,
}

impl RuntimeContext {
    fn new(cluster: Cluster, config: RuntimeConfig, local_rootfs: PathBuf) -> Result<Self, KfError> {
        cluster.validate()?;
        let master0 = cluster
            .master0_ip()
            .ok_or_else(|| KfError::Internal("validated cluster lost its master".to_string()))?;
        let registry = config.registry.clone();
        let registry_ip = registry.ip.unwrap_or(master0);
        Ok(Self {
            rootfs: remote_rootfs_dir(&cluster.name),
            cluster,
            config,
            master0,
            registry,
            registry_ip,
            local_rootfs,
        })
    }

    pub fn vip(&self) -> IpAddr {
        self.config.vip
    }

    pub fn api_server_domain(&self) -> &str {
        &self.config.api_server_domain
    }

    pub fn masters(&self) -> Vec<IpAddr> {
        self.cluster.master_ips()
    }

    /// `vip:6443`, the endpoint workers join through
    pub fn vip_endpoint(&self) -> String {
        format!("{}:{}", self.vip(), API_SERVER_PORT)
    }

    /// `master0:6443`, the endpoint masters join through
    pub fn master0_endpoint(&self) -> String {
        format!("{}:{}", self.master0, API_SERVER_PORT)
    }

    pub fn vlog(&self) -> u8 {
        self.config.vlog
    }

    /// Kubernetes version from the image metadata, if it ships one
    pub fn kubernetes_version(&self) -> Option<String> {
        match Metadata::load(&self.local_rootfs) {
            Ok(metadata) => metadata.kubernetes_version().map(str::to_string),
            Err(e) => {
                tracing::debug!("No image metadata: {}", e);
                None
            }
        }
    }

    /// Merge the image's kubeadm config with the cluster settings
    pub fn kubeadm_config(&self) -> Result<KubeadmConfig, KfError> {
        let version = self.kubernetes_version();
        let masters = self.masters();
        let env: Vec<(String, String)> = self
            .cluster
            .env
            .iter()
            .filter_map(|e| e.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.to_string()))
            .collect();
        let base = self.local_rootfs.join(KUBEADM_CONFIG);
        KubeadmConfig::merge(
            Some(&base),
            &MergeInput {
                kubernetes_version: version.as_deref(),
                api_server_domain: self.api_server_domain(),
                vip: self.vip(),
                masters: &masters,
                env: &env,
                image_repository: Some(self.registry.repo()),
            },
        )
    }
}

/// [`ClusterRuntime`] backed by kubeadm
pub struct KubernetesRuntime {
    ctx: Arc<RuntimeContext>,
    executor: Arc<dyn RemoteExecutor>,
    certs: Arc<dyn CertService>,
    confirm: Option<ConfirmFn>,
    fanout: FanOut,
    /// Join credentials fetched from master-0, refreshed per join
    join_token: Mutex<Option<JoinToken>>,
    state: StateMachine,
}

impl KubernetesRuntime {
    pub fn new(setup: RuntimeSetup) -> Result<Self, KfError> {
        let fanout = FanOut::with_limit(setup.config.max_parallel);
        let initial = if setup.existing {
            RuntimeState::Bootstrapped
        } else {
            RuntimeState::Uninitialized
        };
        let ctx = RuntimeContext::new(setup.cluster, setup.config, setup.local_rootfs)?;
        tracing::debug!(
            "Kubernetes runtime for {} (master0 {}, state {})",
            ctx.cluster.name,
            ctx.master0,
            initial
        );
        Ok(Self {
            ctx: Arc::new(ctx),
            executor: setup.executor,
            certs: setup.certs,
            confirm: setup.confirm,
            fanout,
            join_token: Mutex::new(None),
            state: StateMachine::new(initial),
        })
    }

    /// Run one command on `host`
    async fn exec(&self, host: IpAddr, command: &str) -> Result<String, KfError> {
        Ok(self.executor.run(host, command).await?)
    }

    /// Wait until every host answers over SSH
    async fn wait_ready(&self, hosts: &[IpAddr]) -> Result<(), KfError> {
        wait_ssh_ready(&self.executor, &self.ctx.config.ssh_ready, self.fanout, hosts).await
    }

    /// Run `work` as `op`, keeping the state machine in step
    async fn guarded<F>(&self, op: Operation, work: F) -> Result<(), KfError>
    where
        F: Future<Output = Result<(), KfError>>,
    {
        let previous = self.state.begin(op)?;
        tracing::debug!("{} started", op);
        let result = work.await;
        self.state.finish(op, previous, result.is_ok());
        match &result {
            Ok(()) => tracing::debug!("{} finished, state {}", op, self.state.current()),
            Err(e) => tracing::debug!("{} failed: {}", op, e),
        }
        result
    }

    /// Ask before destroying hosts
    fn confirm_delete(&self, what: &str, ips: &[IpAddr]) -> Result<(), KfError> {
        if self.ctx.config.force_delete {
            return Ok(());
        }
        let prompt = format!(
            "Are you sure to delete these {}: {}?",
            what,
            ips.iter().map(IpAddr::to_string).collect::<Vec<_>>().join(", ")
        );
        match &self.confirm {
            Some(confirm) if confirm(&prompt) => Ok(()),
            Some(_) => Err(KfError::Aborted(format!("deletion of {} declined", what))),
            None => Err(KfError::Aborted(format!(
                "deleting {} needs confirmation or force_delete",
                what
            ))),
        }
    }
}

#[async_trait]
impl ClusterRuntime for KubernetesRuntime {
    async fn init(&self) -> Result<(), KfError> {
        self.guarded(Operation::Init, self.bootstrap()).await
    }

    async fn upgrade(&self) -> Result<(), KfError> {
        self.guarded(Operation::Upgrade, self.upgrade_hosts()).await
    }

    async fn reset(&self) -> Result<(), KfError> {
        self.guarded(Operation::Reset, self.teardown()).await
    }

    async fn join_masters(&self, ips: &[IpAddr]) -> Result<(), KfError> {
        if ips.is_empty() {
            return Ok(());
        }
        self.guarded(Operation::Join, self.add_masters(ips)).await
    }

    async fn join_nodes(&self, ips: &[IpAddr]) -> Result<(), KfError> {
        if ips.is_empty() {
            return Ok(());
        }
        self.guarded(Operation::Join, self.add_nodes(ips)).await
    }

    async fn delete_masters(&self, ips: &[IpAddr]) -> Result<(), KfError> {
        if ips.is_empty() {
            return Ok(());
        }
        self.guarded(Operation::Delete, self.remove_masters(ips)).await
    }

    async fn delete_nodes(&self, ips: &[IpAddr]) -> Result<(), KfError> {
        if ips.is_empty() {
            return Ok(());
        }
        self.guarded(Operation::Delete, self.remove_nodes(ips)).await
    }

    async fn cluster_metadata(&self) -> Result<Metadata, KfError> {
        Metadata::load(&self.ctx.local_rootfs)
    }

    async fn apply_registry(&self) -> Result<(), KfError> {
        self.generate_registry_cert().await?;
        self.send_registry_cert(&self.ctx.cluster.all_ips()).await?;
        self.start_registry().await
    }

    fn state(&self) -> RuntimeState {
        self.state.current()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use kf_core::mock::MockExecutor;
    use kf_core::traits::CertificateDescriptor;
    use kf_core::{Host, Role};
    use std::sync::Mutex as StdMutex;

    /// Records certificate calls
    #[derive(Default)]
    pub struct RecordingCerts {
        pub sent: StdMutex<Vec<Vec<IpAddr>>>,
        pub generated: StdMutex<Vec<CertificateDescriptor>>,
    }

    #[async_trait]
    impl CertService for RecordingCerts {
        async fn generate(
            &self,
            descriptor: &CertificateDescriptor,
        ) -> Result<(PathBuf, PathBuf), KfError> {
            self.generated.lock().unwrap().push(descriptor.clone());
            let dir = PathBuf::from(&descriptor.output_dir);
            Ok((
                dir.join(format!("{}.crt", descriptor.common_name)),
                dir.join(format!("{}.key", descriptor.common_name)),
            ))
        }

        async fn send(&self, hosts: &[IpAddr]) -> Result<(), KfError> {
            self.sent.lock().unwrap().push(hosts.to_vec());
            Ok(())
        }
    }

    pub fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    pub const JOIN_OUTPUT: &str = "kubeadm join apiserver.cluster.local:6443 \
        --token abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:1234\n";

    /// Masters 10.0.0.1-2, workers 10.0.0.10-11
    pub fn cluster() -> Cluster {
        let mut cluster = Cluster::new("prod", "kubernetes:v1.22.8");
        cluster.ssh.password = Some("secret".into());
        cluster
            .hosts
            .push(Host::new(vec![ip("10.0.0.1"), ip("10.0.0.2")], Role::Master));
        cluster
            .hosts
            .push(Host::new(vec![ip("10.0.0.10"), ip("10.0.0.11")], Role::Node));
        cluster
    }

    pub fn mock() -> Arc<MockExecutor> {
        let mock = Arc::new(MockExecutor::new());
        mock.respond(commands::TOKEN_CREATE, JOIN_OUTPUT)
            .respond(commands::UPLOAD_CERTS, format!("[upload-certs] key:\n{}\n", "c".repeat(64)))
            .respond("route check", commands::ROUTE_OK)
            .respond(commands::CGROUP_DRIVER, "systemd\n");
        mock
    }

    pub struct Harness {
        pub mock: Arc<MockExecutor>,
        pub certs: Arc<RecordingCerts>,
        pub runtime: KubernetesRuntime,
        pub dir: tempfile::TempDir,
    }

    pub fn harness(cluster: Cluster, existing: bool, force_delete: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mock = mock();
        let certs = Arc::new(RecordingCerts::default());
        let mut config = RuntimeConfig::default();
        config.force_delete = force_delete;
        config.ssh_ready = kf_core::config::RetryPolicy::fixed(2, std::time::Duration::from_millis(1));
        config.kubeconfig_path = dir.path().join("kube").join("config");
        config.hosts_file = dir.path().join("hosts");
        std::fs::write(&config.hosts_file, "127.0.0.1 localhost\n").unwrap();

        let executor: Arc<dyn RemoteExecutor> = mock.clone();
        let runtime = KubernetesRuntime::new(RuntimeSetup {
            cluster,
            config,
            local_rootfs: dir.path().join("rootfs"),
            existing,
            executor,
            certs: certs.clone(),
            confirm: None,
        })
        .unwrap();
        Harness {
            mock,
            certs,
            runtime,
            dir,
        }
    }
}
