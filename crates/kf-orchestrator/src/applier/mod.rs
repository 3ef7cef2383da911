//! Applier: drives a cluster from its applied state to a desired one
//!
//! The first apply installs the cluster. Later applies diff the desired
//! cluster against the persisted Clusterfile and only act on the
//! difference. The persisted Clusterfile is written once the runtime has
//! brought the hosts in line.

mod diff;
mod generate;
mod pipeline;

pub use diff::ClusterDiff;
pub use generate::{generate_cluster, GenerateArgs, MASTER_LABELS};
pub use pipeline::{GenerateProcessor, Stage};

use std::net::IpAddr;
use std::sync::Arc;

use kf_core::config::{ClusterFile, DataDir, RuntimeConfig};
use kf_core::error::{ConfigError, ScaleError};
use kf_core::plugin::Phase;
use kf_core::traits::{CertService, ClusterMounter, ImageService, Platform, RemoteExecutor};
use kf_core::{Cluster, KfError};
use kf_ssh::SshExecutor;

use crate::cert::RemoteCertService;
use crate::fanout::FanOut;
use crate::filesystem::{mounted_rootfs, OverlayMounter};
use crate::image::LocalImageService;
use crate::platform;
use crate::plugin::PluginRunner;
use crate::runtime::{new_runtime, ClusterRuntime, ConfirmFn, RuntimeKind, RuntimeSetup};

/// Collaborators an applier works through
#[derive(Clone)]
pub struct Services {
    pub executor: Arc<dyn RemoteExecutor>,
    pub images: Arc<dyn ImageService>,
    pub mounter: Arc<dyn ClusterMounter>,
    pub certs: Arc<dyn CertService>,
}

impl Services {
    /// SSH-backed services reaching every host of `desired` and `current`
    ///
    /// Hosts only present in `current` stay reachable so they can be
    /// cleaned up when they leave the cluster. A registry host outside the
    /// cluster is reached with the cluster's default credentials.
    pub fn over_ssh(
        desired: &Cluster,
        current: Option<&Cluster>,
        data: &DataDir,
        config: &RuntimeConfig,
    ) -> Result<Self, KfError> {
        desired.validate()?;
        let master0 = desired
            .master0_ip()
            .ok_or_else(|| KfError::Internal("validated cluster lost its master".to_string()))?;
        let registry_ip = config.registry.ip.unwrap_or(master0);
        let executor: Arc<dyn RemoteExecutor> =
            Arc::new(ssh_executor(desired, current, registry_ip));
        let fanout = FanOut::with_limit(config.max_parallel);
        let rootfs = kf_core::config::remote_rootfs_dir(&desired.name);

        Ok(Self {
            images: Arc::new(LocalImageService::new(data.clone())),
            mounter: Arc::new(
                OverlayMounter::new(Arc::clone(&executor), data.clone(), config.registry.clone())
                    .with_fanout(fanout),
            ),
            certs: Arc::new(
                RemoteCertService::new(
                    Arc::clone(&executor),
                    config.registry.clone(),
                    registry_ip,
                    &rootfs,
                    data.tmp_dir(),
                )
                .with_fanout(fanout),
            ),
            executor,
        })
    }
}

/// Executor for the union of `desired`, `current` and the registry host
fn ssh_executor(desired: &Cluster, current: Option<&Cluster>, registry_ip: IpAddr) -> SshExecutor {
    let ssh = SshExecutor::new(desired);
    if let Some(current) = current {
        for ip in current.all_ips() {
            if !ssh.manages(ip) {
                ssh.register(ip, current.ssh_for(ip));
            }
        }
    }
    if !ssh.manages(registry_ip) {
        tracing::debug!("Registry host {} is outside the cluster", registry_ip);
        ssh.register(registry_ip, desired.ssh.clone());
    }
    ssh
}

/// Applies one cluster document
pub struct Applier {
    desired: ClusterFile,
    data: DataDir,
    config: RuntimeConfig,
    services: Services,
    confirm: Option<ConfirmFn>,
    fanout: FanOut,
}

impl Applier {
    pub fn new(desired: ClusterFile, data: DataDir, config: RuntimeConfig, services: Services) -> Self {
        let fanout = FanOut::with_limit(config.max_parallel);
        Self {
            desired,
            data,
            config,
            services,
            confirm: None,
            fanout,
        }
    }

    /// Prompt used before hosts are deleted
    pub fn with_confirm(mut self, confirm: ConfirmFn) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub fn desired(&self) -> &Cluster {
        &self.desired.cluster
    }

    /// Bring the hosts in line with the desired cluster
    pub async fn apply(&self) -> Result<(), KfError> {
        let cluster = &self.desired.cluster;
        cluster.validate()?;
        match self.data.load_cluster(&cluster.name)? {
            None => {
                tracing::info!("Installing cluster {}", cluster.name);
                self.install().await
            }
            Some(current) => {
                tracing::info!("Updating cluster {}", cluster.name);
                self.update(&current.cluster).await
            }
        }
    }

    /// Tear the cluster down and forget it
    pub async fn delete(&self) -> Result<(), KfError> {
        let cluster = &self.desired.cluster;
        cluster.validate()?;
        let hosts = cluster.all_ips();
        let plugins = self.plugins();
        tracing::info!("Deleting cluster {}", cluster.name);

        plugins.run(cluster, &hosts, Phase::PreClean).await?;
        self.runtime(cluster, true)?.reset().await?;
        plugins.run(cluster, &hosts, Phase::PostClean).await?;
        self.services.mounter.unmount_rootfs(cluster, &hosts).await?;
        self.data.remove_cluster(&cluster.name)?;
        self.services.mounter.unmount_image(cluster).await?;
        tracing::info!("Cluster {} deleted", cluster.name);
        Ok(())
    }

    async fn install(&self) -> Result<(), KfError> {
        let cluster = &self.desired.cluster;
        let hosts = cluster.all_ips();
        let plugins = self.plugins();
        let mounter = &self.services.mounter;

        pull_image(&self.services, self.fanout, cluster, &hosts).await?;
        mounter.mount_image(cluster).await?;
        plugins.run(cluster, &hosts, Phase::Originally).await?;
        mounter.mount_rootfs(cluster, &hosts, true).await?;
        plugins.run(cluster, &hosts, Phase::PreInit).await?;

        self.runtime(cluster, false)?.init().await?;
        self.persist()?;

        plugins.run(cluster, &hosts, Phase::PostInstall).await?;
        mounter.unmount_image(cluster).await
    }

    async fn update(&self, current: &Cluster) -> Result<(), KfError> {
        let desired = &self.desired.cluster;
        let diff = ClusterDiff::between(current, desired);
        if let Some(master0) = current.master0_ip() {
            if diff.masters_to_delete.contains(&master0) {
                return Err(ScaleError::ProtectedMasterRemoval(master0).into());
            }
        }
        if diff.is_empty() {
            tracing::info!("Cluster {} already matches, nothing to do", desired.name);
            return self.persist();
        }
        tracing::debug!("{:?}", diff);

        let plugins = self.plugins();
        let mounter = &self.services.mounter;
        let added = diff.added();
        let deleted = diff.deleted();

        pull_image(&self.services, self.fanout, desired, &desired.all_ips()).await?;
        mounter.mount_image(desired).await?;
        if diff.image_changed {
            tracing::info!("Image changed from {} to {}", current.image, desired.image);
            // Hosts joining later come up on the new version already
            let mut upgraded = desired.clone();
            for host in &mut upgraded.hosts {
                host.ips.retain(|ip| !added.contains(ip));
            }
            mounter.mount_rootfs(&upgraded, &upgraded.all_ips(), false).await?;
            self.runtime(&upgraded, true)?.upgrade().await?;
        }

        let runtime = self.runtime(desired, true)?;

        mounter.mount_rootfs(desired, &added, true).await?;
        plugins.run(desired, &added, Phase::PreJoin).await?;
        runtime.join_masters(&diff.masters_to_add).await?;
        runtime.join_nodes(&diff.nodes_to_add).await?;
        plugins.run(desired, &added, Phase::PostJoin).await?;

        runtime.delete_masters(&diff.masters_to_delete).await?;
        runtime.delete_nodes(&diff.nodes_to_delete).await?;
        if !deleted.is_empty() {
            plugins.run(current, &deleted, Phase::PreClean).await?;
            mounter.unmount_rootfs(current, &deleted).await?;
        }

        self.persist()?;
        mounter.unmount_image(desired).await
    }

    fn persist(&self) -> Result<(), KfError> {
        let path = self.data.save_cluster(&self.desired)?;
        tracing::info!("Cluster state saved to {}", path.display());
        Ok(())
    }

    fn plugins(&self) -> PluginRunner {
        PluginRunner::new(
            Arc::clone(&self.services.executor),
            self.fanout,
            &self.desired.plugins,
        )
    }

    fn runtime(&self, cluster: &Cluster, existing: bool) -> Result<Box<dyn ClusterRuntime>, KfError> {
        new_runtime(
            RuntimeKind::Kubernetes,
            RuntimeSetup {
                cluster: cluster.clone(),
                config: self.config.clone(),
                local_rootfs: mounted_rootfs(&self.data, &cluster.name),
                existing,
                executor: Arc::clone(&self.services.executor),
                certs: Arc::clone(&self.services.certs),
                confirm: self.confirm.clone(),
            },
        )
    }
}

/// Make sure the image is available for this machine and every host
pub(super) async fn pull_image(
    services: &Services,
    fanout: FanOut,
    cluster: &Cluster,
    hosts: &[IpAddr],
) -> Result<(), KfError> {
    if cluster.image.trim().is_empty() {
        return Err(ConfigError::MissingField("cluster image".into()).into());
    }
    let detected = platform::cluster_platforms(&services.executor, fanout, hosts).await?;
    let mut platforms = vec![Platform::current()];
    for found in detected.into_values() {
        if !platforms.contains(&found) {
            platforms.push(found);
        }
    }
    services.images.pull_if_not_exist(&cluster.image, &platforms).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_core::{Host, Role};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn cluster(masters: &[&str], nodes: &[&str]) -> Cluster {
        let mut cluster = Cluster::new("prod", "kubernetes:v1.22.8");
        cluster.ssh.password = Some("secret".into());
        cluster
            .hosts
            .push(Host::new(masters.iter().map(|m| ip(m)).collect(), Role::Master));
        cluster
            .hosts
            .push(Host::new(nodes.iter().map(|n| ip(n)).collect(), Role::Node));
        cluster
    }

    #[test]
    fn test_executor_reaches_external_registry() {
        let desired = cluster(&["10.0.0.1"], &["10.0.0.10"]);
        let ssh = ssh_executor(&desired, None, ip("10.0.0.50"));
        assert!(ssh.manages(ip("10.0.0.50")));
        assert!(ssh.manages(ip("10.0.0.1")));
        assert!(ssh.manages(ip("10.0.0.10")));
        assert!(!ssh.manages(ip("10.0.0.51")));
    }

    #[test]
    fn test_executor_keeps_departing_hosts() {
        let current = cluster(&["10.0.0.1"], &["10.0.0.10", "10.0.0.11"]);
        let desired = cluster(&["10.0.0.1"], &["10.0.0.10"]);
        let ssh = ssh_executor(&desired, Some(&current), ip("10.0.0.1"));
        assert!(ssh.manages(ip("10.0.0.11")));
    }

    #[test]
    fn test_services_over_ssh_needs_a_master() {
        let dir = tempfile::tempdir().unwrap();
        let desired = Cluster::new("prod", "kubernetes:v1.22.8");
        let mut config = RuntimeConfig::default();
        config.registry.ip = Some(ip("10.0.0.50"));
        let result = Services::over_ssh(&desired, None, &DataDir::new(dir.path()), &config);
        assert!(result.is_err());
    }
}
