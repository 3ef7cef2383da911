//! Adoption pipeline for clusters kforge did not install
//!
//! Each stage is idempotent. The pipeline stops at the first failing stage
//! and leaves whatever earlier stages did in place.

use std::fmt;
use std::sync::Arc;

use kf_core::config::{ClusterFile, DataDir, RuntimeConfig};
use kf_core::{Cluster, KfError};

use super::{pull_image, Services};
use crate::fanout::FanOut;
use crate::filesystem::mounted_rootfs;
use crate::runtime::{new_runtime, RuntimeKind, RuntimeSetup};

/// One step of the adoption pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Persist the generated Clusterfile
    Init,
    MountImage,
    MountRootfs,
    ApplyRegistry,
    UnmountImage,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "init",
            Stage::MountImage => "mount-image",
            Stage::MountRootfs => "mount-rootfs",
            Stage::ApplyRegistry => "apply-registry",
            Stage::UnmountImage => "unmount-image",
        };
        f.write_str(name)
    }
}

/// Brings an existing cluster under management
pub struct GenerateProcessor {
    data: DataDir,
    config: RuntimeConfig,
    services: Services,
    fanout: FanOut,
}

impl GenerateProcessor {
    pub fn new(data: DataDir, config: RuntimeConfig, services: Services) -> Self {
        let fanout = FanOut::with_limit(config.max_parallel);
        Self {
            data,
            config,
            services,
            fanout,
        }
    }

    /// Stages in execution order
    pub fn pipeline() -> [Stage; 5] {
        [
            Stage::Init,
            Stage::MountImage,
            Stage::MountRootfs,
            Stage::ApplyRegistry,
            Stage::UnmountImage,
        ]
    }

    /// Run every stage on `cluster`, halting at the first failure
    pub async fn run(&self, cluster: &Cluster) -> Result<(), KfError> {
        cluster.validate()?;
        for stage in Self::pipeline() {
            tracing::info!("[{}] {}", cluster.name, stage);
            if let Err(e) = self.run_stage(stage, cluster).await {
                tracing::error!("Stage {} failed: {}", stage, e);
                return Err(e);
            }
        }
        Ok(())
    }

    async fn run_stage(&self, stage: Stage, cluster: &Cluster) -> Result<(), KfError> {
        let mounter = &self.services.mounter;
        match stage {
            Stage::Init => {
                self.data.save_cluster(&ClusterFile::new(cluster.clone()))?;
                Ok(())
            }
            Stage::MountImage => {
                pull_image(&self.services, self.fanout, cluster, &cluster.all_ips()).await?;
                mounter.mount_image(cluster).await
            }
            Stage::MountRootfs => {
                let mut hosts = cluster.all_ips();
                if let Some(registry_ip) = self.config.registry.ip {
                    if !hosts.contains(&registry_ip) {
                        hosts.push(registry_ip);
                    }
                }
                mounter.mount_rootfs(cluster, &hosts, false).await
            }
            Stage::ApplyRegistry => {
                let runtime = new_runtime(
                    RuntimeKind::Kubernetes,
                    RuntimeSetup {
                        cluster: cluster.clone(),
                        config: self.config.clone(),
                        local_rootfs: mounted_rootfs(&self.data, &cluster.name),
                        existing: true,
                        executor: Arc::clone(&self.services.executor),
                        certs: Arc::clone(&self.services.certs),
                        confirm: None,
                    },
                )?;
                runtime.apply_registry().await
            }
            Stage::UnmountImage => mounter.unmount_image(cluster).await,
        }
    }
}
