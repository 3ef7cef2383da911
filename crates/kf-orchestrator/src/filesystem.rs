//! Cluster image mounting
//!
//! The image is "mounted" locally by materializing it under
//! `<data>/mount/<cluster>`. Hosts receive the rootfs of their own platform
//! through the executor, and `init.sh` prepares them for kubeadm. A mount
//! left over from another image is replaced rather than reused.

use async_trait::async_trait;
use dashmap::DashSet;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kf_core::config::{remote_rootfs_dir, DataDir, RegistryConfig};
use kf_core::env::wrap_shell;
use kf_core::traits::{ClusterMounter, Platform, RemoteExecutor};
use kf_core::{Cluster, KfError};

use crate::fanout::FanOut;
use crate::image::{image_dir_name, platform_rootfs};
use crate::platform;
use crate::runtime::kubernetes::commands;

const MOUNTED_IMAGE: &str = "mounted-image";

/// Local rootfs of `cluster`'s mounted image for the current machine
pub fn mounted_rootfs(data: &DataDir, cluster_name: &str) -> PathBuf {
    platform_rootfs(&data.mount_dir(cluster_name), &Platform::current())
}

fn init_command(rootfs: &str, registry: &RegistryConfig) -> String {
    let init = format!(
        "chmod +x scripts/* && cd scripts && bash init.sh /var/lib/docker {} {}",
        registry.domain, registry.port
    );
    commands::cd_and_exec(rootfs, &init)
}

fn clean_command(rootfs: &str) -> String {
    let clean = format!("{}/scripts/clean.sh", rootfs);
    format!(
        "if [ -f \"{clean}\" ];then chmod +x {clean} && /bin/bash -c {clean};fi \
         && (! mountpoint -q {rootfs} || umount -lf {rootfs}) && rm -rf {rootfs}",
        clean = clean,
        rootfs = rootfs
    )
}

fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// [`ClusterMounter`] that ships rootfs trees over the remote executor
pub struct OverlayMounter {
    executor: Arc<dyn RemoteExecutor>,
    data: DataDir,
    registry: RegistryConfig,
    fanout: FanOut,
}

impl OverlayMounter {
    pub fn new(executor: Arc<dyn RemoteExecutor>, data: DataDir, registry: RegistryConfig) -> Self {
        Self {
            executor,
            data,
            registry,
            fanout: FanOut::new(),
        }
    }

    pub fn with_fanout(mut self, fanout: FanOut) -> Self {
        self.fanout = fanout;
        self
    }

    /// Records which image `<data>/mount/<cluster>` was materialized from
    fn image_marker(&self, cluster_name: &str) -> PathBuf {
        self.data.cluster_dir(cluster_name).join(MOUNTED_IMAGE)
    }

    /// Ship the registry content of every source dir used to the registry host
    async fn copy_registry(
        &self,
        registry_ip: IpAddr,
        sources: &DashSet<PathBuf>,
        rootfs: &str,
    ) -> Result<(), KfError> {
        let target = format!("{}/registry", rootfs);
        let dirs: Vec<PathBuf> = sources.iter().map(|s| s.key().join("registry")).collect();
        for dir in dirs.into_iter().filter(|d| d.is_dir()) {
            tracing::debug!("Copying {} to {}:{}", dir.display(), registry_ip, target);
            self.executor
                .copy(registry_ip, &dir, &target)
                .await
                .map_err(|e| KfError::host(registry_ip, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterMounter for OverlayMounter {
    async fn mount_rootfs(
        &self,
        cluster: &Cluster,
        hosts: &[IpAddr],
        init: bool,
    ) -> Result<(), KfError> {
        if hosts.is_empty() {
            return Ok(());
        }
        let rootfs = remote_rootfs_dir(&cluster.name);
        let mount_dir = self.data.mount_dir(&cluster.name);
        let sources: Arc<DashSet<PathBuf>> = Arc::new(DashSet::new());
        let cluster_arc = Arc::new(cluster.clone());
        let init_cmd = Arc::new(init_command(&rootfs, &self.registry));

        self.fanout
            .run(hosts, |host| {
                let executor = Arc::clone(&self.executor);
                let sources = Arc::clone(&sources);
                let cluster = Arc::clone(&cluster_arc);
                let init_cmd = Arc::clone(&init_cmd);
                let mount_dir = mount_dir.clone();
                let rootfs = rootfs.clone();
                async move {
                    let target = platform::detect(executor.as_ref(), host).await?;
                    let src = platform_rootfs(&mount_dir, &target);
                    sources.insert(src.clone());
                    executor.copy(host, &src, &rootfs).await?;
                    if init {
                        executor.run(host, &wrap_shell(&cluster, host, &init_cmd)).await?;
                    }
                    tracing::debug!("Mounted rootfs on {} from {}", host, src.display());
                    Ok::<(), KfError>(())
                }
            })
            .await?;

        let Some(master0) = cluster.master0_ip() else {
            return Ok(());
        };
        let registry_ip = self.registry.ip.unwrap_or(master0);
        if !hosts.contains(&registry_ip) {
            return Ok(());
        }
        self.copy_registry(registry_ip, &sources, &rootfs).await
    }

    async fn unmount_rootfs(&self, cluster: &Cluster, hosts: &[IpAddr]) -> Result<(), KfError> {
        let clean = Arc::new(clean_command(&remote_rootfs_dir(&cluster.name)));
        let cluster_arc = Arc::new(cluster.clone());
        self.fanout
            .run(hosts, |host| {
                let executor = Arc::clone(&self.executor);
                let clean = Arc::clone(&clean);
                let cluster = Arc::clone(&cluster_arc);
                async move {
                    executor.run(host, &wrap_shell(&cluster, host, &clean)).await?;
                    Ok::<(), KfError>(())
                }
            })
            .await
    }

    async fn mount_image(&self, cluster: &Cluster) -> Result<(), KfError> {
        let target = self.data.mount_dir(&cluster.name);
        let marker = self.image_marker(&cluster.name);
        if target.is_dir() {
            let mounted = tokio::fs::read_to_string(&marker).await.ok();
            match mounted.as_deref().map(str::trim) {
                Some(image) if image == cluster.image => {
                    tracing::debug!("Image of {} already mounted at {}", cluster.name, target.display());
                    return Ok(());
                }
                stale => {
                    tracing::info!(
                        "Dropping stale mount of {} ({})",
                        cluster.name,
                        stale.unwrap_or("unknown image")
                    );
                    tokio::fs::remove_dir_all(&target).await?;
                }
            }
        }

        let source = self.data.images_dir().join(image_dir_name(&cluster.image));
        tracing::info!("Mounting {} at {}", cluster.image, target.display());
        tokio::task::spawn_blocking(move || copy_dir(&source, &target))
            .await
            .map_err(|e| KfError::Internal(format!("image mount task failed: {}", e)))??;

        if let Some(parent) = marker.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&marker, &cluster.image).await?;
        Ok(())
    }

    async fn unmount_image(&self, cluster: &Cluster) -> Result<(), KfError> {
        for removed in [
            tokio::fs::remove_dir_all(self.data.mount_dir(&cluster.name)).await,
            tokio::fs::remove_file(self.image_marker(&cluster.name)).await,
        ] {
            if let Err(e) = removed {
                if e.kind() != io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}
