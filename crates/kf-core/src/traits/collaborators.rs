//! Collaborators the orchestrator consumes
//!
//! Image pulling, mounting and certificate handling live outside the
//! lifecycle core. The orchestrator only sees these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::cluster::Cluster;
use crate::error::KfError;

/// Target platform of an image
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Platform of the machine running kforge
    pub fn current() -> Self {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Self {
            os: std::env::consts::OS.to_string(),
            arch: arch.to_string(),
            variant: None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Makes cluster images available locally
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Pull `image` for every platform unless already present
    async fn pull_if_not_exist(&self, image: &str, platforms: &[Platform]) -> Result<(), KfError>;
}

/// Mounts cluster images locally and their rootfs on hosts
#[async_trait]
pub trait ClusterMounter: Send + Sync {
    /// Distribute the rootfs to `hosts`, running its init script when `init`
    async fn mount_rootfs(&self, cluster: &Cluster, hosts: &[IpAddr], init: bool)
        -> Result<(), KfError>;

    /// Clean and remove the rootfs from `hosts`
    async fn unmount_rootfs(&self, cluster: &Cluster, hosts: &[IpAddr]) -> Result<(), KfError>;

    /// Mount the cluster image locally
    async fn mount_image(&self, cluster: &Cluster) -> Result<(), KfError>;

    /// Release the local image mount
    async fn unmount_image(&self, cluster: &Cluster) -> Result<(), KfError>;
}

/// What a certificate is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDescriptor {
    pub common_name: String,
    pub dns_names: Vec<String>,
    pub ips: Vec<IpAddr>,
    pub days: u32,
    /// Directory the pair is written to
    pub output_dir: String,
}

/// Generates and distributes certificates
#[async_trait]
pub trait CertService: Send + Sync {
    /// Issue a certificate, returning the certificate and key locations
    async fn generate(&self, descriptor: &CertificateDescriptor)
        -> Result<(PathBuf, PathBuf), KfError>;

    /// Distribute the registry certificate to `hosts`
    async fn send(&self, hosts: &[IpAddr]) -> Result<(), KfError>;
}
