//! Clusterfile persistence
//!
//! The applied state of every cluster lives in
//! `<data>/clusters/<name>/Clusterfile`. A later apply diffs the desired
//! cluster against it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{default_config_dir, load_config, save_config};
use crate::cluster::Cluster;
use crate::error::ConfigError;
use crate::plugin::PluginSpec;

/// Root of per-cluster data on every managed host
pub const REMOTE_DATA_ROOT: &str = "/var/lib/kforge/data";

const CLUSTERFILE_NAME: &str = "Clusterfile";

/// A cluster document: the cluster plus the plugins declared next to it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterFile {
    pub cluster: Cluster,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginSpec>,
}

impl ClusterFile {
    /// Wrap a cluster with no plugins
    pub fn new(cluster: Cluster) -> Self {
        Self {
            cluster,
            plugins: Vec::new(),
        }
    }

    /// Read and validate a Clusterfile
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file: ClusterFile = load_config(path)?;
        file.cluster.validate()?;
        Ok(file)
    }

    /// Write the document
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        save_config(path, self)
    }
}

/// Remote directory holding a cluster's rootfs on each host
pub fn remote_rootfs_dir(cluster_name: &str) -> String {
    format!("{}/{}/rootfs", REMOTE_DATA_ROOT, cluster_name)
}

/// Local kforge data directory layout
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl Default for DataDir {
    fn default() -> Self {
        Self::new(default_config_dir())
    }
}

impl DataDir {
    /// Use `root` as the data directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a cluster's persisted state
    pub fn cluster_dir(&self, name: &str) -> PathBuf {
        self.root.join("clusters").join(name)
    }

    /// Path of a cluster's persisted Clusterfile
    pub fn clusterfile(&self, name: &str) -> PathBuf {
        self.cluster_dir(name).join(CLUSTERFILE_NAME)
    }

    /// Where the cluster image is mounted locally
    pub fn mount_dir(&self, name: &str) -> PathBuf {
        self.root.join("mount").join(name)
    }

    /// Local image store
    pub fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    /// Scratch space
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Names of clusters with persisted state
    pub fn list_clusters(&self) -> std::io::Result<Vec<String>> {
        let dir = self.root.join("clusters");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.path().join(CLUSTERFILE_NAME).is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// The only persisted cluster, when exactly one exists
    pub fn default_cluster_name(&self) -> Result<String, ConfigError> {
        let names = self
            .list_clusters()
            .map_err(|e| ConfigError::Invalid(format!("Failed to list clusters: {}", e)))?;
        match names.as_slice() {
            [name] => Ok(name.clone()),
            [] => Err(ConfigError::Invalid(format!(
                "no cluster found under {}",
                self.root.display()
            ))),
            _ => Err(ConfigError::Invalid(format!(
                "multiple clusters found ({}), specify one by name",
                names.join(", ")
            ))),
        }
    }

    /// Persisted state of `name`, `None` when the cluster was never applied
    pub fn load_cluster(&self, name: &str) -> Result<Option<ClusterFile>, ConfigError> {
        let path = self.clusterfile(name);
        if !path.exists() {
            return Ok(None);
        }
        ClusterFile::load(&path).map(Some)
    }

    /// Persist a cluster document under its cluster name
    pub fn save_cluster(&self, file: &ClusterFile) -> Result<PathBuf, ConfigError> {
        if file.cluster.name.trim().is_empty() {
            return Err(ConfigError::EmptyClusterName);
        }
        let path = self.clusterfile(&file.cluster.name);
        file.save(&path)?;
        tracing::debug!("Saved cluster {} to {}", file.cluster.name, path.display());
        Ok(path)
    }

    /// Drop all persisted state of `name`
    pub fn remove_cluster(&self, name: &str) -> std::io::Result<()> {
        match std::fs::remove_dir_all(self.cluster_dir(name)) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{Host, SshConfig, CLUSTERFILE_ANNOTATION};
    use crate::plugin::Phase;
    use crate::types::Role;
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn sample() -> ClusterFile {
        let mut cluster = Cluster::new("prod", "kubernetes:v1.22.8");
        cluster.env = vec!["PodCIDR=100.64.0.0/10".into()];
        cluster.cmd_args = vec!["--skip-phases=addon/kube-proxy".into()];
        cluster.ssh = SshConfig {
            password: Some("secret".into()),
            ..Default::default()
        };
        cluster.set_annotation(CLUSTERFILE_ANNOTATION, "/root/Clusterfile");

        cluster
            .hosts
            .push(Host::new(vec![ip("192.168.0.2"), ip("192.168.0.3")], Role::Master));
        let mut nodes = Host::new(vec![ip("192.168.0.5")], Role::Node);
        nodes.ssh = Some(SshConfig {
            user: Some("ops".into()),
            port: Some(2222),
            ..Default::default()
        });
        nodes.env = vec!["Mode=iptables".into()];
        cluster.hosts.push(nodes);

        ClusterFile {
            cluster,
            plugins: vec![PluginSpec {
                name: "motd".into(),
                phases: vec![Phase::PostInstall],
                data: "echo hi > /etc/motd".into(),
                on: vec![Role::Node],
            }],
        }
    }

    #[test]
    fn test_clusterfile_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let original = sample();

        let path = data.save_cluster(&original).unwrap();
        assert_eq!(path, dir.path().join("clusters/prod/Clusterfile"));

        let loaded = data.load_cluster("prod").unwrap().unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_load_unknown_cluster_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        assert!(data.load_cluster("ghost").unwrap().is_none());
    }

    #[test]
    fn test_default_cluster_name() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        assert!(data.default_cluster_name().is_err());

        data.save_cluster(&sample()).unwrap();
        assert_eq!(data.default_cluster_name().unwrap(), "prod");

        let mut other = sample();
        other.cluster.name = "staging".into();
        data.save_cluster(&other).unwrap();
        assert!(data.default_cluster_name().is_err());
    }

    #[test]
    fn test_remove_cluster_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        data.save_cluster(&sample()).unwrap();
        data.remove_cluster("prod").unwrap();
        data.remove_cluster("prod").unwrap();
        assert!(data.list_clusters().unwrap().is_empty());
    }

    #[test]
    fn test_remote_rootfs_dir() {
        assert_eq!(remote_rootfs_dir("prod"), "/var/lib/kforge/data/prod/rootfs");
    }
}
