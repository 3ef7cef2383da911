//! Settings shared by every command

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use kf_core::config::{self, ClusterFile, ConfigFile, DataDir, RuntimeConfig};

/// Where state lives and how the runtime behaves
#[derive(Debug, Clone)]
pub struct Context {
    pub data: DataDir,
    pub config: RuntimeConfig,
}

impl Context {
    /// Load the tool configuration
    ///
    /// An explicitly given config file must exist. The default one is
    /// optional and falls back to built-in defaults.
    pub fn load(config_path: Option<&Path>, data_dir: Option<PathBuf>) -> Result<Self> {
        let file: ConfigFile = match config_path {
            Some(path) => config::load_config(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => {
                let path = config::default_config_path();
                if path.exists() {
                    config::load_config(&path)
                        .with_context(|| format!("Failed to load config from {}", path.display()))?
                } else {
                    tracing::debug!("No config at {}, using defaults", path.display());
                    ConfigFile::default()
                }
            }
        };

        Ok(Self {
            data: data_dir.map(DataDir::new).unwrap_or_default(),
            config: file.runtime,
        })
    }

    /// `name`, or the only cluster under the data directory
    pub fn cluster_name(&self, name: Option<&str>) -> Result<String> {
        match name {
            Some(name) => Ok(name.to_string()),
            None => Ok(self.data.default_cluster_name()?),
        }
    }

    /// Applied state of a cluster, which must exist
    pub fn current_cluster(&self, name: &str) -> Result<ClusterFile> {
        self.data
            .load_cluster(name)
            .with_context(|| format!("Failed to read state of cluster {}", name))?
            .with_context(|| format!("cluster {} has not been applied", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_core::{Cluster, Host, Role};

    #[test]
    fn test_missing_explicit_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Context::load(Some(&dir.path().join("nope.toml")), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_cluster_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[runtime]\nforce_delete = true\n").unwrap();
        let ctx = Context::load(Some(&path), Some(dir.path().join("data"))).unwrap();
        assert!(ctx.config.force_delete);
        assert!(ctx.cluster_name(None).is_err());
        assert!(ctx.current_cluster("prod").is_err());

        let mut cluster = Cluster::new("prod", "kubernetes:v1.22.8");
        cluster
            .hosts
            .push(Host::new(vec!["10.0.0.1".parse().unwrap()], Role::Master));
        ctx.data.save_cluster(&ClusterFile::new(cluster)).unwrap();

        assert_eq!(ctx.cluster_name(None).unwrap(), "prod");
        assert_eq!(ctx.cluster_name(Some("other")).unwrap(), "other");
        assert_eq!(ctx.current_cluster("prod").unwrap().cluster.name, "prod");
    }
}
