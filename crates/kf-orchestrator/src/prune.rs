//! Data directory cleanup

use std::io;
use std::path::PathBuf;

use kf_core::config::DataDir;

/// Selects leftovers under the data directory
pub trait Pruner {
    /// Paths that can be removed
    fn select(&self) -> io::Result<Vec<PathBuf>>;

    /// What the pruner is about to remove
    fn message(&self) -> &'static str;

    /// Remove the selection, returning what was deleted
    fn prune(&self) -> io::Result<Vec<PathBuf>> {
        let trash = self.select()?;
        for path in &trash {
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(path)
            } else {
                std::fs::remove_file(path)
            };
            match removed {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => tracing::debug!("Pruned {}", path.display()),
            }
        }
        Ok(trash)
    }
}

fn entries(dir: PathBuf) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    paths.sort();
    Ok(paths)
}

/// Image mounts of clusters that are gone
pub struct MountPrune {
    data: DataDir,
}

impl MountPrune {
    pub fn new(data: DataDir) -> Self {
        Self { data }
    }
}

impl Pruner for MountPrune {
    fn select(&self) -> io::Result<Vec<PathBuf>> {
        let mut orphans = Vec::new();
        for path in entries(self.data.root().join("mount"))? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !self.data.clusterfile(&name).is_file() {
                orphans.push(path);
            }
        }
        Ok(orphans)
    }

    fn message(&self) -> &'static str {
        "Pruning image mounts of deleted clusters"
    }
}

/// Scratch files
pub struct TmpPrune {
    data: DataDir,
}

impl TmpPrune {
    pub fn new(data: DataDir) -> Self {
        Self { data }
    }
}

impl Pruner for TmpPrune {
    fn select(&self) -> io::Result<Vec<PathBuf>> {
        entries(self.data.tmp_dir())
    }

    fn message(&self) -> &'static str {
        "Pruning temporary files"
    }
}

/// Every pruner, in the order `alpha prune` runs them
pub fn pruners(data: &DataDir) -> Vec<Box<dyn Pruner>> {
    vec![
        Box::new(MountPrune::new(data.clone())),
        Box::new(TmpPrune::new(data.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_core::config::ClusterFile;
    use kf_core::{Cluster, Host, Role};

    #[test]
    fn test_mount_prune_keeps_live_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        let mut live = Cluster::new("live", "kubernetes:v1.22.8");
        live.hosts
            .push(Host::new(vec!["10.0.0.1".parse().unwrap()], Role::Master));
        data.save_cluster(&ClusterFile::new(live)).unwrap();
        std::fs::create_dir_all(data.mount_dir("live")).unwrap();
        std::fs::create_dir_all(data.mount_dir("gone").join("rootfs")).unwrap();

        let removed = MountPrune::new(data.clone()).prune().unwrap();
        assert_eq!(removed, vec![data.mount_dir("gone")]);
        assert!(data.mount_dir("live").is_dir());
        assert!(!data.mount_dir("gone").exists());
    }

    #[test]
    fn test_tmp_prune_empties_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataDir::new(dir.path());
        std::fs::create_dir_all(data.tmp_dir().join("build")).unwrap();
        std::fs::write(data.tmp_dir().join("sea.hub.crt"), "pem").unwrap();

        let pruner = TmpPrune::new(data.clone());
        assert_eq!(pruner.prune().unwrap().len(), 2);
        assert!(pruner.select().unwrap().is_empty());
        assert!(data.tmp_dir().is_dir());
    }

    #[test]
    fn test_missing_dirs_select_nothing() {
        let dir = tempfile::tempdir().unwrap();
        for pruner in pruners(&DataDir::new(dir.path().join("absent"))) {
            assert!(pruner.prune().unwrap().is_empty());
        }
    }
}
