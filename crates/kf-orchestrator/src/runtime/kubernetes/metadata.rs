use serde::{Deserialize, Serialize};
use std::path::Path;

use kf_core::error::ConfigError;
use kf_core::KfError;

/// Name of the metadata file at the root of a cluster image
pub const METADATA_FILE: &str = "Metadata";

/// Install information shipped with a cluster image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Kubernetes version the image installs
    pub version: String,

    #[serde(default)]
    pub arch: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    /// Overrides `version` for kubeadm when set
    #[serde(rename = "kubeVersion", default, skip_serializing_if = "Option::is_none")]
    pub kube_version: Option<String>,
}

impl Metadata {
    /// Read `<rootfs>/Metadata`
    pub fn load(rootfs: &Path) -> Result<Self, KfError> {
        let path = rootfs.join(METADATA_FILE);
        if !path.exists() {
            return Err(ConfigError::NotFound(path).into());
        }
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| {
            KfError::from(ConfigError::Invalid(format!("invalid {}: {}", path.display(), e)))
        })
    }

    /// The version kubeadm should target
    pub fn kubernetes_version(&self) -> Option<&str> {
        self.kube_version
            .as_deref()
            .or(Some(self.version.as_str()))
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_metadata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(METADATA_FILE),
            r#"{"version":"v1.22.8","arch":"amd64","kubeVersion":"v1.22.9"}"#,
        )
        .unwrap();

        let metadata = Metadata::load(dir.path()).unwrap();
        assert_eq!(metadata.arch, "amd64");
        assert_eq!(metadata.kubernetes_version(), Some("v1.22.9"));
    }

    #[test]
    fn test_missing_metadata_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Metadata::load(dir.path()),
            Err(KfError::Config(ConfigError::NotFound(_)))
        ));
    }
}
