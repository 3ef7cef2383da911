//! Local cluster image store
//!
//! A cluster image is a directory under `<data>/images`. Multi-platform
//! images hold one `<os>_<arch>[_<variant>]` subdirectory per platform;
//! single-platform images carry their rootfs at the top level.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use kf_core::config::DataDir;
use kf_core::error::ConfigError;
use kf_core::traits::{ImageService, Platform};
use kf_core::KfError;

use crate::platform;

/// Store directory name of an image reference
pub fn image_dir_name(image: &str) -> String {
    image
        .chars()
        .map(|c| match c {
            '/' | ':' | '@' => '_',
            c => c,
        })
        .collect()
}

/// Rootfs of `platform` inside an image or mount directory
///
/// Falls back to `dir` itself for single-platform images.
pub fn platform_rootfs(dir: &Path, target: &Platform) -> PathBuf {
    let candidate = dir.join(platform::dir_name(target));
    if candidate.is_dir() {
        candidate
    } else {
        dir.to_path_buf()
    }
}

/// [`ImageService`] over a directory of unpacked images
#[derive(Debug, Clone)]
pub struct LocalImageService {
    data: DataDir,
}

impl LocalImageService {
    pub fn new(data: DataDir) -> Self {
        Self { data }
    }

    /// Where `image` lives in the store
    pub fn image_dir(&self, image: &str) -> PathBuf {
        self.data.images_dir().join(image_dir_name(image))
    }
}

#[async_trait]
impl ImageService for LocalImageService {
    async fn pull_if_not_exist(&self, image: &str, platforms: &[Platform]) -> Result<(), KfError> {
        let dir = self.image_dir(image);
        if !dir.is_dir() {
            return Err(ConfigError::NotFound(dir).into());
        }
        let single_platform = dir.join(crate::runtime::kubernetes::METADATA_FILE).is_file();
        for target in platforms {
            let candidate = dir.join(platform::dir_name(target));
            if !candidate.is_dir() && !single_platform {
                return Err(ConfigError::Invalid(format!(
                    "image {} has no build for {}",
                    image, target
                ))
                .into());
            }
        }
        tracing::debug!("Image {} present at {}", image, dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amd64() -> Platform {
        platform::from_uname("x86_64")
    }

    fn arm64() -> Platform {
        platform::from_uname("aarch64")
    }

    #[tokio::test]
    async fn test_missing_image_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let images = LocalImageService::new(DataDir::new(dir.path()));
        let err = images
            .pull_if_not_exist("kubernetes:v1.22.8", &[amd64()])
            .await
            .unwrap_err();
        assert!(matches!(err, KfError::Config(ConfigError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_multi_platform_image_needs_every_platform() {
        let dir = tempfile::tempdir().unwrap();
        let images = LocalImageService::new(DataDir::new(dir.path()));
        let image_dir = images.image_dir("registry.local/kubernetes:v1.22.8");
        std::fs::create_dir_all(image_dir.join("linux_amd64")).unwrap();

        assert!(image_dir.ends_with("registry.local_kubernetes_v1.22.8"));
        images
            .pull_if_not_exist("registry.local/kubernetes:v1.22.8", &[amd64()])
            .await
            .unwrap();
        assert!(images
            .pull_if_not_exist("registry.local/kubernetes:v1.22.8", &[amd64(), arm64()])
            .await
            .is_err());
        assert_eq!(platform_rootfs(&image_dir, &amd64()), image_dir.join("linux_amd64"));
        assert_eq!(platform_rootfs(&image_dir, &arm64()), image_dir);
    }

    #[tokio::test]
    async fn test_single_platform_image_serves_any_platform() {
        let dir = tempfile::tempdir().unwrap();
        let images = LocalImageService::new(DataDir::new(dir.path()));
        let image_dir = images.image_dir("kubernetes:v1.22.8");
        std::fs::create_dir_all(&image_dir).unwrap();
        std::fs::write(image_dir.join("Metadata"), "{}").unwrap();

        images
            .pull_if_not_exist("kubernetes:v1.22.8", &[amd64(), arm64()])
            .await
            .unwrap();
    }
}
