//! Bundled resources: the certificate template and the medal image.
//!
//! The renderer never touches the filesystem directly; it asks a
//! [`ResourceLoader`], so deployments can read from disk and tests can hand
//! over fixtures.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ResourceError;

pub const DEFAULT_TEMPLATE_PATH: &str = "assets/certificate.hbs";
pub const DEFAULT_MEDAL_PATH: &str = "assets/selo.png";

#[async_trait]
pub trait ResourceLoader: Send + Sync {
    async fn load_template(&self) -> Result<String, ResourceError>;
    async fn load_medal(&self) -> Result<Vec<u8>, ResourceError>;
}

/// Reads the two resources from a deployment root on every call.
#[derive(Debug, Clone)]
pub struct BundleResources {
    root: PathBuf,
    template: PathBuf,
    medal: PathBuf,
}

impl BundleResources {
    /// Resources at their default relative paths under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_paths(root, DEFAULT_TEMPLATE_PATH, DEFAULT_MEDAL_PATH)
    }

    pub fn with_paths(
        root: impl Into<PathBuf>,
        template: impl Into<PathBuf>,
        medal: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            template: template.into(),
            medal: medal.into(),
        }
    }

    pub fn template_path(&self) -> PathBuf {
        self.root.join(&self.template)
    }

    pub fn medal_path(&self) -> PathBuf {
        self.root.join(&self.medal)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ResourceError {
    if source.kind() == ErrorKind::NotFound {
        ResourceError::NotFound {
            path: path.to_path_buf(),
        }
    } else {
        ResourceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl ResourceLoader for BundleResources {
    async fn load_template(&self) -> Result<String, ResourceError> {
        let path = self.template_path();
        log::debug!("loading template from {}", path.display());
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(&path, e))
    }

    async fn load_medal(&self) -> Result<Vec<u8>, ResourceError> {
        let path = self.medal_path();
        log::debug!("loading medal from {}", path.display());
        tokio::fs::read(&path).await.map_err(|e| io_error(&path, e))
    }
}

/// The default template and medal compiled into the binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedResources;

const EMBEDDED_TEMPLATE: &str = include_str!("../assets/certificate.hbs");
const EMBEDDED_MEDAL: &[u8] = include_bytes!("../assets/selo.png");

#[async_trait]
impl ResourceLoader for EmbeddedResources {
    async fn load_template(&self) -> Result<String, ResourceError> {
        Ok(EMBEDDED_TEMPLATE.to_string())
    }

    async fn load_medal(&self) -> Result<Vec<u8>, ResourceError> {
        Ok(EMBEDDED_MEDAL.to_vec())
    }
}

/// Fixed in-memory resources.
#[derive(Debug, Clone, Default)]
pub struct StaticResources {
    pub template: String,
    pub medal: Vec<u8>,
}

impl StaticResources {
    pub fn new(template: impl Into<String>, medal: impl Into<Vec<u8>>) -> Self {
        Self {
            template: template.into(),
            medal: medal.into(),
        }
    }
}

#[async_trait]
impl ResourceLoader for StaticResources {
    async fn load_template(&self) -> Result<String, ResourceError> {
        Ok(self.template.clone())
    }

    async fn load_medal(&self) -> Result<Vec<u8>, ResourceError> {
        Ok(self.medal.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bundle_reads_from_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join(DEFAULT_TEMPLATE_PATH), "<p>{{name}}</p>").unwrap();
        std::fs::write(dir.path().join(DEFAULT_MEDAL_PATH), [1u8, 2, 3]).unwrap();

        let res = BundleResources::new(dir.path());
        assert_eq!(res.load_template().await.unwrap(), "<p>{{name}}</p>");
        assert_eq!(res.load_medal().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn missing_medal_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let res = BundleResources::new(dir.path());
        match res.load_medal().await {
            Err(ResourceError::NotFound { path }) => {
                assert!(path.ends_with(DEFAULT_MEDAL_PATH));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn embedded_medal_is_a_png() {
        let medal = EmbeddedResources.load_medal().await.unwrap();
        assert!(medal.starts_with(b"\x89PNG\r\n\x1a\n"));
        let template = EmbeddedResources.load_template().await.unwrap();
        assert!(template.contains("{{name}}"));
    }
}
