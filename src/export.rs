//! Document exporter – markup in, PDF bytes out, engine always released.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::engine::{EngineGuard, PrintOptions, RenderEngine};
use crate::error::ExportError;

pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// An exported certificate document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateArtifact {
    bytes: Vec<u8>,
}

impl CertificateArtifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Starts with the `%PDF-` magic.
    pub fn is_pdf(&self) -> bool {
        self.bytes.starts_with(b"%PDF-")
    }
}

pub struct DocumentExporter {
    engine: Arc<dyn RenderEngine>,
    options: PrintOptions,
    timeout: Duration,
    dump_path: Option<PathBuf>,
}

impl DocumentExporter {
    /// Certificate print options, default timeout, no dump.
    pub fn new(engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            engine,
            options: PrintOptions::certificate(),
            timeout: DEFAULT_EXPORT_TIMEOUT,
            dump_path: None,
        }
    }

    pub fn with_options(mut self, options: PrintOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Also write every exported document to `path`.
    pub fn with_dump_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump_path = Some(path.into());
        self
    }

    pub fn options(&self) -> &PrintOptions {
        &self.options
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Load `markup` into a fresh engine session and print it.
    ///
    /// The session is released on every path. When both the export and the
    /// release fail, the export error is returned.
    pub async fn export_document(&self, markup: &str) -> Result<CertificateArtifact, ExportError> {
        let started = Instant::now();
        let mut guard = EngineGuard::new(self.engine.launch().await?);

        let printed = tokio::time::timeout(self.timeout, async {
            let session = guard.session()?;
            session.set_content(markup).await?;
            session.print_to_pdf(&self.options).await
        })
        .await
        .unwrap_or(Err(ExportError::Timeout(self.timeout)));

        let bytes = match (printed, guard.release().await) {
            (Ok(bytes), Ok(())) => bytes,
            (Ok(_), Err(release)) => return Err(release),
            (Err(e), Ok(())) => return Err(e),
            (Err(e), Err(release)) => {
                error!("engine release failed after export error: {release}");
                return Err(e);
            }
        };

        if bytes.is_empty() {
            return Err(ExportError::EmptyOutput);
        }

        if let Some(path) = &self.dump_path {
            if let Err(e) = tokio::fs::write(path, &bytes).await {
                warn!("failed to dump document to {}: {e}", path.display());
            }
        }

        info!(
            "exported {} bytes with {} in {:?}",
            bytes.len(),
            self.engine.name(),
            started.elapsed()
        );
        Ok(CertificateArtifact::new(bytes))
    }
}
