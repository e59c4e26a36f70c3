//! Headless rendering engines.
//!
//! A [`RenderEngine`] launches an [`EngineSession`]. The session loads markup
//! and prints it to PDF. [`EngineGuard`] makes sure every launched session is
//! shut down exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};

use crate::dom::parse_document;
use crate::error::ExportError;
use crate::fonts::FontManager;
use crate::raster::lay_out;
use crate::render::render_pdf;

pub use crate::page_layout::PaperFormat;

/// Print settings handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintOptions {
    pub format: PaperFormat,
    pub landscape: bool,
    pub print_background: bool,
    /// Let an `@page { size }` rule override `format` / `landscape`.
    pub prefer_css_page_size: bool,
    /// PDF title; `<title>` is used when unset.
    pub title: Option<String>,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            format: PaperFormat::A4,
            landscape: false,
            print_background: false,
            prefer_css_page_size: false,
            title: None,
        }
    }
}

impl PrintOptions {
    /// A4 landscape, backgrounds on, CSS page size preferred.
    pub fn certificate() -> Self {
        Self {
            format: PaperFormat::A4,
            landscape: true,
            print_background: true,
            prefer_css_page_size: true,
            title: None,
        }
    }
}

/// One launched engine instance.
#[async_trait]
pub trait EngineSession: Send {
    async fn set_content(&mut self, markup: &str) -> Result<(), ExportError>;

    async fn print_to_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, ExportError>;

    /// Orderly shutdown.
    async fn close(&mut self) -> Result<(), ExportError>;

    /// Best-effort synchronous teardown, used when the session is dropped
    /// without being closed.
    fn abort(&mut self);
}

#[async_trait]
pub trait RenderEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn launch(&self) -> Result<Box<dyn EngineSession>, ExportError>;
}

/// Owns a session until [`EngineGuard::release`]; aborts it on drop otherwise.
pub struct EngineGuard {
    session: Option<Box<dyn EngineSession>>,
}

impl EngineGuard {
    pub fn new(session: Box<dyn EngineSession>) -> Self {
        Self {
            session: Some(session),
        }
    }

    pub fn session(&mut self) -> Result<&mut (dyn EngineSession + 'static), ExportError> {
        self.session.as_deref_mut().ok_or(ExportError::Released)
    }

    /// Close the session. Errors come back as [`ExportError::Release`].
    pub async fn release(mut self) -> Result<(), ExportError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        debug!("closing engine session");
        session.close().await.map_err(|e| match e {
            ExportError::Release(_) => e,
            other => ExportError::Release(other.to_string()),
        })
    }
}

impl Drop for EngineGuard {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            warn!("engine session dropped without release; aborting");
            session.abort();
        }
    }
}

/// The in-process rasterizer as an engine.
#[derive(Debug, Clone, Default)]
pub struct ForgeEngine {
    fonts: Arc<FontManager>,
}

impl ForgeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fonts(fonts: Arc<FontManager>) -> Self {
        Self { fonts }
    }
}

#[async_trait]
impl RenderEngine for ForgeEngine {
    fn name(&self) -> &str {
        "forge"
    }

    async fn launch(&self) -> Result<Box<dyn EngineSession>, ExportError> {
        debug!("launching forge session");
        Ok(Box::new(ForgeSession {
            fonts: Arc::clone(&self.fonts),
            markup: None,
            open: true,
            cancelled: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct ForgeSession {
    fonts: Arc<FontManager>,
    markup: Option<String>,
    open: bool,
    /// Set on close/abort. A print abandoned by a timeout keeps its blocking
    /// thread; it stops at the next phase boundary instead of encoding.
    cancelled: Arc<AtomicBool>,
}

impl ForgeSession {
    fn ensure_open(&self) -> Result<(), ExportError> {
        if self.open {
            Ok(())
        } else {
            Err(ExportError::Released)
        }
    }
}

#[async_trait]
impl EngineSession for ForgeSession {
    async fn set_content(&mut self, markup: &str) -> Result<(), ExportError> {
        self.ensure_open()?;
        if markup.trim().is_empty() {
            return Err(ExportError::Load("markup is empty".into()));
        }
        let doc = parse_document(markup).map_err(|e| ExportError::Load(e.to_string()))?;
        if doc.is_blank() {
            return Err(ExportError::Load("markup has no renderable content".into()));
        }
        self.markup = Some(markup.to_string());
        Ok(())
    }

    async fn print_to_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, ExportError> {
        self.ensure_open()?;
        let markup = self
            .markup
            .clone()
            .ok_or_else(|| ExportError::Load("no content loaded".into()))?;
        let options = options.clone();
        let fonts = Arc::clone(&self.fonts);
        let cancelled = Arc::clone(&self.cancelled);
        // Blocking work cannot be interrupted mid-phase; see `rasterize_unless_cancelled`.
        tokio::task::spawn_blocking(move || {
            rasterize_unless_cancelled(&markup, &options, &fonts, &cancelled)
        })
        .await
        .map_err(|e| ExportError::Print(e.to_string()))?
    }

    async fn close(&mut self) -> Result<(), ExportError> {
        self.ensure_open()?;
        self.open = false;
        self.markup = None;
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn abort(&mut self) {
        self.open = false;
        self.markup = None;
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Lay out, then encode, giving up between the two phases once the session
/// has been released.
fn rasterize_unless_cancelled(
    markup: &str,
    options: &PrintOptions,
    fonts: &FontManager,
    cancelled: &AtomicBool,
) -> Result<Vec<u8>, ExportError> {
    if cancelled.load(Ordering::SeqCst) {
        return Err(ExportError::Released);
    }
    let layout = lay_out(markup, options, fonts)?;
    if cancelled.load(Ordering::SeqCst) {
        debug!("session released during layout; skipping encode");
        return Err(ExportError::Released);
    }
    let pdf = render_pdf(&layout)?;
    debug!("rasterized {} page(s), {} bytes", layout.pages.len(), pdf.len());
    Ok(pdf)
}
