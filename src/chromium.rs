//! External headless Chromium as a [`RenderEngine`].
//!
//! Every session gets its own temporary profile directory. Printing writes the
//! markup into that directory and runs `chromium --headless --print-to-pdf`
//! against it. The CLI has no flags for orientation or background printing,
//! so both are injected as print CSS.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use tempfile::TempDir;
use tokio::process::Command;

use crate::dom::parse_document;
use crate::engine::{EngineSession, PrintOptions, RenderEngine};
use crate::error::ExportError;
use crate::page_layout::Orientation;
use crate::stylesheet::Stylesheet;

const PAGE_FILE: &str = "page.html";
const OUTPUT_FILE: &str = "output.pdf";

#[derive(Debug, Clone)]
pub struct ChromiumEngine {
    executable: PathBuf,
    extra_args: Vec<String>,
}

impl ChromiumEngine {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            extra_args: Vec::new(),
        }
    }

    /// Additional command-line switches passed on every print.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Resolve the executable: paths are checked directly, bare names are
    /// searched on `PATH`.
    fn resolve_executable(&self) -> Option<PathBuf> {
        if self.executable.components().count() > 1 {
            return self.executable.is_file().then(|| self.executable.clone());
        }
        let path = std::env::var_os("PATH")?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(&self.executable))
            .find(|candidate| candidate.is_file())
    }
}

#[async_trait]
impl RenderEngine for ChromiumEngine {
    fn name(&self) -> &str {
        "chromium"
    }

    async fn launch(&self) -> Result<Box<dyn EngineSession>, ExportError> {
        let executable = self.resolve_executable().ok_or_else(|| {
            ExportError::Launch(format!(
                "chromium executable {} not found",
                self.executable.display()
            ))
        })?;
        let profile = tempfile::Builder::new()
            .prefix("certify-chromium-")
            .tempdir()
            .map_err(|e| ExportError::Launch(format!("cannot create profile directory: {e}")))?;
        debug!(
            "chromium session at {} using {}",
            profile.path().display(),
            executable.display()
        );
        Ok(Box::new(ChromiumSession {
            executable,
            extra_args: self.extra_args.clone(),
            profile: Some(profile),
            markup: None,
        }))
    }
}

struct ChromiumSession {
    executable: PathBuf,
    extra_args: Vec<String>,
    profile: Option<TempDir>,
    markup: Option<String>,
}

impl ChromiumSession {
    fn profile_dir(&self) -> Result<&Path, ExportError> {
        self.profile
            .as_ref()
            .map(TempDir::path)
            .ok_or(ExportError::Released)
    }
}

#[async_trait]
impl EngineSession for ChromiumSession {
    async fn set_content(&mut self, markup: &str) -> Result<(), ExportError> {
        self.profile_dir()?;
        if markup.trim().is_empty() {
            return Err(ExportError::Load("markup is empty".into()));
        }
        self.markup = Some(markup.to_string());
        Ok(())
    }

    async fn print_to_pdf(&mut self, options: &PrintOptions) -> Result<Vec<u8>, ExportError> {
        let dir = self.profile_dir()?.to_path_buf();
        let markup = self
            .markup
            .as_deref()
            .ok_or_else(|| ExportError::Load("no content loaded".into()))?;

        let page = dir.join(PAGE_FILE);
        let output = dir.join(OUTPUT_FILE);
        tokio::fs::write(&page, inject_print_css(markup, options))
            .await
            .map_err(|e| ExportError::Load(format!("cannot stage markup: {e}")))?;

        let result = Command::new(&self.executable)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg(format!("--user-data-dir={}", dir.join("profile").display()))
            .arg("--no-pdf-header-footer")
            .arg(format!("--print-to-pdf={}", output.display()))
            .args(&self.extra_args)
            .arg(format!("file://{}", page.display()))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExportError::Print(format!("failed to run chromium: {e}")))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ExportError::Print(format!(
                "chromium exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }

        tokio::fs::read(&output)
            .await
            .map_err(|e| ExportError::Print(format!("chromium wrote no pdf: {e}")))
    }

    async fn close(&mut self) -> Result<(), ExportError> {
        let profile = self.profile.take().ok_or(ExportError::Released)?;
        self.markup = None;
        profile
            .close()
            .map_err(|e| ExportError::Release(format!("cannot remove profile: {e}")))
    }

    fn abort(&mut self) {
        self.markup = None;
        if let Some(profile) = self.profile.take() {
            if let Err(e) = profile.close() {
                warn!("failed to remove chromium profile: {e}");
            }
        }
    }
}

/// Add a `<style>` block carrying the print settings Chromium's CLI lacks.
///
/// The page size is left alone when the document declares its own
/// `@page { size }` and CSS sizes are preferred.
pub fn inject_print_css(markup: &str, options: &PrintOptions) -> String {
    // Chromium copes with documents too deep for the local parser; size them
    // from the options.
    let sources = parse_document(markup)
        .map(|doc| doc.style_sheets())
        .unwrap_or_default();
    let sheet = Stylesheet::from_sources(&sources);
    let keep_css_size = options.prefer_css_page_size && sheet.page.size.is_some();

    let mut css = String::new();
    if !keep_css_size {
        let orientation = if options.landscape {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        };
        let (w, h) = options.format.size_pt(orientation);
        css.push_str(&format!("@page {{ size: {w}pt {h}pt; }} "));
    }
    if options.print_background {
        css.push_str("* { -webkit-print-color-adjust: exact; print-color-adjust: exact; }");
    }
    if css.is_empty() {
        return markup.to_string();
    }

    let block = format!("<style>{}</style>", css.trim_end());
    match markup.to_ascii_lowercase().find("</head>") {
        Some(at) => format!("{}{}{}", &markup[..at], block, &markup[at..]),
        None => format!("{block}{markup}"),
    }
}
