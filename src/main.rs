//! certify – issue certificates, or convert a markup file to PDF.
//!
//! Usage:
//!   certify [--config certify.toml] issue --id 123 --name Maria --grade B
//!   certify issue --body '{"id":"123","name":"Maria","grade":"B"}'
//!   echo '{...}' | certify issue
//!   certify render <input.html> [output.pdf] [--portrait] [--no-background] [--layout layout.json]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use cert_forge::config::Settings;
use cert_forge::engine::{ForgeEngine, PrintOptions};
use cert_forge::fonts::FontManager;
use cert_forge::issuer::CertificateIssuer;
use cert_forge::raster::lay_out;
use cert_forge::{DocumentExporter, ExportError};

#[derive(Parser, Debug)]
#[command(name = "certify")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full issuing pipeline for one request
    Issue {
        #[arg(long, requires_all = ["name", "grade"], conflicts_with = "body")]
        id: Option<String>,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        grade: Option<String>,

        /// Raw JSON request body; read from stdin when no request flags are given
        #[arg(long)]
        body: Option<String>,
    },

    /// Convert a markup file to PDF with the in-process engine
    Render {
        input: PathBuf,

        /// Output path (default: input with a .pdf extension)
        output: Option<PathBuf>,

        #[arg(long)]
        portrait: bool,

        #[arg(long)]
        no_background: bool,

        /// Also write the computed page layout as JSON
        #[arg(long)]
        layout: Option<PathBuf>,

        /// Document title (default: <title>, else the input stem)
        #[arg(short, long)]
        title: Option<String>,
    },
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    process::exit(1);
}

fn load_settings(path: Option<&Path>) -> Settings {
    match path {
        Some(path) => Settings::from_file(path).unwrap_or_else(|e| fail(e)),
        None => Settings::default(),
    }
}

async fn issue(
    settings: &Settings,
    id: Option<String>,
    name: Option<String>,
    grade: Option<String>,
    body: Option<String>,
) {
    let body = match (id, body) {
        (Some(id), _) => json!({ "id": id, "name": name, "grade": grade }).to_string(),
        (None, Some(body)) => body,
        (None, None) => {
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                fail(format!("reading request from stdin: {e}"));
            }
            buf
        }
    };

    let issuer = CertificateIssuer::from_settings(settings).unwrap_or_else(|e| fail(e));
    let response = issuer.handle(&body).await;
    match serde_json::to_string(&response) {
        Ok(json) => println!("{json}"),
        Err(e) => fail(e),
    }
    if !response.is_success() {
        process::exit(2);
    }
}

async fn render(
    input: &Path,
    output: Option<PathBuf>,
    portrait: bool,
    no_background: bool,
    layout_path: Option<PathBuf>,
    title: Option<String>,
) {
    let output = output.unwrap_or_else(|| input.with_extension("pdf"));
    let markup = std::fs::read_to_string(input)
        .unwrap_or_else(|e| fail(format!("reading '{}': {e}", input.display())));

    let default_title = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("certificate")
        .to_string();
    let options = PrintOptions {
        landscape: !portrait,
        print_background: !no_background,
        title: title.or_else(|| (!markup.contains("<title")).then_some(default_title)),
        ..PrintOptions::certificate()
    };

    let fonts = Arc::new(FontManager::default());
    if let Some(path) = &layout_path {
        let layout = lay_out(&markup, &options, &fonts)
            .unwrap_or_else(|e| fail(ExportError::from(e)));
        if let Err(e) = std::fs::write(path, layout.to_json()) {
            fail(format!("writing '{}': {e}", path.display()));
        }
    }

    let exporter =
        DocumentExporter::new(Arc::new(ForgeEngine::with_fonts(fonts))).with_options(options);
    let artifact = exporter
        .export_document(&markup)
        .await
        .unwrap_or_else(|e| fail(format!("generating PDF: {e}")));

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                fail(format!("creating output directory: {e}"));
            }
        }
    }
    if let Err(e) = std::fs::write(&output, artifact.bytes()) {
        fail(format!("writing '{}': {e}", output.display()));
    }
    eprintln!("Wrote '{}' ({} bytes)", output.display(), artifact.len());
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Issue {
            id,
            name,
            grade,
            body,
        } => {
            let settings = load_settings(cli.config.as_deref());
            issue(&settings, id, name, grade, body).await;
        }
        Commands::Render {
            input,
            output,
            portrait,
            no_background,
            layout,
            title,
        } => render(&input, output, portrait, no_background, layout, title).await,
    }
}
