//! Error taxonomy for the issuing pipeline.
//!
//! Every stage has its own error type; [`CertificateError`] aggregates them and
//! maps each class to a stable code and transport status.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// One rejected request field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldProblem {
    pub field: &'static str,
    pub reason: String,
}

/// The request could not be turned into a [`crate::request::ValidRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid request: {}", describe(.problems))]
pub struct ValidationError {
    pub problems: Vec<FieldProblem>,
}

fn describe(problems: &[FieldProblem]) -> String {
    problems
        .iter()
        .map(|p| format!("{} {}", p.field, p.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn single(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            problems: vec![FieldProblem {
                field,
                reason: reason.into(),
            }],
        }
    }

    pub fn mentions(&self, field: &str) -> bool {
        self.problems.iter().any(|p| p.field == field)
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),

    #[error("ledger query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid ledger table name {0:?}")]
    InvalidTable(String),
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read resource {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("malformed template tag at byte {offset}")]
    Syntax { offset: usize },

    #[error("template references unknown variable `{0}`")]
    UnknownVariable(String),
}

/// Failures inside the in-process rasterizer.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("markup has no renderable content")]
    EmptyDocument,

    #[error("markup nests deeper than {limit} elements")]
    TooDeep { limit: usize },

    #[error("layout failed: {0}")]
    Layout(String),

    #[error("pdf encoding failed: {0}")]
    Encode(String),
}

impl From<taffy::TaffyError> for RasterError {
    fn from(e: taffy::TaffyError) -> Self {
        RasterError::Layout(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("engine failed to launch: {0}")]
    Launch(String),

    #[error("page failed to load: {0}")]
    Load(String),

    #[error("document export failed: {0}")]
    Print(String),

    #[error("export exceeded {0:?}")]
    Timeout(Duration),

    #[error("engine session already released")]
    Released,

    #[error("engine failed to shut down: {0}")]
    Release(String),

    #[error("engine produced an empty document")]
    EmptyOutput,

    #[error(transparent)]
    Raster(#[from] RasterError),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("object store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Any failure of the issuing pipeline.
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("render error: {0}")]
    Export(#[from] ExportError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl CertificateError {
    /// Stable machine-readable code for the error class.
    pub fn code(&self) -> &'static str {
        match self {
            CertificateError::Validation(_) => "VALIDATION_FAILED",
            CertificateError::Ledger(_) => "LEDGER_UNAVAILABLE",
            CertificateError::Resource(_) => "RESOURCE_MISSING",
            CertificateError::Template(_) => "TEMPLATE_INVALID",
            CertificateError::Export(_) => "RENDER_FAILED",
            CertificateError::Publish(_) => "PUBLISH_FAILED",
            CertificateError::Config(_) => "CONFIG_INVALID",
        }
    }

    /// HTTP-equivalent status surfaced to the caller.
    pub fn status_code(&self) -> u16 {
        match self {
            CertificateError::Validation(_) => 400,
            CertificateError::Ledger(_) => 503,
            CertificateError::Export(ExportError::Timeout(_)) => 504,
            CertificateError::Publish(_) => 502,
            CertificateError::Resource(_)
            | CertificateError::Template(_)
            | CertificateError::Export(_)
            | CertificateError::Config(_) => 500,
        }
    }
}

pub type Result<T, E = CertificateError> = core::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_every_field() {
        let err = ValidationError {
            problems: vec![
                FieldProblem {
                    field: "id",
                    reason: "is required".into(),
                },
                FieldProblem {
                    field: "grade",
                    reason: "must not be blank".into(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "invalid request: id is required; grade must not be blank"
        );
        assert!(err.mentions("grade"));
        assert!(!err.mentions("name"));
    }

    #[test]
    fn codes_are_distinct_per_class() {
        let errors = [
            CertificateError::from(ValidationError::single("id", "is required")),
            CertificateError::from(LedgerError::Unavailable("down".into())),
            CertificateError::from(ResourceError::NotFound {
                path: PathBuf::from("assets/selo.png"),
            }),
            CertificateError::from(TemplateError::UnknownVariable("x".into())),
            CertificateError::from(ExportError::Launch("no binary".into())),
            CertificateError::from(PublishError::InvalidKey("../x".into())),
            CertificateError::from(ConfigError::Invalid("bad".into())),
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let err = CertificateError::from(ExportError::Timeout(Duration::from_secs(3)));
        assert_eq!(err.status_code(), 504);
        assert_eq!(err.code(), "RENDER_FAILED");
    }
}
