//! Deployment settings, loaded from TOML.
//!
//! Every field has a default, so an empty file describes a working local
//! setup: embedded resources, a SQLite ledger, a local object store and the
//! in-process engine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ledger::{validate_table_name, DEFAULT_TABLE};
use crate::publish::{validate_key, ObjectAcl};
use crate::resources::{DEFAULT_MEDAL_PATH, DEFAULT_TEMPLATE_PATH};

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub resources: ResourceSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub export: ExportSettings,
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_table_name(&self.ledger.table)
            .map_err(|e| ConfigError::Invalid(format!("ledger.table: {e}")))?;
        validate_key(&self.storage.bucket).map_err(|_| {
            ConfigError::Invalid(format!(
                "storage.bucket {:?} is not a valid bucket name",
                self.storage.bucket
            ))
        })?;
        if self.export.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "export.timeout_secs must be positive".into(),
            ));
        }
        if matches!(&self.storage.public_base_url, Some(url) if url.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "storage.public_base_url must not be empty".into(),
            ));
        }
        if self.export.engine == EngineKind::Chromium
            && self.export.chromium_path.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid("export.chromium_path must be set".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceSource {
    /// Template and medal compiled into the binary.
    #[default]
    Embedded,
    /// Read from `root` on every request.
    Bundle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSettings {
    #[serde(default)]
    pub source: ResourceSource,

    #[serde(default = "default_resource_root")]
    pub root: PathBuf,

    #[serde(default = "default_template")]
    pub template: PathBuf,

    #[serde(default = "default_medal")]
    pub medal: PathBuf,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            source: ResourceSource::default(),
            root: default_resource_root(),
            template: default_template(),
            medal: default_medal(),
        }
    }
}

fn default_resource_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_template() -> PathBuf {
    PathBuf::from(DEFAULT_TEMPLATE_PATH)
}

fn default_medal() -> PathBuf {
    PathBuf::from(DEFAULT_MEDAL_PATH)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default)]
    pub backend: LedgerBackend,

    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,

    #[serde(default = "default_table")]
    pub table: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            path: default_ledger_path(),
            table: default_table(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("certificates.sqlite")
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default = "default_storage_root")]
    pub root: PathBuf,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    #[serde(default)]
    pub acl: ObjectAcl,

    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            root: default_storage_root(),
            bucket: default_bucket(),
            acl: ObjectAcl::default(),
            public_base_url: None,
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("storage")
}

fn default_bucket() -> String {
    "mw-s3-storage".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Forge,
    Chromium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    #[serde(default)]
    pub engine: EngineKind,

    #[serde(default = "default_chromium_path")]
    pub chromium_path: PathBuf,

    /// Extra switches for every Chromium print, e.g. `--font-render-hinting=none`.
    #[serde(default)]
    pub chromium_args: Vec<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Also write each exported document here.
    #[serde(default)]
    pub dump_path: Option<PathBuf>,
}

impl ExportSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            engine: EngineKind::default(),
            chromium_path: default_chromium_path(),
            chromium_args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            dump_path: None,
        }
    }
}

fn default_chromium_path() -> PathBuf {
    PathBuf::from("chromium")
}

const fn default_timeout_secs() -> u64 {
    30
}
