use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `PEOPLE_TABLES__TABLE__NAME=people`.
pub const ENV_PREFIX: &str = "PEOPLE_TABLES";

/// Base name of the optional configuration file (`people-tables.toml`).
pub const CONFIG_FILE_STEM: &str = "people-tables";

/// Main configuration structure for people-tables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PeopleTablesConfig {
    /// Storage account settings
    pub storage: StorageConfig,
    /// Table and partition the tutorial works in
    pub table: TableConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Azure Table storage (or the local emulator) over REST
    Azure,
    /// Process-local store, nothing leaves the machine
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Inline connection string; takes precedence over the named setting
    pub connection_string: Option<String>,
    /// Environment variable holding the connection string
    pub connection_string_setting: String,
    /// Per-request timeout; unset leaves the HTTP client's default
    pub request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TableConfig {
    pub name: String,
    /// Single partition shared by every customer row
    pub partition: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON log lines instead of plain text
    pub json: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Azure,
            connection_string: None,
            connection_string_setting: "AzureWebJobsStorage".to_string(),
            request_timeout_seconds: None,
        }
    }
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            name: "people".to_string(),
            partition: "My_Peoples_Partition".to_string(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            json: false,
        }
    }
}

impl StorageConfig {
    /// Resolve the connection string from the inline value or the named
    /// setting, looked up through `lookup`.
    pub fn resolve_connection_string_with<F>(&self, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.connection_string
            .clone()
            .or_else(|| lookup(&self.connection_string_setting))
            .filter(|value| !value.trim().is_empty())
    }

    /// Resolve the connection string against the process environment.
    pub fn resolve_connection_string(&self) -> Option<String> {
        self.resolve_connection_string_with(|name| std::env::var(name).ok())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_seconds.map(Duration::from_secs)
    }
}

impl PeopleTablesConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. `people-tables.toml` in the working directory
    /// 3. Environment variables (prefixed with PEOPLE_TABLES__)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same as [`PeopleTablesConfig::load`], reading the file from `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let mut builder = Config::builder();

        let file = dir.join(format!("{CONFIG_FILE_STEM}.toml"));
        if file.exists() {
            builder = builder.add_source(File::from(file.as_path()));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .with_context(|| format!("Failed to read configuration from {}", dir.display()))?;

        config
            .try_deserialize()
            .context("Configuration has invalid values")
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}
