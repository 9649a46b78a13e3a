//! Aggregated data-layer settings.
//!
//! Sources, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. `jobquest.toml` (or the path given to [`Settings::load`])
//! 3. Environment variables, e.g. `JOBQUEST__CACHE__REDIS__URL=redis://cache:6379`

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use jobquest_cache::CacheConfig;
use jobquest_metrics::MetricsConfig;
use serde::{Deserialize, Serialize};

use crate::config::{LoaderConfig, LoggingConfig};
use crate::error::SettingsError;

const DEFAULT_CONFIG_FILE: &str = "jobquest.toml";

/// Every section of the data-layer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Loads settings from an optional TOML file plus `JOBQUEST__*` overrides.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] if a source cannot be parsed or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        let path = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);
        if path.exists() {
            builder = builder.add_source(File::from(path));
        }
        // Environment variable overrides, e.g., JOBQUEST__LOADER__MAX_BATCH_SIZE=500
        builder = builder.add_source(
            Environment::with_prefix("JOBQUEST")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.loader.validate().map_err(SettingsError::Invalid)?;
        self.cache.validate().map_err(SettingsError::Invalid)?;
        self.metrics.validate().map_err(SettingsError::Invalid)?;
        self.logging.validate().map_err(SettingsError::Invalid)?;
        Ok(())
    }
}

/// Loads a `.env` file if present. A missing file is not an error.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound) {
            tracing::warn!(error = %e, "Failed to load .env file");
        }
    }
}
