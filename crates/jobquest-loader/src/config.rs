//! Loader configuration.
//!
//! Configuration can be specified under the `[loader]` section of `jobquest.toml`.
//!
//! # Example Configuration
//!
//! ```toml
//! [loader]
//! batch_delay_ms = 1
//! max_batch_size = 1000
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Batched loader configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// How long the load that opened a batch waits, after yielding once, for more
    /// keys before sealing it. Zero seals right after the yield.
    /// Default: 1
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// A pending batch reaching this many keys is sealed and dispatched at once.
    /// Default: 1000
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_batch_delay_ms() -> u64 {
    1
}

fn default_max_batch_size() -> usize {
    1000
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: default_batch_delay_ms(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl LoaderConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_batch_size` is zero or the delay exceeds one second.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_size == 0 {
            return Err("loader.max_batch_size must be > 0".into());
        }
        if self.batch_delay_ms > 1000 {
            return Err("loader.batch_delay_ms must be <= 1000".into());
        }
        Ok(())
    }

    #[must_use]
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Validates the configured level.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown level name.
    pub fn validate(&self) -> Result<(), String> {
        let lvl = self.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.batch_delay(), Duration::from_millis(1));
        assert_eq!(config.max_batch_size, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config: LoaderConfig = toml::from_str("max_batch_size = 50").unwrap();
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.batch_delay_ms, 1);
    }

    #[test]
    fn test_validation() {
        let config = LoaderConfig {
            max_batch_size: 0,
            ..LoaderConfig::default()
        };
        assert!(config.validate().is_err());

        let logging = LoggingConfig {
            level: "verbose".into(),
        };
        assert!(logging.validate().is_err());
        assert!(LoggingConfig::default().validate().is_ok());
    }
}
