//! Metrics configuration.
//!
//! Configuration can be specified under the `[metrics]` section of `jobquest.toml`
//! or through `JOBQUEST__METRICS__*` environment variables.
//!
//! # Example Configuration
//!
//! ```toml
//! [metrics]
//! history_size = 1000
//! window_size = 100
//! sample_interval_secs = 30
//! prometheus = false
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Metrics recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Maximum number of cache operations kept in the rolling history.
    /// Default: 1000
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Size of each per-bucket rolling window (batch timings per entity kind,
    /// hit-rate series).
    /// Default: 100
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Number of most recent cache operations a hit-rate series point covers.
    /// Default: 50
    #[serde(default = "default_hit_rate_span")]
    pub hit_rate_span: usize,

    /// Interval between host CPU/memory samples, in seconds.
    /// Default: 30
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,

    /// Number of host samples retained.
    /// Default: 60
    #[serde(default = "default_system_samples")]
    pub system_samples: usize,

    /// Install the Prometheus recorder at startup.
    /// Default: false
    #[serde(default)]
    pub prometheus: bool,
}

fn default_history_size() -> usize {
    1000
}

fn default_window_size() -> usize {
    100
}

fn default_hit_rate_span() -> usize {
    50
}

fn default_sample_interval_secs() -> u64 {
    30
}

fn default_system_samples() -> usize {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            window_size: default_window_size(),
            hit_rate_span: default_hit_rate_span(),
            sample_interval_secs: default_sample_interval_secs(),
            system_samples: default_system_samples(),
            prometheus: false,
        }
    }
}

impl MetricsConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any bound is zero.
    pub fn validate(&self) -> Result<(), String> {
        if self.history_size == 0 {
            return Err("metrics.history_size must be > 0".into());
        }
        if self.window_size == 0 {
            return Err("metrics.window_size must be > 0".into());
        }
        if self.hit_rate_span == 0 {
            return Err("metrics.hit_rate_span must be > 0".into());
        }
        if self.sample_interval_secs == 0 {
            return Err("metrics.sample_interval_secs must be > 0".into());
        }
        if self.system_samples == 0 {
            return Err("metrics.system_samples must be > 0".into());
        }
        Ok(())
    }

    /// Interval between host samples.
    #[must_use]
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }
}
