//! Cache configuration.
//!
//! Configuration can be specified under the `[cache]` section of `jobquest.toml`
//! or through `JOBQUEST__CACHE__*` environment variables.
//!
//! # Example Configuration
//!
//! ```toml
//! [cache]
//! app_prefix = "jobquest"
//! local_ttl_secs = 60
//!
//! [cache.ttl_overrides]
//! search = 120
//!
//! [cache.redis]
//! enabled = true
//! url = "redis://localhost:6379"
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::namespace::Namespace;

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// First segment of every cache key.
    /// Default: "jobquest"
    #[serde(default = "default_app_prefix")]
    pub app_prefix: String,

    /// Per-namespace TTL overrides in seconds.
    #[serde(default)]
    pub ttl_overrides: HashMap<String, u64>,

    /// Upper bound on how long an entry stays in the local (L1) tier when Redis is
    /// enabled. Shorter values shrink the window in which instances disagree.
    /// Default: 60
    #[serde(default = "default_local_ttl_secs")]
    pub local_ttl_secs: u64,

    /// Local (L1) cache max entries.
    /// Default: 10000
    #[serde(default = "default_local_max_entries")]
    pub local_max_entries: usize,

    /// Shared (L2) tier.
    #[serde(default)]
    pub redis: RedisConfig,
}

fn default_app_prefix() -> String {
    "jobquest".to_string()
}

fn default_local_ttl_secs() -> u64 {
    60
}

fn default_local_max_entries() -> usize {
    10000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            app_prefix: default_app_prefix(),
            ttl_overrides: HashMap::new(),
            local_ttl_secs: default_local_ttl_secs(),
            local_max_entries: default_local_max_entries(),
            redis: RedisConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.app_prefix.is_empty() || self.app_prefix.contains(':') {
            return Err("cache.app_prefix must be non-empty and contain no ':'".into());
        }
        for (ns, secs) in &self.ttl_overrides {
            if Namespace::new(ns.clone()).is_err() {
                return Err(format!("cache.ttl_overrides: invalid namespace '{ns}'"));
            }
            if *secs == 0 {
                return Err(format!("cache.ttl_overrides.{ns} must be > 0"));
            }
        }
        if self.local_ttl_secs == 0 {
            return Err("cache.local_ttl_secs must be > 0".into());
        }
        if self.local_max_entries == 0 {
            return Err("cache.local_max_entries must be > 0".into());
        }
        self.redis.validate()
    }

    /// Maximum lifetime of an L1 entry in tiered mode.
    #[must_use]
    pub fn local_ttl(&self) -> Duration {
        Duration::from_secs(self.local_ttl_secs)
    }
}

/// Redis configuration for the shared tier and cross-instance invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (single-instance deployments)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

impl RedisConfig {
    fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if !(self.url.starts_with("redis://") || self.url.starts_with("rediss://")) {
            return Err("cache.redis.url must start with redis:// or rediss://".into());
        }
        if self.pool_size == 0 {
            return Err("cache.redis.pool_size must be > 0".into());
        }
        if self.timeout_ms == 0 {
            return Err("cache.redis.timeout_ms must be > 0".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.app_prefix, "jobquest");
        assert_eq!(config.local_ttl(), Duration::from_secs(60));
        assert!(!config.redis.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            app_prefix = "jq"
            local_ttl_secs = 5

            [ttl_overrides]
            search = 30

            [redis]
            enabled = true
            url = "redis://cache:6379"
        "#;

        let config: CacheConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.app_prefix, "jq");
        assert_eq!(config.ttl_overrides.get("search"), Some(&30));
        assert_eq!(config.local_max_entries, 10000);
        assert!(config.redis.enabled);
        assert_eq!(config.redis.pool_size, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CacheConfig {
            app_prefix: "job:quest".into(),
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());

        config.app_prefix = "jobquest".into();
        config.ttl_overrides.insert("bad ns".into(), 10);
        assert!(config.validate().is_err());

        config.ttl_overrides.clear();
        config.redis.enabled = true;
        config.redis.url = "http://localhost".into();
        assert!(config.validate().is_err());
    }
}
