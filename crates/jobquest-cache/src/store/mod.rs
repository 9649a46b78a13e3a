//! Backing key/value stores with TTL semantics.
//!
//! ## Store Modes
//!
//! - **Local**: [`MemoryStore`], a per-process DashMap
//! - **Redis**: [`RedisStore`], shared across instances
//! - **Tiered**: [`TieredStore`], DashMap (L1) in front of Redis (L2)
//!
//! ```text
//! GET → L1 (DashMap) → L2 (Redis) → authoritative fetch
//!          <1µs           ~5ms           ~50ms
//! ```
//!
//! ## Graceful Degradation
//!
//! If Redis is disabled or unreachable at startup, [`create_backing_store`] falls back to
//! the local tier. Failures after startup surface as [`StoreError`]s, which the
//! [`ProcessCache`](crate::ProcessCache) turns into misses.

mod memory;
mod redis_store;
mod tiered;

pub use memory::{CachedEntry, MemoryStore};
pub use redis_store::RedisStore;
pub use tiered::TieredStore;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;

use crate::config::{CacheConfig, RedisConfig};

/// Errors raised by a backing store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// No connection to the store could be obtained.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected or failed a command.
    #[error("store command failed: {0}")]
    Command(String),
}

/// Which tiers a store spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    Local,
    Redis,
    Tiered,
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Local => "local",
            Self::Redis => "redis",
            Self::Tiered => "tiered",
        };
        f.write_str(s)
    }
}

/// A key/value store with per-key TTL.
///
/// Each operation must be individually atomic; no ordering is guaranteed across calls.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Reads a key. Expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes a key that expires after `ttl`.
    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), StoreError>;

    /// Lists keys matching a glob pattern (`*` and `?`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Deletes keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> Result<usize, StoreError>;

    /// Deletes every key matching a glob pattern, returning how many existed.
    async fn del_matching(&self, pattern: &str) -> Result<usize, StoreError> {
        let keys = self.keys(pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.del(&keys).await
    }

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// The tiers this store spans.
    fn mode(&self) -> StoreMode;

    /// Number of entries held in process memory, if this store has a local tier.
    fn local_entries(&self) -> Option<usize> {
        None
    }
}

/// Type alias for a shared backing store.
pub type DynBackingStore = Arc<dyn BackingStore>;

/// The store chosen at startup plus the handles background tasks need.
pub struct StoreSetup {
    /// The store the ProcessCache reads and writes.
    pub store: DynBackingStore,
    /// The process-local tier.
    pub local: MemoryStore,
    /// The Redis pool, when Redis is enabled and reachable.
    pub redis: Option<Pool>,
}

impl fmt::Debug for StoreSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSetup")
            .field("mode", &self.store.mode())
            .field("redis", &self.redis.is_some())
            .finish()
    }
}

/// Builds the backing store from configuration.
///
/// Redis is used only when enabled and reachable; otherwise the local tier serves alone.
pub async fn create_backing_store(config: &CacheConfig) -> StoreSetup {
    let local = MemoryStore::with_max_entries(config.local_max_entries);

    let local_only = |local: MemoryStore| StoreSetup {
        store: Arc::new(local.clone()),
        local,
        redis: None,
    };

    if !config.redis.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return local_only(local);
    }

    tracing::info!(url = %config.redis.url, "Connecting to Redis");

    let pool = match create_redis_pool(&config.redis) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create Redis pool. Falling back to local cache.");
            return local_only(local);
        }
    };

    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            let remote = RedisStore::new(pool.clone());
            let tiered = TieredStore::new(local.clone(), remote, config.local_ttl());
            StoreSetup {
                store: Arc::new(tiered),
                local,
                redis: Some(pool),
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to connect to Redis. Falling back to local cache.");
            local_only(local)
        }
    }
}

/// Creates a Redis connection pool with the configured size and timeouts.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the URL or pool settings are invalid.
pub fn create_redis_pool(config: &RedisConfig) -> Result<Pool, StoreError> {
    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| StoreError::Unavailable(e.to_string()))
}

/// Glob match supporting `*` (any run) and `?` (any one char).
pub(crate) fn glob_match(pattern: &str, candidate: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let c: Vec<char> = candidate.chars().collect();
    let (mut pi, mut ci) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ci < c.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == c[ci]) {
            pi += 1;
            ci += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ci));
            pi += 1;
        } else if let Some((sp, sc)) = star {
            pi = sp + 1;
            ci = sc + 1;
            star = Some((sp, sc + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
