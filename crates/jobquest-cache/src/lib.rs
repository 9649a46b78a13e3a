//! # jobquest-cache
//!
//! Process-wide TTL cache for the JobQuest data layer.
//!
//! ## Modules
//!
//! - [`key`] - Deterministic `{prefix}:{namespace}:{hash}` keys
//! - [`namespace`] - Namespaces and their default TTLs
//! - [`payload`] - Versioned MessagePack envelope
//! - [`store`] - Local, Redis and tiered backing stores
//! - [`process`] - The fail-open [`ProcessCache`] client
//! - [`invalidation`] - Write-path invalidation and cross-instance propagation
//! - [`config`] - Cache and Redis configuration
//!
//! ## Example
//!
//! ```ignore
//! let setup = create_backing_store(&config).await;
//! let cache = ProcessCache::from_config(setup.store, &config, metrics)?;
//!
//! let params = CacheParams::new().with("search", "rust").with("limit", 20);
//! let jobs = cache
//!     .get_or_fetch(&Namespace::SEARCH, &params, None, || search_jobs(&params))
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod invalidation;
pub mod key;
pub mod namespace;
pub mod payload;
pub mod process;
pub mod store;

pub use config::{CacheConfig, RedisConfig};
pub use error::CacheError;
pub use invalidation::{INVALIDATION_CHANNEL, InvalidationBus, InvalidationListener, publish_invalidation};
pub use key::{CacheKey, CacheKeyBuilder, CacheParams};
pub use namespace::{Namespace, NamespaceTtls};
pub use process::{CacheStats, ProcessCache};
pub use store::{
    BackingStore, DynBackingStore, MemoryStore, RedisStore, StoreError, StoreMode, StoreSetup,
    TieredStore, create_backing_store, create_redis_pool,
};

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
