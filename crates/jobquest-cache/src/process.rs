//! Process-wide TTL cache with namespace invalidation.
//!
//! [`ProcessCache`] is the only state that outlives a request. It never turns a store
//! failure into a caller error: reads that cannot reach the store miss, writes become
//! no-ops, and the caller falls through to the authoritative fetch.
//!
//! ## Consistency
//!
//! Each store operation is atomic on its own, but `get`/`set`/`invalidate_namespace`
//! sequences are not linearizable. A `set` that lands while an
//! [`invalidate_namespace`](ProcessCache::invalidate_namespace) scan is running may
//! leave one stale key visible until its TTL elapses.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use jobquest_metrics::MetricsRecorder;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::key::{CacheKey, CacheKeyBuilder, CacheParams};
use crate::namespace::{Namespace, NamespaceTtls};
use crate::payload::{self, Decoded};
use crate::store::{DynBackingStore, StoreMode};

struct Inner {
    store: DynBackingStore,
    keys: CacheKeyBuilder,
    ttls: NamespaceTtls,
    metrics: MetricsRecorder,
}

/// Shared cache client. Cheap to clone.
#[derive(Clone)]
pub struct ProcessCache {
    inner: Arc<Inner>,
}

impl fmt::Debug for ProcessCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessCache")
            .field("mode", &self.inner.store.mode())
            .field("prefix", &self.inner.keys.prefix())
            .finish_non_exhaustive()
    }
}

/// Snapshot returned by [`ProcessCache::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub mode: StoreMode,
    /// Whether the store answered a ping.
    pub available: bool,
    /// Entries held in process memory, when there is a local tier.
    pub local_entries: Option<usize>,
    /// Live keys per well-known namespace. Empty when the store is unavailable.
    pub namespaces: BTreeMap<String, usize>,
}

impl ProcessCache {
    /// Creates a cache over an existing store.
    #[must_use]
    pub fn new(
        store: DynBackingStore,
        keys: CacheKeyBuilder,
        ttls: NamespaceTtls,
        metrics: MetricsRecorder,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                keys,
                ttls,
                metrics,
            }),
        }
    }

    /// Creates a cache using the prefix and TTL overrides from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MalformedKey`] if the configured prefix is invalid.
    pub fn from_config(
        store: DynBackingStore,
        config: &CacheConfig,
        metrics: MetricsRecorder,
    ) -> Result<Self, CacheError> {
        let keys = CacheKeyBuilder::new(config.app_prefix.clone())?;
        let ttls = NamespaceTtls::default().with_overrides(&config.ttl_overrides);
        Ok(Self::new(store, keys, ttls, metrics))
    }

    pub fn key_builder(&self) -> &CacheKeyBuilder {
        &self.inner.keys
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.inner.metrics
    }

    pub fn mode(&self) -> StoreMode {
        self.inner.store.mode()
    }

    /// TTL applied when a write does not name one.
    #[must_use]
    pub fn ttl_for(&self, namespace: &Namespace) -> Duration {
        self.inner.ttls.ttl_for(namespace)
    }

    /// Builds the key for a parameterized read.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MalformedKey`] for invalid key material.
    pub fn key(&self, namespace: &Namespace, params: &CacheParams) -> Result<CacheKey, CacheError> {
        self.inner.keys.build(namespace, params)
    }

    /// Reads a cached value.
    ///
    /// # Errors
    ///
    /// Only [`CacheError::MalformedKey`]; store failures read as a miss.
    pub async fn get<T: DeserializeOwned>(
        &self,
        namespace: &Namespace,
        params: &CacheParams,
    ) -> Result<Option<T>, CacheError> {
        let key = self.key(namespace, params)?;
        Ok(self.get_key(&key).await)
    }

    /// Reads a value by prebuilt key.
    pub async fn get_key<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let mut timer = self.inner.metrics.start_cache_op(key.namespace().as_str());

        let bytes = match self.inner.store.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::debug!(key = %key, "cache miss");
                return None;
            }
            Err(e) => {
                let err = CacheError::from(e);
                tracing::warn!(
                    key = %key,
                    error = %err,
                    code = err.error_code(),
                    "cache read failed, treating as miss"
                );
                return None;
            }
        };

        match payload::decode::<T>(&bytes, payload::now_ms()) {
            Ok(Decoded::Fresh(value)) => {
                timer.mark_hit();
                tracing::debug!(key = %key, "cache hit");
                Some(value)
            }
            Ok(Decoded::Expired) => {
                tracing::debug!(key = %key, "cache entry expired");
                None
            }
            Ok(Decoded::StaleSchema(version)) => {
                tracing::debug!(key = %key, version, "cache entry has stale schema");
                None
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecodable cache payload, dropping");
                if let Err(e) = self.inner.store.del(&[key.as_str().to_string()]).await {
                    tracing::debug!(key = %key, error = %e, "failed to drop undecodable payload");
                }
                None
            }
        }
    }

    /// Stores a value. `ttl` defaults to the namespace TTL.
    ///
    /// Returns whether the store accepted the write.
    ///
    /// # Errors
    ///
    /// Only [`CacheError::MalformedKey`].
    pub async fn set<T: Serialize>(
        &self,
        namespace: &Namespace,
        params: &CacheParams,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let key = self.key(namespace, params)?;
        Ok(self.set_key(&key, value, ttl).await)
    }

    /// Stores a value by prebuilt key.
    pub async fn set_key<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Option<Duration>) -> bool {
        let ttl = ttl.unwrap_or_else(|| self.ttl_for(key.namespace()));
        if ttl.is_zero() {
            return false;
        }

        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let bytes = match payload::encode(key.namespace().as_str(), value, payload::now_ms(), ttl_ms) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "failed to encode cache payload");
                return false;
            }
        };

        match self.inner.store.setex(key.as_str(), ttl, bytes).await {
            Ok(()) => {
                tracing::trace!(key = %key, ttl_secs = ttl.as_secs(), "cached");
                true
            }
            Err(e) => {
                let err = CacheError::from(e);
                tracing::warn!(key = %key, error = %err, code = err.error_code(), "cache write failed");
                false
            }
        }
    }

    /// Reads a single entity cached under `{prefix}:{namespace}:{id}`.
    ///
    /// # Errors
    ///
    /// Only [`CacheError::MalformedKey`].
    pub async fn get_entity<T: DeserializeOwned>(
        &self,
        namespace: &Namespace,
        id: &str,
    ) -> Result<Option<T>, CacheError> {
        let key = self.inner.keys.entity_key(namespace, id)?;
        Ok(self.get_key(&key).await)
    }

    /// Stores a single entity under `{prefix}:{namespace}:{id}`.
    ///
    /// # Errors
    ///
    /// Only [`CacheError::MalformedKey`].
    pub async fn set_entity<T: Serialize>(
        &self,
        namespace: &Namespace,
        id: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let key = self.inner.keys.entity_key(namespace, id)?;
        Ok(self.set_key(&key, value, ttl).await)
    }

    /// Read-through helper: returns the cached value or runs `fetch` and caches its
    /// result on a best-effort basis.
    ///
    /// # Errors
    ///
    /// Errors from `fetch` propagate unchanged. A malformed key is converted into `E`.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        namespace: &Namespace,
        params: &CacheParams,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = self.key(namespace, params)?;
        self.get_or_fetch_key(&key, ttl, fetch).await
    }

    /// [`get_or_fetch`](Self::get_or_fetch) with a prebuilt key.
    ///
    /// # Errors
    ///
    /// Errors from `fetch` propagate unchanged.
    pub async fn get_or_fetch_key<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get_key(key).await {
            return Ok(value);
        }
        let value = fetch().await?;
        self.set_key(key, &value, ttl).await;
        Ok(value)
    }

    /// Deletes every key in a namespace and returns how many were removed.
    ///
    /// Failures are logged and reported as zero removals.
    pub async fn invalidate_namespace(&self, namespace: &Namespace) -> usize {
        match self.try_invalidate_namespace(namespace).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, code = e.error_code(), "cache invalidation failed");
                0
            }
        }
    }

    pub(crate) async fn try_invalidate_namespace(&self, namespace: &Namespace) -> Result<usize, CacheError> {
        let pattern = self.inner.keys.namespace_pattern(namespace);
        let failed = |source| CacheError::InvalidationFailed {
            namespace: namespace.to_string(),
            source,
        };

        let removed = self.inner.store.del_matching(&pattern).await.map_err(failed)?;
        tracing::debug!(namespace = %namespace, removed, "invalidated cache namespace");
        Ok(removed)
    }

    /// Store mode, reachability and per-namespace key counts.
    pub async fn stats(&self) -> CacheStats {
        let available = self.inner.store.ping().await.is_ok();
        let mut namespaces = BTreeMap::new();

        if available {
            for ns in Namespace::well_known() {
                let pattern = self.inner.keys.namespace_pattern(&ns);
                match self.inner.store.keys(&pattern).await {
                    Ok(keys) => {
                        namespaces.insert(ns.to_string(), keys.len());
                    }
                    Err(e) => {
                        tracing::debug!(namespace = %ns, error = %e, "failed to count namespace keys");
                    }
                }
            }
        }

        CacheStats {
            mode: self.inner.store.mode(),
            available,
            local_entries: self.inner.store.local_entries(),
            namespaces,
        }
    }
}
