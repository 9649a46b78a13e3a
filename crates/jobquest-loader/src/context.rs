//! Request execution context.
//!
//! The context is constructed per request and handed explicitly to every resolver.
//! It carries the request's [`LoaderRegistry`] together with the shared cache and
//! invalidation bus.
//!
//! # Example
//!
//! ```ignore
//! use jobquest_loader::RequestContext;
//!
//! let ctx = RequestContext::builder()
//!     .with_fetchers(fetchers)
//!     .with_cache(cache.clone())
//!     .with_request_id("req-123")
//!     .build()?;
//!
//! let company = ctx.load(EntityKind::Company, company_id).await?;
//! ```

use std::sync::Arc;

use jobquest_cache::{InvalidationBus, ProcessCache};
use jobquest_metrics::MetricsRecorder;
use serde_json::Value;

use crate::config::LoaderConfig;
use crate::error::LoadError;
use crate::fetcher::Fetchers;
use crate::kind::{EntityId, EntityKind, LoadKey};
use crate::loader::{LoadedValue, Loader};
use crate::registry::LoaderRegistry;

/// Per-request execution context.
///
/// Cloning shares the same registry; the registry is torn down when
/// [`finish`](Self::finish) is called or the last clone is dropped.
#[derive(Clone)]
pub struct RequestContext {
    /// Request ID for tracing and correlation.
    pub request_id: String,

    /// Shared process cache.
    pub cache: ProcessCache,

    /// Write-path invalidation.
    pub bus: InvalidationBus,

    registry: Arc<LoaderRegistry>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    /// Creates a new builder for RequestContext.
    #[must_use]
    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::default()
    }

    pub(crate) fn from_parts(
        request_id: String,
        cache: ProcessCache,
        bus: InvalidationBus,
        registry: LoaderRegistry,
    ) -> Self {
        Self {
            request_id,
            cache,
            bus,
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &LoaderRegistry {
        &self.registry
    }

    /// The request's loader for `kind`.
    pub fn loader(&self, kind: EntityKind) -> Arc<Loader> {
        self.registry.get_loader(kind)
    }

    /// Loads one entity through the request's loader.
    ///
    /// # Errors
    ///
    /// See [`Loader::load`].
    pub async fn load(
        &self,
        kind: EntityKind,
        id: impl Into<EntityId>,
    ) -> Result<Option<LoadedValue>, LoadError> {
        self.loader(kind).load(LoadKey::new(kind, id)).await
    }

    /// Loads one entity, consulting the process cache before the loader.
    ///
    /// A cache hit primes the request's memo; a loader result is written back to
    /// the cache on a best-effort basis.
    ///
    /// # Errors
    ///
    /// See [`Loader::load`]. Cache problems never surface here.
    pub async fn load_cached(
        &self,
        kind: EntityKind,
        id: impl Into<EntityId>,
    ) -> Result<Option<LoadedValue>, LoadError> {
        let key = LoadKey::new(kind, id);
        let loader = self.loader(kind);
        let namespace = kind.entity_namespace();

        match self.cache.get_entity::<Value>(&namespace, key.id.as_str()).await {
            Ok(Some(value)) => {
                loader.prime(key.clone(), value);
                return loader.load(key).await;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "entity id not cacheable, loading directly");
                return loader.load(key).await;
            }
        }

        let loaded = loader.load(key.clone()).await?;
        if let Some(value) = &loaded {
            match self
                .cache
                .set_entity(&namespace, key.id.as_str(), value.as_ref(), None)
                .await
            {
                Ok(true) => tracing::trace!(key = %key, "entity written back to cache"),
                Ok(false) => tracing::debug!(key = %key, "entity not written back to cache"),
                Err(e) => tracing::debug!(key = %key, error = %e, "entity id not cacheable, skipping write-back"),
            }
        }
        Ok(loaded)
    }

    /// Call after a committed write to `key`: drops it from this request's memo and
    /// invalidates every namespace the write makes stale. Returns the keys removed.
    pub async fn after_write(&self, key: &LoadKey) -> usize {
        self.loader(key.kind).forget(key);
        self.bus.invalidate_all(key.kind.invalidated_namespaces()).await
    }

    /// Tears the request down, cancelling any dispatch still in flight.
    pub fn finish(&self) {
        self.registry.clear();
    }
}

/// Builder for constructing RequestContext.
///
/// This builder validates that all required fields are provided before
/// creating the context.
#[derive(Default)]
pub struct RequestContextBuilder {
    fetchers: Option<Fetchers>,
    cache: Option<ProcessCache>,
    bus: Option<InvalidationBus>,
    metrics: Option<MetricsRecorder>,
    loader_config: Option<LoaderConfig>,
    request_id: Option<String>,
}

impl RequestContextBuilder {
    /// Creates a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch fetchers.
    #[must_use]
    pub fn with_fetchers(mut self, fetchers: Fetchers) -> Self {
        self.fetchers = Some(fetchers);
        self
    }

    /// Sets the shared cache.
    #[must_use]
    pub fn with_cache(mut self, cache: ProcessCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the invalidation bus. Defaults to a local-only bus over the cache.
    #[must_use]
    pub fn with_bus(mut self, bus: InvalidationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets the metrics recorder. Defaults to the cache's recorder.
    #[must_use]
    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the loader configuration.
    #[must_use]
    pub fn with_loader_config(mut self, config: LoaderConfig) -> Self {
        self.loader_config = Some(config);
        self
    }

    /// Sets the request ID.
    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Builds the RequestContext.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<RequestContext, ContextBuilderError> {
        let fetchers = self
            .fetchers
            .ok_or(ContextBuilderError::MissingField("fetchers"))?;

        let cache = self.cache.ok_or(ContextBuilderError::MissingField("cache"))?;

        let request_id = self
            .request_id
            .ok_or(ContextBuilderError::MissingField("request_id"))?;

        let bus = self
            .bus
            .unwrap_or_else(|| InvalidationBus::new(cache.clone()));
        let metrics = self.metrics.unwrap_or_else(|| cache.metrics().clone());

        // Each request gets its own registry to keep batching and memo scope per request
        let registry = LoaderRegistry::new(fetchers, self.loader_config.unwrap_or_default(), metrics);

        Ok(RequestContext::from_parts(request_id, cache, bus, registry))
    }
}

/// Errors that can occur when building a RequestContext.
#[derive(Debug, thiserror::Error)]
pub enum ContextBuilderError {
    /// A required field was not provided.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_missing_fetchers() {
        let result = RequestContextBuilder::new()
            .with_request_id("req-123")
            .build();

        assert!(matches!(
            result,
            Err(ContextBuilderError::MissingField("fetchers"))
        ));
    }
}
