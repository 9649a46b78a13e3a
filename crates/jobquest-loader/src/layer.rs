//! Process-level wiring of the data layer.
//!
//! [`DataLayer::start`] builds the shared pieces once per process:
//!
//! - the backing store (Redis + L1 when enabled and reachable, otherwise L1 only)
//! - the [`ProcessCache`] and [`InvalidationBus`]
//! - the [`MetricsRecorder`], optional Prometheus exporter and [`SystemSampler`]
//! - the cross-instance [`InvalidationListener`] when Redis is in use
//!
//! Each incoming request then gets its own [`RequestContext`] from
//! [`DataLayer::request`].

use jobquest_cache::{
    InvalidationBus, InvalidationListener, ProcessCache, StoreMode, create_backing_store,
};
use jobquest_metrics::{HealthReport, MetricsRecorder, SystemSampler, init_prometheus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::error::StartError;
use crate::fetcher::Fetchers;
use crate::registry::LoaderRegistry;
use crate::settings::Settings;

/// Long-lived data-layer services.
pub struct DataLayer {
    settings: Settings,
    cache: ProcessCache,
    bus: InvalidationBus,
    metrics: MetricsRecorder,
    sampler: Option<SystemSampler>,
    listener: Option<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for DataLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLayer")
            .field("mode", &self.cache.mode())
            .field("listener", &self.listener.is_some())
            .field("sampler", &self.sampler.is_some())
            .finish_non_exhaustive()
    }
}

impl DataLayer {
    /// Starts the data layer.
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] if the settings are invalid. Redis problems only
    /// degrade to the local tier.
    pub async fn start(settings: Settings) -> Result<Self, StartError> {
        settings.validate()?;

        let metrics = MetricsRecorder::new(settings.metrics.clone());
        if settings.metrics.prometheus && !init_prometheus() {
            tracing::warn!("Prometheus recorder not installed; another recorder is active");
        }

        let setup = create_backing_store(&settings.cache).await;
        let cache = ProcessCache::from_config(setup.store, &settings.cache, metrics.clone())?;

        let shutdown = CancellationToken::new();
        let (bus, listener) = match setup.redis {
            Some(pool) => {
                let listener = InvalidationListener::new(
                    settings.cache.redis.url.clone(),
                    setup.local,
                    shutdown.child_token(),
                );
                (
                    InvalidationBus::new(cache.clone()).with_publisher(pool),
                    Some(listener.start()),
                )
            }
            None => (InvalidationBus::new(cache.clone()), None),
        };

        let sampler = SystemSampler::start(metrics.clone(), settings.metrics.sample_interval());

        tracing::info!(
            mode = %cache.mode(),
            prefix = %settings.cache.app_prefix,
            "Data layer started"
        );

        Ok(Self {
            settings,
            cache,
            bus,
            metrics,
            sampler: Some(sampler),
            listener,
            shutdown,
        })
    }

    /// Creates the context for one request.
    pub fn request(&self, fetchers: Fetchers, request_id: impl Into<String>) -> RequestContext {
        let registry = LoaderRegistry::new(fetchers, self.settings.loader.clone(), self.metrics.clone());
        RequestContext::from_parts(request_id.into(), self.cache.clone(), self.bus.clone(), registry)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &ProcessCache {
        &self.cache
    }

    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn mode(&self) -> StoreMode {
        self.cache.mode()
    }

    /// Health derived from host samples and batch failure rates.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        self.metrics.health_status()
    }

    /// Stops the background tasks and waits for them to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(sampler) = self.sampler.take() {
            sampler.stop().await;
        }
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                tracing::warn!(error = %e, "Invalidation listener ended abnormally");
            }
        }
        tracing::info!("Data layer stopped");
    }
}

impl Drop for DataLayer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
