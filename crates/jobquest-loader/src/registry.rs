//! Per-request loader registry.

use std::fmt;
use std::sync::Arc;

use jobquest_metrics::MetricsRecorder;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::LoaderConfig;
use crate::fetcher::Fetchers;
use crate::kind::EntityKind;
use crate::loader::Loader;

struct Slots {
    token: CancellationToken,
    loaders: [Option<Arc<Loader>>; 4],
}

impl Slots {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            loaders: Default::default(),
        }
    }
}

/// Holds one lazily created [`Loader`] per entity kind for a single request.
///
/// Never share a registry across requests. Dropping it cancels any dispatch still
/// in flight, exactly like [`clear`](Self::clear).
pub struct LoaderRegistry {
    fetchers: Fetchers,
    config: LoaderConfig,
    metrics: MetricsRecorder,
    slots: Mutex<Slots>,
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let active = self.slots.lock().loaders.iter().filter(|l| l.is_some()).count();
        f.debug_struct("LoaderRegistry")
            .field("config", &self.config)
            .field("active_loaders", &active)
            .finish_non_exhaustive()
    }
}

impl LoaderRegistry {
    #[must_use]
    pub fn new(fetchers: Fetchers, config: LoaderConfig, metrics: MetricsRecorder) -> Self {
        Self {
            fetchers,
            config,
            metrics,
            slots: Mutex::new(Slots::new()),
        }
    }

    /// Returns the request's loader for `kind`, creating it on first use.
    pub fn get_loader(&self, kind: EntityKind) -> Arc<Loader> {
        let mut slots = self.slots.lock();
        let token = slots.token.clone();
        let slot = &mut slots.loaders[kind.slot()];

        if let Some(loader) = slot {
            return Arc::clone(loader);
        }

        tracing::trace!(kind = %kind, "creating loader");
        let loader = Arc::new(Loader::new(
            kind,
            Arc::clone(self.fetchers.get(kind)),
            self.config.clone(),
            self.metrics.clone(),
            token,
        ));
        *slot = Some(Arc::clone(&loader));
        loader
    }

    /// Drops every loader and memo and cancels dispatches still in flight.
    ///
    /// Callers still awaiting a cancelled batch get
    /// [`LoadError::Cancelled`](crate::LoadError::Cancelled). Loaders obtained later
    /// start from an empty memo.
    pub fn clear(&self) {
        let old = std::mem::replace(&mut *self.slots.lock(), Slots::new());
        old.token.cancel();
        let dropped = old.loaders.iter().filter(|l| l.is_some()).count();
        tracing::debug!(loaders = dropped, "cleared loader registry");
    }

    /// Number of loaders created since the last clear.
    #[must_use]
    pub fn active_loaders(&self) -> usize {
        self.slots.lock().loaders.iter().filter(|l| l.is_some()).count()
    }
}

impl Drop for LoaderRegistry {
    fn drop(&mut self) {
        self.slots.get_mut().token.cancel();
    }
}
