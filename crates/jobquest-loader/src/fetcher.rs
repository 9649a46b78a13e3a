//! Batch fetchers supplied by the persistence layer.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::FetchError;
use crate::kind::{EntityKind, LoadKey};

/// Result map returned by a fetcher. Keys absent from the map resolve to `None`.
pub type FetchResult = Result<HashMap<LoadKey, Value>, FetchError>;

/// Loads many entities of one kind in a single round trip.
#[async_trait]
pub trait BatchFetcher: Send + Sync {
    /// Fetches the given keys. Called once per dispatched batch with deduplicated keys.
    async fn fetch(&self, keys: &[LoadKey]) -> FetchResult;
}

/// Type alias for a shared batch fetcher.
pub type DynBatchFetcher = Arc<dyn BatchFetcher>;

/// A [`BatchFetcher`] backed by an async closure.
pub struct FnFetcher<F> {
    f: F,
}

/// Wraps an async closure as a [`DynBatchFetcher`].
pub fn fetcher_fn<F, Fut>(f: F) -> DynBatchFetcher
where
    F: Fn(Vec<LoadKey>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = FetchResult> + Send + 'static,
{
    Arc::new(FnFetcher { f })
}

#[async_trait]
impl<F, Fut> BatchFetcher for FnFetcher<F>
where
    F: Fn(Vec<LoadKey>) -> Fut + Send + Sync,
    Fut: Future<Output = FetchResult> + Send,
{
    async fn fetch(&self, keys: &[LoadKey]) -> FetchResult {
        (self.f)(keys.to_vec()).await
    }
}

/// One fetcher per entity kind, bound at registry construction.
#[derive(Clone)]
pub struct Fetchers {
    slots: [DynBatchFetcher; 4],
}

impl Fetchers {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> FetchersBuilder {
        FetchersBuilder::default()
    }

    /// Uses the same fetcher for every kind, e.g. one that dispatches on `key.kind`.
    #[must_use]
    pub fn uniform(fetcher: DynBatchFetcher) -> Self {
        Self {
            slots: std::array::from_fn(|_| Arc::clone(&fetcher)),
        }
    }

    /// The fetcher for a kind.
    #[must_use]
    pub fn get(&self, kind: EntityKind) -> &DynBatchFetcher {
        &self.slots[kind.slot()]
    }
}

impl fmt::Debug for Fetchers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetchers").finish_non_exhaustive()
    }
}

/// Builder for [`Fetchers`]. Every kind must be provided.
#[derive(Default)]
pub struct FetchersBuilder {
    company: Option<DynBatchFetcher>,
    user: Option<DynBatchFetcher>,
    job: Option<DynBatchFetcher>,
    job_application: Option<DynBatchFetcher>,
}

impl FetchersBuilder {
    #[must_use]
    pub fn with_company(mut self, fetcher: DynBatchFetcher) -> Self {
        self.company = Some(fetcher);
        self
    }

    #[must_use]
    pub fn with_user(mut self, fetcher: DynBatchFetcher) -> Self {
        self.user = Some(fetcher);
        self
    }

    #[must_use]
    pub fn with_job(mut self, fetcher: DynBatchFetcher) -> Self {
        self.job = Some(fetcher);
        self
    }

    #[must_use]
    pub fn with_job_application(mut self, fetcher: DynBatchFetcher) -> Self {
        self.job_application = Some(fetcher);
        self
    }

    /// Builds the fetcher set.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Unsupported`] naming the first kind without a fetcher.
    pub fn build(self) -> Result<Fetchers, FetchError> {
        let company = self
            .company
            .ok_or(FetchError::Unsupported(EntityKind::Company))?;
        let user = self.user.ok_or(FetchError::Unsupported(EntityKind::User))?;
        let job = self.job.ok_or(FetchError::Unsupported(EntityKind::Job))?;
        let job_application = self
            .job_application
            .ok_or(FetchError::Unsupported(EntityKind::JobApplication))?;

        Ok(Fetchers {
            slots: [company, user, job, job_application],
        })
    }
}
