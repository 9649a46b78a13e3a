//! Write-path invalidation and cross-instance propagation.
//!
//! ```text
//! Instance 1: bus.invalidate(jobs)
//!   ↓ delete jobquest:jobs:* (L1 + L2)
//! Redis Pub/Sub: PUBLISH jobquest:cache:invalidate "jobquest:jobs:*"
//!   ↓
//! Instance 2: listener receives the pattern → purges its L1
//! Instance 3: listener receives the pattern → purges its L1
//! ```

use std::time::Duration;

use deadpool_redis::Pool;
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::namespace::Namespace;
use crate::process::ProcessCache;
use crate::store::{MemoryStore, StoreError};

/// Pub/Sub channel carrying invalidated key patterns.
pub const INVALIDATION_CHANNEL: &str = "jobquest:cache:invalidate";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Entry point every write path calls after commit.
#[derive(Clone, Debug)]
pub struct InvalidationBus {
    cache: ProcessCache,
    publisher: Option<Pool>,
}

impl InvalidationBus {
    /// Creates a bus that only invalidates this process's view.
    #[must_use]
    pub fn new(cache: ProcessCache) -> Self {
        Self {
            cache,
            publisher: None,
        }
    }

    /// Also publishes every invalidation to other instances.
    #[must_use]
    pub fn with_publisher(mut self, pool: Pool) -> Self {
        self.publisher = Some(pool);
        self
    }

    pub fn cache(&self) -> &ProcessCache {
        &self.cache
    }

    /// Invalidates one namespace and returns how many keys were removed.
    ///
    /// Never fails; store and publish errors are logged.
    pub async fn invalidate(&self, namespace: &Namespace) -> usize {
        let removed = self.cache.invalidate_namespace(namespace).await;

        if let Some(pool) = &self.publisher {
            let pattern = self.cache.key_builder().namespace_pattern(namespace);
            if let Err(e) = publish_invalidation(pool, &pattern).await {
                tracing::warn!(namespace = %namespace, error = %e, "failed to publish cache invalidation");
            }
        }

        removed
    }

    /// Invalidates several namespaces, returning the total removed.
    pub async fn invalidate_all(&self, namespaces: &[Namespace]) -> usize {
        let mut removed = 0;
        for namespace in namespaces {
            removed += self.invalidate(namespace).await;
        }
        tracing::debug!(namespaces = namespaces.len(), removed, "invalidated namespaces");
        removed
    }
}

/// Publishes an invalidated key pattern to other instances.
///
/// # Errors
///
/// Returns a [`StoreError`] if no connection is available or PUBLISH fails.
pub async fn publish_invalidation(redis: &Pool, pattern: &str) -> Result<(), StoreError> {
    let mut conn = redis
        .get()
        .await
        .map_err(|e| StoreError::Unavailable(format!("failed to get Redis connection: {e}")))?;

    conn.publish::<_, _, ()>(INVALIDATION_CHANNEL, pattern)
        .await
        .map_err(|e| StoreError::Command(format!("failed to publish invalidation: {e}")))?;

    tracing::debug!(pattern = %pattern, "published cache invalidation");
    Ok(())
}

/// Keeps this instance's L1 tier in step with invalidations published elsewhere.
///
/// Subscribes to [`INVALIDATION_CHANNEL`] and purges every local key matching a
/// received pattern. Reconnects with exponential backoff until the token is cancelled.
pub struct InvalidationListener {
    redis_url: String,
    local: MemoryStore,
    token: CancellationToken,
}

impl InvalidationListener {
    #[must_use]
    pub fn new(redis_url: impl Into<String>, local: MemoryStore, token: CancellationToken) -> Self {
        Self {
            redis_url: redis_url.into(),
            local,
            token,
        }
    }

    /// Spawns the listener task.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;

            loop {
                let result = tokio::select! {
                    _ = self.token.cancelled() => break,
                    result = self.run() => result,
                };

                match result {
                    Ok(()) => backoff = INITIAL_BACKOFF,
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            backoff_secs = backoff.as_secs(),
                            "Cache invalidation listener error, reconnecting..."
                        );
                        tokio::select! {
                            _ = self.token.cancelled() => break,
                            _ = tokio::time::sleep(backoff) => {}
                        }
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }

            tracing::info!("Cache invalidation listener stopped");
        })
    }

    async fn run(&self) -> Result<(), String> {
        use futures_util::StreamExt;

        let client = redis::Client::open(self.redis_url.clone())
            .map_err(|e| format!("failed to create Redis client: {e}"))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;

        pubsub
            .subscribe(INVALIDATION_CHANNEL)
            .await
            .map_err(|e| format!("failed to subscribe: {e}"))?;

        tracing::info!(channel = INVALIDATION_CHANNEL, "Subscribed to cache invalidation channel");

        let mut stream = pubsub.on_message();
        loop {
            match stream.next().await {
                Some(msg) => match msg.get_payload::<String>() {
                    Ok(pattern) => {
                        let purged = self.local.purge(&pattern);
                        tracing::debug!(pattern = %pattern, purged, "received cache invalidation");
                    }
                    Err(_) => tracing::warn!("failed to parse invalidation message payload"),
                },
                None => return Err("pub/sub connection closed".to_string()),
            }
        }
    }
}
