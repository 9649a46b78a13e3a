//! Two-tier store: DashMap (L1) in front of Redis (L2).

use std::time::Duration;

use async_trait::async_trait;

use super::{BackingStore, MemoryStore, RedisStore, StoreError, StoreMode};

/// L1 + L2 store.
///
/// Reads check L1 first and promote L2 hits into L1 for at most `local_ttl`.
/// Writes land in L1 only once L2 accepted them. Deletes always clear L1 first,
/// so an unreachable L2 never leaves invalidated entries readable locally.
#[derive(Clone, Debug)]
pub struct TieredStore {
    local: MemoryStore,
    remote: RedisStore,
    local_ttl: Duration,
}

impl TieredStore {
    /// Creates a tiered store.
    #[must_use]
    pub fn new(local: MemoryStore, remote: RedisStore, local_ttl: Duration) -> Self {
        Self {
            local,
            remote,
            local_ttl,
        }
    }

    /// The L1 tier.
    #[must_use]
    pub fn local(&self) -> &MemoryStore {
        &self.local
    }
}

#[async_trait]
impl BackingStore for TieredStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(data) = self.local.get_entry(key) {
            tracing::trace!(key = %key, "cache hit (L1)");
            return Ok(Some(data.as_ref().clone()));
        }

        match self.remote.get(key).await? {
            Some(data) => {
                tracing::trace!(key = %key, "cache hit (L2)");
                self.local.insert(key, data.clone(), self.local_ttl);
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), StoreError> {
        if let Err(e) = self.remote.setex(key, ttl, value.clone()).await {
            self.local.remove(key);
            return Err(e);
        }
        self.local.insert(key, value, ttl.min(self.local_ttl));
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = self.remote.keys(pattern).await?;
        keys.extend(self.local.keys(pattern).await?);
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn del(&self, keys: &[String]) -> Result<usize, StoreError> {
        let local_removed = self.local.del(keys).await?;
        let remote_removed = self.remote.del(keys).await?;
        Ok(local_removed.max(remote_removed))
    }

    async fn del_matching(&self, pattern: &str) -> Result<usize, StoreError> {
        let local_removed = self.local.purge(pattern);
        let remote_removed = self.remote.del_matching(pattern).await.inspect_err(|e| {
            tracing::warn!(
                pattern = %pattern,
                local_removed,
                error = %e,
                "L2 invalidation failed after clearing L1"
            );
        })?;
        Ok(local_removed.max(remote_removed))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.remote.ping().await
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Tiered
    }

    fn local_entries(&self) -> Option<usize> {
        Some(self.local.len())
    }
}
