//! Process-local store (L1) backed by DashMap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{BackingStore, StoreError, StoreMode, glob_match};

/// A full store evicts `max_entries / EVICTION_FRACTION` entries at once.
const EVICTION_FRACTION: usize = 10;

/// A cached entry with TTL support.
///
/// The data is wrapped in `Arc` so a hit clones a pointer, not the payload.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    /// Create a new cached entry.
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }

    fn remaining(&self) -> Duration {
        self.ttl.saturating_sub(self.cached_at.elapsed())
    }
}

/// In-memory TTL store.
///
/// Cloning shares the underlying map.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, CachedEntry>>,
    max_entries: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_max_entries(10_000)
    }
}

impl MemoryStore {
    /// Creates an empty store with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store holding at most `max_entries` live entries.
    #[must_use]
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of entries, expired ones included until they are swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads a live entry.
    pub fn get_entry(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired());
            return None;
        }
        Some(Arc::clone(&entry.data))
    }

    /// Writes an entry, evicting if the store is full.
    pub fn insert(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            self.evict();
        }
        self.entries.insert(key.to_string(), CachedEntry::new(value, ttl));
    }

    /// Removes one entry.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Removes every entry whose key matches the glob pattern.
    pub fn purge(&self, pattern: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !glob_match(pattern, k));
        before.saturating_sub(self.entries.len())
    }

    /// Drops expired entries, then the tenth of the store closest to expiry if
    /// still full, so a full store pays for one scan per batch rather than per write.
    fn evict(&self) {
        self.entries.retain(|_, e| !e.is_expired());
        if self.entries.len() < self.max_entries {
            return;
        }

        let batch = (self.max_entries / EVICTION_FRACTION).max(1);
        let mut candidates: Vec<(Duration, String)> = self
            .entries
            .iter()
            .map(|e| (e.value().remaining(), e.key().clone()))
            .collect();
        if candidates.len() > batch {
            candidates.select_nth_unstable_by_key(batch - 1, |(remaining, _)| *remaining);
            candidates.truncate(batch);
        }

        for (_, key) in &candidates {
            self.entries.remove(key);
        }
        tracing::debug!(evicted = candidates.len(), "evicted local cache entries");
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.get_entry(key).map(|data| data.as_ref().clone()))
    }

    async fn setex(&self, key: &str, ttl: Duration, value: Vec<u8>) -> Result<(), StoreError> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired() && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn del(&self, keys: &[String]) -> Result<usize, StoreError> {
        Ok(keys.iter().filter(|k| self.remove(k)).count())
    }

    async fn del_matching(&self, pattern: &str) -> Result<usize, StoreError> {
        Ok(self.purge(pattern))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Local
    }

    fn local_entries(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::block_on;

    #[tokio::test]
    async fn test_get_set() {
        let store = MemoryStore::new();
        store
            .setex("test_key", Duration::from_secs(60), b"test_value".to_vec())
            .await
            .unwrap();
        assert_eq!(store.get("test_key").await.unwrap(), Some(b"test_value".to_vec()));
        assert_eq!(store.local_entries(), Some(1));
    }

    #[tokio::test]
    async fn test_expiration() {
        let store = MemoryStore::new();
        store
            .setex("expiring_key", Duration::from_millis(100), b"value".to_vec())
            .await
            .unwrap();
        assert!(store.get("expiring_key").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(store.get("expiring_key").await.unwrap().is_none());
        assert!(store.keys("*").await.unwrap().is_empty());
    }

    #[test]
    fn test_keys_and_del() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(60);
        block_on(async {
            store.setex("jobquest:jobs:a", ttl, vec![1]).await.unwrap();
            store.setex("jobquest:jobs:b", ttl, vec![2]).await.unwrap();
            store.setex("jobquest:search:a", ttl, vec![3]).await.unwrap();

            let mut keys = store.keys("jobquest:jobs:*").await.unwrap();
            keys.sort();
            assert_eq!(keys, vec!["jobquest:jobs:a", "jobquest:jobs:b"]);

            let removed = store
                .del(&[keys[0].clone(), keys[1].clone(), "missing".to_string()])
                .await
                .unwrap();
            assert_eq!(removed, 2);
        });
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_purge() {
        let store = MemoryStore::new();
        store.insert("jobquest:company:1", vec![1], Duration::from_secs(60));
        store.insert("jobquest:company:2", vec![2], Duration::from_secs(60));
        store.insert("jobquest:user:1", vec![3], Duration::from_secs(60));

        assert_eq!(store.purge("jobquest:company:*"), 2);
        assert!(store.get_entry("jobquest:user:1").is_some());
    }

    #[test]
    fn test_capacity_evicts_soonest_expiry() {
        let store = MemoryStore::with_max_entries(2);
        store.insert("short", vec![1], Duration::from_secs(1));
        store.insert("long", vec![2], Duration::from_secs(600));
        store.insert("new", vec![3], Duration::from_secs(600));

        assert_eq!(store.len(), 2);
        assert!(store.get_entry("short").is_none());
        assert!(store.get_entry("long").is_some());
        assert!(store.get_entry("new").is_some());
    }

    #[test]
    fn test_full_store_evicts_in_batches() {
        let store = MemoryStore::with_max_entries(20);
        for i in 0..20u64 {
            store.insert(&format!("k{i}"), vec![0], Duration::from_secs(100 + i));
        }

        store.insert("fresh", vec![1], Duration::from_secs(600));

        // One eviction pass removed the two entries closest to expiry.
        assert_eq!(store.len(), 19);
        assert!(store.get_entry("k0").is_none());
        assert!(store.get_entry("k1").is_none());
        assert!(store.get_entry("k2").is_some());
        assert!(store.get_entry("fresh").is_some());

        // The freed room absorbs the next write without another pass.
        store.insert("fresh2", vec![2], Duration::from_secs(600));
        assert_eq!(store.len(), 20);
        assert!(store.get_entry("k2").is_some());
    }
}
