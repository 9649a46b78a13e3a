//! Integration tests for the ProcessCache over the local store.
//!
//! These tests verify:
//! - TTL expiry (expired entries are never returned)
//! - Namespace invalidation
//! - Fail-open behavior when the backing store is down
//! - Tiered store behavior when Redis is unreachable
//! - The read-through helper

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jobquest_cache::{
    BackingStore, CacheConfig, CacheParams, MemoryStore, Namespace, ProcessCache, RedisConfig,
    RedisStore, StoreError, StoreMode, TieredStore, create_redis_pool,
};
use jobquest_metrics::{HitRateWindow, MetricsRecorder};

fn local_cache() -> ProcessCache {
    ProcessCache::from_config(
        Arc::new(MemoryStore::new()),
        &CacheConfig::default(),
        MetricsRecorder::default(),
    )
    .unwrap()
}

/// A store whose every operation fails, as if Redis had gone away.
struct FailingStore;

#[async_trait]
impl BackingStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn setex(&self, _key: &str, _ttl: Duration, _value: Vec<u8>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn keys(&self, _pattern: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn del(&self, _keys: &[String]) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Redis
    }
}

#[tokio::test]
async fn test_entry_expires_after_ttl() {
    let cache = local_cache();
    let params = CacheParams::new().with("id", "job-1");

    cache
        .set(&Namespace::JOB_DETAIL, &params, &"Rust engineer", Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(
        cache.get::<String>(&Namespace::JOB_DETAIL, &params).await.unwrap(),
        Some("Rust engineer".to_string())
    );

    tokio::time::sleep(Duration::from_millis(1100)).await;

    assert_eq!(cache.get::<String>(&Namespace::JOB_DETAIL, &params).await.unwrap(), None);
}

#[tokio::test]
async fn test_invalidation_removes_namespace_only() {
    let cache = local_cache();
    let first = CacheParams::new().with("offset", 0);
    let second = CacheParams::new().with("offset", 20);

    cache.set(&Namespace::SEARCH, &first, &vec![1, 2], None).await.unwrap();
    cache.set(&Namespace::SEARCH, &second, &vec![3, 4], None).await.unwrap();
    cache.set(&Namespace::COMPANY, &first, &"acme", None).await.unwrap();

    assert_eq!(cache.invalidate_namespace(&Namespace::SEARCH).await, 2);

    assert_eq!(cache.get::<Vec<i32>>(&Namespace::SEARCH, &first).await.unwrap(), None);
    assert_eq!(cache.get::<Vec<i32>>(&Namespace::SEARCH, &second).await.unwrap(), None);
    assert_eq!(
        cache.get::<String>(&Namespace::COMPANY, &first).await.unwrap(),
        Some("acme".to_string())
    );
}

#[tokio::test]
async fn test_store_down_fails_open() {
    let cache = ProcessCache::from_config(
        Arc::new(FailingStore),
        &CacheConfig::default(),
        MetricsRecorder::default(),
    )
    .unwrap();
    let params = CacheParams::new().with("search", "rust");

    assert!(!cache.set(&Namespace::SEARCH, &params, &1, None).await.unwrap());
    assert_eq!(cache.get::<i32>(&Namespace::SEARCH, &params).await.unwrap(), None);
    assert_eq!(cache.invalidate_namespace(&Namespace::SEARCH).await, 0);

    let value: Result<i32, StoreError> = cache
        .get_or_fetch_key(&cache.key(&Namespace::SEARCH, &params).unwrap(), None, || async {
            Ok(7)
        })
        .await;
    assert_eq!(value.unwrap(), 7);

    assert_eq!(cache.metrics().hit_rate(HitRateWindow::All), 0.0);

    let stats = cache.stats().await;
    assert!(!stats.available);
    assert!(stats.namespaces.is_empty());
}

/// A tiered store whose L2 points at a port nothing listens on.
fn unreachable_tiered(local: &MemoryStore) -> TieredStore {
    let redis = RedisConfig {
        enabled: true,
        url: "redis://127.0.0.1:1".to_string(),
        timeout_ms: 200,
        ..Default::default()
    };
    let pool = create_redis_pool(&redis).unwrap();
    TieredStore::new(local.clone(), RedisStore::new(pool), Duration::from_secs(60))
}

#[tokio::test]
async fn test_tiered_store_with_redis_down_skips_local_write() {
    let local = MemoryStore::new();
    let cache = ProcessCache::from_config(
        Arc::new(unreachable_tiered(&local)),
        &CacheConfig::default(),
        MetricsRecorder::default(),
    )
    .unwrap();
    let params = CacheParams::new().with("offset", 0);

    assert!(!cache.set(&Namespace::JOBS, &params, &42, None).await.unwrap());
    assert!(local.is_empty());
    assert_eq!(cache.get::<i32>(&Namespace::JOBS, &params).await.unwrap(), None);
}

#[tokio::test]
async fn test_tiered_store_with_redis_down_still_clears_local_tier() {
    let local = MemoryStore::new();
    let config = CacheConfig::default();

    // Entries cached locally before Redis went away.
    let before_outage =
        ProcessCache::from_config(Arc::new(local.clone()), &config, MetricsRecorder::default()).unwrap();
    let params = CacheParams::new().with("offset", 0);
    before_outage.set(&Namespace::JOBS, &params, &42, None).await.unwrap();
    before_outage.set(&Namespace::USERS, &params, &7, None).await.unwrap();

    let cache = ProcessCache::from_config(
        Arc::new(unreachable_tiered(&local)),
        &config,
        MetricsRecorder::default(),
    )
    .unwrap();
    assert_eq!(cache.get::<i32>(&Namespace::JOBS, &params).await.unwrap(), Some(42));

    // L2 failure is swallowed, but the local copies are gone.
    assert_eq!(cache.invalidate_namespace(&Namespace::JOBS).await, 0);
    assert_eq!(cache.get::<i32>(&Namespace::JOBS, &params).await.unwrap(), None);
    assert_eq!(cache.get::<i32>(&Namespace::USERS, &params).await.unwrap(), Some(7));
    assert_eq!(local.len(), 1);
}

#[tokio::test]
async fn test_get_or_fetch_runs_fetch_once() {
    let cache = local_cache();
    let params = CacheParams::new().with("company_id", "42");
    let calls = AtomicUsize::new(0);

    for _ in 0..3 {
        let value: Result<String, jobquest_cache::CacheError> = cache
            .get_or_fetch(&Namespace::COMPANY, &params, None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("Acme".to_string())
            })
            .await;
        assert_eq!(value.unwrap(), "Acme");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_or_fetch_propagates_fetch_error() {
    #[derive(Debug)]
    enum FetchFailed {
        Db,
        Cache,
    }

    impl From<jobquest_cache::CacheError> for FetchFailed {
        fn from(_: jobquest_cache::CacheError) -> Self {
            Self::Cache
        }
    }

    let cache = local_cache();
    let params = CacheParams::new().with("id", 1);

    let result: Result<i32, FetchFailed> = cache
        .get_or_fetch(&Namespace::JOBS, &params, None, || async { Err(FetchFailed::Db) })
        .await;
    assert!(matches!(result, Err(FetchFailed::Db)));
    assert_eq!(cache.get::<i32>(&Namespace::JOBS, &params).await.unwrap(), None);

    let malformed: Result<i32, FetchFailed> = cache
        .get_or_fetch(&Namespace::JOBS, &CacheParams::new().with("", 1), None, || async {
            Ok(1)
        })
        .await;
    assert!(matches!(malformed, Err(FetchFailed::Cache)));
}
