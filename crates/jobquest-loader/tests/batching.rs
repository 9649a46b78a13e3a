//! Integration tests for batched loading.
//!
//! These tests verify:
//! - Deduplication and positional ordering within one dispatch
//! - Memoization within a request
//! - Batch failure fan-out
//! - Single-flight for concurrent loads of one key
//! - Coalescing on a multi-threaded runtime
//! - Cancellation on registry teardown

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use jobquest_loader::{
    BatchFetcher, EntityKind, FetchError, FetchResult, Fetchers, LoadError, LoadKey, LoaderConfig,
    LoaderRegistry,
};
use jobquest_metrics::MetricsRecorder;
use parking_lot::Mutex;
use serde_json::json;

/// Records every batch it receives and answers `{"id": ..}` for each key except "missing".
#[derive(Default)]
struct RecordingFetcher {
    batches: Mutex<Vec<Vec<LoadKey>>>,
    fail: AtomicBool,
    hang: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl RecordingFetcher {
    fn batches(&self) -> Vec<Vec<LoadKey>> {
        self.batches.lock().clone()
    }

    fn calls(&self) -> usize {
        self.batches.lock().len()
    }
}

#[async_trait]
impl BatchFetcher for RecordingFetcher {
    async fn fetch(&self, keys: &[LoadKey]) -> FetchResult {
        self.batches.lock().push(keys.to_vec());

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::backend("connection reset by peer"));
        }

        Ok(keys
            .iter()
            .filter(|k| k.id.as_str() != "missing")
            .map(|k| (k.clone(), json!({ "id": k.id.as_str() })))
            .collect::<HashMap<_, _>>())
    }
}

fn setup() -> (Arc<RecordingFetcher>, LoaderRegistry, MetricsRecorder) {
    setup_with(LoaderConfig::default())
}

fn setup_with(config: LoaderConfig) -> (Arc<RecordingFetcher>, LoaderRegistry, MetricsRecorder) {
    let fetcher = Arc::new(RecordingFetcher::default());
    let metrics = MetricsRecorder::default();
    let registry = LoaderRegistry::new(Fetchers::uniform(fetcher.clone()), config, metrics.clone());
    (fetcher, registry, metrics)
}

fn job(id: &str) -> LoadKey {
    LoadKey::new(EntityKind::Job, id)
}

#[tokio::test]
async fn test_concurrent_loads_share_one_batch() {
    let (fetcher, registry, _) = setup();
    let loader = registry.get_loader(EntityKind::Job);

    let (a1, b, a2) = tokio::join!(loader.load(job("a")), loader.load(job("b")), loader.load(job("a")));

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(fetcher.batches()[0], vec![job("a"), job("b")]);
    assert_eq!(*a1.unwrap().unwrap(), json!({"id": "a"}));
    assert_eq!(*b.unwrap().unwrap(), json!({"id": "b"}));
    assert_eq!(*a2.unwrap().unwrap(), json!({"id": "a"}));
}

#[tokio::test]
async fn test_load_many_preserves_order_and_duplicates() {
    let (fetcher, registry, _) = setup();
    let loader = registry.get_loader(EntityKind::Job);

    let values = loader
        .load_many(&[job("a"), job("b"), job("missing"), job("a")])
        .await
        .unwrap();

    assert_eq!(values.len(), 4);
    assert_eq!(*values[0].clone().unwrap(), json!({"id": "a"}));
    assert_eq!(*values[1].clone().unwrap(), json!({"id": "b"}));
    assert!(values[2].is_none());
    assert!(Arc::ptr_eq(values[0].as_ref().unwrap(), values[3].as_ref().unwrap()));

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(fetcher.batches()[0], vec![job("a"), job("b"), job("missing")]);
}

#[tokio::test]
async fn test_memoized_value_is_identical() {
    let (fetcher, registry, _) = setup();
    let loader = registry.get_loader(EntityKind::Job);

    let first = loader.load(job("a")).await.unwrap().unwrap();
    let second = loader.load(job("a")).await.unwrap().unwrap();
    let via_registry = registry
        .get_loader(EntityKind::Job)
        .load(job("a"))
        .await
        .unwrap()
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &via_registry));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_kinds_batch_separately() {
    let (fetcher, registry, _) = setup();

    let job_loader = registry.get_loader(EntityKind::Job);
    let company_loader = registry.get_loader(EntityKind::Company);
    let (job_value, company_value) = tokio::join!(
        job_loader.load(job("1")),
        company_loader.load(LoadKey::new(EntityKind::Company, "1")),
    );

    assert!(job_value.unwrap().is_some());
    assert!(company_value.unwrap().is_some());
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_batch_failure_reaches_every_caller() {
    let (fetcher, registry, metrics) = setup();
    fetcher.fail.store(true, Ordering::SeqCst);
    let loader = registry.get_loader(EntityKind::Job);

    let results = join_all([loader.load(job("a")), loader.load(job("b")), loader.load(job("c"))]).await;
    assert_eq!(fetcher.calls(), 1);

    let errors: Vec<Arc<FetchError>> = results
        .into_iter()
        .map(|r| match r {
            Err(LoadError::BatchFetchFailed(e)) => e,
            other => panic!("expected batch failure, got {other:?}"),
        })
        .collect();
    assert!(errors.iter().all(|e| Arc::ptr_eq(e, &errors[0])));

    let stats = metrics.batch_stats();
    assert_eq!(stats["job"].failures, 1);

    // Failures are not memoized.
    fetcher.fail.store(false, Ordering::SeqCst);
    let value = loader.load(job("a")).await.unwrap();
    assert!(value.is_some());
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_thousand_concurrent_loads_fetch_once() {
    let (fetcher, registry, metrics) = setup();
    let loader = registry.get_loader(EntityKind::Job);

    let results = join_all((0..1000).map(|_| loader.load(job("hot")))).await;

    assert_eq!(fetcher.calls(), 1);
    assert_eq!(fetcher.batches()[0].len(), 1);
    assert!(results.iter().all(|r| matches!(r, Ok(Some(_)))));

    let stats = metrics.batch_stats();
    assert_eq!(stats["job"].batches, 1);
    assert_eq!(stats["job"].keys, 1);
}

#[tokio::test]
async fn test_loads_join_in_flight_batch() {
    let (fetcher, registry, _) = setup();
    *fetcher.latency.lock() = Some(Duration::from_millis(50));
    let loader = registry.get_loader(EntityKind::Job);

    let first = {
        let loader = Arc::clone(&loader);
        tokio::spawn(async move { loader.load(job("slow")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fetcher.calls(), 1);

    let late = join_all((0..10).map(|_| loader.load(job("slow")))).await;

    assert!(first.await.unwrap().unwrap().is_some());
    assert!(late.iter().all(|r| matches!(r, Ok(Some(_)))));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_clear_cancels_in_flight_batch() {
    let (fetcher, registry, _) = setup();
    fetcher.hang.store(true, Ordering::SeqCst);
    let loader = registry.get_loader(EntityKind::Job);

    let waiter = {
        let loader = Arc::clone(&loader);
        tokio::spawn(async move { loader.load(job("never")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.calls(), 1);

    registry.clear();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should resolve after clear")
        .unwrap();
    assert!(matches!(result, Err(LoadError::Cancelled)));
    assert_eq!(loader.memo_len(), 0);
}

#[tokio::test]
async fn test_drop_cancels_pending_batch() {
    let (fetcher, registry, _) = setup();
    fetcher.hang.store(true, Ordering::SeqCst);
    let loader = registry.get_loader(EntityKind::Company);

    let waiter = {
        let loader = Arc::clone(&loader);
        tokio::spawn(async move { loader.load(LoadKey::new(EntityKind::Company, "x")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    drop(registry);

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should resolve after drop")
        .unwrap();
    assert!(matches!(result, Err(LoadError::Cancelled)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_join_all_coalesces_on_multi_thread_runtime() {
    for _ in 0..20 {
        let (fetcher, registry, _) = setup_with(LoaderConfig {
            batch_delay_ms: 0,
            ..LoaderConfig::default()
        });
        let loader = registry.get_loader(EntityKind::Job);

        let results = join_all((0..500).map(|i| loader.load(job(&i.to_string())))).await;

        assert!(results.iter().all(|r| matches!(r, Ok(Some(_)))));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fetcher.batches()[0].len(), 500);
    }
}

#[tokio::test]
async fn test_clear_during_window_discards_batch() {
    let (fetcher, registry, _) = setup_with(LoaderConfig {
        batch_delay_ms: 50,
        ..LoaderConfig::default()
    });
    let loader = registry.get_loader(EntityKind::Job);

    let waiter = {
        let loader = Arc::clone(&loader);
        tokio::spawn(async move { loader.load(job("queued")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fetcher.calls(), 0);

    registry.clear();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should resolve after clear")
        .unwrap();
    assert!(matches!(result, Err(LoadError::Cancelled)));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_dropped_opener_still_dispatches() {
    let (fetcher, registry, _) = setup_with(LoaderConfig {
        batch_delay_ms: 50,
        ..LoaderConfig::default()
    });
    let loader = registry.get_loader(EntityKind::Job);

    // The first load opens the batch and is abandoned mid-window.
    let opener = {
        let loader = Arc::clone(&loader);
        tokio::spawn(async move { loader.load(job("a")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let joined = {
        let loader = Arc::clone(&loader);
        tokio::spawn(async move { loader.load(job("b")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    opener.abort();

    let value = tokio::time::timeout(Duration::from_secs(1), joined)
        .await
        .expect("joined load should resolve")
        .unwrap()
        .unwrap();
    assert!(value.is_some());
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(fetcher.batches()[0], vec![job("a"), job("b")]);
}
