//! Request-scoped batching loader for one entity kind.
//!
//! ## Dispatch
//!
//! The `load()` that finds no pending batch opens one and drives its dispatch: it
//! yields to the scheduler once (and waits `batch_delay`) before sealing the batch.
//! Sibling futures polled in the same pass as the opener, such as the other
//! branches of a `join_all`, enqueue before the opener runs again, so they land in
//! the same [`BatchFetcher`] call whichever worker thread the task runs on:
//!
//! ```text
//! load(A) ─┐
//! load(B) ─┼─ pending {A, B} ── yield ── seal ── fetch([A, B]) ── memo + wake callers
//! load(A) ─┘        (dedup)
//! ```
//!
//! The fetch itself runs on its own task, so dropping the opener neither loses
//! the batch nor cancels it for the other callers.
//!
//! A batch reaching `max_batch_size` is sealed immediately and a new one starts.
//!
//! ## Single-flight
//!
//! A key stays in the waiting table from the moment it is queued until its batch
//! resolves. Concurrent loads of the same key share that batch's result instead of
//! queueing the key again.
//!
//! Failures are delivered to every caller of the batch and are not memoized, so a
//! later load retries.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use indexmap::IndexSet;
use jobquest_metrics::MetricsRecorder;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::config::LoaderConfig;
use crate::error::{FetchError, LoadError};
use crate::fetcher::DynBatchFetcher;
use crate::kind::{EntityKind, LoadKey};

/// A loaded entity. Repeated loads of one key return the same allocation.
pub type LoadedValue = Arc<Value>;

type BatchMap = Arc<HashMap<LoadKey, LoadedValue>>;
type BatchOutcome = Result<BatchMap, Arc<FetchError>>;
type SharedBatch = Shared<BoxFuture<'static, Result<BatchMap, LoadError>>>;

struct PendingBatch {
    id: u64,
    keys: IndexSet<LoadKey>,
    tx: oneshot::Sender<BatchOutcome>,
    result: SharedBatch,
}

#[derive(Default)]
struct State {
    memo: HashMap<LoadKey, Option<LoadedValue>>,
    /// Queued or in-flight keys and the batch that will answer them.
    waiting: HashMap<LoadKey, SharedBatch>,
    pending: Option<PendingBatch>,
    next_batch_id: u64,
}

struct Inner {
    kind: EntityKind,
    fetcher: DynBatchFetcher,
    config: LoaderConfig,
    metrics: MetricsRecorder,
    token: CancellationToken,
    state: Mutex<State>,
}

/// Batches and memoizes loads of one entity kind within one request.
pub struct Loader {
    inner: Arc<Inner>,
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("kind", &self.inner.kind)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

enum Slot {
    Ready(Option<LoadedValue>),
    Waiting(SharedBatch),
}

impl Loader {
    /// Creates a loader. Dispatches stop once `token` is cancelled.
    #[must_use]
    pub fn new(
        kind: EntityKind,
        fetcher: DynBatchFetcher,
        config: LoaderConfig,
        metrics: MetricsRecorder,
        token: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                kind,
                fetcher,
                config,
                metrics,
                token,
                state: Mutex::new(State::default()),
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.inner.kind
    }

    /// Loads one entity. `Ok(None)` means the fetcher did not return the key.
    ///
    /// # Errors
    ///
    /// [`LoadError::BatchFetchFailed`] if the batch failed, [`LoadError::Cancelled`] if
    /// the request was torn down first.
    pub async fn load(&self, key: LoadKey) -> Result<Option<LoadedValue>, LoadError> {
        let (batch, opener) = {
            let mut state = self.inner.state.lock();
            if let Some(value) = state.memo.get(&key) {
                trace!(key = %key, "memo hit");
                return Ok(value.clone());
            }
            Inner::enqueue(&self.inner, &mut state, &key)
        };

        if let Some(opener) = opener {
            opener.seal_after_window().await;
        }
        let map = batch.await?;
        Ok(map.get(&key).cloned())
    }

    /// Loads many entities. The output matches `keys` position for position,
    /// duplicates included.
    ///
    /// # Errors
    ///
    /// The first batch error encountered.
    pub async fn load_many(&self, keys: &[LoadKey]) -> Result<Vec<Option<LoadedValue>>, LoadError> {
        let mut opener: Option<BatchOpener> = None;
        let slots: Vec<Slot> = {
            let mut state = self.inner.state.lock();
            keys.iter()
                .map(|key| match state.memo.get(key) {
                    Some(value) => Slot::Ready(value.clone()),
                    None => {
                        let (batch, opened) = Inner::enqueue(&self.inner, &mut state, key);
                        // Earlier batches opened here were already dispatched when full.
                        if let Some(previous) = opened.and_then(|o| opener.replace(o)) {
                            previous.disarm();
                        }
                        Slot::Waiting(batch)
                    }
                })
                .collect()
        };

        if let Some(opener) = opener {
            opener.seal_after_window().await;
        }

        let mut values = Vec::with_capacity(keys.len());
        for (key, slot) in keys.iter().zip(slots) {
            let value = match slot {
                Slot::Ready(value) => value,
                Slot::Waiting(batch) => batch.await?.get(key).cloned(),
            };
            values.push(value);
        }
        Ok(values)
    }

    /// Seeds the memo so later loads of `key` never reach the fetcher.
    ///
    /// Returns `false` if the key was already memoized.
    pub fn prime(&self, key: LoadKey, value: Value) -> bool {
        let mut state = self.inner.state.lock();
        if state.memo.contains_key(&key) {
            return false;
        }
        state.memo.insert(key, Some(Arc::new(value)));
        true
    }

    /// Drops one memo entry, e.g. after the entity was written in this request.
    pub fn forget(&self, key: &LoadKey) -> bool {
        self.inner.state.lock().memo.remove(key).is_some()
    }

    /// Number of memoized keys.
    #[must_use]
    pub fn memo_len(&self) -> usize {
        self.inner.state.lock().memo.len()
    }
}

impl Inner {
    /// Queues `key` unless it is already waiting. Returns the batch that will answer
    /// it and, when this call opened a new pending batch, the handle that seals it.
    fn enqueue(this: &Arc<Self>, state: &mut State, key: &LoadKey) -> (SharedBatch, Option<BatchOpener>) {
        if let Some(batch) = state.waiting.get(key) {
            trace!(key = %key, "joining in-flight load");
            return (batch.clone(), None);
        }

        let (mut pending, opened) = match state.pending.take() {
            Some(pending) => (pending, false),
            None => {
                let id = state.next_batch_id;
                state.next_batch_id += 1;
                (PendingBatch::new(id), true)
            }
        };
        pending.keys.insert(key.clone());
        let result = pending.result.clone();
        state.waiting.insert(key.clone(), result.clone());

        if pending.keys.len() >= this.config.max_batch_size {
            debug!(kind = %this.kind, key_count = pending.keys.len(), "batch full, dispatching early");
            tokio::spawn(Self::run_batch(Arc::clone(this), pending));
            return (result, None);
        }

        let opener = opened.then(|| BatchOpener {
            inner: Arc::clone(this),
            id: pending.id,
            armed: true,
        });
        state.pending = Some(pending);
        (result, opener)
    }

    /// Seals batch `id` and hands it to its own fetch task, unless it was already
    /// sealed for size. A cancelled loader discards it instead.
    fn seal(this: &Arc<Self>, id: u64) {
        let batch = {
            let mut state = this.state.lock();
            if state.pending.as_ref().is_some_and(|pending| pending.id == id) {
                state.pending.take()
            } else {
                None
            }
        };
        let Some(batch) = batch else {
            return;
        };

        if this.token.is_cancelled() {
            this.discard(batch);
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Self::run_batch(Arc::clone(this), batch));
            }
            Err(_) => this.discard(batch),
        }
    }

    #[instrument(skip_all, fields(kind = %this.kind, key_count = batch.keys.len()))]
    async fn run_batch(this: Arc<Self>, batch: PendingBatch) {
        let PendingBatch { keys, tx, .. } = batch;
        let keys: Vec<LoadKey> = keys.into_iter().collect();

        debug!("dispatching batch");
        let started = Instant::now();
        let result = tokio::select! {
            _ = this.token.cancelled() => {
                this.forget_waiting(&keys);
                debug!("batch cancelled");
                return;
            }
            result = this.fetcher.fetch(&keys) => result,
        };
        let elapsed = started.elapsed();
        this.metrics
            .record_batch(this.kind.as_str(), keys.len(), elapsed, result.is_err());

        match result {
            Ok(found) => {
                let map: HashMap<LoadKey, LoadedValue> = found
                    .into_iter()
                    .map(|(key, value)| (key, Arc::new(value)))
                    .collect();
                {
                    let mut state = this.state.lock();
                    for key in &keys {
                        state.waiting.remove(key);
                        state
                            .memo
                            .entry(key.clone())
                            .or_insert_with(|| map.get(key).cloned());
                    }
                }
                debug!(
                    found = keys.iter().filter(|k| map.contains_key(*k)).count(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "batch loaded"
                );
                let _ = tx.send(Ok(Arc::new(map)));
            }
            Err(e) => {
                this.forget_waiting(&keys);
                warn!(error = %e, "batch fetch failed");
                let _ = tx.send(Err(Arc::new(e)));
            }
        }
    }

    /// Drops a batch unresolved; its callers see [`LoadError::Cancelled`].
    fn discard(&self, batch: PendingBatch) {
        let keys: Vec<LoadKey> = batch.keys.into_iter().collect();
        self.forget_waiting(&keys);
        debug!(kind = %self.kind, key_count = keys.len(), "batch cancelled before dispatch");
    }

    fn forget_waiting(&self, keys: &[LoadKey]) {
        let mut state = self.state.lock();
        for key in keys {
            state.waiting.remove(key);
        }
    }
}

impl PendingBatch {
    fn new(id: u64) -> Self {
        let (tx, rx) = oneshot::channel::<BatchOutcome>();
        let result = rx
            .map(|outcome| match outcome {
                Ok(Ok(map)) => Ok(map),
                Ok(Err(e)) => Err(LoadError::BatchFetchFailed(e)),
                Err(_) => Err(LoadError::Cancelled),
            })
            .boxed()
            .shared();

        Self {
            id,
            keys: IndexSet::new(),
            tx,
            result,
        }
    }
}

/// Held by the load that opened a pending batch; sealing is its job.
///
/// Dropped unsealed (the opening caller went away mid-window), it seals right away
/// so the batch's other callers are still answered.
struct BatchOpener {
    inner: Arc<Inner>,
    id: u64,
    armed: bool,
}

impl BatchOpener {
    /// Yields once, waits `batch_delay`, then seals. Returns early on cancellation.
    async fn seal_after_window(mut self) {
        let delay = self.inner.config.batch_delay();
        tokio::select! {
            _ = self.inner.token.cancelled() => {}
            _ = async {
                tokio::task::yield_now().await;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            } => {}
        }
        self.armed = false;
        Inner::seal(&self.inner, self.id);
    }

    /// Gives up the duty without sealing. Safe while the state lock is held.
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for BatchOpener {
    fn drop(&mut self) {
        if self.armed {
            Inner::seal(&self.inner, self.id);
        }
    }
}
