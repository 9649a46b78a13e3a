//! Rolling in-process metrics for the cache and the batch loaders.
//!
//! The recorder only observes: it never feeds back into cache or loader control flow,
//! and every method is infallible.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::MetricsConfig;
use crate::prometheus;

/// Selects which recorded operations a rate or percentile is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitRateWindow {
    /// The last N recorded operations.
    LastOps(usize),
    /// Operations recorded within the trailing duration.
    Last(Duration),
    /// Everything still held in the bounded history.
    All,
}

impl HitRateWindow {
    /// Window covering the trailing `minutes`.
    #[must_use]
    pub fn minutes(minutes: u64) -> Self {
        Self::Last(Duration::from_secs(minutes * 60))
    }
}

#[derive(Debug, Clone)]
struct CacheOpRecord {
    hit: bool,
    duration: Duration,
    at: Instant,
}

#[derive(Debug, Clone)]
struct BatchRecord {
    key_count: usize,
    duration: Duration,
    failed: bool,
}

#[derive(Debug, Default, Clone)]
struct BatchTotals {
    batches: u64,
    keys: u64,
    failures: u64,
}

/// One host CPU/memory sample.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemSample {
    /// Global CPU usage in percent.
    pub cpu_percent: f32,
    /// Used memory in percent of total.
    pub memory_percent: f64,
    /// Used memory in MiB.
    pub memory_used_mb: f64,
}

#[derive(Debug, Default)]
struct RecorderState {
    cache_ops: VecDeque<CacheOpRecord>,
    hits_total: u64,
    misses_total: u64,
    ops_by_kind: HashMap<String, (u64, u64)>,
    hit_rate_series: VecDeque<f64>,
    batches: HashMap<String, VecDeque<BatchRecord>>,
    batch_totals: HashMap<String, BatchTotals>,
    system: VecDeque<SystemSample>,
}

struct Inner {
    config: MetricsConfig,
    state: Mutex<RecorderState>,
}

/// Records cache hit/miss events and batch-fetch costs.
///
/// Cheap to clone; all clones share the same windows.
#[derive(Clone)]
pub struct MetricsRecorder {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricsRecorder {
    /// Creates a recorder with the given bounds.
    #[must_use]
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(RecorderState::default()),
            }),
        }
    }

    /// Returns the configuration this recorder was built with.
    #[must_use]
    pub fn config(&self) -> &MetricsConfig {
        &self.inner.config
    }

    /// Records one cache operation.
    pub fn record_cache_op(&self, kind: &str, hit: bool, duration: Duration) {
        prometheus::emit_cache_op(kind, hit, duration);

        let config = &self.inner.config;
        let mut state = self.inner.state.lock();

        if state.cache_ops.len() == config.history_size {
            state.cache_ops.pop_front();
        }
        state.cache_ops.push_back(CacheOpRecord {
            hit,
            duration,
            at: Instant::now(),
        });

        if hit {
            state.hits_total += 1;
        } else {
            state.misses_total += 1;
        }
        let by_kind = state.ops_by_kind.entry(kind.to_string()).or_default();
        if hit {
            by_kind.0 += 1;
        } else {
            by_kind.1 += 1;
        }

        let span = config.hit_rate_span.min(state.cache_ops.len());
        let recent_hits = state.cache_ops.iter().rev().take(span).filter(|op| op.hit).count();
        let rate = percentage(recent_hits, span);
        if state.hit_rate_series.len() == config.window_size {
            state.hit_rate_series.pop_front();
        }
        state.hit_rate_series.push_back(rate);
    }

    /// Starts timing a cache operation.
    ///
    /// The returned timer carries an explicit `hit` flag that the caller sets inside the
    /// timed scope; the operation is recorded on [`CacheOpTimer::finish`] or on drop.
    #[must_use]
    pub fn start_cache_op(&self, kind: impl Into<String>) -> CacheOpTimer {
        CacheOpTimer {
            recorder: self.clone(),
            kind: kind.into(),
            started: Instant::now(),
            hit: false,
            recorded: false,
        }
    }

    /// Hit rate in percent over the selected window. Returns `0.0` when nothing was recorded.
    #[must_use]
    pub fn hit_rate(&self, window: HitRateWindow) -> f64 {
        let state = self.inner.state.lock();
        let ops = select_window(&state.cache_ops, window);
        let hits = ops.iter().filter(|op| op.hit).count();
        percentage(hits, ops.len())
    }

    /// Cache operation latency percentiles over the selected window.
    #[must_use]
    pub fn latency_percentiles(&self, window: HitRateWindow) -> LatencyPercentiles {
        let state = self.inner.state.lock();
        let durations = select_window(&state.cache_ops, window)
            .into_iter()
            .map(|op| op.duration)
            .collect();
        LatencyPercentiles::from_durations(durations)
    }

    /// Records one BatchFetcher call.
    pub fn record_batch(&self, entity_kind: &str, key_count: usize, duration: Duration, failed: bool) {
        prometheus::emit_batch(entity_kind, key_count, duration, failed);

        let window_size = self.inner.config.window_size;
        let mut state = self.inner.state.lock();

        let window = state.batches.entry(entity_kind.to_string()).or_default();
        if window.len() == window_size {
            window.pop_front();
        }
        window.push_back(BatchRecord {
            key_count,
            duration,
            failed,
        });

        let totals = state.batch_totals.entry(entity_kind.to_string()).or_default();
        totals.batches += 1;
        totals.keys += key_count as u64;
        if failed {
            totals.failures += 1;
        }
    }

    /// Per entity kind batch statistics.
    #[must_use]
    pub fn batch_stats(&self) -> BTreeMap<String, BatchStats> {
        let state = self.inner.state.lock();
        state
            .batch_totals
            .iter()
            .map(|(kind, totals)| {
                let window = state.batches.get(kind);
                let durations = window
                    .map(|w| w.iter().map(|b| b.duration).collect())
                    .unwrap_or_default();
                let recent_failures = window
                    .map(|w| w.iter().filter(|b| b.failed).count())
                    .unwrap_or(0);
                let recent = window.map(VecDeque::len).unwrap_or(0);
                let recent_keys: usize = window
                    .map(|w| w.iter().map(|b| b.key_count).sum())
                    .unwrap_or(0);
                let stats = BatchStats {
                    batches: totals.batches,
                    keys: totals.keys,
                    failures: totals.failures,
                    avg_keys_per_batch: if recent == 0 {
                        0.0
                    } else {
                        recent_keys as f64 / recent as f64
                    },
                    recent_failure_rate: percentage(recent_failures, recent),
                    latency: LatencyPercentiles::from_durations(durations),
                };
                (kind.clone(), stats)
            })
            .collect()
    }

    /// Stores one host sample.
    pub fn record_system_sample(&self, sample: SystemSample) {
        prometheus::emit_system(sample.cpu_percent, sample.memory_percent);

        let cap = self.inner.config.system_samples;
        let mut state = self.inner.state.lock();
        if state.system.len() == cap {
            state.system.pop_front();
        }
        state.system.push_back(sample);
    }

    /// The retained host samples, oldest first.
    #[must_use]
    pub fn system_samples(&self) -> Vec<SystemSample> {
        self.inner.state.lock().system.iter().copied().collect()
    }

    /// Snapshot for a health or monitoring endpoint.
    #[must_use]
    pub fn get_cache_stats(&self) -> CacheStatsSnapshot {
        let (hits, misses, by_kind, series) = {
            let state = self.inner.state.lock();
            let by_kind = state
                .ops_by_kind
                .iter()
                .map(|(kind, (h, m))| {
                    (
                        kind.clone(),
                        KindStats {
                            hits: *h,
                            misses: *m,
                        },
                    )
                })
                .collect();
            let series = state.hit_rate_series.iter().rev().take(10).rev().copied().collect();
            (state.hits_total, state.misses_total, by_kind, series)
        };

        CacheStatsSnapshot {
            hits,
            misses,
            hit_rate_percent: self.hit_rate(HitRateWindow::All),
            recent_hit_rates: series,
            latency: self.latency_percentiles(HitRateWindow::All),
            by_kind,
            batches: self.batch_stats(),
        }
    }

    /// Derives an overall health verdict from batch failures, batch latency and host load.
    #[must_use]
    pub fn health_status(&self) -> HealthReport {
        let batches = self.batch_stats();
        let mut issues = Vec::new();
        let mut status = HealthStatus::Healthy;

        let (failed, total) = {
            let state = self.inner.state.lock();
            state.batches.values().fold((0usize, 0usize), |(f, t), w| {
                (f + w.iter().filter(|b| b.failed).count(), t + w.len())
            })
        };
        let failure_rate = percentage(failed, total);
        if failure_rate > 10.0 {
            issues.push(format!("High batch failure rate: {failure_rate:.1}%"));
            status = status.worst(HealthStatus::Unhealthy);
        } else if failure_rate > 5.0 {
            issues.push(format!("Elevated batch failure rate: {failure_rate:.1}%"));
            status = status.worst(HealthStatus::Degraded);
        }

        for (kind, stats) in &batches {
            let p50 = stats.latency.p50_ms;
            if p50 > 2000.0 {
                issues.push(format!("Slow {kind} batches: {p50:.0}ms"));
                status = status.worst(HealthStatus::Unhealthy);
            } else if p50 > 1000.0 {
                issues.push(format!("Elevated {kind} batch latency: {p50:.0}ms"));
                status = status.worst(HealthStatus::Degraded);
            }
        }

        let samples = self.system_samples();
        if let Some(last) = samples.last() {
            if last.cpu_percent > 90.0 {
                issues.push(format!("High CPU usage: {:.1}%", last.cpu_percent));
                status = status.worst(HealthStatus::Unhealthy);
            }
            if last.memory_percent > 90.0 {
                issues.push(format!("High memory usage: {:.1}%", last.memory_percent));
                status = status.worst(HealthStatus::Unhealthy);
            }
        }

        HealthReport {
            status,
            issues,
            system: samples.into_iter().rev().take(5).rev().collect(),
        }
    }
}

fn select_window(ops: &VecDeque<CacheOpRecord>, window: HitRateWindow) -> Vec<CacheOpRecord> {
    match window {
        HitRateWindow::LastOps(n) => {
            let skip = ops.len().saturating_sub(n);
            ops.iter().skip(skip).cloned().collect()
        }
        HitRateWindow::Last(span) => match Instant::now().checked_sub(span) {
            Some(cutoff) => ops.iter().filter(|op| op.at >= cutoff).cloned().collect(),
            None => ops.iter().cloned().collect(),
        },
        HitRateWindow::All => ops.iter().cloned().collect(),
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Guard timing one cache operation.
///
/// Set [`hit`](Self::hit) (or call [`mark_hit`](Self::mark_hit)) inside the timed scope.
#[must_use = "the operation is recorded when the timer finishes or drops"]
pub struct CacheOpTimer {
    recorder: MetricsRecorder,
    kind: String,
    started: Instant,
    /// Whether the operation was served from the cache.
    pub hit: bool,
    recorded: bool,
}

impl CacheOpTimer {
    /// Flags the operation as a hit.
    pub fn mark_hit(&mut self) {
        self.hit = true;
    }

    /// Records the operation now and returns its duration.
    pub fn finish(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if !self.recorded {
            self.recorded = true;
            self.recorder.record_cache_op(&self.kind, self.hit, elapsed);
        }
        elapsed
    }
}

impl Drop for CacheOpTimer {
    fn drop(&mut self) {
        self.record();
    }
}

/// p50/p95/p99 in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyPercentiles {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub samples: usize,
}

impl LatencyPercentiles {
    fn from_durations(mut durations: Vec<Duration>) -> Self {
        if durations.is_empty() {
            return Self::default();
        }
        durations.sort_unstable();
        let at = |q: f64| {
            let idx = ((durations.len() as f64 * q) as usize).min(durations.len() - 1);
            durations[idx].as_secs_f64() * 1000.0
        };
        Self {
            p50_ms: at(0.50),
            p95_ms: at(0.95),
            p99_ms: at(0.99),
            samples: durations.len(),
        }
    }
}

/// Batch statistics for one entity kind.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    /// Lifetime number of BatchFetcher calls.
    pub batches: u64,
    /// Lifetime number of keys fetched.
    pub keys: u64,
    /// Lifetime number of failed calls.
    pub failures: u64,
    /// Mean batch size over the rolling window.
    pub avg_keys_per_batch: f64,
    /// Failure rate in percent over the rolling window.
    pub recent_failure_rate: f64,
    /// Fetch latency over the rolling window.
    pub latency: LatencyPercentiles,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct KindStats {
    pub hits: u64,
    pub misses: u64,
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
    /// The last ten rolling hit-rate points.
    pub recent_hit_rates: Vec<f64>,
    pub latency: LatencyPercentiles,
    pub by_kind: BTreeMap<String, KindStats>,
    pub batches: BTreeMap<String, BatchStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    fn worst(self, other: Self) -> Self {
        self.max(other)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    /// The last five host samples.
    pub system: Vec<SystemSample>,
}
