//! Prometheus export of cache and loader metrics.
//!
//! Every event the [`MetricsRecorder`](crate::MetricsRecorder) sees is mirrored to the
//! `metrics` facade. Without an installed recorder the macros are no-ops, so the
//! rolling in-process windows keep working whether or not Prometheus is enabled.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metric names as constants for consistency.
pub mod names {
    // Cache metrics
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_OP_DURATION_SECONDS: &str = "cache_op_duration_seconds";

    // Loader metrics
    pub const LOADER_BATCHES_TOTAL: &str = "loader_batches_total";
    pub const LOADER_BATCH_KEYS: &str = "loader_batch_keys";
    pub const LOADER_BATCH_DURATION_SECONDS: &str = "loader_batch_duration_seconds";

    // Host metrics
    pub const PROCESS_CPU_PERCENT: &str = "process_host_cpu_percent";
    pub const PROCESS_MEMORY_PERCENT: &str = "process_host_memory_percent";
}

/// Install the Prometheus recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_prometheus() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROMETHEUS_HANDLE.set(handle).is_err() {
                tracing::warn!("Failed to store Prometheus handle (already set)");
                return false;
            }

            tracing::info!("Prometheus metrics initialized");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Render all metrics in Prometheus text format.
///
/// Returns `None` if the exporter was not installed.
pub fn render_prometheus() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|handle| handle.render())
}

pub(crate) fn emit_cache_op(kind: &str, hit: bool, duration: Duration) {
    if hit {
        counter!(names::CACHE_HITS_TOTAL, "kind" => kind.to_string()).increment(1);
    } else {
        counter!(names::CACHE_MISSES_TOTAL, "kind" => kind.to_string()).increment(1);
    }
    histogram!(names::CACHE_OP_DURATION_SECONDS, "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

pub(crate) fn emit_batch(entity_kind: &str, key_count: usize, duration: Duration, failed: bool) {
    let outcome = if failed { "error" } else { "ok" };
    counter!(
        names::LOADER_BATCHES_TOTAL,
        "entity" => entity_kind.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(names::LOADER_BATCH_KEYS, "entity" => entity_kind.to_string())
        .record(key_count as f64);
    histogram!(names::LOADER_BATCH_DURATION_SECONDS, "entity" => entity_kind.to_string())
        .record(duration.as_secs_f64());
}

pub(crate) fn emit_system(cpu_percent: f32, memory_percent: f64) {
    gauge!(names::PROCESS_CPU_PERCENT).set(f64::from(cpu_percent));
    gauge!(names::PROCESS_MEMORY_PERCENT).set(memory_percent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_recorder_is_noop() {
        emit_cache_op("search", true, Duration::from_millis(2));
        emit_batch("company", 3, Duration::from_millis(5), false);
        emit_system(12.5, 40.0);
    }
}
