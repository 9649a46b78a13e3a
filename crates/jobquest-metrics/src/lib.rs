//! # jobquest-metrics
//!
//! Observability for the JobQuest data layer: rolling cache hit/miss windows,
//! batch-loader cost tracking and periodic host sampling.
//!
//! ## Modules
//!
//! - [`config`] - Window sizes and sampling interval
//! - [`recorder`] - The [`MetricsRecorder`] and its snapshots
//! - [`prometheus`] - Optional Prometheus exporter
//! - [`sampler`] - Cancelable host CPU/memory sampler

pub mod config;
pub mod prometheus;
pub mod recorder;
pub mod sampler;

pub use config::MetricsConfig;
pub use prometheus::{init_prometheus, render_prometheus};
pub use recorder::{
    BatchStats, CacheOpTimer, CacheStatsSnapshot, HealthReport, HealthStatus, HitRateWindow,
    LatencyPercentiles, MetricsRecorder, SystemSample,
};
pub use sampler::SystemSampler;
