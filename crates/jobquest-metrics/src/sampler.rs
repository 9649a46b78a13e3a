//! Periodic host CPU/memory sampling.
//!
//! The sampler is an explicitly started task whose lifetime is owned by the caller:
//! [`SystemSampler::stop`] cancels it and waits for it to exit, and dropping the
//! sampler cancels it as well.

use std::time::Duration;

use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::recorder::{MetricsRecorder, SystemSample};

/// Handle to the running sampling task.
pub struct SystemSampler {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SystemSampler {
    /// Spawns the sampling task, taking the first sample immediately.
    #[must_use]
    pub fn start(recorder: MetricsRecorder, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.child_token();

        let handle = tokio::spawn(async move {
            let mut sys = System::new_with_specifics(
                RefreshKind::nothing()
                    .with_cpu(CpuRefreshKind::everything())
                    .with_memory(MemoryRefreshKind::everything()),
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval_secs = interval.as_secs(), "System sampler started");

            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let sample = take_sample(&mut sys);
                        tracing::trace!(
                            cpu = sample.cpu_percent,
                            memory = sample.memory_percent,
                            "System sample"
                        );
                        recorder.record_system_sample(sample);
                    }
                }
            }

            tracing::info!("System sampler stopped");
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Whether the task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Cancels the task and waits for it to finish.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "System sampler task ended abnormally");
            }
        }
    }
}

impl Drop for SystemSampler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

fn take_sample(sys: &mut System) -> SystemSample {
    sys.refresh_cpu_all();
    sys.refresh_memory();

    let total = sys.total_memory();
    let used = sys.used_memory();
    let memory_percent = if total > 0 {
        used as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    SystemSample {
        cpu_percent: sys.global_cpu_usage(),
        memory_percent,
        memory_used_mb: used as f64 / (1024.0 * 1024.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sampler_records_and_stops() {
        let recorder = MetricsRecorder::default();
        let sampler = SystemSampler::start(recorder.clone(), Duration::from_millis(10));
        assert!(sampler.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        sampler.stop().await;

        let samples = recorder.system_samples().len();
        assert!(samples >= 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(recorder.system_samples().len(), samples);
    }
}
