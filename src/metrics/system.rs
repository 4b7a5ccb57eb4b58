//! Periodic process metrics
//!
//! Samples the process's resident memory, heap and CPU time on a fixed
//! interval, independent of any request. `start()` and `stop()` are both
//! idempotent.

use crate::resources;
use crate::telemetry::noop::NoopInstrument;
use crate::telemetry::{Gauge, MetricsProvider};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

pub const PROCESS_RESIDENT_MEMORY_BYTES: &str = "process_resident_memory_bytes";
pub const PROCESS_HEAP_USED_BYTES: &str = "process_heap_used_bytes";
pub const PROCESS_CPU_SECONDS_TOTAL: &str = "process_cpu_seconds_total";

#[derive(Clone)]
struct Gauges {
    rss: Arc<dyn Gauge>,
    heap: Arc<dyn Gauge>,
    cpu: Arc<dyn Gauge>,
}

impl Gauges {
    fn sample(&self) {
        let measurement = resources::snapshot();
        let cpu_micros = measurement.cpu.user_micros + measurement.cpu.system_micros;

        self.rss.set(measurement.memory.rss as f64, &[]);
        self.heap.set(measurement.memory.heap_used as f64, &[]);
        self.cpu.set(cpu_micros as f64 / 1_000_000.0, &[]);
    }
}

/// Background sampler feeding process gauges
pub struct SystemMetricsSampler {
    gauges: Gauges,
    period: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SystemMetricsSampler {
    pub fn new(provider: &dyn MetricsProvider, period: Duration) -> Self {
        Self {
            gauges: Gauges {
                rss: gauge(provider, PROCESS_RESIDENT_MEMORY_BYTES, "Resident set size in bytes"),
                heap: gauge(provider, PROCESS_HEAP_USED_BYTES, "Data and stack size in bytes"),
                cpu: gauge(
                    provider,
                    PROCESS_CPU_SECONDS_TOTAL,
                    "User and system CPU time in seconds",
                ),
            },
            period: period.max(Duration::from_millis(10)),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the sampling task on the current tokio runtime. No-op if running
    /// or if called outside a runtime.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("System metrics sampler already running");
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!("No tokio runtime, system metrics sampler not started");
            return;
        };

        let gauges = self.gauges.clone();
        let period = self.period;
        *handle = Some(runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                gauges.sample();
            }
        }));
        debug!(interval_ms = period.as_millis() as u64, "System metrics sampler started");
    }

    /// Stop the sampling task. No-op if not running.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            debug!("System metrics sampler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Take one sample immediately
    pub fn sample_now(&self) {
        self.gauges.sample();
    }
}

impl Drop for SystemMetricsSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn gauge(provider: &dyn MetricsProvider, name: &str, description: &str) -> Arc<dyn Gauge> {
    provider
        .create_gauge(name, description, &[])
        .unwrap_or_else(|e| {
            warn!(error = %e, metric = name, "Using no-op gauge");
            Arc::new(NoopInstrument)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::memory::InMemoryTelemetry;

    #[test]
    fn test_sample_now() {
        let telemetry = InMemoryTelemetry::new();
        let sampler = SystemMetricsSampler::new(&telemetry, Duration::from_secs(60));
        sampler.sample_now();

        assert_eq!(telemetry.samples(PROCESS_RESIDENT_MEMORY_BYTES).len(), 1);
        assert_eq!(telemetry.samples(PROCESS_HEAP_USED_BYTES).len(), 1);
        assert!(telemetry.samples(PROCESS_CPU_SECONDS_TOTAL)[0].value >= 0.0);
    }

    #[test]
    fn test_start_outside_runtime_does_not_start() {
        let telemetry = InMemoryTelemetry::new();
        let sampler = SystemMetricsSampler::new(&telemetry, Duration::from_millis(10));

        sampler.start();
        assert!(!sampler.is_running());
        sampler.stop();
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let telemetry = InMemoryTelemetry::new();
        let sampler = SystemMetricsSampler::new(&telemetry, Duration::from_millis(10));

        sampler.stop();
        assert!(!sampler.is_running());

        sampler.start();
        sampler.start();
        assert!(sampler.is_running());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!telemetry.samples(PROCESS_RESIDENT_MEMORY_BYTES).is_empty());

        sampler.stop();
        sampler.stop();
        assert!(!sampler.is_running());
    }
}
