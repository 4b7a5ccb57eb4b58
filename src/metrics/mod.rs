//! Metrics module
//!
//! Per-request instruments, label normalization, the Prometheus scrape
//! endpoint and the periodic process sampler.

pub mod labels;
#[cfg(feature = "metrics")]
pub mod server;
pub mod system;

use crate::telemetry::noop::NoopInstrument;
use crate::telemetry::{Counter, Histogram, MetricsProvider};
use labels::RequestLabels;
use std::sync::Arc;
use tracing::warn;

pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const REQUEST_MEMORY_BYTES: &str = "http_request_memory_usage_bytes";
pub const REQUEST_CPU_SECONDS: &str = "http_request_cpu_time_seconds";

/// Label names shared by every per-request instrument
pub const REQUEST_LABEL_NAMES: &[&str] = &["method", "route", "status_code"];

/// Instruments emitted once per finalized request
#[derive(Clone)]
pub struct RequestInstruments {
    requests: Arc<dyn Counter>,
    duration: Arc<dyn Histogram>,
    memory: Arc<dyn Histogram>,
    cpu: Arc<dyn Histogram>,
}

impl RequestInstruments {
    /// Create every instrument on `provider`
    ///
    /// An instrument the provider refuses to create is replaced by a no-op so
    /// the remaining ones keep working.
    pub fn new(provider: &dyn MetricsProvider) -> Self {
        Self {
            requests: provider
                .create_counter(REQUESTS_TOTAL, "Total HTTP requests", REQUEST_LABEL_NAMES)
                .unwrap_or_else(|e| {
                    warn!(error = %e, metric = REQUESTS_TOTAL, "Using no-op counter");
                    Arc::new(NoopInstrument)
                }),
            duration: histogram(
                provider,
                REQUEST_DURATION_SECONDS,
                "HTTP request duration in seconds",
            ),
            memory: histogram(
                provider,
                REQUEST_MEMORY_BYTES,
                "Heap growth while serving a request in bytes",
            ),
            cpu: histogram(
                provider,
                REQUEST_CPU_SECONDS,
                "CPU time consumed while serving a request in seconds",
            ),
        }
    }

    /// Count the request and observe its duration
    pub fn record_request(&self, labels: &RequestLabels, duration_seconds: f64) {
        let pairs = labels.as_pairs();
        self.requests.add(1.0, &pairs);
        self.duration.record(duration_seconds, &pairs);
    }

    /// Observe the resources consumed by the request
    pub fn record_resources(&self, labels: &RequestLabels, memory_bytes: u64, cpu_seconds: f64) {
        let pairs = labels.as_pairs();
        self.memory.record(memory_bytes as f64, &pairs);
        self.cpu.record(cpu_seconds, &pairs);
    }
}

fn histogram(provider: &dyn MetricsProvider, name: &str, description: &str) -> Arc<dyn Histogram> {
    provider
        .create_histogram(name, description, REQUEST_LABEL_NAMES)
        .unwrap_or_else(|e| {
            warn!(error = %e, metric = name, "Using no-op histogram");
            Arc::new(NoopInstrument)
        })
}

impl std::fmt::Debug for RequestInstruments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestInstruments").finish_non_exhaustive()
    }
}
