//! Prometheus metrics provider
//!
//! Backs the [`MetricsProvider`] capability with `prometheus` vectors
//! registered on a [`Registry`]. Histogram buckets follow the metric's unit
//! suffix:
//!
//! | Suffix | Buckets |
//! |--------|---------|
//! | `_seconds` | 1ms .. 10s |
//! | `_bytes` | 1KiB .. 256MiB (x4) |
//! | other | prometheus defaults |

use super::{Counter, Gauge, Histogram, Labels, MetricsProvider, TelemetryError};
use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;
use tracing::debug;

/// Duration buckets in seconds
pub const DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0];

/// Metrics provider registering on a Prometheus registry
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
}

impl PrometheusMetrics {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    /// Provider registering on the process-wide default registry
    pub fn global() -> Self {
        Self::new(prometheus::default_registry().clone())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}

fn buckets_for(name: &str) -> Vec<f64> {
    if name.ends_with("_seconds") {
        DURATION_BUCKETS.to_vec()
    } else if name.ends_with("_bytes") {
        prometheus::exponential_buckets(1024.0, 4.0, 10)
            .unwrap_or_else(|_| prometheus::DEFAULT_BUCKETS.to_vec())
    } else {
        prometheus::DEFAULT_BUCKETS.to_vec()
    }
}

fn registration_error(name: &str, e: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricRegistration(format!("{}: {}", name, e))
}

/// Order label values the way the vector was declared; missing labels are empty
fn label_values<'a>(label_names: &[String], labels: &Labels<'a>) -> Vec<&'a str> {
    label_names
        .iter()
        .map(|name| {
            labels
                .iter()
                .find(|(k, _)| *k == name.as_str())
                .map(|(_, v)| *v)
                .unwrap_or("")
        })
        .collect()
}

fn owned(label_names: &[&str]) -> Vec<String> {
    label_names.iter().map(|s| s.to_string()).collect()
}

struct PromCounter {
    vec: CounterVec,
    label_names: Vec<String>,
}

impl Counter for PromCounter {
    fn add(&self, value: f64, labels: &Labels<'_>) {
        if value < 0.0 {
            return;
        }
        match self
            .vec
            .get_metric_with_label_values(&label_values(&self.label_names, labels))
        {
            Ok(counter) => counter.inc_by(value),
            Err(e) => debug!(error = %e, "Dropping counter observation"),
        }
    }
}

struct PromHistogram {
    vec: HistogramVec,
    label_names: Vec<String>,
}

impl Histogram for PromHistogram {
    fn record(&self, value: f64, labels: &Labels<'_>) {
        match self
            .vec
            .get_metric_with_label_values(&label_values(&self.label_names, labels))
        {
            Ok(histogram) => histogram.observe(value),
            Err(e) => debug!(error = %e, "Dropping histogram observation"),
        }
    }
}

struct PromGauge {
    vec: GaugeVec,
    label_names: Vec<String>,
}

impl Gauge for PromGauge {
    fn set(&self, value: f64, labels: &Labels<'_>) {
        match self
            .vec
            .get_metric_with_label_values(&label_values(&self.label_names, labels))
        {
            Ok(gauge) => gauge.set(value),
            Err(e) => debug!(error = %e, "Dropping gauge observation"),
        }
    }
}

impl MetricsProvider for PrometheusMetrics {
    fn create_counter(
        &self,
        name: &str,
        description: &str,
        label_names: &[&str],
    ) -> Result<Arc<dyn Counter>, TelemetryError> {
        let vec = CounterVec::new(Opts::new(name, description), label_names)
            .map_err(|e| registration_error(name, e))?;
        self.registry
            .register(Box::new(vec.clone()))
            .map_err(|e| registration_error(name, e))?;

        Ok(Arc::new(PromCounter {
            vec,
            label_names: owned(label_names),
        }))
    }

    fn create_histogram(
        &self,
        name: &str,
        description: &str,
        label_names: &[&str],
    ) -> Result<Arc<dyn Histogram>, TelemetryError> {
        let opts = HistogramOpts::new(name, description).buckets(buckets_for(name));
        let vec = HistogramVec::new(opts, label_names).map_err(|e| registration_error(name, e))?;
        self.registry
            .register(Box::new(vec.clone()))
            .map_err(|e| registration_error(name, e))?;

        Ok(Arc::new(PromHistogram {
            vec,
            label_names: owned(label_names),
        }))
    }

    fn create_gauge(
        &self,
        name: &str,
        description: &str,
        label_names: &[&str],
    ) -> Result<Arc<dyn Gauge>, TelemetryError> {
        let vec = GaugeVec::new(Opts::new(name, description), label_names)
            .map_err(|e| registration_error(name, e))?;
        self.registry
            .register(Box::new(vec.clone()))
            .map_err(|e| registration_error(name, e))?;

        Ok(Arc::new(PromGauge {
            vec,
            label_names: owned(label_names),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    fn render(registry: &Registry) -> String {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_counter_with_labels() {
        let metrics = PrometheusMetrics::default();
        let counter = metrics
            .create_counter("test_requests_total", "Requests", &["method", "status_code"])
            .unwrap();

        // Label order in the call does not matter
        counter.add(1.0, &[("status_code", "200"), ("method", "GET")]);
        counter.add(1.0, &[("method", "GET"), ("status_code", "200")]);

        let output = render(metrics.registry());
        assert!(output.contains(r#"test_requests_total{method="GET",status_code="200"} 2"#));
    }

    #[test]
    fn test_histogram_buckets_follow_unit() {
        assert_eq!(buckets_for("x_duration_seconds"), DURATION_BUCKETS.to_vec());
        assert_eq!(buckets_for("x_memory_bytes")[0], 1024.0);
        assert_eq!(buckets_for("x_count"), prometheus::DEFAULT_BUCKETS.to_vec());

        let metrics = PrometheusMetrics::default();
        let histogram = metrics
            .create_histogram("test_duration_seconds", "Duration", &["route"])
            .unwrap();
        histogram.record(0.02, &[("route", "/users/:id")]);

        let output = render(metrics.registry());
        assert!(output.contains(r#"test_duration_seconds_count{route="/users/:id"} 1"#));
    }

    #[test]
    fn test_duplicate_registration_is_an_error() {
        let metrics = PrometheusMetrics::default();
        assert!(metrics.create_gauge("test_gauge", "Gauge", &[]).is_ok());
        assert!(matches!(
            metrics.create_gauge("test_gauge", "Gauge", &[]),
            Err(TelemetryError::MetricRegistration(_))
        ));
    }

    #[test]
    fn test_negative_counter_increment_dropped() {
        let metrics = PrometheusMetrics::default();
        let counter = metrics.create_counter("test_neg_total", "Neg", &[]).unwrap();
        counter.add(-1.0, &[]);
        counter.add(3.0, &[]);
        assert!(render(metrics.registry()).contains("test_neg_total 3"));
    }
}
