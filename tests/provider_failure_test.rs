//! Provider failure tests
//!
//! A tracer, logger factory or metrics provider that fails must never fail the
//! request: telemetry degrades to no-op objects and the request completes.

use mockall::mock;
use request_telemetry::config::TelemetryConfig;
use request_telemetry::lifecycle::{FinalizeOutcome, InitOutcome, RequestHandle, RequestTelemetry};
use request_telemetry::metrics::REQUESTS_TOTAL;
use request_telemetry::propagation::HeaderMap;
use request_telemetry::telemetry::memory::InMemoryTelemetry;
use request_telemetry::telemetry::{
    Counter, Gauge, Histogram, Layer, Logger, LoggerFactory, LoggerOptions, MetricsProvider,
    Span, SpanOptions, TelemetryError, TelemetryProvider, Tracer,
};
use std::sync::Arc;

mock! {
    pub FlakyTracer {}

    impl Tracer for FlakyTracer {
        fn start_span(&self, name: &str, options: SpanOptions)
            -> Result<Arc<dyn Span>, TelemetryError>;
        fn active_span(&self) -> Option<Arc<dyn Span>>;
    }
}

mock! {
    pub Loggers {}

    impl LoggerFactory for Loggers {
        fn get_logger(
            &self,
            span: Arc<dyn Span>,
            options: LoggerOptions,
        ) -> Result<Arc<dyn Logger>, TelemetryError>;
    }
}

struct RejectingMetrics;

impl MetricsProvider for RejectingMetrics {
    fn create_counter(
        &self,
        name: &str,
        _description: &str,
        _label_names: &[&str],
    ) -> Result<Arc<dyn Counter>, TelemetryError> {
        Err(TelemetryError::MetricRegistration(name.to_string()))
    }

    fn create_histogram(
        &self,
        name: &str,
        _description: &str,
        _label_names: &[&str],
    ) -> Result<Arc<dyn Histogram>, TelemetryError> {
        Err(TelemetryError::MetricRegistration(name.to_string()))
    }

    fn create_gauge(
        &self,
        name: &str,
        _description: &str,
        _label_names: &[&str],
    ) -> Result<Arc<dyn Gauge>, TelemetryError> {
        Err(TelemetryError::MetricRegistration(name.to_string()))
    }
}

fn failing_tracer() -> MockFlakyTracer {
    let mut tracer = MockFlakyTracer::new();
    tracer
        .expect_start_span()
        .returning(|_, _| Err(TelemetryError::Unavailable("collector down".into())));
    tracer.expect_active_span().returning(|| None);
    tracer
}

#[test]
fn test_failing_tracer_degrades_request() {
    let recorder = InMemoryTelemetry::new();
    let provider = TelemetryProvider::new(
        Arc::new(failing_tracer()),
        Arc::new(recorder.clone()),
        Arc::new(recorder.clone()),
    );
    let telemetry = RequestTelemetry::new(provider, TelemetryConfig::default());
    let handle = RequestHandle::new();

    let outcome = telemetry.initialize(&handle, &HeaderMap::new(), "/orders", "GET");
    assert!(outcome.is_degraded());
    assert!(handle.trace_context().unwrap().is_valid());

    let child = telemetry.create_child_span(&handle, "orders.list", Layer::Api);
    assert!(!child.span().is_recording());
    assert_eq!(
        child.span().trace_id(),
        handle.trace_context().unwrap().trace_id
    );
    child.finish();

    let FinalizeOutcome::Finalized(summary) = telemetry.finalize(&handle, 200) else {
        panic!("degraded request should still finalize");
    };
    assert!(summary.degraded);
    assert_eq!(recorder.samples(REQUESTS_TOTAL).len(), 1);
}

#[test]
fn test_failing_logger_factory_degrades_request() {
    let recorder = InMemoryTelemetry::new();
    let mut loggers = MockLoggers::new();
    loggers
        .expect_get_logger()
        .returning(|_, _| Err(TelemetryError::LoggerCreation("no sink".into())));
    let provider = TelemetryProvider::new(
        Arc::new(recorder.clone()),
        Arc::new(loggers),
        Arc::new(recorder.clone()),
    );
    let telemetry = RequestTelemetry::new(provider, TelemetryConfig::default());
    let handle = RequestHandle::new();

    let outcome = telemetry.initialize(&handle, &HeaderMap::new(), "/orders", "GET");
    assert!(matches!(outcome, InitOutcome::Degraded(_)));

    // The span started before the logger failed is not leaked open
    let started = recorder.span_named("GET /orders").unwrap();
    assert!(started.is_ended());

    assert!(matches!(
        telemetry.finalize(&handle, 200),
        FinalizeOutcome::Finalized(_)
    ));
}

#[test]
fn test_rejecting_metrics_provider() {
    let recorder = InMemoryTelemetry::new();
    let provider = TelemetryProvider::new(
        Arc::new(recorder.clone()),
        Arc::new(recorder.clone()),
        Arc::new(RejectingMetrics),
    );
    let telemetry = RequestTelemetry::new(provider, TelemetryConfig::default());
    let handle = RequestHandle::new();

    assert_eq!(
        telemetry.initialize(&handle, &HeaderMap::new(), "/", "GET"),
        InitOutcome::Traced {
            source: request_telemetry::propagation::ContextSource::Generated
        }
    );
    assert!(matches!(
        telemetry.finalize(&handle, 200),
        FinalizeOutcome::Finalized(_)
    ));
    assert!(recorder.span_named("GET /").unwrap().is_ended());
}
