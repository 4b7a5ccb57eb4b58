//! In-memory telemetry provider
//!
//! Records every span, log record and metric observation so tests (and hosts
//! that want to inspect telemetry without a backend) can assert on them.
//!
//! # Example
//!
//! ```
//! use request_telemetry::telemetry::memory::InMemoryTelemetry;
//! use request_telemetry::telemetry::{SpanOptions, Tracer};
//!
//! let telemetry = InMemoryTelemetry::new();
//! let span = telemetry.start_span("db.query", SpanOptions::default()).unwrap();
//! span.set("db.system", "postgresql");
//! span.end();
//!
//! let recorded = telemetry.span_named("db.query").unwrap();
//! assert!(recorded.is_ended());
//! ```

use super::{
    Attribute, AttributeValue, Counter, Gauge, Histogram, Labels, Layer, LogLevel, Logger,
    LoggerFactory, LoggerOptions, MetricsProvider, Span, SpanKind, SpanOptions, SpanStatus,
    TelemetryError, TelemetryProvider, Tracer,
};
use crate::propagation::{generate_span_id, generate_trace_id};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A span recorded by [`InMemoryTelemetry`]
#[derive(Debug)]
pub struct RecordedSpan {
    pub name: String,
    pub kind: SpanKind,
    pub parent_span_id: Option<String>,
    trace_id: String,
    span_id: String,
    sampled: bool,
    state: Mutex<SpanState>,
}

#[derive(Debug, Default)]
struct SpanState {
    attributes: Vec<Attribute>,
    events: Vec<String>,
    exceptions: Vec<String>,
    status: SpanStatus,
    ended: bool,
}

impl RecordedSpan {
    /// Latest value set for `key`
    pub fn attribute(&self, key: &str) -> Option<AttributeValue> {
        self.state
            .lock()
            .attributes
            .iter()
            .rev()
            .find(|a| a.key == key)
            .map(|a| a.value.clone())
    }

    pub fn attributes(&self) -> Vec<Attribute> {
        self.state.lock().attributes.clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().events.clone()
    }

    pub fn exceptions(&self) -> Vec<String> {
        self.state.lock().exceptions.clone()
    }

    pub fn status(&self) -> SpanStatus {
        self.state.lock().status.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.state.lock().ended
    }
}

impl Span for RecordedSpan {
    fn trace_id(&self) -> String {
        self.trace_id.clone()
    }

    fn span_id(&self) -> String {
        self.span_id.clone()
    }

    fn is_sampled(&self) -> bool {
        self.sampled
    }

    fn is_recording(&self) -> bool {
        !self.state.lock().ended
    }

    fn set_attribute(&self, attribute: Attribute) {
        let mut state = self.state.lock();
        if !state.ended {
            state.attributes.push(attribute);
        }
    }

    fn add_event(&self, name: &str, _attributes: Vec<Attribute>) {
        let mut state = self.state.lock();
        if !state.ended {
            state.events.push(name.to_string());
        }
    }

    fn record_exception(&self, error: &dyn std::error::Error) {
        let mut state = self.state.lock();
        if !state.ended {
            state.exceptions.push(error.to_string());
        }
    }

    fn set_status(&self, status: SpanStatus) {
        let mut state = self.state.lock();
        if !state.ended {
            state.status = status;
        }
    }

    fn end(&self) {
        self.state.lock().ended = true;
    }
}

/// A log record captured by an in-memory logger
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub attributes: Vec<Attribute>,
    pub span_id: String,
    pub operation_name: String,
    pub layer: Layer,
}

/// One metric observation
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub value: f64,
    pub labels: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

#[derive(Default)]
struct Inner {
    spans: Mutex<Vec<Arc<RecordedSpan>>>,
    logs: Mutex<Vec<LogRecord>>,
    samples: DashMap<String, Vec<MetricSample>>,
    active: Mutex<Option<Arc<dyn Span>>>,
}

/// Recording tracer, logger factory and metrics provider in one
#[derive(Clone, Default)]
pub struct InMemoryTelemetry {
    inner: Arc<Inner>,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle this recorder as all three provider capabilities
    pub fn provider(&self) -> TelemetryProvider {
        TelemetryProvider::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
        )
    }

    /// Make `span` the runtime's active span (what [`Tracer::active_span`] returns)
    pub fn set_active_span(&self, span: Option<Arc<dyn Span>>) {
        *self.inner.active.lock() = span;
    }

    pub fn spans(&self) -> Vec<Arc<RecordedSpan>> {
        self.inner.spans.lock().clone()
    }

    /// First span started with `name`
    pub fn span_named(&self, name: &str) -> Option<Arc<RecordedSpan>> {
        self.inner
            .spans
            .lock()
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn span_by_id(&self, span_id: &str) -> Option<Arc<RecordedSpan>> {
        self.inner
            .spans
            .lock()
            .iter()
            .find(|s| s.span_id == span_id)
            .cloned()
    }

    pub fn logs(&self) -> Vec<LogRecord> {
        self.inner.logs.lock().clone()
    }

    /// Every observation made on the metric called `name`
    pub fn samples(&self, name: &str) -> Vec<MetricSample> {
        self.inner
            .samples
            .get(name)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    pub fn reset(&self) {
        self.inner.spans.lock().clear();
        self.inner.logs.lock().clear();
        self.inner.samples.clear();
        self.set_active_span(None);
    }
}

impl Tracer for InMemoryTelemetry {
    fn start_span(
        &self,
        name: &str,
        options: SpanOptions,
    ) -> Result<Arc<dyn Span>, TelemetryError> {
        let (trace_id, parent_span_id, sampled) = match options.parent {
            Some(ref parent) if !parent.trace_id().is_empty() => (
                parent.trace_id(),
                Some(parent.span_id()).filter(|id| !id.is_empty()),
                parent.is_sampled(),
            ),
            _ => (generate_trace_id(), None, true),
        };

        let span = Arc::new(RecordedSpan {
            name: name.to_string(),
            kind: options.kind,
            parent_span_id,
            trace_id,
            span_id: generate_span_id(),
            sampled,
            state: Mutex::new(SpanState {
                attributes: options.attributes,
                ..Default::default()
            }),
        });

        self.inner.spans.lock().push(span.clone());
        Ok(span)
    }

    fn active_span(&self) -> Option<Arc<dyn Span>> {
        self.inner.active.lock().clone()
    }
}

struct MemoryLogger {
    inner: Arc<Inner>,
    span_id: String,
    options: LoggerOptions,
}

impl Logger for MemoryLogger {
    fn log(&self, level: LogLevel, message: &str, attributes: &[Attribute]) {
        self.inner.logs.lock().push(LogRecord {
            level,
            message: message.to_string(),
            attributes: attributes.to_vec(),
            span_id: self.span_id.clone(),
            operation_name: self.options.operation_name.clone(),
            layer: self.options.layer,
        });
    }
}

impl LoggerFactory for InMemoryTelemetry {
    fn get_logger(
        &self,
        span: Arc<dyn Span>,
        options: LoggerOptions,
    ) -> Result<Arc<dyn Logger>, TelemetryError> {
        Ok(Arc::new(MemoryLogger {
            inner: self.inner.clone(),
            span_id: span.span_id(),
            options,
        }))
    }
}

struct MemoryInstrument {
    inner: Arc<Inner>,
    name: String,
}

impl MemoryInstrument {
    fn observe(&self, value: f64, labels: &Labels<'_>) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.inner
            .samples
            .entry(self.name.clone())
            .or_default()
            .push(MetricSample { value, labels });
    }
}

impl Counter for MemoryInstrument {
    fn add(&self, value: f64, labels: &Labels<'_>) {
        self.observe(value, labels);
    }
}

impl Histogram for MemoryInstrument {
    fn record(&self, value: f64, labels: &Labels<'_>) {
        self.observe(value, labels);
    }
}

impl Gauge for MemoryInstrument {
    fn set(&self, value: f64, labels: &Labels<'_>) {
        self.observe(value, labels);
    }
}

impl InMemoryTelemetry {
    fn instrument(&self, name: &str) -> Arc<MemoryInstrument> {
        Arc::new(MemoryInstrument {
            inner: self.inner.clone(),
            name: name.to_string(),
        })
    }
}

impl MetricsProvider for InMemoryTelemetry {
    fn create_counter(
        &self,
        name: &str,
        _description: &str,
        _label_names: &[&str],
    ) -> Result<Arc<dyn Counter>, TelemetryError> {
        Ok(self.instrument(name))
    }

    fn create_histogram(
        &self,
        name: &str,
        _description: &str,
        _label_names: &[&str],
    ) -> Result<Arc<dyn Histogram>, TelemetryError> {
        Ok(self.instrument(name))
    }

    fn create_gauge(
        &self,
        name: &str,
        _description: &str,
        _label_names: &[&str],
    ) -> Result<Arc<dyn Gauge>, TelemetryError> {
        Ok(self.instrument(name))
    }
}
