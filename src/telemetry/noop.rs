//! Null-object telemetry
//!
//! Substituted whenever the real provider fails. A [`NoopSpan`] still carries
//! trace identity so logs and outbound headers stay correlated; it just never
//! records anything.

use super::{
    Attribute, Counter, Gauge, Histogram, Labels, LogLevel, Logger, LoggerFactory, LoggerOptions,
    MetricsProvider, Span, SpanOptions, SpanStatus, TelemetryError, Tracer,
};
use crate::propagation::{generate_span_id, generate_trace_id, TraceContext};
use std::sync::Arc;

/// A non-recording span
#[derive(Debug, Clone, Default)]
pub struct NoopSpan {
    trace_id: String,
    span_id: String,
    sampled: bool,
}

impl NoopSpan {
    /// Span with no identity at all
    pub fn new() -> Self {
        Self::default()
    }

    /// Span carrying the identity of `context`
    pub fn from_context(context: &TraceContext) -> Self {
        Self {
            trace_id: context.trace_id.clone(),
            span_id: context.span_id.clone(),
            sampled: context.sampled,
        }
    }
}

impl Span for NoopSpan {
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
        false
    }

    fn set_attribute(&self, _attribute: Attribute) {}

    fn add_event(&self, _name: &str, _attributes: Vec<Attribute>) {}

    fn record_exception(&self, _error: &dyn std::error::Error) {}

    fn set_status(&self, _status: SpanStatus) {}

    fn end(&self) {}
}

/// Tracer that hands out non-recording spans
///
/// Child spans keep the parent's trace id and get a fresh span id, so
/// propagation still works with tracing disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start_span(
        &self,
        _name: &str,
        options: SpanOptions,
    ) -> Result<Arc<dyn Span>, TelemetryError> {
        let (trace_id, sampled) = match options.parent {
            Some(ref parent) if !parent.trace_id().is_empty() => {
                (parent.trace_id(), parent.is_sampled())
            }
            _ => (generate_trace_id(), true),
        };

        Ok(Arc::new(NoopSpan {
            trace_id,
            span_id: generate_span_id(),
            sampled,
        }))
    }

    fn active_span(&self) -> Option<Arc<dyn Span>> {
        None
    }
}

/// Logger that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _level: LogLevel, _message: &str, _attributes: &[Attribute]) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLoggerFactory;

impl LoggerFactory for NoopLoggerFactory {
    fn get_logger(
        &self,
        _span: Arc<dyn Span>,
        _options: LoggerOptions,
    ) -> Result<Arc<dyn Logger>, TelemetryError> {
        Ok(Arc::new(NoopLogger))
    }
}

/// Counter, histogram and gauge that drop every observation
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstrument;

impl Counter for NoopInstrument {
    fn add(&self, _value: f64, _labels: &Labels<'_>) {}
}

impl Histogram for NoopInstrument {
    fn record(&self, _value: f64, _labels: &Labels<'_>) {}
}

impl Gauge for NoopInstrument {
    fn set(&self, _value: f64, _labels: &Labels<'_>) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsProvider for NoopMetrics {
    fn create_counter(
        &self,
        _name: &str,
        _description: &str,
        _label_names: &[&str],
    ) -> Result<Arc<dyn Counter>, TelemetryError> {
        Ok(Arc::new(NoopInstrument))
    }

    fn create_histogram(
        &self,
        _name: &str,
        _description: &str,
        _label_names: &[&str],
    ) -> Result<Arc<dyn Histogram>, TelemetryError> {
        Ok(Arc::new(NoopInstrument))
    }

    fn create_gauge(
        &self,
        _name: &str,
        _description: &str,
        _label_names: &[&str],
    ) -> Result<Arc<dyn Gauge>, TelemetryError> {
        Ok(Arc::new(NoopInstrument))
    }
}
