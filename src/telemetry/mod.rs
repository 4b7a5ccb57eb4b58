//! Telemetry provider interface
//!
//! The lifecycle core never talks to a tracing backend directly. It depends on
//! a small set of capabilities supplied by the host:
//!
//! | Capability | Contract |
//! |------------|----------|
//! | [`Tracer`] | `start_span(name, options)`, `active_span()` |
//! | [`LoggerFactory`] | `get_logger(span, options)` |
//! | [`MetricsProvider`] | `create_counter` / `create_histogram` / `create_gauge` |
//!
//! Spans and loggers are opaque handles behind `Arc<dyn ...>`. Every capability
//! has a null-object implementation in [`noop`] that is substituted whenever the
//! real provider fails, so telemetry can never fail the request it observes.
//!
//! Adapters shipped with the crate:
//! - [`log::TracingLoggerFactory`]: structured logs through the `tracing` crate
//! - [`prom::PrometheusMetrics`]: Prometheus counters and histograms
//! - [`otel::OtelTracer`]: OpenTelemetry spans (feature `tracing`)
//! - [`memory::InMemoryTelemetry`]: records everything, for tests

use crate::propagation::TraceContext;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod log;
pub mod memory;
pub mod noop;
pub mod prom;

#[cfg(feature = "tracing")]
pub mod otel;

/// Provider failures. Always recovered locally by substituting a no-op.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("Failed to start span: {0}")]
    SpanCreation(String),

    #[error("Failed to create logger: {0}")]
    LoggerCreation(String),

    #[error("Failed to register metric: {0}")]
    MetricRegistration(String),

    #[error("Telemetry provider unavailable: {0}")]
    Unavailable(String),
}

// ============================================================================
// Attributes
// ============================================================================

/// Attribute value attached to spans and log records
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<&String> for AttributeValue {
    fn from(value: &String) -> Self {
        AttributeValue::String(value.clone())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        AttributeValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<usize> for AttributeValue {
    fn from(value: usize) -> Self {
        AttributeValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        AttributeValue::Int(value.into())
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// A key/value pair
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub value: AttributeValue,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

// ============================================================================
// Spans
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanKind {
    Server,
    Client,
    #[default]
    Internal,
    Producer,
    Consumer,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error(String),
}

/// A timed unit of work
pub trait Span: Send + Sync {
    /// 32-hex trace id, empty if the span has no identity
    fn trace_id(&self) -> String;

    /// 16-hex span id, empty if the span has no identity
    fn span_id(&self) -> String;

    fn is_sampled(&self) -> bool;

    /// False for null objects and non-recording spans
    fn is_recording(&self) -> bool {
        true
    }

    fn set_attribute(&self, attribute: Attribute);

    fn add_event(&self, name: &str, attributes: Vec<Attribute>);

    fn record_exception(&self, error: &dyn std::error::Error);

    fn set_status(&self, status: SpanStatus);

    fn end(&self);
}

impl dyn Span {
    /// Shorthand for `set_attribute(Attribute::new(key, value))`
    pub fn set(&self, key: &str, value: impl Into<AttributeValue>) {
        self.set_attribute(Attribute::new(key, value));
    }
}

/// What a new span attaches to
#[derive(Clone)]
pub enum SpanParent {
    /// A span started in this process
    Local(Arc<dyn Span>),
    /// A caller's span, known only from propagated headers
    Remote(TraceContext),
}

impl SpanParent {
    pub fn trace_id(&self) -> String {
        match self {
            SpanParent::Local(span) => span.trace_id(),
            SpanParent::Remote(context) => context.trace_id.clone(),
        }
    }

    pub fn span_id(&self) -> String {
        match self {
            SpanParent::Local(span) => span.span_id(),
            SpanParent::Remote(context) => context.span_id.clone(),
        }
    }

    pub fn is_sampled(&self) -> bool {
        match self {
            SpanParent::Local(span) => span.is_sampled(),
            SpanParent::Remote(context) => context.sampled,
        }
    }
}

impl fmt::Debug for SpanParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanParent::Local(span) => f
                .debug_struct("Local")
                .field("trace_id", &span.trace_id())
                .field("span_id", &span.span_id())
                .finish(),
            SpanParent::Remote(context) => f.debug_tuple("Remote").field(context).finish(),
        }
    }
}

/// Options for [`Tracer::start_span`]
#[derive(Debug, Clone, Default)]
pub struct SpanOptions {
    pub kind: SpanKind,
    pub attributes: Vec<Attribute>,
    /// `None` starts a new root span
    pub parent: Option<SpanParent>,
}

impl SpanOptions {
    pub fn new(kind: SpanKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.push(Attribute::new(key, value));
        self
    }

    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = Attribute>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn with_parent(mut self, parent: SpanParent) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Span factory
#[cfg_attr(test, mockall::automock)]
pub trait Tracer: Send + Sync {
    fn start_span(&self, name: &str, options: SpanOptions)
        -> Result<Arc<dyn Span>, TelemetryError>;

    /// The span the runtime currently considers active, if any
    fn active_span(&self) -> Option<Arc<dyn Span>>;
}

// ============================================================================
// Loggers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Processing layer a span/logger belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Layer {
    #[default]
    Http,
    Api,
    Service,
    Data,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Http => "http",
            Layer::Api => "api",
            Layer::Service => "service",
            Layer::Data => "data",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for [`LoggerFactory::get_logger`]
#[derive(Debug, Clone, Default)]
pub struct LoggerOptions {
    pub operation_type: String,
    pub operation_name: String,
    pub layer: Layer,
    /// Mirror each log record as an event on the bound span
    pub auto_add_span_events: bool,
}

/// A logger bound to one span
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, attributes: &[Attribute]);
}

impl dyn Logger {
    pub fn debug(&self, message: &str, attributes: &[Attribute]) {
        self.log(LogLevel::Debug, message, attributes);
    }

    pub fn info(&self, message: &str, attributes: &[Attribute]) {
        self.log(LogLevel::Info, message, attributes);
    }

    pub fn warn(&self, message: &str, attributes: &[Attribute]) {
        self.log(LogLevel::Warn, message, attributes);
    }

    pub fn error(&self, message: &str, attributes: &[Attribute]) {
        self.log(LogLevel::Error, message, attributes);
    }
}

pub trait LoggerFactory: Send + Sync {
    fn get_logger(
        &self,
        span: Arc<dyn Span>,
        options: LoggerOptions,
    ) -> Result<Arc<dyn Logger>, TelemetryError>;
}

// ============================================================================
// Metrics
// ============================================================================

/// Label set as `(name, value)` pairs
pub type Labels<'a> = [(&'a str, &'a str)];

pub trait Counter: Send + Sync {
    fn add(&self, value: f64, labels: &Labels<'_>);
}

pub trait Histogram: Send + Sync {
    fn record(&self, value: f64, labels: &Labels<'_>);
}

pub trait Gauge: Send + Sync {
    fn set(&self, value: f64, labels: &Labels<'_>);
}

pub trait MetricsProvider: Send + Sync {
    fn create_counter(
        &self,
        name: &str,
        description: &str,
        label_names: &[&str],
    ) -> Result<Arc<dyn Counter>, TelemetryError>;

    fn create_histogram(
        &self,
        name: &str,
        description: &str,
        label_names: &[&str],
    ) -> Result<Arc<dyn Histogram>, TelemetryError>;

    fn create_gauge(
        &self,
        name: &str,
        description: &str,
        label_names: &[&str],
    ) -> Result<Arc<dyn Gauge>, TelemetryError>;
}

// ============================================================================
// Provider bundle
// ============================================================================

/// The long-lived, shared telemetry dependency injected at construction
#[derive(Clone)]
pub struct TelemetryProvider {
    pub tracer: Arc<dyn Tracer>,
    pub loggers: Arc<dyn LoggerFactory>,
    pub metrics: Arc<dyn MetricsProvider>,
}

impl TelemetryProvider {
    pub fn new(
        tracer: Arc<dyn Tracer>,
        loggers: Arc<dyn LoggerFactory>,
        metrics: Arc<dyn MetricsProvider>,
    ) -> Self {
        Self {
            tracer,
            loggers,
            metrics,
        }
    }

    /// Provider where every capability is a null object
    pub fn noop() -> Self {
        Self::new(
            Arc::new(noop::NoopTracer),
            Arc::new(noop::NoopLoggerFactory),
            Arc::new(noop::NoopMetrics),
        )
    }
}

impl fmt::Debug for TelemetryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryProvider").finish_non_exhaustive()
    }
}
