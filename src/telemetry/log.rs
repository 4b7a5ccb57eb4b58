//! Span-bound structured logging through the `tracing` crate
//!
//! Every record carries the trace id, span id, operation and layer of the span
//! the logger is bound to. Extra attributes are rendered as a single JSON
//! `fields` value since `tracing` field names are fixed at compile time.

use super::{
    Attribute, AttributeValue, LogLevel, Logger, LoggerFactory, LoggerOptions, Span,
    TelemetryError,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Creates [`TracingLogger`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLoggerFactory;

impl LoggerFactory for TracingLoggerFactory {
    fn get_logger(
        &self,
        span: Arc<dyn Span>,
        options: LoggerOptions,
    ) -> Result<Arc<dyn Logger>, TelemetryError> {
        Ok(Arc::new(TracingLogger::new(span, options)))
    }
}

/// Logger bound to one span
pub struct TracingLogger {
    span: Arc<dyn Span>,
    trace_id: String,
    span_id: String,
    options: LoggerOptions,
}

impl TracingLogger {
    pub fn new(span: Arc<dyn Span>, options: LoggerOptions) -> Self {
        Self {
            trace_id: span.trace_id(),
            span_id: span.span_id(),
            span,
            options,
        }
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, attributes: &[Attribute]) {
        let fields = render_fields(attributes);
        let operation_type = self.options.operation_type.as_str();
        let operation_name = self.options.operation_name.as_str();
        let layer = self.options.layer.as_str();

        match level {
            LogLevel::Debug => tracing::debug!(
                trace_id = %self.trace_id,
                span_id = %self.span_id,
                operation_type = operation_type,
                operation_name = operation_name,
                layer = layer,
                fields = %fields,
                "{}",
                message
            ),
            LogLevel::Info => tracing::info!(
                trace_id = %self.trace_id,
                span_id = %self.span_id,
                operation_type = operation_type,
                operation_name = operation_name,
                layer = layer,
                fields = %fields,
                "{}",
                message
            ),
            LogLevel::Warn => tracing::warn!(
                trace_id = %self.trace_id,
                span_id = %self.span_id,
                operation_type = operation_type,
                operation_name = operation_name,
                layer = layer,
                fields = %fields,
                "{}",
                message
            ),
            LogLevel::Error => tracing::error!(
                trace_id = %self.trace_id,
                span_id = %self.span_id,
                operation_type = operation_type,
                operation_name = operation_name,
                layer = layer,
                fields = %fields,
                "{}",
                message
            ),
        }

        if self.options.auto_add_span_events && self.span.is_recording() {
            let mut event_attributes = attributes.to_vec();
            event_attributes.push(Attribute::new("log.level", level_name(level)));
            self.span.add_event(message, event_attributes);
        }
    }
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

/// Render attributes as a compact JSON object
pub(crate) fn render_fields(attributes: &[Attribute]) -> Value {
    let mut map = Map::with_capacity(attributes.len());
    for attribute in attributes {
        let value = match &attribute.value {
            AttributeValue::String(s) => Value::String(s.clone()),
            AttributeValue::Int(i) => Value::from(*i),
            AttributeValue::Float(f) => Value::from(*f),
            AttributeValue::Bool(b) => Value::Bool(*b),
        };
        map.insert(attribute.key.clone(), value);
    }
    Value::Object(map)
}
