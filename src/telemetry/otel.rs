//! OpenTelemetry tracer adapter
//!
//! Starts spans on the globally installed OpenTelemetry tracer provider (see
//! [`crate::tracing::init`]). Remote parents are rebuilt as a remote
//! [`SpanContext`] so the exported span links to the caller's trace.

use super::{Attribute, AttributeValue, Span, SpanKind, SpanOptions, SpanParent, SpanStatus};
use super::{TelemetryError, Tracer};
use crate::propagation::{TraceContext, TraceFormat};
use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::{
    self as otel_trace, SpanContext, SpanId, Status, TraceContextExt, TraceFlags, TraceId,
    TraceState, Tracer as _,
};
use opentelemetry::{Context, KeyValue};
use std::sync::Arc;

/// Tracer backed by `opentelemetry::global`
pub struct OtelTracer {
    tracer: BoxedTracer,
}

impl OtelTracer {
    /// Tracer named after the instrumenting service
    pub fn new(name: impl Into<std::borrow::Cow<'static, str>>) -> Self {
        Self {
            tracer: global::tracer(name),
        }
    }
}

impl std::fmt::Debug for OtelTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtelTracer").finish_non_exhaustive()
    }
}

fn to_otel_kind(kind: SpanKind) -> otel_trace::SpanKind {
    match kind {
        SpanKind::Server => otel_trace::SpanKind::Server,
        SpanKind::Client => otel_trace::SpanKind::Client,
        SpanKind::Internal => otel_trace::SpanKind::Internal,
        SpanKind::Producer => otel_trace::SpanKind::Producer,
        SpanKind::Consumer => otel_trace::SpanKind::Consumer,
    }
}

fn to_key_value(attribute: Attribute) -> KeyValue {
    match attribute.value {
        AttributeValue::String(s) => KeyValue::new(attribute.key, s),
        AttributeValue::Int(i) => KeyValue::new(attribute.key, i),
        AttributeValue::Float(f) => KeyValue::new(attribute.key, f),
        AttributeValue::Bool(b) => KeyValue::new(attribute.key, b),
    }
}

fn local_span_context(span: &dyn Span) -> TraceContext {
    TraceContext {
        trace_id: span.trace_id(),
        span_id: span.span_id(),
        parent_span_id: None,
        sampled: span.is_sampled(),
        trace_state: None,
        format: TraceFormat::W3c,
    }
}

/// Rebuild a propagated context as a remote OpenTelemetry span context
fn remote_span_context(context: &TraceContext) -> Result<SpanContext, TelemetryError> {
    let trace_id = TraceId::from_hex(&context.trace_id)
        .map_err(|e| TelemetryError::SpanCreation(format!("invalid trace id: {}", e)))?;
    let span_id = SpanId::from_hex(&context.span_id)
        .map_err(|e| TelemetryError::SpanCreation(format!("invalid span id: {}", e)))?;
    let flags = if context.sampled {
        TraceFlags::SAMPLED
    } else {
        TraceFlags::default()
    };
    let trace_state = context
        .trace_state
        .as_deref()
        .and_then(|s| s.parse::<TraceState>().ok())
        .unwrap_or_default();

    Ok(SpanContext::new(trace_id, span_id, flags, true, trace_state))
}

fn parent_context(parent: Option<&SpanParent>) -> Result<Context, TelemetryError> {
    match parent {
        None => Ok(Context::new()),
        Some(SpanParent::Remote(context)) => {
            Ok(Context::new().with_remote_span_context(remote_span_context(context)?))
        }
        Some(SpanParent::Local(span)) => Ok(Context::new()
            .with_remote_span_context(remote_span_context(&local_span_context(span.as_ref()))?)),
    }
}

impl Tracer for OtelTracer {
    fn start_span(
        &self,
        name: &str,
        options: SpanOptions,
    ) -> Result<Arc<dyn Span>, TelemetryError> {
        let parent = parent_context(options.parent.as_ref())?;
        let attributes: Vec<KeyValue> = options.attributes.into_iter().map(to_key_value).collect();

        let span = self
            .tracer
            .span_builder(name.to_string())
            .with_kind(to_otel_kind(options.kind))
            .with_attributes(attributes)
            .start_with_context(&self.tracer, &parent);

        Ok(Arc::new(OtelSpan {
            cx: Context::new().with_span(span),
            owned: true,
        }))
    }

    fn active_span(&self) -> Option<Arc<dyn Span>> {
        let cx = Context::current();
        if !cx.has_active_span() || !cx.span().span_context().is_valid() {
            return None;
        }
        Some(Arc::new(OtelSpan { cx, owned: false }))
    }
}

/// A span living inside an OpenTelemetry [`Context`]
///
/// Spans borrowed from the ambient context (`owned == false`) are never ended
/// here; whoever started them ends them.
pub struct OtelSpan {
    cx: Context,
    owned: bool,
}

impl Span for OtelSpan {
    fn trace_id(&self) -> String {
        let span = self.cx.span();
        let context = span.span_context();
        if context.is_valid() {
            format!("{:032x}", context.trace_id())
        } else {
            String::new()
        }
    }

    fn span_id(&self) -> String {
        let span = self.cx.span();
        let context = span.span_context();
        if context.is_valid() {
            format!("{:016x}", context.span_id())
        } else {
            String::new()
        }
    }

    fn is_sampled(&self) -> bool {
        self.cx.span().span_context().is_sampled()
    }

    fn is_recording(&self) -> bool {
        self.cx.span().is_recording()
    }

    fn set_attribute(&self, attribute: Attribute) {
        self.cx.span().set_attribute(to_key_value(attribute));
    }

    fn add_event(&self, name: &str, attributes: Vec<Attribute>) {
        self.cx.span().add_event(
            name.to_string(),
            attributes.into_iter().map(to_key_value).collect(),
        );
    }

    fn record_exception(&self, error: &dyn std::error::Error) {
        self.cx.span().record_error(error);
    }

    fn set_status(&self, status: SpanStatus) {
        let status = match status {
            SpanStatus::Unset => Status::Unset,
            SpanStatus::Ok => Status::Ok,
            SpanStatus::Error(description) => Status::error(description),
        };
        self.cx.span().set_status(status);
    }

    fn end(&self) {
        if self.owned {
            self.cx.span().end();
        }
    }
}
