//! Span extraction strategy
//!
//! Decides which span a unit of work should run under. The precedence is:
//!
//! 1. The span the runtime already considers active (`source = active`)
//! 2. A child of a W3C `traceparent` found in the supplied headers
//!    (`source = extracted`)
//! 3. A brand-new root span, when `create_new_if_not_found` is set
//!    (`source = fallback`)
//! 4. Nothing
//!
//! Every span handed back is tagged with `span.source` so traces fabricated
//! locally can be told apart from genuinely propagated ones.

use crate::propagation::{
    header_value, parse_w3c, HeaderMap, TraceContext, TraceFormat, TRACEPARENT_HEADER,
};
use crate::telemetry::noop::NoopSpan;
use crate::telemetry::{Attribute, Span, SpanKind, SpanOptions, SpanParent, Tracer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Span attribute naming the resolution path
pub const SPAN_SOURCE_ATTRIBUTE: &str = "span.source";

/// How a resolved span was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanSource {
    Active,
    Extracted,
    Fallback,
}

impl SpanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanSource::Active => "active",
            SpanSource::Extracted => "extracted",
            SpanSource::Fallback => "fallback",
        }
    }
}

impl fmt::Display for SpanSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options used when a span has to be started
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub operation_name: String,
    pub kind: SpanKind,
    pub attributes: Vec<Attribute>,
    /// Try W3C headers before fabricating a root span
    pub extract_from_headers: bool,
    /// Start a new root span when nothing else is found
    pub create_new_if_not_found: bool,
}

impl ResolveOptions {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            operation_name: "operation".to_string(),
            kind: SpanKind::Internal,
            attributes: Vec::new(),
            extract_from_headers: true,
            create_new_if_not_found: true,
        }
    }
}

/// Identity of a resolved span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMetadata {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub format: TraceFormat,
}

/// A span chosen by [`SpanExtractor::resolve`]
#[derive(Clone)]
pub struct ResolvedSpan {
    pub span: Arc<dyn Span>,
    pub source: SpanSource,
    pub metadata: ResolvedMetadata,
}

impl fmt::Debug for ResolvedSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSpan")
            .field("source", &self.source)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Resolves spans against a tracer
pub struct SpanExtractor {
    tracer: Arc<dyn Tracer>,
}

impl SpanExtractor {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }

    /// Pick the span to run under
    ///
    /// Provider failures while starting a span fall through to the next step.
    /// When every step fails and `create_new_if_not_found` is set, a
    /// non-recording span tagged `fallback` is returned.
    pub fn resolve(
        &self,
        headers: Option<&HeaderMap>,
        options: &ResolveOptions,
    ) -> Option<ResolvedSpan> {
        if let Some(span) = self.tracer.active_span() {
            debug!(span_id = %span.span_id(), "Using active span");
            return Some(tagged(span, SpanSource::Active, None, TraceFormat::W3c));
        }

        if options.extract_from_headers {
            if let Some(resolved) = headers.and_then(|h| self.extract(h, options)) {
                return Some(resolved);
            }
        }

        if !options.create_new_if_not_found {
            debug!(operation = %options.operation_name, "No span found and fallback disabled");
            return None;
        }

        let span_options = SpanOptions::new(options.kind).with_attributes(options.attributes.clone());
        match self.tracer.start_span(&options.operation_name, span_options) {
            Ok(span) => Some(tagged(span, SpanSource::Fallback, None, TraceFormat::W3c)),
            Err(e) => {
                warn!(error = %e, operation = %options.operation_name, "Failed to start fallback span, using no-op");
                let context = crate::propagation::generate();
                Some(tagged(
                    Arc::new(NoopSpan::from_context(&context)),
                    SpanSource::Fallback,
                    None,
                    TraceFormat::W3c,
                ))
            }
        }
    }

    fn extract(&self, headers: &HeaderMap, options: &ResolveOptions) -> Option<ResolvedSpan> {
        let parent = header_value(headers, TRACEPARENT_HEADER).and_then(parse_w3c)?;
        let parent_span_id = parent.span_id.clone();

        let remote = TraceContext {
            trace_id: parent.trace_id,
            span_id: parent.span_id,
            parent_span_id: None,
            sampled: parent.sampled,
            trace_state: None,
            format: TraceFormat::W3c,
        };
        let span_options = SpanOptions::new(options.kind)
            .with_attributes(options.attributes.clone())
            .with_parent(SpanParent::Remote(remote));

        match self.tracer.start_span(&options.operation_name, span_options) {
            Ok(span) => Some(tagged(
                span,
                SpanSource::Extracted,
                Some(parent_span_id),
                TraceFormat::W3c,
            )),
            Err(e) => {
                warn!(error = %e, operation = %options.operation_name, "Failed to start span from headers");
                None
            }
        }
    }
}

fn tagged(
    span: Arc<dyn Span>,
    source: SpanSource,
    parent_span_id: Option<String>,
    format: TraceFormat,
) -> ResolvedSpan {
    span.set(SPAN_SOURCE_ATTRIBUTE, source.as_str());
    ResolvedSpan {
        metadata: ResolvedMetadata {
            trace_id: span.trace_id(),
            span_id: span.span_id(),
            parent_span_id,
            format,
        },
        span,
        source,
    }
}
