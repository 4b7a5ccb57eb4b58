//! Trace Context Propagation
//!
//! Extracts trace identity from incoming HTTP headers and injects it into
//! outgoing requests. Two wire formats are understood:
//!
//! - **W3C Trace Context**: `traceparent` (+ optional `tracestate`)
//!   - Format: `00-{trace-id}-{parent-id}-{trace-flags}`
//!   - Example: `00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01`
//! - **B3 multi-header**: `x-b3-traceid`, `x-b3-spanid`, `x-b3-sampled`, `x-b3-parentspanid`
//!
//! W3C wins when both header sets are present. B3 is only consulted when W3C is
//! absent or invalid, and a fresh context is generated when neither yields a
//! valid one, so an empty or zero trace id is never propagated downstream.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use request_telemetry::propagation::{extract_trace_context, ContextSource, TraceFormat};
//!
//! let mut headers = HashMap::new();
//! headers.insert(
//!     "traceparent".to_string(),
//!     "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
//! );
//!
//! let extraction = extract_trace_context(&headers);
//! assert_eq!(extraction.source, ContextSource::W3c);
//! assert_eq!(extraction.context.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
//! assert_eq!(extraction.context.format, TraceFormat::W3c);
//! assert!(extraction.context.sampled);
//! ```

use std::collections::HashMap;
use std::fmt;

mod b3;
mod w3c;

pub use b3::{encode_b3, parse_b3};
pub use w3c::{encode_w3c, parse_w3c, W3cParent};

/// HTTP headers as seen by the codec.
///
/// Keys may use any case; every lookup goes through [`header_value`].
pub type HeaderMap = HashMap<String, String>;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";
pub const B3_TRACE_ID_HEADER: &str = "x-b3-traceid";
pub const B3_SPAN_ID_HEADER: &str = "x-b3-spanid";
pub const B3_SAMPLED_HEADER: &str = "x-b3-sampled";
pub const B3_PARENT_SPAN_ID_HEADER: &str = "x-b3-parentspanid";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Length of a trace id in hex characters
pub const TRACE_ID_HEX_LEN: usize = 32;
/// Length of a span id in hex characters
pub const SPAN_ID_HEX_LEN: usize = 16;

/// Get a header value by name (case-insensitive)
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Wire format a trace context was read from (or will be written as)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceFormat {
    W3c,
    B3,
    Custom,
    None,
}

impl TraceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceFormat::W3c => "w3c",
            TraceFormat::B3 => "b3",
            TraceFormat::Custom => "custom",
            TraceFormat::None => "none",
        }
    }
}

impl fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized trace identity for one request.
///
/// Created once when a request starts and never mutated afterwards. Child
/// spans get new span ids; use [`TraceContext::child`] to derive the
/// context propagated to a downstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// Trace ID (32 lowercase hex characters)
    pub trace_id: String,
    /// Span ID (16 lowercase hex characters)
    pub span_id: String,
    /// Parent span ID, when the wire format carries one
    pub parent_span_id: Option<String>,
    /// Whether the trace should be recorded by the backend
    pub sampled: bool,
    /// Vendor-specific `tracestate` value
    pub trace_state: Option<String>,
    pub format: TraceFormat,
}

impl TraceContext {
    /// Context with no identity (`format = none`)
    pub fn empty() -> Self {
        Self {
            trace_id: String::new(),
            span_id: String::new(),
            parent_span_id: None,
            sampled: false,
            trace_state: None,
            format: TraceFormat::None,
        }
    }

    /// Check the id invariant: both ids empty with `format = none`, or both
    /// well-formed and not all zero.
    pub fn is_valid(&self) -> bool {
        if self.format == TraceFormat::None {
            return self.trace_id.is_empty() && self.span_id.is_empty();
        }
        is_valid_id(&self.trace_id, TRACE_ID_HEX_LEN) && is_valid_id(&self.span_id, SPAN_ID_HEX_LEN)
    }

    /// Derive the context handed to a downstream call made from `span_id`.
    pub fn child(&self, span_id: &str) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: span_id.to_string(),
            parent_span_id: Some(self.span_id.clone()),
            sampled: self.sampled,
            trace_state: self.trace_state.clone(),
            format: self.format,
        }
    }

    /// Format as traceparent header value
    pub fn to_traceparent(&self) -> String {
        encode_w3c(self)
    }
}

/// Where an extracted context came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextSource {
    W3c,
    B3,
    Generated,
}

impl ContextSource {
    /// True when the context was read from inbound headers
    pub fn is_propagated(&self) -> bool {
        !matches!(self, ContextSource::Generated)
    }
}

/// Result of running the extraction precedence over a header set
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub context: TraceContext,
    pub source: ContextSource,
}

/// Extract trace context from HTTP headers
///
/// Precedence: valid W3C `traceparent` → valid B3 header set → newly generated
/// context. Malformed headers are never an error; they fall through.
pub fn extract_trace_context(headers: &HeaderMap) -> Extraction {
    if let Some(parent) = header_value(headers, TRACEPARENT_HEADER).and_then(parse_w3c) {
        let trace_state = header_value(headers, TRACESTATE_HEADER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        return Extraction {
            context: TraceContext {
                trace_id: parent.trace_id,
                span_id: parent.span_id,
                parent_span_id: None,
                sampled: parent.sampled,
                trace_state,
                format: TraceFormat::W3c,
            },
            source: ContextSource::W3c,
        };
    }

    if let Some(context) = parse_b3(headers) {
        return Extraction {
            context,
            source: ContextSource::B3,
        };
    }

    Extraction {
        context: generate(),
        source: ContextSource::Generated,
    }
}

/// Inject trace context into HTTP headers
///
/// W3C (and custom) contexts are written as `traceparent` plus `tracestate`
/// when present; B3 contexts as the four B3 headers. A `none` context writes
/// nothing.
pub fn inject_trace_context(context: &TraceContext, headers: &mut HeaderMap) {
    match context.format {
        TraceFormat::W3c | TraceFormat::Custom => {
            headers.insert(TRACEPARENT_HEADER.to_string(), encode_w3c(context));
            if let Some(ref trace_state) = context.trace_state {
                headers.insert(TRACESTATE_HEADER.to_string(), trace_state.clone());
            }
        }
        TraceFormat::B3 => headers.extend(encode_b3(context)),
        TraceFormat::None => {}
    }
}

/// Generate a fresh root trace context (W3C format, sampled)
pub fn generate() -> TraceContext {
    TraceContext {
        trace_id: generate_trace_id(),
        span_id: generate_span_id(),
        parent_span_id: None,
        sampled: true,
        trace_state: None,
        format: TraceFormat::W3c,
    }
}

/// Random 32-hex trace id. Uniqueness only, not a security token.
pub fn generate_trace_id() -> String {
    loop {
        let bytes: [u8; 16] = rand::random();
        if bytes.iter().any(|b| *b != 0) {
            return hex::encode(bytes);
        }
    }
}

/// Random 16-hex span id
pub fn generate_span_id() -> String {
    loop {
        let bytes: [u8; 8] = rand::random();
        if bytes.iter().any(|b| *b != 0) {
            return hex::encode(bytes);
        }
    }
}

/// Exactly `len` hex digits, not all zero
pub(crate) fn is_valid_id(id: &str, len: usize) -> bool {
    id.len() == len && is_hex(id) && !is_all_zero(id)
}

pub(crate) fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit())
}

pub(crate) fn is_all_zero(s: &str) -> bool {
    s.chars().all(|c| c == '0')
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_extract_w3c() {
        let extraction = extract_trace_context(&headers(&[("traceparent", TRACEPARENT)]));
        assert_eq!(extraction.source, ContextSource::W3c);
        assert_eq!(extraction.context.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(extraction.context.span_id, "00f067aa0ba902b7");
        assert!(extraction.context.sampled);
        assert_eq!(extraction.context.format, TraceFormat::W3c);
    }

    #[test]
    fn test_extract_header_names_case_insensitive() {
        let extraction = extract_trace_context(&headers(&[
            ("TraceParent", TRACEPARENT),
            ("TRACESTATE", "congo=t61rcWkgMzE"),
        ]));
        assert_eq!(extraction.source, ContextSource::W3c);
        assert_eq!(
            extraction.context.trace_state.as_deref(),
            Some("congo=t61rcWkgMzE")
        );
    }

    #[test]
    fn test_w3c_wins_over_b3() {
        let extraction = extract_trace_context(&headers(&[
            ("traceparent", TRACEPARENT),
            ("x-b3-traceid", "80f198ee56343ba864fe8b2a57d3eff7"),
            ("x-b3-spanid", "e457b5a2e4d86bd1"),
        ]));
        assert_eq!(extraction.source, ContextSource::W3c);
        assert_eq!(extraction.context.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
    }

    #[test]
    fn test_invalid_w3c_falls_back_to_b3() {
        let extraction = extract_trace_context(&headers(&[
            ("traceparent", "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"),
            ("x-b3-traceid", "80f198ee56343ba864fe8b2a57d3eff7"),
            ("x-b3-spanid", "e457b5a2e4d86bd1"),
        ]));
        assert_eq!(extraction.source, ContextSource::B3);
        assert_eq!(extraction.context.format, TraceFormat::B3);
        assert_eq!(extraction.context.trace_id, "80f198ee56343ba864fe8b2a57d3eff7");
    }

    #[test]
    fn test_generate_when_nothing_valid() {
        let extraction = extract_trace_context(&headers(&[(
            "traceparent",
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
        )]));
        assert_eq!(extraction.source, ContextSource::Generated);
        assert!(extraction.context.is_valid());
        assert_eq!(extraction.context.trace_id.len(), 32);
        assert_eq!(extraction.context.format, TraceFormat::W3c);
        assert!(extraction.context.sampled);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = generate();
        let b = generate();
        assert_ne!(a.trace_id, b.trace_id);
        assert_ne!(a.span_id, b.span_id);
        assert!(a.is_valid());
    }

    #[test]
    fn test_inject_w3c_with_tracestate() {
        let mut context = extract_trace_context(&headers(&[("traceparent", TRACEPARENT)])).context;
        context.trace_state = Some("rojo=00f067aa0ba902b7".to_string());

        let mut out = HeaderMap::new();
        inject_trace_context(&context, &mut out);
        assert_eq!(out.get("traceparent").map(String::as_str), Some(TRACEPARENT));
        assert_eq!(
            out.get("tracestate").map(String::as_str),
            Some("rojo=00f067aa0ba902b7")
        );
    }

    #[test]
    fn test_inject_none_writes_nothing() {
        let mut out = HeaderMap::new();
        inject_trace_context(&TraceContext::empty(), &mut out);
        assert!(out.is_empty());
        assert!(TraceContext::empty().is_valid());
    }

    #[test]
    fn test_child_keeps_trace_and_reparents() {
        let context = generate();
        let child = context.child("b7ad6b7169203331");
        assert_eq!(child.trace_id, context.trace_id);
        assert_eq!(child.span_id, "b7ad6b7169203331");
        assert_eq!(child.parent_span_id.as_deref(), Some(context.span_id.as_str()));
    }
}
