//! B3 multi-header propagation
//!
//! Zipkin's B3 format carries each field in its own header. Only the trace id
//! is required; short ids (64-bit trace ids, unpadded span ids) are left-padded
//! with zeros to the canonical width.

use super::{
    generate_span_id, header_value, is_all_zero, is_hex, HeaderMap, TraceContext, TraceFormat,
    B3_PARENT_SPAN_ID_HEADER, B3_SAMPLED_HEADER, B3_SPAN_ID_HEADER, B3_TRACE_ID_HEADER,
    SPAN_ID_HEX_LEN, TRACE_ID_HEX_LEN,
};

/// Parse the B3 header set
///
/// Returns `None` when the trace id is missing or malformed, or when a span
/// id or parent span id is present but malformed.
pub fn parse_b3(headers: &HeaderMap) -> Option<TraceContext> {
    let trace_id = pad_id(header_value(headers, B3_TRACE_ID_HEADER)?, TRACE_ID_HEX_LEN)?;

    let span_id = match header_value(headers, B3_SPAN_ID_HEADER) {
        Some(raw) => pad_id(raw, SPAN_ID_HEX_LEN)?,
        None => generate_span_id(),
    };

    let parent_span_id = match header_value(headers, B3_PARENT_SPAN_ID_HEADER) {
        Some(raw) => Some(pad_id(raw, SPAN_ID_HEX_LEN)?),
        None => None,
    };

    let sampled = header_value(headers, B3_SAMPLED_HEADER)
        .and_then(parse_sampled)
        .unwrap_or(true);

    Some(TraceContext {
        trace_id,
        span_id,
        parent_span_id,
        sampled,
        trace_state: None,
        format: TraceFormat::B3,
    })
}

/// Format a context as the B3 header set
pub fn encode_b3(context: &TraceContext) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(B3_TRACE_ID_HEADER.to_string(), context.trace_id.clone());
    headers.insert(B3_SPAN_ID_HEADER.to_string(), context.span_id.clone());
    headers.insert(
        B3_SAMPLED_HEADER.to_string(),
        if context.sampled { "1" } else { "0" }.to_string(),
    );
    if let Some(ref parent) = context.parent_span_id {
        headers.insert(B3_PARENT_SPAN_ID_HEADER.to_string(), parent.clone());
    }
    headers
}

/// `1`/`true`/`d` (debug) sample, `0`/`false` drop, anything else is unknown
fn parse_sampled(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "d" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn pad_id(raw: &str, width: usize) -> Option<String> {
    let raw = raw.trim();
    if raw.len() > width || !is_hex(raw) || is_all_zero(raw) {
        return None;
    }
    Some(format!("{:0>width$}", raw.to_ascii_lowercase(), width = width))
}
