//! W3C `traceparent` parsing and formatting
//!
//! See <https://www.w3.org/TR/trace-context/#traceparent-header>.

use super::{is_hex, is_valid_id, TraceContext, SPAN_ID_HEX_LEN, TRACE_ID_HEX_LEN};

/// Fields carried by a valid `traceparent` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct W3cParent {
    pub trace_id: String,
    /// The caller's span id (`parent-id` in the wire format)
    pub span_id: String,
    pub sampled: bool,
}

/// Parse a `traceparent` header value
///
/// Returns `None` for anything that is not exactly
/// `00-{32 hex}-{16 hex}-{2 hex}` with non-zero ids.
pub fn parse_w3c(traceparent: &str) -> Option<W3cParent> {
    // Parse traceparent: version-trace_id-parent_id-trace_flags
    let parts: Vec<&str> = traceparent.trim().split('-').collect();
    if parts.len() != 4 {
        return None;
    }

    if parts[0] != "00" {
        return None;
    }

    if !is_valid_id(parts[1], TRACE_ID_HEX_LEN) {
        return None;
    }

    if !is_valid_id(parts[2], SPAN_ID_HEX_LEN) {
        return None;
    }

    // Trace flags: exactly one byte as two hex digits
    if parts[3].len() != 2 || !is_hex(parts[3]) {
        return None;
    }
    let trace_flags = u8::from_str_radix(parts[3], 16).ok()?;

    Some(W3cParent {
        trace_id: parts[1].to_ascii_lowercase(),
        span_id: parts[2].to_ascii_lowercase(),
        sampled: trace_flags & 0x01 != 0,
    })
}

/// Format a context as a `traceparent` header value
pub fn encode_w3c(context: &TraceContext) -> String {
    format!(
        "00-{}-{}-{}",
        context.trace_id,
        context.span_id,
        if context.sampled { "01" } else { "00" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::propagation::{generate, TraceFormat};

    #[test]
    fn test_parse_valid_traceparent() {
        let parent = parse_w3c("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01").unwrap();
        assert_eq!(parent.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(parent.span_id, "b7ad6b7169203331");
        assert!(parent.sampled);
    }

    #[test]
    fn test_sampled_is_least_significant_bit() {
        let base = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-";
        assert!(!parse_w3c(&format!("{base}00")).unwrap().sampled);
        assert!(parse_w3c(&format!("{base}03")).unwrap().sampled);
        assert!(!parse_w3c(&format!("{base}fe")).unwrap().sampled);
    }

    #[test]
    fn test_uppercase_ids_are_normalized() {
        let parent = parse_w3c("00-0AF7651916CD43DD8448EB211C80319C-B7AD6B7169203331-01").unwrap();
        assert_eq!(parent.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(parent.span_id, "b7ad6b7169203331");
    }

    #[test]
    fn test_rejects_malformed() {
        let invalid = [
            "",
            "invalid",
            // wrong version
            "01-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            "ff-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            // wrong segment count
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-extra",
            // all-zero ids
            "00-00000000000000000000000000000000-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01",
            // wrong lengths
            "00-0af7651916cd43dd8448eb211c8031-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b71692033-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-1",
            // non-hex
            "00-0af7651916cd43dd8448eb211c80319z-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-gggggggggggggggg-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-zz",
            // sign prefix in flags
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-+1",
        ];

        for value in invalid {
            assert!(parse_w3c(value).is_none(), "expected invalid: {value:?}");
        }
    }

    #[test]
    fn test_encode_round_trip() {
        for sampled in [true, false] {
            let mut context = generate();
            context.sampled = sampled;
            assert_eq!(context.format, TraceFormat::W3c);

            let parent = parse_w3c(&encode_w3c(&context)).unwrap();
            assert_eq!(parent.trace_id, context.trace_id);
            assert_eq!(parent.span_id, context.span_id);
            assert_eq!(parent.sampled, context.sampled);
        }
    }
}
