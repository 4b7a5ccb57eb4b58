//! Best-effort route templates from raw URLs
//!
//! Until the framework reports the matched route, the route label is derived
//! from the request path by replacing identifier-looking segments:
//!
//! | Segment | Placeholder |
//! |---------|-------------|
//! | UUID (`8-4-4-4-12` hex) | `:uuid` |
//! | 24 hex chars (ObjectId) | `:objectId` |
//! | digits only | `:id` |
//!
//! Numeric business identifiers (years, versions) are replaced too; callers
//! that need the real template should use `update_route_info`.

use lazy_static::lazy_static;
use regex_lite::Regex;

lazy_static! {
    static ref UUID_SEGMENT: Regex = Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"
    )
    .unwrap();
    static ref OBJECT_ID_SEGMENT: Regex = Regex::new(r"^[0-9a-fA-F]{24}$").unwrap();
    static ref NUMERIC_SEGMENT: Regex = Regex::new(r"^[0-9]+$").unwrap();
}

/// Path component of a raw URL (origin-form or absolute-form), without query
/// or fragment. Never empty.
pub fn path_of(raw_url: &str) -> &str {
    let without_query = raw_url.split(['?', '#']).next().unwrap_or_default();

    let path = match without_query.find("://") {
        Some(scheme_end) => {
            let after_scheme = &without_query[scheme_end + 3..];
            after_scheme.find('/').map_or("/", |i| &after_scheme[i..])
        }
        None => without_query,
    };

    if path.is_empty() {
        "/"
    } else {
        path
    }
}

/// Replace identifier segments of the URL's path with placeholders
pub fn derive_route(raw_url: &str) -> String {
    path_of(raw_url)
        .split('/')
        .map(template_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn template_segment(segment: &str) -> &str {
    if segment.is_empty() {
        segment
    } else if UUID_SEGMENT.is_match(segment) {
        ":uuid"
    } else if OBJECT_ID_SEGMENT.is_match(segment) {
        ":objectId"
    } else if NUMERIC_SEGMENT.is_match(segment) {
        ":id"
    } else {
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_id() {
        assert_eq!(derive_route("/users/123?x=1"), "/users/:id");
        assert_eq!(derive_route("/users/123/orders/45"), "/users/:id/orders/:id");
    }

    #[test]
    fn test_uuid_and_object_id() {
        assert_eq!(
            derive_route("/files/550e8400-e29b-41d4-a716-446655440000"),
            "/files/:uuid"
        );
        assert_eq!(
            derive_route("/posts/507f1f77bcf86cd799439011/comments"),
            "/posts/:objectId/comments"
        );
    }

    #[test]
    fn test_plain_segments_untouched() {
        assert_eq!(derive_route("/health"), "/health");
        assert_eq!(derive_route("/api/v2/users/"), "/api/v2/users/");
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(derive_route("http://example.com/users/7#top"), "/users/:id");
        assert_eq!(path_of("https://example.com"), "/");
        assert_eq!(path_of(""), "/");
    }
}
