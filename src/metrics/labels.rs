//! Metric label normalization
//!
//! Request labels come straight from client input, so every value is bounded
//! before it reaches a metric: unknown methods collapse to `OTHER`, routes lose
//! their query string and are capped in length.

/// Methods kept as their own label value
pub const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Maximum route label length, including the ellipsis
pub const MAX_ROUTE_LEN: usize = 100;

const ELLIPSIS: &str = "...";

/// Uppercase a known HTTP method, `OTHER` for anything else
pub fn normalize_method(method: &str) -> String {
    let upper = method.trim().to_ascii_uppercase();
    if ALLOWED_METHODS.contains(&upper.as_str()) {
        upper
    } else {
        "OTHER".to_string()
    }
}

/// Strip the query string and bound the length
///
/// Empty routes become `unknown`. Routes longer than [`MAX_ROUTE_LEN`] keep
/// their first 97 characters followed by `...`.
pub fn normalize_route(route: &str) -> String {
    let path = route.split(['?', '#']).next().unwrap_or_default().trim();
    if path.is_empty() {
        return "unknown".to_string();
    }

    if path.chars().count() <= MAX_ROUTE_LEN {
        return path.to_string();
    }

    let mut truncated: String = path.chars().take(MAX_ROUTE_LEN - ELLIPSIS.len()).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Status code as a label value
pub fn status_bucket(status_code: u16) -> String {
    status_code.to_string()
}

/// Normalized label set for per-request metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLabels {
    pub method: String,
    pub route: String,
    pub status_code: String,
}

impl RequestLabels {
    pub fn new(method: &str, route: &str, status_code: u16) -> Self {
        Self {
            method: normalize_method(method),
            route: normalize_route(route),
            status_code: status_bucket(status_code),
        }
    }

    pub fn as_pairs(&self) -> [(&str, &str); 3] {
        [
            ("method", self.method.as_str()),
            ("route", self.route.as_str()),
            ("status_code", self.status_code.as_str()),
        ]
    }
}
