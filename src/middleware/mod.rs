//! HTTP middleware pairing `initialize` with `finalize`
//!
//! [`instrument`] wraps a hyper handler:
//!
//! 1. creates the request's [`RequestHandle`] and stores it in the request
//!    extensions, so handlers can open child spans
//! 2. initializes request telemetry from the inbound headers
//! 3. runs the handler; an `Err` is recorded on the current span and returned
//!    unchanged
//! 4. finalizes with the response status (500 on error)
//!
//! A [`FinalizeGuard`] finalizes with status 500 if the request future is
//! dropped or panics before completing, so every initialize is paired with
//! exactly one finalize.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use http_body_util::Full;
//! use hyper::{Request, Response};
//! use request_telemetry::lifecycle::RequestTelemetry;
//! use request_telemetry::middleware::{instrument, request_handle};
//! use std::sync::Arc;
//!
//! async fn serve(
//!     telemetry: Arc<RequestTelemetry>,
//!     req: Request<()>,
//! ) -> Result<Response<Full<Bytes>>, std::io::Error> {
//!     instrument(telemetry, req, |req| async move {
//!         let _handle = request_handle(&req);
//!         Ok(Response::new(Full::new(Bytes::from("ok"))))
//!     })
//!     .await
//! }
//! ```

use crate::lifecycle::{FinalizeOutcome, RequestHandle, RequestTelemetry};
use crate::propagation::HeaderMap;
use hyper::{Request, Response};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Status used when the handler fails or never completes
pub const FAILURE_STATUS: u16 = 500;

/// Run `handler` under request telemetry
pub async fn instrument<B, R, E, F, Fut>(
    telemetry: Arc<RequestTelemetry>,
    mut request: Request<B>,
    handler: F,
) -> Result<Response<R>, E>
where
    F: FnOnce(Request<B>) -> Fut,
    Fut: Future<Output = Result<Response<R>, E>>,
    E: std::error::Error,
{
    let handle = RequestHandle::new();
    let headers = header_map(request.headers());
    let raw_url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().to_string());

    telemetry.initialize(&handle, &headers, &raw_url, request.method().as_str());
    request.extensions_mut().insert(handle.clone());

    let mut guard = FinalizeGuard::new(telemetry.clone(), handle.clone());
    let result = handler(request).await;

    match &result {
        Ok(response) => {
            guard.finalize(response.status().as_u16());
        }
        Err(e) => {
            telemetry.record_exception(&handle, e);
            guard.finalize(FAILURE_STATUS);
        }
    }

    result
}

/// The request's telemetry handle, when the request passed through [`instrument`]
pub fn request_handle<B>(request: &Request<B>) -> Option<RequestHandle> {
    request.extensions().get::<RequestHandle>().cloned()
}

/// Convert hyper headers to the codec's header map
///
/// Names are lowercased; repeated headers are joined with `,`; values that
/// are not visible ASCII are skipped.
pub fn header_map(headers: &hyper::HeaderMap) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.keys_len());
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            debug!(header = %name, "Skipping non-ASCII header value");
            continue;
        };
        map.entry(name.as_str().to_string())
            .and_modify(|existing: &mut String| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}

/// Finalizes a request exactly once
///
/// Call [`FinalizeGuard::finalize`] with the real status; if the guard is
/// dropped first, the request is finalized with status 500.
pub struct FinalizeGuard {
    telemetry: Arc<RequestTelemetry>,
    handle: RequestHandle,
    done: bool,
}

impl FinalizeGuard {
    pub fn new(telemetry: Arc<RequestTelemetry>, handle: RequestHandle) -> Self {
        Self {
            telemetry,
            handle,
            done: false,
        }
    }

    /// Finalize with `status_code`. Later calls return `NotInitialized`.
    pub fn finalize(&mut self, status_code: u16) -> FinalizeOutcome {
        if self.done {
            return FinalizeOutcome::NotInitialized;
        }
        self.done = true;
        self.telemetry.finalize(&self.handle, status_code)
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if !self.done {
            debug!("Request ended before completion, finalizing with status 500");
            self.finalize(FAILURE_STATUS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::metrics::REQUESTS_TOTAL;
    use crate::telemetry::memory::InMemoryTelemetry;
    use crate::telemetry::{Layer, Span};
    use std::fmt;

    #[derive(Debug)]
    struct HandlerError;

    impl fmt::Display for HandlerError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("handler exploded")
        }
    }

    impl std::error::Error for HandlerError {}

    fn setup() -> (InMemoryTelemetry, Arc<RequestTelemetry>) {
        let recorder = InMemoryTelemetry::new();
        let telemetry = Arc::new(RequestTelemetry::new(
            recorder.provider(),
            TelemetryConfig::default(),
        ));
        (recorder, telemetry)
    }

    #[test]
    fn test_header_map() {
        let mut headers = hyper::HeaderMap::new();
        headers.insert("TraceParent", "00-abc".parse().unwrap());
        headers.append("x-forwarded-for", "1.1.1.1".parse().unwrap());
        headers.append("x-forwarded-for", "2.2.2.2".parse().unwrap());

        let map = header_map(&headers);
        assert_eq!(map.get("traceparent").map(String::as_str), Some("00-abc"));
        assert_eq!(
            map.get("x-forwarded-for").map(String::as_str),
            Some("1.1.1.1,2.2.2.2")
        );
    }

    #[tokio::test]
    async fn test_instrument_success() {
        let (recorder, telemetry) = setup();
        let request = Request::builder()
            .method("GET")
            .uri("/users/12?verbose=1")
            .header("traceparent", "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
            .body(())
            .unwrap();

        let inner = telemetry.clone();
        let response = instrument(telemetry, request, |req| async move {
            let handle = request_handle(&req).expect("handle in extensions");
            let child = inner.create_child_span(&handle, "users.get", Layer::Api);
            child.finish();
            Ok::<_, HandlerError>(Response::new("ok"))
        })
        .await
        .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        let counts = recorder.samples(REQUESTS_TOTAL);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].label("route"), Some("/users/:id"));
        assert_eq!(counts[0].label("status_code"), Some("200"));

        let root = recorder.span_named("GET /users/:id").unwrap();
        assert_eq!(root.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert!(root.is_ended());
    }

    #[test]
    fn test_instrument_error_reraised() {
        let (recorder, telemetry) = setup();
        let request = Request::builder().uri("/fail").body(()).unwrap();

        let result = tokio_test::block_on(instrument(telemetry, request, |_req| async move {
            Err::<Response<()>, _>(HandlerError)
        }));

        assert!(result.is_err());
        let counts = recorder.samples(REQUESTS_TOTAL);
        assert_eq!(counts[0].label("status_code"), Some("500"));
        let root = recorder.span_named("GET /fail").unwrap();
        assert_eq!(root.exceptions(), vec!["handler exploded".to_string()]);
    }

    #[test]
    fn test_guard_finalizes_on_drop() {
        let (recorder, telemetry) = setup();
        let handle = RequestHandle::new();
        telemetry.initialize(&handle, &HeaderMap::new(), "/slow", "GET");

        drop(FinalizeGuard::new(telemetry.clone(), handle.clone()));

        let counts = recorder.samples(REQUESTS_TOTAL);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].label("status_code"), Some("500"));
        assert!(!handle.is_initialized());
    }

    #[test]
    fn test_guard_finalizes_once() {
        let (recorder, telemetry) = setup();
        let handle = RequestHandle::new();
        telemetry.initialize(&handle, &HeaderMap::new(), "/", "GET");

        let mut guard = FinalizeGuard::new(telemetry, handle);
        assert!(matches!(guard.finalize(204), FinalizeOutcome::Finalized(_)));
        assert_eq!(guard.finalize(204), FinalizeOutcome::NotInitialized);
        drop(guard);

        assert_eq!(recorder.samples(REQUESTS_TOTAL).len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_request_is_finalized() {
        let (recorder, telemetry) = setup();
        let request = Request::builder().uri("/hang").body(()).unwrap();

        let future = instrument(telemetry, request, |_req| async move {
            std::future::pending::<Result<Response<()>, HandlerError>>().await
        });
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(10), future).await;
        assert!(timed_out.is_err());

        let counts = recorder.samples(REQUESTS_TOTAL);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].label("status_code"), Some("500"));
    }
}
