//! Request telemetry lifecycle
//!
//! Drives one request from `initialize` to `finalize`:
//!
//! ```text
//! uninitialized --initialize--> active --finalize--> finalized
//!                                 |  ^
//!        update_route_info,       |  |
//!        create_child_span, ...   +--+
//! ```
//!
//! `initialize` extracts (or generates) the trace context, snapshots process
//! resources, starts the root server span and binds a logger to it.
//! `finalize` tags the span with duration, resource usage and status, emits
//! the request metrics, logs one `request completed` record and ends the root
//! span. Finalizing twice is a no-op guarded by the absence of stored data.
//!
//! Telemetry never fails the request it observes. Provider errors are logged
//! and replaced with no-op spans and loggers; the outcome types report which
//! path was taken.
//!
//! # Example
//!
//! ```
//! use request_telemetry::config::TelemetryConfig;
//! use request_telemetry::lifecycle::{FinalizeOutcome, RequestHandle, RequestTelemetry};
//! use request_telemetry::propagation::HeaderMap;
//! use request_telemetry::telemetry::memory::InMemoryTelemetry;
//!
//! let recorder = InMemoryTelemetry::new();
//! let telemetry = RequestTelemetry::new(recorder.provider(), TelemetryConfig::default());
//!
//! let handle = RequestHandle::new();
//! telemetry.initialize(&handle, &HeaderMap::new(), "/users/42", "GET");
//! let outcome = telemetry.finalize(&handle, 200);
//!
//! assert!(matches!(outcome, FinalizeOutcome::Finalized(_)));
//! assert_eq!(recorder.samples("http_requests_total").len(), 1);
//! ```

pub mod route;
pub mod scope;

pub use scope::{PerformanceTrackingData, RequestContext, RequestHandle, RequestScope, ScopeError};

use crate::config::TelemetryConfig;
use crate::extraction::{ResolveOptions, SpanExtractor, SPAN_SOURCE_ATTRIBUTE};
use crate::metrics::labels::RequestLabels;
use crate::metrics::RequestInstruments;
use crate::propagation::{
    extract_trace_context, generate, header_value, inject_trace_context, ContextSource,
    Extraction, HeaderMap, TraceContext, TraceFormat, CORRELATION_ID_HEADER, REQUEST_ID_HEADER,
};
use crate::resources::{self, ResourceDelta, ResourceMeasurement};
use crate::telemetry::noop::{NoopLogger, NoopSpan};
use crate::telemetry::{
    Attribute, Layer, Logger, LoggerOptions, Span, SpanKind, SpanOptions, SpanParent,
    SpanStatus, TelemetryError, TelemetryProvider,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Operation type of the root request span's logger
pub const HTTP_REQUEST_OPERATION: &str = "http_request";

/// How `initialize` went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// Root span started by the provider
    Traced { source: ContextSource },
    /// Provider failed; no-op span and logger in place
    Degraded(String),
    /// The scope was already initialized; the first state was kept
    AlreadyInitialized,
}

impl InitOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, InitOutcome::Degraded(_))
    }
}

/// Figures reported for a finalized request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSummary {
    pub trace_id: String,
    pub span_id: String,
    pub request_id: String,
    pub method: String,
    pub route: String,
    pub status_code: u16,
    pub duration_seconds: f64,
    /// `None` when resource tracking is disabled
    pub resources: Option<ResourceDelta>,
    /// Child spans still open at finalize
    pub unfinished_spans: usize,
    pub degraded: bool,
}

/// How `finalize` went
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Finalized(RequestSummary),
    /// Nothing stored for this request: never initialized or already finalized
    NotInitialized,
}

/// Long-lived request telemetry shared by all requests
pub struct RequestTelemetry {
    provider: TelemetryProvider,
    config: TelemetryConfig,
    extractor: SpanExtractor,
    instruments: RequestInstruments,
}

impl fmt::Debug for RequestTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTelemetry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RequestTelemetry {
    /// Create the lifecycle manager and register its metric instruments
    pub fn new(provider: TelemetryProvider, config: TelemetryConfig) -> Self {
        let instruments = RequestInstruments::new(provider.metrics.as_ref());
        Self {
            extractor: SpanExtractor::new(provider.tracer.clone()),
            provider,
            config,
            instruments,
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn provider(&self) -> &TelemetryProvider {
        &self.provider
    }

    /// Start telemetry for a request
    ///
    /// # Arguments
    ///
    /// * `handle` - The request's scope
    /// * `headers` - Inbound headers (case-insensitive names)
    /// * `raw_url` - Request target as received
    /// * `method` - HTTP method
    pub fn initialize(
        &self,
        handle: &RequestHandle,
        headers: &HeaderMap,
        raw_url: &str,
        method: &str,
    ) -> InitOutcome {
        let mut scope = handle.lock();
        if scope.is_initialized() {
            warn!(url = raw_url, "Request telemetry initialized twice, keeping first state");
            return InitOutcome::AlreadyInitialized;
        }

        let extraction = if self.config.enable_header_extraction {
            extract_trace_context(headers)
        } else {
            Extraction {
                context: generate(),
                source: ContextSource::Generated,
            }
        };
        let request = self.request_context(headers, raw_url, method);
        let start_resources = if self.config.enable_resource_tracking {
            resources::snapshot()
        } else {
            ResourceMeasurement::default()
        };

        let (tracking, outcome) =
            match self.start_root(&extraction, &request) {
                Ok((span, logger)) => {
                    debug!(
                        trace_id = %extraction.context.trace_id,
                        source = ?extraction.source,
                        route = %request.route,
                        "Request telemetry initialized"
                    );
                    (
                        PerformanceTrackingData {
                            trace_context: extraction.context,
                            span,
                            logger,
                            started_at: Instant::now(),
                            start_resources,
                            request,
                            degraded: false,
                        },
                        InitOutcome::Traced {
                            source: extraction.source,
                        },
                    )
                }
                Err(e) => {
                    warn!(error = %e, url = raw_url, "Telemetry provider failed, using no-op span");
                    let context = generate();
                    let request = RequestContext {
                        request_id: new_id(),
                        ..request
                    };
                    (
                        PerformanceTrackingData {
                            span: Arc::new(NoopSpan::from_context(&context)),
                            logger: Arc::new(NoopLogger),
                            trace_context: context,
                            started_at: Instant::now(),
                            start_resources,
                            request,
                            degraded: true,
                        },
                        InitOutcome::Degraded(e.to_string()),
                    )
                }
            };

        let operation_name = tracking.request.method.clone() + " " + &tracking.request.route;
        scope
            .stack_mut()
            .push(tracking.span.clone(), tracking.logger.clone(), operation_name);
        if let Err(e) = scope.set_tracking(tracking) {
            warn!(error = %e, "Request telemetry state not stored");
        }

        outcome
    }

    fn request_context(&self, headers: &HeaderMap, raw_url: &str, method: &str) -> RequestContext {
        let route = if self.config.derive_route_templates {
            route::derive_route(raw_url)
        } else {
            route::path_of(raw_url).to_string()
        };

        let request_id = non_empty_header(headers, REQUEST_ID_HEADER).unwrap_or_else(new_id);
        let correlation_id =
            non_empty_header(headers, CORRELATION_ID_HEADER).unwrap_or_else(|| request_id.clone());

        let ip = header_value(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| non_empty_header(headers, "x-real-ip"));

        RequestContext {
            method: method.trim().to_ascii_uppercase(),
            route,
            url: raw_url.to_string(),
            status_code: None,
            user_agent: non_empty_header(headers, "user-agent"),
            ip,
            user_id: None,
            correlation_id,
            request_id,
        }
    }

    fn start_root(
        &self,
        extraction: &Extraction,
        request: &RequestContext,
    ) -> Result<(Arc<dyn Span>, Arc<dyn Logger>), TelemetryError> {
        let context = &extraction.context;
        let source = if extraction.source.is_propagated() {
            "extracted"
        } else {
            "fallback"
        };

        let mut options = SpanOptions::new(SpanKind::Server)
            .with_attribute("http.method", request.method.as_str())
            .with_attribute("http.route", request.route.as_str())
            .with_attribute("http.url", request.url.as_str())
            .with_attribute("trace.format", context.format.as_str())
            .with_attribute("trace.sampled", context.sampled)
            .with_attribute("trace.id", context.trace_id.as_str())
            .with_attribute(SPAN_SOURCE_ATTRIBUTE, source)
            .with_attribute("span.level", 0i64)
            .with_attribute("request.id", request.request_id.as_str())
            .with_attribute("correlation.id", request.correlation_id.as_str())
            .with_parent(SpanParent::Remote(context.clone()));
        if let Some(ref user_agent) = request.user_agent {
            options = options.with_attribute("http.user_agent", user_agent);
        }
        if let Some(ref ip) = request.ip {
            options = options.with_attribute("http.client_ip", ip);
        }

        let name = format!("{} {}", request.method, request.route);
        let span = self.provider.tracer.start_span(&name, options)?;

        let logger = self.provider.loggers.get_logger(
            span.clone(),
            LoggerOptions {
                operation_type: HTTP_REQUEST_OPERATION.to_string(),
                operation_name: name,
                layer: Layer::Http,
                auto_add_span_events: self.config.auto_add_span_events,
            },
        );
        match logger {
            Ok(logger) => Ok((span, logger)),
            Err(e) => {
                span.end();
                Err(e)
            }
        }
    }

    /// Overwrite the derived route with the framework's authoritative values
    ///
    /// Safe to call any number of times. Returns `false` (and logs) when the
    /// request was never initialized.
    pub fn update_route_info(
        &self,
        handle: &RequestHandle,
        method: &str,
        route: &str,
        url: &str,
    ) -> bool {
        let mut scope = handle.lock();
        let Ok(tracking) = scope.tracking_mut() else {
            warn!(route, "update_route_info called before initialize");
            return false;
        };

        tracking.request.method = method.trim().to_ascii_uppercase();
        tracking.request.route = route.to_string();
        tracking.request.url = url.to_string();

        tracking.span.set("http.method", tracking.request.method.as_str());
        tracking.span.set("http.route", route);
        tracking.span.set("http.url", url);
        true
    }

    /// Attach the authenticated user to the request
    pub fn set_user_id(&self, handle: &RequestHandle, user_id: &str) -> bool {
        let mut scope = handle.lock();
        let Ok(tracking) = scope.tracking_mut() else {
            warn!("set_user_id called before initialize");
            return false;
        };

        tracking.request.user_id = Some(user_id.to_string());
        tracking.span.set("user.id", user_id);
        true
    }

    /// Open a child span under the request's current span
    ///
    /// The child becomes current until it is finished or dropped. Outside an
    /// initialized request, a standalone span is resolved instead (active span
    /// or new root) and nothing is pushed.
    pub fn create_child_span(
        &self,
        handle: &RequestHandle,
        operation_name: &str,
        layer: Layer,
    ) -> ChildSpan {
        let mut scope = handle.lock();

        let current = scope.stack().current().map(|item| item.span.clone());
        let Some(parent) = current else {
            drop(scope);
            warn!(operation = operation_name, "Child span requested outside an initialized request");
            return self.standalone_span(operation_name, layer);
        };
        let level = scope.stack().level();

        let options = SpanOptions::new(SpanKind::Internal)
            .with_attribute("span.level", level)
            .with_attribute("layer", layer.as_str())
            .with_parent(SpanParent::Local(parent.clone()));
        let span = self
            .provider
            .tracer
            .start_span(operation_name, options)
            .unwrap_or_else(|e| {
                warn!(error = %e, operation = operation_name, "Failed to start child span, using no-op");
                noop_child_of(parent.as_ref())
            });
        let logger = self.logger_for(&span, operation_name, layer);

        scope
            .stack_mut()
            .push(span.clone(), logger.clone(), operation_name);

        ChildSpan {
            handle: Some(handle.clone()),
            span,
            logger,
            level,
            finished: false,
        }
    }

    fn standalone_span(&self, operation_name: &str, layer: Layer) -> ChildSpan {
        let options = ResolveOptions {
            operation_name: operation_name.to_string(),
            kind: SpanKind::Internal,
            attributes: vec![Attribute::new("layer", layer.as_str())],
            extract_from_headers: false,
            create_new_if_not_found: self.config.create_new_if_not_found,
        };

        let span: Arc<dyn Span> = match self.extractor.resolve(None, &options) {
            Some(resolved) => resolved.span,
            None => Arc::new(NoopSpan::new()),
        };
        let logger = self.logger_for(&span, operation_name, layer);

        ChildSpan {
            handle: None,
            span,
            logger,
            level: 0,
            finished: false,
        }
    }

    fn logger_for(&self, span: &Arc<dyn Span>, operation_name: &str, layer: Layer) -> Arc<dyn Logger> {
        self.provider
            .loggers
            .get_logger(
                span.clone(),
                LoggerOptions {
                    operation_type: layer.as_str().to_string(),
                    operation_name: operation_name.to_string(),
                    layer,
                    auto_add_span_events: self.config.auto_add_span_events,
                },
            )
            .unwrap_or_else(|e| {
                warn!(error = %e, operation = operation_name, "Failed to create logger, using no-op");
                Arc::new(NoopLogger)
            })
    }

    /// Record an error raised while serving the request on the current span
    pub fn record_exception(&self, handle: &RequestHandle, error: &dyn std::error::Error) -> bool {
        let scope = handle.lock();
        let Some(item) = scope.stack().current() else {
            warn!(error = %error, "record_exception called outside an initialized request");
            return false;
        };

        item.span.record_exception(error);
        item.span.set_status(SpanStatus::Error(error.to_string()));
        item.logger.error(
            "request failed",
            &[
                Attribute::new("exception.message", error.to_string()),
                Attribute::new("operation", item.operation_name.as_str()),
            ],
        );
        true
    }

    /// Headers to send on a downstream call made from the current span
    ///
    /// The trace context is re-parented to the current span and written in
    /// the request's own format, along with the request and correlation ids.
    /// Empty outside an initialized request.
    pub fn outbound_headers(&self, handle: &RequestHandle) -> HeaderMap {
        let scope = handle.lock();
        let mut headers = HeaderMap::new();
        let Ok(tracking) = scope.tracking() else {
            warn!("outbound_headers called before initialize");
            return headers;
        };

        let span_id = scope
            .stack()
            .current()
            .map(|item| item.span.span_id())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| tracking.trace_context.span_id.clone());
        let context: TraceContext = tracking.trace_context.child(&span_id);

        inject_trace_context(&context, &mut headers);
        headers.insert(
            REQUEST_ID_HEADER.to_string(),
            tracking.request.request_id.clone(),
        );
        headers.insert(
            CORRELATION_ID_HEADER.to_string(),
            tracking.request.correlation_id.clone(),
        );
        headers
    }

    /// Finish telemetry for a request
    ///
    /// Emits exactly one counter increment and one duration observation per
    /// initialized request. Calling it again returns
    /// [`FinalizeOutcome::NotInitialized`].
    pub fn finalize(&self, handle: &RequestHandle, status_code: u16) -> FinalizeOutcome {
        let mut scope = handle.lock();
        let Ok(mut tracking) = scope.take_tracking() else {
            warn!(status_code, "finalize called without initialized request telemetry");
            return FinalizeOutcome::NotInitialized;
        };

        let duration_seconds = tracking.started_at.elapsed().as_secs_f64();
        tracking.request.status_code = Some(status_code);
        let span = tracking.span.clone();

        let delta = self.config.enable_resource_tracking.then(|| {
            let delta = resources::delta(&tracking.start_resources, &resources::snapshot());
            span.set("request.memory_usage_bytes", delta.memory_bytes);
            span.set("request.cpu_time_ms", delta.cpu_time_ms());
            delta
        });
        span.set("request.duration_seconds", duration_seconds);
        span.set("http.status_code", status_code);
        if status_code >= 500 {
            span.set_status(SpanStatus::Error(format!("HTTP {}", status_code)));
        }

        let labels = RequestLabels::new(
            &tracking.request.method,
            &tracking.request.route,
            status_code,
        );
        self.instruments.record_request(&labels, duration_seconds);
        if let Some(ref delta) = delta {
            self.instruments
                .record_resources(&labels, delta.memory_bytes, delta.cpu_seconds);
        }

        let mut fields = vec![
            Attribute::new("http.method", labels.method.as_str()),
            Attribute::new("http.route", labels.route.as_str()),
            Attribute::new("http.status_code", status_code),
            Attribute::new("duration_seconds", duration_seconds),
            Attribute::new("request.id", tracking.request.request_id.as_str()),
        ];
        if let Some(ref delta) = delta {
            fields.push(Attribute::new("memory_usage_bytes", delta.memory_bytes));
            fields.push(Attribute::new("cpu_time_ms", delta.cpu_time_ms()));
        }
        tracking.logger.info("request completed", &fields);

        let unfinished_spans = scope.stack().level().saturating_sub(1);
        if unfinished_spans > 0 {
            warn!(
                unfinished_spans,
                route = %tracking.request.route,
                "Finalizing request with unfinished child spans"
            );
        }
        for item in scope.stack_mut().clear() {
            if item.level > 0 {
                item.span.end();
            }
        }
        span.end();

        FinalizeOutcome::Finalized(RequestSummary {
            trace_id: tracking.trace_context.trace_id,
            span_id: span.span_id(),
            request_id: tracking.request.request_id,
            method: labels.method,
            route: labels.route,
            status_code,
            duration_seconds,
            resources: delta,
            unfinished_spans,
            degraded: tracking.degraded,
        })
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn non_empty_header(headers: &HeaderMap, name: &str) -> Option<String> {
    header_value(headers, name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn noop_child_of(parent: &dyn Span) -> Arc<dyn Span> {
    Arc::new(NoopSpan::from_context(&child_context_of(parent)))
}

fn child_context_of(parent: &dyn Span) -> TraceContext {
    TraceContext {
        trace_id: parent.trace_id(),
        span_id: crate::propagation::generate_span_id(),
        parent_span_id: Some(parent.span_id()),
        sampled: parent.is_sampled(),
        trace_state: None,
        format: TraceFormat::W3c,
    }
}

/// An open child span
///
/// Ends the span and pops it off the request's stack on [`ChildSpan::finish`]
/// or when dropped.
pub struct ChildSpan {
    handle: Option<RequestHandle>,
    span: Arc<dyn Span>,
    logger: Arc<dyn Logger>,
    level: usize,
    finished: bool,
}

impl ChildSpan {
    pub fn span(&self) -> &Arc<dyn Span> {
        &self.span
    }

    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    /// Stack level the span was pushed at (0 for standalone spans)
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn finish(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.span.end();

        if let Some(ref handle) = self.handle {
            let popped = handle.lock().stack_mut().pop();
            match popped {
                Some(item) if item.span.span_id() != self.span.span_id() => {
                    debug!(
                        expected = self.level,
                        popped = item.level,
                        "Child span finished out of order"
                    );
                }
                None => debug!("Child span finished after request was finalized"),
                _ => {}
            }
        }
    }
}

impl Drop for ChildSpan {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ChildSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildSpan")
            .field("span_id", &self.span.span_id())
            .field("level", &self.level)
            .field("finished", &self.finished)
            .finish()
    }
}
