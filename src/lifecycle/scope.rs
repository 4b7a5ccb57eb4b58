//! Per-request state
//!
//! Each request owns one [`RequestScope`]: its tracking data and its span
//! stack. The scope is shared only between the tasks serving that request,
//! through a [`RequestHandle`]. Nothing here is process-global, so
//! concurrent requests never see each other's spans.

use crate::propagation::TraceContext;
use crate::resources::ResourceMeasurement;
use crate::span_stack::SpanStack;
use crate::telemetry::{Logger, Span};
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Scope access errors. Callers log these and carry on.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Request telemetry not initialized")]
    NotInitialized,

    #[error("Request telemetry already initialized")]
    AlreadyInitialized,
}

/// What is known about the request being served
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub method: String,
    pub route: String,
    pub url: String,
    pub status_code: Option<u16>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
    pub user_id: Option<String>,
    pub correlation_id: String,
    pub request_id: String,
}

/// Everything `finalize` needs, stored at `initialize`
pub struct PerformanceTrackingData {
    pub trace_context: TraceContext,
    pub span: Arc<dyn Span>,
    pub logger: Arc<dyn Logger>,
    pub started_at: Instant,
    pub start_resources: ResourceMeasurement,
    pub request: RequestContext,
    /// Set when a provider failure forced no-op telemetry
    pub degraded: bool,
}

impl fmt::Debug for PerformanceTrackingData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceTrackingData")
            .field("trace_context", &self.trace_context)
            .field("span_id", &self.span.span_id())
            .field("started_at", &self.started_at)
            .field("request", &self.request)
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}

/// Per-request store
#[derive(Debug, Default)]
pub struct RequestScope {
    tracking: Option<PerformanceTrackingData>,
    stack: SpanStack,
}

impl RequestScope {
    pub fn tracking(&self) -> Result<&PerformanceTrackingData, ScopeError> {
        self.tracking.as_ref().ok_or(ScopeError::NotInitialized)
    }

    pub fn tracking_mut(&mut self) -> Result<&mut PerformanceTrackingData, ScopeError> {
        self.tracking.as_mut().ok_or(ScopeError::NotInitialized)
    }

    /// Store tracking data. The first value stored wins.
    pub fn set_tracking(&mut self, data: PerformanceTrackingData) -> Result<(), ScopeError> {
        if self.tracking.is_some() {
            return Err(ScopeError::AlreadyInitialized);
        }
        self.tracking = Some(data);
        Ok(())
    }

    /// Remove and return the tracking data
    pub fn take_tracking(&mut self) -> Result<PerformanceTrackingData, ScopeError> {
        self.tracking.take().ok_or(ScopeError::NotInitialized)
    }

    pub fn is_initialized(&self) -> bool {
        self.tracking.is_some()
    }

    pub fn stack(&self) -> &SpanStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut SpanStack {
        &mut self.stack
    }
}

/// Shared handle to one request's scope
///
/// Cloning is cheap; every clone refers to the same scope.
#[derive(Debug, Clone, Default)]
pub struct RequestHandle {
    scope: Arc<Mutex<RequestScope>>,
}

impl RequestHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, RequestScope> {
        self.scope.lock()
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_initialized()
    }

    /// The request's trace context, if initialized
    pub fn trace_context(&self) -> Option<TraceContext> {
        self.lock().tracking().ok().map(|t| t.trace_context.clone())
    }

    /// Snapshot of the request context, if initialized
    pub fn request_context(&self) -> Option<RequestContext> {
        self.lock().tracking().ok().map(|t| t.request.clone())
    }

    /// Number of open spans, root included
    pub fn span_depth(&self) -> usize {
        self.lock().stack().level()
    }
}
