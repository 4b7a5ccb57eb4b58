//! Per-request span hierarchy
//!
//! A LIFO stack of the spans currently open for one request, innermost on
//! top. The top item is the "current" span: new child spans attach to it and
//! request-level operations (exception recording, outbound header injection)
//! act on it.
//!
//! Levels are assigned at push time and equal the stack length before the
//! push, so the root span is level 0 and each nested span is one deeper.
//! Finishing spans out of order is a caller bug and is not detected here.

use crate::telemetry::{Logger, Span};
use std::fmt;
use std::sync::Arc;

/// One open span with its bound logger
#[derive(Clone)]
pub struct SpanStackItem {
    pub span: Arc<dyn Span>,
    pub logger: Arc<dyn Logger>,
    pub operation_name: String,
    pub level: usize,
}

impl fmt::Debug for SpanStackItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanStackItem")
            .field("operation_name", &self.operation_name)
            .field("level", &self.level)
            .field("span_id", &self.span.span_id())
            .finish()
    }
}

/// Stack of open spans for a single request
#[derive(Debug, Default)]
pub struct SpanStack {
    items: Vec<SpanStackItem>,
}

impl SpanStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a span and make it current
    ///
    /// # Returns
    ///
    /// The level assigned to the span (the stack length before the push)
    pub fn push(
        &mut self,
        span: Arc<dyn Span>,
        logger: Arc<dyn Logger>,
        operation_name: impl Into<String>,
    ) -> usize {
        let level = self.items.len();
        self.items.push(SpanStackItem {
            span,
            logger,
            operation_name: operation_name.into(),
            level,
        });
        level
    }

    /// Remove the current span. Popping an empty stack returns `None`.
    pub fn pop(&mut self) -> Option<SpanStackItem> {
        self.items.pop()
    }

    pub fn current(&self) -> Option<&SpanStackItem> {
        self.items.last()
    }

    /// Number of open spans
    pub fn level(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain every open span, innermost first
    pub fn clear(&mut self) -> Vec<SpanStackItem> {
        let mut drained: Vec<_> = self.items.drain(..).collect();
        drained.reverse();
        drained
    }
}
