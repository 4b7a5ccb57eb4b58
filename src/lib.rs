//! Request Telemetry Library
//!
//! Request-scoped distributed tracing for HTTP services.
//!
//! # Features
//!
//! - **Propagation**: W3C `traceparent`/`tracestate` and B3 headers
//! - **Span Resolution**: active span, then inbound headers, then a new root
//! - **Request Lifecycle**: initialize, update route, child spans, finalize
//! - **Resource Tracking**: memory and CPU consumed per request
//! - **Metrics**: request counters and histograms with bounded-cardinality labels
//!
//! Every capability (tracer, logger, metrics) is injected through a
//! [`telemetry::TelemetryProvider`]; a failing provider degrades to no-op
//! telemetry instead of failing the request.
//!
//! # Example
//!
//! ```no_run
//! use request_telemetry::config::Config;
//! use request_telemetry::lifecycle::RequestTelemetry;
//! use request_telemetry::server::Server;
//! use request_telemetry::telemetry::TelemetryProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let telemetry = Arc::new(RequestTelemetry::new(
//!         TelemetryProvider::noop(),
//!         config.telemetry.clone(),
//!     ));
//!     let server = Server::bind(&config, telemetry).await?;
//!     server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod extraction;
pub mod lifecycle;
pub mod metrics;
pub mod middleware;
pub mod propagation;
pub mod resources;
pub mod server;
pub mod span_stack;
pub mod telemetry;

#[cfg(feature = "tracing")]
pub mod tracing;

// Re-export commonly used types
pub use config::Config;
pub use lifecycle::{RequestHandle, RequestTelemetry};
pub use propagation::{TraceContext, TraceFormat};
pub use telemetry::TelemetryProvider;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
