//! Process-level tracing setup
//!
//! Installs the OpenTelemetry SDK tracer provider and the global `tracing`
//! subscriber. Request-scoped spans are started through
//! [`crate::telemetry::otel::OtelTracer`], which reads the provider installed
//! here.
//!
//! # Features
//!
//! - Service name and version recorded on the provider resource
//! - Text or JSON log output, filtered by `RUST_LOG`
//! - Graceful shutdown with span flushing
//!
//! # Example
//!
//! ```no_run
//! use request_telemetry::config::TracingConfig;
//! use request_telemetry::tracing::init::init_tracing;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TracingConfig {
//!     enabled: true,
//!     service_name: "orders-api".to_string(),
//!     json: false,
//! };
//!
//! let _guard = init_tracing(&config)?;
//! // Guard will flush spans on drop
//! # Ok(())
//! # }
//! ```

pub mod init;
pub mod subscriber;

pub use init::{init_tracing, shutdown_tracing, TracingError, TracingGuard};
pub use subscriber::init_subscriber;
