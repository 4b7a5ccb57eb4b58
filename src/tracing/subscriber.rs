//! Tracing subscriber setup with layered architecture
//!
//! The process-wide subscriber carries the logs written through
//! [`crate::telemetry::log::TracingLogger`] and, when tracing is enabled,
//! bridges `tracing` spans into OpenTelemetry.
//!
//! # Layer Architecture
//!
//! ```text
//! Registry
//!   ├── Fmt Layer (text, or JSON when `json: true`)
//!   ├── EnvFilter (RUST_LOG, else the given default)
//!   └── OpenTelemetry Layer (only when tracing is enabled)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use request_telemetry::config::TracingConfig;
//! use request_telemetry::tracing::init_subscriber;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TracingConfig {
//!     enabled: true,
//!     service_name: "orders-api".to_string(),
//!     json: true,
//! };
//!
//! let _guard = init_subscriber(&config, "info")?;
//! # Ok(())
//! # }
//! ```

use crate::config::TracingConfig;
use crate::tracing::init::{init_tracing, TracingError, TracingGuard};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize the global tracing subscriber
///
/// # Arguments
///
/// * `config` - Tracing configuration
/// * `default_filter` - Filter directive used when `RUST_LOG` is unset or invalid
///
/// # Returns
///
/// * `Ok(TracingGuard)` - Guard that manages the tracer provider lifecycle
/// * `Err(TracingError)` - If the provider fails or a global subscriber is already set
pub fn init_subscriber(
    config: &TracingConfig,
    default_filter: &str,
) -> Result<TracingGuard, TracingError> {
    let guard = init_tracing(config)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .boxed()
    };

    let otel_layer = guard
        .sdk_tracer(&config.service_name)
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let subscriber = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .with(otel_layer);

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        TracingError::SubscriberError(format!(
            "Failed to set global subscriber (may already be initialized): {}",
            e
        ))
    })?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_second_install_fails() {
        let config = TracingConfig::default();
        // Another test binary component may already own the global subscriber
        let _ = init_subscriber(&config, "debug");

        let result = init_subscriber(&config, "debug");
        assert!(matches!(result, Err(TracingError::SubscriberError(_))));
    }
}
