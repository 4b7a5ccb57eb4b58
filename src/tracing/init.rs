//! OpenTelemetry tracer provider lifecycle
//!
//! Builds the SDK tracer provider that [`crate::telemetry::otel::OtelTracer`]
//! and the `tracing-opentelemetry` layer start spans on, installs it
//! globally, and flushes it on shutdown.

use crate::config::TracingConfig;
use opentelemetry::global;
use opentelemetry::KeyValue;
use opentelemetry_sdk::trace::{self as sdktrace, TracerProvider};
use opentelemetry_sdk::Resource;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during tracing initialization
#[derive(Error, Debug)]
pub enum TracingError {
    #[error("Failed to initialize tracer provider: {0}")]
    ProviderError(String),

    #[error("Failed to install subscriber: {0}")]
    SubscriberError(String),
}

/// RAII guard for tracing lifecycle management
///
/// Flushes and shuts down the tracer provider when dropped.
#[derive(Debug)]
pub struct TracingGuard {
    provider: Option<Arc<TracerProvider>>,
    active: bool,
}

impl TracingGuard {
    fn new(provider: TracerProvider) -> Self {
        Self {
            provider: Some(Arc::new(provider)),
            active: true,
        }
    }

    /// Guard for disabled tracing
    fn inactive() -> Self {
        Self {
            provider: None,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// SDK tracer for the `tracing-opentelemetry` layer
    pub(crate) fn sdk_tracer(&self, name: &str) -> Option<sdktrace::Tracer> {
        use opentelemetry::trace::TracerProvider as _;
        self.provider
            .as_ref()
            .map(|provider| provider.tracer(name.to_string()))
    }
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        if self.active {
            if let Some(provider) = &self.provider {
                let _ = provider.force_flush();
            }
            global::shutdown_tracer_provider();
        }
    }
}

/// Initialize the OpenTelemetry tracer provider
///
/// # Arguments
///
/// * `config` - Tracing configuration; only `enabled` and `service_name` are used here
///
/// # Returns
///
/// * `Ok(TracingGuard)` - Active guard, or an inactive one when tracing is disabled
/// * `Err(TracingError)` - If the configuration cannot produce a provider
///
/// # Example
///
/// ```no_run
/// use request_telemetry::config::TracingConfig;
/// use request_telemetry::tracing::init::init_tracing;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TracingConfig {
///     enabled: true,
///     service_name: "orders-api".to_string(),
///     json: false,
/// };
///
/// let _guard = init_tracing(&config)?;
/// # Ok(())
/// # }
/// ```
pub fn init_tracing(config: &TracingConfig) -> Result<TracingGuard, TracingError> {
    if !config.enabled {
        return Ok(TracingGuard::inactive());
    }

    let service_name = config.service_name.trim();
    if service_name.is_empty() {
        return Err(TracingError::ProviderError(
            "service name cannot be empty".into(),
        ));
    }

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);
    let provider = TracerProvider::builder()
        .with_config(sdktrace::Config::default().with_resource(resource))
        .build();

    global::set_tracer_provider(provider.clone());

    Ok(TracingGuard::new(provider))
}

/// Explicitly shutdown tracing and flush all pending spans
pub fn shutdown_tracing(mut guard: TracingGuard) -> Result<(), TracingError> {
    if guard.active {
        if let Some(provider) = &guard.provider {
            for result in provider.force_flush() {
                result.map_err(|e| TracingError::ProviderError(e.to_string()))?;
            }
        }
        // Prevent a second shutdown in Drop
        guard.active = false;
        global::shutdown_tracer_provider();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_disabled_guard_is_inactive() {
        let guard = init_tracing(&TracingConfig::default()).unwrap();
        assert!(!guard.is_active());
        assert!(guard.sdk_tracer("test").is_none());
    }

    #[test]
    fn test_empty_service_name() {
        let config = TracingConfig {
            enabled: true,
            service_name: " ".into(),
            json: false,
        };
        assert!(matches!(
            init_tracing(&config),
            Err(TracingError::ProviderError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_enabled_guard_shutdown() {
        let config = TracingConfig {
            enabled: true,
            service_name: "test-service".into(),
            json: false,
        };
        let guard = init_tracing(&config).unwrap();
        assert!(guard.is_active());
        assert!(guard.sdk_tracer("test").is_some());
        assert!(shutdown_tracing(guard).is_ok());
    }
}
