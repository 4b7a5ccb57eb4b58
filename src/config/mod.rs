//! Configuration module for request-telemetry
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation.
//!
//! # Example
//!
//! ```yaml
//! server:
//!   address: "0.0.0.0:8080"
//! metrics:
//!   enabled: true
//!   port: 9090
//! tracing:
//!   enabled: true
//!   service_name: "${SERVICE_NAME:-orders-api}"
//! telemetry:
//!   enable_resource_tracking: true
//!   system_metrics:
//!     enabled: true
//!     interval_seconds: 15
//! ```

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

lazy_static! {
    static ref ENV_VAR: regex_lite::Regex =
        regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
}

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
pub(crate) fn expand_env_vars(s: &str) -> String {
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in ENV_VAR.captures_iter(s) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let var_name = &cap[1];

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);
    result
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.address.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::ValidationError(format!(
                "Invalid server address '{}': expected host:port",
                self.server.address
            )));
        }

        if let Some(ref tracing) = self.tracing {
            if tracing.enabled && tracing.service_name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "Service name cannot be empty when tracing is enabled".into(),
                ));
            }
        }

        self.telemetry.validate()
    }

    /// Service name reported on telemetry, preferring the tracing section
    pub fn service_name(&self) -> &str {
        self.tracing
            .as_ref()
            .filter(|t| !t.service_name.trim().is_empty())
            .map(|t| t.service_name.as_str())
            .unwrap_or(&self.telemetry.service_name)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_address")]
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_server_address(),
        }
    }
}

fn default_server_address() -> String {
    "0.0.0.0:8080".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

// ============================================================================
// Tracing Configuration
// ============================================================================

/// OpenTelemetry tracing and log output configuration.
///
/// # Example
///
/// ```yaml
/// tracing:
///   enabled: true
///   service_name: "orders-api"
///   json: true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Enable or disable OpenTelemetry spans. Default: false
    #[serde(default)]
    pub enabled: bool,

    /// Service name for trace identification. Default: "request-telemetry"
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Emit logs as JSON lines instead of human-readable text. Default: false
    #[serde(default)]
    pub json: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: default_service_name(),
            json: false,
        }
    }
}

fn default_service_name() -> String {
    "request-telemetry".to_string()
}

// ============================================================================
// Request Telemetry Configuration
// ============================================================================

/// Per-request telemetry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to request telemetry. Default: "request-telemetry"
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Measure memory/CPU consumed per request. Default: true
    #[serde(default = "default_true")]
    pub enable_resource_tracking: bool,

    /// Resolve spans from inbound `traceparent` headers. Default: true
    #[serde(default = "default_true")]
    pub enable_header_extraction: bool,

    /// Start a root span when none can be resolved. Default: true
    #[serde(default = "default_true")]
    pub create_new_if_not_found: bool,

    /// Replace numeric, UUID and ObjectId path segments with placeholders
    /// when deriving the route from a raw URL. Default: true
    #[serde(default = "default_true")]
    pub derive_route_templates: bool,

    /// Mirror log records as span events. Default: false
    #[serde(default)]
    pub auto_add_span_events: bool,

    #[serde(default)]
    pub system_metrics: SystemMetricsConfig,
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "telemetry.service_name cannot be empty".into(),
            ));
        }

        if self.system_metrics.enabled && self.system_metrics.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "telemetry.system_metrics.interval_seconds must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            enable_resource_tracking: true,
            enable_header_extraction: true,
            create_new_if_not_found: true,
            derive_route_templates: true,
            auto_add_span_events: false,
            system_metrics: SystemMetricsConfig::default(),
        }
    }
}

/// Periodic process metrics sampler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetricsConfig {
    /// Default: false
    #[serde(default)]
    pub enabled: bool,

    /// Sampling period. Default: 15
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

impl Default for SystemMetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: default_interval_seconds(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_seconds() -> u64 {
    15
}
