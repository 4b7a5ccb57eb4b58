//! Prometheus Metrics HTTP Server
//!
//! Serves a registry's metrics for Prometheus to scrape.
//!
//! | Path | Response |
//! |------|----------|
//! | `GET /metrics` | Prometheus text exposition |
//! | `GET /health` | `{"status":"ok"}` |
//!
//! # Example
//!
//! ```no_run
//! use request_telemetry::metrics::server::MetricsServer;
//! use prometheus::Registry;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = MetricsServer::builder()
//!         .address("127.0.0.1:9090")
//!         .registry(Registry::new())
//!         .build()?;
//!     let addr = server.start().await?;
//!     println!("Metrics server listening on {}", addr);
//!     Ok(())
//! }
//! ```

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Registry, TextEncoder};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Configuration for the metrics server
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind to (e.g., "127.0.0.1:9090")
    pub address: String,
}

/// Builder for MetricsServer
#[derive(Default)]
pub struct MetricsServerBuilder {
    address: Option<String>,
    registry: Option<Registry>,
}

impl MetricsServerBuilder {
    /// Set the server address
    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    /// Registry to expose; defaults to the process-wide default registry
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build the MetricsServer
    pub fn build(self) -> Result<MetricsServer, MetricsServerError> {
        let address = self
            .address
            .ok_or_else(|| MetricsServerError::ConfigError("Address is required".into()))?;

        let mut server = MetricsServer::new(MetricsServerConfig { address });
        if let Some(registry) = self.registry {
            server.registry = registry;
        }
        Ok(server)
    }
}

/// Metrics server error
#[derive(Debug, thiserror::Error)]
pub enum MetricsServerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Prometheus metrics HTTP server
pub struct MetricsServer {
    config: MetricsServerConfig,
    registry: Registry,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl MetricsServer {
    /// Create a metrics server exposing the default registry
    pub fn new(config: MetricsServerConfig) -> Self {
        Self {
            config,
            registry: prometheus::default_registry().clone(),
            shutdown_tx: None,
            server_handle: None,
        }
    }

    /// Create a builder for MetricsServer
    pub fn builder() -> MetricsServerBuilder {
        MetricsServerBuilder::default()
    }

    /// Start the metrics server
    ///
    /// Returns the actual bound address (useful when using port 0)
    pub async fn start(&mut self) -> Result<SocketAddr, MetricsServerError> {
        let listener = TcpListener::bind(&self.config.address).await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);

        let registry = self.registry.clone();
        let handle = tokio::spawn(async move {
            run_server(listener, registry, shutdown_rx).await;
        });

        self.server_handle = Some(handle);
        info!(address = %addr, "Metrics server listening");

        Ok(addr)
    }

    /// Shutdown the metrics server
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
    }
}

/// Run the HTTP server loop
async fn run_server(
    listener: TcpListener,
    registry: Registry,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Metrics server shutting down");
                break;
            }
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let io = TokioIo::new(stream);
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let registry = registry.clone();
                                async move { handle_request(req, &registry) }
                            });
                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                debug!(error = %e, "Metrics connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept metrics connection");
                        continue;
                    }
                }
            }
        }
    }
}

/// Handle HTTP requests
fn handle_request<B>(
    req: Request<B>,
    registry: &Registry,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => metrics_handler(registry),
        (&Method::GET, "/health") => health_handler(),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// Handle /metrics endpoint
fn metrics_handler(registry: &Registry) -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return text_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    response
}

/// Handle /health endpoint
fn health_handler() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(br#"{"status":"ok"}"#)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_builder_missing_address() {
        let result = MetricsServerBuilder::default().build();
        assert!(matches!(result, Err(MetricsServerError::ConfigError(_))));
    }

    #[test]
    fn test_builder_with_address() {
        let result = MetricsServerBuilder::default()
            .address("127.0.0.1:9090")
            .registry(Registry::new())
            .build();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_registry() {
        let registry = Registry::new();
        let counter = prometheus::IntCounter::new("test_scrapes_total", "Scrapes").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let response = metrics_handler(&registry);
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("test_scrapes_total 1"));
    }

    #[test]
    fn test_unknown_path() {
        let req = Request::builder().uri("/nope").body(()).unwrap();
        let response = handle_request(req, &Registry::new()).unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
