//! Metrics Server Integration Tests
//!
//! Scrapes the Prometheus endpoint after requests have gone through the
//! lifecycle with the Prometheus provider.

use prometheus::Registry;
use request_telemetry::config::TelemetryConfig;
use request_telemetry::lifecycle::{RequestHandle, RequestTelemetry};
use request_telemetry::metrics::server::MetricsServer;
use request_telemetry::propagation::HeaderMap;
use request_telemetry::telemetry::noop::{NoopLoggerFactory, NoopTracer};
use request_telemetry::telemetry::prom::PrometheusMetrics;
use request_telemetry::telemetry::TelemetryProvider;
use std::sync::Arc;
use std::time::Duration;

fn prometheus_telemetry() -> (Registry, RequestTelemetry) {
    let metrics = PrometheusMetrics::new(Registry::new());
    let registry = metrics.registry().clone();
    let provider = TelemetryProvider::new(
        Arc::new(NoopTracer),
        Arc::new(NoopLoggerFactory),
        Arc::new(metrics),
    );
    (registry, RequestTelemetry::new(provider, TelemetryConfig::default()))
}

async fn start(registry: Registry) -> (MetricsServer, String) {
    let mut server = MetricsServer::builder()
        .address("127.0.0.1:0")
        .registry(registry)
        .build()
        .expect("Builder should succeed");
    let addr = server.start().await.expect("Server should start");
    (server, format!("http://{}", addr))
}

#[tokio::test]
async fn test_request_metrics_are_scrapeable() {
    let (registry, telemetry) = prometheus_telemetry();

    for status in [200, 200, 404] {
        let handle = RequestHandle::new();
        telemetry.initialize(&handle, &HeaderMap::new(), "/users/42", "GET");
        telemetry.finalize(&handle, status);
    }

    let (mut server, base) = start(registry).await;
    let client = reqwest::Client::new();
    let response = client
        .get(format!("{}/metrics", base))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .expect("Should connect to metrics server");

    assert!(response.status().is_success());
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.contains("text/plain"));

    let body = response.text().await.unwrap();
    assert!(body.contains(
        r#"http_requests_total{method="GET",route="/users/:id",status_code="200"} 2"#
    ));
    assert!(body.contains(
        r#"http_requests_total{method="GET",route="/users/:id",status_code="404"} 1"#
    ));
    assert!(body.contains("http_request_duration_seconds_bucket"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_methods_collapse_to_other() {
    let (registry, telemetry) = prometheus_telemetry();

    for method in ["PROPFIND", "BREW", "get"] {
        let handle = RequestHandle::new();
        telemetry.initialize(&handle, &HeaderMap::new(), "/", method);
        telemetry.finalize(&handle, 200);
    }

    let (mut server, base) = start(registry).await;
    let body = reqwest::get(format!("{}/metrics", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.contains(r#"method="OTHER""#));
    assert!(body.contains(r#"method="GET""#));
    assert!(!body.contains("PROPFIND"));

    server.shutdown().await;
}

#[tokio::test]
async fn test_health_and_not_found() {
    let (mut server, base) = start(Registry::new()).await;

    let health = reqwest::get(format!("{}/health", base)).await.unwrap();
    assert_eq!(health.status(), 200);

    let missing = reqwest::get(format!("{}/nope", base)).await.unwrap();
    assert_eq!(missing.status(), 404);

    server.shutdown().await;
}

#[tokio::test]
async fn test_builder_requires_address() {
    assert!(MetricsServer::builder().build().is_err());
}
