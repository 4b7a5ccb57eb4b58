//! Demo server integration tests
//!
//! Binds the instrumented server on an ephemeral port and talks to it over
//! real HTTP.

use request_telemetry::config::{Config, ServerConfig, TelemetryConfig};
use request_telemetry::lifecycle::RequestTelemetry;
use request_telemetry::metrics::REQUESTS_TOTAL;
use request_telemetry::server::Server;
use request_telemetry::telemetry::memory::InMemoryTelemetry;
use request_telemetry::telemetry::Span;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

struct TestServer {
    addr: SocketAddr,
    recorder: InMemoryTelemetry,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn start() -> Self {
        let recorder = InMemoryTelemetry::new();
        let telemetry = Arc::new(RequestTelemetry::new(
            recorder.provider(),
            TelemetryConfig::default(),
        ));
        let config = Config {
            server: ServerConfig {
                address: "127.0.0.1:0".into(),
            },
            ..Default::default()
        };

        let server = Server::bind(&config, telemetry)
            .await
            .expect("Server should bind");
        let addr = server.local_addr();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = rx.await;
        }));

        Self {
            addr,
            recorder,
            shutdown: Some(tx),
            task,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

#[tokio::test]
async fn test_traced_request_joins_caller_trace() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let response = client
        .get(server.url("/users/42"))
        .header(
            "traceparent",
            format!("00-{TRACE_ID}-00f067aa0ba902b7-01"),
        )
        .send()
        .await
        .expect("Request should succeed");

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("x-trace-id")
            .and_then(|v| v.to_str().ok()),
        Some(TRACE_ID)
    );

    let root = server.recorder.span_named("GET /users/:id").unwrap();
    assert_eq!(root.trace_id(), TRACE_ID);
    assert!(server.recorder.span_named("user_repository.find").is_some());

    let counts = server.recorder.samples(REQUESTS_TOTAL);
    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].label("status_code"), Some("200"));

    server.stop().await;
}

#[tokio::test]
async fn test_downstream_headers_continue_trace() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let outbound: serde_json::Value = client
        .get(server.url("/downstream"))
        .header(
            "traceparent",
            format!("00-{TRACE_ID}-00f067aa0ba902b7-01"),
        )
        .header("x-correlation-id", "corr-7")
        .send()
        .await
        .expect("Request should succeed")
        .json()
        .await
        .expect("Body should be JSON");

    let traceparent = outbound["traceparent"].as_str().unwrap();
    assert!(traceparent.starts_with(&format!("00-{TRACE_ID}-")));
    assert!(!traceparent.contains("00f067aa0ba902b7"));
    assert_eq!(outbound["x-correlation-id"], "corr-7");

    server.stop().await;
}

#[tokio::test]
async fn test_handler_failure_is_500() {
    let server = TestServer::start().await;

    let response = reqwest::get(server.url("/users/0"))
        .await
        .expect("Request should succeed");
    assert_eq!(response.status(), 500);

    let counts = server.recorder.samples(REQUESTS_TOTAL);
    assert_eq!(counts[0].label("status_code"), Some("500"));

    server.stop().await;
}

#[tokio::test]
async fn test_each_request_gets_its_own_trace() {
    let server = TestServer::start().await;

    let first = reqwest::get(server.url("/health")).await.unwrap();
    let second = reqwest::get(server.url("/health")).await.unwrap();
    let trace_of = |r: &reqwest::Response| {
        r.headers()
            .get("x-trace-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    assert!(trace_of(&first).is_some());
    assert_ne!(trace_of(&first), trace_of(&second));

    server.stop().await;
}
