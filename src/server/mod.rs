//! Demo HTTP server
//!
//! A small hyper service wired through [`crate::middleware::instrument`] to
//! show the request lifecycle end to end.
//!
//! | Route | Behavior |
//! |-------|----------|
//! | `GET /health` | `ok` |
//! | `GET /users/{id}` | API and data layer child spans, JSON user |
//! | `GET /downstream` | Headers a downstream call would carry |
//!
//! `GET /users/0` simulates a repository failure: the error is recorded on
//! the data-layer span and the request completes with 500.

use crate::config::Config;
use crate::lifecycle::{RequestHandle, RequestTelemetry};
use crate::middleware::{instrument, request_handle};
use crate::telemetry::{Attribute, Layer};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),
}

/// Failures raised by route handlers
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("User repository unavailable")]
    RepositoryUnavailable,
}

type Body = Full<Bytes>;

/// Demo HTTP server
pub struct Server {
    telemetry: Arc<RequestTelemetry>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind to the configured address
    ///
    /// Port 0 lets the OS pick a port; see [`Server::local_addr`].
    pub async fn bind(config: &Config, telemetry: Arc<RequestTelemetry>) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .server
            .address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            telemetry,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves
    pub async fn run_until<S>(self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        info!("Starting server on {}", self.local_addr);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down server");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let telemetry = Arc::clone(&self.telemetry);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let telemetry = Arc::clone(&telemetry);
                    async move { Ok::<_, Infallible>(handle_request(req, telemetry).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

/// Instrumented entry point for every request
async fn handle_request(req: Request<Incoming>, telemetry: Arc<RequestTelemetry>) -> Response<Body> {
    let inner = Arc::clone(&telemetry);
    let result = instrument(telemetry, req, move |req| route(req, inner)).await;

    result.unwrap_or_else(|e| {
        error!("Request failed: {}", e);
        text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    })
}

async fn route<B>(
    req: Request<B>,
    telemetry: Arc<RequestTelemetry>,
) -> Result<Response<Body>, HandlerError> {
    let Some(handle) = request_handle(&req) else {
        return Ok(text(StatusCode::INTERNAL_SERVER_ERROR, "missing telemetry"));
    };
    let path = req.uri().path().to_string();
    let url = req.uri().to_string();

    let response = match (req.method(), path.as_str()) {
        (&Method::GET, "/health") => {
            telemetry.update_route_info(&handle, "GET", "/health", &url);
            text(StatusCode::OK, "ok")
        }
        (&Method::GET, "/downstream") => {
            telemetry.update_route_info(&handle, "GET", "/downstream", &url);
            let outbound = telemetry.outbound_headers(&handle);
            json(
                StatusCode::OK,
                serde_json::to_value(&outbound).unwrap_or_default(),
            )
        }
        (&Method::GET, p) if p.starts_with("/users/") => {
            telemetry.update_route_info(&handle, "GET", "/users/:id", &url);
            get_user(&telemetry, &handle, &p["/users/".len()..])?
        }
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(with_request_id(response, &handle))
}

fn get_user(
    telemetry: &RequestTelemetry,
    handle: &RequestHandle,
    raw_id: &str,
) -> Result<Response<Body>, HandlerError> {
    let api = telemetry.create_child_span(handle, "users.get", Layer::Api);
    let Ok(id) = raw_id.parse::<u64>() else {
        api.logger()
            .warn("invalid user id", &[Attribute::new("user.id", raw_id)]);
        return Ok(text(StatusCode::BAD_REQUEST, "invalid user id"));
    };
    telemetry.set_user_id(handle, raw_id);

    let data = telemetry.create_child_span(handle, "user_repository.find", Layer::Data);
    data.span().set("db.operation", "select");
    if id == 0 {
        let error = HandlerError::RepositoryUnavailable;
        telemetry.record_exception(handle, &error);
        return Err(error);
    }
    data.logger()
        .debug("user loaded", &[Attribute::new("user.id", id)]);
    data.finish();

    api.logger().info("user returned", &[]);
    Ok(json(
        StatusCode::OK,
        serde_json::json!({ "id": id, "name": format!("user-{}", id) }),
    ))
}

fn with_request_id(mut response: Response<Body>, handle: &RequestHandle) -> Response<Body> {
    if let Some(request) = handle.request_context() {
        if let Ok(value) = HeaderValue::from_str(&request.request_id) {
            response.headers_mut().insert("x-request-id", value);
        }
    }
    if let Some(context) = handle.trace_context() {
        if let Ok(value) = HeaderValue::from_str(&context.trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
    }
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn json(status: StatusCode, value: serde_json::Value) -> Response<Body> {
    let mut response = Response::new(Full::new(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, TelemetryConfig};
    use crate::telemetry::memory::InMemoryTelemetry;
    use crate::telemetry::Span;
    use http_body_util::BodyExt;

    fn telemetry() -> (InMemoryTelemetry, Arc<RequestTelemetry>) {
        let recorder = InMemoryTelemetry::new();
        let telemetry = Arc::new(RequestTelemetry::new(
            recorder.provider(),
            TelemetryConfig::default(),
        ));
        (recorder, telemetry)
    }

    async fn call(telemetry: Arc<RequestTelemetry>, uri: &str) -> Response<Body> {
        let req = Request::builder().uri(uri).body(()).unwrap();
        let inner = Arc::clone(&telemetry);
        instrument(telemetry, req, move |req| route(req, inner))
            .await
            .unwrap_or_else(|_| text(StatusCode::INTERNAL_SERVER_ERROR, "error"))
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        let (_recorder, telemetry) = telemetry();
        let config = Config {
            server: ServerConfig {
                address: "invalid".into(),
            },
            ..Default::default()
        };
        assert!(matches!(
            Server::bind(&config, telemetry).await,
            Err(ServerError::BindError(_))
        ));
    }

    #[tokio::test]
    async fn test_get_user_creates_layered_spans() {
        let (recorder, telemetry) = telemetry();
        let response = call(telemetry, "/users/42").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let user: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(user["id"], 42);

        let api = recorder.span_named("users.get").unwrap();
        let data = recorder.span_named("user_repository.find").unwrap();
        assert_eq!(data.parent_span_id, Some(api.span_id()));
        assert!(api.is_ended() && data.is_ended());
    }

    #[tokio::test]
    async fn test_repository_failure_is_500() {
        let (recorder, telemetry) = telemetry();
        let response = call(telemetry, "/users/0").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let data = recorder.span_named("user_repository.find").unwrap();
        assert_eq!(
            data.exceptions(),
            vec!["User repository unavailable".to_string()]
        );
        let counts = recorder.samples(crate::metrics::REQUESTS_TOTAL);
        assert_eq!(counts[0].label("status_code"), Some("500"));
        assert_eq!(counts[0].label("route"), Some("/users/:id"));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (_recorder, telemetry) = telemetry();
        let response = call(telemetry, "/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
