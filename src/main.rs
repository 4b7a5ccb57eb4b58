//! Request Telemetry - demo service
//!
//! Serves a few routes through the request telemetry middleware and exposes
//! Prometheus metrics on a separate port.

use clap::Parser;
use request_telemetry::config::Config;
use request_telemetry::lifecycle::RequestTelemetry;
use request_telemetry::metrics::server::MetricsServer;
use request_telemetry::metrics::system::SystemMetricsSampler;
use request_telemetry::server::Server;
use request_telemetry::telemetry::log::TracingLoggerFactory;
use request_telemetry::telemetry::noop::NoopTracer;
use request_telemetry::telemetry::otel::OtelTracer;
use request_telemetry::telemetry::prom::PrometheusMetrics;
use request_telemetry::telemetry::{TelemetryProvider, Tracer};
use request_telemetry::tracing::{init_subscriber, shutdown_tracing};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Request Telemetry - request-scoped tracing demo service
#[derive(Parser, Debug)]
#[command(name = "request-telemetry")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level used when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Missing file means defaults; a broken file is an error
    let config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        Config::default()
    };

    let tracing_config = config.tracing.clone().unwrap_or_default();
    let guard = init_subscriber(&tracing_config, &args.log_level.to_lowercase())?;

    info!("Starting Request Telemetry v{}", request_telemetry::VERSION);
    info!("Using configuration from {:?}", args.config);

    let tracer: Arc<dyn Tracer> = if tracing_config.enabled {
        Arc::new(OtelTracer::new(config.service_name().to_string()))
    } else {
        Arc::new(NoopTracer)
    };
    let metrics = PrometheusMetrics::new(prometheus::Registry::new());
    let registry = metrics.registry().clone();
    let metrics = Arc::new(metrics);

    let provider = TelemetryProvider::new(tracer, Arc::new(TracingLoggerFactory), metrics.clone());
    let telemetry = Arc::new(RequestTelemetry::new(provider, config.telemetry.clone()));

    let mut metrics_server = None;
    if config.metrics.enabled {
        let mut server = MetricsServer::builder()
            .address(&format!("0.0.0.0:{}", config.metrics.port))
            .registry(registry)
            .build()?;
        server.start().await?;
        metrics_server = Some(server);
    }

    let system_config = &config.telemetry.system_metrics;
    let sampler = system_config.enabled.then(|| {
        let sampler = SystemMetricsSampler::new(
            metrics.as_ref(),
            Duration::from_secs(system_config.interval_seconds),
        );
        sampler.start();
        sampler
    });

    let server = Server::bind(&config, telemetry).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await;

    if let Some(sampler) = sampler {
        sampler.stop();
    }
    if let Some(mut server) = metrics_server {
        server.shutdown().await;
    }
    shutdown_tracing(guard)?;

    Ok(())
}
