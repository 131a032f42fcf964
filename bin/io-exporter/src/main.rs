//! io-exporter - direct I/O liveness probe for Prometheus
//!
//! Periodically writes a block to the target file, reads it back and serves
//! the results on `/metrics`.

mod settings;

use anyhow::Result;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use clap::{CommandFactory, Parser};
use io_exporter_metrics::{PrometheusExporter, ProbeMetrics};
use io_exporter_probe::{ProbeEngine, ProbeScheduler};
use settings::{Args, Settings};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const METRICS_PREFIX: &str = "io_exporter";

/// How long shutdown waits for blocking work before leaving it behind
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        println!("This is io-exporter version {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = match args.into_settings() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}\n");
            let _ = Args::command().print_help();
            std::process::exit(1);
        }
    };

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run(settings));

    // Probes abandoned at their deadline may still be stuck in the kernel.
    shutdown_runtime(runtime);

    if let Err(e) = &result {
        error!("Metrics server error: {}", e);
    } else {
        info!("io-exporter shut down gracefully");
    }
    result
}

/// Stop the runtime without joining abandoned blocking tasks
fn shutdown_runtime(runtime: Runtime) {
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
}

async fn run(settings: Settings) -> Result<()> {
    let probe = &settings.probe;
    let labels: Vec<String> = probe
        .labels
        .iter()
        .map(|l| format!("{}={}", l.name, l.value))
        .collect();
    info!("Starting io-exporter {}", env!("CARGO_PKG_VERSION"));
    info!(file = %probe.target.display(), labels = %labels.join(","), "Test setup");
    info!(
        read = probe.mode.reads(),
        write = probe.mode.writes(),
        timeout = ?probe.timeout,
        sleeptime = ?probe.interval,
        "Measuring"
    );

    let metrics = Arc::new(ProbeMetrics::new(probe.mode));
    let exporter = PrometheusExporter::new(
        METRICS_PREFIX,
        probe,
        chrono::Utc::now().timestamp_millis(),
    )
    .with_internals(settings.internals);

    let scheduler = ProbeScheduler::new(
        probe.clone(),
        ProbeEngine::direct(),
        Arc::clone(&metrics),
    )?;
    let probe_handle = tokio::spawn(scheduler.run());

    let state = Arc::new(MetricsState { metrics, exporter });
    let result = start_metrics_server(&settings, state).await;

    probe_handle.abort();
    result
}

/// Shared state for the HTTP handlers
struct MetricsState {
    metrics: Arc<ProbeMetrics>,
    exporter: PrometheusExporter,
}

/// Metrics HTTP handler
async fn metrics_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.exporter.export(&state.metrics),
    )
}

/// Health check handler: OK once the latest cycle fully succeeded
async fn health_handler(State(state): State<Arc<MetricsState>>) -> impl IntoResponse {
    if state.metrics.healthy() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "UNHEALTHY")
    }
}

fn router(state: Arc<MetricsState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve `/metrics` and `/health` until ctrl-c
async fn start_metrics_server(settings: &Settings, state: Arc<MetricsState>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics available at http://{}/metrics", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    Ok(())
}
