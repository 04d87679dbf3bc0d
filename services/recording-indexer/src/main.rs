use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use recording_indexer::api::{start_api_server, AppState};
use recording_indexer::config::ServiceConfig;
use recording_indexer::{
    Config, KeyParser, PgCatalog, S3Bucket, ScanScheduler, Scanner, SegmentCatalog,
    SegmentIndexer,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Time allowed for tasks to stop after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service);

    info!(
        service = %config.service.name,
        bucket = %config.s3.bucket,
        interval_secs = config.scan.interval_secs,
        segment_secs = config.segments.duration_secs,
        timezone = %config.segments.timezone,
        "Starting recording indexer"
    );

    if config.service.metrics_enabled {
        init_metrics(&config.service)?;
    }

    let catalog: Arc<dyn SegmentCatalog> = Arc::new(
        PgCatalog::new(&config.database)
            .await
            .context("Failed to initialize catalog")?,
    );

    let bucket = Arc::new(
        S3Bucket::new(&config.s3)
            .await
            .context("Failed to initialize S3 client")?,
    );

    if config.s3.create_bucket_if_missing {
        bucket
            .ensure_bucket()
            .await
            .with_context(|| format!("Failed to ensure bucket {}", config.s3.bucket))?;
    }

    let parser = KeyParser::new(config.segment_duration(), config.segments.timezone)?;
    let indexer = Arc::new(SegmentIndexer::new(
        parser,
        catalog,
        config.upsert_timeout(),
    ));

    let scanner = Arc::new(Scanner::new(
        config.s3.bucket.clone(),
        bucket,
        indexer.clone(),
        config.page_timeout(),
        config.scan.unrecognized_log_limit,
    ));
    let scheduler = ScanScheduler::new(scanner, config.scan_interval());

    let shutdown = CancellationToken::new();

    // Spawn scan scheduler task
    let scheduler_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    // Spawn push ingest API task
    let api_handle = {
        let shutdown = shutdown.clone();
        let api_config = config.api.clone();
        let state = AppState { indexer };
        tokio::spawn(async move {
            if let Err(e) = start_api_server(state, &api_config, shutdown).await {
                error!(error = %e, "API server error");
            }
        })
    };

    info!("Recording indexer started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down recording indexer");
    shutdown.cancel();

    let stopped = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        join_task("scan-scheduler", scheduler_handle).await;
        join_task("push-api", api_handle).await;
    })
    .await;

    if stopped.is_err() {
        warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Tasks did not stop in time"
        );
    }

    info!("Recording indexer stopped");

    Ok(())
}

/// JSON logs, one flat object per event. `RUST_LOG` overrides the
/// configured level; an unparsable level falls back to `info`.
fn init_tracing(service: &ServiceConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&service.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();
}

/// Serve Prometheus metrics, labelled with the service name
fn init_metrics(service: &ServiceConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], service.metrics_port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", service.name.clone())
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(address = %addr, "Metrics endpoint listening");

    Ok(())
}

/// Wait for a spawned task; a panic or cancellation is logged, not dropped
async fn join_task(name: &'static str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) if e.is_panic() => {
            error!(task = name, error = %e, "Task panicked");
            false
        }
        Err(e) => {
            error!(task = name, error = %e, "Task was cancelled");
            false
        }
    }
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
