//! Tick Relay Binary
//!
//! Starts the price tick relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin tick-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Upstream
//! - `FINNHUB_API_KEY`: Finnhub API key (without it the relay retries in degraded mode)
//! - `FINNHUB_WS_URL`: Stream endpoint (default: <wss://ws.finnhub.io>)
//!
//! ## Relay
//! - `TICK_RELAY_SYMBOLS`: Comma-separated symbols (default: three Binance ETH pairs)
//! - `TICK_RELAY_DATA_DIR`: Directory for `hourly-averages.json` (default: data)
//! - `TICK_RELAY_AVERAGE_PERIOD_SECS`: Average period (default: 3600)
//! - `TICK_RELAY_ALIGN_TO_WALL_CLOCK`: Fire on period boundaries (default: true)
//! - `TICK_RELAY_RECONNECT_DELAY_MS`: Reconnect backoff (default: 5000)
//! - `TICK_RELAY_RECONNECT_JITTER`: Backoff jitter fraction (default: 0)
//! - `TICK_RELAY_MIN_EMIT_INTERVAL_MS`: Per-symbol throttle (default: 1000)
//! - `TICK_RELAY_SUBSCRIBER_QUEUE_CAPACITY`: Per-subscriber queue (default: 256)
//! - `TICK_RELAY_EVENT_CHANNEL_CAPACITY`: Client → ingestion channel (default: 1024)
//! - `TICK_RELAY_HTTP_PORT`: Subscriber WebSocket and health port (default: 3001)
//!
//! ## Telemetry
//! - `OTEL_ENABLED`: Export traces over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: tick-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tick_relay::infrastructure::telemetry;
use tick_relay::{
    BroadcastConfig, ConnectionMonitor, CoreService, HttpServer, JsonFileStore, RecurringSchedule,
    RelayConfig, StreamClient, StreamClientConfig, StreamEvent, TungsteniteConnector, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting tick relay");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store = Arc::new(JsonFileStore::new(config.averages.averages_path()));
    let monitor = Arc::new(ConnectionMonitor::new());
    let service = Arc::new(CoreService::new(
        config.symbols.clone(),
        store,
        Arc::clone(&monitor),
        BroadcastConfig::from(&config.broadcast),
    ));

    let (event_tx, event_rx) =
        mpsc::channel::<StreamEvent>(config.upstream.event_channel_capacity);
    let stream_client = Arc::new(StreamClient::new(
        StreamClientConfig::from_relay_config(&config),
        Arc::new(TungsteniteConnector::new()),
        monitor,
        event_tx,
        shutdown_token.clone(),
    ));

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Ingestion
    let ingest_service = Arc::clone(&service);
    let ingest_cancel = shutdown_token.clone();
    tasks.push(tokio::spawn(async move {
        ingest_service.run_ingestion(event_rx, ingest_cancel).await;
    }));

    // Average schedule
    let schedule_service = Arc::clone(&service);
    let schedule_cancel = shutdown_token.clone();
    let schedule = RecurringSchedule::new(
        config.averages.period,
        config.averages.align_to_wall_clock,
    );
    tasks.push(tokio::spawn(async move {
        schedule_service
            .run_average_schedule(schedule, schedule_cancel)
            .await;
    }));

    // Upstream client
    tasks.push(tokio::spawn(stream_client.run()));

    // HTTP server
    let http_server = HttpServer::new(
        config.server.http_port,
        Arc::clone(&service),
        shutdown_token.clone(),
    );
    let http_shutdown = shutdown_token.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
            http_shutdown.cancel();
        }
    }));

    tracing::info!("Tick relay ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, futures_util::future::join_all(tasks))
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out with tasks still running"
        );
    }

    tracing::info!("Tick relay stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        symbols = ?config.symbols.as_slice(),
        http_port = config.server.http_port,
        data_dir = %config.averages.data_dir.display(),
        average_period_secs = config.averages.period.as_secs(),
        credentials = config.upstream.credentials.is_some(),
        "Configuration loaded"
    );
    tracing::debug!(
        stream_url = %config.upstream.url,
        reconnect_delay_ms = config.upstream.reconnect_delay.as_millis(),
        min_emit_interval_ms = config.broadcast.min_emit_interval.as_millis(),
        "Relay tuning"
    );
}

/// Wait for shutdown signal (SIGTERM, SIGINT, or an internal cancel).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => {
            tracing::info!("Internal shutdown requested");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
