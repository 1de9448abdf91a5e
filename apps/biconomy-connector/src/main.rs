//! Biconomy Connector Binary
//!
//! Runs the reconciliation core against the venue: user stream supervision,
//! push event ingestion, periodic balance and order status polls, and a
//! cancel-all of open orders on shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin biconomy-connector
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `BICONOMY_API_KEY`: API key
//! - `BICONOMY_API_SECRET`: API secret
//!
//! ## Optional
//! - `BICONOMY_DOMAIN`: REST host domain (default: vip)
//! - `BICONOMY_TRADING_PAIRS`: comma-separated `BASE-QUOTE` list
//! - `BICONOMY_WS_URL`: user stream URL
//! - `BICONOMY_PING_INTERVAL_SECS`: client probe interval (default: 10)
//! - `BICONOMY_STALE_AFTER_SECS`: inbound silence tolerated (default: 45)
//! - `BICONOMY_CANCEL_TIMEOUT_SECS`: cancel-all timeout on shutdown (default: 10)
//! - `BICONOMY_POLL_INTERVAL_SECS`: balance and status poll interval (default: 10)
//! - `HEALTH_PORT`: health check HTTP port (default: 8083)
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `RUST_LOG`: log filter (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use biconomy_connector::application::ports::BalanceStorePort;
use biconomy_connector::infrastructure::health::{HealthServer, HealthServerState};
use biconomy_connector::infrastructure::telemetry;
use biconomy_connector::{
    BiconomyRestClient, CancelOutcome, ConnectorSettings, InMemoryBalanceStore,
    InMemoryOrderTracker, RequestSigner, UserStreamSupervisor, VenueConnector,
    WebSocketConnector, init_metrics,
};
use serde_json::Value;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Connector = VenueConnector<BiconomyRestClient, InMemoryOrderTracker, InMemoryBalanceStore>;

/// Timeout of a single REST request.
const REST_TIMEOUT: Duration = Duration::from_secs(10);

/// Time allowed for background tasks to stop after cancellation.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Biconomy connector");

    init_metrics().context("failed to install Prometheus recorder")?;

    let settings = ConnectorSettings::from_env()?;
    log_settings(&settings);

    let shutdown_token = CancellationToken::new();

    let signer = RequestSigner::new(settings.credentials.clone());
    let rest = Arc::new(BiconomyRestClient::new(
        settings.rest_base_url(),
        signer.clone(),
        REST_TIMEOUT,
    )?);
    let tracker = Arc::new(InMemoryOrderTracker::new());
    let balances = Arc::new(InMemoryBalanceStore::new());
    let connector = Arc::new(VenueConnector::new(
        rest,
        Arc::clone(&tracker),
        Arc::clone(&balances),
        settings.connector_config(),
    ));

    // User stream
    let (event_tx, event_rx) = mpsc::channel::<Value>(1024);
    let supervisor = Arc::new(UserStreamSupervisor::new(
        Arc::new(WebSocketConnector::new()),
        signer,
        settings.supervisor_config(),
        event_tx,
        shutdown_token.clone(),
    ));

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        supervisor.monitor(),
        tracker,
        balances,
    ));
    let health_server = HealthServer::new(settings.health_port, health_state, shutdown_token.clone());

    let ingest_connector = Arc::clone(&connector);
    let ingest_handle = tokio::spawn(async move {
        consume_events(event_rx, ingest_connector).await;
    });

    let stream_handle = tokio::spawn(async move {
        if let Err(e) = supervisor.run().await {
            tracing::error!(error = %e, "User stream supervisor error");
        }
    });

    let poll_connector = Arc::clone(&connector);
    let poll_cancel = shutdown_token.clone();
    let poll_interval = settings.poll_interval;
    let poll_handle = tokio::spawn(async move {
        poll_loop(poll_connector, poll_interval, poll_cancel).await;
    });

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Biconomy connector ready");

    await_shutdown().await;

    // Open orders are canceled while REST and the stream are still up.
    cancel_open_orders(&connector, settings.cancel.timeout).await;
    shutdown_token.cancel();

    let stopped = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        let _ = stream_handle.await;
        let _ = poll_handle.await;
        let _ = ingest_handle.await;
    })
    .await;
    if stopped.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Background tasks did not stop in time"
        );
    }

    tracing::info!("Biconomy connector stopped");
    Ok(())
}

/// Apply user stream events in receipt order.
async fn consume_events(mut rx: mpsc::Receiver<Value>, connector: Arc<Connector>) {
    while let Some(event) = rx.recv().await {
        connector.apply_push_message(&event);
    }
    tracing::debug!("User stream event channel closed");
}

/// Refresh balances and poll open orders until cancelled.
async fn poll_loop(connector: Arc<Connector>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = connector.refresh_balances().await {
                    tracing::warn!(error = %e, "Balance refresh failed");
                }
                connector.poll_open_orders().await;
                tracing::debug!(
                    assets = connector.balance_store().snapshot().len(),
                    "Poll cycle complete"
                );
            }
        }
    }
}

async fn cancel_open_orders(connector: &Connector, timeout: Duration) {
    let report = connector.cancel_all(timeout).await;
    if report.is_empty() {
        return;
    }
    for (order, outcome) in report.iter() {
        match outcome {
            CancelOutcome::Canceled => tracing::info!(%order, "Order canceled"),
            CancelOutcome::Failed { reason } => {
                tracing::warn!(%order, %reason, "Order not confirmed canceled");
            }
        }
    }
    tracing::info!(
        canceled = report.successes().count(),
        failed = report.failures().count(),
        "Cancel-all finished"
    );
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }
    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

fn log_settings(settings: &ConnectorSettings) {
    tracing::info!(
        domain = %settings.domain,
        trading_pairs = settings.trading_pairs.len(),
        health_port = settings.health_port,
        poll_interval_secs = settings.poll_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        rest_base_url = %settings.rest_base_url(),
        stream_url = %settings.stream.url,
        ping_interval_secs = settings.stream.ping_interval.as_secs(),
        "Venue endpoints"
    );
}

/// Wait for SIGINT or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
    }
}
