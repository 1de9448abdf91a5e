//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint reporting user stream state, tracked order and balance
//! counts, and Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - JSON health status
//! - `GET /healthz` - liveness probe (simple OK)
//! - `GET /readyz` - readiness probe (user stream open)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{BalanceStorePort, OrderTrackerPort};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::stream::{ConnectionState, StreamMonitor};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Connector version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// User stream status.
    pub stream: StreamStatus,
    /// Orders not yet terminal.
    pub open_orders: usize,
    /// Assets in the balance table.
    pub balance_assets: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// User stream open.
    Healthy,
    /// User stream reconnecting; REST still usable.
    Degraded,
    /// User stream stopped.
    Unhealthy,
}

/// User stream status.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    /// Connection state.
    pub state: ConnectionState,
    /// Connection attempts so far.
    pub connections: u64,
    /// Reason of the last interruption.
    pub last_interruption: Option<String>,
    /// Traffic ages of the current connection.
    pub traffic: Option<String>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    monitor: Arc<StreamMonitor>,
    tracker: Arc<dyn OrderTrackerPort>,
    balances: Arc<dyn BalanceStorePort>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        monitor: Arc<StreamMonitor>,
        tracker: Arc<dyn OrderTrackerPort>,
        balances: Arc<dyn BalanceStorePort>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            monitor,
            tracker,
            balances,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::Bind` when the port is taken and
    /// `HealthServerError::Serve` when the listener fails afterwards.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let port = self.port;
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|source| HealthServerError::Bind { port, source })?;
        tracing::info!(port, "Health endpoint up");

        let shutdown = self.cancel.clone();
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!(port, "Health endpoint down");
        Ok(())
    }
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> Response {
    let report = build_health_response(&state);
    let code = if report.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (code, Json(report)).into_response()
}

async fn liveness_handler() -> &'static str {
    "OK"
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> Response {
    match state.monitor.state() {
        ConnectionState::Open => (StatusCode::OK, "READY").into_response(),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "NOT READY").into_response(),
    }
}

async fn metrics_handler() -> Response {
    let Some(handle) = get_metrics_handle() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        handle.render(),
    )
        .into_response()
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stream_state = state.monitor.state();
    HealthResponse {
        status: determine_health_status(stream_state),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        stream: StreamStatus {
            state: stream_state,
            connections: state.monitor.connections(),
            last_interruption: state.monitor.last_interruption(),
            traffic: state.monitor.health().map(|health| health.summary()),
        },
        open_orders: state.tracker.open_orders().len(),
        balance_assets: state.balances.snapshot().len(),
    }
}

const fn determine_health_status(state: ConnectionState) -> HealthStatus {
    match state {
        ConnectionState::Open => HealthStatus::Healthy,
        ConnectionState::Connecting | ConnectionState::Interrupted => HealthStatus::Degraded,
        ConnectionState::Closing | ConnectionState::Closed => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health endpoint failure.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The listening port could not be bound.
    #[error("cannot bind health port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Bind error.
        source: std::io::Error,
    },

    /// The HTTP listener failed while serving.
    #[error("health endpoint failed: {0}")]
    Serve(#[from] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::balance::BalanceRecord;
    use crate::infrastructure::persistence::{InMemoryBalanceStore, InMemoryOrderTracker};
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use test_case::test_case;
    use tower::ServiceExt;

    fn state() -> Arc<HealthServerState> {
        let balances = Arc::new(InMemoryBalanceStore::new());
        balances.patch(BalanceRecord::new("USDT", dec!(10), dec!(10)));
        Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            Arc::new(StreamMonitor::new()),
            Arc::new(InMemoryOrderTracker::new()),
            balances,
        ))
    }

    async fn get(path: &str) -> (StatusCode, String) {
        let response = router(state())
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(serde_json::to_string(&HealthStatus::Healthy).unwrap(), "\"healthy\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Unhealthy).unwrap(), "\"unhealthy\"");
    }

    #[test_case(ConnectionState::Open, HealthStatus::Healthy ; "open")]
    #[test_case(ConnectionState::Connecting, HealthStatus::Degraded ; "connecting")]
    #[test_case(ConnectionState::Interrupted, HealthStatus::Degraded ; "interrupted")]
    #[test_case(ConnectionState::Closed, HealthStatus::Unhealthy ; "closed")]
    fn status_follows_stream_state(state: ConnectionState, expected: HealthStatus) {
        assert_eq!(determine_health_status(state), expected);
    }

    #[tokio::test]
    async fn health_reports_closed_stream_as_unavailable() {
        let (status, body) = get("/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["stream"]["state"], "closed");
        assert_eq!(json["open_orders"], 0);
        assert_eq!(json["balance_assets"], 1);
    }

    #[tokio::test]
    async fn probes_respond() {
        assert_eq!(get("/healthz").await, (StatusCode::OK, "OK".to_string()));
        assert_eq!(
            get("/readyz").await,
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY".to_string())
        );
    }
}
