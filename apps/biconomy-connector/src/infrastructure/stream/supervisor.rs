//! User Stream Supervisor
//!
//! Owns the authenticated user stream. Each physical connection walks
//! `Connecting → Open → (Closing | Interrupted) → Closed`:
//!
//! 1. connect, log in (`server.sign`) and subscribe to orders and assets
//! 2. while open, forward push events to the ingest channel, answer venue
//!    probes in the same turn and send client probes on the liveness timer
//! 3. on any failure, stop the liveness loop and wait for it, close the
//!    socket, log the connection's health summary, then back off and
//!    reconnect
//!
//! Message ids keep incrementing across connections.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::health::ConnectionHealth;
use super::liveness::{LivenessConfig, LivenessEvent, LivenessLoop};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{DuplexConnector, FrameSink, FrameSource, StreamError};
use crate::infrastructure::biconomy::{
    InboundFrame, RequestSigner, StreamRequest, check_auth_reply, classify_frame,
};
use crate::infrastructure::biconomy::constants::{WS_URL, ws_headers};
use crate::infrastructure::metrics;

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle of the current physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Connecting, authenticating or subscribing.
    Connecting,
    /// Authenticated and subscribed.
    Open,
    /// Shutting down on request.
    Closing,
    /// Torn down after a failure; a reconnect follows.
    Interrupted,
    /// No connection and none pending.
    Closed,
}

#[derive(Debug)]
struct MonitorState {
    state: ConnectionState,
    connections: u64,
    health: Option<Arc<ConnectionHealth>>,
    last_interruption: Option<String>,
}

/// Read-only view of the supervisor for health checks and tests.
#[derive(Debug)]
pub struct StreamMonitor {
    inner: RwLock<MonitorState>,
}

impl Default for StreamMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamMonitor {
    /// Monitor with no connection yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: RwLock::new(MonitorState {
                state: ConnectionState::Closed,
                connections: 0,
                health: None,
                last_interruption: None,
            }),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.read().state
    }

    /// Whether the stream is authenticated and subscribed.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Connection attempts so far.
    #[must_use]
    pub fn connections(&self) -> u64 {
        self.inner.read().connections
    }

    /// Health record of the current (or last) connection.
    #[must_use]
    pub fn health(&self) -> Option<Arc<ConnectionHealth>> {
        self.inner.read().health.clone()
    }

    /// Reason of the most recent interruption.
    #[must_use]
    pub fn last_interruption(&self) -> Option<String> {
        self.inner.read().last_interruption.clone()
    }

    fn begin_connection(&self) -> Arc<ConnectionHealth> {
        let health = Arc::new(ConnectionHealth::new());
        let mut inner = self.inner.write();
        inner.state = ConnectionState::Connecting;
        inner.connections += 1;
        inner.health = Some(Arc::clone(&health));
        health
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.write().state = state;
    }

    fn interrupted(&self, reason: &StreamError) {
        let mut inner = self.inner.write();
        inner.state = ConnectionState::Interrupted;
        inner.last_interruption = Some(reason.to_string());
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Stream endpoint.
    pub url: String,
    /// Headers sent with the upgrade request.
    pub headers: Vec<(String, String)>,
    /// Probe cadence and staleness.
    pub liveness: LivenessConfig,
    /// Backoff between connections.
    pub reconnect: ReconnectConfig,
    /// Time allowed for the login reply.
    pub auth_timeout: Duration,
    /// Assets for the balance subscription.
    pub assets: Vec<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            url: WS_URL.to_string(),
            headers: ws_headers(),
            liveness: LivenessConfig::default(),
            reconnect: ReconnectConfig::default(),
            auth_timeout: Duration::from_secs(10),
            assets: Vec::new(),
        }
    }
}

/// Supervisor failure.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// Reconnect attempts exhausted.
    #[error("user stream gave up after {0} reconnect attempts")]
    MaxReconnectAttemptsExceeded(u32),
}

const fn interruption_reason(err: &StreamError) -> &'static str {
    match err {
        StreamError::Connect(_) => "connect",
        StreamError::Send(_) => "send",
        StreamError::Receive(_) => "receive",
        StreamError::Closed => "closed",
        StreamError::AuthRejected(_) => "auth_rejected",
        StreamError::AuthTimeout => "auth_timeout",
        StreamError::Stale(_) => "stale",
    }
}

// =============================================================================
// Supervisor
// =============================================================================

/// Keeps one authenticated user stream alive and forwards its events.
pub struct UserStreamSupervisor<C: DuplexConnector> {
    connector: Arc<C>,
    signer: RequestSigner,
    config: SupervisorConfig,
    monitor: Arc<StreamMonitor>,
    event_tx: mpsc::Sender<Value>,
    cancel: CancellationToken,
    message_id: AtomicU64,
}

impl<C: DuplexConnector> UserStreamSupervisor<C> {
    /// Create a supervisor; push events are sent to `event_tx`.
    #[must_use]
    pub fn new(
        connector: Arc<C>,
        signer: RequestSigner,
        config: SupervisorConfig,
        event_tx: mpsc::Sender<Value>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            signer,
            config,
            monitor: Arc::new(StreamMonitor::new()),
            event_tx,
            cancel,
            message_id: AtomicU64::new(0),
        }
    }

    /// Shared view of the connection state.
    #[must_use]
    pub fn monitor(&self) -> Arc<StreamMonitor> {
        Arc::clone(&self.monitor)
    }

    /// Run connections until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError` once the reconnect policy gives up.
    pub async fn run(self: Arc<Self>) -> Result<(), SupervisorError> {
        let mut policy = ReconnectPolicy::new(self.config.reconnect.clone());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.run_connection(&mut policy).await {
                Ok(()) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "User stream interrupted");
                    metrics::record_stream_interruption(interruption_reason(&e));

                    let Some(delay) = policy.next_delay() else {
                        self.monitor.set_state(ConnectionState::Closed);
                        return Err(SupervisorError::MaxReconnectAttemptsExceeded(
                            policy.attempts(),
                        ));
                    };
                    metrics::record_reconnect();
                    tracing::info!(
                        attempt = policy.attempts(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting user stream"
                    );
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.monitor.set_state(ConnectionState::Closed);
        tracing::info!("User stream supervisor stopped");
        Ok(())
    }

    /// One physical connection from connect to teardown.
    ///
    /// `Ok` means the connection was closed on request.
    async fn run_connection(&self, policy: &mut ReconnectPolicy) -> Result<(), StreamError> {
        let health = self.monitor.begin_connection();
        tracing::info!(url = %self.config.url, "Connecting user stream");

        let connection = match self
            .connector
            .connect(&self.config.url, &self.config.headers)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                self.monitor.interrupted(&e);
                return Err(e);
            }
        };
        let mut sink = connection.sink;
        let mut source = connection.source;

        let result = self
            .session(sink.as_mut(), source.as_mut(), &health, policy)
            .await;

        match &result {
            Ok(()) => self.monitor.set_state(ConnectionState::Closing),
            Err(e) => self.monitor.interrupted(e),
        }
        metrics::set_stream_connected(false);
        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "User stream close failed");
        }
        tracing::info!(summary = %health.summary(), "User stream disconnected");
        result
    }

    async fn session(
        &self,
        sink: &mut dyn FrameSink,
        source: &mut dyn FrameSource,
        health: &Arc<ConnectionHealth>,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), StreamError> {
        self.authenticate(sink, source, health).await?;
        self.subscribe(sink).await?;

        policy.reset();
        self.monitor.set_state(ConnectionState::Open);
        metrics::set_stream_connected(true);
        tracing::info!(assets = ?self.config.assets, "User stream open");

        let (liveness_tx, liveness_rx) = mpsc::channel(8);
        let liveness = LivenessLoop::new(
            self.config.liveness,
            Arc::clone(health),
            liveness_tx,
            self.cancel.child_token(),
        )
        .spawn();

        let result = self.pump(sink, source, health, liveness_rx).await;
        liveness.shutdown().await;
        result
    }

    async fn authenticate(
        &self,
        sink: &mut dyn FrameSink,
        source: &mut dyn FrameSource,
        health: &ConnectionHealth,
    ) -> Result<(), StreamError> {
        let (api_key, sign, timestamp) = self
            .signer
            .stream_login(chrono::Utc::now().timestamp_millis());
        let request = StreamRequest::sign(self.next_id(), &api_key, &sign, timestamp);
        sink.send(request.to_text()).await?;

        let reply = tokio::time::timeout(self.config.auth_timeout, async {
            loop {
                let text = source.next_frame().await.ok_or(StreamError::Closed)??;
                match classify_frame(&text) {
                    Ok(Some(InboundFrame::Probe { id })) => {
                        self.answer_probe(sink, health, id).await?;
                    }
                    Ok(Some(InboundFrame::Ack(reply) | InboundFrame::Event(reply))) => {
                        return Ok(reply);
                    }
                    Ok(None) => {}
                    Err(e) => return Err(StreamError::AuthRejected(e.to_string())),
                }
            }
        })
        .await
        .map_err(|_| StreamError::AuthTimeout)??;

        health.record_event();
        check_auth_reply(&reply).map_err(StreamError::AuthRejected)?;
        tracing::debug!("User stream authenticated");
        Ok(())
    }

    async fn subscribe(&self, sink: &mut dyn FrameSink) -> Result<(), StreamError> {
        sink.send(StreamRequest::order_subscribe(self.next_id()).to_text())
            .await?;
        sink.send(StreamRequest::asset_subscribe(self.next_id(), &self.config.assets).to_text())
            .await
    }

    async fn pump(
        &self,
        sink: &mut dyn FrameSink,
        source: &mut dyn FrameSource,
        health: &ConnectionHealth,
        mut liveness_rx: mpsc::Receiver<LivenessEvent>,
    ) -> Result<(), StreamError> {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Ok(()),
                event = liveness_rx.recv() => match event {
                    Some(LivenessEvent::SendPing) => {
                        let id = self.next_id();
                        sink.send(StreamRequest::ping(id).to_text()).await?;
                        health.record_client_ping();
                        tracing::trace!(id, "Client probe sent");
                    }
                    Some(LivenessEvent::Stale(idle)) => return Err(StreamError::Stale(idle)),
                    None => {
                        tracing::warn!("Liveness loop exited while connection open");
                        return Err(StreamError::Stale(health.idle_for()));
                    }
                },
                frame = source.next_frame() => {
                    let text = frame.ok_or(StreamError::Closed)??;
                    if !self.handle_frame(sink, health, &text).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Returns `false` once nobody consumes events any more.
    async fn handle_frame(
        &self,
        sink: &mut dyn FrameSink,
        health: &ConnectionHealth,
        text: &str,
    ) -> Result<bool, StreamError> {
        let frame = match classify_frame(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(true),
            Err(e) => {
                tracing::warn!(error = %e, "Invalid message on user stream");
                metrics::record_malformed_payload("stream_frame");
                return Ok(true);
            }
        };
        health.record_event();

        match frame {
            InboundFrame::Probe { id } => self.answer_probe(sink, health, id).await?,
            InboundFrame::Ack(ack) => tracing::trace!(%ack, "Request acknowledged"),
            InboundFrame::Event(event) => {
                if self.event_tx.send(event).await.is_err() {
                    tracing::info!("Event consumer gone, closing user stream");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn answer_probe(
        &self,
        sink: &mut dyn FrameSink,
        health: &ConnectionHealth,
        id: Option<Value>,
    ) -> Result<(), StreamError> {
        health.record_server_ping();
        let id = id.unwrap_or_else(|| Value::from(self.next_id()));
        tracing::trace!(%id, "Venue probe received");
        sink.send(StreamRequest::pong(id).to_text()).await?;
        health.record_pong_sent();
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.message_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}
