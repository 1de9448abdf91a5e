//! Liveness Loop
//!
//! Background timer of an open connection. Every `ping_interval` it asks the
//! supervisor to send a probe, unless the connection has been silent for
//! longer than `stale_after`, in which case it reports the connection stale
//! and stops.
//!
//! The loop never touches the socket itself; it only emits events, so the
//! supervisor keeps sole ownership of the sink.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::health::ConnectionHealth;
use crate::infrastructure::biconomy::constants::CLIENT_PING_INTERVAL;

/// Liveness timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Interval between client probes.
    pub ping_interval: Duration,
    /// Inbound silence after which the connection is abandoned.
    pub stale_after: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self::new(CLIENT_PING_INTERVAL, Duration::from_secs(45))
    }
}

impl LivenessConfig {
    /// Create a configuration.
    #[must_use]
    pub const fn new(ping_interval: Duration, stale_after: Duration) -> Self {
        Self {
            ping_interval,
            stale_after,
        }
    }
}

/// Requests from the liveness loop to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessEvent {
    /// Send a client probe now.
    SendPing,
    /// Nothing was received for the given duration.
    Stale(Duration),
}

/// Timer task bound to one connection.
pub struct LivenessLoop {
    config: LivenessConfig,
    health: Arc<ConnectionHealth>,
    event_tx: mpsc::Sender<LivenessEvent>,
    cancel: CancellationToken,
}

impl LivenessLoop {
    /// Create a loop; `cancel` should be scoped to the connection.
    #[must_use]
    pub const fn new(
        config: LivenessConfig,
        health: Arc<ConnectionHealth>,
        event_tx: mpsc::Sender<LivenessEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            health,
            event_tx,
            cancel,
        }
    }

    /// Spawn the loop onto the runtime.
    #[must_use]
    pub fn spawn(self) -> LivenessHandle {
        let cancel = self.cancel.clone();
        let join = tokio::spawn(self.run());
        LivenessHandle { cancel, join }
    }

    /// Run until cancelled, stale, or the supervisor stops listening.
    pub async fn run(self) {
        let period = self.config.ping_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Liveness loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.tick().await {
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> bool {
        let idle = self.health.idle_for();
        if idle > self.config.stale_after {
            tracing::warn!(
                idle_secs = idle.as_secs_f64(),
                stale_after_secs = self.config.stale_after.as_secs(),
                "User stream silent, abandoning connection"
            );
            let _ = self.event_tx.send(LivenessEvent::Stale(idle)).await;
            return false;
        }
        if self.event_tx.send(LivenessEvent::SendPing).await.is_err() {
            tracing::debug!("Liveness listener gone, stopping");
            return false;
        }
        true
    }
}

/// Running liveness loop.
#[derive(Debug)]
pub struct LivenessHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl LivenessHandle {
    /// Cancel the loop and wait for it to finish.
    ///
    /// Cancellation is an ordinary exit; a panicked loop is logged rather
    /// than propagated.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "Liveness loop ended abnormally");
        }
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(config: LivenessConfig) -> (Arc<ConnectionHealth>, mpsc::Receiver<LivenessEvent>, LivenessHandle) {
        let health = Arc::new(ConnectionHealth::new());
        let (event_tx, event_rx) = mpsc::channel(8);
        let handle = LivenessLoop::new(config, Arc::clone(&health), event_tx, CancellationToken::new()).spawn();
        (health, event_rx, handle)
    }

    #[test]
    fn default_interval_is_ten_seconds() {
        let config = LivenessConfig::default();
        assert_eq!(config.ping_interval, Duration::from_secs(10));
        assert_eq!(config.stale_after, Duration::from_secs(45));
    }

    #[tokio::test]
    async fn first_probe_waits_one_interval() {
        let (_health, mut events, handle) =
            start(LivenessConfig::new(Duration::from_millis(80), Duration::from_secs(10)));

        let started = Instant::now();
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event, LivenessEvent::SendPing);
        assert!(started.elapsed() >= Duration::from_millis(70));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn silent_connection_goes_stale() {
        let (_health, mut events, handle) =
            start(LivenessConfig::new(Duration::from_millis(30), Duration::from_millis(100)));

        let mut stale = None;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
            if let LivenessEvent::Stale(idle) = event {
                stale = Some(idle);
                break;
            }
        }

        assert!(stale.is_some_and(|idle| idle > Duration::from_millis(100)));
        tokio::time::timeout(Duration::from_millis(200), async {
            while !handle.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn inbound_traffic_keeps_connection_fresh() {
        let (health, mut events, handle) =
            start(LivenessConfig::new(Duration::from_millis(30), Duration::from_millis(100)));

        for _ in 0..8 {
            health.record_event();
            let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event, LivenessEvent::SendPing);
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_completes_without_error() {
        let (_health, _events, handle) =
            start(LivenessConfig::new(Duration::from_secs(30), Duration::from_secs(60)));

        tokio::time::timeout(Duration::from_millis(200), handle.shutdown())
            .await
            .unwrap();
    }
}
