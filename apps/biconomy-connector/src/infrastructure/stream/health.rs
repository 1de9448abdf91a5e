//! Connection Health
//!
//! Timestamps of the traffic seen on one physical connection. A fresh
//! record is created for every connection so ages never leak across
//! reconnects.

use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Timestamps {
    last_event: Option<Instant>,
    last_server_ping: Option<Instant>,
    last_client_ping: Option<Instant>,
    last_pong_sent: Option<Instant>,
}

/// Traffic timestamps of one connection.
#[derive(Debug)]
pub struct ConnectionHealth {
    opened_at: Instant,
    stamps: RwLock<Timestamps>,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHealth {
    /// Record for a connection opened now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            opened_at: Instant::now(),
            stamps: RwLock::new(Timestamps {
                last_event: None,
                last_server_ping: None,
                last_client_ping: None,
                last_pong_sent: None,
            }),
        }
    }

    /// A decoded inbound message arrived.
    pub fn record_event(&self) {
        self.stamps.write().last_event = Some(Instant::now());
    }

    /// The venue sent a probe.
    pub fn record_server_ping(&self) {
        self.stamps.write().last_server_ping = Some(Instant::now());
    }

    /// We sent a probe.
    pub fn record_client_ping(&self) {
        self.stamps.write().last_client_ping = Some(Instant::now());
    }

    /// We acknowledged a venue probe.
    pub fn record_pong_sent(&self) {
        self.stamps.write().last_pong_sent = Some(Instant::now());
    }

    /// Time since the last inbound message, or since the connection opened.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.stamps
            .read()
            .last_event
            .unwrap_or(self.opened_at)
            .elapsed()
    }

    /// Age of the last inbound message.
    #[must_use]
    pub fn last_event_age(&self) -> Option<Duration> {
        self.stamps.read().last_event.map(|t| t.elapsed())
    }

    /// Age of the last venue probe.
    #[must_use]
    pub fn last_server_ping_age(&self) -> Option<Duration> {
        self.stamps.read().last_server_ping.map(|t| t.elapsed())
    }

    /// Age of the last probe we sent.
    #[must_use]
    pub fn last_client_ping_age(&self) -> Option<Duration> {
        self.stamps.read().last_client_ping.map(|t| t.elapsed())
    }

    /// Age of the last acknowledgement we sent.
    #[must_use]
    pub fn last_pong_age(&self) -> Option<Duration> {
        self.stamps.read().last_pong_sent.map(|t| t.elapsed())
    }

    /// One-line postmortem of the connection.
    #[must_use]
    pub fn summary(&self) -> String {
        let stamps = *self.stamps.read();
        let now = Instant::now();
        [
            ("last_event_age", stamps.last_event),
            ("last_server_ping_age", stamps.last_server_ping),
            ("last_client_ping_age", stamps.last_client_ping),
            ("last_pong_age", stamps.last_pong_sent),
        ]
        .iter()
        .map(|(name, stamp)| match stamp {
            Some(at) => format!("{name}={:.2}s", now.duration_since(*at).as_secs_f64()),
            None => format!("{name}=n/a"),
        })
        .collect::<Vec<_>>()
        .join(" ")
    }
}
