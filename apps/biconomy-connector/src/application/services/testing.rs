//! Scripted venue used by the service tests.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::application::ports::{RequestParams, VenueEndpoint, VenueError, VenueRestPort};
use crate::domain::order::{ClientOrderId, TrackedOrder, TradeSide, TradingPair};

type Handler = Arc<dyn Fn(&RequestParams) -> Result<Value, VenueError> + Send + Sync>;

/// Venue double answering per endpoint and recording every request.
#[derive(Default)]
pub struct ScriptedVenue {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<(String, RequestParams)>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl ScriptedVenue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on<F>(&self, endpoint: VenueEndpoint, handler: F)
    where
        F: Fn(&RequestParams) -> Result<Value, VenueError> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .insert(endpoint.path().to_string(), Arc::new(handler));
    }

    pub fn respond(&self, endpoint: VenueEndpoint, value: Value) {
        self.on(endpoint, move |_| Ok(value.clone()));
    }

    pub fn delay(&self, endpoint: VenueEndpoint, delay: Duration) {
        self.delays.lock().insert(endpoint.path().to_string(), delay);
    }

    pub fn calls_to(&self, endpoint: VenueEndpoint) -> Vec<RequestParams> {
        self.calls
            .lock()
            .iter()
            .filter(|(path, _)| path == endpoint.path())
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl VenueRestPort for ScriptedVenue {
    async fn post(
        &self,
        path: &str,
        params: RequestParams,
        _auth_required: bool,
    ) -> Result<Value, VenueError> {
        self.calls.lock().push((path.to_string(), params.clone()));
        let delay = self.delays.lock().get(path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let handler = self.handlers.lock().get(path).cloned();
        match handler {
            Some(handler) => handler(&params),
            None => Err(VenueError::Http {
                status: 404,
                body: format!("no scripted response for {path}"),
            }),
        }
    }
}

pub fn tracked(id: &str, side: TradeSide, price: Decimal, amount: Decimal, created_at: DateTime<Utc>) -> TrackedOrder {
    TrackedOrder::new(
        ClientOrderId::from(id),
        TradingPair::new("BTC", "USDT"),
        side,
        price,
        amount,
        created_at,
    )
}

// =============================================================================
// Log Capture
// =============================================================================

/// Collects formatted log output emitted inside [`LogCapture::run`].
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let sink = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || sink.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    /// Number of occurrences of `needle` in the captured output.
    pub fn count(&self, needle: &str) -> usize {
        String::from_utf8_lossy(&self.0.lock()).matches(needle).count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
