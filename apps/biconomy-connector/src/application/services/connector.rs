//! Venue Connector
//!
//! Facade wiring the resolver, ingestor, cancel orchestrator and balance
//! reconciler over one shared venue client, tracker and balance store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::balances::BalanceReconciler;
use super::cancel::{BatchCancelOrchestrator, CancelConfig, CancelError, CancelReport};
use super::ingest::{EventIngestor, IngestError};
use super::resolver::{IdentifierResolver, Resolution, ResolverConfig};
use crate::application::ports::{BalanceStorePort, OrderTrackerPort, VenueError, VenueRestPort};
use crate::domain::order::{OrderUpdate, TrackedOrder, TradeUpdate, TradingPair};

/// Connector configuration.
#[derive(Debug, Clone, Default)]
pub struct ConnectorConfig {
    /// Identifier resolution.
    pub resolver: ResolverConfig,
    /// Batch cancellation.
    pub cancel: CancelConfig,
    /// Configured instruments; drive the balance fallback.
    pub trading_pairs: Vec<TradingPair>,
}

/// Operations exposed to the rest of the connector.
pub struct VenueConnector<V, T, B>
where
    V: VenueRestPort,
    T: OrderTrackerPort,
    B: BalanceStorePort,
{
    tracker: Arc<T>,
    store: Arc<B>,
    resolver: Arc<IdentifierResolver<V, T>>,
    balances: Arc<BalanceReconciler<V, B>>,
    ingestor: EventIngestor<V, T, B>,
    cancel: BatchCancelOrchestrator<V, T>,
}

impl<V, T, B> VenueConnector<V, T, B>
where
    V: VenueRestPort,
    T: OrderTrackerPort,
    B: BalanceStorePort,
{
    /// Wire the services together.
    #[must_use]
    pub fn new(venue: Arc<V>, tracker: Arc<T>, store: Arc<B>, config: ConnectorConfig) -> Self {
        let resolver = Arc::new(IdentifierResolver::new(
            Arc::clone(&venue),
            Arc::clone(&tracker),
            config.resolver,
        ));
        let balances = Arc::new(BalanceReconciler::new(
            Arc::clone(&venue),
            Arc::clone(&store),
            config.trading_pairs,
        ));
        let ingestor = EventIngestor::new(
            Arc::clone(&venue),
            Arc::clone(&tracker),
            Arc::clone(&resolver),
            Arc::clone(&balances),
        );
        let cancel = BatchCancelOrchestrator::new(
            venue,
            Arc::clone(&tracker),
            Arc::clone(&resolver),
            config.cancel,
        );

        Self {
            tracker,
            store,
            resolver,
            balances,
            ingestor,
            cancel,
        }
    }

    /// Order tracker shared by every service.
    #[must_use]
    pub const fn tracker(&self) -> &Arc<T> {
        &self.tracker
    }

    /// Balance store shared by every service.
    #[must_use]
    pub const fn balance_store(&self) -> &Arc<B> {
        &self.store
    }

    /// Cancel every open order; one outcome per order, never an error.
    pub async fn cancel_all(&self, timeout: Duration) -> CancelReport {
        self.cancel.cancel_all(timeout).await
    }

    /// Cancel a single order.
    ///
    /// # Errors
    ///
    /// See [`BatchCancelOrchestrator::cancel_order`].
    pub async fn cancel_order(&self, order: &TrackedOrder) -> Result<(), CancelError> {
        self.cancel.cancel_order(order).await
    }

    /// Apply one push message from the user stream.
    pub fn apply_push_message(&self, message: &Value) {
        self.ingestor.apply_push_message(message);
    }

    /// Refresh the balance snapshot.
    ///
    /// # Errors
    ///
    /// Returns `VenueError` when the snapshot request fails.
    pub async fn refresh_balances(&self) -> Result<(), VenueError> {
        self.balances.refresh_balances().await
    }

    /// Venue id of `order`, looked up in the listings when not yet known.
    pub async fn resolve_missing_id(&self, order: &TrackedOrder) -> Resolution {
        self.resolver.resolve_missing_id(order).await
    }

    /// Poll the current state of `order`.
    ///
    /// # Errors
    ///
    /// See [`EventIngestor::poll_order_status`].
    pub async fn poll_order_status(&self, order: &TrackedOrder) -> Result<OrderUpdate, IngestError> {
        self.ingestor.poll_order_status(order).await
    }

    /// Poll the fills of `order` not seen before.
    ///
    /// # Errors
    ///
    /// See [`EventIngestor::poll_trade_fills`].
    pub async fn poll_trade_fills(&self, order: &TrackedOrder) -> Result<Vec<TradeUpdate>, IngestError> {
        self.ingestor.poll_trade_fills(order).await
    }

    /// Poll status and fills of every open order.
    ///
    /// Failures are logged per order and do not stop the sweep.
    pub async fn poll_open_orders(&self) {
        for order in self.tracker.open_orders() {
            if let Err(e) = self.ingestor.poll_trade_fills(&order).await {
                tracing::warn!(order = %order.client_order_id, error = %e, "Fill poll failed");
            }
            if let Err(e) = self.ingestor.poll_order_status(&order).await {
                tracing::warn!(order = %order.client_order_id, error = %e, "Status poll failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::VenueEndpoint;
    use crate::application::services::testing::{ScriptedVenue, tracked};
    use crate::domain::order::{ClientOrderId, OrderState, TradeSide, VenueIdentity, VenueOrderId};
    use crate::infrastructure::persistence::{InMemoryBalanceStore, InMemoryOrderTracker};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[tokio::test]
    async fn sweep_applies_fills_and_status() {
        let venue = ScriptedVenue::new();
        let tracker = Arc::new(InMemoryOrderTracker::new());
        let order = tracked("c1", TradeSide::Buy, dec!(10), dec!(1), Utc::now())
            .with_venue(VenueIdentity::Confirmed(VenueOrderId::from("5")));
        tracker.start_tracking(order.clone());
        let connector = VenueConnector::new(
            Arc::clone(&venue),
            Arc::clone(&tracker),
            Arc::new(InMemoryBalanceStore::new()),
            ConnectorConfig::default(),
        );
        venue.respond(
            VenueEndpoint::OrderDeals,
            json!({"code": 0, "result": [{"id": 1, "amount": "1", "price": "10"}]}),
        );
        venue.respond(
            VenueEndpoint::PendingOrderDetail,
            json!({"code": 0, "result": {"id": 5, "left": "0"}}),
        );

        connector.poll_open_orders().await;

        let stored = connector.tracker().tracked_order(&ClientOrderId::from("c1")).unwrap();
        assert_eq!(stored.state, OrderState::Filled);
        assert_eq!(tracker.fills(&order.client_order_id).len(), 1);
        assert!(connector.tracker().open_orders().is_empty());
    }
}
