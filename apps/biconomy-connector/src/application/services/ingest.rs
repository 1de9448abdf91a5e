//! Order/Trade Event Ingestor
//!
//! Turns venue push messages and REST poll results into `OrderUpdate` and
//! `TradeUpdate` records for the tracker. A malformed record is skipped on
//! its own; the rest of its batch is still applied.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use super::balances::BalanceReconciler;
use super::resolver::{IdentifierResolver, Resolution};
use crate::application::ports::{
    BalanceStorePort, OrderTrackerPort, VenueEndpoint, VenueError, VenueRestPort, request_params,
};
use crate::domain::order::{
    ClientOrderId, OrderUpdate, TrackedOrder, TradeFee, TradeUpdate, VenueIdentity, VenueOrderId,
};
use crate::domain::payload::{
    JsonMap, entry_timestamp, extract_entries, extract_order_entry, extract_result,
    normalize_fill_entry, normalize_order_entry, state_from_entry,
};
use crate::infrastructure::metrics;

/// Push method carrying balance changes.
pub const ASSET_UPDATE_METHOD: &str = "asset.update";

/// Push method carrying order changes.
pub const ORDER_UPDATE_METHOD: &str = "order.update";

/// Poll errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// Venue request failed or was rejected.
    #[error(transparent)]
    Venue(#[from] VenueError),

    /// The order has no venue id yet.
    #[error("order {0} has no venue order id")]
    Unresolved(ClientOrderId),

    /// Neither detail endpoint knows the order.
    #[error("order {0} not found on venue")]
    OrderNotFound(ClientOrderId),
}

/// Push and poll ingestion service.
pub struct EventIngestor<V, T, B>
where
    V: VenueRestPort,
    T: OrderTrackerPort,
    B: BalanceStorePort,
{
    venue: Arc<V>,
    tracker: Arc<T>,
    resolver: Arc<IdentifierResolver<V, T>>,
    balances: Arc<BalanceReconciler<V, B>>,
}

impl<V, T, B> EventIngestor<V, T, B>
where
    V: VenueRestPort,
    T: OrderTrackerPort,
    B: BalanceStorePort,
{
    /// Create a new ingestor.
    #[must_use]
    pub const fn new(
        venue: Arc<V>,
        tracker: Arc<T>,
        resolver: Arc<IdentifierResolver<V, T>>,
        balances: Arc<BalanceReconciler<V, B>>,
    ) -> Self {
        Self {
            venue,
            tracker,
            resolver,
            balances,
        }
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Apply one push message.
    ///
    /// Accepts `{"method": ..., "params": ...}` and `[method, payload]`.
    /// Unknown methods are ignored.
    pub fn apply_push_message(&self, message: &Value) {
        let Some((method, payload)) = split_push_message(message) else {
            tracing::warn!(%message, "Unrecognized push message shape");
            metrics::record_malformed_payload("push_message");
            return;
        };

        match method {
            ASSET_UPDATE_METHOD => {
                self.balances.apply_asset_update(payload);
            }
            ORDER_UPDATE_METHOD => {
                let applied = self.apply_order_event(payload);
                tracing::debug!(applied, "Order push processed");
            }
            other => tracing::debug!(method = other, "Ignoring push method"),
        }
    }

    fn apply_order_event(&self, payload: &Value) -> usize {
        let now = Utc::now();
        let entries: Vec<&Value> = match payload {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };

        let mut applied = 0;
        for entry in entries {
            let Some(entry) = entry.as_object() else {
                metrics::record_malformed_payload("order_update");
                continue;
            };
            let Some(fields) = normalize_order_entry(entry, now) else {
                tracing::warn!(?entry, "Order update without a market; skipped");
                metrics::record_malformed_payload("order_update");
                continue;
            };
            let update = match OrderUpdate::new(
                fields.client_order_id,
                fields.venue_order_id,
                fields.trading_pair,
                fields.state,
                fields.timestamp,
            ) {
                Ok(update) => update,
                Err(e) => {
                    tracing::warn!(error = %e, ?entry, "Order update skipped");
                    metrics::record_malformed_payload("order_update");
                    continue;
                }
            };
            self.tracker.process_order_update(update);
            applied += 1;
        }
        applied
    }

    // =========================================================================
    // Polls
    // =========================================================================

    /// Query the venue for the current state of `order` and apply it.
    ///
    /// Looks in the pending detail first, then the finished detail. When
    /// neither knows the order the listings are rescanned, which may sync a
    /// terminal state on its own.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Unresolved` without a venue id,
    /// `IngestError::OrderNotFound` when no detail endpoint knows the order,
    /// and `IngestError::Venue` on request failures.
    #[tracing::instrument(skip(self, order), fields(order = %order.client_order_id))]
    pub async fn poll_order_status(&self, order: &TrackedOrder) -> Result<OrderUpdate, IngestError> {
        let venue_order_id = match self.resolver.resolve_missing_id(order).await {
            Resolution::Resolved(id) => id,
            Resolution::Unresolved | Resolution::Failed => {
                return Err(IngestError::Unresolved(order.client_order_id.clone()));
            }
        };

        let mut entry = self
            .order_detail(VenueEndpoint::PendingOrderDetail, order, &venue_order_id)
            .await?;
        if entry.is_none() {
            entry = self
                .order_detail(VenueEndpoint::FinishedOrderDetail, order, &venue_order_id)
                .await?;
        }

        let Some(entry) = entry else {
            tracing::warn!(venue_order_id = %venue_order_id, "Order missing from both detail endpoints; rescanning listings");
            self.resolver.resolve(order).await;
            return Err(IngestError::OrderNotFound(order.client_order_id.clone()));
        };

        let mut current = order.clone();
        current.venue = VenueIdentity::Confirmed(venue_order_id);
        let update = OrderUpdate::for_order(
            &current,
            state_from_entry(&entry),
            entry_timestamp(&entry, Utc::now()),
        );
        self.tracker.process_order_update(update.clone());
        Ok(update)
    }

    async fn order_detail(
        &self,
        endpoint: VenueEndpoint,
        order: &TrackedOrder,
        venue_order_id: &VenueOrderId,
    ) -> Result<Option<JsonMap>, VenueError> {
        let params = request_params([
            ("market", order.trading_pair.venue_symbol()),
            ("order_id", venue_order_id.to_string()),
        ]);
        let response = match self.venue.post(endpoint.path(), params, true).await {
            Ok(response) => response,
            Err(e) if e.is_missing_order() => return Ok(None),
            Err(e) => return Err(e),
        };
        match extract_result(&response, endpoint.context()) {
            Ok(result) => Ok(extract_order_entry(result)
                .filter(|entry| !entry.is_empty())
                .cloned()),
            Err(e) => {
                let e = VenueError::from(e);
                if e.is_missing_order() { Ok(None) } else { Err(e) }
            }
        }
    }

    /// Fetch the fills of `order` and forward the ones not seen before.
    ///
    /// Orders without a known venue id have no fills to fetch.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::Venue` when the deals request fails.
    #[tracing::instrument(skip(self, order), fields(order = %order.client_order_id))]
    pub async fn poll_trade_fills(&self, order: &TrackedOrder) -> Result<Vec<TradeUpdate>, IngestError> {
        let Some(venue_order_id) = order.known_venue_id().cloned() else {
            return Ok(Vec::new());
        };

        let endpoint = VenueEndpoint::OrderDeals;
        let params = request_params([
            ("market", order.trading_pair.venue_symbol()),
            ("order_id", venue_order_id.to_string()),
        ]);
        let response = self.venue.post(endpoint.path(), params, true).await?;
        let result = extract_result(&response, endpoint.context()).map_err(VenueError::from)?;

        let now = Utc::now();
        let mut fresh = Vec::new();
        for (index, entry) in extract_entries(result).into_iter().enumerate() {
            let Some(fill) = entry.as_object().and_then(|entry| {
                normalize_fill_entry(entry, index, &venue_order_id, order.trading_pair.quote(), now)
            }) else {
                tracing::debug!(index, "Skipping unusable fill entry");
                continue;
            };

            let update = TradeUpdate {
                trade_id: fill.trade_id,
                client_order_id: Some(order.client_order_id.clone()),
                venue_order_id: venue_order_id.clone(),
                trading_pair: order.trading_pair.clone(),
                fill_price: fill.fill_price,
                fill_base_amount: fill.fill_base_amount,
                fill_quote_amount: fill.fill_quote_amount,
                fee: TradeFee {
                    asset: fill.fee_asset,
                    amount: fill.fee_amount,
                },
                timestamp: fill.timestamp,
            };
            if self.tracker.process_trade_update(update.clone()) {
                metrics::record_trade_fill();
                fresh.push(update);
            }
        }
        Ok(fresh)
    }
}

/// Split a push message into method and payload.
fn split_push_message(message: &Value) -> Option<(&str, &Value)> {
    match message {
        Value::Object(map) => {
            let method = map.get("method")?.as_str()?;
            Some((method, map.get("params").unwrap_or(&Value::Null)))
        }
        Value::Array(items) if items.len() >= 2 => Some((items[0].as_str()?, &items[1])),
        _ => None,
    }
}
