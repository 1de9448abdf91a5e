//! Order Tracker and Balance Store Ports (Driven Ports)
//!
//! The tracked-order collection and the balance table are the only mutable
//! shared state. Services reach them exclusively through these ports and
//! only by proposing update records.

use crate::domain::balance::BalanceRecord;
use crate::domain::order::{
    ClientOrderId, OrderError, OrderUpdate, TrackedOrder, TradeUpdate, Transition, VenueOrderId,
};

/// Order tracker error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// No tracked order with this client id.
    #[error("unknown order: {0}")]
    UnknownOrder(ClientOrderId),

    /// The order model refused the change.
    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Port for the local order book of record.
pub trait OrderTrackerPort: Send + Sync {
    /// Apply a proposed transition. Returns `None` when no tracked order is
    /// referenced by the update.
    fn process_order_update(&self, update: OrderUpdate) -> Option<Transition>;

    /// Record a fill. Returns `false` for unknown orders and repeated trade ids.
    fn process_trade_update(&self, update: TradeUpdate) -> bool;

    /// Fill in the venue id of an order.
    ///
    /// # Errors
    ///
    /// Returns `TrackerError` for unknown orders or when a different venue
    /// id is already confirmed.
    fn confirm_venue_order_id(
        &self,
        client_order_id: &ClientOrderId,
        venue_order_id: VenueOrderId,
    ) -> Result<(), TrackerError>;

    /// Snapshot of one tracked order.
    fn tracked_order(&self, client_order_id: &ClientOrderId) -> Option<TrackedOrder>;

    /// Snapshot of every non-terminal order.
    fn open_orders(&self) -> Vec<TrackedOrder>;
}

/// Port for the per-asset balance table.
pub trait BalanceStorePort: Send + Sync {
    /// Replace the whole table; assets not in `records` are dropped.
    fn replace_all(&self, records: Vec<BalanceRecord>);

    /// Overwrite one asset, keeping every other asset.
    fn patch(&self, record: BalanceRecord);

    /// Current balances sorted by asset.
    fn snapshot(&self) -> Vec<BalanceRecord>;
}
