//! In-memory order tracker and balance store.
//!
//! The tracker is the single writer of order state: every proposed update
//! goes through `OrderStateMachine`, so re-applied states are no-ops and the
//! first terminal state observed stays authoritative.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;

use crate::application::ports::{BalanceStorePort, OrderTrackerPort, TrackerError};
use crate::domain::balance::BalanceRecord;
use crate::domain::order::{
    ClientOrderId, OrderStateMachine, OrderUpdate, TrackedOrder, TradeId, TradeUpdate, Transition,
    VenueOrderId,
};
use crate::infrastructure::metrics;

// =============================================================================
// Order Tracker
// =============================================================================

#[derive(Debug, Default)]
struct TrackerState {
    orders: HashMap<ClientOrderId, TrackedOrder>,
    fills: HashMap<ClientOrderId, Vec<TradeUpdate>>,
    seen_trades: HashSet<TradeId>,
}

impl TrackerState {
    fn find_mut(&mut self, update: &OrderUpdate) -> Option<&mut TrackedOrder> {
        let key = match update.client_order_id() {
            Some(id) if self.orders.contains_key(id) => Some(id.clone()),
            _ => update.venue_order_id().and_then(|venue_id| {
                self.orders
                    .values()
                    .find(|order| order.known_venue_id() == Some(venue_id))
                    .map(|order| order.client_order_id.clone())
            }),
        }?;
        self.orders.get_mut(&key)
    }

    fn owner_of(&self, venue_order_id: &VenueOrderId) -> Option<ClientOrderId> {
        self.orders
            .values()
            .find(|order| order.known_venue_id() == Some(venue_order_id))
            .map(|order| order.client_order_id.clone())
    }
}

/// In-memory `OrderTrackerPort`.
#[derive(Debug, Default)]
pub struct InMemoryOrderTracker {
    state: RwLock<TrackerState>,
}

impl InMemoryOrderTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a submitted order.
    pub fn start_tracking(&self, order: TrackedOrder) {
        self.state
            .write()
            .orders
            .insert(order.client_order_id.clone(), order);
    }

    /// Fills recorded for an order, in arrival order.
    #[must_use]
    pub fn fills(&self, client_order_id: &ClientOrderId) -> Vec<TradeUpdate> {
        self.state
            .read()
            .fills
            .get(client_order_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of tracked orders, terminal ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().orders.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().orders.is_empty()
    }
}

impl OrderTrackerPort for InMemoryOrderTracker {
    fn process_order_update(&self, update: OrderUpdate) -> Option<Transition> {
        let mut state = self.state.write();
        let Some(order) = state.find_mut(&update) else {
            tracing::debug!(
                client_order_id = ?update.client_order_id(),
                venue_order_id = ?update.venue_order_id(),
                "Update for untracked order ignored"
            );
            return None;
        };

        if let Some(venue_id) = update.venue_order_id() {
            if let Err(e) = order.confirm_venue_id(venue_id.clone()) {
                tracing::warn!(error = %e, "Update carries a different venue id");
                metrics::record_state_anomaly("venue_id_conflict");
            }
        }

        let transition = OrderStateMachine::apply(order.state, update.new_state);
        match transition {
            Transition::Applied => {
                tracing::info!(
                    order = %order.client_order_id,
                    from = %order.state,
                    to = %update.new_state,
                    "Order state changed"
                );
                order.state = update.new_state;
            }
            Transition::Conflict { kept, refused } => {
                tracing::warn!(
                    order = %order.client_order_id,
                    kept = %kept,
                    refused = %refused,
                    "Conflicting terminal state ignored; first terminal state stays in effect"
                );
                metrics::record_state_anomaly("terminal_conflict");
            }
            Transition::Unchanged | Transition::Ignored => {}
        }
        Some(transition)
    }

    fn process_trade_update(&self, update: TradeUpdate) -> bool {
        let mut state = self.state.write();
        let owner = update
            .client_order_id
            .clone()
            .filter(|id| state.orders.contains_key(id))
            .or_else(|| state.owner_of(&update.venue_order_id));
        let Some(owner) = owner else {
            tracing::debug!(trade_id = %update.trade_id, "Fill for untracked order ignored");
            return false;
        };
        if !state.seen_trades.insert(update.trade_id.clone()) {
            return false;
        }
        state.fills.entry(owner).or_default().push(update);
        true
    }

    fn confirm_venue_order_id(
        &self,
        client_order_id: &ClientOrderId,
        venue_order_id: VenueOrderId,
    ) -> Result<(), TrackerError> {
        let mut state = self.state.write();
        let order = state
            .orders
            .get_mut(client_order_id)
            .ok_or_else(|| TrackerError::UnknownOrder(client_order_id.clone()))?;
        order.confirm_venue_id(venue_order_id)?;
        Ok(())
    }

    fn tracked_order(&self, client_order_id: &ClientOrderId) -> Option<TrackedOrder> {
        self.state.read().orders.get(client_order_id).cloned()
    }

    fn open_orders(&self) -> Vec<TrackedOrder> {
        let mut open: Vec<_> = self
            .state
            .read()
            .orders
            .values()
            .filter(|order| order.is_open())
            .cloned()
            .collect();
        open.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.client_order_id.cmp(&b.client_order_id))
        });
        open
    }
}

// =============================================================================
// Balance Store
// =============================================================================

/// In-memory `BalanceStorePort`.
#[derive(Debug, Default)]
pub struct InMemoryBalanceStore {
    balances: RwLock<BTreeMap<String, BalanceRecord>>,
}

impl InMemoryBalanceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Balance of one asset.
    #[must_use]
    pub fn balance(&self, asset: &str) -> Option<BalanceRecord> {
        self.balances.read().get(&asset.to_uppercase()).cloned()
    }
}

impl BalanceStorePort for InMemoryBalanceStore {
    fn replace_all(&self, records: Vec<BalanceRecord>) {
        let table = records
            .into_iter()
            .map(|record| (record.asset.clone(), record))
            .collect();
        *self.balances.write() = table;
    }

    fn patch(&self, record: BalanceRecord) {
        self.balances.write().insert(record.asset.clone(), record);
    }

    fn snapshot(&self) -> Vec<BalanceRecord> {
        self.balances.read().values().cloned().collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
