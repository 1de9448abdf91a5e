//! Batch Cancellation Orchestrator
//!
//! Cancels every open order: orders with a venue id go out in bulk-cancel
//! chunks, anything a chunk does not positively acknowledge (and anything
//! whose venue id cannot be resolved) falls back to the single-cancel path,
//! run concurrently. The whole sequence sits under one timeout and always
//! yields exactly one outcome per order.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::{Value, json};

use super::resolver::{IdentifierResolver, Resolution};
use crate::application::ports::{
    OrderTrackerPort, VenueEndpoint, VenueError, VenueRestPort, request_params,
};
use crate::domain::order::{ClientOrderId, OrderState, OrderUpdate, TrackedOrder, VenueOrderId};
use crate::domain::payload::{
    extract_entries, extract_result, is_truthy_flag, venue_order_id_from_entry,
};
use crate::infrastructure::metrics;

/// Largest number of orders the venue accepts per bulk-cancel request.
pub const MAX_BATCH_SIZE: usize = 10;

/// Cancellation configuration.
#[derive(Debug, Clone, Copy)]
pub struct CancelConfig {
    /// Orders per bulk-cancel request.
    pub batch_size: usize,
}

impl Default for CancelConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
        }
    }
}

// =============================================================================
// Results
// =============================================================================

/// Final outcome for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The order is canceled (or already gone from the venue).
    Canceled,
    /// The order could not be confirmed canceled.
    Failed {
        /// Why.
        reason: String,
    },
}

impl CancelOutcome {
    /// Whether this outcome counts as success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Per-order outcome of a cancel-all run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelReport {
    outcomes: BTreeMap<ClientOrderId, CancelOutcome>,
}

impl CancelReport {
    /// Outcome for one order.
    #[must_use]
    pub fn get(&self, client_order_id: &ClientOrderId) -> Option<&CancelOutcome> {
        self.outcomes.get(client_order_id)
    }

    /// Number of orders reported.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether no order was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Orders confirmed canceled.
    pub fn successes(&self) -> impl Iterator<Item = &ClientOrderId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_success())
            .map(|(id, _)| id)
    }

    /// Orders not confirmed canceled.
    pub fn failures(&self) -> impl Iterator<Item = &ClientOrderId> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(id, _)| id)
    }

    /// Iterate over every outcome.
    pub fn iter(&self) -> impl Iterator<Item = (&ClientOrderId, &CancelOutcome)> {
        self.outcomes.iter()
    }
}

/// Running bookkeeping; survives a timeout of the work it tracks.
struct CancelProgress {
    pending: HashSet<ClientOrderId>,
    report: CancelReport,
}

impl CancelProgress {
    fn new(orders: &[TrackedOrder]) -> Self {
        Self {
            pending: orders.iter().map(|o| o.client_order_id.clone()).collect(),
            report: CancelReport::default(),
        }
    }

    fn settle(&mut self, client_order_id: ClientOrderId, outcome: CancelOutcome) {
        if self.pending.remove(&client_order_id) {
            self.report.outcomes.insert(client_order_id, outcome);
        }
    }

    fn finish(mut self, reason: &str) -> CancelReport {
        for id in std::mem::take(&mut self.pending) {
            self.report.outcomes.insert(
                id,
                CancelOutcome::Failed {
                    reason: reason.to_string(),
                },
            );
        }
        for (_, outcome) in self.report.iter() {
            metrics::record_cancel_outcome(if outcome.is_success() { "canceled" } else { "failed" });
        }
        self.report
    }
}

/// An order scheduled for bulk cancellation.
#[derive(Debug, Clone)]
pub struct CancelCandidate<'a> {
    /// The tracked order.
    pub order: &'a TrackedOrder,
    /// Venue id sent in the bulk request.
    pub venue_order_id: VenueOrderId,
    /// Index of the bulk request carrying this order.
    pub batch: usize,
}

// =============================================================================
// Errors
// =============================================================================

/// Single-cancel errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CancelError {
    /// No venue id could be found for the order.
    #[error("cannot cancel {0} without a venue order id")]
    IdentifierUnresolved(ClientOrderId),

    /// The venue refused the cancel.
    #[error("cancel of {client_order_id} rejected: {source}")]
    CancelRejected {
        /// Order being canceled.
        client_order_id: ClientOrderId,
        /// Venue error.
        source: VenueError,
    },

    /// The order already ended in a state other than canceled.
    #[error("order {client_order_id} already {state}")]
    AlreadyTerminal {
        /// Order being canceled.
        client_order_id: ClientOrderId,
        /// Its terminal state.
        state: OrderState,
    },
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Batched-then-individual cancellation service.
pub struct BatchCancelOrchestrator<V, T>
where
    V: VenueRestPort,
    T: OrderTrackerPort,
{
    venue: Arc<V>,
    tracker: Arc<T>,
    resolver: Arc<IdentifierResolver<V, T>>,
    config: CancelConfig,
}

impl<V, T> BatchCancelOrchestrator<V, T>
where
    V: VenueRestPort,
    T: OrderTrackerPort,
{
    /// Create a new orchestrator.
    #[must_use]
    pub const fn new(
        venue: Arc<V>,
        tracker: Arc<T>,
        resolver: Arc<IdentifierResolver<V, T>>,
        config: CancelConfig,
    ) -> Self {
        Self {
            venue,
            tracker,
            resolver,
            config,
        }
    }

    /// Cancel every open order within `timeout`.
    pub async fn cancel_all(&self, timeout: Duration) -> CancelReport {
        let orders = self.tracker.open_orders();
        self.cancel_orders(&orders, timeout).await
    }

    /// Cancel `orders` within `timeout`.
    ///
    /// Orders confirmed canceled before the deadline stay successes; every
    /// order still pending at the deadline is reported failed.
    #[tracing::instrument(skip(self, orders), fields(orders = orders.len()))]
    pub async fn cancel_orders(&self, orders: &[TrackedOrder], timeout: Duration) -> CancelReport {
        if orders.is_empty() {
            return CancelReport::default();
        }

        let mut progress = CancelProgress::new(orders);
        let finished = tokio::time::timeout(timeout, self.run(orders, &mut progress)).await;
        if finished.is_err() {
            tracing::warn!(
                pending = progress.pending.len(),
                timeout_secs = timeout.as_secs_f64(),
                "Cancel-all timed out"
            );
        }

        let report = progress.finish("cancel-all timed out");
        tracing::info!(
            canceled = report.successes().count(),
            failed = report.failures().count(),
            "Cancel-all finished"
        );
        report
    }

    async fn run(&self, orders: &[TrackedOrder], progress: &mut CancelProgress) {
        let (candidates, mut fallback) = self.build_candidates(orders).await;
        let batch_size = self.config.batch_size.clamp(1, MAX_BATCH_SIZE);

        for chunk in candidates.chunks(batch_size) {
            let unacknowledged = self.cancel_chunk(chunk, progress).await;
            fallback.extend(unacknowledged);
        }

        self.cancel_individually(fallback, progress).await;
    }

    async fn build_candidates<'a>(
        &self,
        orders: &'a [TrackedOrder],
    ) -> (Vec<CancelCandidate<'a>>, Vec<&'a TrackedOrder>) {
        let batch_size = self.config.batch_size.clamp(1, MAX_BATCH_SIZE);
        let mut candidates = Vec::new();
        let mut fallback = Vec::new();

        for order in orders {
            let venue_order_id = match order.confirmed_venue_id() {
                Some(id) => id.clone(),
                None => match self.resolver.resolve(order).await {
                    Resolution::Resolved(id) => id,
                    Resolution::Unresolved | Resolution::Failed => {
                        tracing::debug!(order = %order.client_order_id, "No venue id; cancel individually");
                        fallback.push(order);
                        continue;
                    }
                },
            };
            let batch = candidates.len() / batch_size;
            candidates.push(CancelCandidate {
                order,
                venue_order_id,
                batch,
            });
        }

        (candidates, fallback)
    }

    /// Issue one bulk request; returns the members not acknowledged.
    async fn cancel_chunk<'a>(
        &self,
        chunk: &[CancelCandidate<'a>],
        progress: &mut CancelProgress,
    ) -> Vec<&'a TrackedOrder> {
        let members: Vec<&'a TrackedOrder> = chunk.iter().map(|c| c.order).collect();
        let body: Vec<Value> = chunk
            .iter()
            .map(|c| {
                json!({
                    "market": c.order.trading_pair.venue_symbol(),
                    "order_id": c.venue_order_id.as_str(),
                })
            })
            .collect();
        let params = request_params([("orders_json", Value::Array(body).to_string())]);
        let endpoint = VenueEndpoint::CancelBatch;

        let response = match self.venue.post(endpoint.path(), params, true).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, members = chunk.len(), "Bulk cancel request failed");
                metrics::record_batch_partial_failure(chunk.len());
                return members;
            }
        };
        let entries = match extract_result(&response, endpoint.context()) {
            Ok(result) => extract_entries(result),
            Err(e) => {
                tracing::warn!(error = %e, members = chunk.len(), "Bulk cancel rejected");
                metrics::record_batch_partial_failure(chunk.len());
                return members;
            }
        };
        if entries.is_empty() {
            tracing::warn!(members = chunk.len(), "Bulk cancel returned no entries");
            metrics::record_batch_partial_failure(chunk.len());
            return members;
        }

        let acknowledged: HashSet<VenueOrderId> = entries
            .into_iter()
            .filter_map(Value::as_object)
            .filter(|entry| is_truthy_flag(entry.get("result")))
            .filter_map(venue_order_id_from_entry)
            .collect();

        let mut unacknowledged = Vec::new();
        for candidate in chunk {
            if acknowledged.contains(&candidate.venue_order_id) {
                self.mark_canceled(candidate.order);
                progress.settle(candidate.order.client_order_id.clone(), CancelOutcome::Canceled);
            } else {
                unacknowledged.push(candidate.order);
            }
        }

        if !unacknowledged.is_empty() {
            tracing::info!(
                batch = chunk.first().map_or(0, |c| c.batch),
                unacknowledged = unacknowledged.len(),
                "Bulk cancel partially acknowledged; falling back to single cancels"
            );
            metrics::record_batch_partial_failure(unacknowledged.len());
        }
        unacknowledged
    }

    async fn cancel_individually(&self, orders: Vec<&TrackedOrder>, progress: &mut CancelProgress) {
        let mut pending: FuturesUnordered<_> = orders
            .into_iter()
            .map(|order| async move { (order.client_order_id.clone(), self.cancel_order(order).await) })
            .collect();

        while let Some((client_order_id, result)) = pending.next().await {
            let outcome = match result {
                Ok(()) => CancelOutcome::Canceled,
                Err(e) => {
                    tracing::warn!(order = %client_order_id, error = %e, "Single cancel failed");
                    CancelOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            progress.settle(client_order_id, outcome);
        }
    }

    /// Cancel one order through the single-cancel endpoint.
    ///
    /// A venue answer saying the order does not exist counts as canceled.
    ///
    /// # Errors
    ///
    /// Returns `CancelError` when no venue id can be resolved, the order
    /// already ended otherwise, or the venue refuses the cancel.
    pub async fn cancel_order(&self, order: &TrackedOrder) -> Result<(), CancelError> {
        let current = self.current(order);
        if let Some(settled) = Self::settled(&current) {
            return settled;
        }

        let venue_order_id = match self.resolver.resolve_missing_id(&current).await {
            Resolution::Resolved(id) => id,
            Resolution::Unresolved | Resolution::Failed => {
                tracing::error!(
                    order = %current.client_order_id,
                    age_secs = current.age(Utc::now()).to_std().unwrap_or_default().as_secs_f64(),
                    "Cannot cancel without venue order id"
                );
                return Err(CancelError::IdentifierUnresolved(current.client_order_id));
            }
        };

        // Resolution may have synced a terminal state from the listings.
        let current = self.current(&current);
        if let Some(settled) = Self::settled(&current) {
            return settled;
        }

        let endpoint = VenueEndpoint::CancelOrder;
        let params = request_params([
            ("market", current.trading_pair.venue_symbol()),
            ("order_id", venue_order_id.to_string()),
        ]);
        tracing::info!(order = %current.client_order_id, venue_order_id = %venue_order_id, "Submitting cancel");

        let result = match self.venue.post(endpoint.path(), params, true).await {
            Ok(response) => extract_result(&response, endpoint.context())
                .map(|_| ())
                .map_err(VenueError::from),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.mark_canceled(&current);
                Ok(())
            }
            Err(e) if e.is_missing_order() => {
                tracing::warn!(
                    order = %current.client_order_id,
                    reason = %e,
                    "Order not present on venue; treating as canceled"
                );
                self.mark_canceled(&current);
                Ok(())
            }
            Err(e) => Err(CancelError::CancelRejected {
                client_order_id: current.client_order_id,
                source: e,
            }),
        }
    }

    fn current(&self, order: &TrackedOrder) -> TrackedOrder {
        self.tracker
            .tracked_order(&order.client_order_id)
            .unwrap_or_else(|| order.clone())
    }

    fn settled(order: &TrackedOrder) -> Option<Result<(), CancelError>> {
        match order.state {
            OrderState::Open => None,
            OrderState::Canceled => Some(Ok(())),
            state @ (OrderState::Filled | OrderState::Failed) => Some(Err(CancelError::AlreadyTerminal {
                client_order_id: order.client_order_id.clone(),
                state,
            })),
        }
    }

    fn mark_canceled(&self, order: &TrackedOrder) {
        let update = OrderUpdate::for_order(order, OrderState::Canceled, Utc::now());
        self.tracker.process_order_update(update);
    }
}
