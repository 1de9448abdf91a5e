//! Identifier Resolver
//!
//! Recovers the venue-assigned id of a tracked order by scanning the venue's
//! pending and finished listings for the order's market and scoring every
//! entry with `domain::matching`. Orders that stay unresolved past the age
//! threshold are declared failed so they cannot block cancellation forever.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::application::ports::{
    OrderTrackerPort, VenueEndpoint, VenueRestPort, request_params,
};
use crate::domain::matching::{MatchScore, TolerancePolicy, score_entry};
use crate::domain::order::{OrderState, OrderUpdate, TrackedOrder, VenueIdentity, VenueOrderId};
use crate::domain::payload::{
    entry_timestamp, extract_entries, extract_result, state_from_entry, venue_order_id_from_entry,
};
use crate::infrastructure::metrics;

/// Resolver configuration.
#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    /// Age after which an unresolved order is declared failed.
    pub fail_after: Duration,
    /// Listing page size.
    pub page_size: u32,
    /// Amount/price closeness policy.
    pub tolerance: TolerancePolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fail_after: Duration::from_secs(30),
            page_size: 200,
            tolerance: TolerancePolicy::default(),
        }
    }
}

/// Outcome of a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The venue id is known and confirmed in the tracker.
    Resolved(VenueOrderId),
    /// Not found yet; the caller may retry later.
    Unresolved,
    /// Not found past the age threshold; a `Failed` update was issued.
    Failed,
}

impl Resolution {
    /// The resolved id, if any.
    #[must_use]
    pub const fn venue_order_id(&self) -> Option<&VenueOrderId> {
        match self {
            Self::Resolved(id) => Some(id),
            Self::Unresolved | Self::Failed => None,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Resolved(_) => "resolved",
            Self::Unresolved => "unresolved",
            Self::Failed => "failed",
        }
    }
}

struct Candidate {
    score: MatchScore,
    venue_order_id: VenueOrderId,
    state: OrderState,
    timestamp: chrono::DateTime<Utc>,
    listing: VenueEndpoint,
}

/// Venue id recovery service.
pub struct IdentifierResolver<V, T>
where
    V: VenueRestPort,
    T: OrderTrackerPort,
{
    venue: Arc<V>,
    tracker: Arc<T>,
    config: ResolverConfig,
}

impl<V, T> IdentifierResolver<V, T>
where
    V: VenueRestPort,
    T: OrderTrackerPort,
{
    /// Create a new resolver.
    #[must_use]
    pub const fn new(venue: Arc<V>, tracker: Arc<T>, config: ResolverConfig) -> Self {
        Self {
            venue,
            tracker,
            config,
        }
    }

    /// Return the confirmed venue id, scanning the listings when none is
    /// confirmed yet.
    pub async fn resolve_missing_id(&self, order: &TrackedOrder) -> Resolution {
        match order.confirmed_venue_id() {
            Some(id) => Resolution::Resolved(id.clone()),
            None => self.resolve(order).await,
        }
    }

    /// Scan the pending then finished listings for `order`.
    ///
    /// An identifier match stops the scan; otherwise the best heuristic
    /// match across both listings wins, earlier entries breaking ties.
    #[tracing::instrument(skip(self, order), fields(order = %order.client_order_id))]
    pub async fn resolve(&self, order: &TrackedOrder) -> Resolution {
        let symbol = order.trading_pair.venue_symbol();
        let mut best: Option<Candidate> = None;

        for listing in [VenueEndpoint::PendingOrders, VenueEndpoint::FinishedOrders] {
            let params = request_params([
                ("market", symbol.clone()),
                ("page", "1".to_string()),
                ("page_size", self.config.page_size.to_string()),
            ]);
            let response = match self.venue.post(listing.path(), params, true).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!(listing = listing.context(), error = %e, "Listing unavailable");
                    continue;
                }
            };
            let result = match extract_result(&response, listing.context()) {
                Ok(result) => result,
                Err(e) => {
                    tracing::debug!(listing = listing.context(), error = %e, "Listing rejected");
                    continue;
                }
            };

            let entries = extract_entries(result);
            tracing::debug!(listing = listing.context(), entries = entries.len(), "Scanning listing");

            for entry in entries.into_iter().filter_map(serde_json::Value::as_object) {
                let score = score_entry(order, entry, &self.config.tolerance);
                if !score.is_match() {
                    continue;
                }
                let Some(venue_order_id) = venue_order_id_from_entry(entry) else {
                    continue;
                };
                if best.as_ref().is_none_or(|b| score.rank() > b.score.rank()) {
                    best = Some(Candidate {
                        score,
                        venue_order_id,
                        state: state_from_entry(entry),
                        timestamp: entry_timestamp(entry, Utc::now()),
                        listing,
                    });
                }
            }

            if best.as_ref().is_some_and(|b| matches!(b.score, MatchScore::Exact(_))) {
                break;
            }
        }

        let resolution = match best {
            Some(candidate) => self.adopt(order, candidate),
            None => self.escalate_if_stale(order),
        };
        metrics::record_resolution(resolution.label());
        resolution
    }

    fn adopt(&self, order: &TrackedOrder, candidate: Candidate) -> Resolution {
        if let Err(e) = self
            .tracker
            .confirm_venue_order_id(&order.client_order_id, candidate.venue_order_id.clone())
        {
            tracing::warn!(error = %e, "Listing match disagrees with tracked venue id");
            metrics::record_state_anomaly("venue_id_conflict");
            return Resolution::Unresolved;
        }

        tracing::info!(
            venue_order_id = %candidate.venue_order_id,
            listing = candidate.listing.context(),
            score = ?candidate.score,
            remote_state = %candidate.state,
            "Resolved venue order id"
        );

        if candidate.state.is_terminal() {
            let mut resolved = order.clone();
            resolved.venue = VenueIdentity::Confirmed(candidate.venue_order_id.clone());
            let update = OrderUpdate::for_order(&resolved, candidate.state, candidate.timestamp);
            self.tracker.process_order_update(update);
        }

        Resolution::Resolved(candidate.venue_order_id)
    }

    fn escalate_if_stale(&self, order: &TrackedOrder) -> Resolution {
        let now = Utc::now();
        let age = order.age(now).to_std().unwrap_or_default();
        if age <= self.config.fail_after {
            tracing::warn!(age_secs = age.as_secs_f64(), "Order not found in venue listings");
            return Resolution::Unresolved;
        }

        tracing::warn!(
            age_secs = age.as_secs_f64(),
            "Order not found in venue listings past age threshold; marking failed"
        );
        self.tracker
            .process_order_update(OrderUpdate::for_order(order, OrderState::Failed, now));
        Resolution::Failed
    }
}
