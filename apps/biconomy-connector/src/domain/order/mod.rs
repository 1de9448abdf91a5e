//! Order Model
//!
//! Canonical identifiers, lifecycle states and the update records proposed
//! to the order tracker.
//!
//! # Identity
//!
//! An order is always known by its client-assigned id. The venue-assigned id
//! may be unknown (placement acknowledgement lost), unconfirmed (seen but not
//! yet verified against a listing) or confirmed. A confirmed venue id is
//! never replaced by a different value.

mod state_machine;

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use state_machine::{OrderStateMachine, Transition};

// =============================================================================
// Identifiers
// =============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// The raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Client-assigned order id (prefix `x-HBOTBICO`, at most 32 characters).
    ClientOrderId
);

string_id!(
    /// Venue-assigned order id.
    VenueOrderId
);

string_id!(
    /// Venue-assigned fill id, unique within an order's history.
    TradeId
);

// =============================================================================
// Trading Pair
// =============================================================================

/// Instrument in `BASE-QUOTE` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradingPair {
    base: String,
    quote: String,
}

impl TradingPair {
    /// Build a pair from its two assets.
    #[must_use]
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self {
            base: base.as_ref().trim().to_uppercase(),
            quote: quote.as_ref().trim().to_uppercase(),
        }
    }

    /// Parse `BASE-QUOTE`, splitting on the last hyphen.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::InvalidTradingPair` if either side is empty.
    pub fn parse(raw: &str) -> Result<Self, OrderError> {
        let trimmed = raw.trim();
        match trimmed.rsplit_once('-') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self::new(base, quote))
            }
            _ => Err(OrderError::InvalidTradingPair(raw.to_string())),
        }
    }

    /// Parse the venue's `BASE_QUOTE` market symbol.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::InvalidTradingPair` for symbols without a separator.
    pub fn from_venue_symbol(symbol: &str) -> Result<Self, OrderError> {
        Self::parse(&symbol.replace('_', "-"))
    }

    /// The venue market symbol (`BASE_QUOTE`).
    #[must_use]
    pub fn venue_symbol(&self) -> String {
        format!("{}_{}", self.base, self.quote)
    }

    /// Base asset.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Quote asset.
    #[must_use]
    pub fn quote(&self) -> &str {
        &self.quote
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

// =============================================================================
// Side and State
// =============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    /// Buy the base asset.
    Buy,
    /// Sell the base asset.
    Sell,
}

impl TradeSide {
    /// Numeric side code used by the venue (sell = 1, buy = 2).
    #[must_use]
    pub const fn venue_code(self) -> i64 {
        match self {
            Self::Sell => 1,
            Self::Buy => 2,
        }
    }

    /// Side for a venue side code.
    #[must_use]
    pub const fn from_venue_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Sell),
            2 => Some(Self::Buy),
            _ => None,
        }
    }
}

/// Order lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    /// Resting on the venue (possibly partially filled).
    Open,
    /// Completely filled.
    Filled,
    /// Canceled on the venue.
    Canceled,
    /// Rejected or declared lost.
    Failed,
}

impl OrderState {
    /// Whether no further transitions are permitted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Failed)
    }

    /// Lower-case label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Filled => "filled",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tracked Order
// =============================================================================

/// What is known about the venue-assigned id of an order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VenueIdentity {
    /// No venue id seen.
    #[default]
    Unknown,
    /// A venue id was seen but not verified.
    Unconfirmed(VenueOrderId),
    /// The venue id is confirmed and immutable.
    Confirmed(VenueOrderId),
}

impl VenueIdentity {
    /// Whether a venue id has been confirmed.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

/// Local record of an order this connector submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedOrder {
    /// Client-assigned id.
    pub client_order_id: ClientOrderId,
    /// Venue-assigned id, if known.
    pub venue: VenueIdentity,
    /// Instrument.
    pub trading_pair: TradingPair,
    /// Side.
    pub side: TradeSide,
    /// Requested limit price (zero for market orders).
    pub price: Decimal,
    /// Requested base amount.
    pub amount: Decimal,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: OrderState,
}

impl TrackedOrder {
    /// Create an open order with no venue id.
    #[must_use]
    pub fn new(
        client_order_id: ClientOrderId,
        trading_pair: TradingPair,
        side: TradeSide,
        price: Decimal,
        amount: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client_order_id,
            venue: VenueIdentity::Unknown,
            trading_pair,
            side,
            price,
            amount,
            created_at,
            state: OrderState::Open,
        }
    }

    /// Builder-style venue identity.
    #[must_use]
    pub fn with_venue(mut self, venue: VenueIdentity) -> Self {
        self.venue = venue;
        self
    }

    /// The confirmed venue id, if any.
    #[must_use]
    pub const fn confirmed_venue_id(&self) -> Option<&VenueOrderId> {
        match &self.venue {
            VenueIdentity::Confirmed(id) => Some(id),
            _ => None,
        }
    }

    /// Any venue id seen, confirmed or not.
    #[must_use]
    pub const fn known_venue_id(&self) -> Option<&VenueOrderId> {
        match &self.venue {
            VenueIdentity::Confirmed(id) | VenueIdentity::Unconfirmed(id) => Some(id),
            VenueIdentity::Unknown => None,
        }
    }

    /// Record `id` as the confirmed venue id.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::VenueIdConflict` if a different id is already
    /// confirmed.
    pub fn confirm_venue_id(&mut self, id: VenueOrderId) -> Result<(), OrderError> {
        if let VenueIdentity::Confirmed(existing) = &self.venue {
            if *existing != id {
                return Err(OrderError::VenueIdConflict {
                    client_order_id: self.client_order_id.clone(),
                    confirmed: existing.clone(),
                    proposed: id,
                });
            }
            return Ok(());
        }
        self.venue = VenueIdentity::Confirmed(id);
        Ok(())
    }

    /// Time elapsed since submission.
    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    /// Whether the order is still open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.state.is_terminal()
    }
}

// =============================================================================
// Update Records
// =============================================================================

/// A proposed state transition for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUpdate {
    client_order_id: Option<ClientOrderId>,
    venue_order_id: Option<VenueOrderId>,
    /// Instrument.
    pub trading_pair: TradingPair,
    /// Proposed state.
    pub new_state: OrderState,
    /// Venue or local time of the change.
    pub timestamp: DateTime<Utc>,
}

impl OrderUpdate {
    /// Create an update.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::MissingIdentifier` when both ids are absent.
    pub fn new(
        client_order_id: Option<ClientOrderId>,
        venue_order_id: Option<VenueOrderId>,
        trading_pair: TradingPair,
        new_state: OrderState,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if client_order_id.is_none() && venue_order_id.is_none() {
            return Err(OrderError::MissingIdentifier);
        }
        Ok(Self {
            client_order_id,
            venue_order_id,
            trading_pair,
            new_state,
            timestamp,
        })
    }

    /// Update for a tracked order, carrying its client id and its venue id
    /// only once confirmed.
    ///
    /// A tracker confirms any venue id an update carries, so an unconfirmed
    /// id must not travel with a locally decided transition.
    #[must_use]
    pub fn for_order(order: &TrackedOrder, new_state: OrderState, timestamp: DateTime<Utc>) -> Self {
        Self {
            client_order_id: Some(order.client_order_id.clone()),
            venue_order_id: order.confirmed_venue_id().cloned(),
            trading_pair: order.trading_pair.clone(),
            new_state,
            timestamp,
        }
    }

    /// Client id, if carried.
    #[must_use]
    pub const fn client_order_id(&self) -> Option<&ClientOrderId> {
        self.client_order_id.as_ref()
    }

    /// Venue id, if carried.
    #[must_use]
    pub const fn venue_order_id(&self) -> Option<&VenueOrderId> {
        self.venue_order_id.as_ref()
    }

    /// Whether this update references `order` by at least one identifier.
    #[must_use]
    pub fn references(&self, order: &TrackedOrder) -> bool {
        let client_match = self.client_order_id.as_ref() == Some(&order.client_order_id);
        let venue_match = match (&self.venue_order_id, order.known_venue_id()) {
            (Some(update_id), Some(order_id)) => update_id == order_id,
            _ => false,
        };
        client_match || venue_match
    }
}

/// Fee charged on a fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeFee {
    /// Asset the fee was charged in.
    pub asset: String,
    /// Fee amount.
    pub amount: Decimal,
}

/// One fill of an order. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeUpdate {
    /// Fill id.
    pub trade_id: TradeId,
    /// Client id of the filled order, if known.
    pub client_order_id: Option<ClientOrderId>,
    /// Venue id of the filled order.
    pub venue_order_id: VenueOrderId,
    /// Instrument.
    pub trading_pair: TradingPair,
    /// Execution price.
    pub fill_price: Decimal,
    /// Base amount filled.
    pub fill_base_amount: Decimal,
    /// Quote amount exchanged.
    pub fill_quote_amount: Decimal,
    /// Fee charged.
    pub fee: TradeFee,
    /// Execution time.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Errors
// =============================================================================

/// Order model errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// An update carried neither a client nor a venue id.
    #[error("order update carries no identifier")]
    MissingIdentifier,

    /// Malformed instrument.
    #[error("invalid trading pair: {0}")]
    InvalidTradingPair(String),

    /// Attempt to replace a confirmed venue id.
    #[error("order {client_order_id} already confirmed as {confirmed}, refusing {proposed}")]
    VenueIdConflict {
        /// Order whose id was challenged.
        client_order_id: ClientOrderId,
        /// Id already confirmed.
        confirmed: VenueOrderId,
        /// Rejected id.
        proposed: VenueOrderId,
    },
}

// =============================================================================
// Tests
// =============================================================================
