//! Order entry normalization and the status rule table.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{JsonMap, decimal_field, first_field, string_field, timestamp_from_value};
use crate::domain::order::{ClientOrderId, OrderState, TradingPair, VenueOrderId};

/// Fields that may carry the venue order id.
pub const VENUE_ID_FIELDS: &[&str] = &["order_id", "orderId", "id"];

/// Fields that may carry the client order id.
pub const CLIENT_ID_FIELDS: &[&str] = &[
    "client_id",
    "clientId",
    "clientOrderId",
    "client_oid",
    "clientOid",
];

const SYMBOL_FIELDS: &[&str] = &["market", "symbol"];
const TIMESTAMP_FIELDS: &[&str] = &["mtime", "update_time", "ctime"];
const REMAINING_FIELDS: &[&str] = &["left", "remain", "unfilled_amount", "remain_amount"];

// =============================================================================
// Status Rule Table
// =============================================================================

/// One row of the status rule table.
#[derive(Debug, Clone, Copy)]
pub struct StatusRule {
    /// Label used in tests and diagnostics.
    pub name: &'static str,
    /// Returns a state when the rule applies to the entry.
    pub derive: fn(&JsonMap) -> Option<OrderState>,
}

/// Rules evaluated top to bottom; the first one that applies decides.
/// Entries no rule recognizes are `Open`.
pub const STATUS_RULES: &[StatusRule] = &[
    StatusRule {
        name: "numeric_status",
        derive: numeric_status,
    },
    StatusRule {
        name: "filled_status_text",
        derive: filled_status_text,
    },
    StatusRule {
        name: "canceled_status_text",
        derive: canceled_status_text,
    },
    StatusRule {
        name: "cancel_flag",
        derive: cancel_flag,
    },
    StatusRule {
        name: "nothing_remaining",
        derive: nothing_remaining,
    },
];

/// Derive the canonical state of a venue order entry.
#[must_use]
pub fn state_from_entry(entry: &JsonMap) -> OrderState {
    STATUS_RULES
        .iter()
        .find_map(|rule| (rule.derive)(entry))
        .unwrap_or(OrderState::Open)
}

// Venue event codes: 1 = put, 2 = update, 3 = finish.
fn numeric_status(entry: &JsonMap) -> Option<OrderState> {
    match entry.get("status").and_then(Value::as_i64)? {
        1 | 2 => Some(OrderState::Open),
        3 => Some(OrderState::Filled),
        _ => None,
    }
}

fn status_text(entry: &JsonMap) -> Option<String> {
    entry
        .get("status")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_lowercase())
}

fn filled_status_text(entry: &JsonMap) -> Option<OrderState> {
    status_text(entry)
        .filter(|s| matches!(s.as_str(), "filled" | "finished" | "done" | "success"))
        .map(|_| OrderState::Filled)
}

fn canceled_status_text(entry: &JsonMap) -> Option<OrderState> {
    status_text(entry)
        .filter(|s| matches!(s.as_str(), "cancelled" | "canceled" | "cancel"))
        .map(|_| OrderState::Canceled)
}

fn cancel_flag(entry: &JsonMap) -> Option<OrderState> {
    let flagged = match entry.get("is_cancel") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        _ => false,
    };
    flagged.then_some(OrderState::Canceled)
}

fn nothing_remaining(entry: &JsonMap) -> Option<OrderState> {
    decimal_field(entry, REMAINING_FIELDS)
        .filter(rust_decimal::Decimal::is_zero)
        .map(|_| OrderState::Filled)
}

// =============================================================================
// Canonical Fields
// =============================================================================

/// Canonical view of one venue order entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalOrderFields {
    /// Instrument derived from the venue market symbol.
    pub trading_pair: TradingPair,
    /// Venue order id, if present.
    pub venue_order_id: Option<VenueOrderId>,
    /// Client order id, if present.
    pub client_order_id: Option<ClientOrderId>,
    /// Derived state.
    pub state: OrderState,
    /// Last modification time.
    pub timestamp: DateTime<Utc>,
}

/// Venue order id carried by an entry.
#[must_use]
pub fn venue_order_id_from_entry(entry: &JsonMap) -> Option<VenueOrderId> {
    string_field(entry, VENUE_ID_FIELDS).map(VenueOrderId::new)
}

/// Client order id carried by an entry.
#[must_use]
pub fn client_order_id_from_entry(entry: &JsonMap) -> Option<ClientOrderId> {
    first_field(entry, CLIENT_ID_FIELDS)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ClientOrderId::from)
}

/// Last modification time of an entry, `now` when absent.
#[must_use]
pub fn entry_timestamp(entry: &JsonMap, now: DateTime<Utc>) -> DateTime<Utc> {
    timestamp_from_value(first_field(entry, TIMESTAMP_FIELDS), now)
}

/// Normalize an order entry from a push message or listing.
///
/// Returns `None` when the entry names no market symbol.
#[must_use]
pub fn normalize_order_entry(entry: &JsonMap, now: DateTime<Utc>) -> Option<CanonicalOrderFields> {
    let symbol = string_field(entry, SYMBOL_FIELDS)?;
    let trading_pair = TradingPair::from_venue_symbol(&symbol).ok()?;

    Some(CanonicalOrderFields {
        trading_pair,
        venue_order_id: venue_order_id_from_entry(entry),
        client_order_id: client_order_id_from_entry(entry),
        state: state_from_entry(entry),
        timestamp: entry_timestamp(entry, now),
    })
}
