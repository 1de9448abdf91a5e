//! Order Entry Matching
//!
//! Pure scoring of a venue listing entry against a tracked order, used to
//! recover a venue id when the placement acknowledgement was lost.
//!
//! # Rules
//!
//! - An embedded client id equal to the order's client id is an exact match.
//! - An embedded venue id equal to the venue id already held is an exact match.
//! - Otherwise side, amount and (for priced orders) price are compared. Any
//!   disagreement rejects the entry; at least two agreeing signals match.

use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::order::TrackedOrder;
use crate::domain::payload::{CLIENT_ID_FIELDS, JsonMap, VENUE_ID_FIELDS, decimal_field, first_field};

const SIDE_FIELDS: &[&str] = &["side", "type"];
const AMOUNT_FIELDS: &[&str] = &["amount", "number", "deal_stock", "size"];
const PRICE_FIELDS: &[&str] = &["price", "deal_price", "avg_price"];

/// Agreeing heuristic signals needed for a match.
pub const MIN_HEURISTIC_SIGNALS: u8 = 2;

// =============================================================================
// Tolerance
// =============================================================================

/// Closeness policy for amounts and prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TolerancePolicy {
    /// Allowed deviation relative to the reference value.
    pub relative: Decimal,
    /// Smallest allowed absolute deviation.
    pub absolute_floor: Decimal,
}

impl Default for TolerancePolicy {
    fn default() -> Self {
        Self {
            relative: Decimal::new(1, 4),
            absolute_floor: Decimal::new(1, 8),
        }
    }
}

impl TolerancePolicy {
    /// Whether `candidate` is within tolerance of `reference`.
    ///
    /// A zero reference only matches an exact zero.
    #[must_use]
    pub fn values_close(&self, candidate: Decimal, reference: Decimal) -> bool {
        if reference.is_zero() {
            return candidate == reference;
        }
        let Some(scaled) = reference.abs().checked_mul(self.relative) else {
            return false;
        };
        let tolerance = scaled.max(self.absolute_floor);
        candidate
            .checked_sub(reference)
            .is_some_and(|gap| gap.abs() <= tolerance)
    }
}

// =============================================================================
// Scoring
// =============================================================================

/// Identifier that produced an exact match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExactKey {
    /// Embedded client id.
    ClientId,
    /// Venue id already held by the order.
    VenueId,
}

/// Outcome of comparing one entry with one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScore {
    /// Identifier equality.
    Exact(ExactKey),
    /// Number of agreeing heuristic signals, with none disagreeing.
    Heuristic(u8),
    /// At least one heuristic signal disagrees.
    Contradiction,
    /// No identifier and no usable signal.
    NoMatch,
}

impl MatchScore {
    /// Whether the entry identifies the order.
    #[must_use]
    pub const fn is_match(self) -> bool {
        match self {
            Self::Exact(_) => true,
            Self::Heuristic(signals) => signals >= MIN_HEURISTIC_SIGNALS,
            Self::Contradiction | Self::NoMatch => false,
        }
    }

    /// Ordering key: exact matches outrank any heuristic.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Exact(_) => u8::MAX,
            Self::Heuristic(signals) => signals,
            Self::Contradiction | Self::NoMatch => 0,
        }
    }
}

/// Score `entry` against `order`.
#[must_use]
pub fn score_entry(order: &TrackedOrder, entry: &JsonMap, policy: &TolerancePolicy) -> MatchScore {
    if any_field_equals(entry, CLIENT_ID_FIELDS, order.client_order_id.as_str()) {
        return MatchScore::Exact(ExactKey::ClientId);
    }
    if let Some(venue_id) = order.known_venue_id() {
        if any_field_equals(entry, VENUE_ID_FIELDS, venue_id.as_str()) {
            return MatchScore::Exact(ExactKey::VenueId);
        }
    }

    let mut signals = 0u8;

    if let Some(code) = first_field(entry, SIDE_FIELDS).and_then(side_code) {
        if code != order.side.venue_code() {
            return MatchScore::Contradiction;
        }
        signals += 1;
    }

    let amount = decimal_field(entry, AMOUNT_FIELDS).unwrap_or(Decimal::ZERO);
    if amount > Decimal::ZERO && order.amount > Decimal::ZERO {
        if !policy.values_close(amount, order.amount) {
            return MatchScore::Contradiction;
        }
        signals += 1;
    }

    if order.price > Decimal::ZERO {
        let price = decimal_field(entry, PRICE_FIELDS).unwrap_or(Decimal::ZERO);
        if price > Decimal::ZERO {
            if !policy.values_close(price, order.price) {
                return MatchScore::Contradiction;
            }
            signals += 1;
        }
    }

    if signals == 0 {
        MatchScore::NoMatch
    } else {
        MatchScore::Heuristic(signals)
    }
}

fn any_field_equals(entry: &JsonMap, fields: &[&str], expected: &str) -> bool {
    fields.iter().filter_map(|key| entry.get(*key)).any(|value| match value {
        Value::String(s) => s.trim() == expected,
        Value::Number(n) => n.to_string() == expected,
        _ => false,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn side_code(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => {
            let lowered = s.trim().to_lowercase();
            match lowered.as_str() {
                "buy" => Some(2),
                "sell" => Some(1),
                digits if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
                    digits.parse().ok()
                }
                _ => None,
            }
        }
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{ClientOrderId, TradeSide, TradingPair, VenueIdentity, VenueOrderId};
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn order(price: Decimal) -> TrackedOrder {
        TrackedOrder::new(
            ClientOrderId::from("x-HBOTBICO-7"),
            TradingPair::new("BTC", "USDT"),
            TradeSide::Buy,
            price,
            dec!(0.25),
            Utc::now(),
        )
    }

    fn score(order: &TrackedOrder, value: Value) -> MatchScore {
        score_entry(order, value.as_object().unwrap(), &TolerancePolicy::default())
    }

    #[test]
    fn tolerance_is_relative_with_absolute_floor() {
        let policy = TolerancePolicy::default();
        assert!(policy.values_close(dec!(100.009), dec!(100)));
        assert!(!policy.values_close(dec!(100.02), dec!(100)));
        assert!(policy.values_close(dec!(0.000000015), dec!(0.00000001)));
        assert!(policy.values_close(dec!(0), dec!(0)));
        assert!(!policy.values_close(dec!(0.000000001), dec!(0)));
        assert!(!policy.values_close(Decimal::MAX, dec!(-1)));
        assert!(!policy.values_close(Decimal::MAX, dec!(30000)));
    }

    #[test]
    fn client_id_is_exact_match() {
        let order = order(dec!(30000));
        let result = score(&order, json!({"clientOrderId": "x-HBOTBICO-7", "side": "sell"}));
        assert_eq!(result, MatchScore::Exact(ExactKey::ClientId));
    }

    #[test]
    fn held_venue_id_is_exact_match() {
        let order = order(dec!(30000)).with_venue(VenueIdentity::Unconfirmed(VenueOrderId::from("55")));
        assert_eq!(score(&order, json!({"id": 55})), MatchScore::Exact(ExactKey::VenueId));
    }

    #[test]
    fn side_amount_and_price_agree() {
        let order = order(dec!(30000));
        let result = score(&order, json!({"side": 2, "amount": "0.25", "price": "30000.5"}));
        assert_eq!(result, MatchScore::Heuristic(3));
        assert!(result.is_match());
    }

    #[test]
    fn two_signals_suffice_for_market_orders() {
        let order = order(Decimal::ZERO);
        let result = score(&order, json!({"side": "BUY", "number": "0.25"}));
        assert_eq!(result, MatchScore::Heuristic(2));
        assert!(result.is_match());
    }

    #[test]
    fn amount_and_price_match_without_side() {
        let order = order(dec!(30000));
        let result = score(&order, json!({"id": 9, "amount": "0.25", "price": "30000"}));
        assert_eq!(result, MatchScore::Heuristic(2));
        assert!(result.is_match());

        let unreadable_side = score(&order, json!({"side": "n/a", "amount": "0.25", "price": "30000"}));
        assert_eq!(unreadable_side, MatchScore::Heuristic(2));
    }

    #[test]
    fn sideless_entry_with_distant_price_is_rejected() {
        let order = order(dec!(30000));
        let result = score(&order, json!({"amount": "0.25", "price": "31000"}));
        assert_eq!(result, MatchScore::Contradiction);
    }

    #[test]
    fn single_signal_is_not_enough() {
        let order = order(Decimal::ZERO);
        let result = score(&order, json!({"side": "buy"}));
        assert_eq!(result, MatchScore::Heuristic(1));
        assert!(!result.is_match());
    }

    #[test]
    fn contradicting_side_rejects_entry() {
        let order = order(dec!(30000));
        let result = score(&order, json!({"side": "1", "amount": "0.25", "price": "30000"}));
        assert_eq!(result, MatchScore::Contradiction);
        assert!(!result.is_match());
    }

    #[test]
    fn distant_amount_rejects_entry() {
        let order = order(dec!(30000));
        let result = score(&order, json!({"side": 2, "amount": "0.3", "price": "30000"}));
        assert_eq!(result, MatchScore::Contradiction);
    }

    #[test]
    fn exact_outranks_heuristic() {
        assert!(MatchScore::Exact(ExactKey::ClientId).rank() > MatchScore::Heuristic(3).rank());
    }

    #[test]
    fn unrelated_entry_does_not_match() {
        let order = order(dec!(30000));
        assert_eq!(score(&order, json!({"status": 1})), MatchScore::NoMatch);
    }

    proptest! {
        #[test]
        fn side_contradiction_always_rejects(amount in 1u32..1_000_000, price in 1u32..1_000_000) {
            let mut order = order(Decimal::from(price));
            order.amount = Decimal::from(amount);
            let entry = json!({"side": "sell", "amount": amount.to_string(), "price": price.to_string()});
            prop_assert_eq!(score(&order, entry), MatchScore::Contradiction);
        }
    }
}
