//! Trade fill normalization.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{JsonMap, decimal_field, first_field, string_field, timestamp_from_value};
use crate::domain::order::{TradeId, VenueOrderId};

const BASE_AMOUNT_FIELDS: &[&str] = &["amount", "number", "deal_stock"];
const TRADE_ID_FIELDS: &[&str] = &["id", "deal_id"];
const FEE_ASSET_FIELDS: &[&str] = &["fee_asset", "fee_currency"];
const FILL_TIME_FIELDS: &[&str] = &["ctime", "time"];

/// Canonical view of one fill entry from the deals listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalFill {
    /// Fill id, synthesized from the order id and position when absent.
    pub trade_id: TradeId,
    /// Execution price.
    pub fill_price: Decimal,
    /// Base amount filled.
    pub fill_base_amount: Decimal,
    /// Quote amount exchanged.
    pub fill_quote_amount: Decimal,
    /// Fee amount.
    pub fee_amount: Decimal,
    /// Fee asset.
    pub fee_asset: String,
    /// Execution time.
    pub timestamp: DateTime<Utc>,
}

/// Normalize the `index`-th fill of `venue_order_id`.
///
/// Returns `None` for entries without a positive base amount, and for
/// entries whose derived price or quote amount falls outside the decimal
/// range. A missing or zero price is derived as `deal_money / amount`.
#[must_use]
pub fn normalize_fill_entry(
    entry: &JsonMap,
    index: usize,
    venue_order_id: &VenueOrderId,
    quote_asset: &str,
    now: DateTime<Utc>,
) -> Option<CanonicalFill> {
    let base = decimal_field(entry, BASE_AMOUNT_FIELDS).unwrap_or(Decimal::ZERO);
    if base <= Decimal::ZERO {
        return None;
    }

    let deal_money = decimal_field(entry, &["deal_money"]).filter(|money| *money > Decimal::ZERO);
    let explicit_price = decimal_field(entry, &["price"]).unwrap_or(Decimal::ZERO);
    let price = if explicit_price > Decimal::ZERO {
        explicit_price
    } else {
        match deal_money {
            Some(money) => checked_amount(money.checked_div(base), venue_order_id, "price")?,
            None => Decimal::ZERO,
        }
    };
    let quote = match deal_money {
        Some(money) => money,
        None => checked_amount(price.checked_mul(base), venue_order_id, "quote amount")?,
    };

    let trade_id = string_field(entry, TRADE_ID_FIELDS)
        .unwrap_or_else(|| format!("{venue_order_id}-{index}"));
    let fee_asset = string_field(entry, FEE_ASSET_FIELDS)
        .unwrap_or_else(|| quote_asset.to_string())
        .to_uppercase();

    Some(CanonicalFill {
        trade_id: TradeId::new(trade_id),
        fill_price: price,
        fill_base_amount: base,
        fill_quote_amount: quote,
        fee_amount: decimal_field(entry, &["fee"]).unwrap_or(Decimal::ZERO),
        fee_asset,
        timestamp: timestamp_from_value(first_field(entry, FILL_TIME_FIELDS), now),
    })
}

fn checked_amount(
    value: Option<Decimal>,
    venue_order_id: &VenueOrderId,
    kind: &'static str,
) -> Option<Decimal> {
    if value.is_none() {
        tracing::warn!(order = %venue_order_id, kind, "Fill amount out of range; entry skipped");
    }
    value
}
