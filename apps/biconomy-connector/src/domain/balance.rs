//! Balance Records
//!
//! Per-asset available/total amounts as reported by the venue.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Available and total amount for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    /// Upper-case asset symbol (e.g. `BTC`).
    pub asset: String,
    /// Amount free to trade.
    pub available: Decimal,
    /// Available plus frozen amounts.
    pub total: Decimal,
}

impl BalanceRecord {
    /// Create a record, upper-casing the asset symbol.
    #[must_use]
    pub fn new(asset: impl AsRef<str>, available: Decimal, total: Decimal) -> Self {
        Self {
            asset: asset.as_ref().trim().to_uppercase(),
            available,
            total,
        }
    }

    /// A zero balance for `asset`.
    #[must_use]
    pub fn zero(asset: impl AsRef<str>) -> Self {
        Self::new(asset, Decimal::ZERO, Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_normalizes_asset_symbol() {
        let record = BalanceRecord::new(" usdt ", dec!(5), dec!(7));
        assert_eq!(record.asset, "USDT");
        assert_eq!(record.available, dec!(5));
        assert_eq!(record.total, dec!(7));
    }

    #[test]
    fn zero_record() {
        let record = BalanceRecord::zero("eth");
        assert_eq!(record.asset, "ETH");
        assert!(record.available.is_zero());
        assert!(record.total.is_zero());
    }
}
