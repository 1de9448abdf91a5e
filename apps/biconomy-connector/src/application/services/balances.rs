//! Balance Reconciler
//!
//! Keeps the balance store in line with the venue: snapshots replace the
//! whole table, push updates patch single assets. A snapshot nothing can be
//! read from degrades to zero balances for the configured instruments.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;

use crate::application::ports::{
    BalanceStorePort, VenueEndpoint, VenueError, VenueRestPort, request_params,
};
use crate::domain::balance::BalanceRecord;
use crate::domain::order::TradingPair;
use crate::domain::payload::{extract_result, normalize_balance_entries};
use crate::infrastructure::metrics;

/// Sorted, de-duplicated base and quote assets of `pairs`.
#[must_use]
pub fn fallback_assets(pairs: &[TradingPair]) -> Vec<String> {
    pairs
        .iter()
        .flat_map(|pair| [pair.base().to_string(), pair.quote().to_string()])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Snapshot and push balance maintenance.
pub struct BalanceReconciler<V, B>
where
    V: VenueRestPort,
    B: BalanceStorePort,
{
    venue: Arc<V>,
    store: Arc<B>,
    trading_pairs: Vec<TradingPair>,
    degraded_logged: AtomicBool,
}

impl<V, B> BalanceReconciler<V, B>
where
    V: VenueRestPort,
    B: BalanceStorePort,
{
    /// Create a reconciler for the configured instruments.
    #[must_use]
    pub const fn new(venue: Arc<V>, store: Arc<B>, trading_pairs: Vec<TradingPair>) -> Self {
        Self {
            venue,
            store,
            trading_pairs,
            degraded_logged: AtomicBool::new(false),
        }
    }

    /// Fetch the balance snapshot and apply it.
    ///
    /// # Errors
    ///
    /// Returns `VenueError` when the request fails or the venue rejects it.
    /// The store is left untouched in that case.
    pub async fn refresh_balances(&self) -> Result<(), VenueError> {
        let endpoint = VenueEndpoint::Balances;
        let response = self
            .venue
            .post(endpoint.path(), request_params([]), true)
            .await?;
        let result = extract_result(&response, endpoint.context())?;
        let applied = self.apply_snapshot(result);
        tracing::debug!(assets = applied, "Balances refreshed");
        Ok(())
    }

    /// Replace the balance table with `raw`; returns the number of assets.
    ///
    /// Assets missing from the snapshot are dropped. The degraded warning is
    /// logged once per run of unreadable snapshots.
    pub fn apply_snapshot(&self, raw: &Value) -> usize {
        let mut records = normalize_balance_entries(raw);
        if records.is_empty() {
            records = self.fallback_records(raw);
        } else {
            self.degraded_logged.store(false, Ordering::Relaxed);
        }
        let count = records.len();
        self.store.replace_all(records);
        count
    }

    /// Patch the assets named by a push update; returns the number patched.
    pub fn apply_asset_update(&self, raw: &Value) -> usize {
        let records = normalize_balance_entries(raw);
        if records.is_empty() {
            tracing::debug!(payload = %raw, "Asset update without balance entries");
            metrics::record_malformed_payload("asset_update");
            return 0;
        }
        let count = records.len();
        for record in records {
            tracing::trace!(asset = %record.asset, available = %record.available, total = %record.total, "Balance patched");
            self.store.patch(record);
        }
        count
    }

    fn fallback_records(&self, raw: &Value) -> Vec<BalanceRecord> {
        let assets = fallback_assets(&self.trading_pairs);
        if !self.degraded_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                payload = %raw,
                fallback_assets = ?assets,
                "Balance snapshot has no usable entries; using zero balances for configured assets"
            );
        }
        metrics::record_malformed_payload("balance_snapshot");
        assets.into_iter().map(BalanceRecord::zero).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::testing::{LogCapture, ScriptedVenue};
    use crate::infrastructure::persistence::InMemoryBalanceStore;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn pairs(symbols: &[&str]) -> Vec<TradingPair> {
        symbols.iter().map(|s| TradingPair::parse(s).unwrap()).collect()
    }

    fn setup(
        symbols: &[&str],
    ) -> (
        Arc<ScriptedVenue>,
        Arc<InMemoryBalanceStore>,
        BalanceReconciler<ScriptedVenue, InMemoryBalanceStore>,
    ) {
        let venue = ScriptedVenue::new();
        let store = Arc::new(InMemoryBalanceStore::new());
        let reconciler = BalanceReconciler::new(Arc::clone(&venue), Arc::clone(&store), pairs(symbols));
        (venue, store, reconciler)
    }

    #[test]
    fn fallback_assets_are_sorted_and_unique() {
        let assets = fallback_assets(&pairs(&["ETH-USDT", "BTC-USDT", "ETH-BTC"]));
        assert_eq!(assets, vec!["BTC", "ETH", "USDT"]);
    }

    #[tokio::test]
    async fn snapshot_replaces_table_and_drops_missing_assets() {
        let (venue, store, reconciler) = setup(&["BTC-USDT"]);
        store.patch(BalanceRecord::new("DOGE", dec!(1), dec!(1)));
        venue.respond(
            VenueEndpoint::Balances,
            json!({"code": 0, "result": {
                "BTC": {"available": "0.5", "freeze": "0.25"},
                "USDT": {"available": "100", "freeze": "0", "other_freeze": "5"}
            }}),
        );

        reconciler.refresh_balances().await.unwrap();

        assert_eq!(store.balance("BTC"), Some(BalanceRecord::new("BTC", dec!(0.5), dec!(0.75))));
        assert_eq!(store.balance("USDT"), Some(BalanceRecord::new("USDT", dec!(100), dec!(105))));
        assert_eq!(store.balance("DOGE"), None);
    }

    #[test]
    fn unreadable_snapshot_falls_back_to_configured_assets() {
        let (_venue, store, reconciler) = setup(&["BTC-USDT", "ETH-USDT", "SOL-BTC"]);

        let count = reconciler.apply_snapshot(&json!({"status": "ok", "items": [{"foo": "bar"}]}));

        assert_eq!(count, 4);
        let assets: Vec<_> = store.snapshot().into_iter().map(|r| r.asset).collect();
        assert_eq!(assets, vec!["BTC", "ETH", "SOL", "USDT"]);
        assert!(store.snapshot().iter().all(|r| r.available.is_zero() && r.total.is_zero()));
        assert!(reconciler.degraded_logged.load(Ordering::Relaxed));
    }

    const DEGRADED_WARNING: &str = "Balance snapshot has no usable entries";

    #[test]
    fn degraded_snapshot_warns_once_per_outage() {
        let (_venue, _store, reconciler) = setup(&["BTC-USDT"]);
        let logs = LogCapture::default();

        logs.run(|| {
            reconciler.apply_snapshot(&json!({}));
            reconciler.apply_snapshot(&json!({"items": []}));
        });

        assert_eq!(logs.count(DEGRADED_WARNING), 1);
    }

    #[test]
    fn readable_snapshot_rearms_degraded_warning() {
        let (_venue, store, reconciler) = setup(&["BTC-USDT"]);
        let logs = LogCapture::default();

        logs.run(|| {
            reconciler.apply_snapshot(&json!({}));
            reconciler.apply_snapshot(&json!({"BTC": {"available": "2", "freeze": "0"}}));
            assert!(!reconciler.degraded_logged.load(Ordering::Relaxed));
            reconciler.apply_snapshot(&json!({}));
        });

        assert_eq!(logs.count(DEGRADED_WARNING), 2);
        assert_eq!(store.balance("BTC"), Some(BalanceRecord::zero("BTC")));
    }

    #[tokio::test]
    async fn rejected_snapshot_leaves_store_untouched() {
        let (venue, store, reconciler) = setup(&["BTC-USDT"]);
        store.patch(BalanceRecord::new("BTC", dec!(1), dec!(1)));
        venue.respond(VenueEndpoint::Balances, json!({"code": 1001, "message": "invalid sign"}));

        let err = reconciler.refresh_balances().await.unwrap_err();

        assert!(matches!(err, VenueError::Rejected { .. }));
        assert_eq!(store.balance("BTC").map(|r| r.total), Some(dec!(1)));
    }

    #[test]
    fn asset_update_patches_only_named_asset() {
        let (_venue, store, reconciler) = setup(&["BTC-USDT"]);
        reconciler.apply_snapshot(&json!({
            "BTC": {"available": "1", "freeze": "0"},
            "USDT": {"available": "50", "freeze": "0"}
        }));

        let patched = reconciler.apply_asset_update(&json!([{"asset": "usdt", "available": "40", "total": "55"}]));

        assert_eq!(patched, 1);
        assert_eq!(store.balance("USDT"), Some(BalanceRecord::new("USDT", dec!(40), dec!(55))));
        assert_eq!(store.balance("BTC"), Some(BalanceRecord::new("BTC", dec!(1), dec!(1))));
    }

    #[test]
    fn empty_asset_update_is_ignored() {
        let (_venue, store, reconciler) = setup(&["BTC-USDT"]);
        assert_eq!(reconciler.apply_asset_update(&json!([{"note": "nothing"}])), 0);
        assert!(store.snapshot().is_empty());
    }
}
