//! Reconciliation Integration Tests
//!
//! Exercises `VenueConnector` end to end against a mocked venue: push
//! ingestion, batched cancel with fallback, balance degradation and
//! cancel of orders the venue no longer knows.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use parking_lot::Mutex;
use proptest::prelude::*;
use rust_decimal_macros::dec;
use serde_json::{Value, json};

use biconomy_connector::application::ports::{
    BalanceStorePort, OrderTrackerPort, RequestParams, VenueEndpoint, VenueError, VenueRestPort,
};
use biconomy_connector::{
    CancelOutcome, ClientOrderId, ConnectorConfig, InMemoryBalanceStore, InMemoryOrderTracker,
    OrderState, OrderUpdate, TrackedOrder, TradeSide, TradingPair, VenueConnector,
    VenueIdentity, VenueOrderId,
};

// =============================================================================
// Mock Venue
// =============================================================================

// async_trait methods are mocked through a synchronous inner method.
mock! {
    Venue {
        fn respond(&self, path: &str, params: RequestParams) -> Result<Value, VenueError>;
    }
}

#[async_trait]
impl VenueRestPort for MockVenue {
    async fn post(
        &self,
        path: &str,
        params: RequestParams,
        _auth_required: bool,
    ) -> Result<Value, VenueError> {
        self.respond(path, params)
    }
}

type Connector = VenueConnector<MockVenue, InMemoryOrderTracker, InMemoryBalanceStore>;

struct Fixture {
    connector: Connector,
    tracker: Arc<InMemoryOrderTracker>,
    balances: Arc<InMemoryBalanceStore>,
}

fn fixture(venue: MockVenue, orders: &[TrackedOrder], pairs: &[&str]) -> Fixture {
    let tracker = Arc::new(InMemoryOrderTracker::new());
    for order in orders {
        tracker.start_tracking(order.clone());
    }
    let balances = Arc::new(InMemoryBalanceStore::new());
    let config = ConnectorConfig {
        trading_pairs: pairs.iter().map(|p| TradingPair::parse(p).unwrap()).collect(),
        ..ConnectorConfig::default()
    };
    let connector = VenueConnector::new(
        Arc::new(venue),
        Arc::clone(&tracker),
        Arc::clone(&balances),
        config,
    );
    Fixture {
        connector,
        tracker,
        balances,
    }
}

fn confirmed(client_id: &str, venue_id: &str) -> TrackedOrder {
    TrackedOrder::new(
        ClientOrderId::from(client_id),
        TradingPair::new("BTC", "USDT"),
        TradeSide::Buy,
        dec!(25000),
        dec!(0.1),
        Utc::now(),
    )
    .with_venue(VenueIdentity::Confirmed(VenueOrderId::from(venue_id)))
}

fn state_of(tracker: &InMemoryOrderTracker, client_id: &str) -> OrderState {
    tracker.tracked_order(&ClientOrderId::from(client_id)).unwrap().state
}

fn batch_ids(params: &RequestParams) -> Vec<String> {
    let body: Vec<Value> = serde_json::from_str(&params["orders_json"]).unwrap();
    body.iter()
        .map(|entry| entry["order_id"].as_str().unwrap().to_string())
        .collect()
}

// =============================================================================
// Push Ingestion
// =============================================================================

#[test]
fn numeric_finish_code_fills_order() {
    let f = fixture(MockVenue::new(), &[confirmed("c1", "501")], &["BTC-USDT"]);

    f.connector.apply_push_message(&json!({
        "method": "order.update",
        "params": [{"market": "BTC_USDT", "order_id": 501, "status": 3}]
    }));

    assert_eq!(state_of(&f.tracker, "c1"), OrderState::Filled);
}

#[tokio::test]
async fn first_terminal_state_survives_later_poll() {
    let mut venue = MockVenue::new();
    venue
        .expect_respond()
        .withf(|path, _| path.ends_with("/pending/detail"))
        .times(1)
        .returning(|_, _| Ok(json!({"code": 10, "message": "order not found"})));
    venue
        .expect_respond()
        .withf(|path, _| path.ends_with("/finished/detail"))
        .times(1)
        .returning(|_, _| Ok(json!({"code": 0, "result": {"id": 9, "status": "finished"}})));
    let f = fixture(venue, &[confirmed("c1", "9")], &["BTC-USDT"]);

    f.connector.apply_push_message(&json!({
        "method": "order.update",
        "params": {"market": "BTC_USDT", "order_id": "9", "status": "canceled"}
    }));
    let order = f.tracker.tracked_order(&ClientOrderId::from("c1")).unwrap();
    let update = f.connector.poll_order_status(&order).await.unwrap();

    assert_eq!(update.new_state, OrderState::Filled);
    assert_eq!(state_of(&f.tracker, "c1"), OrderState::Canceled);
}

// =============================================================================
// Batch Cancel
// =============================================================================

#[tokio::test]
async fn cancel_all_chunks_and_falls_back_for_unacknowledged_member() {
    let orders: Vec<_> = (0..25)
        .map(|i| confirmed(&format!("c{i}"), &format!("v{i}")))
        .collect();
    let chunk_sizes = Arc::new(Mutex::new(Vec::new()));

    let mut venue = MockVenue::new();
    let sizes = Arc::clone(&chunk_sizes);
    venue
        .expect_respond()
        .withf(|path, _| path.ends_with("/cancel_batch"))
        .times(3)
        .returning(move |_, params| {
            let ids = batch_ids(&params);
            sizes.lock().push(ids.len());
            let entries: Vec<Value> = ids
                .into_iter()
                .filter(|id| id != "v7")
                .map(|id| json!({"order_id": id, "result": true}))
                .collect();
            Ok(json!({"code": 0, "result": entries}))
        });
    venue
        .expect_respond()
        .withf(|path, params| {
            path.ends_with("/trade/cancel")
                && params.get("order_id").map(String::as_str) == Some("v7")
        })
        .times(1)
        .returning(|_, _| Ok(json!({"code": 0, "result": true})));
    let f = fixture(venue, &orders, &["BTC-USDT"]);

    let report = f.connector.cancel_all(Duration::from_secs(5)).await;

    assert_eq!(*chunk_sizes.lock(), vec![10, 10, 5]);
    assert_eq!(report.len(), 25);
    assert_eq!(report.successes().count(), 25);
    assert!(f.tracker.open_orders().is_empty());
}

#[tokio::test]
async fn cancel_all_reports_every_order_once() {
    let orders = vec![confirmed("a", "1"), confirmed("b", "2"), confirmed("c", "3")];
    let mut venue = MockVenue::new();
    venue
        .expect_respond()
        .withf(|path, _| path.ends_with("/cancel_batch"))
        .times(1)
        .returning(|_, _| Ok(json!({"code": 0, "result": [{"order_id": "1", "result": true}]})));
    venue
        .expect_respond()
        .withf(|path, _| path.ends_with("/trade/cancel"))
        .times(2)
        .returning(|_, params| match params["order_id"].as_str() {
            "2" => Ok(json!({"code": 0})),
            _ => Err(VenueError::Http {
                status: 500,
                body: "matching engine busy".to_string(),
            }),
        });
    let f = fixture(venue, &orders, &["BTC-USDT"]);

    let report = f.connector.cancel_all(Duration::from_secs(5)).await;

    assert_eq!(report.len(), 3);
    assert_eq!(report.get(&ClientOrderId::from("a")), Some(&CancelOutcome::Canceled));
    assert_eq!(report.get(&ClientOrderId::from("b")), Some(&CancelOutcome::Canceled));
    assert!(matches!(
        report.get(&ClientOrderId::from("c")),
        Some(CancelOutcome::Failed { reason }) if reason.contains("matching engine busy")
    ));
    assert_eq!(state_of(&f.tracker, "c"), OrderState::Open);
}

// =============================================================================
// Cancel of Absent Orders
// =============================================================================

#[tokio::test]
async fn cancel_rejected_as_absent_counts_as_canceled() {
    let mut venue = MockVenue::new();
    venue
        .expect_respond()
        .withf(|path, params| {
            path.ends_with("/trade/cancel")
                && params.get("order_id").map(String::as_str) == Some("X")
        })
        .times(1)
        .returning(|_, _| Ok(json!({"code": 10, "message": "order does not exist"})));
    let order = confirmed("c1", "X");
    let f = fixture(venue, std::slice::from_ref(&order), &["BTC-USDT"]);

    f.connector.cancel_order(&order).await.unwrap();

    assert_eq!(state_of(&f.tracker, "c1"), OrderState::Canceled);
}

#[tokio::test]
async fn http_not_found_body_counts_as_canceled() {
    let mut venue = MockVenue::new();
    venue.expect_respond().times(1).returning(|_, _| {
        Err(VenueError::Http {
            status: 400,
            body: r#"{"code":10,"message":"Order not found"}"#.to_string(),
        })
    });
    let order = confirmed("c1", "X");
    let f = fixture(venue, std::slice::from_ref(&order), &["BTC-USDT"]);

    f.connector.cancel_order(&order).await.unwrap();

    assert_eq!(state_of(&f.tracker, "c1"), OrderState::Canceled);
}

// =============================================================================
// Balances
// =============================================================================

#[tokio::test]
async fn unreadable_snapshot_degrades_to_configured_assets() {
    let mut venue = MockVenue::new();
    venue
        .expect_respond()
        .withf(|path, _| path.ends_with(VenueEndpoint::Balances.path()))
        .times(2)
        .returning(|_, _| Ok(json!({"code": 0, "result": {"status": "ok", "items": [{"foo": "bar"}]}})));
    let f = fixture(venue, &[], &["BTC-USDT", "ETH-USDT", "SOL-BTC"]);

    f.connector.refresh_balances().await.unwrap();
    f.connector.refresh_balances().await.unwrap();

    let snapshot = f.balances.snapshot();
    let assets: Vec<_> = snapshot.iter().map(|r| r.asset.as_str()).collect();
    assert_eq!(assets, vec!["BTC", "ETH", "SOL", "USDT"]);
    assert!(snapshot.iter().all(|r| r.available.is_zero() && r.total.is_zero()));
}

#[tokio::test]
async fn push_patch_keeps_other_assets() {
    let mut venue = MockVenue::new();
    venue.expect_respond().times(1).returning(|_, _| {
        Ok(json!({"code": 0, "result": {
            "BTC": {"available": "1", "freeze": "0"},
            "USDT": {"available": "500", "freeze": "20"}
        }}))
    });
    let f = fixture(venue, &[], &["BTC-USDT"]);
    f.connector.refresh_balances().await.unwrap();

    f.connector.apply_push_message(&json!({
        "method": "asset.update",
        "params": [{"BTC": {"available": "0.5", "freeze": "0.5"}}]
    }));

    assert_eq!(f.balances.balance("BTC").map(|r| r.available), Some(dec!(0.5)));
    assert_eq!(f.balances.balance("USDT").map(|r| r.total), Some(dec!(520)));
}

#[tokio::test]
async fn push_with_out_of_range_balance_patches_remaining_assets() {
    let mut venue = MockVenue::new();
    venue.expect_respond().times(1).returning(|_, _| {
        Ok(json!({"code": 0, "result": {
            "BTC": {"available": "1", "freeze": "0"},
            "USDT": {"available": "500", "freeze": "20"}
        }}))
    });
    let f = fixture(venue, &[], &["BTC-USDT"]);
    f.connector.refresh_balances().await.unwrap();

    f.connector.apply_push_message(&json!({
        "method": "asset.update",
        "params": [{
            "BTC": {"available": "79228162514264337593543950335", "freeze": "1"},
            "USDT": {"available": "NaN", "freeze": "1e400"},
            "ETH": {"available": "3", "freeze": "1"}
        }]
    }));

    assert_eq!(f.balances.balance("BTC").map(|r| r.total), Some(dec!(1)));
    assert_eq!(f.balances.balance("USDT").map(|r| r.total), Some(dec!(0)));
    assert_eq!(f.balances.balance("ETH").map(|r| r.total), Some(dec!(4)));
}

// =============================================================================
// Fills
// =============================================================================

#[tokio::test]
async fn extreme_fill_amounts_are_kept_or_skipped_without_panic() {
    let mut venue = MockVenue::new();
    venue
        .expect_respond()
        .withf(|path, _| path.ends_with(VenueEndpoint::OrderDeals.path()))
        .times(1)
        .returning(|_, _| {
            Ok(json!({"code": 0, "result": [
                {"id": "t1", "amount": "1e15", "price": "1e15", "deal_money": "5"},
                {"id": "t2", "amount": "1e15", "price": "1e15"},
                {"id": "t3", "amount": "inf", "price": "1"},
                {"id": "t4", "amount": "0.5", "price": "100"}
            ]}))
        });
    let order = confirmed("c1", "70");
    let f = fixture(venue, std::slice::from_ref(&order), &["BTC-USDT"]);

    let fills = f.connector.poll_trade_fills(&order).await.unwrap();

    let ids: Vec<_> = fills.iter().map(|fill| fill.trade_id.to_string()).collect();
    assert_eq!(ids, vec!["t1", "t4"]);
    assert_eq!(fills[0].fill_quote_amount, dec!(5));
    assert_eq!(fills[1].fill_quote_amount, dec!(50));
}

// =============================================================================
// Terminal States
// =============================================================================

fn any_state() -> impl Strategy<Value = OrderState> {
    prop_oneof![
        Just(OrderState::Open),
        Just(OrderState::Filled),
        Just(OrderState::Canceled),
        Just(OrderState::Failed),
    ]
}

proptest! {
    #[test]
    fn terminal_state_never_changes(updates in prop::collection::vec(any_state(), 1..24)) {
        let tracker = InMemoryOrderTracker::new();
        let order = confirmed("c1", "1");
        tracker.start_tracking(order.clone());

        let mut first_terminal = None;
        for state in updates {
            tracker.process_order_update(OrderUpdate::for_order(&order, state, Utc::now()));
            let current = state_of(&tracker, "c1");
            if first_terminal.is_none() && current.is_terminal() {
                first_terminal = Some(current);
            }
            if let Some(terminal) = first_terminal {
                prop_assert_eq!(current, terminal);
            }
        }
    }
}
