//! Balance normalization.
//!
//! The venue reports balances either as a flat list of per-asset objects or
//! as a map keyed by asset, sometimes several envelopes deep. The walk below
//! visits every node and treats an object as a balance leaf when it carries
//! at least one amount-like key whose value is not itself an object.

use rust_decimal::Decimal;
use serde_json::Value;

use super::{JsonMap, decimal_field, string_field};
use crate::domain::balance::BalanceRecord;

/// Keys marking an object as a balance leaf.
pub const BALANCE_KEYS: &[&str] = &[
    "available",
    "available_balance",
    "balance",
    "free",
    "total",
    "total_balance",
    "freeze",
    "frozen",
    "locked",
    "other_freeze",
];

const ASSET_FIELDS: &[&str] = &["asset", "currency", "coin", "symbol"];
const AVAILABLE_FIELDS: &[&str] = &["available", "free", "available_balance"];
const TOTAL_FIELDS: &[&str] = &["total", "total_balance", "balance"];
const FROZEN_FIELDS: &[&str] = &["freeze", "frozen", "locked"];
const OTHER_FROZEN_FIELDS: &[&str] = &["other_freeze", "other_locked"];

/// Whether `entry` looks like a single asset's balance.
#[must_use]
pub fn is_balance_entry(entry: &JsonMap) -> bool {
    BALANCE_KEYS
        .iter()
        .any(|key| entry.get(*key).is_some_and(|value| !value.is_object()))
}

/// Collect every balance leaf in `raw`.
///
/// Leaves without an explicit asset field take the key they were found
/// under. Unrecognized shapes yield an empty list.
#[must_use]
pub fn normalize_balance_entries(raw: &Value) -> Vec<BalanceRecord> {
    let mut leaves = Vec::new();
    collect_leaves(raw, None, &mut leaves);
    leaves
        .into_iter()
        .filter_map(|(entry, parent)| to_record(entry, parent))
        .collect()
}

fn collect_leaves<'a>(
    node: &'a Value,
    parent: Option<&'a str>,
    leaves: &mut Vec<(&'a JsonMap, Option<&'a str>)>,
) {
    match node {
        // List positions carry no asset name; envelope keys such as `data`
        // must not leak into the entries below them.
        Value::Array(items) => {
            for item in items {
                collect_leaves(item, None, leaves);
            }
        }
        Value::Object(map) => {
            if is_balance_entry(map) {
                leaves.push((map, parent));
            }
            for (key, child) in map {
                collect_leaves(child, Some(key.as_str()), leaves);
            }
        }
        _ => {}
    }
}

fn to_record(entry: &JsonMap, parent: Option<&str>) -> Option<BalanceRecord> {
    let asset = string_field(entry, ASSET_FIELDS).or_else(|| parent.map(str::to_string))?;
    if asset.trim().is_empty() {
        return None;
    }

    let available = decimal_field(entry, AVAILABLE_FIELDS).unwrap_or(Decimal::ZERO);
    let total = match decimal_field(entry, TOTAL_FIELDS) {
        Some(total) => total,
        None => {
            let frozen = decimal_field(entry, FROZEN_FIELDS).unwrap_or(Decimal::ZERO);
            let other = decimal_field(entry, OTHER_FROZEN_FIELDS).unwrap_or(Decimal::ZERO);
            let Some(total) = available
                .checked_add(frozen)
                .and_then(|sum| sum.checked_add(other))
            else {
                tracing::warn!(asset = %asset, "Balance total out of range; entry skipped");
                return None;
            };
            total
        }
    };

    Some(BalanceRecord::new(asset, available, total))
}
