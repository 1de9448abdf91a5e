//! Payload Normalizer
//!
//! Pure functions turning venue-shaped JSON into canonical records. The
//! venue nests data under varying keys, wraps lists in `result`/`data`
//! envelopes and mixes numbers with numeric strings, so everything here
//! works on untyped `serde_json::Value` trees and degrades to "nothing
//! recognized" instead of failing the whole payload.

mod balance;
mod fill;
mod order;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};

pub use balance::{BALANCE_KEYS, is_balance_entry, normalize_balance_entries};
pub use fill::{CanonicalFill, normalize_fill_entry};
pub use order::{
    CLIENT_ID_FIELDS, CanonicalOrderFields, STATUS_RULES, StatusRule, VENUE_ID_FIELDS,
    client_order_id_from_entry, entry_timestamp, normalize_order_entry, state_from_entry,
    venue_order_id_from_entry,
};

/// JSON object as produced by `serde_json`.
pub type JsonMap = Map<String, Value>;

// =============================================================================
// Envelope Handling
// =============================================================================

/// Unwrap a venue response envelope.
///
/// A `code` other than `0`, `"0"` or null marks a rejection. Returns the
/// `result` member when present, otherwise the whole object.
///
/// # Errors
///
/// Returns `PayloadError::Rejected` for a non-zero code and
/// `PayloadError::MalformedPayload` when the response is not an object.
pub fn extract_result<'a>(response: &'a Value, context: &str) -> Result<&'a Value, PayloadError> {
    let Some(map) = response.as_object() else {
        return Err(PayloadError::MalformedPayload {
            context: context.to_string(),
            reason: format!("expected object, got {}", type_name(response)),
        });
    };

    match map.get("code") {
        None | Some(Value::Null) => {}
        Some(Value::Number(n)) if n.as_i64() == Some(0) => {}
        Some(Value::String(s)) if s.trim() == "0" => {}
        Some(code) => {
            let message = string_field(map, &["message", "msg"]).unwrap_or_default();
            return Err(PayloadError::Rejected {
                context: context.to_string(),
                code: scalar_to_string(code).unwrap_or_else(|| code.to_string()),
                message,
            });
        }
    }

    Ok(map.get("result").unwrap_or(response))
}

/// Flatten a listing response into its entries.
///
/// Objects are searched for a `result`, `data`, `pairs` or `symbols` member
/// (a list is returned as-is, an object is searched again); an object with
/// none of them is itself the single entry. Scalars yield nothing.
#[must_use]
pub fn extract_entries(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => {
            for key in ["result", "data", "pairs", "symbols"] {
                match map.get(key) {
                    Some(Value::Array(items)) => return items.iter().collect(),
                    Some(nested @ Value::Object(_)) => return extract_entries(nested),
                    _ => {}
                }
            }
            vec![value]
        }
        _ => Vec::new(),
    }
}

/// Locate the order object inside a detail response.
#[must_use]
pub fn extract_order_entry(value: &Value) -> Option<&JsonMap> {
    match value {
        Value::Object(map) => {
            for key in ["order", "orders", "result", "data"] {
                if let Some(nested) = map.get(key) {
                    return extract_order_entry(nested);
                }
            }
            Some(map)
        }
        Value::Array(items) => items.first().and_then(extract_order_entry),
        _ => None,
    }
}

// =============================================================================
// Field Access
// =============================================================================

/// First of `keys` present with a non-null value.
#[must_use]
pub fn first_field<'a>(map: &'a JsonMap, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find(|value| !value.is_null())
}

/// First of `keys` holding a non-empty string or a number, as a string.
#[must_use]
pub fn string_field(map: &JsonMap, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find_map(scalar_to_string)
}

/// First of `keys` present, coerced to a decimal.
#[must_use]
pub fn decimal_field(map: &JsonMap, keys: &[&str]) -> Option<Decimal> {
    first_field(map, keys).map(decimal_from_value)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Coercion
// =============================================================================

/// Coerce a JSON number or numeric string to a decimal; anything else is zero.
#[must_use]
pub fn decimal_from_value(value: &Value) -> Decimal {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Decimal::ZERO,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .unwrap_or(Decimal::ZERO)
}

/// Interpret a venue timestamp in seconds or milliseconds.
///
/// Values above 1e12 are treated as milliseconds. Missing or unparseable
/// values fall back to `now`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn timestamp_from_value(value: Option<&Value>, now: DateTime<Utc>) -> DateTime<Utc> {
    let seconds = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    seconds
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(|s| if s > 1e12 { s / 1000.0 } else { s })
        .and_then(|s| DateTime::from_timestamp_millis((s * 1000.0).round() as i64))
        .unwrap_or(now)
}

/// Interpret a venue acknowledgement flag.
///
/// Accepts boolean true, the strings `true`, `1` and `success` in any case,
/// or a nonzero number.
#[must_use]
pub fn is_truthy_flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => {
            matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "success")
        }
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Payload interpretation errors. Never fatal to a batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// Shape not recognized.
    #[error("malformed payload in {context}: {reason}")]
    MalformedPayload {
        /// Operation being interpreted.
        context: String,
        /// What was wrong.
        reason: String,
    },

    /// The venue answered with a non-zero code.
    #[error("{context} failed ({code}): {message}")]
    Rejected {
        /// Operation being interpreted.
        context: String,
        /// Venue error code.
        code: String,
        /// Venue error message.
        message: String,
    },
}

impl PayloadError {
    /// Shorthand for a malformed-payload error.
    #[must_use]
    pub fn malformed(context: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPayload {
            context: context.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
