//! User Stream Messages
//!
//! JSON-RPC style requests sent on the user stream and classification of
//! the frames the venue sends back.

use serde_json::{Value, json};

use super::constants::{
    METHOD_ASSET_SUBSCRIBE, METHOD_ORDER_SUBSCRIBE, METHOD_PING, METHOD_PONG, METHOD_SIGN,
};
use crate::application::services::fallback_assets;
use crate::domain::order::TradingPair;
use crate::domain::payload::PayloadError;

// ============================================================================
// Outbound
// ============================================================================

/// One request frame: `{"method", "params", "id"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Method name.
    pub method: &'static str,
    /// Positional parameters.
    pub params: Vec<Value>,
    /// Correlation id.
    pub id: Value,
}

impl StreamRequest {
    fn new(method: &'static str, params: Vec<Value>, id: u64) -> Self {
        Self {
            method,
            params,
            id: Value::from(id),
        }
    }

    /// Stream login.
    #[must_use]
    pub fn sign(id: u64, api_key: &str, sign: &str, timestamp_ms: i64) -> Self {
        Self::new(METHOD_SIGN, vec![json!(api_key), json!(sign), json!(timestamp_ms)], id)
    }

    /// Client liveness probe.
    #[must_use]
    pub fn ping(id: u64) -> Self {
        Self::new(METHOD_PING, Vec::new(), id)
    }

    /// Acknowledgement of a venue probe, echoing its id.
    #[must_use]
    pub const fn pong(id: Value) -> Self {
        Self {
            method: METHOD_PONG,
            params: Vec::new(),
            id,
        }
    }

    /// Order channel subscription.
    #[must_use]
    pub fn order_subscribe(id: u64) -> Self {
        Self::new(METHOD_ORDER_SUBSCRIBE, Vec::new(), id)
    }

    /// Balance channel subscription for `assets`.
    #[must_use]
    pub fn asset_subscribe(id: u64, assets: &[String]) -> Self {
        Self::new(
            METHOD_ASSET_SUBSCRIBE,
            assets.iter().map(|asset| json!(asset)).collect(),
            id,
        )
    }

    /// Wire text of the request.
    #[must_use]
    pub fn to_text(&self) -> String {
        json!({
            "method": self.method,
            "params": self.params,
            "id": self.id,
        })
        .to_string()
    }
}

/// Assets to subscribe to: sorted unique bases and quotes of `pairs`.
#[must_use]
pub fn subscription_assets(pairs: &[TradingPair]) -> Vec<String> {
    fallback_assets(pairs)
}

// ============================================================================
// Inbound
// ============================================================================

/// A decoded frame from the venue.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Venue-initiated probe; must be answered with a pong carrying `id`.
    Probe {
        /// Correlation id of the probe, if the venue sent one.
        id: Option<Value>,
    },
    /// Reply to one of our requests (no method, has `result`).
    Ack(Value),
    /// Anything else: push events for the ingestor.
    Event(Value),
}

/// Decode one text frame.
///
/// Blank frames yield `Ok(None)`.
///
/// # Errors
///
/// Returns `PayloadError::MalformedPayload` if the frame is not JSON.
pub fn classify_frame(text: &str) -> Result<Option<InboundFrame>, PayloadError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let message: Value = serde_json::from_str(text)
        .map_err(|e| PayloadError::malformed("user stream frame", e.to_string()))?;

    let Some(map) = message.as_object() else {
        return Ok(Some(InboundFrame::Event(message)));
    };
    match map.get("method").and_then(Value::as_str) {
        Some(METHOD_PING) => Ok(Some(InboundFrame::Probe {
            id: map.get("id").filter(|id| !id.is_null()).cloned(),
        })),
        None if !map.contains_key("method") && map.contains_key("result") => {
            Ok(Some(InboundFrame::Ack(message)))
        }
        _ => Ok(Some(InboundFrame::Event(message))),
    }
}

/// Check the login reply; a `code` other than null or zero is a rejection.
///
/// # Errors
///
/// Returns the reply text when the venue refused the login.
pub fn check_auth_reply(reply: &Value) -> Result<(), String> {
    match reply.get("code") {
        None | Some(Value::Null) => Ok(()),
        Some(code) if code.as_i64() == Some(0) => Ok(()),
        Some(_) => Err(reply.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn sign_request_carries_positional_params() {
        let text = StreamRequest::sign(1, "key", "ABC", 1_700_000_000_000).to_text();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"method": "server.sign", "params": ["key", "ABC", 1_700_000_000_000_i64], "id": 1})
        );
    }

    #[test]
    fn pong_echoes_probe_id() {
        let value: Value = serde_json::from_str(&StreamRequest::pong(json!("abc")).to_text()).unwrap();
        assert_eq!(value, json!({"method": "server.pong", "params": [], "id": "abc"}));
    }

    #[test]
    fn asset_subscription_lists_unique_assets() {
        let pairs = vec![
            TradingPair::parse("ETH-USDT").unwrap(),
            TradingPair::parse("BTC-USDT").unwrap(),
        ];
        let request = StreamRequest::asset_subscribe(3, &subscription_assets(&pairs));
        assert_eq!(request.params, vec![json!("BTC"), json!("ETH"), json!("USDT")]);
        assert_eq!(StreamRequest::order_subscribe(2).params, Vec::<Value>::new());
    }

    #[test_case("", None ; "empty")]
    #[test_case("   \n", None ; "whitespace")]
    #[test_case(r#"{"method":"server.ping","params":[],"id":9}"#, Some(InboundFrame::Probe { id: Some(json!(9)) }) ; "probe")]
    #[test_case(r#"{"method":"server.ping","params":[]}"#, Some(InboundFrame::Probe { id: None }) ; "probe without id")]
    #[test_case(r#"{"result":{"status":"success"},"id":2,"error":null}"#, Some(InboundFrame::Ack(json!({"result": {"status": "success"}, "id": 2, "error": null}))) ; "ack")]
    #[test_case(r#"{"method":"order.update","params":[]}"#, Some(InboundFrame::Event(json!({"method": "order.update", "params": []}))) ; "event")]
    #[test_case(r#"["asset.update",{}]"#, Some(InboundFrame::Event(json!(["asset.update", {}]))) ; "list event")]
    fn classifies_frames(text: &str, expected: Option<InboundFrame>) {
        assert_eq!(classify_frame(text).unwrap(), expected);
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            classify_frame("{not json"),
            Err(PayloadError::MalformedPayload { .. })
        ));
    }

    #[test_case(json!({"result": "ok"}), true ; "no code")]
    #[test_case(json!({"code": null}), true ; "null code")]
    #[test_case(json!({"code": 0, "result": true}), true ; "zero code")]
    #[test_case(json!({"code": 10001, "message": "invalid sign"}), false ; "rejected")]
    #[test_case(json!({"code": "0"}), false ; "string code")]
    fn auth_reply(reply: Value, accepted: bool) {
        assert_eq!(check_auth_reply(&reply).is_ok(), accepted);
    }
}
