//! Biconomy venue constants.

use std::time::Duration;

/// Production top-level domain of the REST host.
pub const DEFAULT_DOMAIN: &str = "vip";

/// Version prefix of the private REST API.
pub const PRIVATE_API_VERSION: &str = "api/v2";

/// User stream endpoint.
pub const WS_URL: &str = "wss://bei.biconomy.com/ws";

/// Site header required on REST and stream requests.
pub const X_SITE_ID_HEADER_KEY: &str = "X-SITE-ID";

/// Value of the site header.
pub const X_SITE_ID_HEADER: &str = "127";

/// Form encoding used by every private endpoint.
pub const CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// The venue drops idle user streams after roughly 40 s even though its
/// documentation advertises 180 s.
pub const CLIENT_PING_INTERVAL: Duration = Duration::from_secs(10);

/// Stream login method.
pub const METHOD_SIGN: &str = "server.sign";

/// Probe method, sent by either side.
pub const METHOD_PING: &str = "server.ping";

/// Probe acknowledgement.
pub const METHOD_PONG: &str = "server.pong";

/// Order channel subscription.
pub const METHOD_ORDER_SUBSCRIBE: &str = "order.subscribe";

/// Balance channel subscription.
pub const METHOD_ASSET_SUBSCRIBE: &str = "asset.subscribe";

/// REST base URL for `domain`, with trailing slash.
#[must_use]
pub fn rest_base_url(domain: &str) -> String {
    format!("https://api.biconomy.{domain}/")
}

/// Headers sent when opening the user stream.
#[must_use]
pub fn ws_headers() -> Vec<(String, String)> {
    vec![(X_SITE_ID_HEADER_KEY.to_string(), X_SITE_ID_HEADER.to_string())]
}
