//! Biconomy Request Signing
//!
//! Private REST calls and the stream login carry an `api_key` and a `sign`
//! parameter. The signature is the upper-case hex HMAC-SHA256, keyed by the
//! API secret, of the parameters sorted by key and joined as
//! `k1=v1&k2=v2&...&secret_key={secret}`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::application::ports::RequestParams;
use crate::infrastructure::config::Credentials;

type HmacSha256 = Hmac<Sha256>;

/// Signs private requests with one set of credentials.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credentials: Credentials,
}

impl RequestSigner {
    /// Create a signer.
    #[must_use]
    pub const fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// API key sent with every private request.
    #[must_use]
    pub fn api_key(&self) -> &str {
        self.credentials.api_key()
    }

    /// Signature over `params`.
    #[must_use]
    pub fn sign(&self, params: &RequestParams) -> String {
        // BTreeMap iteration is already sorted by key.
        let mut payload = params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        if !payload.is_empty() {
            payload.push('&');
        }
        payload.push_str("secret_key=");
        payload.push_str(self.credentials.api_secret());

        let Ok(mut mac) = HmacSha256::new_from_slice(self.credentials.api_secret().as_bytes()) else {
            unreachable!("HMAC-SHA256 accepts keys of any length");
        };
        mac.update(payload.as_bytes());
        hex::encode_upper(mac.finalize().into_bytes())
    }

    /// Add `api_key` and `sign` to `params`.
    #[must_use]
    pub fn sign_request(&self, mut params: RequestParams) -> RequestParams {
        params.insert("api_key".to_string(), self.api_key().to_string());
        let sign = self.sign(&params);
        params.insert("sign".to_string(), sign);
        params
    }

    /// `(api_key, sign, timestamp_ms)` for the stream login.
    #[must_use]
    pub fn stream_login(&self, timestamp_ms: i64) -> (String, String, i64) {
        let params = crate::application::ports::request_params([
            ("api_key", self.api_key().to_string()),
            ("timestamp", timestamp_ms.to_string()),
        ]);
        (self.api_key().to_string(), self.sign(&params), timestamp_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::request_params;

    fn signer() -> RequestSigner {
        RequestSigner::new(Credentials::new("key".to_string(), "secret".to_string()))
    }

    #[test]
    fn signs_sorted_params_with_secret_suffix() {
        let signed = signer().sign_request(request_params([
            ("order_id", "42".to_string()),
            ("market", "BTC_USDT".to_string()),
        ]));

        assert_eq!(signed["api_key"], "key");
        assert_eq!(
            signed["sign"],
            "603EC4844039F86E35633758B697DC47F6F544A483D685BBAF5A697E11653306"
        );
    }

    #[test]
    fn stream_login_signs_key_and_timestamp() {
        let (api_key, sign, ts) = signer().stream_login(1_700_000_000_000);
        assert_eq!(api_key, "key");
        assert_eq!(ts, 1_700_000_000_000);
        assert_eq!(sign, "160601E53EC2927A9A42CD972C0D639385CEA6264375C714901FB49B99BA1A69");
    }

    #[test]
    fn signature_is_upper_case_hex() {
        let sign = signer().sign(&RequestParams::new());
        assert_eq!(sign.len(), 64);
        assert!(sign.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }
}
