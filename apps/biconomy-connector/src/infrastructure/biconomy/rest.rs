//! Biconomy REST Client
//!
//! Form-encoded POST access to the private API. Responses are handed back
//! as raw JSON; the venue's `code`/`message` envelope is interpreted by the
//! services.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::auth::RequestSigner;
use super::constants::{CONTENT_TYPE, PRIVATE_API_VERSION, X_SITE_ID_HEADER, X_SITE_ID_HEADER_KEY};
use crate::application::ports::{RequestParams, VenueError, VenueRestPort};

/// Signed REST client for the private API.
#[derive(Debug, Clone)]
pub struct BiconomyRestClient {
    client: Client,
    base_url: String,
    signer: RequestSigner,
}

impl BiconomyRestClient {
    /// Create a client for `base_url` (with trailing slash).
    ///
    /// # Errors
    ///
    /// Returns `VenueError::Connection` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, signer: RequestSigner, timeout: Duration) -> Result<Self, VenueError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VenueError::Connection {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            signer,
        })
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{PRIVATE_API_VERSION}/{path}")
    }
}

#[async_trait]
impl VenueRestPort for BiconomyRestClient {
    async fn post(
        &self,
        path: &str,
        params: RequestParams,
        auth_required: bool,
    ) -> Result<Value, VenueError> {
        let url = self.url(path);
        let params = if auth_required {
            self.signer.sign_request(params)
        } else {
            params
        };

        let response = self
            .client
            .post(&url)
            .header(X_SITE_ID_HEADER_KEY, X_SITE_ID_HEADER)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .form(&params)
            .send()
            .await
            .map_err(|e| VenueError::Connection {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| VenueError::Connection {
            message: e.to_string(),
        })?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!(path, "Rate limited by venue");
            return Err(VenueError::RateLimited);
        }
        if !status.is_success() {
            tracing::debug!(path, status = status.as_u16(), body = %body, "Venue request failed");
            return Err(VenueError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| VenueError::InvalidResponse {
            message: format!("{path}: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::request_params;
    use crate::infrastructure::config::Credentials;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> BiconomyRestClient {
        let signer = RequestSigner::new(Credentials::new("key".to_string(), "secret".to_string()));
        BiconomyRestClient::new(format!("{}/", server.uri()), signer, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn posts_signed_form_to_private_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/private/order/pending/detail"))
            .and(header("X-SITE-ID", "127"))
            .and(body_string_contains("api_key=key"))
            .and(body_string_contains("market=BTC_USDT"))
            .and(body_string_contains(
                "sign=603EC4844039F86E35633758B697DC47F6F544A483D685BBAF5A697E11653306",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "result": {"id": 42}})))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server)
            .post(
                "/private/order/pending/detail",
                request_params([("market", "BTC_USDT".to_string()), ("order_id", "42".to_string())]),
                true,
            )
            .await
            .unwrap();

        assert_eq!(response["result"]["id"], 42);
    }

    #[tokio::test]
    async fn unsigned_request_omits_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/public/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0})))
            .mount(&server)
            .await;

        client(&server)
            .post("/public/ping", RequestParams::new(), false)
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(!body.contains("api_key"));
        assert!(!body.contains("sign="));
    }

    #[tokio::test]
    async fn non_success_status_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("order does not exist"))
            .mount(&server)
            .await;

        let err = client(&server)
            .post("/private/trade/cancel", RequestParams::new(), true)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            VenueError::Http {
                status: 400,
                body: "order does not exist".to_string()
            }
        );
        assert!(err.is_missing_order());
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client(&server)
            .post("/private/user", RequestParams::new(), true)
            .await
            .unwrap_err();

        assert_eq!(err, VenueError::RateLimited);
    }

    #[tokio::test]
    async fn unparseable_body_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .post("/private/user", RequestParams::new(), true)
            .await
            .unwrap_err();

        assert!(matches!(err, VenueError::InvalidResponse { .. }));
    }

    #[test]
    fn url_joins_base_prefix_and_path() {
        let signer = RequestSigner::new(Credentials::new("k".to_string(), "s".to_string()));
        let client = BiconomyRestClient::new("https://api.biconomy.vip/", signer, Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url("/private/user"),
            "https://api.biconomy.vip/api/v2/private/user"
        );
    }
}
