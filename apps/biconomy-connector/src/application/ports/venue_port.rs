//! Venue REST Port (Driven Port)
//!
//! Signed REST access to the venue. Responses are returned as raw JSON;
//! interpreting their shape belongs to the payload normalizer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::payload::PayloadError;

/// Form parameters of a venue request, kept sorted for signing.
pub type RequestParams = BTreeMap<String, String>;

/// Build request parameters from key/value pairs.
#[must_use]
pub fn request_params<const N: usize>(pairs: [(&str, String); N]) -> RequestParams {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Private REST endpoints used by the reconciliation services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VenueEndpoint {
    /// Account balances.
    Balances,
    /// Cancel one order.
    CancelOrder,
    /// Cancel up to a batch of orders.
    CancelBatch,
    /// Listing of resting orders.
    PendingOrders,
    /// Detail of one resting order.
    PendingOrderDetail,
    /// Listing of finished orders.
    FinishedOrders,
    /// Detail of one finished order.
    FinishedOrderDetail,
    /// Fills of one order.
    OrderDeals,
}

impl VenueEndpoint {
    /// Path relative to the private API prefix.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Balances => "/private/user",
            Self::CancelOrder => "/private/trade/cancel",
            Self::CancelBatch => "/private/trade/cancel_batch",
            Self::PendingOrders => "/private/order/pending",
            Self::PendingOrderDetail => "/private/order/pending/detail",
            Self::FinishedOrders => "/private/order/finished",
            Self::FinishedOrderDetail => "/private/order/finished/detail",
            Self::OrderDeals => "/private/order/deals",
        }
    }

    /// Operation name used in error messages and logs.
    #[must_use]
    pub const fn context(self) -> &'static str {
        match self {
            Self::Balances => "fetch balances",
            Self::CancelOrder => "cancel order",
            Self::CancelBatch => "batch cancel",
            Self::PendingOrders => "list pending orders",
            Self::PendingOrderDetail => "pending order detail",
            Self::FinishedOrders => "list finished orders",
            Self::FinishedOrderDetail => "finished order detail",
            Self::OrderDeals => "fetch order deals",
        }
    }
}

/// Venue port error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VenueError {
    /// Transport failure before a response was received.
    #[error("venue connection error: {message}")]
    Connection {
        /// Error details.
        message: String,
    },

    /// Non-2xx HTTP status.
    #[error("venue returned HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The venue answered with a non-zero code.
    #[error("{context} failed ({code}): {message}")]
    Rejected {
        /// Operation that was rejected.
        context: String,
        /// Venue error code.
        code: String,
        /// Venue error message.
        message: String,
    },

    /// Response body could not be interpreted.
    #[error("invalid venue response: {message}")]
    InvalidResponse {
        /// Error details.
        message: String,
    },

    /// HTTP 429.
    #[error("rate limited by venue")]
    RateLimited,
}

impl VenueError {
    /// Whether the venue reports the order as absent.
    ///
    /// Absence after a cancel request is evidence that the order is already
    /// gone.
    #[must_use]
    pub fn is_missing_order(&self) -> bool {
        let text = self.to_string().to_lowercase();
        text.contains("order not found") || text.contains("does not exist")
    }
}

impl From<PayloadError> for VenueError {
    fn from(err: PayloadError) -> Self {
        match err {
            PayloadError::Rejected {
                context,
                code,
                message,
            } => Self::Rejected {
                context,
                code,
                message,
            },
            PayloadError::MalformedPayload { .. } => Self::InvalidResponse {
                message: err.to_string(),
            },
        }
    }
}

/// Port for signed venue REST calls.
#[async_trait]
pub trait VenueRestPort: Send + Sync {
    /// POST `params` to `path`, signing them when `auth_required`.
    async fn post(
        &self,
        path: &str,
        params: RequestParams,
        auth_required: bool,
    ) -> Result<Value, VenueError>;
}
