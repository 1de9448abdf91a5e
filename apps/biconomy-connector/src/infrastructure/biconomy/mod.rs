//! Biconomy Venue Adapters
//!
//! Concrete implementations of the venue-facing ports:
//!
//! - `BiconomyRestClient`: signed form-encoded REST calls
//! - `WebSocketConnector`: the user-stream transport
//! - `StreamRequest` / `classify_frame`: user-stream message codec

mod auth;
pub mod constants;
mod messages;
mod rest;
mod transport;

pub use auth::RequestSigner;
pub use messages::{InboundFrame, StreamRequest, check_auth_reply, classify_frame, subscription_assets};
pub use rest::BiconomyRestClient;
pub use transport::WebSocketConnector;
