//! Port Interfaces
//!
//! Contracts between the reconciliation services and their collaborators,
//! following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `VenueRestPort`: signed REST calls returning raw JSON
//! - `DuplexConnector`: the user-stream transport
//! - `OrderTrackerPort`: the local order book of record
//! - `BalanceStorePort`: the local per-asset balance table

mod stream_port;
mod tracker_port;
mod venue_port;

pub use stream_port::{DuplexConnection, DuplexConnector, FrameSink, FrameSource, StreamError};
pub use tracker_port::{BalanceStorePort, OrderTrackerPort, TrackerError};
pub use venue_port::{RequestParams, VenueEndpoint, VenueError, VenueRestPort, request_params};
