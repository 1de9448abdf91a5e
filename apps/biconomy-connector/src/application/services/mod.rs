//! Application Services
//!
//! Reconciliation logic between the venue and the local stores. Every
//! service talks to the outside only through `application::ports`.
//!
//! - `IdentifierResolver`: venue id recovery from order listings
//! - `EventIngestor`: push messages, status polls and fill polls
//! - `BatchCancelOrchestrator`: batched cancel with individual fallback
//! - `BalanceReconciler`: snapshot and push balance maintenance
//! - `VenueConnector`: facade wiring the services together

mod balances;
mod cancel;
mod connector;
mod ingest;
mod resolver;

#[cfg(test)]
pub(crate) mod testing;

pub use balances::{BalanceReconciler, fallback_assets};
pub use cancel::{
    BatchCancelOrchestrator, CancelCandidate, CancelConfig, CancelError, CancelOutcome,
    CancelReport, MAX_BATCH_SIZE,
};
pub use connector::{ConnectorConfig, VenueConnector};
pub use ingest::{EventIngestor, IngestError};
pub use resolver::{IdentifierResolver, Resolution, ResolverConfig};
