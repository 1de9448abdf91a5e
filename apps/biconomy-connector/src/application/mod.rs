//! Application Layer - Ports and reconciliation services.

/// Interfaces to the venue, the stream transport and the local stores.
pub mod ports;

/// Identifier resolution, ingestion, cancellation and balance services.
pub mod services;
