#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Biconomy Connector - Order State Reconciliation Core
//!
//! Keeps local order and balance state consistent with the Biconomy venue.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: pure types and rules
//!   - `order`: tracked orders, lifecycle states, update records
//!   - `payload`: normalization of schema-less venue JSON
//!   - `matching`: scoring of venue entries against tracked orders
//!
//! - **Application**: ports and reconciliation services
//!   - `ports`: venue REST, stream transport, order tracker, balance store
//!   - `services`: identifier resolution, event ingestion, batch
//!     cancellation, balance reconciliation
//!
//! - **Infrastructure**: adapters
//!   - `biconomy`: signed REST client, stream messages, WebSocket transport
//!   - `stream`: user stream supervisor and keepalive
//!   - `config`, `telemetry`, `metrics`, `health`, `persistence`
//!
//! # Data Flow
//!
//! ```text
//! user stream ──► UserStreamSupervisor ──mpsc──► EventIngestor ──┐
//!                                                               ├──► OrderTracker
//! REST polls ───► Payload Normalizer ──► EventIngestor ─────────┤
//!                                       BalanceReconciler ─────►├──► BalanceStore
//! cancel_all ───► BatchCancelOrchestrator ◄──► IdentifierResolver┘
//! ```

/// Domain layer - Pure order, balance and payload rules.
pub mod domain;

/// Application layer - Port definitions and services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::balance::BalanceRecord;
pub use domain::order::{
    ClientOrderId, OrderState, OrderUpdate, TrackedOrder, TradeSide, TradeUpdate, TradingPair,
    VenueIdentity, VenueOrderId,
};

// Services
pub use application::services::{
    CancelOutcome, CancelReport, ConnectorConfig, Resolution, VenueConnector,
};

// Configuration
pub use infrastructure::config::{ConfigError, ConnectorSettings, Credentials};

// Venue adapters
pub use infrastructure::biconomy::{BiconomyRestClient, RequestSigner, WebSocketConnector};

// User stream
pub use infrastructure::stream::{
    ConnectionState, StreamMonitor, SupervisorConfig, UserStreamSupervisor,
};

// Stores
pub use infrastructure::persistence::{InMemoryBalanceStore, InMemoryOrderTracker};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
