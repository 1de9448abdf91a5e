//! Infrastructure Layer - Adapters and external integrations.

/// Biconomy REST client, request signing and user-stream transport.
pub mod biconomy;

/// Configuration loaded from environment variables.
pub mod config;

/// Health check HTTP server.
pub mod health;

/// Prometheus metrics.
pub mod metrics;

/// In-memory order tracker and balance store.
pub mod persistence;

/// User stream supervision and keepalive.
pub mod stream;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
