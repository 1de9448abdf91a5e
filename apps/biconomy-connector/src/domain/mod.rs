//! Domain Layer - Canonical order, trade and balance model.
//!
//! Pure types and rules with no I/O. Venue payloads are turned into these
//! records by the `payload` normalizer, and candidate venue entries are
//! scored against tracked orders by `matching`.

/// Balance records.
pub mod balance;

/// Pure scoring of venue order entries against tracked orders.
pub mod matching;

/// Orders, identifiers, lifecycle states and update records.
pub mod order;

/// Normalization of venue-shaped JSON payloads into canonical records.
pub mod payload;
