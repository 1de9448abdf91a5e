//! Persistence Adapters
//!
//! In-memory implementations of the order tracker and balance store ports.

pub mod in_memory;

pub use in_memory::{InMemoryBalanceStore, InMemoryOrderTracker};
