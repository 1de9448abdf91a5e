//! User Stream Keepalive
//!
//! Supervision of the authenticated user stream: connection lifecycle,
//! liveness probing, venue probe acknowledgement and reconnect backoff.

mod health;
mod liveness;
mod reconnect;
mod supervisor;

pub use health::ConnectionHealth;
pub use liveness::{LivenessConfig, LivenessEvent, LivenessHandle, LivenessLoop};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use supervisor::{
    ConnectionState, StreamMonitor, SupervisorConfig, SupervisorError, UserStreamSupervisor,
};
