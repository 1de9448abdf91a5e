//! Configuration Module
//!
//! Connector settings loaded from environment variables.

mod settings;

pub use settings::{
    CancelSettings, ConfigError, ConnectorSettings, Credentials, StreamSettings,
};
