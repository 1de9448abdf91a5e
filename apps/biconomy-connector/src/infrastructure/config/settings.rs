//! Connector Configuration Settings
//!
//! Settings for the Biconomy connector, loaded from environment variables.
//! Only the API credentials are required; everything else has a default.

use std::time::Duration;

use crate::application::services::{CancelConfig, ConnectorConfig, ResolverConfig};
use crate::domain::order::TradingPair;
use crate::infrastructure::biconomy::constants;
use crate::infrastructure::biconomy::subscription_assets;
use crate::infrastructure::stream::{LivenessConfig, ReconnectConfig, SupervisorConfig};

/// Biconomy API credentials.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// User stream settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket URL.
    pub url: String,
    /// Interval between client pings.
    pub ping_interval: Duration,
    /// Silence after which the connection counts as dead.
    pub stale_after: Duration,
    /// Time allowed for the login reply.
    pub auth_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: constants::WS_URL.to_string(),
            ping_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(45),
            auth_timeout: Duration::from_secs(10),
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

impl StreamSettings {
    /// Liveness loop configuration.
    #[must_use]
    pub const fn liveness(&self) -> LivenessConfig {
        LivenessConfig::new(self.ping_interval, self.stale_after)
    }

    /// Reconnection policy configuration.
    #[must_use]
    pub const fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig::new(
            self.reconnect_delay_initial,
            self.reconnect_delay_max,
            self.reconnect_delay_multiplier,
            0.1,
            self.max_reconnect_attempts,
        )
    }
}

/// Cancel-all settings.
#[derive(Debug, Clone, Copy)]
pub struct CancelSettings {
    /// Overall cancel-all timeout.
    pub timeout: Duration,
    /// Orders per bulk-cancel request.
    pub batch_size: usize,
}

impl Default for CancelSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            batch_size: crate::application::services::MAX_BATCH_SIZE,
        }
    }
}

/// Complete connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// API credentials.
    pub credentials: Credentials,
    /// Top-level domain of the REST host (`vip` in production).
    pub domain: String,
    /// Configured instruments.
    pub trading_pairs: Vec<TradingPair>,
    /// User stream settings.
    pub stream: StreamSettings,
    /// Cancel-all settings.
    pub cancel: CancelSettings,
    /// Age after which an unresolved order is declared failed.
    pub resolve_fail_after: Duration,
    /// Interval of the balance and order status polls.
    pub poll_interval: Duration,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl ConnectorSettings {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials are missing or empty, or if a
    /// trading pair cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`ConnectorSettings::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyValue(key.to_string()));
            }
            Ok(value)
        };
        let api_key = required("BICONOMY_API_KEY")?;
        let api_secret = required("BICONOMY_API_SECRET")?;

        let domain = lookup("BICONOMY_DOMAIN")
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| constants::DEFAULT_DOMAIN.to_string());

        let trading_pairs = match lookup("BICONOMY_TRADING_PAIRS") {
            Some(raw) => parse_trading_pairs(&raw)?,
            None => Vec::new(),
        };

        let defaults = StreamSettings::default();
        let stream = StreamSettings {
            url: lookup("BICONOMY_WS_URL").unwrap_or(defaults.url),
            ping_interval: secs(&lookup, "BICONOMY_PING_INTERVAL_SECS", defaults.ping_interval),
            stale_after: secs(&lookup, "BICONOMY_STALE_AFTER_SECS", defaults.stale_after),
            auth_timeout: defaults.auth_timeout,
            reconnect_delay_initial: millis(
                &lookup,
                "BICONOMY_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: secs(
                &lookup,
                "BICONOMY_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parsed(
                &lookup,
                "BICONOMY_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parsed(
                &lookup,
                "BICONOMY_RECONNECT_MAX_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        let cancel_defaults = CancelSettings::default();
        let cancel = CancelSettings {
            timeout: secs(&lookup, "BICONOMY_CANCEL_TIMEOUT_SECS", cancel_defaults.timeout),
            batch_size: parsed(&lookup, "BICONOMY_CANCEL_BATCH_SIZE", cancel_defaults.batch_size),
        };

        Ok(Self {
            credentials: Credentials::new(api_key, api_secret),
            domain,
            trading_pairs,
            stream,
            cancel,
            resolve_fail_after: secs(&lookup, "BICONOMY_RESOLVE_FAIL_AFTER_SECS", Duration::from_secs(30)),
            poll_interval: secs(&lookup, "BICONOMY_POLL_INTERVAL_SECS", Duration::from_secs(10)),
            health_port: parsed(&lookup, "HEALTH_PORT", 8083),
        })
    }

    /// REST base URL for the configured domain.
    #[must_use]
    pub fn rest_base_url(&self) -> String {
        constants::rest_base_url(&self.domain)
    }

    /// User stream supervisor configuration derived from these settings.
    #[must_use]
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            url: self.stream.url.clone(),
            headers: constants::ws_headers(),
            liveness: self.stream.liveness(),
            reconnect: self.stream.reconnect(),
            auth_timeout: self.stream.auth_timeout,
            assets: subscription_assets(&self.trading_pairs),
        }
    }

    /// Service configuration derived from these settings.
    #[must_use]
    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            resolver: ResolverConfig {
                fail_after: self.resolve_fail_after,
                ..ResolverConfig::default()
            },
            cancel: CancelConfig {
                batch_size: self.cancel.batch_size,
            },
            trading_pairs: self.trading_pairs.clone(),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

fn parse_trading_pairs(raw: &str) -> Result<Vec<TradingPair>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            TradingPair::parse(s).map_err(|_| ConfigError::InvalidValue {
                key: "BICONOMY_TRADING_PAIRS".to_string(),
                value: s.to_string(),
            })
        })
        .collect()
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<ConnectorSettings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ConnectorSettings::from_lookup(|key| vars.get(key).cloned())
    }

    const CREDS: [(&str, &str); 2] = [("BICONOMY_API_KEY", "key"), ("BICONOMY_API_SECRET", "secret")];

    #[test]
    fn defaults_apply_with_only_credentials() {
        let s = settings(&CREDS).unwrap();
        assert_eq!(s.domain, "vip");
        assert_eq!(s.rest_base_url(), "https://api.biconomy.vip/");
        assert_eq!(s.stream.url, "wss://bei.biconomy.com/ws");
        assert_eq!(s.stream.ping_interval, Duration::from_secs(10));
        assert_eq!(s.stream.stale_after, Duration::from_secs(45));
        assert_eq!(s.cancel.batch_size, 10);
        assert_eq!(s.resolve_fail_after, Duration::from_secs(30));
        assert!(s.trading_pairs.is_empty());
    }

    #[test]
    fn missing_and_empty_credentials_are_rejected() {
        assert!(matches!(
            settings(&[("BICONOMY_API_KEY", "key")]),
            Err(ConfigError::MissingEnvVar(key)) if key == "BICONOMY_API_SECRET"
        ));
        assert!(matches!(
            settings(&[("BICONOMY_API_KEY", " "), ("BICONOMY_API_SECRET", "s")]),
            Err(ConfigError::EmptyValue(key)) if key == "BICONOMY_API_KEY"
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = CREDS.to_vec();
        vars.extend([
            ("BICONOMY_DOMAIN", "com"),
            ("BICONOMY_TRADING_PAIRS", "btc-usdt, ETH-USDT,"),
            ("BICONOMY_PING_INTERVAL_SECS", "5"),
            ("BICONOMY_CANCEL_BATCH_SIZE", "4"),
            ("BICONOMY_RECONNECT_MAX_ATTEMPTS", "7"),
            ("HEALTH_PORT", "not-a-port"),
        ]);

        let s = settings(&vars).unwrap();

        assert_eq!(s.rest_base_url(), "https://api.biconomy.com/");
        assert_eq!(
            s.trading_pairs,
            vec![TradingPair::new("BTC", "USDT"), TradingPair::new("ETH", "USDT")]
        );
        assert_eq!(s.stream.ping_interval, Duration::from_secs(5));
        assert_eq!(s.connector_config().cancel.batch_size, 4);
        assert_eq!(s.stream.reconnect().max_attempts, 7);
        assert_eq!(s.health_port, 8083);

        let supervisor = s.supervisor_config();
        assert_eq!(supervisor.assets, vec!["BTC", "ETH", "USDT"]);
        assert_eq!(supervisor.headers, vec![("X-SITE-ID".to_string(), "127".to_string())]);
        assert_eq!(supervisor.liveness.ping_interval, Duration::from_secs(5));
    }

    #[test]
    fn invalid_trading_pair_is_an_error() {
        let mut vars = CREDS.to_vec();
        vars.push(("BICONOMY_TRADING_PAIRS", "BTCUSDT"));
        assert!(matches!(settings(&vars), Err(ConfigError::InvalidValue { value, .. }) if value == "BTCUSDT"));
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = Credentials::new("key123".to_string(), "secret456".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }
}
