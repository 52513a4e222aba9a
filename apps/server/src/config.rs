//! Application configuration.
//!
//! Secrets and endpoints come from the environment (`.env` supported);
//! tunables come from command-line flags.

use std::time::Duration;
use thiserror::Error;
use tokenwatch_engine::{ClassifierConfig, DEFAULT_MARKET_DATA_URL};
use tokenwatch_ledger::{ReconnectPolicy, StreamConfig};

pub const DEFAULT_XRPL_WS_URL: &str = "wss://xrplcluster.com/";
pub const DEFAULT_CHANNEL_URL: &str = "https://t.me/NorthernLabs";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("Invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Tunables with their defaults; overridden from CLI flags.
#[derive(Debug, Clone)]
pub struct Tunables {
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub reverify_interval_secs: u64,
    pub max_concurrent_lookups: usize,
    pub delivery_timeout_secs: u64,
    pub scan_timeout_secs: u64,
    pub market_timeout_secs: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            reconnect_base_ms: 5_000,
            reconnect_max_ms: 300_000,
            reverify_interval_secs: 86_400,
            max_concurrent_lookups: 4,
            delivery_timeout_secs: 10,
            scan_timeout_secs: 30,
            market_timeout_secs: 10,
        }
    }
}

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    pub telegram_token: String,
    /// Channel whose members may subscribe (numeric id or `@username`).
    pub required_channel_id: String,
    /// Invite link shown on the join button.
    pub required_channel_url: String,
    pub xrpl_ws_url: String,
    pub market_data_url: String,
    /// SQLite URL; unset keeps all state in memory.
    pub database_url: Option<String>,
    pub tunables: Tunables,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("telegram_token", &"<redacted>")
            .field("required_channel_id", &self.required_channel_id)
            .field("required_channel_url", &self.required_channel_url)
            .field("xrpl_ws_url", &self.xrpl_ws_url)
            .field("market_data_url", &self.market_data_url)
            .field("database_url", &self.database_url)
            .field("tunables", &self.tunables)
            .finish()
    }
}

impl AppConfig {
    /// Build from process environment.
    pub fn from_env(tunables: Tunables) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok(), tunables)
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F, tunables: Tunables) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            telegram_token: get("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?,
            required_channel_id: get("REQUIRED_CHANNEL_ID")
                .ok_or(ConfigError::Missing("REQUIRED_CHANNEL_ID"))?,
            required_channel_url: get("REQUIRED_CHANNEL_URL")
                .unwrap_or_else(|| DEFAULT_CHANNEL_URL.to_string()),
            xrpl_ws_url: get("XRPL_WS_URL").unwrap_or_else(|| DEFAULT_XRPL_WS_URL.to_string()),
            market_data_url: get("MARKET_DATA_URL")
                .unwrap_or_else(|| DEFAULT_MARKET_DATA_URL.to_string()),
            database_url: get("DATABASE_URL"),
            tunables,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let ws = url::Url::parse(&self.xrpl_ws_url).map_err(|e| ConfigError::Invalid {
            name: "XRPL_WS_URL",
            reason: e.to_string(),
        })?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid {
                name: "XRPL_WS_URL",
                reason: format!("expected ws:// or wss://, got {}://", ws.scheme()),
            });
        }

        for (name, value) in [
            ("REQUIRED_CHANNEL_URL", &self.required_channel_url),
            ("MARKET_DATA_URL", &self.market_data_url),
        ] {
            url::Url::parse(value).map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            })?;
        }

        let t = &self.tunables;
        if t.reconnect_base_ms == 0 || t.reconnect_base_ms > t.reconnect_max_ms {
            return Err(ConfigError::Invalid {
                name: "reconnect delays",
                reason: format!(
                    "base {}ms must be non-zero and not exceed max {}ms",
                    t.reconnect_base_ms, t.reconnect_max_ms
                ),
            });
        }
        if t.reverify_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "reverify interval",
                reason: "must be at least one second".to_string(),
            });
        }
        if t.max_concurrent_lookups == 0 {
            return Err(ConfigError::Invalid {
                name: "max concurrent lookups",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            reconnect: ReconnectPolicy::new(
                self.tunables.reconnect_base_ms,
                self.tunables.reconnect_max_ms,
            ),
            ..StreamConfig::for_url(self.xrpl_ws_url.clone())
        }
    }

    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            max_concurrent_lookups: self.tunables.max_concurrent_lookups,
        }
    }

    pub fn reverify_interval(&self) -> Duration {
        Duration::from_secs(self.tunables.reverify_interval_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.tunables.delivery_timeout_secs)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.tunables.scan_timeout_secs)
    }

    pub fn market_timeout(&self) -> Duration {
        Duration::from_secs(self.tunables.market_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ("REQUIRED_CHANNEL_ID", "@NorthernLabs"),
    ];

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_lookup(lookup(&REQUIRED), Tunables::default()).unwrap();
        assert_eq!(config.xrpl_ws_url, DEFAULT_XRPL_WS_URL);
        assert_eq!(config.required_channel_url, DEFAULT_CHANNEL_URL);
        assert_eq!(config.market_data_url, "https://api.dexscreener.com");
        assert_eq!(config.database_url, None);
        assert_eq!(config.reverify_interval(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_missing_token() {
        let result = AppConfig::from_lookup(
            lookup(&[("REQUIRED_CHANNEL_ID", "@x"), ("TELEGRAM_BOT_TOKEN", "  ")]),
            Tunables::default(),
        );
        assert!(matches!(result, Err(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))));
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("XRPL_WS_URL", "https://xrplcluster.com"));
        let result = AppConfig::from_lookup(lookup(&vars), Tunables::default());
        assert!(matches!(result, Err(ConfigError::Invalid { name: "XRPL_WS_URL", .. })));
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let tunables = Tunables {
            reconnect_base_ms: 10_000,
            reconnect_max_ms: 1_000,
            ..Default::default()
        };
        assert!(AppConfig::from_lookup(lookup(&REQUIRED), tunables).is_err());
    }

    #[test]
    fn test_stream_config_uses_tunables() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("XRPL_WS_URL", "wss://s1.ripple.com"));
        let config = AppConfig::from_lookup(lookup(&vars), Tunables::default()).unwrap();

        let stream = config.stream_config();
        assert_eq!(stream.ws_url, "wss://s1.ripple.com");
        assert_eq!(stream.reconnect.base_delay, Duration::from_millis(5_000));
        assert_eq!(stream.reconnect.max_delay, Duration::from_millis(300_000));
    }

    #[test]
    fn test_token_never_printed() {
        let config = AppConfig::from_lookup(lookup(&REQUIRED), Tunables::default()).unwrap();
        assert!(!format!("{:?}", config).contains("123:abc"));
    }
}
