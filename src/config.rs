//! TOML configuration, loaded in two stages: a permissive `Raw` shape that
//! mirrors the file verbatim, then validated into the type the rest of the
//! crate actually uses. Keeping the stages separate means a malformed value
//! fails with a field-specific message instead of a generic deserialize
//! error pointing at a line number.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::PartyTracksError;
use crate::retry::RetryConfig;

#[derive(Debug, Clone, Deserialize, Default)]
struct RawConfig {
    sfu_base_url: Option<String>,
    signaling_ws_url: Option<String>,
    history_capacity: Option<usize>,
    dispatcher_max_attempts: Option<u32>,
    dispatcher_initial_delay_ms: Option<u64>,
    dispatcher_max_delay_ms: Option<u64>,
    dispatcher_backoff_factor: Option<f64>,
    reconnect_min_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    reconnect_grow_factor: Option<f64>,
    reconnect_min_uptime_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub grow_factor: f64,
    pub min_uptime: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            grow_factor: 1.3,
            min_uptime: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sfu_base_url: String,
    pub signaling_ws_url: Option<String>,
    pub history_capacity: usize,
    pub request_retry: RetryConfig,
    pub reconnect: ReconnectPolicy,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self, PartyTracksError> {
        let raw: RawConfig =
            toml::from_str(raw).map_err(|e| PartyTracksError::Config(e.to_string()))?;
        Self::validate(raw)
    }

    pub fn load(path: &Path) -> Result<Self, PartyTracksError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PartyTracksError::Config(format!("reading {}: {e}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    fn validate(raw: RawConfig) -> Result<Self, PartyTracksError> {
        let sfu_base_url = raw
            .sfu_base_url
            .ok_or_else(|| PartyTracksError::Config("sfu_base_url is required".to_owned()))?;
        if sfu_base_url.is_empty() {
            return Err(PartyTracksError::Config("sfu_base_url must not be empty".to_owned()));
        }

        let history_capacity = raw.history_capacity.unwrap_or(200);
        if history_capacity == 0 {
            return Err(PartyTracksError::Config("history_capacity must be at least 1".to_owned()));
        }

        let defaults = RetryConfig::default();
        let request_retry = RetryConfig {
            max_attempts: raw.dispatcher_max_attempts.unwrap_or(defaults.max_attempts),
            initial_delay: raw
                .dispatcher_initial_delay_ms
                .map_or(defaults.initial_delay, Duration::from_millis),
            max_delay: raw.dispatcher_max_delay_ms.map_or(defaults.max_delay, Duration::from_millis),
            factor: raw.dispatcher_backoff_factor.unwrap_or(defaults.factor),
        };
        if request_retry.max_attempts == 0 {
            return Err(PartyTracksError::Config("dispatcher_max_attempts must be at least 1".to_owned()));
        }

        let reconnect_defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            min_delay: raw.reconnect_min_delay_ms.map_or(reconnect_defaults.min_delay, Duration::from_millis),
            max_delay: raw.reconnect_max_delay_ms.map_or(reconnect_defaults.max_delay, Duration::from_millis),
            grow_factor: raw.reconnect_grow_factor.unwrap_or(reconnect_defaults.grow_factor),
            min_uptime: raw.reconnect_min_uptime_ms.map_or(reconnect_defaults.min_uptime, Duration::from_millis),
        };

        Ok(Self {
            sfu_base_url,
            signaling_ws_url: raw.signaling_ws_url,
            history_capacity,
            request_retry,
            reconnect,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let config = Config::from_toml_str(r#"sfu_base_url = "https://sfu.example.com""#).unwrap();
        assert_eq!(config.sfu_base_url, "https://sfu.example.com");
        assert_eq!(config.history_capacity, 200);
        assert_eq!(config.request_retry.max_attempts, 3);
    }

    #[test]
    fn missing_sfu_base_url_is_rejected() {
        let err = Config::from_toml_str("history_capacity = 10").unwrap_err();
        assert!(matches!(err, PartyTracksError::Config(_)));
    }

    #[test]
    fn zero_history_capacity_is_rejected() {
        let toml = r#"
            sfu_base_url = "https://sfu.example.com"
            history_capacity = 0
        "#;
        assert!(Config::from_toml_str(toml).is_err());
    }

    #[test]
    fn overrides_are_applied() {
        let toml = r#"
            sfu_base_url = "https://sfu.example.com"
            dispatcher_max_attempts = 5
            reconnect_grow_factor = 2.0
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.request_retry.max_attempts, 5);
        assert_eq!(config.reconnect.grow_factor, 2.0);
    }
}
