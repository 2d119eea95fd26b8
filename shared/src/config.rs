use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::{ValidatedUrl, MAX_TIMEOUT_MS};
use crate::push_channel::ReconnectPolicy;

/// Environment variable overriding [`Config::api_base_url`].
pub const API_URL_ENV: &str = "IDEA_BOARD_API_URL";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Root of the ideas API. The push endpoint is the same host over `ws`/`wss`.
    pub api_base_url: String,
    /// Reconnects attempted after the initial push connection fails.
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: crate::DEFAULT_API_BASE_URL.to_string(),
            max_reconnect_attempts: crate::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay_ms: crate::DEFAULT_RECONNECT_DELAY_MS,
            request_timeout_ms: crate::capabilities::DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid api_base_url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl Config {
    /// Defaults, with the API root taken from `IDEA_BOARD_API_URL` when set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            config.api_base_url = url.trim().to_string();
        }
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, max_attempts: u32, delay_ms: u64) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ValidatedUrl::new(self.api_base_url.clone()).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.api_base_url.clone(),
            reason: e.to_string(),
        })?;

        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "reconnect_delay_ms",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.request_timeout_ms == 0 || self.request_timeout_ms > MAX_TIMEOUT_MS {
            return Err(ConfigError::Invalid {
                field: "request_timeout_ms",
                reason: format!("must be between 1 and {MAX_TIMEOUT_MS}"),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.max_reconnect_attempts,
            delay_ms: self.reconnect_delay_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "http://localhost:4000");
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.reconnect_delay_ms, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides_base_url() {
        let config = Config::from_lookup(|key| {
            (key == API_URL_ENV).then(|| " https://ideas.example.com ".to_string())
        })
        .unwrap();
        assert_eq!(config.api_base_url, "https://ideas.example.com");

        let unset = Config::from_lookup(|_| None).unwrap();
        assert_eq!(unset, Config::default());
    }

    #[test]
    fn rejects_bad_base_url() {
        let result = Config::from_lookup(|_| Some("ftp://example.com".to_string()));
        assert_matches!(result, Err(ConfigError::InvalidBaseUrl { .. }));

        let config = Config::default().with_api_base_url("not a url");
        assert_matches!(config.validate(), Err(ConfigError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn rejects_zero_timeout() {
        let config = Config {
            request_timeout_ms: 0,
            ..Config::default()
        };
        assert_matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "request_timeout_ms", .. })
        );
    }

    #[test]
    fn rejects_zero_reconnect_delay() {
        let config = Config::default().with_reconnect(3, 0);
        assert_matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "reconnect_delay_ms", .. })
        );
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"reconnect_delay_ms": 250}"#).unwrap();
        assert_eq!(config.reconnect_delay_ms, 250);
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(
            config.reconnect_policy(),
            ReconnectPolicy {
                max_attempts: 3,
                delay_ms: 250
            }
        );
    }
}
