use std::env;
use std::time::Duration;
use log::{info, warn};

use crate::error::RelayError;

// Server Configuration
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_API_BIND_ADDRESS: &str = "0.0.0.0:3001";
pub const VIEWER_PATH: &str = "/stream";
pub const STATS_INTERVAL_SECS: u64 = 60;

// Upstream Configuration
pub const DEFAULT_UPSTREAM_URL: &str = "wss://ws.finnhub.io";
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 2;

// Channel Configuration
pub const DEFAULT_VIEWER_QUEUE_SIZE: usize = 100;
pub const EVENT_CHANNEL_SIZE: usize = 1024;

pub struct Config {
    pub bind_address: String,
    pub api_bind_address: String,
    pub upstream_url: String,
    pub feed_token: Option<String>,
    pub reconnect_delay_secs: u64,
    pub viewer_queue_size: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            api_bind_address: DEFAULT_API_BIND_ADDRESS.to_string(),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            feed_token: None,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
            viewer_queue_size: DEFAULT_VIEWER_QUEUE_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or(defaults.bind_address),
            api_bind_address: env::var("API_BIND_ADDRESS")
                .unwrap_or(defaults.api_bind_address),
            upstream_url: env::var("UPSTREAM_URL")
                .unwrap_or(defaults.upstream_url),
            feed_token: env::var("FINNHUB_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            reconnect_delay_secs: parse_env("RECONNECT_DELAY_SECS", defaults.reconnect_delay_secs),
            viewer_queue_size: parse_env("VIEWER_QUEUE_SIZE", defaults.viewer_queue_size),
            log_level: env::var("RUST_LOG")
                .unwrap_or(defaults.log_level),
        }
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.feed_token.is_none() {
            return Err(RelayError::Config("Missing FINNHUB_TOKEN".to_string()));
        }

        if !(self.upstream_url.starts_with("ws://") || self.upstream_url.starts_with("wss://")) {
            return Err(RelayError::Config(format!(
                "Upstream URL must use ws:// or wss://: {}",
                self.upstream_url
            )));
        }

        if self.viewer_queue_size == 0 {
            return Err(RelayError::Config("VIEWER_QUEUE_SIZE must be greater than zero".to_string()));
        }

        if self.reconnect_delay_secs == 0 {
            warn!("Reconnect delay is zero - upstream reconnects will be immediate");
        }

        Ok(())
    }

    /// Upstream URL with the feed token attached as a query parameter.
    pub fn feed_url(&self) -> String {
        let token = self.feed_token.as_deref().unwrap_or_default();
        let separator = if self.upstream_url.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", self.upstream_url, separator, token)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn log_config(&self) {
        let masked_token = match &self.feed_token {
            Some(token) => format!("{}***", token.chars().take(4).collect::<String>()),
            None => "<unset>".to_string(),
        };
        info!("Relay Configuration:");
        info!("  Viewer Bind Address: {}{}", self.bind_address, VIEWER_PATH);
        info!("  API Bind Address: {}", self.api_bind_address);
        info!("  Upstream URL: {}", self.upstream_url);
        info!("  Feed Token: {}", masked_token);
        info!("  Reconnect Delay: {}s", self.reconnect_delay_secs);
        info!("  Viewer Queue Size: {}", self.viewer_queue_size);
        info!("  Log Level: {}", self.log_level);
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_token() -> Config {
        Config {
            feed_token: Some("abcd1234".to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_config_from_env() {
        let config = Config::from_env();
        assert!(!config.bind_address.is_empty());
        assert!(!config.api_bind_address.is_empty());
        assert!(!config.upstream_url.is_empty());
    }

    #[test]
    fn test_missing_token_is_rejected() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("FINNHUB_TOKEN"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = config_with_token();
        assert!(config.validate().is_ok());

        config.upstream_url = "https://ws.finnhub.io".to_string();
        assert!(config.validate().is_err());

        config.upstream_url = DEFAULT_UPSTREAM_URL.to_string();
        config.viewer_queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_feed_url_appends_token() {
        let mut config = config_with_token();
        assert_eq!(config.feed_url(), "wss://ws.finnhub.io?token=abcd1234");

        config.upstream_url = "ws://localhost:9000/feed?format=json".to_string();
        assert_eq!(config.feed_url(), "ws://localhost:9000/feed?format=json&token=abcd1234");
    }

    #[test]
    fn test_default_reconnect_delay() {
        assert_eq!(Config::default().reconnect_delay(), Duration::from_secs(2));
    }
}
