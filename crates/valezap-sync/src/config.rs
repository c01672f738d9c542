//! Client configuration.
//!
//! Loaded from `VALEZAP_*` environment variables; the CLI layers its flags on
//! top. Unparseable numeric or boolean values fall back to their defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(4);
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_FAILURE_NOTICE: &str = "Could not send your message. Please try again shortly.";

pub const HISTORY_PATH: &str = "/api/messages";
pub const STREAM_PATH: &str = "/api/messages/stream";
pub const SEND_PATH: &str = "/functions/v1/webhook-valezap";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the chat backend, e.g. `http://127.0.0.1:5000`.
    pub server_base_url: String,
    /// Sent as `x-api-key` on the send request. Empty means no header.
    pub api_key: String,
    /// Fixed pause between a live-stream failure and the next attempt.
    pub reconnect_delay: Duration,
    /// Upper bound on a send request; expiry counts as a transport failure.
    pub send_timeout: Duration,
    /// Re-fetch history after the live stream comes back.
    pub resync_on_reconnect: bool,
    /// Assistant-side text shown when a send fails.
    pub failure_notice: String,
    /// Holds the persisted player id and the logs directory.
    pub state_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_base_url: DEFAULT_SERVER_URL.to_string(),
            api_key: String::new(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            resync_on_reconnect: true,
            failure_notice: DEFAULT_FAILURE_NOTICE.to_string(),
            state_dir: default_state_dir(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            server_base_url: non_empty("VALEZAP_SERVER_URL")
                .unwrap_or(defaults.server_base_url),
            api_key: lookup("VALEZAP_CLIENT_API_KEY").unwrap_or_default(),
            reconnect_delay: non_empty("VALEZAP_RECONNECT_DELAY_SECS")
                .and_then(|v| parse_secs(&v))
                .unwrap_or(defaults.reconnect_delay),
            send_timeout: non_empty("VALEZAP_SEND_TIMEOUT_SECS")
                .and_then(|v| parse_secs(&v))
                .filter(|d| !d.is_zero())
                .unwrap_or(defaults.send_timeout),
            resync_on_reconnect: non_empty("VALEZAP_RESYNC_ON_RECONNECT")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.resync_on_reconnect),
            failure_notice: non_empty("VALEZAP_FAILURE_NOTICE")
                .unwrap_or(defaults.failure_notice),
            state_dir: non_empty("VALEZAP_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.server_base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidServerUrl(self.server_base_url.clone()));
        }
        Ok(())
    }

    /// Base URL without a trailing slash, ready for path concatenation.
    pub fn base_url(&self) -> &str {
        self.server_base_url.trim().trim_end_matches('/')
    }
}

pub fn default_state_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".valezap"))
        .join("valezap")
}

fn parse_secs(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.server_base_url, DEFAULT_SERVER_URL);
        assert_eq!(config.reconnect_delay, Duration::from_secs(4));
        assert_eq!(config.send_timeout, Duration::from_secs(30));
        assert!(config.resync_on_reconnect);
        assert!(config.api_key.is_empty());
        assert_eq!(config.failure_notice, DEFAULT_FAILURE_NOTICE);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("VALEZAP_SERVER_URL", "https://chat.example.com/"),
            ("VALEZAP_CLIENT_API_KEY", "k-123"),
            ("VALEZAP_RECONNECT_DELAY_SECS", "9"),
            ("VALEZAP_SEND_TIMEOUT_SECS", "5"),
            ("VALEZAP_RESYNC_ON_RECONNECT", "off"),
            ("VALEZAP_STATE_DIR", "/tmp/vz"),
        ])
        .unwrap();
        assert_eq!(config.base_url(), "https://chat.example.com");
        assert_eq!(config.api_key, "k-123");
        assert_eq!(config.reconnect_delay, Duration::from_secs(9));
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert!(!config.resync_on_reconnect);
        assert_eq!(config.state_dir, PathBuf::from("/tmp/vz"));
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("VALEZAP_RECONNECT_DELAY_SECS", "soon"),
            ("VALEZAP_SEND_TIMEOUT_SECS", "0"),
            ("VALEZAP_RESYNC_ON_RECONNECT", "maybe"),
        ])
        .unwrap();
        assert_eq!(config.reconnect_delay, DEFAULT_RECONNECT_DELAY);
        assert_eq!(config.send_timeout, DEFAULT_SEND_TIMEOUT);
        assert!(config.resync_on_reconnect);
    }

    #[test]
    fn rejects_non_http_url() {
        let err = config_from(&[("VALEZAP_SERVER_URL", "ftp://nope")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidServerUrl(_)));
    }
}
