//! Client configuration.
//!
//! Configuration for the remote auth client, including:
//! - Gateway endpoint and `Host` header
//! - QR login base URL
//! - Upgrade-request headers supplied by the surrounding HTTP session
//! - Idle, connect, and heartbeat timing
//! - Reconnection backoff

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AuthError;
use crate::gateway::ReconnectConfig;

/// Default remote auth gateway endpoint.
pub const DEFAULT_GATEWAY_URL: &str = "wss://remote-auth-gateway.discord.gg/?v=1";

/// Default prefix of the QR login URL; the fingerprint is appended.
pub const DEFAULT_QR_BASE_URL: &str = "https://discordapp.com/ra/";

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Gateway WebSocket URL.
    pub gateway_url: String,
    /// `Host` header override; defaults to the gateway URL's host.
    pub host: Option<String>,
    /// Prefix of the QR login URL.
    pub qr_base_url: String,
    /// Extra headers for the upgrade request (`User-Agent`, `Origin`, ...).
    pub headers: BTreeMap<String, String>,
    /// Seconds without any inbound frame before the connection is abandoned.
    pub idle_timeout_secs: u64,
    /// Seconds allowed for the WebSocket handshake.
    pub connect_timeout_secs: u64,
    /// Slack added to the heartbeat interval before a missing ack is fatal.
    pub heartbeat_grace_secs: u64,
    /// First reconnect delay in milliseconds.
    pub reconnect_initial_delay_ms: u64,
    /// Cap on the reconnect delay in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Growth factor between reconnect attempts.
    pub reconnect_backoff_multiplier: f64,
    /// Give up after this many consecutive failed attempts (None = never).
    pub reconnect_max_attempts: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            host: None,
            qr_base_url: DEFAULT_QR_BASE_URL.to_string(),
            headers: BTreeMap::new(),
            idle_timeout_secs: 60,
            connect_timeout_secs: 10,
            heartbeat_grace_secs: 5,
            reconnect_initial_delay_ms: 1_000,
            reconnect_max_delay_ms: 60_000,
            reconnect_backoff_multiplier: 2.0,
            reconnect_max_attempts: None,
        }
    }
}

impl ClientConfig {
    /// Create a config pointing at the given gateway, other values default.
    #[must_use]
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AuthError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, AuthError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| AuthError::Config(format!("invalid JSON: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Write configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AuthError::Config(format!("failed to serialize config: {e}")))?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AuthError::Config(format!("failed to create '{}': {e}", parent.display()))
                })?;
            }
        }

        std::fs::write(path.as_ref(), json).map_err(|e| {
            AuthError::Config(format!(
                "failed to write config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.gateway_url.is_empty() {
            return Err(AuthError::Config("gateway_url cannot be empty".to_string()));
        }

        if !self.gateway_url.starts_with("ws://") && !self.gateway_url.starts_with("wss://") {
            return Err(AuthError::Config(
                "gateway_url must start with ws:// or wss://".to_string(),
            ));
        }

        let url = Url::parse(&self.gateway_url)
            .map_err(|e| AuthError::Config(format!("invalid gateway_url: {e}")))?;
        if url.host_str().is_none() && self.host.is_none() {
            return Err(AuthError::Config("gateway_url has no host".to_string()));
        }

        if self.qr_base_url.is_empty() {
            return Err(AuthError::Config("qr_base_url cannot be empty".to_string()));
        }

        if self.idle_timeout_secs == 0 {
            return Err(AuthError::Config(
                "idle_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.connect_timeout_secs == 0 {
            return Err(AuthError::Config(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.reconnect_backoff_multiplier < 1.0 {
            return Err(AuthError::Config(
                "reconnect_backoff_multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.reconnect_initial_delay_ms > self.reconnect_max_delay_ms {
            return Err(AuthError::Config(
                "reconnect_initial_delay_ms cannot exceed reconnect_max_delay_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Value for the upgrade request's `Host` header.
    ///
    /// # Errors
    ///
    /// Returns an error if no override is set and the URL has no host.
    pub fn host_header(&self) -> Result<String, AuthError> {
        if let Some(host) = &self.host {
            return Ok(host.clone());
        }

        let url = Url::parse(&self.gateway_url)
            .map_err(|e| AuthError::Config(format!("invalid gateway_url: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| AuthError::Config("gateway_url has no host".to_string()))?;

        Ok(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// Idle timeout as a duration.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Connect timeout as a duration.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Heartbeat grace period as a duration.
    #[must_use]
    pub const fn heartbeat_grace(&self) -> Duration {
        Duration::from_secs(self.heartbeat_grace_secs)
    }

    /// Backoff settings for the session controller.
    #[must_use]
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(self.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            backoff_multiplier: self.reconnect_backoff_multiplier,
            max_attempts: self.reconnect_max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway_url, DEFAULT_GATEWAY_URL);
        assert_eq!(config.idle_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = ClientConfig::from_json(r#"{ "gateway_url": "ws://127.0.0.1:9000/?v=1" }"#)
            .expect("should parse minimal config");

        assert_eq!(config.gateway_url, "ws://127.0.0.1:9000/?v=1");
        assert_eq!(config.qr_base_url, DEFAULT_QR_BASE_URL);
        assert_eq!(config.heartbeat_grace_secs, 5);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "gateway_url": "wss://gateway.example.com/?v=1",
            "host": "gateway.example.com",
            "qr_base_url": "https://example.com/ra/",
            "headers": { "User-Agent": "remauth-test", "Origin": "https://example.com" },
            "idle_timeout_secs": 30,
            "connect_timeout_secs": 5,
            "heartbeat_grace_secs": 2,
            "reconnect_initial_delay_ms": 250,
            "reconnect_max_delay_ms": 8000,
            "reconnect_backoff_multiplier": 1.5,
            "reconnect_max_attempts": 4
        }"#;

        let config = ClientConfig::from_json(json).expect("should parse full config");

        assert_eq!(config.host.as_deref(), Some("gateway.example.com"));
        assert_eq!(config.headers.get("User-Agent").map(String::as_str), Some("remauth-test"));
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));

        let reconnect = config.reconnect_config();
        assert_eq!(reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(reconnect.max_delay, Duration::from_secs(8));
        assert_eq!(reconnect.max_attempts, Some(4));
    }

    #[test]
    fn test_host_header_derivation() {
        let config = ClientConfig::default();
        assert_eq!(
            config.host_header().expect("host"),
            "remote-auth-gateway.discord.gg"
        );

        let config = ClientConfig::new("ws://127.0.0.1:9000/?v=1");
        assert_eq!(config.host_header().expect("host"), "127.0.0.1:9000");

        let config = ClientConfig {
            host: Some("override.example.com".to_string()),
            ..ClientConfig::new("ws://127.0.0.1:9000/")
        };
        assert_eq!(config.host_header().expect("host"), "override.example.com");
    }

    #[test]
    fn test_load_from_file() {
        let file = create_temp_config(r#"{ "gateway_url": "ws://localhost:9000" }"#);
        let config = ClientConfig::from_file(file.path()).expect("should load from file");
        assert_eq!(config.gateway_url, "ws://localhost:9000");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("remauth.json");

        let mut config = ClientConfig::new("ws://localhost:9100/?v=1");
        config.headers.insert("Origin".to_string(), "https://example.com".to_string());
        config.save(&path).expect("save");

        let loaded = ClientConfig::from_file(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_file_not_found() {
        let result = ClientConfig::from_file("/nonexistent/path/remauth.json");
        assert!(matches!(result, Err(AuthError::Config(_))));
    }

    #[test]
    fn test_invalid_gateway_url_scheme_rejected() {
        let result = ClientConfig::from_json(r#"{ "gateway_url": "https://gateway.example.com" }"#);
        let err = result.expect_err("http scheme must be rejected");
        assert!(err.to_string().contains("ws:// or wss://"));
    }

    #[test]
    fn test_empty_gateway_url_rejected() {
        let err = ClientConfig::from_json(r#"{ "gateway_url": "" }"#).expect_err("empty url");
        assert!(err.to_string().contains("gateway_url cannot be empty"));
    }

    #[test]
    fn test_zero_idle_timeout_rejected() {
        let err = ClientConfig::from_json(r#"{ "idle_timeout_secs": 0 }"#).expect_err("zero idle");
        assert!(err.to_string().contains("idle_timeout_secs must be greater than 0"));
    }

    #[test]
    fn test_shrinking_backoff_rejected() {
        let err = ClientConfig::from_json(r#"{ "reconnect_backoff_multiplier": 0.5 }"#)
            .expect_err("multiplier below one");
        assert!(err.to_string().contains("at least 1.0"));
    }

    #[test]
    fn test_inverted_backoff_bounds_rejected() {
        let err = ClientConfig::from_json(
            r#"{ "reconnect_initial_delay_ms": 5000, "reconnect_max_delay_ms": 100 }"#,
        )
        .expect_err("inverted bounds");
        assert!(err.to_string().contains("cannot exceed"));
    }
}
