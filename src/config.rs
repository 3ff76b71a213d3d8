use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dirs;
use crate::error::{GatewayError, Result};

/// Settings for the gateway server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host address for the HTTP server (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the HTTP server (default: 3000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL of the agent backend (default: http://localhost:8000)
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Timeout for non-streaming backend calls, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Connect timeout for every backend call, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Answer chat requests with a canned reply when the backend is unreachable
    #[serde(default = "default_mock_fallback")]
    pub mock_fallback: bool,

    /// Base64-encoded service-account JSON used to mint backend identity tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_key_json: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_mock_fallback() -> bool {
    true
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backend_url: default_backend_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            mock_fallback: default_mock_fallback(),
            google_key_json: None,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from the default config file path, then apply
    /// environment overrides. Returns defaults if the file does not exist.
    pub fn load() -> Result<Self> {
        let path = dirs::config_path();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| {
                GatewayError::Config(format!(
                    "Failed to read config file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `BACKEND_URL`, `GOOGLE_KEY_JSON` and `PORT`.
    ///
    /// Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup("BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(key) = lookup("GOOGLE_KEY_JSON") {
            self.google_key_json = Some(key);
        }
        if let Some(port) = lookup("PORT") {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| GatewayError::Config(format!("Invalid PORT value: {port}")))?;
        }
        Ok(())
    }

    /// Returns the server bind address string (e.g., "127.0.0.1:3000").
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Backend base URL without a trailing slash.
    pub fn backend_base(&self) -> &str {
        self.backend_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.backend_url, "http://localhost:8000");
        assert!(config.mock_fallback);
        assert!(config.google_key_json.is_none());
    }

    #[test]
    fn test_bind_address() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_backend_base_trims_slash() {
        let config = GatewayConfig {
            backend_url: "https://agent.example.com/".into(),
            ..Default::default()
        };
        assert_eq!(config.backend_base(), "https://agent.example.com");
    }

    #[test]
    fn test_config_deserialize() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 8080
            backend_url = "http://agent:9000"
            mock_fallback = false
        "#;
        let config: GatewayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.backend_url, "http://agent:9000");
        assert!(!config.mock_fallback);
        assert_eq!(config.request_timeout_secs, 60);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatewayConfig::default();
        config
            .apply_env(env(&[
                ("BACKEND_URL", "https://cloudrun.example"),
                ("GOOGLE_KEY_JSON", "e30="),
                ("PORT", "4000"),
            ]))
            .unwrap();
        assert_eq!(config.backend_url, "https://cloudrun.example");
        assert_eq!(config.google_key_json.as_deref(), Some("e30="));
        assert_eq!(config.port, 4000);
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut config = GatewayConfig::default();
        config
            .apply_env(env(&[("BACKEND_URL", ""), ("GOOGLE_KEY_JSON", "  ")]))
            .unwrap();
        assert_eq!(config.backend_url, "http://localhost:8000");
        assert!(config.google_key_json.is_none());
    }

    #[test]
    fn test_invalid_port_is_config_error() {
        let mut config = GatewayConfig::default();
        let err = config.apply_env(env(&[("PORT", "http")])).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
