//! Desk configuration
//!
//! Assembled from two sources:
//! 1. `desk.toml` (optional): service and coordinator settings
//! 2. environment (`.env` is loaded by the binary): overrides any TOML value
//!
//! Recognized env vars: `ORDERFLOW_API_URL`, `ORDERFLOW_BIND_ADDR`,
//! `ORDER_STORE_PATH`, `CALL_TIMEOUT_SECS`, `NETWORK_RETRY_ATTEMPTS`.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::coordinator::{CoordinatorSettings, RetryPolicy};

// ============================================================================
// desk.toml
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeskToml {
    #[serde(default = "default_orderflow_api_url")]
    orderflow_api_url: String,
    #[serde(default = "default_bind_addr")]
    bind_addr: String,
    /// Snapshot file for the order index; volatile if absent
    #[serde(default)]
    store_path: Option<PathBuf>,
    #[serde(default = "default_call_timeout_secs")]
    call_timeout_secs: u64,
    #[serde(default = "default_network_retry_attempts")]
    network_retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    retry_max_delay_ms: u64,
    #[serde(default = "default_http_timeout_secs")]
    http_timeout_secs: u64,
}

impl Default for DeskToml {
    fn default() -> Self {
        Self {
            orderflow_api_url: default_orderflow_api_url(),
            bind_addr: default_bind_addr(),
            store_path: None,
            call_timeout_secs: default_call_timeout_secs(),
            network_retry_attempts: default_network_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

// ============================================================================
// DeskConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeskConfig {
    /// Base URL of the orderflow service (HTTP index client)
    pub orderflow_api_url: String,
    /// Listen address of the orderflow service
    pub bind_addr: String,
    pub store_path: Option<PathBuf>,
    pub call_timeout: Duration,
    /// Total attempts for calls that failed with the network unreachable
    pub network_retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub http_timeout: Duration,
}

impl DeskConfig {
    /// Load `desk.toml` (if it exists) and apply environment overrides
    pub fn load<P: AsRef<Path>>(desk_toml_path: P) -> Result<Self> {
        let path = desk_toml_path.as_ref();
        let desk = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            toml::from_str::<DeskToml>(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            info!("{} not found, using defaults", path.display());
            DeskToml::default()
        };

        Self::from_toml(desk, |key| std::env::var(key).ok())
    }

    fn from_toml(desk: DeskToml, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let orderflow_api_url = env("ORDERFLOW_API_URL").unwrap_or(desk.orderflow_api_url);
        let bind_addr = env("ORDERFLOW_BIND_ADDR").unwrap_or(desk.bind_addr);
        let store_path = env("ORDER_STORE_PATH").map(PathBuf::from).or(desk.store_path);

        let call_timeout_secs = match env("CALL_TIMEOUT_SECS") {
            Some(v) => v
                .parse::<u64>()
                .map_err(|_| anyhow!("CALL_TIMEOUT_SECS must be a whole number of seconds"))?,
            None => desk.call_timeout_secs,
        };
        let network_retry_attempts = match env("NETWORK_RETRY_ATTEMPTS") {
            Some(v) => v
                .parse::<u32>()
                .map_err(|_| anyhow!("NETWORK_RETRY_ATTEMPTS must be a non-negative integer"))?,
            None => desk.network_retry_attempts,
        };

        if call_timeout_secs == 0 {
            anyhow::bail!("call timeout must be at least one second");
        }

        Ok(DeskConfig {
            orderflow_api_url: orderflow_api_url.trim_end_matches('/').to_string(),
            bind_addr,
            store_path,
            call_timeout: Duration::from_secs(call_timeout_secs),
            network_retry_attempts: network_retry_attempts.max(1),
            retry_base_delay: Duration::from_millis(desk.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(desk.retry_max_delay_ms),
            http_timeout: Duration::from_secs(desk.http_timeout_secs),
        })
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            call_timeout: self.call_timeout,
            retry: RetryPolicy {
                max_attempts: self.network_retry_attempts,
                base_delay: self.retry_base_delay,
                max_delay: self.retry_max_delay,
            },
        }
    }
}

fn default_orderflow_api_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_network_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_retry_max_delay_ms() -> u64 {
    30_000
}

fn default_http_timeout_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_desk_toml_defaults() {
        let desk: DeskToml = toml::from_str("").unwrap();
        assert_eq!(desk.orderflow_api_url, "http://localhost:3000");
        assert_eq!(desk.bind_addr, "0.0.0.0:3000");
        assert!(desk.store_path.is_none());
        assert_eq!(desk.call_timeout_secs, 120);
        assert_eq!(desk.network_retry_attempts, 3);
    }

    #[test]
    fn test_env_overrides_toml() {
        let desk: DeskToml = toml::from_str(
            r#"
            orderflow_api_url = "http://index.internal:3000/"
            store_path = "/var/lib/otc/orders.json"
            call_timeout_secs = 60
            "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("CALL_TIMEOUT_SECS", "15"),
            ("NETWORK_RETRY_ATTEMPTS", "5"),
            ("ORDERFLOW_BIND_ADDR", "127.0.0.1:8080"),
        ]
        .into_iter()
        .collect();
        let config = DeskConfig::from_toml(desk, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.orderflow_api_url, "http://index.internal:3000");
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.store_path, Some(PathBuf::from("/var/lib/otc/orders.json")));
        assert_eq!(config.call_timeout, Duration::from_secs(15));
        assert_eq!(config.coordinator_settings().retry.max_attempts, 5);
    }

    #[test]
    fn test_invalid_env_values_rejected() {
        let bad_timeout = DeskConfig::from_toml(DeskToml::default(), |k| {
            (k == "CALL_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(bad_timeout.is_err());

        let zero_timeout = DeskConfig::from_toml(DeskToml::default(), |k| {
            (k == "CALL_TIMEOUT_SECS").then(|| "0".to_string())
        });
        assert!(zero_timeout.is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DeskConfig::load(dir.path().join("desk.toml")).unwrap();
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_base_delay, Duration::from_millis(2000));

        let defaults = DeskConfig::from_toml(DeskToml::default(), no_env).unwrap();
        assert_eq!(defaults.coordinator_settings().call_timeout, Duration::from_secs(120));
        assert_eq!(defaults.orderflow_api_url, "http://localhost:3000");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desk.toml");
        fs::write(&path, "call_timeout_secs = \"sixty\"").unwrap();
        let err = DeskConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }
}
