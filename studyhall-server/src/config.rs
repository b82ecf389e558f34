//! Server configuration: defaults overlaid with `STUDYHALL_*` variables.

use std::path::PathBuf;
use thiserror::Error;

use studyhall_collab::GatewayConfig;
use studyhall_store::StoreConfig;

pub const ENV_HTTP_ADDR: &str = "STUDYHALL_HTTP_ADDR";
pub const ENV_WS_ADDR: &str = "STUDYHALL_WS_ADDR";
pub const ENV_DATA_DIR: &str = "STUDYHALL_DATA_DIR";
pub const ENV_DIRECTORY: &str = "STUDYHALL_DIRECTORY";
pub const ENV_REDIS_URL: &str = "STUDYHALL_REDIS_URL";
pub const ENV_IDLE_TIMEOUT_SECS: &str = "STUDYHALL_IDLE_TIMEOUT_SECS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

/// Everything the server binary needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP API bind address
    pub http_addr: String,
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    /// JSON file read by [`StaticDirectory::load`](studyhall_core::StaticDirectory::load)
    pub directory_path: PathBuf,
    /// Shared room backend; in-process rooms when `None`
    pub redis_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:8080".to_string(),
            gateway: GatewayConfig::default(),
            store: StoreConfig::default(),
            directory_path: PathBuf::from("directory.json"),
            redis_url: None,
        }
    }
}

impl ServerConfig {
    /// Defaults plus the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults plus whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = lookup(ENV_HTTP_ADDR) {
            config.http_addr = addr;
        }
        if let Some(addr) = lookup(ENV_WS_ADDR) {
            config.gateway.bind_addr = addr;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            config.store.path = PathBuf::from(dir);
        }
        if let Some(path) = lookup(ENV_DIRECTORY) {
            config.directory_path = PathBuf::from(path);
        }
        config.redis_url = lookup(ENV_REDIS_URL);
        if let Some(raw) = lookup(ENV_IDLE_TIMEOUT_SECS) {
            config.gateway.idle_timeout_secs = match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    return Err(ConfigError::InvalidNumber {
                        var: ENV_IDLE_TIMEOUT_SECS,
                        value: raw,
                    })
                }
            };
        }
        Ok(config)
    }
}
