use config::ConfigError as ConfigLibError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use crate::common::utils::duration_from_secs;
use crate::net::dial::ProxyEndpoint;
use crate::proxy::address::TargetAddress;
use crate::proxy::connector::HandshakeConfig;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileReadError(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    ParseError(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Config library error: {0}")]
    ConfigLibError(#[from] ConfigLibError),
}

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    /// Default target as host:port
    #[serde(default)]
    pub target: Option<String>,
    /// SOCKS5 proxy settings
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Log configuration
    #[serde(default)]
    pub log: LoggerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProxyConfig {
    /// Proxy address
    #[serde(default = "default_proxy_address")]
    pub address: String,
    /// Timeout in seconds for the proxy connection and handshake
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Local address to bind before dialing the proxy
    #[serde(default)]
    pub source_address: Option<String>,
    /// Timeout in seconds applied once the handshake is done
    #[serde(default)]
    pub post_handshake_timeout: Option<f64>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            address: default_proxy_address(),
            timeout: None,
            source_address: None,
            post_handshake_timeout: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggerConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path, stderr only when unset
    #[serde(default)]
    pub path: Option<String>,
    /// Log file archive pattern
    #[serde(default = "default_archive_pattern")]
    pub archive_pattern: String,
    /// Number of log files to keep
    #[serde(default = "default_file_count")]
    pub file_count: u32,
    /// Size of each log file (MB)
    #[serde(default = "default_file_size")]
    pub file_size: u64,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: None,
            archive_pattern: default_archive_pattern(),
            file_count: default_file_count(),
            file_size: default_file_size(),
        }
    }
}

/// Default proxy address
fn default_proxy_address() -> String {
    "127.0.0.1:1080".to_string()
}

/// Default log level
fn default_log_level() -> String {
    "Warn".to_string()
}

/// Default archive pattern
fn default_archive_pattern() -> String {
    "logs/archive/socks5-connect-{}.log".to_string()
}

/// Default file count
fn default_file_count() -> u32 {
    5
}

/// Default file size in MB
fn default_file_size() -> u64 {
    10
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()
            .map_err(ConfigError::ConfigLibError)?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate if configuration is valid
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.address.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Proxy address cannot be empty".to_string(),
            ));
        }
        self.proxy_endpoint()?;

        if let Some(source) = &self.proxy.source_address {
            if source.parse::<SocketAddr>().is_err() {
                return Err(ConfigError::InvalidConfig(format!(
                    "Invalid source address format: {}",
                    source
                )));
            }
        }

        for (name, value) in [
            ("proxy.timeout", self.proxy.timeout),
            ("proxy.post_handshake_timeout", self.proxy.post_handshake_timeout),
        ] {
            if let Some(secs) = value {
                if duration_from_secs(secs).is_none() {
                    return Err(ConfigError::InvalidConfig(format!(
                        "Invalid {}: {}. Must be a positive number of seconds",
                        name, secs
                    )));
                }
            }
        }

        if let Some(target) = &self.target {
            target
                .parse::<TargetAddress>()
                .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        }

        Ok(())
    }

    pub fn proxy_endpoint(&self) -> Result<ProxyEndpoint, ConfigError> {
        self.proxy
            .address
            .parse()
            .map_err(|e: crate::net::dial::ParseEndpointError| {
                ConfigError::InvalidConfig(e.to_string())
            })
    }

    /// Handshake options; call after `validate`, invalid values are dropped.
    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            proxy_timeout: self.proxy.timeout.and_then(duration_from_secs),
            proxy_source_address: self
                .proxy
                .source_address
                .as_deref()
                .and_then(|s| s.parse().ok()),
            post_handshake_timeout: self.proxy.post_handshake_timeout.and_then(duration_from_secs),
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}
