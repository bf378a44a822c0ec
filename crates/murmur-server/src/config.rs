//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A file named by `MURMUR_CONFIG`
//! - TOML configuration file in a default location
//! - Environment variables (MURMUR_HOST, MURMUR_PORT) over built-in defaults

use anyhow::{Context, Result};
use murmur_core::{IngestConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Event stream configuration.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Request limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Event stream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Keep-alive comment interval in milliseconds. `0` disables keep-alives.
    #[serde(default = "default_keepalive")]
    pub keepalive_ms: u64,
}

/// Request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message length in characters.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Users created at startup, ids assigned from 1 in order.
    #[serde(default = "default_seed_users")]
    pub seed_users: Vec<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("MURMUR_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("MURMUR_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5000)
}

fn default_true() -> bool {
    true
}

fn default_keepalive() -> u64 {
    15_000 // 15 seconds
}

fn default_max_content_length() -> usize {
    murmur_core::ingest::DEFAULT_MAX_CONTENT_LENGTH
}

fn default_seed_users() -> Vec<String> {
    vec!["User1".to_string(), "User2".to_string()]
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            stream: StreamConfig::default(),
            limits: LimitsConfig::default(),
            store: StoreConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive_ms: default_keepalive(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_content_length: default_max_content_length(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            seed_users: default_seed_users(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// `MURMUR_CONFIG` names a file that cannot be read.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("MURMUR_CONFIG") {
            return Self::from_file(shellexpand::tilde(&path).as_ref());
        }

        let config_paths = [
            "murmur.toml",
            "/etc/murmur/murmur.toml",
            "~/.config/murmur/murmur.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Streaming session settings.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            keepalive: (self.stream.keepalive_ms > 0)
                .then(|| Duration::from_millis(self.stream.keepalive_ms)),
        }
    }

    /// Ingest settings.
    #[must_use]
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            max_content_length: self.limits.max_content_length,
        }
    }
}
