//! Configuration Module
//!
//! Provides TOML-based configuration for Courier with support for:
//! - Local listener settings
//! - Remote broker endpoint
//! - Request limits and default time-to-live
//! - Statically registered queues
//! - Environment variable overrides (COURIER__* prefix)

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

// Re-export metrics config types
pub use metrics::MetricsConfig;

mod metrics;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}


/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Local listener configuration
    pub server: ServerConfig,
    /// Remote endpoint that receives outbound requests
    pub broker: BrokerConfig,
    /// Request limits
    pub limits: LimitsConfig,
    /// Queues registered at startup
    #[serde(default)]
    pub queue: Vec<QueueConfig>,
    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Local listener configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to accept inbound requests on. No listener when unset.
    pub bind: Option<SocketAddr>,
}

/// Remote broker endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name or IP
    #[serde(default = "default_broker_host")]
    pub host: String,
    /// Broker port
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Request path
    #[serde(default = "default_broker_path")]
    pub path: String,
    /// Timeout for establishing the TCP connection
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

fn default_broker_host() -> String {
    "127.0.0.1".to_string()
}
fn default_broker_port() -> u16 {
    8080
}
fn default_broker_path() -> String {
    "/".to_string()
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            path: default_broker_path(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl BrokerConfig {
    /// `host:port` authority used for the Host header and TCP connect
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Request limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum inbound request or reply body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Maximum outstanding requests (0 = unbounded)
    #[serde(default)]
    pub max_pending: usize,
    /// Time-to-live applied by queue senders (0 = never expire)
    #[serde(default, with = "humantime_serde")]
    pub default_time_to_live: Duration,
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            max_pending: 0,
            default_time_to_live: Duration::ZERO,
        }
    }
}

/// A queue registered at startup
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Queue name (message channel)
    pub name: String,
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `COURIER__` prefix with double underscores for nesting:
    ///    - `COURIER__SERVER__BIND=0.0.0.0:8081` overrides `server.bind`
    ///    - `COURIER__BROKER__HOST=broker.local` overrides `broker.host`
    ///    - `COURIER__LIMITS__MAX_PENDING=500` overrides `limits.max_pending`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("broker.host", "127.0.0.1")?
            .set_default("broker.port", 8080)?
            .set_default("broker.path", "/")?
            .set_default("broker.connect_timeout", "5s")?
            .set_default("limits.max_body_size", 1024 * 1024)?
            .set_default("limits.max_pending", 0)?
            .set_default("limits.default_time_to_live", "0s")?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("COURIER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "broker.host must not be empty".to_string(),
            ));
        }

        if self.broker.port == 0 {
            return Err(ConfigError::Validation(
                "broker.port must not be 0".to_string(),
            ));
        }

        if !self.broker.path.starts_with('/') {
            return Err(ConfigError::Validation(format!(
                "broker.path '{}' must start with '/'",
                self.broker.path
            )));
        }

        if self.limits.max_body_size == 0 {
            return Err(ConfigError::Validation(
                "limits.max_body_size must be greater than 0".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for queue in &self.queue {
            if queue.name.is_empty() {
                return Err(ConfigError::Validation(
                    "queue name must not be empty".to_string(),
                ));
            }
            if !seen.insert(queue.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "queue '{}' is defined more than once",
                    queue.name
                )));
            }
        }

        Ok(())
    }
}
