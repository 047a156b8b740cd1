//! Configuration management for pmseries
//!
//! TOML file support with environment variable overrides and defaults.
//! A file is looked up in this order: an explicit path, `PMSERIES_CONFIG`,
//! `./pmseries.toml`. Without any file the defaults apply.

use crate::error::{Error, Result};
use crate::store::RedisConfig;
use crate::types::DEFAULT_VALUE_COUNT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "PMSERIES_CONFIG";

/// Configuration file read from the working directory when nothing else is given
pub const DEFAULT_CONFIG_FILE: &str = "pmseries.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SeriesConfig {
    /// Key-value store connection
    #[serde(default)]
    pub store: StoreSection,

    /// Archive loading
    #[serde(default)]
    pub load: LoadSection,

    /// Query defaults
    #[serde(default)]
    pub query: QuerySection,

    /// Logging
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Store connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreSection {
    /// Server URL
    #[serde(default = "default_url")]
    pub url: String,

    /// Prefix applied to every key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-pipeline timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Use TLS (`rediss://`)
    #[serde(default)]
    pub tls: bool,

    /// Number of interned names kept in process
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

/// Loader configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoadSection {
    /// Correct counters that wrapped at their integer width
    #[serde(default)]
    pub counter_wrap: bool,
}

/// Query configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuerySection {
    /// Samples per series returned when no count is given
    #[serde(default = "default_count")]
    pub default_count: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace), overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_url() -> String { "redis://127.0.0.1:6379".to_string() }
fn default_key_prefix() -> String { crate::store::keys::DEFAULT_KEY_PREFIX.to_string() }
fn default_connect_timeout() -> u64 { 5 }
fn default_command_timeout() -> u64 { 10 }
fn default_cache_size() -> usize { crate::mapper::DEFAULT_CACHE_SIZE }
fn default_count() -> usize { DEFAULT_VALUE_COUNT }
fn default_log_level() -> String { "warn".to_string() }

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            url: default_url(),
            key_prefix: default_key_prefix(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            tls: false,
            cache_size: default_cache_size(),
        }
    }
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            default_count: default_count(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SeriesConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        toml::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("Failed to parse config file {}: {}", path.display(), e))
        })
    }

    /// Locate and read the configuration, apply environment overrides and validate
    ///
    /// An explicit path or `PMSERIES_CONFIG` must exist; `./pmseries.toml`
    /// is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => Self::from_file(&path)?,
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.is_file() {
                    Self::from_file(local)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env_overrides();
        config.validate().map_err(Error::Configuration)?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Presence alone enables wrap correction
        if std::env::var_os("PCP_COUNTER_WRAP").is_some() {
            self.load.counter_wrap = true;
        }

        // Store
        if let Ok(url) = std::env::var("PMSERIES_REDIS_URL") {
            self.store.url = url;
        }
        if let Ok(secs) = std::env::var("PMSERIES_CONNECT_TIMEOUT") {
            if let Ok(s) = secs.parse() {
                self.store.connect_timeout_secs = s;
            }
        }
        if let Ok(secs) = std::env::var("PMSERIES_COMMAND_TIMEOUT") {
            if let Ok(s) = secs.parse() {
                self.store.command_timeout_secs = s;
            }
        }

        // Query
        if let Ok(count) = std::env::var("PMSERIES_DEFAULT_COUNT") {
            if let Ok(c) = count.parse() {
                self.query.default_count = c;
            }
        }

        // Logging
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.query.default_count == 0 {
            return Err("Default count must be > 0".to_string());
        }
        if self.store.cache_size == 0 {
            return Err("Cache size must be > 0".to_string());
        }
        self.redis_config().validate()
    }

    /// Connection settings for the store
    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig::with_url(self.store.url.clone())
            .connection_timeout(Duration::from_secs(self.store.connect_timeout_secs))
            .command_timeout(Duration::from_secs(self.store.command_timeout_secs))
            .tls(self.store.tls)
    }
}
