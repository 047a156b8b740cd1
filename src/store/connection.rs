//! Redis-backed store over a multiplexed async connection
//!
//! The connection is opened once under an explicit connect timeout and
//! every pipeline runs under the configured command timeout. Failures are
//! reported to the caller without retrying.
//!
//! # Example
//!
//! ```rust,no_run
//! use pcp_series::store::{RedisConfig, RedisStore};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RedisConfig::with_url("redis://localhost:6379")
//!     .connection_timeout(Duration::from_secs(2))
//!     .command_timeout(Duration::from_secs(5));
//!
//! let store = RedisStore::connect(config).await?;
//! # Ok(())
//! # }
//! ```

use super::command::{Pipeline, Replies, Reply, ScriptHandle};
use super::util::safe_redis_error;
use super::Store;
use crate::error::StoreError;
use crate::metrics::{record_round_trip, record_store_failure};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, Value};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Connection settings for a Redis-protocol store
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Server URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Timeout for establishing the connection
    /// Default: 5 seconds
    pub connection_timeout: Duration,

    /// Timeout for each pipeline round trip
    /// Default: 10 seconds
    pub command_timeout: Duration,

    /// Enable TLS for the connection
    /// Default: false
    pub tls_enabled: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
            tls_enabled: false,
        }
    }
}

impl RedisConfig {
    /// Create a new config with the specified URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the connection timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Enable or disable TLS
    ///
    /// Requires the `redis-tls` feature.
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Store URL cannot be empty".to_string());
        }
        if self.connection_timeout.is_zero() {
            return Err("Connection timeout must be greater than 0".to_string());
        }
        if self.command_timeout.is_zero() {
            return Err("Command timeout must be greater than 0".to_string());
        }

        #[cfg(not(feature = "redis-tls"))]
        if self.tls_enabled {
            return Err(
                "TLS is enabled but the 'redis-tls' feature is not compiled. \
                 Enable it with: cargo build --features redis-tls"
                    .to_string(),
            );
        }

        if self.tls_enabled && !self.url.starts_with("rediss://") {
            return Err("TLS is enabled but URL doesn't use 'rediss://' scheme".to_string());
        }
        if !self.tls_enabled && self.url.starts_with("rediss://") {
            return Err("URL uses 'rediss://' scheme but TLS is not enabled".to_string());
        }

        Ok(())
    }

    /// URL with the scheme matching the TLS setting
    pub fn effective_url(&self) -> String {
        if self.tls_enabled && self.url.starts_with("redis://") {
            format!("rediss://{}", &self.url[8..])
        } else if !self.tls_enabled && self.url.starts_with("rediss://") {
            format!("redis://{}", &self.url[9..])
        } else {
            self.url.clone()
        }
    }
}

/// Store backed by a Redis-protocol server
pub struct RedisStore {
    connection: MultiplexedConnection,
    config: RedisConfig,
}

impl RedisStore {
    /// Connect to the server, failing once the connect timeout elapses
    pub async fn connect(config: RedisConfig) -> Result<Self, StoreError> {
        config.validate().map_err(StoreError::Configuration)?;

        let url = config.effective_url();
        let client = Client::open(url.as_str())
            .map_err(|e| StoreError::Connection(safe_redis_error(&config.url, &e)))?;

        let start = Instant::now();
        let connection =
            tokio::time::timeout(config.connection_timeout, client.get_multiplexed_async_connection())
                .await
                .map_err(|_| {
                    StoreError::Timeout(format!(
                        "connecting after {:?}",
                        config.connection_timeout
                    ))
                })?
                .map_err(|e| StoreError::Connection(safe_redis_error(&config.url, &e)))?;

        debug!("Store connection established in {:?}", start.elapsed());
        Ok(Self { connection, config })
    }

    /// Connection settings
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    fn map_error(&self, err: &RedisError) -> StoreError {
        if err.is_timeout() {
            return StoreError::Timeout(safe_redis_error(&self.config.url, err));
        }
        if err.is_connection_dropped() || err.is_io_error() || err.is_connection_refusal() {
            return StoreError::Connection(safe_redis_error(&self.config.url, err));
        }
        match err.code() {
            Some(code) => StoreError::Server(format!("{} ({})", safe_redis_error(&self.config.url, err), code)),
            None => StoreError::Server(safe_redis_error(&self.config.url, err)),
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn execute(&self, pipeline: Pipeline) -> Result<Replies, StoreError> {
        if pipeline.is_empty() {
            return Ok(Replies::default());
        }

        let count = pipeline.len();
        let mut pipe = redis::pipe();
        for command in pipeline.commands() {
            pipe.cmd(command.name());
            for arg in command.args() {
                pipe.arg(arg.as_str());
            }
        }

        let mut conn = self.connection.clone();
        let start = Instant::now();
        let result = tokio::time::timeout(
            self.config.command_timeout,
            pipe.query_async::<Vec<Value>>(&mut conn),
        )
        .await;

        match result {
            Ok(Ok(values)) => {
                record_round_trip("redis", count, start.elapsed().as_secs_f64());
                if values.len() != count {
                    return Err(StoreError::UnexpectedReply {
                        context: "pipeline".to_string(),
                        expected: "one reply per command",
                        found: format!("{} replies for {} commands", values.len(), count),
                    });
                }
                Ok(Replies::new(values.into_iter().map(convert).collect()))
            },
            Ok(Err(e)) => {
                record_store_failure("redis");
                warn!(commands = count, "Store pipeline failed: {}", safe_redis_error(&self.config.url, &e));
                Err(self.map_error(&e))
            },
            Err(_) => {
                record_store_failure("redis");
                Err(StoreError::Timeout(format!(
                    "pipeline of {} commands after {:?}",
                    count, self.config.command_timeout
                )))
            },
        }
    }

    async fn load_script(&self, source: &str) -> Result<ScriptHandle, StoreError> {
        let expected = redis::Script::new(source).get_hash().to_string();
        let mut conn = self.connection.clone();
        let sha = tokio::time::timeout(
            self.config.command_timeout,
            redis::cmd("SCRIPT")
                .arg("LOAD")
                .arg(source)
                .query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| StoreError::Timeout("SCRIPT LOAD".to_string()))?
        .map_err(|e| StoreError::Script(safe_redis_error(&self.config.url, &e)))?;

        if sha != expected {
            return Err(StoreError::Script(format!(
                "server returned digest {} for script {}",
                sha, expected
            )));
        }
        debug!(sha = %sha, "Registered store script");
        Ok(ScriptHandle::new(sha))
    }
}

/// Convert a protocol value into the engine's reply model
fn convert(value: Value) -> Reply {
    match value {
        Value::Nil => Reply::Nil,
        Value::Int(i) => Reply::Integer(i),
        Value::BulkString(bytes) => Reply::Bulk(String::from_utf8_lossy(&bytes).into_owned()),
        Value::SimpleString(s) => Reply::Status(s),
        Value::Okay => Reply::Status("OK".to_string()),
        Value::Array(items) | Value::Set(items) => {
            Reply::Array(items.into_iter().map(convert).collect())
        },
        Value::Map(pairs) => Reply::Array(
            pairs
                .into_iter()
                .flat_map(|(k, v)| [convert(k), convert(v)])
                .collect(),
        ),
        Value::Double(d) => Reply::Bulk(d.to_string()),
        Value::Boolean(b) => Reply::Integer(b as i64),
        Value::VerbatimString { text, .. } => Reply::Bulk(text),
        other => Reply::Error(format!("unsupported reply {:?}", other)),
    }
}
