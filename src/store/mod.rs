//! Key-value store adapter
//!
//! The engine talks to a Redis-protocol store through the [`Store`] trait:
//! a pipeline of commands goes out in one round trip and the replies are
//! drained in issue order. Two implementations are provided:
//!
//! - [`RedisStore`]: multiplexed async connection to a real server
//! - [`MemoryStore`]: in-process emulation for tests and dry runs
//!
//! # Example
//!
//! ```rust
//! use pcp_series::store::{Command, MemoryStore, Pipeline, Store};
//!
//! # async fn example() -> Result<(), pcp_series::error::StoreError> {
//! let store = MemoryStore::new();
//! let mut pipeline = Pipeline::new();
//! pipeline.append(Command::sadd("pcp:example", ["a", "b"]));
//! pipeline.append(Command::smembers("pcp:example"));
//!
//! let mut replies = store.execute(pipeline).await?;
//! replies.next_reply("sadd")?.into_integer("sadd")?;
//! let members = replies.next_reply("smembers")?.into_strings("smembers")?;
//! assert_eq!(members, vec!["a", "b"]);
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod connection;
pub mod keys;
pub mod memory;
pub mod schema;
pub mod scripts;
pub mod util;

pub use command::{Command, Pipeline, Replies, Reply, ScriptHandle};
pub use connection::{RedisConfig, RedisStore};
pub use keys::Keys;
pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;

/// A Redis-protocol store
#[async_trait]
pub trait Store: Send + Sync {
    /// Send all queued commands in one round trip and collect their replies
    ///
    /// Error replies to individual commands are returned as [`Reply::Error`];
    /// only connectivity or protocol failures fail the whole call.
    async fn execute(&self, pipeline: Pipeline) -> Result<Replies, StoreError>;

    /// Register a script, returning the handle used with `EVALSHA`
    async fn load_script(&self, source: &str) -> Result<ScriptHandle, StoreError>;
}
