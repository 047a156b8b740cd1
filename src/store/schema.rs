//! Schema version handshake
//!
//! Run once per connection before any load or query work. An empty store is
//! stamped with the current version; a store written by a newer schema is
//! refused.

use super::command::{Command, Pipeline};
use super::keys::Keys;
use super::Store;
use crate::error::{Error, Result, StoreError};
use tracing::{debug, info};

/// Schema version written and understood by this build
pub const SCHEMA_VERSION: u32 = 2;

/// Verify (or initialise) the schema version, returning the stored version
pub async fn check_version(store: &dyn Store, keys: &Keys) -> Result<u32> {
    let key = keys.schema_version();
    let mut pipeline = Pipeline::new();
    pipeline.append(Command::get(&key));
    let mut replies = store.execute(pipeline).await?;
    let stored = replies
        .next_reply("GET version:schema")?
        .into_optional_string("GET version:schema")?;

    match stored {
        None => {
            let mut pipeline = Pipeline::new();
            pipeline.append(Command::set(&key, SCHEMA_VERSION));
            let mut replies = store.execute(pipeline).await?;
            replies
                .next_reply("SET version:schema")?
                .into_ok("SET version:schema")?;
            info!(version = SCHEMA_VERSION, "Initialised store schema version");
            Ok(SCHEMA_VERSION)
        },
        Some(text) => {
            let found: u32 = text.trim().parse().map_err(|_| StoreError::UnexpectedReply {
                context: "GET version:schema".to_string(),
                expected: "integer version",
                found: text.clone(),
            })?;
            if found > SCHEMA_VERSION {
                return Err(Error::SchemaVersion {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
            debug!(version = found, "Store schema version accepted");
            Ok(found)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn stored(store: &MemoryStore, keys: &Keys) -> Option<String> {
        let mut pipeline = Pipeline::new();
        pipeline.append(Command::get(&keys.schema_version()));
        let mut replies = store.execute(pipeline).await.unwrap();
        replies.next_reply("t").unwrap().into_optional_string("t").unwrap()
    }

    async fn stamp(store: &MemoryStore, keys: &Keys, value: &str) {
        let mut pipeline = Pipeline::new();
        pipeline.append(Command::set(&keys.schema_version(), value));
        store.execute(pipeline).await.unwrap();
    }

    #[tokio::test]
    async fn test_initialises_empty_store() {
        let store = MemoryStore::new();
        let keys = Keys::default();
        assert_eq!(check_version(&store, &keys).await.unwrap(), SCHEMA_VERSION);
        assert_eq!(stored(&store, &keys).await, Some(SCHEMA_VERSION.to_string()));
        // Second check reads the stamped value
        assert_eq!(check_version(&store, &keys).await.unwrap(), SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn test_rejects_newer_schema() {
        let store = MemoryStore::new();
        let keys = Keys::default();
        stamp(&store, &keys, "99").await;
        let err = check_version(&store, &keys).await.unwrap_err();
        assert!(matches!(err, Error::SchemaVersion { found: 99, .. }));
    }

    #[tokio::test]
    async fn test_accepts_older_schema() {
        let store = MemoryStore::new();
        let keys = Keys::default();
        stamp(&store, &keys, "1").await;
        assert_eq!(check_version(&store, &keys).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_garbage_version() {
        let store = MemoryStore::new();
        let keys = Keys::default();
        stamp(&store, &keys, "two").await;
        let err = check_version(&store, &keys).await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::UnexpectedReply { .. })));
    }
}
