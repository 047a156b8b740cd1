//! String to integer maps held in the store
//!
//! Repeated strings (metric names, instance names, label names and values)
//! are interned into small integers per map so that membership keys stay
//! compact. Assignment runs as a server-side script, making get-or-assign
//! atomic across concurrent loaders; ids are never reused or renumbered.

use crate::error::StoreError;
use crate::store::scripts::MAP_INTERN;
use crate::store::{Command, Keys, Pipeline, Reply, ScriptHandle, Store};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// Default number of interned strings remembered in-process
pub const DEFAULT_CACHE_SIZE: usize = 16_384;

/// A named string map
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapName {
    /// `metric.name`
    MetricName,
    /// `inst.name`
    InstName,
    /// `label.name`
    LabelName,
    /// `note.name`
    NoteName,
    /// `label.<nameid>.value`
    LabelValue(u64),
    /// `note.<nameid>.value`
    NoteValue(u64),
}

impl MapName {
    /// Name map for labels or notes
    pub fn names(notes: bool) -> Self {
        if notes {
            MapName::NoteName
        } else {
            MapName::LabelName
        }
    }

    /// Value map for one label or note name
    pub fn values(notes: bool, name_id: u64) -> Self {
        if notes {
            MapName::NoteValue(name_id)
        } else {
            MapName::LabelValue(name_id)
        }
    }
}

impl fmt::Display for MapName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapName::MetricName => f.write_str("metric.name"),
            MapName::InstName => f.write_str("inst.name"),
            MapName::LabelName => f.write_str("label.name"),
            MapName::NoteName => f.write_str("note.name"),
            MapName::LabelValue(id) => write!(f, "label.{}.value", id),
            MapName::NoteValue(id) => write!(f, "note.{}.value", id),
        }
    }
}

/// Outcome of interning one string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interned {
    /// Assigned id
    pub id: u64,
    /// Whether this call made the assignment
    pub new: bool,
}

/// Interns strings into store-resident maps
pub struct Mapper {
    store: Arc<dyn Store>,
    keys: Keys,
    script: ScriptHandle,
    cache: Mutex<LruCache<(MapName, String), u64>>,
}

impl Mapper {
    /// Register the intern script and build a mapper
    ///
    /// Script registration failure is returned to the caller, which must
    /// treat it as fatal: nothing can be loaded without it.
    pub async fn new(store: Arc<dyn Store>, keys: Keys, cache_size: usize) -> Result<Self, StoreError> {
        let script = store.load_script(MAP_INTERN).await?;
        debug!(sha = script.sha(), "Map intern script registered");
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            store,
            keys,
            script,
            cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Key schema used by this mapper
    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Store this mapper writes to
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Intern one string
    pub async fn intern(&self, name: &MapName, value: &str) -> Result<Interned, StoreError> {
        let mut out = self.intern_batch(&[(name.clone(), value.to_string())]).await?;
        out.pop().ok_or_else(|| StoreError::Drained("intern".to_string()))
    }

    /// Intern many strings in a single round trip
    ///
    /// Results are returned in request order. Strings already seen by this
    /// mapper are answered from the cache and never marked new.
    pub async fn intern_batch(&self, requests: &[(MapName, String)]) -> Result<Vec<Interned>, StoreError> {
        let mut results: Vec<Option<Interned>> = Vec::with_capacity(requests.len());
        let mut pipeline = Pipeline::new();
        {
            let mut cache = self.cache.lock();
            for (name, value) in requests {
                match cache.get(&(name.clone(), value.clone())) {
                    Some(id) => results.push(Some(Interned { id: *id, new: false })),
                    None => {
                        let key = self.keys.map(name);
                        pipeline.append(Command::evalsha(&self.script, &[key.as_str()], &[value.as_str()]));
                        results.push(None);
                    },
                }
            }
        }

        if pipeline.is_empty() {
            return Ok(results.into_iter().flatten().collect());
        }

        let mut replies = self.store.execute(pipeline).await?;
        let mut cache = self.cache.lock();
        let mut out = Vec::with_capacity(requests.len());
        for ((name, value), slot) in requests.iter().zip(results) {
            let interned = match slot {
                Some(hit) => hit,
                None => {
                    let reply = replies.next_reply("map intern")?;
                    let interned = parse_intern_reply(reply)?;
                    cache.put((name.clone(), value.clone()), interned.id);
                    interned
                },
            };
            out.push(interned);
        }
        Ok(out)
    }

    /// Id of a string if it has been mapped, without assigning one
    pub async fn lookup(&self, name: &MapName, value: &str) -> Result<Option<u64>, StoreError> {
        if let Some(id) = self.cache.lock().get(&(name.clone(), value.to_string())) {
            return Ok(Some(*id));
        }
        let mut pipeline = Pipeline::new();
        pipeline.append(Command::hget(&self.keys.map(name), value));
        let mut replies = self.store.execute(pipeline).await?;
        let reply = replies.next_reply("map lookup")?.into_optional_string("map lookup")?;
        reply.map(|text| parse_id(&text, "map lookup")).transpose()
    }

    /// The whole map inverted: id to string
    pub async fn reverse(&self, name: &MapName) -> Result<HashMap<u64, String>, StoreError> {
        let mut pipeline = Pipeline::new();
        pipeline.append(Command::hgetall(&self.keys.map(name)));
        let mut replies = self.store.execute(pipeline).await?;
        reverse_pairs(replies.next_reply("map reverse")?)
    }
}

/// Invert an `HGETALL` reply of a map
pub fn reverse_pairs(reply: Reply) -> Result<HashMap<u64, String>, StoreError> {
    reply
        .into_pairs("map reverse")?
        .into_iter()
        .map(|(value, id)| Ok((parse_id(&id, "map reverse")?, value)))
        .collect()
}

/// Parse a map id
pub fn parse_id(text: &str, context: &str) -> Result<u64, StoreError> {
    text.parse().map_err(|_| StoreError::UnexpectedReply {
        context: context.to_string(),
        expected: "integer map id",
        found: text.to_string(),
    })
}

fn parse_intern_reply(reply: Reply) -> Result<Interned, StoreError> {
    match reply {
        Reply::Array(items) if items.len() == 2 => {
            let mut items = items.into_iter();
            let id = items
                .next()
                .map(|r| r.into_integer("map intern id"))
                .transpose()?;
            let new = items
                .next()
                .map(|r| r.into_integer("map intern flag"))
                .transpose()?;
            match (id, new) {
                (Some(id), Some(new)) if id > 0 => Ok(Interned {
                    id: id as u64,
                    new: new != 0,
                }),
                _ => Err(StoreError::UnexpectedReply {
                    context: "map intern".to_string(),
                    expected: "positive id",
                    found: format!("{:?}", id),
                }),
            }
        },
        Reply::Error(e) => Err(StoreError::Server(format!("map intern: {}", e))),
        other => Err(StoreError::UnexpectedReply {
            context: "map intern".to_string(),
            expected: "two-element array",
            found: other.kind().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use proptest::prelude::*;

    async fn mapper() -> (Arc<MemoryStore>, Mapper) {
        let store = Arc::new(MemoryStore::new());
        let mapper = Mapper::new(store.clone(), Keys::default(), 64).await.unwrap();
        (store, mapper)
    }

    #[test]
    fn test_map_names() {
        assert_eq!(MapName::MetricName.to_string(), "metric.name");
        assert_eq!(MapName::values(false, 4).to_string(), "label.4.value");
        assert_eq!(MapName::values(true, 4).to_string(), "note.4.value");
        assert_eq!(MapName::names(true), MapName::NoteName);
    }

    #[tokio::test]
    async fn test_intern_is_idempotent() {
        let (_, mapper) = mapper().await;
        let first = mapper.intern(&MapName::InstName, "sda").await.unwrap();
        let again = mapper.intern(&MapName::InstName, "sda").await.unwrap();
        let other = mapper.intern(&MapName::InstName, "sdb").await.unwrap();
        assert_eq!(first, Interned { id: 1, new: true });
        assert_eq!(again, Interned { id: 1, new: false });
        assert_eq!(other, Interned { id: 2, new: true });
    }

    #[tokio::test]
    async fn test_scopes_are_independent() {
        let (_, mapper) = mapper().await;
        let a = mapper.intern(&MapName::InstName, "x").await.unwrap();
        let b = mapper.intern(&MapName::MetricName, "x").await.unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 1);
    }

    #[tokio::test]
    async fn test_batch_uses_one_round_trip() {
        let (store, mapper) = mapper().await;
        let requests: Vec<(MapName, String)> = ["a", "b", "c", "a"]
            .iter()
            .map(|v| (MapName::LabelName, v.to_string()))
            .collect();
        let before = store.round_trips();
        let out = mapper.intern_batch(&requests).await.unwrap();
        assert_eq!(store.round_trips(), before + 1);
        let ids: Vec<u64> = out.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 1]);
        assert!(!out[3].new);

        // Fully cached batch needs no round trip
        mapper.intern_batch(&requests[..2]).await.unwrap();
        assert_eq!(store.round_trips(), before + 1);
    }

    #[tokio::test]
    async fn test_concurrent_mappers_agree() {
        let store = Arc::new(MemoryStore::new());
        let one = Mapper::new(store.clone(), Keys::default(), 8).await.unwrap();
        let two = Mapper::new(store.clone(), Keys::default(), 8).await.unwrap();
        let (a, b) = tokio::join!(
            one.intern(&MapName::MetricName, "kernel.all.load"),
            two.intern(&MapName::MetricName, "kernel.all.load")
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.id, b.id);
        assert!(a.new ^ b.new);
    }

    #[tokio::test]
    async fn test_lookup_and_reverse() {
        let (_, mapper) = mapper().await;
        assert_eq!(mapper.lookup(&MapName::MetricName, "a.b").await.unwrap(), None);
        mapper.intern(&MapName::MetricName, "a.b").await.unwrap();
        mapper.intern(&MapName::MetricName, "c.d").await.unwrap();
        assert_eq!(mapper.lookup(&MapName::MetricName, "c.d").await.unwrap(), Some(2));
        let reverse = mapper.reverse(&MapName::MetricName).await.unwrap();
        assert_eq!(reverse.get(&1).map(String::as_str), Some("a.b"));
        assert_eq!(reverse.get(&2).map(String::as_str), Some("c.d"));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let (store, mapper) = mapper().await;
        store.set_unavailable(true);
        assert!(matches!(
            mapper.intern(&MapName::InstName, "sda").await,
            Err(StoreError::Connection(_))
        ));
    }

    #[test]
    fn test_malformed_intern_reply() {
        assert!(parse_intern_reply(Reply::Integer(1)).is_err());
        assert!(parse_intern_reply(Reply::Array(vec![Reply::Integer(0), Reply::Integer(1)])).is_err());
        assert!(matches!(
            parse_intern_reply(Reply::Error("NOSCRIPT".into())),
            Err(StoreError::Server(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_map_idempotence(values in proptest::collection::vec("[a-z]{1,6}", 1..20)) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (_, mapper) = mapper().await;
                let mut seen: HashMap<String, u64> = HashMap::new();
                for value in &values {
                    let id = mapper.intern(&MapName::InstName, value).await.unwrap().id;
                    if let Some(prev) = seen.get(value) {
                        assert_eq!(*prev, id);
                    }
                    seen.insert(value.clone(), id);
                }
                let mut ids: Vec<u64> = seen.values().copied().collect();
                ids.sort();
                ids.dedup();
                assert_eq!(ids.len(), seen.len());
            });
        }
    }
}
