//! In-process store implementing the same command surface as the server
//!
//! Used by tests and dry runs. Each pipeline executes under one lock, so
//! every command, scripts included, is atomic with respect to other callers.

use super::command::{Command, Pipeline, Replies, Reply, ScriptHandle};
use super::scripts::{script_sha, MAP_INTERN};
use super::Store;
use crate::error::StoreError;
use crate::metrics::{record_round_trip, record_store_failure};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    /// Field order is insertion order, as HGETALL reports it
    Hash(Vec<(String, String)>),
    Set(BTreeSet<String>),
    /// member -> score
    Sorted(BTreeMap<String, f64>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptKind {
    Intern,
}

#[derive(Debug, Default)]
struct Data {
    entries: HashMap<String, Entry>,
    scripts: HashMap<String, ScriptKind>,
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
    unavailable: AtomicBool,
    round_trips: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing the connection: every later call fails
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of pipelines executed so far
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Relaxed)
    }

    /// All keys currently held, sorted
    pub fn keys(&self) -> Vec<String> {
        let data = self.data.lock();
        let mut keys: Vec<String> = data.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn execute(&self, pipeline: Pipeline) -> Result<Replies, StoreError> {
        if let Err(e) = self.check_available() {
            record_store_failure("memory");
            return Err(e);
        }
        self.round_trips.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let count = pipeline.len();
        let replies: Vec<Reply> = {
            let mut data = self.data.lock();
            pipeline
                .into_commands()
                .iter()
                .map(|cmd| data.apply(cmd))
                .collect()
        };
        record_round_trip("memory", count, start.elapsed().as_secs_f64());
        Ok(Replies::new(replies))
    }

    async fn load_script(&self, source: &str) -> Result<ScriptHandle, StoreError> {
        self.check_available()?;
        let kind = if source == MAP_INTERN {
            ScriptKind::Intern
        } else {
            return Err(StoreError::Script("memory store only runs the map intern script".into()));
        };
        let sha = script_sha(source);
        self.data.lock().scripts.insert(sha.clone(), kind);
        Ok(ScriptHandle::new(sha))
    }
}

fn bulk_array(items: impl IntoIterator<Item = String>) -> Reply {
    Reply::Array(items.into_iter().map(Reply::Bulk).collect())
}

fn wrong_args(cmd: &Command) -> Reply {
    Reply::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        cmd.name().to_lowercase()
    ))
}

fn parse_bound(text: &str) -> Option<(f64, bool)> {
    let (exclusive, text) = match text.strip_prefix('(') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = match text {
        "+inf" | "inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other.parse().ok()?,
    };
    Some((value, exclusive))
}

impl Data {
    fn apply(&mut self, cmd: &Command) -> Reply {
        let args = cmd.args();
        match cmd.name() {
            "GET" if args.len() == 1 => match self.entries.get(&args[0]) {
                None => Reply::Nil,
                Some(Entry::Str(s)) => Reply::Bulk(s.clone()),
                Some(_) => Reply::Error(WRONGTYPE.into()),
            },
            "SET" if args.len() == 2 => {
                self.entries.insert(args[0].clone(), Entry::Str(args[1].clone()));
                Reply::Status("OK".into())
            },
            "HGET" if args.len() == 2 => match self.hash(&args[0]) {
                Ok(Some(fields)) => fields
                    .iter()
                    .find(|(f, _)| f == &args[1])
                    .map(|(_, v)| Reply::Bulk(v.clone()))
                    .unwrap_or(Reply::Nil),
                Ok(None) => Reply::Nil,
                Err(e) => e,
            },
            "HSET" if args.len() >= 3 && args.len() % 2 == 1 => {
                let fields = match self.hash_mut(&args[0]) {
                    Ok(fields) => fields,
                    Err(e) => return e,
                };
                let mut added = 0;
                for pair in args[1..].chunks(2) {
                    match fields.iter_mut().find(|(f, _)| f == &pair[0]) {
                        Some(existing) => existing.1 = pair[1].clone(),
                        None => {
                            fields.push((pair[0].clone(), pair[1].clone()));
                            added += 1;
                        },
                    }
                }
                Reply::Integer(added)
            },
            "HSETNX" if args.len() == 3 => self.hsetnx(&args[0], &args[1], &args[2]),
            "HLEN" if args.len() == 1 => match self.hash(&args[0]) {
                Ok(fields) => Reply::Integer(fields.map_or(0, |f| f.len() as i64)),
                Err(e) => e,
            },
            "HGETALL" if args.len() == 1 => match self.hash(&args[0]) {
                Ok(fields) => bulk_array(
                    fields
                        .into_iter()
                        .flatten()
                        .flat_map(|(f, v)| [f.clone(), v.clone()]),
                ),
                Err(e) => e,
            },
            "HKEYS" if args.len() == 1 => match self.hash(&args[0]) {
                Ok(fields) => bulk_array(fields.into_iter().flatten().map(|(f, _)| f.clone())),
                Err(e) => e,
            },
            "HMGET" if args.len() >= 2 => match self.hash(&args[0]) {
                Ok(fields) => Reply::Array(
                    args[1..]
                        .iter()
                        .map(|want| {
                            fields
                                .and_then(|fs| fs.iter().find(|(f, _)| f == want))
                                .map(|(_, v)| Reply::Bulk(v.clone()))
                                .unwrap_or(Reply::Nil)
                        })
                        .collect(),
                ),
                Err(e) => e,
            },
            "SADD" if args.len() >= 2 => {
                let entry = self
                    .entries
                    .entry(args[0].clone())
                    .or_insert_with(|| Entry::Set(BTreeSet::new()));
                match entry {
                    Entry::Set(members) => Reply::Integer(
                        args[1..].iter().filter(|m| members.insert((*m).clone())).count() as i64,
                    ),
                    _ => Reply::Error(WRONGTYPE.into()),
                }
            },
            "SMEMBERS" if args.len() == 1 => match self.entries.get(&args[0]) {
                None => Reply::Array(Vec::new()),
                Some(Entry::Set(members)) => bulk_array(members.iter().cloned()),
                Some(_) => Reply::Error(WRONGTYPE.into()),
            },
            "ZADD" if args.len() >= 3 && args.len() % 2 == 1 => {
                let mut parsed = Vec::new();
                for pair in args[1..].chunks(2) {
                    match pair[0].parse::<f64>() {
                        Ok(score) if score.is_finite() => parsed.push((score, pair[1].clone())),
                        _ => return Reply::Error("ERR value is not a valid float".into()),
                    }
                }
                let entry = self
                    .entries
                    .entry(args[0].clone())
                    .or_insert_with(|| Entry::Sorted(BTreeMap::new()));
                match entry {
                    Entry::Sorted(members) => Reply::Integer(
                        parsed
                            .into_iter()
                            .filter(|(score, member)| members.insert(member.clone(), *score).is_none())
                            .count() as i64,
                    ),
                    _ => Reply::Error(WRONGTYPE.into()),
                }
            },
            "ZREVRANGEBYSCORE" if args.len() >= 3 => self.zrevrangebyscore(args),
            "EVALSHA" if args.len() >= 2 => self.evalsha(args),
            _ if is_known(cmd.name()) => wrong_args(cmd),
            other => Reply::Error(format!("ERR unknown command '{}'", other)),
        }
    }

    fn hash(&self, key: &str) -> Result<Option<&Vec<(String, String)>>, Reply> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(Entry::Hash(fields)) => Ok(Some(fields)),
            Some(_) => Err(Reply::Error(WRONGTYPE.into())),
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut Vec<(String, String)>, Reply> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(Vec::new()));
        match entry {
            Entry::Hash(fields) => Ok(fields),
            _ => Err(Reply::Error(WRONGTYPE.into())),
        }
    }

    fn hsetnx(&mut self, key: &str, field: &str, value: &str) -> Reply {
        let fields = match self.hash_mut(key) {
            Ok(fields) => fields,
            Err(e) => return e,
        };
        if fields.iter().any(|(f, _)| f == field) {
            Reply::Integer(0)
        } else {
            fields.push((field.to_string(), value.to_string()));
            Reply::Integer(1)
        }
    }

    fn zrevrangebyscore(&self, args: &[String]) -> Reply {
        let (Some(max), Some(min)) = (parse_bound(&args[1]), parse_bound(&args[2])) else {
            return Reply::Error("ERR min or max is not a float".into());
        };
        let mut with_scores = false;
        let mut offset = 0usize;
        let mut count: Option<usize> = None;
        let mut rest = args[3..].iter();
        while let Some(opt) = rest.next() {
            match opt.to_ascii_uppercase().as_str() {
                "WITHSCORES" => with_scores = true,
                "LIMIT" => {
                    let off = rest.next().and_then(|v| v.parse::<i64>().ok());
                    let cnt = rest.next().and_then(|v| v.parse::<i64>().ok());
                    match (off, cnt) {
                        (Some(o), Some(c)) => {
                            offset = o.max(0) as usize;
                            count = usize::try_from(c).ok();
                        },
                        _ => return Reply::Error("ERR syntax error".into()),
                    }
                },
                _ => return Reply::Error("ERR syntax error".into()),
            }
        }

        let members = match self.entries.get(&args[0]) {
            None => return Reply::Array(Vec::new()),
            Some(Entry::Sorted(members)) => members,
            Some(_) => return Reply::Error(WRONGTYPE.into()),
        };

        let in_range = |score: f64| {
            let below_max = if max.1 { score < max.0 } else { score <= max.0 };
            let above_min = if min.1 { score > min.0 } else { score >= min.0 };
            below_max && above_min
        };
        let mut hits: Vec<(&String, f64)> = members
            .iter()
            .filter(|(_, score)| in_range(**score))
            .map(|(m, s)| (m, *s))
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));

        let mut out = Vec::new();
        for (member, score) in hits.into_iter().skip(offset).take(count.unwrap_or(usize::MAX)) {
            out.push(Reply::Bulk(member.clone()));
            if with_scores {
                out.push(Reply::Bulk(score.to_string()));
            }
        }
        Reply::Array(out)
    }

    fn evalsha(&mut self, args: &[String]) -> Reply {
        let Some(kind) = self.scripts.get(&args[0]).copied() else {
            return Reply::Error("NOSCRIPT No matching script. Please use EVAL.".into());
        };
        let Ok(numkeys) = args[1].parse::<usize>() else {
            return Reply::Error("ERR value is not an integer or out of range".into());
        };
        if args.len() < 2 + numkeys {
            return Reply::Error("ERR Number of keys can't be greater than number of args".into());
        }
        let (keys, argv) = args[2..].split_at(numkeys);
        match kind {
            ScriptKind::Intern => {
                let (Some(key), Some(value)) = (keys.first(), argv.first()) else {
                    return Reply::Error("ERR intern script needs one key and one argument".into());
                };
                let existing = match self.hash(key) {
                    Ok(fields) => fields.and_then(|fs| {
                        fs.iter()
                            .find(|(f, _)| f == value)
                            .and_then(|(_, v)| v.parse::<i64>().ok())
                    }),
                    Err(e) => return e,
                };
                match existing {
                    Some(id) => Reply::Array(vec![Reply::Integer(id), Reply::Integer(0)]),
                    None => {
                        let next = match self.hash(key) {
                            Ok(fields) => fields.map_or(0, |f| f.len() as i64) + 1,
                            Err(e) => return e,
                        };
                        if let Reply::Error(e) = self.hsetnx(key, value, &next.to_string()) {
                            return Reply::Error(e);
                        }
                        Reply::Array(vec![Reply::Integer(next), Reply::Integer(1)])
                    },
                }
            },
        }
    }
}

fn is_known(name: &str) -> bool {
    matches!(
        name,
        "GET"
            | "SET"
            | "HGET"
            | "HSET"
            | "HSETNX"
            | "HLEN"
            | "HGETALL"
            | "HKEYS"
            | "HMGET"
            | "SADD"
            | "SMEMBERS"
            | "ZADD"
            | "ZREVRANGEBYSCORE"
            | "EVALSHA"
    )
}
