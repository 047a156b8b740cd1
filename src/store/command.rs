//! Commands, pipelines and replies exchanged with the store
//!
//! Every pass of the loader and solver appends its whole batch of commands
//! to a [`Pipeline`], sends it in one round trip and then drains the
//! [`Replies`] in issue order. There is no reply correlation beyond that
//! ordering.

use crate::error::StoreError;
use std::collections::VecDeque;
use std::fmt;

/// A single store command with its arguments
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    name: &'static str,
    args: Vec<String>,
}

impl Command {
    /// Create a command with no arguments
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Command name, upper case
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Command arguments in order
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// `HGET key field`
    pub fn hget(key: &str, field: &str) -> Self {
        Self::new("HGET").arg(key).arg(field)
    }

    /// `HSET key field value [field value ...]`
    pub fn hset<K: ToString, V: ToString>(key: &str, pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        let mut cmd = Self::new("HSET").arg(key);
        for (field, value) in pairs {
            cmd = cmd.arg(field).arg(value);
        }
        cmd
    }

    /// `HGETALL key`
    pub fn hgetall(key: &str) -> Self {
        Self::new("HGETALL").arg(key)
    }

    /// `HKEYS key`
    pub fn hkeys(key: &str) -> Self {
        Self::new("HKEYS").arg(key)
    }

    /// `HMGET key field [field ...]`
    pub fn hmget<F: ToString>(key: &str, fields: impl IntoIterator<Item = F>) -> Self {
        let mut cmd = Self::new("HMGET").arg(key);
        for field in fields {
            cmd = cmd.arg(field);
        }
        cmd
    }

    /// `SADD key member [member ...]`
    pub fn sadd<M: ToString>(key: &str, members: impl IntoIterator<Item = M>) -> Self {
        let mut cmd = Self::new("SADD").arg(key);
        for member in members {
            cmd = cmd.arg(member);
        }
        cmd
    }

    /// `SMEMBERS key`
    pub fn smembers(key: &str) -> Self {
        Self::new("SMEMBERS").arg(key)
    }

    /// `ZADD key score member`
    pub fn zadd(key: &str, score: impl fmt::Display, member: &str) -> Self {
        Self::new("ZADD").arg(key).arg(score).arg(member)
    }

    /// `ZREVRANGEBYSCORE key max min WITHSCORES LIMIT offset count`
    ///
    /// Missing bounds are open (`+inf` / `-inf`).
    pub fn zrevrangebyscore(
        key: &str,
        max: Option<String>,
        min: Option<String>,
        offset: usize,
        count: usize,
    ) -> Self {
        Self::new("ZREVRANGEBYSCORE")
            .arg(key)
            .arg(max.unwrap_or_else(|| "+inf".to_string()))
            .arg(min.unwrap_or_else(|| "-inf".to_string()))
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(offset)
            .arg(count)
    }

    /// `GET key`
    pub fn get(key: &str) -> Self {
        Self::new("GET").arg(key)
    }

    /// `SET key value`
    pub fn set(key: &str, value: impl ToString) -> Self {
        Self::new("SET").arg(key).arg(value)
    }

    /// `EVALSHA sha numkeys key [key ...] arg [arg ...]`
    pub fn evalsha(script: &ScriptHandle, keys: &[&str], args: &[&str]) -> Self {
        let mut cmd = Self::new("EVALSHA").arg(script.sha()).arg(keys.len());
        for key in keys {
            cmd = cmd.arg(key);
        }
        for arg in args {
            cmd = cmd.arg(arg);
        }
        cmd
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A batch of commands sent in one round trip
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command; replies come back in append order
    pub fn append(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Number of queued commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Queued commands in order
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Consume the pipeline, yielding its commands
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// Handle to a script registered with the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHandle {
    sha: String,
}

impl ScriptHandle {
    /// Wrap a script digest as returned by the store
    pub fn new(sha: impl Into<String>) -> Self {
        Self { sha: sha.into() }
    }

    /// Hex SHA-1 of the script body
    pub fn sha(&self) -> &str {
        &self.sha
    }
}

/// One reply from the store
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Missing key or field
    Nil,
    /// Integer reply
    Integer(i64),
    /// Bulk string reply
    Bulk(String),
    /// Status reply such as `OK`
    Status(String),
    /// Error reply
    Error(String),
    /// Array of nested replies
    Array(Vec<Reply>),
}

impl Reply {
    /// Short name of the reply kind, used in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Nil => "nil",
            Reply::Integer(_) => "integer",
            Reply::Bulk(_) => "string",
            Reply::Status(_) => "status",
            Reply::Error(_) => "error",
            Reply::Array(_) => "array",
        }
    }

    fn unexpected(&self, context: &str, expected: &'static str) -> StoreError {
        match self {
            Reply::Error(msg) => StoreError::Server(format!("{}: {}", context, msg)),
            other => StoreError::UnexpectedReply {
                context: context.to_string(),
                expected,
                found: other.kind().to_string(),
            },
        }
    }

    /// Accept any non-error reply
    pub fn into_ok(self, context: &str) -> Result<(), StoreError> {
        match self {
            Reply::Error(_) => Err(self.unexpected(context, "success")),
            _ => Ok(()),
        }
    }

    /// Integer reply
    pub fn into_integer(self, context: &str) -> Result<i64, StoreError> {
        match self {
            Reply::Integer(v) => Ok(v),
            other => Err(other.unexpected(context, "integer")),
        }
    }

    /// String reply, `None` for nil
    pub fn into_optional_string(self, context: &str) -> Result<Option<String>, StoreError> {
        match self {
            Reply::Nil => Ok(None),
            Reply::Bulk(s) | Reply::Status(s) => Ok(Some(s)),
            other => Err(other.unexpected(context, "string")),
        }
    }

    /// Array of strings, such as `SMEMBERS` or `HKEYS`
    pub fn into_strings(self, context: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Reply::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(s) | Reply::Status(s) => Ok(s),
                    other => Err(other.unexpected(context, "string element")),
                })
                .collect(),
            other => Err(other.unexpected(context, "array")),
        }
    }

    /// Array of optional strings, such as `HMGET`
    pub fn into_optional_strings(self, context: &str) -> Result<Vec<Option<String>>, StoreError> {
        match self {
            Reply::Array(items) => items
                .into_iter()
                .map(|item| item.into_optional_string(context))
                .collect(),
            other => Err(other.unexpected(context, "array")),
        }
    }

    /// Flat field/value array as pairs, such as `HGETALL` or `WITHSCORES`
    pub fn into_pairs(self, context: &str) -> Result<Vec<(String, String)>, StoreError> {
        let flat = self.into_strings(context)?;
        if flat.len() % 2 != 0 {
            return Err(StoreError::UnexpectedReply {
                context: context.to_string(),
                expected: "even-length array",
                found: format!("array of {}", flat.len()),
            });
        }
        let mut pairs = Vec::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            pairs.push((k, v));
        }
        Ok(pairs)
    }
}

/// Replies to one pipeline, drained in issue order
#[derive(Debug, Default)]
pub struct Replies {
    replies: VecDeque<Reply>,
}

impl Replies {
    /// Wrap replies in the order the commands were issued
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: replies.into(),
        }
    }

    /// Take the reply to the next outstanding command
    pub fn next_reply(&mut self, context: &str) -> Result<Reply, StoreError> {
        self.replies
            .pop_front()
            .ok_or_else(|| StoreError::Drained(context.to_string()))
    }

    /// Number of replies not yet drained
    pub fn remaining(&self) -> usize {
        self.replies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_rendering() {
        let cmd = Command::hset("pcp:desc:series:x", [("domain", "60"), ("item", "4")]);
        assert_eq!(cmd.to_string(), "HSET pcp:desc:series:x domain 60 item 4");

        let cmd = Command::zrevrangebyscore("k", None, Some("10.000000".into()), 5, 10);
        assert_eq!(
            cmd.to_string(),
            "ZREVRANGEBYSCORE k +inf 10.000000 WITHSCORES LIMIT 5 10"
        );

        let handle = ScriptHandle::new("abc");
        let cmd = Command::evalsha(&handle, &["pcp:map:inst.name"], &["sda"]);
        assert_eq!(cmd.args(), &["abc", "1", "pcp:map:inst.name", "sda"]);
    }

    #[test]
    fn test_replies_drain_in_order() {
        let mut replies = Replies::new(vec![Reply::Integer(1), Reply::Nil]);
        assert_eq!(replies.next_reply("a").unwrap(), Reply::Integer(1));
        assert_eq!(replies.remaining(), 1);
        assert_eq!(replies.next_reply("b").unwrap(), Reply::Nil);
        assert!(matches!(replies.next_reply("c"), Err(StoreError::Drained(_))));
    }

    #[test]
    fn test_reply_shapes() {
        assert_eq!(Reply::Nil.into_optional_string("hget").unwrap(), None);
        assert_eq!(
            Reply::Bulk("3".into()).into_optional_string("hget").unwrap(),
            Some("3".to_string())
        );
        let err = Reply::Integer(3).into_strings("smembers").unwrap_err();
        assert!(matches!(err, StoreError::UnexpectedReply { expected: "array", .. }));

        let err = Reply::Error("WRONGTYPE".into()).into_integer("hlen").unwrap_err();
        assert!(matches!(err, StoreError::Server(_)));
    }

    #[test]
    fn test_pairs() {
        let reply = Reply::Array(vec![
            Reply::Bulk("a".into()),
            Reply::Bulk("1".into()),
            Reply::Bulk("b".into()),
            Reply::Bulk("2".into()),
        ]);
        assert_eq!(
            reply.into_pairs("hgetall").unwrap(),
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
        );
        let odd = Reply::Array(vec![Reply::Bulk("a".into())]);
        assert!(odd.into_pairs("hgetall").is_err());
    }
}
