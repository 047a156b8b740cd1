//! Store key schema
//!
//! ```text
//! version:schema                          -> STRING schema version
//! map:<scope>                             -> HASH string -> id
//! desc:series:<sid>                       -> HASH domain cluster item semantics [serial] type units
//! inst:series:<sid>                       -> HASH id name
//! series:inst.name:<nameid>               -> SET of sid
//! metric.name:series:<sid>                -> SET of metric name ids
//! series:metric.name:<nameid>             -> SET of sid
//! label.name:series:<sid>                 -> SET of label name ids
//! series:label.<nameid>.value:<valueid>   -> SET of sid
//! labelvalue:series:<sid>                 -> HASH name id -> value id
//! note.* / notevalue:*                    -> as for labels
//! values:series:<sid>                     -> ZSET "<stamp>:<value>" scored by stamp
//! ```
//!
//! Every key carries a configurable prefix, `pcp:` by default.

use crate::identity::SeriesId;
use crate::mapper::MapName;

/// Default prefix applied to every key
pub const DEFAULT_KEY_PREFIX: &str = "pcp:";

/// Builds prefixed store keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    prefix: String,
}

impl Default for Keys {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl Keys {
    /// Use the given prefix for all keys
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// The configured prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Schema version string
    pub fn schema_version(&self) -> String {
        format!("{}version:schema", self.prefix)
    }

    /// Hash holding one name map
    pub fn map(&self, name: &MapName) -> String {
        format!("{}map:{}", self.prefix, name)
    }

    /// Descriptor hash of a series
    pub fn desc(&self, sid: &SeriesId) -> String {
        format!("{}desc:series:{}", self.prefix, sid)
    }

    /// Instance hash of a series
    pub fn inst(&self, sid: &SeriesId) -> String {
        format!("{}inst:series:{}", self.prefix, sid)
    }

    /// Set of series carrying the given mapped value of a map
    ///
    /// For `metric.name` and `inst.name` the id is the name itself; for
    /// label and note value maps it is the value id.
    pub fn series_with(&self, name: &MapName, id: u64) -> String {
        format!("{}series:{}:{}", self.prefix, name, id)
    }

    /// Set of name ids attached to a series (metric, label or note names)
    pub fn names_of(&self, name: &MapName, sid: &SeriesId) -> String {
        format!("{}{}:series:{}", self.prefix, name, sid)
    }

    /// Hash of label (or note) name id to value id for a series
    pub fn values_of(&self, notes: bool, sid: &SeriesId) -> String {
        let kind = if notes { "notevalue" } else { "labelvalue" };
        format!("{}{}:series:{}", self.prefix, kind, sid)
    }

    /// Sorted set of samples for a series
    pub fn samples(&self, sid: &SeriesId) -> String {
        format!("{}values:series:{}", self.prefix, sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SeriesId {
        "0123456789abcdef0123456789abcdef01234567".parse().unwrap()
    }

    #[test]
    fn test_key_layout() {
        let keys = Keys::default();
        assert_eq!(keys.schema_version(), "pcp:version:schema");
        assert_eq!(keys.map(&MapName::MetricName), "pcp:map:metric.name");
        assert_eq!(keys.map(&MapName::LabelValue(3)), "pcp:map:label.3.value");
        assert_eq!(
            keys.desc(&sid()),
            "pcp:desc:series:0123456789abcdef0123456789abcdef01234567"
        );
        assert_eq!(keys.series_with(&MapName::InstName, 9), "pcp:series:inst.name:9");
        assert_eq!(
            keys.series_with(&MapName::NoteValue(2), 5),
            "pcp:series:note.2.value:5"
        );
        assert!(keys.names_of(&MapName::LabelName, &sid()).starts_with("pcp:label.name:series:"));
        assert!(keys.values_of(true, &sid()).starts_with("pcp:notevalue:series:"));
        assert!(keys.samples(&sid()).starts_with("pcp:values:series:"));
    }

    #[test]
    fn test_custom_prefix() {
        let keys = Keys::new("test:");
        assert_eq!(keys.map(&MapName::InstName), "test:map:inst.name");
        assert_eq!(keys.prefix(), "test:");
    }
}
