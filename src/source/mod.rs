//! Metric sources
//!
//! A metric source is an open PCP context: a live host, a local agent or an
//! archive. The loader consumes it through [`MetricSource`], which supplies
//! descriptors, names, label sets, instance domains and a time-ordered
//! stream of [`FetchRecord`]s. [`JsonArchive`] implements the contract over
//! an archive serialized as JSON.

pub mod archive;

pub use archive::JsonArchive;

use crate::error::SourceError;
use crate::labels::LabelSet;
use crate::types::{Descriptor, InDomId, MetricId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Kind of metric source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Remote collector host
    Host,
    /// Local agents without a collector
    Local,
    /// Recorded archive
    Archive,
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceType::Host => "host",
            SourceType::Local => "local",
            SourceType::Archive => "archive",
        })
    }
}

impl FromStr for SourceType {
    type Err = String;

    /// Accepts the query names `hostspec`, `local` and `archive`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" | "hostspec" => Ok(SourceType::Host),
            "local" => Ok(SourceType::Local),
            "archive" => Ok(SourceType::Archive),
            other => Err(format!("unknown source type '{}'", other)),
        }
    }
}

/// Connection parameters for a metric source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    /// Kind of source
    pub source_type: SourceType,
    /// Locator: archive path or host specification
    pub source: String,
}

impl Context {
    /// Context for an archive at the given path
    pub fn archive(path: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Archive,
            source: path.into(),
        }
    }

    /// Context for a remote host
    pub fn host(spec: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Host,
            source: spec.into(),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_type, self.source)
    }
}

/// Which level of the label hierarchy to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelScope {
    /// Labels of an agent domain
    Domain(u32),
    /// Labels of an instance domain
    InDom(InDomId),
    /// Labels of the cluster containing a metric
    Cluster(MetricId),
    /// Labels of a single metric
    Item(MetricId),
}

impl fmt::Display for LabelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LabelScope::Domain(d) => write!(f, "domain {}", d),
            LabelScope::InDom(indom) => write!(f, "indom {}", indom),
            LabelScope::Cluster(pmid) => write!(f, "cluster {}.{}", pmid.domain, pmid.cluster),
            LabelScope::Item(pmid) => write!(f, "item {}", pmid),
        }
    }
}

/// One undecoded value as carried by a record
#[derive(Debug, Clone, PartialEq)]
pub struct RawValue {
    /// Instance id, absent for metrics without an instance domain
    pub inst: Option<u32>,
    /// Encoded value, decoded against the metric descriptor
    pub value: serde_json::Value,
}

/// The values of one metric within a record
#[derive(Debug, Clone, PartialEq)]
pub struct ValueSet {
    /// Metric the values belong to
    pub pmid: MetricId,
    /// Values, or the per-metric error the source reported
    pub values: Result<Vec<RawValue>, String>,
}

/// One time-stamped record from a source
///
/// A record with no value sets is a mark: the source has a discontinuity
/// at this point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRecord {
    /// Sample time
    pub timestamp: Timestamp,
    /// Per-metric values
    pub sets: Vec<ValueSet>,
}

impl FetchRecord {
    /// Whether this record marks a discontinuity
    pub fn is_mark(&self) -> bool {
        self.sets.is_empty()
    }
}

/// An instance of an instance domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Numeric instance id
    pub id: u32,
    /// External instance name
    pub name: String,
}

/// Contract between the loader and an open metric source
pub trait MetricSource: Send {
    /// Parameters the source was opened with
    fn context(&self) -> &Context;

    /// Host the source describes
    fn hostname(&self) -> &str;

    /// Labels of the whole source
    fn context_labels(&self) -> Result<LabelSet, SourceError>;

    /// Expand a name or namespace subtree into concrete metric names
    ///
    /// An empty pattern names the whole namespace.
    fn expand_metric_spec(&self, pattern: &str) -> Result<Vec<String>, SourceError>;

    /// Identifier of a metric name
    fn lookup_name(&self, name: &str) -> Result<MetricId, SourceError>;

    /// Descriptor of a metric
    fn lookup_desc(&self, pmid: MetricId) -> Result<Descriptor, SourceError>;

    /// Every name of a metric, aliases included
    fn name_all(&self, pmid: MetricId) -> Result<Vec<String>, SourceError>;

    /// Labels at one level of the hierarchy
    fn labels(&self, scope: LabelScope) -> Result<LabelSet, SourceError>;

    /// Instances of an instance domain
    fn instances(&self, indom: InDomId) -> Result<Vec<Instance>, SourceError>;

    /// Labels of each instance of an instance domain
    fn instance_labels(&self, indom: InDomId) -> Result<HashMap<u32, LabelSet>, SourceError>;

    /// Position the record stream at the first record at or after `start`
    fn set_mode(&mut self, start: Option<Timestamp>) -> Result<(), SourceError>;

    /// Next record, `None` at end of source
    fn fetch(&mut self) -> Result<Option<FetchRecord>, SourceError>;
}
