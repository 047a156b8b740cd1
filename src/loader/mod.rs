//! Source loader
//!
//! Walks a metric source forward over a time window and caches what it
//! finds: every (metric, instance) pair seen in a record becomes a series
//! whose metadata is written once, and whose samples (rates for counters,
//! raw values otherwise) are appended to its value log.
//!
//! # Failure handling
//!
//! - A metric whose descriptor, labels or instances cannot be resolved is
//!   skipped for the rest of the run.
//! - A single value that cannot be extracted is skipped.
//! - Source context failures and every store failure end the run.
//!
//! Repeated diagnostics for the same metric and problem are logged once.
//!
//! # Example
//!
//! ```rust,no_run
//! use pcp_series::loader::{LoadRequest, Loader};
//! use pcp_series::mapper::Mapper;
//! use pcp_series::source::Context;
//! use pcp_series::store::{Keys, MemoryStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> pcp_series::error::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let mapper = Arc::new(Mapper::new(store, Keys::default(), 1024).await?);
//! let loader = Loader::new(mapper, false);
//! let summary = loader
//!     .load(&LoadRequest::new(Context::archive("/var/log/pcp/web1.json")))
//!     .await?;
//! println!("{} values stored", summary.values_stored);
//! # Ok(())
//! # }
//! ```

pub mod metric;
pub mod persist;

pub use metric::{Metric, Observation, Value, ValueState};
pub use persist::{Batch, SeriesMetadata, StoredSample};

use crate::error::{QueryError, Result, SourceError};
use crate::identity::{series_identifier, InstanceRef};
use crate::labels::{LabelHierarchy, LabelSet};
use crate::mapper::Mapper;
use crate::metrics::{record_skip, RECORDS_PROCESSED, SERIES_DISCOVERED, VALUES_STORED};
use crate::query::ast::{classify, CompareOp, NameScope, Node};
use crate::source::{Context, FetchRecord, Instance, JsonArchive, LabelScope, MetricSource, SourceType};
use crate::types::{AtomValue, MetricId, TimeWindow};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// Requests and Results
// ============================================================================

/// What to load
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    /// Source to walk
    pub context: Context,
    /// Metric names or namespace subtrees; empty loads everything
    pub metrics: Vec<String>,
    /// Time bounds of the walk
    pub window: TimeWindow,
    /// Write metadata only, no samples
    pub metadata_only: bool,
}

impl LoadRequest {
    /// Load every metric of a source over its whole span
    pub fn new(context: Context) -> Self {
        Self {
            context,
            metrics: Vec::new(),
            window: TimeWindow::default(),
            metadata_only: false,
        }
    }

    /// Derive a request from a predicate tree
    ///
    /// The source comes from `source.archive`, `source.hostspec` or
    /// `source.local` equality tests and metric patterns from
    /// `metric.name` equality tests. Every other comparison is ignored.
    pub fn from_query(node: &Node, window: TimeWindow) -> std::result::Result<Self, QueryError> {
        let mut context = None;
        let mut metrics = Vec::new();
        for (op, name, value) in node.comparisons() {
            if op != CompareOp::Eq {
                continue;
            }
            if let Some(kind) = name.strip_prefix("source.") {
                if context.is_none() {
                    if let Ok(source_type) = kind.parse::<SourceType>() {
                        context = Some(Context {
                            source_type,
                            source: value.to_string(),
                        });
                    }
                }
            } else if classify(name) == (NameScope::Metric, "name") {
                metrics.push(value.to_string());
            }
        }
        let context = context.ok_or_else(|| {
            QueryError::Malformed("load needs source.archive, source.hostspec or source.local".to_string())
        })?;
        Ok(Self {
            context,
            metrics,
            window,
            metadata_only: false,
        })
    }
}

/// Outcome of a load run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Records walked, marks included
    pub records: u64,
    /// Samples appended to value logs
    pub values_stored: u64,
    /// Distinct series seen
    pub series: usize,
    /// Metrics skipped after a resolution failure
    pub skipped_metrics: usize,
}

// ============================================================================
// Diagnostics
// ============================================================================

/// Reports each (metric, problem) pair once per run
#[derive(Debug, Default)]
struct Diagnostics {
    warned: HashSet<(MetricId, &'static str)>,
}

impl Diagnostics {
    /// Returns true the first time a pair is reported
    fn report(&mut self, pmid: MetricId, reason: &'static str, detail: &str) -> bool {
        record_skip(reason);
        let first = self.warned.insert((pmid, reason));
        if first {
            warn!(pmid = %pmid, reason, detail, "Skipping metric data");
        } else {
            debug!(pmid = %pmid, reason, "Repeated skip suppressed");
        }
        first
    }
}

struct Skip {
    reason: &'static str,
    detail: String,
}

impl Skip {
    fn new(reason: &'static str, error: impl ToString) -> Self {
        Self {
            reason,
            detail: error.to_string(),
        }
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Loads metric sources into the store
pub struct Loader {
    mapper: Arc<Mapper>,
    counter_wrap: bool,
}

impl Loader {
    /// Create a loader; `counter_wrap` enables counter wrap correction
    pub fn new(mapper: Arc<Mapper>, counter_wrap: bool) -> Self {
        Self { mapper, counter_wrap }
    }

    /// Open the request's source and load it
    pub async fn load(&self, request: &LoadRequest) -> Result<LoadSummary> {
        let mut source = JsonArchive::open(&request.context)?;
        self.load_source(&mut source, request).await
    }

    /// Load from an already open source
    pub async fn load_source(&self, source: &mut dyn MetricSource, request: &LoadRequest) -> Result<LoadSummary> {
        let mut context_labels = source.context_labels()?;
        if context_labels.is_empty() {
            context_labels.insert("hostname", source.hostname().to_string());
        }

        let mut walk = Walk {
            wanted: resolve_wanted(source, &request.metrics)?,
            metrics: HashMap::new(),
            skipped: HashSet::new(),
            diagnostics: Diagnostics::default(),
            context_labels,
            counter_wrap: self.counter_wrap,
            metadata_only: request.metadata_only,
        };
        info!(
            context = %request.context,
            metrics = walk.wanted.len(),
            metadata_only = request.metadata_only,
            "Loading metric source"
        );

        let window = request.window;
        source.set_mode(window.start)?;
        let mut summary = LoadSummary::default();
        while let Some(record) = source.fetch()? {
            if window.is_past_end(record.timestamp) {
                break;
            }
            if window.is_before_start(record.timestamp) {
                continue;
            }
            summary.records += 1;
            let batch = walk.process(&*source, record);
            summary.values_stored += persist::flush(&self.mapper, &batch).await? as u64;
        }

        summary.series = walk.metrics.values().map(|m| m.values.len()).sum();
        summary.skipped_metrics = walk.skipped.len();
        info!(
            records = summary.records,
            values = summary.values_stored,
            series = summary.series,
            skipped = summary.skipped_metrics,
            "Load complete"
        );
        Ok(summary)
    }
}

/// Expand the requested patterns into metric identifiers
fn resolve_wanted(source: &dyn MetricSource, patterns: &[String]) -> std::result::Result<HashSet<MetricId>, SourceError> {
    let all = [String::new()];
    let patterns = if patterns.is_empty() { &all[..] } else { patterns };
    let mut wanted = HashSet::new();
    for pattern in patterns {
        let names = match source.expand_metric_spec(pattern) {
            Ok(names) => names,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Metric pattern matched nothing");
                record_skip("unknown-name");
                continue;
            },
        };
        for name in names {
            match source.lookup_name(&name) {
                Ok(pmid) => {
                    wanted.insert(pmid);
                },
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(name = %name, error = %e, "Metric name lookup failed"),
            }
        }
    }
    Ok(wanted)
}

/// Running state of one load
struct Walk {
    wanted: HashSet<MetricId>,
    metrics: HashMap<MetricId, Metric>,
    skipped: HashSet<MetricId>,
    diagnostics: Diagnostics,
    context_labels: LabelSet,
    counter_wrap: bool,
    metadata_only: bool,
}

impl Walk {
    /// Fold one record into the running state, returning the writes it needs
    fn process(&mut self, source: &dyn MetricSource, record: FetchRecord) -> Batch {
        let ts = record.timestamp;
        let mut batch = Batch::default();

        if record.is_mark() {
            RECORDS_PROCESSED.with_label_values(&["mark"]).inc();
            debug!(timestamp = %ts, "Mark record");
            for metric in self.metrics.values_mut() {
                metric.mark(ts);
            }
            return batch;
        }
        RECORDS_PROCESSED.with_label_values(&["sample"]).inc();

        for set in record.sets {
            let pmid = set.pmid;
            if !self.wanted.contains(&pmid) || self.skipped.contains(&pmid) {
                continue;
            }
            if !self.metrics.contains_key(&pmid) {
                match resolve_metric(source, pmid, &self.context_labels) {
                    Ok(metric) => {
                        debug!(pmid = %pmid, names = ?metric.names, "Metric discovered");
                        self.metrics.insert(pmid, metric);
                    },
                    Err(skip) => {
                        self.skipped.insert(pmid);
                        self.diagnostics.report(pmid, skip.reason, &skip.detail);
                        continue;
                    },
                }
            }
            let values = match set.values {
                Ok(values) => values,
                Err(status) => {
                    self.diagnostics.report(pmid, "fetch-error", &status);
                    continue;
                },
            };
            let Some(metric) = self.metrics.get_mut(&pmid) else {
                continue;
            };

            for raw in values {
                let sample = match AtomValue::from_json(&raw.value, metric.desc.value_type) {
                    Ok(sample) => sample,
                    Err(e) => {
                        self.diagnostics.report(pmid, "extract", &e);
                        continue;
                    },
                };
                if !metric.values.contains_key(&raw.inst) {
                    match discover_value(source, metric, raw.inst) {
                        Ok(value) => {
                            let indom = if raw.inst.is_some() { "true" } else { "false" };
                            SERIES_DISCOVERED.with_label_values(&[indom]).inc();
                            metric.values.insert(raw.inst, value);
                        },
                        Err(skip) => {
                            self.diagnostics.report(pmid, skip.reason, &skip.detail);
                            continue;
                        },
                    }
                }
                let desc = &metric.desc;
                let Some(value) = metric.values.get_mut(&raw.inst) else {
                    continue;
                };

                if !value.cached {
                    batch.metadata.push(SeriesMetadata {
                        sid: value.sid,
                        desc: desc.clone(),
                        names: metric.names.clone(),
                        instance: value.instance.clone(),
                        labels: value.labels.clone(),
                    });
                    value.cached = true;
                }

                if let Observation::Emit(text) = value.observe(ts, &sample, desc, self.counter_wrap) {
                    if !self.metadata_only {
                        VALUES_STORED.with_label_values(&[desc.semantics.as_str()]).inc();
                        batch.samples.push(StoredSample {
                            sid: value.sid,
                            timestamp: ts,
                            value: text,
                        });
                    }
                }
            }
        }
        batch
    }
}

/// Resolve descriptor, names and labels of a metric on first sight
fn resolve_metric(source: &dyn MetricSource, pmid: MetricId, context: &LabelSet) -> std::result::Result<Metric, Skip> {
    let desc = source
        .lookup_desc(pmid)
        .map_err(|e| Skip::new("descriptor", e))?;
    if !desc.value_type.is_numeric() {
        return Err(Skip::new(
            "non-numeric",
            format!("type {} is not supported", desc.value_type),
        ));
    }
    let names = source.name_all(pmid).map_err(|e| Skip::new("names", e))?;

    let labels = |scope| source.labels(scope).map_err(|e| Skip::new("labels", e));
    let hierarchy = LabelHierarchy {
        context: context.clone(),
        domain: labels(LabelScope::Domain(pmid.domain))?,
        indom: match desc.indom {
            Some(indom) => labels(LabelScope::InDom(indom))?,
            None => LabelSet::new(),
        },
        cluster: labels(LabelScope::Cluster(pmid))?,
        item: labels(LabelScope::Item(pmid))?,
        instance: LabelSet::new(),
    };

    let mut metric = Metric::new(desc, names, hierarchy.merged());
    refresh_instances(source, &mut metric).map_err(|e| Skip::new("instances", e))?;
    Ok(metric)
}

/// Re-read the instance domain of a metric
fn refresh_instances(source: &dyn MetricSource, metric: &mut Metric) -> std::result::Result<(), SourceError> {
    let Some(indom) = metric.desc.indom else {
        return Ok(());
    };
    let mut labels = source.instance_labels(indom)?;
    metric.instances = source
        .instances(indom)?
        .into_iter()
        .map(|inst| {
            let set = labels.remove(&inst.id).unwrap_or_default();
            (inst.id, (inst.name, set))
        })
        .collect();
    Ok(())
}

/// Build the series for one instance of a metric
fn discover_value(source: &dyn MetricSource, metric: &mut Metric, inst: Option<u32>) -> std::result::Result<Value, Skip> {
    let Some(id) = inst else {
        let sid = series_identifier(&metric.desc, None, &metric.labels);
        return Ok(Value::new(sid, None, metric.labels.clone()));
    };

    if !metric.instances.contains_key(&id) {
        // The instance domain may have grown since the metric was resolved
        refresh_instances(source, metric).map_err(|e| Skip::new("instances", e))?;
    }
    let (name, inst_labels) = metric
        .instances
        .get(&id)
        .ok_or_else(|| Skip::new("instance", format!("instance {} not in its domain", id)))?;

    let mut labels = metric.labels.clone();
    labels.merge(inst_labels);
    let sid = series_identifier(&metric.desc, Some(InstanceRef { id, name }), &labels);
    let instance = Instance {
        id,
        name: name.clone(),
    };
    Ok(Value::new(sid, Some(instance), labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse;
    use crate::store::{Keys, MemoryStore};
    use crate::types::Timestamp;
    use serde_json::json;

    fn archive(doc: serde_json::Value) -> JsonArchive {
        JsonArchive::from_value(Context::archive("test"), doc).unwrap()
    }

    async fn loader(counter_wrap: bool) -> (Arc<MemoryStore>, Loader) {
        let store = Arc::new(MemoryStore::new());
        let mapper = Mapper::new(store.clone(), Keys::default(), 256).await.unwrap();
        (store, Loader::new(Arc::new(mapper), counter_wrap))
    }

    fn counter_doc() -> serde_json::Value {
        json!({
            "hostname": "web1",
            "metrics": [
                {"names": ["net.in"], "pmid": {"domain": 1, "cluster": 0, "item": 0},
                 "type": "u64", "semantics": "counter", "units": {"dim_count": 1}},
                {"names": ["proc.name"], "pmid": {"domain": 1, "cluster": 0, "item": 1},
                 "type": "string", "semantics": "instant"},
                {"names": ["disk.used"], "pmid": {"domain": 1, "cluster": 1, "item": 0},
                 "type": "u32", "semantics": "instant",
                 "indom": {"domain": 1, "serial": 7}}
            ],
            "indoms": [{"domain": 1, "serial": 7, "instances": [{"id": 0, "name": "sda"}]}],
            "records": [
                {"timestamp": 1.0, "values": [
                    {"metric": "net.in", "value": 10},
                    {"metric": "proc.name", "value": "init"},
                    {"metric": "disk.used", "instances": [{"inst": 0, "value": 5}, {"inst": 9, "value": 1}]}
                ]},
                {"timestamp": 2.0, "values": [
                    {"metric": "net.in", "value": 20},
                    {"metric": "proc.name", "value": "init"},
                    {"metric": "disk.used", "instances": [{"inst": 0, "value": "bogus"}]}
                ]},
                {"timestamp": 3.0, "values": [{"metric": "net.in", "value": 30}]}
            ]
        })
    }

    #[tokio::test]
    async fn test_load_summary() {
        let (_, loader) = loader(false).await;
        let mut source = archive(counter_doc());
        let summary = loader
            .load_source(&mut source, &LoadRequest::new(Context::archive("test")))
            .await
            .unwrap();
        assert_eq!(summary.records, 3);
        // net.in: two rates; disk.used: one raw value (inst 9 unknown, "bogus" unextractable)
        assert_eq!(summary.values_stored, 3);
        assert_eq!(summary.series, 2);
        assert_eq!(summary.skipped_metrics, 1);
    }

    #[tokio::test]
    async fn test_metadata_only_and_window() {
        let (store, loader) = loader(false).await;
        let mut source = archive(counter_doc());
        let mut request = LoadRequest::new(Context::archive("test"));
        request.metrics = vec!["net".into()];
        request.metadata_only = true;
        request.window = TimeWindow::between(Timestamp::from_secs_f64(0.0), Timestamp::from_secs_f64(2.0));
        let summary = loader.load_source(&mut source, &request).await.unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.values_stored, 0);
        assert_eq!(summary.series, 1);
        assert!(store.keys().iter().any(|k| k.starts_with("pcp:desc:series:")));
        assert!(!store.keys().iter().any(|k| k.starts_with("pcp:values:series:")));
    }

    #[tokio::test]
    async fn test_unknown_pattern_is_not_fatal() {
        let (_, loader) = loader(false).await;
        let mut source = archive(counter_doc());
        let mut request = LoadRequest::new(Context::archive("test"));
        request.metrics = vec!["no.such".into(), "net.in".into()];
        let summary = loader.load_source(&mut source, &request).await.unwrap();
        assert_eq!(summary.series, 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal() {
        let (store, loader) = loader(false).await;
        store.set_unavailable(true);
        let mut source = archive(counter_doc());
        let result = loader
            .load_source(&mut source, &LoadRequest::new(Context::archive("test")))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_non_archive_context_rejected() {
        let (_, loader) = loader(false).await;
        let result = loader.load(&LoadRequest::new(Context::host("localhost"))).await;
        assert!(matches!(
            result,
            Err(crate::error::Error::Source(SourceError::Unsupported(_)))
        ));
    }

    #[test]
    fn test_diagnostics_warn_once_per_pair() {
        let mut diagnostics = Diagnostics::default();
        let pmid = MetricId::new(1, 0, 1);
        assert!(diagnostics.report(pmid, "extract", "bad value"));
        assert!(!diagnostics.report(pmid, "extract", "bad value again"));
        // A different problem or metric is still reported
        assert!(diagnostics.report(pmid, "fetch-error", "-12357"));
        assert!(diagnostics.report(MetricId::new(1, 0, 2), "extract", "bad value"));
        assert_eq!(diagnostics.warned.len(), 3);
    }

    #[test]
    fn test_request_from_query() {
        let tree = parse(r#"source.archive == "/tmp/a.json" && metric.name == "disk.dev" && hostname == "x""#)
            .unwrap();
        let request = LoadRequest::from_query(&tree, TimeWindow::default()).unwrap();
        assert_eq!(request.context, Context::archive("/tmp/a.json"));
        assert_eq!(request.metrics, vec!["disk.dev"]);

        let tree = parse(r#"m.name == "a""#).unwrap();
        assert!(LoadRequest::from_query(&tree, TimeWindow::default()).is_err());

        let tree = parse(r#"source.hostspec == "localhost""#).unwrap();
        let request = LoadRequest::from_query(&tree, TimeWindow::default()).unwrap();
        assert_eq!(request.context.source_type, SourceType::Host);
        assert!(request.metrics.is_empty());
    }
}
