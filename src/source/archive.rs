//! Archive source read from a JSON document
//!
//! ```json
//! {
//!   "hostname": "web1",
//!   "labels": {"datacenter": "east"},
//!   "domains": {"60": {"labels": {"agent": "linux"}}},
//!   "clusters": [{"domain": 60, "cluster": 0, "labels": {}}],
//!   "indoms": [{"domain": 60, "serial": 1,
//!               "instances": [{"id": 0, "name": "sda", "labels": {"device_type": "disk"}}]}],
//!   "metrics": [{"names": ["disk.dev.read"], "pmid": {"domain": 60, "cluster": 0, "item": 4},
//!                "type": "u64", "semantics": "counter", "indom": {"domain": 60, "serial": 1},
//!                "units": {"dim_count": 1}}],
//!   "records": [
//!     {"timestamp": 1700000000.0, "values": [{"metric": "disk.dev.read",
//!                                              "instances": [{"inst": 0, "value": 10}]}]},
//!     {"timestamp": 1700000005.0, "mark": true}
//!   ]
//! }
//! ```
//!
//! Every label block may carry `notes` beside `labels`.

use super::{Context, FetchRecord, Instance, LabelScope, MetricSource, RawValue, SourceType, ValueSet};
use crate::error::SourceError;
use crate::labels::LabelSet;
use crate::types::{Descriptor, InDomId, MetricId, Semantics, Timestamp, Units, ValueType};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
struct LabelBlock {
    #[serde(default)]
    labels: Map<String, JsonValue>,
    #[serde(default)]
    notes: Map<String, JsonValue>,
}

impl LabelBlock {
    fn to_set(&self) -> LabelSet {
        let mut set = LabelSet::new();
        for (name, value) in &self.labels {
            set.insert(name.clone(), value.clone());
        }
        for (name, value) in &self.notes {
            set.insert_note(name.clone(), value.clone());
        }
        set
    }
}

#[derive(Debug, Deserialize)]
struct ClusterDoc {
    domain: u32,
    cluster: u32,
    #[serde(flatten)]
    labels: LabelBlock,
}

#[derive(Debug, Deserialize)]
struct InstanceDoc {
    id: u32,
    name: String,
    #[serde(flatten)]
    labels: LabelBlock,
}

#[derive(Debug, Deserialize)]
struct InDomDoc {
    domain: u32,
    serial: u32,
    #[serde(default)]
    instances: Vec<InstanceDoc>,
    #[serde(flatten)]
    labels: LabelBlock,
}

#[derive(Debug, Deserialize)]
struct MetricDoc {
    names: Vec<String>,
    pmid: MetricId,
    #[serde(rename = "type")]
    value_type: ValueType,
    semantics: Semantics,
    #[serde(default)]
    indom: Option<InDomId>,
    #[serde(default)]
    units: Units,
    #[serde(flatten)]
    labels: LabelBlock,
}

#[derive(Debug, Deserialize)]
struct InstanceValueDoc {
    inst: u32,
    value: JsonValue,
}

#[derive(Debug, Deserialize)]
struct ValueDoc {
    metric: String,
    #[serde(default)]
    value: Option<JsonValue>,
    #[serde(default)]
    instances: Vec<InstanceValueDoc>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordDoc {
    timestamp: Timestamp,
    #[serde(default)]
    mark: bool,
    #[serde(default)]
    values: Vec<ValueDoc>,
}

#[derive(Debug, Deserialize)]
struct ArchiveDoc {
    hostname: String,
    #[serde(flatten)]
    labels: LabelBlock,
    #[serde(default)]
    domains: BTreeMap<u32, LabelBlock>,
    #[serde(default)]
    clusters: Vec<ClusterDoc>,
    #[serde(default)]
    indoms: Vec<InDomDoc>,
    metrics: Vec<MetricDoc>,
    #[serde(default)]
    records: Vec<RecordDoc>,
}

/// An archive held in memory, walked forward one record at a time
#[derive(Debug)]
pub struct JsonArchive {
    context: Context,
    hostname: String,
    context_labels: LabelSet,
    domain_labels: HashMap<u32, LabelSet>,
    cluster_labels: HashMap<(u32, u32), LabelSet>,
    indom_labels: HashMap<InDomId, LabelSet>,
    instances: HashMap<InDomId, Vec<Instance>>,
    instance_labels: HashMap<InDomId, HashMap<u32, LabelSet>>,
    names: BTreeMap<String, MetricId>,
    metrics: HashMap<MetricId, (Descriptor, Vec<String>, LabelSet)>,
    records: Vec<FetchRecord>,
    cursor: usize,
}

impl JsonArchive {
    /// Open the archive named by an archive context
    pub fn open(context: &Context) -> Result<Self, SourceError> {
        if context.source_type != SourceType::Archive {
            return Err(SourceError::Unsupported(context.source_type.to_string()));
        }
        let text = std::fs::read_to_string(Path::new(&context.source)).map_err(|e| {
            SourceError::Context {
                source_name: context.source.clone(),
                reason: e.to_string(),
            }
        })?;
        Self::from_str(context.clone(), &text)
    }

    /// Parse an archive document
    pub fn from_str(context: Context, text: &str) -> Result<Self, SourceError> {
        let doc: ArchiveDoc = serde_json::from_str(text).map_err(|e| SourceError::Context {
            source_name: context.source.clone(),
            reason: format!("invalid archive: {}", e),
        })?;
        Self::from_doc(context, doc)
    }

    /// Build an archive from an already parsed JSON value
    pub fn from_value(context: Context, value: JsonValue) -> Result<Self, SourceError> {
        let doc: ArchiveDoc = serde_json::from_value(value).map_err(|e| SourceError::Context {
            source_name: context.source.clone(),
            reason: format!("invalid archive: {}", e),
        })?;
        Self::from_doc(context, doc)
    }

    fn from_doc(context: Context, doc: ArchiveDoc) -> Result<Self, SourceError> {
        let mut names = BTreeMap::new();
        let mut metrics = HashMap::new();
        for m in doc.metrics {
            for name in &m.names {
                names.insert(name.clone(), m.pmid);
            }
            let desc = Descriptor {
                pmid: m.pmid,
                value_type: m.value_type,
                indom: m.indom,
                semantics: m.semantics,
                units: m.units,
            };
            metrics.insert(m.pmid, (desc, m.names, m.labels.to_set()));
        }

        let mut indom_labels = HashMap::new();
        let mut instances = HashMap::new();
        let mut instance_labels = HashMap::new();
        for d in doc.indoms {
            let id = InDomId::new(d.domain, d.serial);
            indom_labels.insert(id, d.labels.to_set());
            let mut labels = HashMap::new();
            let mut insts = Vec::with_capacity(d.instances.len());
            for inst in d.instances {
                labels.insert(inst.id, inst.labels.to_set());
                insts.push(Instance {
                    id: inst.id,
                    name: inst.name,
                });
            }
            instances.insert(id, insts);
            instance_labels.insert(id, labels);
        }

        let mut records = Vec::with_capacity(doc.records.len());
        for r in doc.records {
            if r.mark {
                records.push(FetchRecord {
                    timestamp: r.timestamp,
                    sets: Vec::new(),
                });
                continue;
            }
            let mut sets = Vec::with_capacity(r.values.len());
            for v in r.values {
                let Some(pmid) = names.get(&v.metric).copied() else {
                    return Err(SourceError::Context {
                        source_name: context.source.clone(),
                        reason: format!("record references unknown metric {}", v.metric),
                    });
                };
                let values = match (v.error, v.value) {
                    (Some(err), _) => Err(err),
                    (None, Some(value)) => Ok(vec![RawValue { inst: None, value }]),
                    (None, None) => Ok(v
                        .instances
                        .into_iter()
                        .map(|iv| RawValue {
                            inst: Some(iv.inst),
                            value: iv.value,
                        })
                        .collect()),
                };
                sets.push(ValueSet { pmid, values });
            }
            records.push(FetchRecord {
                timestamp: r.timestamp,
                sets,
            });
        }
        records.sort_by_key(|r| r.timestamp);

        debug!(
            source = %context.source,
            metrics = metrics.len(),
            records = records.len(),
            "Archive opened"
        );

        Ok(Self {
            context,
            hostname: doc.hostname,
            context_labels: doc.labels.to_set(),
            domain_labels: doc.domains.iter().map(|(d, b)| (*d, b.to_set())).collect(),
            cluster_labels: doc
                .clusters
                .iter()
                .map(|c| ((c.domain, c.cluster), c.labels.to_set()))
                .collect(),
            indom_labels,
            instances,
            instance_labels,
            names,
            metrics,
            records,
            cursor: 0,
        })
    }

    fn metric(&self, pmid: MetricId) -> Result<&(Descriptor, Vec<String>, LabelSet), SourceError> {
        self.metrics.get(&pmid).ok_or_else(|| SourceError::Descriptor {
            pmid: pmid.to_string(),
            reason: "unknown metric identifier".to_string(),
        })
    }
}

impl MetricSource for JsonArchive {
    fn context(&self) -> &Context {
        &self.context
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn context_labels(&self) -> Result<LabelSet, SourceError> {
        Ok(self.context_labels.clone())
    }

    fn expand_metric_spec(&self, pattern: &str) -> Result<Vec<String>, SourceError> {
        let subtree = format!("{}.", pattern);
        let found: Vec<String> = self
            .names
            .keys()
            .filter(|name| pattern.is_empty() || name.as_str() == pattern || name.starts_with(&subtree))
            .cloned()
            .collect();
        if found.is_empty() {
            return Err(SourceError::UnknownName(pattern.to_string()));
        }
        Ok(found)
    }

    fn lookup_name(&self, name: &str) -> Result<MetricId, SourceError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| SourceError::UnknownName(name.to_string()))
    }

    fn lookup_desc(&self, pmid: MetricId) -> Result<Descriptor, SourceError> {
        self.metric(pmid).map(|(desc, _, _)| desc.clone())
    }

    fn name_all(&self, pmid: MetricId) -> Result<Vec<String>, SourceError> {
        self.metric(pmid).map(|(_, names, _)| names.clone())
    }

    fn labels(&self, scope: LabelScope) -> Result<LabelSet, SourceError> {
        let found = match scope {
            LabelScope::Domain(domain) => self.domain_labels.get(&domain).cloned(),
            LabelScope::InDom(indom) => self.indom_labels.get(&indom).cloned(),
            LabelScope::Cluster(pmid) => self.cluster_labels.get(&pmid.cluster_id()).cloned(),
            LabelScope::Item(pmid) => Some(self.metric(pmid)?.2.clone()),
        };
        Ok(found.unwrap_or_default())
    }

    fn instances(&self, indom: InDomId) -> Result<Vec<Instance>, SourceError> {
        self.instances
            .get(&indom)
            .cloned()
            .ok_or_else(|| SourceError::InstanceDomain {
                indom: indom.to_string(),
                reason: "unknown instance domain".to_string(),
            })
    }

    fn instance_labels(&self, indom: InDomId) -> Result<HashMap<u32, LabelSet>, SourceError> {
        Ok(self.instance_labels.get(&indom).cloned().unwrap_or_default())
    }

    fn set_mode(&mut self, start: Option<Timestamp>) -> Result<(), SourceError> {
        self.cursor = match start {
            Some(start) => self.records.partition_point(|r| r.timestamp < start),
            None => 0,
        };
        Ok(())
    }

    fn fetch(&mut self) -> Result<Option<FetchRecord>, SourceError> {
        let record = self.records.get(self.cursor).cloned();
        if record.is_some() {
            self.cursor += 1;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn sample() -> JsonValue {
        json!({
            "hostname": "web1",
            "labels": {"hostname": "web1"},
            "notes": {"owner": "ops"},
            "domains": {"60": {"labels": {"agent": "linux"}}},
            "clusters": [{"domain": 60, "cluster": 10, "labels": {"subsystem": "disk"}}],
            "indoms": [{
                "domain": 60, "serial": 1,
                "labels": {"indom": "disks"},
                "instances": [
                    {"id": 0, "name": "sda", "labels": {"device_type": "ssd"}},
                    {"id": 1, "name": "sdb"}
                ]
            }],
            "metrics": [
                {"names": ["disk.dev.read", "disk.dev.read_alias"],
                 "pmid": {"domain": 60, "cluster": 10, "item": 4},
                 "type": "u64", "semantics": "counter",
                 "indom": {"domain": 60, "serial": 1},
                 "units": {"dim_count": 1}},
                {"names": ["kernel.all.load"],
                 "pmid": {"domain": 60, "cluster": 2, "item": 0},
                 "type": "float", "semantics": "instant",
                 "labels": {"units_note": "load"}}
            ],
            "records": [
                {"timestamp": 20.0, "values": [{"metric": "kernel.all.load", "error": "no value"}]},
                {"timestamp": 10.0, "values": [
                    {"metric": "disk.dev.read", "instances": [{"inst": 0, "value": 5}, {"inst": 1, "value": 7}]},
                    {"metric": "kernel.all.load", "value": 0.5}
                ]},
                {"timestamp": 30.0, "mark": true}
            ]
        })
    }

    fn archive() -> JsonArchive {
        JsonArchive::from_value(Context::archive("mem"), sample()).unwrap()
    }

    #[test]
    fn test_namespace_expansion() {
        let a = archive();
        assert_eq!(
            a.expand_metric_spec("disk").unwrap(),
            vec!["disk.dev.read", "disk.dev.read_alias"]
        );
        assert_eq!(a.expand_metric_spec("kernel.all.load").unwrap(), vec!["kernel.all.load"]);
        assert_eq!(a.expand_metric_spec("").unwrap().len(), 3);
        // Prefix match must respect name boundaries
        assert!(matches!(a.expand_metric_spec("disk.de"), Err(SourceError::UnknownName(_))));
    }

    #[test]
    fn test_descriptor_and_names() {
        let a = archive();
        let pmid = a.lookup_name("disk.dev.read_alias").unwrap();
        assert_eq!(pmid, MetricId::new(60, 10, 4));
        let desc = a.lookup_desc(pmid).unwrap();
        assert_eq!(desc.semantics, Semantics::Counter);
        assert_eq!(desc.indom, Some(InDomId::new(60, 1)));
        assert_eq!(a.name_all(pmid).unwrap().len(), 2);
        assert!(a.lookup_desc(MetricId::new(1, 1, 1)).is_err());
    }

    #[test]
    fn test_label_levels() {
        let a = archive();
        let ctx = a.context_labels().unwrap();
        assert_eq!(ctx.canonical_json(), r#"{"hostname":"web1"}"#);
        assert_eq!(ctx.notes().count(), 1);
        let pmid = MetricId::new(60, 10, 4);
        assert!(a.labels(LabelScope::Domain(60)).unwrap().get("agent").is_some());
        assert!(a.labels(LabelScope::Cluster(pmid)).unwrap().get("subsystem").is_some());
        assert!(a.labels(LabelScope::InDom(InDomId::new(60, 1))).unwrap().get("indom").is_some());
        assert!(a.labels(LabelScope::Item(pmid)).unwrap().is_empty());
        assert!(a.labels(LabelScope::Domain(99)).unwrap().is_empty());
        let inst = a.instance_labels(InDomId::new(60, 1)).unwrap();
        assert!(inst[&0].get("device_type").is_some());
        assert!(inst[&1].is_empty());
    }

    #[test]
    fn test_records_sorted_and_windowed() {
        let mut a = archive();
        a.set_mode(None).unwrap();
        let first = a.fetch().unwrap().unwrap();
        assert_eq!(first.timestamp, Timestamp::from_secs_f64(10.0));
        assert_eq!(first.sets.len(), 2);
        assert_eq!(first.sets[1].values.as_ref().unwrap()[0].inst, None);

        let second = a.fetch().unwrap().unwrap();
        assert!(second.sets[0].values.is_err());
        assert!(a.fetch().unwrap().unwrap().is_mark());
        assert!(a.fetch().unwrap().is_none());

        a.set_mode(Some(Timestamp::from_secs_f64(15.0))).unwrap();
        assert_eq!(a.fetch().unwrap().unwrap().timestamp, Timestamp::from_secs_f64(20.0));
    }

    #[test]
    fn test_open_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", sample()).unwrap();
        let ctx = Context::archive(file.path().to_string_lossy().to_string());
        let a = JsonArchive::open(&ctx).unwrap();
        assert_eq!(a.hostname(), "web1");
    }

    #[test]
    fn test_open_failures() {
        assert!(matches!(
            JsonArchive::open(&Context::host("localhost")),
            Err(SourceError::Unsupported(_))
        ));
        let err = JsonArchive::open(&Context::archive("/nonexistent/archive.json")).unwrap_err();
        assert!(err.is_fatal());

        let bad = json!({"hostname": "x", "metrics": [], "records": [
            {"timestamp": 1.0, "values": [{"metric": "nope", "value": 1}]}
        ]});
        assert!(JsonArchive::from_value(Context::archive("mem"), bad).is_err());
    }
}
