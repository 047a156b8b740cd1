//! Writing series metadata and samples to the store
//!
//! Metadata writes are set additions and hash field sets, so repeating
//! them for an already known series changes nothing. Each flush costs at
//! most three round trips: two intern batches (names, then values keyed
//! by name id) and one pipeline of writes.

use crate::error::StoreError;
use crate::identity::SeriesId;
use crate::labels::{value_text, LabelSet};
use crate::mapper::{MapName, Mapper};
use crate::source::Instance;
use crate::store::{Command, Pipeline};
use crate::types::{Descriptor, Timestamp};
use tracing::debug;

/// Everything persisted once for a newly discovered series
#[derive(Debug, Clone)]
pub struct SeriesMetadata {
    /// Series identifier
    pub sid: SeriesId,
    /// Metric descriptor
    pub desc: Descriptor,
    /// Metric names, aliases included
    pub names: Vec<String>,
    /// Instance, absent for singular metrics
    pub instance: Option<Instance>,
    /// Merged labels and notes
    pub labels: LabelSet,
}

/// One sample destined for a series value log
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSample {
    /// Series identifier
    pub sid: SeriesId,
    /// Sample time, also the sorted-set score
    pub timestamp: Timestamp,
    /// Formatted value
    pub value: String,
}

impl StoredSample {
    /// Sorted-set member: `<stamp>:<value>`
    ///
    /// The stamp keeps equal values at different times distinct.
    pub fn member(&self) -> String {
        format!("{}:{}", self.timestamp, self.value)
    }
}

/// Split a stored sample member back into stamp and value text
pub fn split_member(member: &str) -> Option<(&str, &str)> {
    member.split_once(':')
}

/// Accumulates the writes of one source record
#[derive(Debug, Default)]
pub struct Batch {
    /// Series needing metadata
    pub metadata: Vec<SeriesMetadata>,
    /// Samples to append
    pub samples: Vec<StoredSample>,
}

impl Batch {
    /// Nothing to write
    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty() && self.samples.is_empty()
    }
}

fn label_entries(labels: &LabelSet) -> impl Iterator<Item = (bool, &str, &serde_json::Value)> {
    labels
        .intrinsic()
        .map(|(n, v)| (false, n, v))
        .chain(labels.notes().map(|(n, v)| (true, n, v)))
}

/// Write a batch, returning the number of samples appended
pub async fn flush(mapper: &Mapper, batch: &Batch) -> Result<usize, StoreError> {
    if batch.is_empty() {
        return Ok(0);
    }
    let keys = mapper.keys();
    let mut pipeline = Pipeline::new();

    if !batch.metadata.is_empty() {
        // Pass one: metric names, instance names and label names
        let mut names = Vec::new();
        for meta in &batch.metadata {
            for name in &meta.names {
                names.push((MapName::MetricName, name.clone()));
            }
            if let Some(inst) = &meta.instance {
                names.push((MapName::InstName, inst.name.clone()));
            }
            for (notes, name, _) in label_entries(&meta.labels) {
                names.push((MapName::names(notes), name.to_string()));
            }
        }
        let name_ids = mapper.intern_batch(&names).await?;

        // Pass two: label values, scoped by the name ids just assigned
        let mut values = Vec::new();
        let mut cursor = name_ids.iter();
        let mut per_series = Vec::with_capacity(batch.metadata.len());
        for meta in &batch.metadata {
            let metric_ids: Vec<u64> = cursor.by_ref().take(meta.names.len()).map(|i| i.id).collect();
            let inst_id = match meta.instance {
                Some(_) => cursor.next().map(|i| i.id),
                None => None,
            };
            let mut label_ids = Vec::new();
            for (notes, _, value) in label_entries(&meta.labels) {
                let name_id = cursor
                    .next()
                    .map(|i| i.id)
                    .ok_or_else(|| StoreError::Drained("label name ids".to_string()))?;
                values.push((MapName::values(notes, name_id), value_text(value)));
                label_ids.push((notes, name_id));
            }
            per_series.push((metric_ids, inst_id, label_ids));
        }
        let value_ids = mapper.intern_batch(&values).await?;
        let mut value_cursor = value_ids.iter();

        for (meta, (metric_ids, inst_id, label_ids)) in batch.metadata.iter().zip(per_series) {
            let sid = meta.sid.as_str();
            append_descriptor(&mut pipeline, &keys.desc(&meta.sid), &meta.desc);

            if !metric_ids.is_empty() {
                pipeline.append(Command::sadd(&keys.names_of(&MapName::MetricName, &meta.sid), &metric_ids));
            }
            for id in &metric_ids {
                pipeline.append(Command::sadd(&keys.series_with(&MapName::MetricName, *id), [sid]));
            }

            if let (Some(inst), Some(name_id)) = (&meta.instance, inst_id) {
                pipeline.append(Command::hset(
                    &keys.inst(&meta.sid),
                    [("id", inst.id as u64), ("name", name_id)],
                ));
                pipeline.append(Command::sadd(&keys.series_with(&MapName::InstName, name_id), [sid]));
            }

            for (notes, name_id) in label_ids {
                let value_id = value_cursor
                    .next()
                    .map(|i| i.id)
                    .ok_or_else(|| StoreError::Drained("label value ids".to_string()))?;
                let names = MapName::names(notes);
                pipeline.append(Command::sadd(&keys.names_of(&names, &meta.sid), [name_id]));
                pipeline.append(Command::hset(&keys.values_of(notes, &meta.sid), [(name_id, value_id)]));
                pipeline.append(Command::sadd(
                    &keys.series_with(&MapName::values(notes, name_id), value_id),
                    [sid],
                ));
            }
        }
    }

    for sample in &batch.samples {
        pipeline.append(Command::zadd(&keys.samples(&sample.sid), sample.timestamp, &sample.member()));
    }

    let commands = pipeline.len();
    let mut replies = mapper.store().execute(pipeline).await?;
    for _ in 0..commands {
        replies.next_reply("series write")?.into_ok("series write")?;
    }
    debug!(
        series = batch.metadata.len(),
        samples = batch.samples.len(),
        commands,
        "Flushed series batch"
    );
    Ok(batch.samples.len())
}

fn append_descriptor(pipeline: &mut Pipeline, key: &str, desc: &Descriptor) {
    let mut fields = vec![
        ("domain", desc.pmid.domain.to_string()),
        ("cluster", desc.pmid.cluster.to_string()),
        ("item", desc.pmid.item.to_string()),
        ("semantics", desc.semantics.as_str().to_string()),
    ];
    if let Some(indom) = desc.indom {
        fields.push(("serial", indom.serial.to_string()));
    }
    fields.push(("type", desc.value_type.as_str().to_string()));
    fields.push(("units", desc.units.to_string()));
    pipeline.append(Command::hset(key, fields));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{series_identifier, InstanceRef};
    use crate::store::{Keys, MemoryStore, Store};
    use crate::types::{InDomId, MetricId, Semantics, Units, ValueType};
    use std::sync::Arc;

    fn metadata() -> SeriesMetadata {
        let desc = Descriptor {
            pmid: MetricId::new(60, 0, 4),
            value_type: ValueType::U64,
            indom: Some(InDomId::new(60, 1)),
            semantics: Semantics::Counter,
            units: Units::count(),
        };
        let labels = LabelSet::new().with("hostname", "web1").with_note("owner", "ops");
        let sid = series_identifier(&desc, Some(InstanceRef { id: 0, name: "sda" }), &labels);
        SeriesMetadata {
            sid,
            desc,
            names: vec!["disk.dev.read".into()],
            instance: Some(Instance {
                id: 0,
                name: "sda".into(),
            }),
            labels,
        }
    }

    async fn smembers(store: &MemoryStore, key: &str) -> Vec<String> {
        let mut p = Pipeline::new();
        p.append(Command::smembers(key));
        store
            .execute(p)
            .await
            .unwrap()
            .next_reply("test")
            .unwrap()
            .into_strings("test")
            .unwrap()
    }

    #[test]
    fn test_member_format() {
        let sample = StoredSample {
            sid: metadata().sid,
            timestamp: Timestamp::from_secs_f64(12.5),
            value: "1.000000e+01".into(),
        };
        assert_eq!(sample.member(), "12.500000:1.000000e+01");
        assert_eq!(split_member(&sample.member()), Some(("12.500000", "1.000000e+01")));
    }

    #[tokio::test]
    async fn test_flush_writes_schema() {
        let store = Arc::new(MemoryStore::new());
        let mapper = Mapper::new(store.clone(), Keys::default(), 64).await.unwrap();
        let meta = metadata();
        let sid = meta.sid;
        let batch = Batch {
            metadata: vec![meta],
            samples: vec![StoredSample {
                sid,
                timestamp: Timestamp::from_secs_f64(1.0),
                value: "5".into(),
            }],
        };
        assert_eq!(flush(&mapper, &batch).await.unwrap(), 1);

        let keys = Keys::default();
        assert_eq!(smembers(&store, "pcp:series:metric.name:1").await, vec![sid.to_string()]);
        assert_eq!(smembers(&store, "pcp:series:inst.name:1").await, vec![sid.to_string()]);
        // hostname is label name 1 with value 1; owner is note name 1
        assert_eq!(smembers(&store, "pcp:series:label.1.value:1").await, vec![sid.to_string()]);
        assert_eq!(smembers(&store, "pcp:series:note.1.value:1").await, vec![sid.to_string()]);
        assert_eq!(smembers(&store, &keys.names_of(&MapName::LabelName, &sid)).await, vec!["1"]);

        let mut p = Pipeline::new();
        p.append(Command::hgetall(&keys.desc(&sid)));
        p.append(Command::hgetall(&keys.inst(&sid)));
        let mut replies = store.execute(p).await.unwrap();
        let desc = replies.next_reply("t").unwrap().into_pairs("t").unwrap();
        assert!(desc.contains(&("semantics".to_string(), "counter".to_string())));
        assert!(desc.contains(&("serial".to_string(), "1".to_string())));
        let inst = replies.next_reply("t").unwrap().into_pairs("t").unwrap();
        assert_eq!(inst, vec![("id".into(), "0".into()), ("name".into(), "1".into())]);

        // Writing the same metadata again is a no-op
        flush(&mapper, &batch).await.unwrap();
        assert_eq!(smembers(&store, "pcp:series:metric.name:1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_store_failure() {
        let store = Arc::new(MemoryStore::new());
        let mapper = Mapper::new(store.clone(), Keys::default(), 64).await.unwrap();
        store.set_unavailable(true);
        let batch = Batch {
            metadata: vec![metadata()],
            samples: vec![],
        };
        assert!(flush(&mapper, &batch).await.is_err());
        assert_eq!(flush(&mapper, &Batch::default()).await.unwrap(), 0);
    }
}
