//! Per-series metadata lookups
//!
//! Reverse the interned maps to report what the loader recorded for a set
//! of series: descriptors, instances, labels, notes and metric names. Each
//! lookup costs one pipeline for the series keys plus one for the maps it
//! needs to reverse.

use crate::error::{Result, StoreError};
use crate::identity::SeriesId;
use crate::mapper::{parse_id, reverse_pairs, MapName};
use crate::store::{Command, Keys, Pipeline, Replies, Store};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Descriptor of one series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesDesc {
    /// Series identifier
    pub series: SeriesId,
    /// Metric identifier, `domain.cluster.item`
    pub pmid: String,
    /// Instance domain, `domain.serial`, when the metric has one
    pub indom: Option<String>,
    /// Semantics name
    pub semantics: String,
    /// Value type name
    #[serde(rename = "type")]
    pub value_type: String,
    /// Units text
    pub units: String,
}

/// Instance of one series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesInstance {
    /// Series identifier
    pub series: SeriesId,
    /// Numeric instance id
    pub id: u32,
    /// Instance name
    pub name: String,
}

/// Labels (or notes) of one series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesLabels {
    /// Series identifier
    pub series: SeriesId,
    /// Name to value text
    pub labels: BTreeMap<String, String>,
}

/// Metric names of one series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesNames {
    /// Series identifier
    pub series: SeriesId,
    /// Metric names, sorted
    pub names: Vec<String>,
}

/// Reads series metadata back out of the store
pub struct Lookup {
    store: Arc<dyn Store>,
    keys: Keys,
}

impl Lookup {
    /// Create a lookup over a store
    pub fn new(store: Arc<dyn Store>, keys: Keys) -> Self {
        Self { store, keys }
    }

    async fn per_series(&self, ids: &[SeriesId], command: impl Fn(&SeriesId) -> Command) -> Result<Replies> {
        if ids.is_empty() {
            return Ok(Replies::default());
        }
        let mut pipeline = Pipeline::new();
        for sid in ids {
            pipeline.append(command(sid));
        }
        Ok(self.store.execute(pipeline).await?)
    }

    async fn reverse(&self, names: &[MapName]) -> Result<HashMap<MapName, HashMap<u64, String>>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let mut pipeline = Pipeline::new();
        for name in names {
            pipeline.append(Command::hgetall(&self.keys.map(name)));
        }
        let mut replies = self.store.execute(pipeline).await?;
        let mut out = HashMap::with_capacity(names.len());
        for name in names {
            out.insert(name.clone(), reverse_pairs(replies.next_reply("map reverse")?)?);
        }
        Ok(out)
    }

    /// Descriptors; series without one are omitted
    pub async fn desc(&self, ids: &[SeriesId]) -> Result<Vec<SeriesDesc>> {
        let mut replies = self.per_series(ids, |sid| Command::hgetall(&self.keys.desc(sid))).await?;
        let mut out = Vec::new();
        for sid in ids {
            let fields: HashMap<String, String> = replies
                .next_reply("desc")?
                .into_pairs("HGETALL desc")?
                .into_iter()
                .collect();
            if fields.is_empty() {
                continue;
            }
            let field = |name: &str| fields.get(name).cloned().unwrap_or_default();
            out.push(SeriesDesc {
                series: *sid,
                pmid: format!("{}.{}.{}", field("domain"), field("cluster"), field("item")),
                indom: fields.get("serial").map(|serial| format!("{}.{}", field("domain"), serial)),
                semantics: field("semantics"),
                value_type: field("type"),
                units: field("units"),
            });
        }
        Ok(out)
    }

    /// Instances; singular series are omitted
    pub async fn instance(&self, ids: &[SeriesId]) -> Result<Vec<SeriesInstance>> {
        let mut replies = self
            .per_series(ids, |sid| Command::hmget(&self.keys.inst(sid), ["id", "name"]))
            .await?;
        let mut found = Vec::new();
        for sid in ids {
            let fields = replies.next_reply("instance")?.into_optional_strings("HMGET inst")?;
            if let [Some(id), Some(name)] = fields.as_slice() {
                let id = parse_id(id, "HMGET inst")?;
                let inst = u32::try_from(id).map_err(|_| StoreError::UnexpectedReply {
                    context: "HMGET inst".to_string(),
                    expected: "32-bit instance id",
                    found: id.to_string(),
                })?;
                found.push((*sid, inst, parse_id(name, "HMGET inst")?));
            }
        }
        if found.is_empty() {
            return Ok(Vec::new());
        }

        let names = self.reverse(&[MapName::InstName]).await?;
        let names = names.get(&MapName::InstName);
        Ok(found
            .into_iter()
            .map(|(series, id, name_id)| SeriesInstance {
                series,
                id,
                name: names
                    .and_then(|m| m.get(&name_id))
                    .cloned()
                    .unwrap_or_default(),
            })
            .collect())
    }

    /// Intrinsic labels of each series
    pub async fn labels(&self, ids: &[SeriesId]) -> Result<Vec<SeriesLabels>> {
        self.label_values(ids, false).await
    }

    /// Notes of each series
    pub async fn notes(&self, ids: &[SeriesId]) -> Result<Vec<SeriesLabels>> {
        self.label_values(ids, true).await
    }

    async fn label_values(&self, ids: &[SeriesId], notes: bool) -> Result<Vec<SeriesLabels>> {
        let mut replies = self
            .per_series(ids, |sid| Command::hgetall(&self.keys.values_of(notes, sid)))
            .await?;
        let mut per_series = Vec::with_capacity(ids.len());
        let mut name_ids = BTreeSet::new();
        for sid in ids {
            let mut pairs = Vec::new();
            for (name, value) in replies.next_reply("labels")?.into_pairs("HGETALL label values")? {
                let name = parse_id(&name, "HGETALL label values")?;
                name_ids.insert(name);
                pairs.push((name, parse_id(&value, "HGETALL label values")?));
            }
            per_series.push((*sid, pairs));
        }

        let names_map = MapName::names(notes);
        let mut wanted = vec![names_map.clone()];
        wanted.extend(name_ids.iter().map(|id| MapName::values(notes, *id)));
        let maps = if name_ids.is_empty() {
            HashMap::new()
        } else {
            self.reverse(&wanted).await?
        };
        let text = |map: &MapName, id: u64| maps.get(map).and_then(|m| m.get(&id)).cloned();

        Ok(per_series
            .into_iter()
            .filter(|(_, pairs)| !pairs.is_empty())
            .map(|(series, pairs)| SeriesLabels {
                series,
                labels: pairs
                    .into_iter()
                    .filter_map(|(name, value)| {
                        Some((text(&names_map, name)?, text(&MapName::values(notes, name), value)?))
                    })
                    .collect(),
            })
            .collect())
    }

    /// Metric names of each series
    pub async fn metric_names(&self, ids: &[SeriesId]) -> Result<Vec<SeriesNames>> {
        let mut replies = self
            .per_series(ids, |sid| Command::smembers(&self.keys.names_of(&MapName::MetricName, sid)))
            .await?;
        let mut per_series = Vec::with_capacity(ids.len());
        for sid in ids {
            let members = replies.next_reply("metric names")?.into_strings("SMEMBERS metric names")?;
            let ids = members
                .iter()
                .map(|m| parse_id(m, "SMEMBERS metric names"))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            per_series.push((*sid, ids));
        }
        if per_series.iter().all(|(_, ids)| ids.is_empty()) {
            return Ok(Vec::new());
        }

        let maps = self.reverse(&[MapName::MetricName]).await?;
        let names = maps.get(&MapName::MetricName);
        Ok(per_series
            .into_iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(series, ids)| {
                let mut found: Vec<String> = ids
                    .iter()
                    .filter_map(|id| names.and_then(|m| m.get(id)).cloned())
                    .collect();
                found.sort();
                SeriesNames { series, names: found }
            })
            .collect())
    }

    async fn map_fields(&self, name: MapName) -> Result<Vec<String>> {
        let mut pipeline = Pipeline::new();
        pipeline.append(Command::hkeys(&self.keys.map(&name)));
        let mut replies = self.store.execute(pipeline).await?;
        let mut fields = replies.next_reply("map keys")?.into_strings("HKEYS")?;
        fields.sort();
        Ok(fields)
    }

    /// Every label name ever loaded
    pub async fn all_labels(&self) -> Result<Vec<String>> {
        self.map_fields(MapName::LabelName).await
    }

    /// Every note name ever loaded
    pub async fn all_notes(&self) -> Result<Vec<String>> {
        self.map_fields(MapName::NoteName).await
    }

    /// Every metric name ever loaded
    pub async fn all_metrics(&self) -> Result<Vec<String>> {
        self.map_fields(MapName::MetricName).await
    }
}
