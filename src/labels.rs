//! Label sets and the label hierarchy
//!
//! Labels attach name/value metadata at every level of the metric
//! hierarchy. A series carries the merge of all levels, with more specific
//! levels overriding more general ones:
//!
//! ```text
//! context -> domain -> instance domain -> cluster -> item -> instance
//! ```
//!
//! Optional labels (notes) are stored and queryable but do not take part in
//! series identity.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// A single label value
#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    /// JSON value of the label
    pub value: JsonValue,
    /// Optional labels are notes and excluded from identity
    pub optional: bool,
}

/// A set of labels keyed by name, kept in name order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelSet {
    labels: BTreeMap<String, Label>,
}

impl LabelSet {
    /// Create an empty label set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of an intrinsic label
    pub fn with(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Builder-style insert of a note
    pub fn with_note(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert_note(name, value);
        self
    }

    /// Insert or replace an intrinsic label
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<JsonValue>) {
        self.labels.insert(
            name.into(),
            Label {
                value: value.into(),
                optional: false,
            },
        );
    }

    /// Insert or replace a note
    pub fn insert_note(&mut self, name: impl Into<String>, value: impl Into<JsonValue>) {
        self.labels.insert(
            name.into(),
            Label {
                value: value.into(),
                optional: true,
            },
        );
    }

    /// Look up a label by name
    pub fn get(&self, name: &str) -> Option<&Label> {
        self.labels.get(name)
    }

    /// Number of labels, notes included
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the set holds no labels at all
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Overlay another set; its entries win on name collisions
    pub fn merge(&mut self, other: &LabelSet) {
        for (name, label) in &other.labels {
            self.labels.insert(name.clone(), label.clone());
        }
    }

    /// Intrinsic labels in name order
    pub fn intrinsic(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.labels
            .iter()
            .filter(|(_, l)| !l.optional)
            .map(|(n, l)| (n.as_str(), &l.value))
    }

    /// Notes in name order
    pub fn notes(&self) -> impl Iterator<Item = (&str, &JsonValue)> {
        self.labels
            .iter()
            .filter(|(_, l)| l.optional)
            .map(|(n, l)| (n.as_str(), &l.value))
    }

    /// Canonical JSON of the intrinsic labels: keys sorted, no whitespace
    pub fn canonical_json(&self) -> String {
        let mut out = String::from("{");
        for (i, (name, value)) in self.intrinsic().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&quote(name));
            out.push(':');
            out.push_str(&canonical_value(value));
        }
        out.push('}');
        out
    }
}

impl FromIterator<(String, JsonValue)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        let mut set = LabelSet::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

/// Render a label value as it appears in the value map
///
/// Strings map to their bare text so that `label == "x"` matches a label
/// whose JSON value is `"x"`; other values keep their JSON rendering.
pub fn value_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => canonical_value(other),
    }
}

fn quote(s: &str) -> String {
    JsonValue::String(s.to_string()).to_string()
}

/// JSON rendering with object keys sorted at every depth
fn canonical_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Object(map) => {
            let sorted: BTreeMap<&String, &JsonValue> = map.iter().collect();
            let body: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", quote(k), canonical_value(v)))
                .collect();
            format!("{{{}}}", body.join(","))
        },
        JsonValue::Array(items) => {
            let body: Vec<String> = items.iter().map(canonical_value).collect();
            format!("[{}]", body.join(","))
        },
        other => other.to_string(),
    }
}

/// The six label levels that apply to one series
#[derive(Debug, Clone, Default)]
pub struct LabelHierarchy {
    /// Labels of the whole source
    pub context: LabelSet,
    /// Labels of the agent domain
    pub domain: LabelSet,
    /// Labels of the instance domain
    pub indom: LabelSet,
    /// Labels of the metric cluster
    pub cluster: LabelSet,
    /// Labels of the metric itself
    pub item: LabelSet,
    /// Labels of the instance
    pub instance: LabelSet,
}

impl LabelHierarchy {
    /// Merge all levels, most specific last
    pub fn merged(&self) -> LabelSet {
        let mut out = self.context.clone();
        for level in [
            &self.domain,
            &self.indom,
            &self.cluster,
            &self.item,
            &self.instance,
        ] {
            out.merge(level);
        }
        out
    }
}
