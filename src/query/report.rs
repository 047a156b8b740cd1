//! Query results
//!
//! Results serialize to the shape `pmseries` prints:
//!
//! ```json
//! {"result": "single", "series": ["605fc77742cd0317597291329561ac4e50c0dd12"]}
//! {"result": "vector", "series": [{"series": "...", "values": [{"timestamp": 1.5, "value": "1.000000e+01"}]}]}
//! ```

use crate::identity::SeriesId;
use crate::types::Timestamp;
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Cardinality class of a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// No series
    Empty,
    /// Exactly one series
    Single,
    /// More than one series
    Vector,
}

impl ResultKind {
    /// Class of a result with `n` series
    pub fn of(n: usize) -> Self {
        match n {
            0 => ResultKind::Empty,
            1 => ResultKind::Single,
            _ => ResultKind::Vector,
        }
    }

    /// Name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Empty => "empty",
            ResultKind::Single => "single",
            ResultKind::Vector => "vector",
        }
    }
}

/// One stored sample
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Sample {
    /// Sample time
    pub timestamp: Timestamp,
    /// Value text as stored
    pub value: String,
}

/// Samples of one series, newest first
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SeriesValues {
    /// Series identifier
    pub series: SeriesId,
    /// Samples in descending time order
    pub values: Vec<Sample>,
}

/// Outcome of solving a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Matching series, no time window requested
    Series(Vec<SeriesId>),
    /// Samples of matching series within the requested window
    Values(Vec<SeriesValues>),
}

impl QueryResult {
    /// Number of series in the result
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Series(ids) => ids.len(),
            QueryResult::Values(values) => values.len(),
        }
    }

    /// Whether no series matched
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cardinality class
    pub fn kind(&self) -> ResultKind {
        ResultKind::of(self.len())
    }

    /// Identifiers of the series in the result
    pub fn series_ids(&self) -> Vec<SeriesId> {
        match self {
            QueryResult::Series(ids) => ids.clone(),
            QueryResult::Values(values) => values.iter().map(|v| v.series).collect(),
        }
    }
}

impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_struct("QueryResult", 2)?;
        out.serialize_field("result", self.kind().as_str())?;
        match self {
            QueryResult::Series(ids) => out.serialize_field("series", ids)?,
            QueryResult::Values(values) => out.serialize_field("series", values)?,
        }
        out.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(n: u8) -> SeriesId {
        format!("{:040x}", n).parse().unwrap()
    }

    #[test]
    fn test_kinds() {
        assert_eq!(QueryResult::Series(vec![]).kind(), ResultKind::Empty);
        assert_eq!(QueryResult::Series(vec![id(1)]).kind(), ResultKind::Single);
        assert_eq!(QueryResult::Values(vec![]).kind(), ResultKind::Empty);
        assert_eq!(QueryResult::Series(vec![id(1), id(2)]).kind(), ResultKind::Vector);
    }

    #[test]
    fn test_series_json() {
        let result = QueryResult::Series(vec![id(1)]);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"result": "single", "series": [id(1).to_string()]})
        );
    }

    #[test]
    fn test_values_json() {
        let result = QueryResult::Values(vec![SeriesValues {
            series: id(2),
            values: vec![Sample {
                timestamp: Timestamp::from_secs_f64(1.5),
                value: "7".into(),
            }],
        }]);
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"result": "single", "series": [
                {"series": id(2).to_string(), "values": [{"timestamp": 1.5, "value": "7"}]}
            ]})
        );
        assert_eq!(result.series_ids(), vec![id(2)]);
    }
}
