//! Per-metric and per-series running state
//!
//! A [`Value`] tracks one (metric, instance) series across a load run:
//! whether its metadata has been written, whether a mark record has been
//! seen since the last sample, and the last raw sample used for rate
//! conversion of counters.

use crate::identity::SeriesId;
use crate::labels::LabelSet;
use crate::source::Instance;
use crate::types::{format_exponent, AtomValue, Descriptor, Semantics, Timestamp};
use std::collections::HashMap;

/// Lifecycle of a series within one load run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueState {
    /// Identity computed, metadata not yet written
    Discovered,
    /// Metadata written, no sample folded in yet
    MetadataCached,
    /// Receiving regular samples
    Active,
    /// A discontinuity was seen; the next sample starts a new baseline
    Marked,
}

/// Outcome of folding one sample into a series
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// Store this value text for the sample
    Emit(String),
    /// Sample became the new baseline, nothing to store
    Baseline,
    /// Zero elapsed interval, sample ignored entirely
    Skipped,
}

/// One (metric, instance) series
#[derive(Debug, Clone)]
pub struct Value {
    /// Content-addressed series identifier
    pub sid: SeriesId,
    /// Instance, absent for singular metrics
    pub instance: Option<Instance>,
    /// Merged labels of the series (notes included)
    pub labels: LabelSet,
    /// Metadata already persisted
    pub cached: bool,
    /// Mark record seen since the last sample
    pub marked: bool,
    /// Samples stored; counter baselines and resets are not counted
    pub count: u64,
    /// First sample time
    pub first_seen: Option<Timestamp>,
    /// Time of the rate baseline
    pub last_seen: Option<Timestamp>,
    /// Raw value of the rate baseline
    pub last_raw: Option<f64>,
}

impl Value {
    /// A freshly discovered series
    pub fn new(sid: SeriesId, instance: Option<Instance>, labels: LabelSet) -> Self {
        Self {
            sid,
            instance,
            labels,
            cached: false,
            marked: false,
            count: 0,
            first_seen: None,
            last_seen: None,
            last_raw: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ValueState {
        if !self.cached {
            ValueState::Discovered
        } else if self.marked {
            ValueState::Marked
        } else if self.last_seen.is_none() {
            ValueState::MetadataCached
        } else {
            ValueState::Active
        }
    }

    /// Apply a mark record at `ts`
    ///
    /// Discrete metrics have their last-seen time moved up to the mark so
    /// the gap is not charged to the following interval.
    pub fn mark(&mut self, ts: Timestamp, semantics: Semantics) {
        self.marked = true;
        if semantics == Semantics::Discrete && self.last_seen.is_some() {
            self.last_seen = Some(ts);
        }
    }

    /// Fold one sample into the series
    pub fn observe(&mut self, ts: Timestamp, sample: &AtomValue, desc: &Descriptor, counter_wrap: bool) -> Observation {
        if desc.semantics != Semantics::Counter {
            self.advance(ts, sample.as_f64());
            self.count += 1;
            return Observation::Emit(sample.to_string());
        }

        let Some(raw) = sample.as_f64() else {
            return Observation::Skipped;
        };
        let (Some(last), Some(last_seen)) = (self.last_raw, self.last_seen) else {
            self.advance(ts, Some(raw));
            return Observation::Baseline;
        };

        let diff = ts.seconds_since(last_seen) * desc.units.rate_scale();
        if diff == 0.0 {
            return Observation::Skipped;
        }

        let current = if self.marked {
            raw
        } else {
            unwrap_counter(raw, last, desc.value_type.integer_width(), counter_wrap)
        };
        let outcome = if self.marked || current < last {
            Observation::Baseline
        } else {
            self.count += 1;
            Observation::Emit(format_exponent((current - last) / diff))
        };
        self.advance(ts, Some(raw));
        outcome
    }

    fn advance(&mut self, ts: Timestamp, raw: Option<f64>) {
        self.marked = false;
        self.first_seen.get_or_insert(ts);
        self.last_seen = Some(ts);
        self.last_raw = raw;
    }
}

/// Correct a counter that went backwards by one wrap of its integer width
///
/// Correction only applies when enabled; a reset looks exactly like a wrap.
pub fn unwrap_counter(raw: f64, last: f64, width: Option<u32>, enabled: bool) -> f64 {
    if !enabled || raw >= last {
        return raw;
    }
    match width {
        Some(32) => raw + 4_294_967_296.0,
        Some(64) => raw + 18_446_744_073_709_551_616.0,
        _ => raw,
    }
}

/// A metric resolved from the source, with its series
#[derive(Debug, Clone)]
pub struct Metric {
    /// Descriptor
    pub desc: Descriptor,
    /// All names, aliases included
    pub names: Vec<String>,
    /// Merged labels of every level above the instance
    pub labels: LabelSet,
    /// Known instances by id, with their labels
    pub instances: HashMap<u32, (String, LabelSet)>,
    /// Series by instance id (`None` for singular metrics)
    pub values: HashMap<Option<u32>, Value>,
}

impl Metric {
    /// Metric with no series yet
    pub fn new(desc: Descriptor, names: Vec<String>, labels: LabelSet) -> Self {
        Self {
            desc,
            names,
            labels,
            instances: HashMap::new(),
            values: HashMap::new(),
        }
    }

    /// Mark every series of this metric
    pub fn mark(&mut self, ts: Timestamp) {
        let semantics = self.desc.semantics;
        for value in self.values.values_mut() {
            value.mark(ts, semantics);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{time_scale, MetricId, Units, ValueType};

    fn desc(semantics: Semantics, value_type: ValueType, units: Units) -> Descriptor {
        Descriptor {
            pmid: MetricId::new(1, 0, 0),
            value_type,
            indom: None,
            semantics,
            units,
        }
    }

    fn value() -> Value {
        let sid: SeriesId = "0123456789abcdef0123456789abcdef01234567".parse().unwrap();
        Value::new(sid, None, LabelSet::new())
    }

    fn t(secs: f64) -> Timestamp {
        Timestamp::from_secs_f64(secs)
    }

    #[test]
    fn test_counter_rate() {
        let d = desc(Semantics::Counter, ValueType::U64, Units::count());
        let mut v = value();
        assert_eq!(v.observe(t(1.0), &AtomValue::U64(10), &d, false), Observation::Baseline);
        assert_eq!(
            v.observe(t(2.0), &AtomValue::U64(20), &d, false),
            Observation::Emit("1.000000e+01".into())
        );
        assert_eq!(
            v.observe(t(4.0), &AtomValue::U64(30), &d, false),
            Observation::Emit("5.000000e+00".into())
        );
        assert_eq!(v.count, 2);
        assert_eq!(v.first_seen, Some(t(1.0)));
    }

    #[test]
    fn test_counter_time_scale() {
        // Milliseconds of CPU per second of wall time
        let d = desc(Semantics::Counter, ValueType::U64, Units::time(time_scale::MSEC));
        let mut v = value();
        v.observe(t(0.0), &AtomValue::U64(0), &d, false);
        assert_eq!(
            v.observe(t(2.0), &AtomValue::U64(1000), &d, false),
            Observation::Emit("5.000000e-01".into())
        );
    }

    #[test]
    fn test_zero_interval_skipped() {
        let d = desc(Semantics::Counter, ValueType::U32, Units::count());
        let mut v = value();
        v.observe(t(5.0), &AtomValue::U32(1), &d, false);
        assert_eq!(v.observe(t(5.0), &AtomValue::U32(9), &d, false), Observation::Skipped);
        assert_eq!(v.last_raw, Some(1.0));
    }

    #[test]
    fn test_counter_wrap_enabled() {
        let d = desc(Semantics::Counter, ValueType::U32, Units::count());
        let mut v = value();
        v.observe(t(1.0), &AtomValue::U32(100), &d, true);
        let expected = (4_294_967_296.0 - 100.0) + 50.0;
        assert_eq!(
            v.observe(t(2.0), &AtomValue::U32(50), &d, true),
            Observation::Emit(format_exponent(expected))
        );
    }

    #[test]
    fn test_counter_reset_without_wrap() {
        let d = desc(Semantics::Counter, ValueType::U32, Units::count());
        let mut v = value();
        v.observe(t(1.0), &AtomValue::U32(100), &d, false);
        assert_eq!(v.observe(t(2.0), &AtomValue::U32(50), &d, false), Observation::Baseline);
        assert_eq!(v.count, 0);
        // The reset sample is the new baseline
        assert_eq!(
            v.observe(t(3.0), &AtomValue::U32(60), &d, false),
            Observation::Emit("1.000000e+01".into())
        );
        assert_eq!(v.count, 1);
    }

    #[test]
    fn test_mark_suppresses_rate() {
        let d = desc(Semantics::Counter, ValueType::U64, Units::count());
        let mut v = value();
        v.cached = true;
        v.observe(t(1.0), &AtomValue::U64(10), &d, true);
        v.mark(t(2.0), d.semantics);
        assert_eq!(v.state(), ValueState::Marked);
        assert_eq!(v.observe(t(10.0), &AtomValue::U64(500), &d, true), Observation::Baseline);
        assert_eq!(v.state(), ValueState::Active);
        assert_eq!(
            v.observe(t(11.0), &AtomValue::U64(510), &d, true),
            Observation::Emit("1.000000e+01".into())
        );
    }

    #[test]
    fn test_instant_values_stored_raw() {
        let d = desc(Semantics::Instant, ValueType::Double, Units::default());
        let mut v = value();
        assert_eq!(
            v.observe(t(1.0), &AtomValue::Double(0.25), &d, false),
            Observation::Emit("2.500000e-01".into())
        );
        v.mark(t(2.0), d.semantics);
        assert_eq!(
            v.observe(t(3.0), &AtomValue::Double(1.0), &d, false),
            Observation::Emit("1.000000e+00".into())
        );
        assert!(!v.marked);
    }

    #[test]
    fn test_discrete_mark_extends_last_seen() {
        let mut v = value();
        v.mark(t(5.0), Semantics::Discrete);
        assert_eq!(v.last_seen, None);

        let d = desc(Semantics::Discrete, ValueType::I32, Units::default());
        v.observe(t(1.0), &AtomValue::I32(3), &d, false);
        v.mark(t(5.0), Semantics::Discrete);
        assert_eq!(v.last_seen, Some(t(5.0)));
        v.mark(t(6.0), Semantics::Instant);
        assert_eq!(v.last_seen, Some(t(5.0)));
    }

    #[test]
    fn test_state_progression() {
        let d = desc(Semantics::Instant, ValueType::I32, Units::default());
        let mut v = value();
        assert_eq!(v.state(), ValueState::Discovered);
        v.cached = true;
        assert_eq!(v.state(), ValueState::MetadataCached);
        v.observe(t(1.0), &AtomValue::I32(1), &d, false);
        assert_eq!(v.state(), ValueState::Active);
    }

    #[test]
    fn test_unwrap_counter_widths() {
        assert_eq!(unwrap_counter(5.0, 10.0, Some(64), true), 5.0 + 18_446_744_073_709_551_616.0);
        assert_eq!(unwrap_counter(5.0, 10.0, None, true), 5.0);
        assert_eq!(unwrap_counter(15.0, 10.0, Some(32), true), 15.0);
        assert_eq!(unwrap_counter(5.0, 10.0, Some(32), false), 5.0);
    }
}
