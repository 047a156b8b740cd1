//! Core data model: metric identifiers, descriptors, timestamps and values

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric metric identifier (PMID) split into its three components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricId {
    /// Agent (collector) domain
    pub domain: u32,
    /// Cluster within the domain
    pub cluster: u32,
    /// Item within the cluster
    pub item: u32,
}

impl MetricId {
    /// Create a metric identifier
    pub fn new(domain: u32, cluster: u32, item: u32) -> Self {
        Self {
            domain,
            cluster,
            item,
        }
    }

    /// Identifier of the cluster this metric belongs to
    pub fn cluster_id(&self) -> (u32, u32) {
        (self.domain, self.cluster)
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.domain, self.cluster, self.item)
    }
}

/// Instance domain identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InDomId {
    /// Agent domain
    pub domain: u32,
    /// Serial number within the domain
    pub serial: u32,
}

impl InDomId {
    /// Create an instance domain identifier
    pub fn new(domain: u32, serial: u32) -> Self {
        Self { domain, serial }
    }
}

impl fmt::Display for InDomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.serial)
    }
}

/// Metric semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Semantics {
    /// Monotonically increasing counter, stored as a rate
    Counter,
    /// Instantaneous value
    Instant,
    /// Value that changes rarely
    Discrete,
}

impl Semantics {
    /// Numeric code used in series identity
    pub fn code(&self) -> u32 {
        match self {
            Semantics::Counter => 1,
            Semantics::Instant => 3,
            Semantics::Discrete => 4,
        }
    }

    /// Lowercase name persisted in descriptor hashes
    pub fn as_str(&self) -> &'static str {
        match self {
            Semantics::Counter => "counter",
            Semantics::Instant => "instant",
            Semantics::Discrete => "discrete",
        }
    }
}

impl fmt::Display for Semantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage type of a metric's values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Signed 32-bit integer
    #[serde(rename = "32")]
    I32,
    /// Unsigned 32-bit integer
    #[serde(rename = "u32")]
    U32,
    /// Signed 64-bit integer
    #[serde(rename = "64")]
    I64,
    /// Unsigned 64-bit integer
    #[serde(rename = "u64")]
    U64,
    /// Single precision float
    #[serde(rename = "float")]
    Float,
    /// Double precision float
    #[serde(rename = "double")]
    Double,
    /// Character string
    #[serde(rename = "string")]
    String,
    /// Opaque binary blob
    #[serde(rename = "aggregate")]
    Aggregate,
    /// Event record array
    #[serde(rename = "event")]
    Event,
    /// High resolution event record array
    #[serde(rename = "highres-event")]
    HighResEvent,
}

impl ValueType {
    /// Numeric code used in series identity
    pub fn code(&self) -> u32 {
        match self {
            ValueType::I32 => 0,
            ValueType::U32 => 1,
            ValueType::I64 => 2,
            ValueType::U64 => 3,
            ValueType::Float => 4,
            ValueType::Double => 5,
            ValueType::String => 6,
            ValueType::Aggregate => 7,
            ValueType::Event => 8,
            ValueType::HighResEvent => 9,
        }
    }

    /// Name persisted in descriptor hashes
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::I32 => "32",
            ValueType::U32 => "u32",
            ValueType::I64 => "64",
            ValueType::U64 => "u64",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Aggregate => "aggregate",
            ValueType::Event => "event",
            ValueType::HighResEvent => "highres-event",
        }
    }

    /// Only numeric types can be loaded
    pub fn is_numeric(&self) -> bool {
        self.code() <= ValueType::Double.code()
    }

    /// Width in bits of an integer type, used for counter wrap correction
    pub fn integer_width(&self) -> Option<u32> {
        match self {
            ValueType::I32 | ValueType::U32 => Some(32),
            ValueType::I64 | ValueType::U64 => Some(64),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time scale codes, nanoseconds through hours
pub mod time_scale {
    /// Nanoseconds
    pub const NSEC: u8 = 0;
    /// Microseconds
    pub const USEC: u8 = 1;
    /// Milliseconds
    pub const MSEC: u8 = 2;
    /// Seconds
    pub const SEC: u8 = 3;
    /// Minutes
    pub const MIN: u8 = 4;
    /// Hours
    pub const HOUR: u8 = 5;
}

/// Dimensional units of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Units {
    /// Space dimension
    pub dim_space: i8,
    /// Time dimension
    pub dim_time: i8,
    /// Count dimension
    pub dim_count: i8,
    /// Space scale (bytes through exabytes)
    pub scale_space: u8,
    /// Time scale, see [`time_scale`]
    pub scale_time: u8,
    /// Count scale as a power of ten
    pub scale_count: i8,
}

impl Units {
    /// Dimensionless count, e.g. a packet counter
    pub fn count() -> Self {
        Self {
            dim_count: 1,
            ..Default::default()
        }
    }

    /// Time in the given scale, e.g. milliseconds of CPU time
    pub fn time(scale_time: u8) -> Self {
        Self {
            dim_time: 1,
            scale_time,
            ..Default::default()
        }
    }

    /// Bytes in the given scale
    pub fn space(scale_space: u8) -> Self {
        Self {
            dim_space: 1,
            scale_space,
            ..Default::default()
        }
    }

    /// The 32-bit packed form used in series identity
    ///
    /// Layout from the high nibble down: dim space, dim time, dim count,
    /// scale space, scale time, scale count, with the low byte reserved.
    pub fn packed(&self) -> u32 {
        let nibble = |v: i32| (v as u32) & 0xf;
        (nibble(self.dim_space as i32) << 28)
            | (nibble(self.dim_time as i32) << 24)
            | (nibble(self.dim_count as i32) << 20)
            | (nibble(self.scale_space as i32) << 16)
            | (nibble(self.scale_time as i32) << 12)
            | (nibble(self.scale_count as i32) << 8)
    }

    /// Multiplier turning an elapsed interval in seconds into the metric's time scale
    ///
    /// Metrics without a time dimension use seconds.
    pub fn rate_scale(&self) -> f64 {
        if self.dim_time == 0 {
            return 1.0;
        }
        let exponent = time_scale::SEC as i32 - self.scale_time as i32;
        if self.scale_time > time_scale::SEC {
            60f64.powi(exponent)
        } else {
            1000f64.powi(exponent)
        }
    }

    /// Units of the rate stored for a counter: one less power of time
    pub fn as_rate(&self) -> Units {
        let mut units = *self;
        units.dim_time -= 1;
        if units.dim_time == 0 {
            units.scale_time = 0;
        } else if self.dim_time == 0 {
            units.scale_time = time_scale::SEC;
        }
        units
    }
}

fn dimension(out: &mut Vec<String>, name: &str, dim: i8) {
    match dim {
        0 => {},
        1 => out.push(name.to_string()),
        d => out.push(format!("{}^{}", name, d)),
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SPACE: [&str; 7] = ["byte", "Kbyte", "Mbyte", "Gbyte", "Tbyte", "Pbyte", "Ebyte"];
        const TIME: [&str; 6] = ["nanosec", "microsec", "millisec", "sec", "min", "hour"];

        let mut numerator = Vec::new();
        let mut denominator = Vec::new();
        let space = SPACE.get(self.scale_space as usize).copied().unwrap_or("byte");
        let time = TIME.get(self.scale_time as usize).copied().unwrap_or("sec");
        let count = if self.scale_count == 0 {
            "count".to_string()
        } else {
            format!("count x 10^{}", self.scale_count)
        };

        for (name, dim) in [
            (space.to_string(), self.dim_space),
            (time.to_string(), self.dim_time),
            (count, self.dim_count),
        ] {
            if dim > 0 {
                dimension(&mut numerator, &name, dim);
            } else if dim < 0 {
                dimension(&mut denominator, &name, -dim);
            }
        }

        match (numerator.is_empty(), denominator.is_empty()) {
            (true, true) => f.write_str("none"),
            (false, true) => f.write_str(&numerator.join(" ")),
            (true, false) => write!(f, "/ {}", denominator.join(" ")),
            (false, false) => write!(f, "{} / {}", numerator.join(" "), denominator.join(" ")),
        }
    }
}

/// Immutable metric descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Numeric metric identifier
    pub pmid: MetricId,
    /// Value storage type
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Instance domain, absent for singular metrics
    #[serde(default)]
    pub indom: Option<InDomId>,
    /// Counter, instant or discrete
    pub semantics: Semantics,
    /// Dimensional units
    #[serde(default)]
    pub units: Units,
}

/// Point in time with microsecond resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    /// Create from whole microseconds since the epoch
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Create from fractional seconds since the epoch
    pub fn from_secs_f64(secs: f64) -> Self {
        Self {
            micros: (secs * 1_000_000.0).round() as i64,
        }
    }

    /// Microseconds since the epoch
    pub fn micros(&self) -> i64 {
        self.micros
    }

    /// Fractional seconds since the epoch
    pub fn as_secs_f64(&self) -> f64 {
        self.micros as f64 / 1_000_000.0
    }

    /// Seconds elapsed since an earlier timestamp
    pub fn seconds_since(&self, earlier: Timestamp) -> f64 {
        (self.micros - earlier.micros) as f64 / 1_000_000.0
    }
}

impl From<f64> for Timestamp {
    fn from(secs: f64) -> Self {
        Timestamp::from_secs_f64(secs)
    }
}

impl From<Timestamp> for f64 {
    fn from(ts: Timestamp) -> Self {
        ts.as_secs_f64()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp::from_micros(dt.timestamp_micros())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.micros.div_euclid(1_000_000);
        let usecs = self.micros.rem_euclid(1_000_000);
        write!(f, "{}.{:06}", secs, usecs)
    }
}

impl FromStr for Timestamp {
    type Err = String;

    /// Accepts fractional epoch seconds or an RFC 3339 date
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(secs) = s.parse::<f64>() {
            if secs.is_finite() {
                return Ok(Timestamp::from_secs_f64(secs));
            }
        }
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Timestamp::from(dt.with_timezone(&Utc)))
            .map_err(|e| format!("invalid time '{}': {}", s, e))
    }
}

/// Default number of samples returned per series by a windowed query
pub const DEFAULT_VALUE_COUNT: usize = 10;

/// Time bounds and pagination for loading or querying values
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive lower bound, unbounded when absent
    pub start: Option<Timestamp>,
    /// Inclusive upper bound, unbounded when absent
    pub end: Option<Timestamp>,
    /// Number of newest samples to skip per series
    pub offset: usize,
    /// Maximum number of samples per series
    pub count: usize,
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self {
            start: None,
            end: None,
            offset: 0,
            count: DEFAULT_VALUE_COUNT,
        }
    }
}

impl TimeWindow {
    /// Window bounded on both sides
    pub fn between(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Default::default()
        }
    }

    /// Whether a sample time falls past the end of the window
    pub fn is_past_end(&self, ts: Timestamp) -> bool {
        self.end.map_or(false, |end| ts > end)
    }

    /// Whether a sample time falls before the start of the window
    pub fn is_before_start(&self, ts: Timestamp) -> bool {
        self.start.map_or(false, |start| ts < start)
    }
}

/// A typed sample value
#[derive(Debug, Clone, PartialEq)]
pub enum AtomValue {
    /// Signed 32-bit integer
    I32(i32),
    /// Unsigned 32-bit integer
    U32(u32),
    /// Signed 64-bit integer
    I64(i64),
    /// Unsigned 64-bit integer
    U64(u64),
    /// Single precision float
    Float(f32),
    /// Double precision float
    Double(f64),
    /// Character string
    String(String),
}

impl AtomValue {
    /// Numeric value as a double, `None` for strings
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AtomValue::I32(v) => Some(*v as f64),
            AtomValue::U32(v) => Some(*v as f64),
            AtomValue::I64(v) => Some(*v as f64),
            AtomValue::U64(v) => Some(*v as f64),
            AtomValue::Float(v) => Some(*v as f64),
            AtomValue::Double(v) => Some(*v),
            AtomValue::String(_) => None,
        }
    }

    /// Convert a loosely typed JSON number into the descriptor's type
    pub fn from_json(value: &serde_json::Value, value_type: ValueType) -> Result<Self, String> {
        let mismatch = || format!("value {} is not representable as {}", value, value_type);
        match value_type {
            ValueType::I32 => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(AtomValue::I32)
                .ok_or_else(mismatch),
            ValueType::U32 => value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(AtomValue::U32)
                .ok_or_else(mismatch),
            ValueType::I64 => value.as_i64().map(AtomValue::I64).ok_or_else(mismatch),
            ValueType::U64 => value.as_u64().map(AtomValue::U64).ok_or_else(mismatch),
            ValueType::Float => value
                .as_f64()
                .map(|v| AtomValue::Float(v as f32))
                .ok_or_else(mismatch),
            ValueType::Double => value.as_f64().map(AtomValue::Double).ok_or_else(mismatch),
            ValueType::String => value
                .as_str()
                .map(|s| AtomValue::String(s.to_string()))
                .ok_or_else(mismatch),
            other => Err(format!("type {} cannot be extracted", other)),
        }
    }
}

impl fmt::Display for AtomValue {
    /// Integers print as integers, floating point in exponent notation
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtomValue::I32(v) => write!(f, "{}", v),
            AtomValue::U32(v) => write!(f, "{}", v),
            AtomValue::I64(v) => write!(f, "{}", v),
            AtomValue::U64(v) => write!(f, "{}", v),
            AtomValue::Float(v) => f.write_str(&format_exponent(*v as f64)),
            AtomValue::Double(v) => f.write_str(&format_exponent(*v)),
            AtomValue::String(s) => f.write_str(s),
        }
    }
}

/// Format a double as `d.dddddde+XX`
pub fn format_exponent(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let rendered = format!("{:.6e}", value);
    match rendered.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(rest) => ('-', rest),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        },
        None => rendered,
    }
}
