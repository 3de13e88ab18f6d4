use crate::error::{Result, WireError};
use serde::{Deserialize, Serialize};

/// The closed set of metric kinds understood by the pipeline.
///
/// # Examples
///
/// ```
/// use metron_common::types::MetricType;
///
/// let kind: MetricType = "counter".parse().unwrap();
/// assert_eq!(kind, MetricType::Counter);
/// assert_eq!(kind.to_string(), "counter");
/// assert!("histogram".parse::<MetricType>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// Real-valued sample, replaced on every write.
    Gauge,
    /// Integer delta, accumulated into a running total.
    Counter,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::Gauge => write!(f, "gauge"),
            MetricType::Counter => write!(f, "counter"),
        }
    }
}

impl std::str::FromStr for MetricType {
    type Err = WireError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricType::Gauge),
            "counter" => Ok(MetricType::Counter),
            "" => Err(WireError::MissingType),
            other => Err(WireError::UnknownType(other.to_string())),
        }
    }
}

/// A metric record as it travels over the wire.
///
/// `type` is kept as a raw string so that an unknown kind surfaces as a
/// validation error (or a not-found on lookups) instead of a decode error.
/// Exactly one of `value` / `delta` is present once [`Metric::validate`]
/// has passed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub mtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricType::Gauge.to_string(),
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricType::Counter.to_string(),
            delta: Some(delta),
            value: None,
        }
    }

    /// An empty record of the given kind, to be filled through [`Metric::set`].
    pub fn empty(id: impl Into<String>, kind: MetricType) -> Self {
        Self {
            id: id.into(),
            mtype: kind.to_string(),
            delta: None,
            value: None,
        }
    }

    /// Parses the `type` field.
    pub fn kind(&self) -> Result<MetricType> {
        self.mtype.parse()
    }

    /// Checks the per-record invariant: `id` and `type` are present and
    /// exactly the payload field matching `type` is set.
    pub fn validate(&self) -> Result<MetricType> {
        if self.id.is_empty() {
            return Err(WireError::MissingId);
        }
        let kind = self.kind()?;
        match kind {
            MetricType::Gauge => {
                if self.delta.is_some() {
                    return Err(WireError::UnexpectedDelta(self.id.clone()));
                }
                if self.value.is_none() {
                    return Err(WireError::MissingValue(self.id.clone()));
                }
            }
            MetricType::Counter => {
                if self.value.is_some() {
                    return Err(WireError::UnexpectedValue(self.id.clone()));
                }
                if self.delta.is_none() {
                    return Err(WireError::MissingDelta(self.id.clone()));
                }
            }
        }
        Ok(kind)
    }

    /// Stores a sample into the payload field matching the record's kind,
    /// coercing the source number as [`NumericIn`] describes.
    pub fn set(&mut self, sample: NumericIn) -> Result<()> {
        match self.kind()? {
            MetricType::Gauge => {
                self.value = Some(sample.to_f64()?);
                self.delta = None;
            }
            MetricType::Counter => {
                self.delta = Some(sample.to_i64()?);
                self.value = None;
            }
        }
        Ok(())
    }

    /// Renders the payload as the plain-text body of `GET /value/...`.
    pub fn value_string(&self) -> Option<String> {
        match self.kind().ok()? {
            MetricType::Gauge => self.value.map(|v| v.to_string()),
            MetricType::Counter => self.delta.map(|d| d.to_string()),
        }
    }
}

/// Validates every record of a batch, failing on the first offender.
pub fn validate_batch(metrics: &[Metric]) -> Result<()> {
    for m in metrics {
        m.validate()?;
    }
    Ok(())
}

/// A sample of unknown numeric shape, as produced by the agent's extractors.
///
/// Gauges widen any number to `f64`; counters truncate floats toward zero
/// and reject values that do not fit an `i64`. Text and booleans are never
/// coerced.
///
/// # Examples
///
/// ```
/// use metron_common::types::NumericIn;
///
/// assert_eq!(NumericIn::U64(42).to_f64().unwrap(), 42.0);
/// assert_eq!(NumericIn::F64(3.9).to_i64().unwrap(), 3);
/// assert!(NumericIn::Text("7".into()).to_i64().is_err());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum NumericIn {
    F64(f64),
    F32(f32),
    I64(i64),
    I32(i32),
    U64(u64),
    U32(u32),
    Usize(usize),
    Text(String),
    Bool(bool),
}

impl NumericIn {
    pub fn to_f64(&self) -> Result<f64> {
        match self {
            NumericIn::F64(v) => Ok(*v),
            NumericIn::F32(v) => Ok(f64::from(*v)),
            NumericIn::I64(v) => Ok(*v as f64),
            NumericIn::I32(v) => Ok(f64::from(*v)),
            NumericIn::U64(v) => Ok(*v as f64),
            NumericIn::U32(v) => Ok(f64::from(*v)),
            NumericIn::Usize(v) => Ok(*v as f64),
            NumericIn::Text(s) => Err(WireError::BadGaugeValue(s.clone())),
            NumericIn::Bool(b) => Err(WireError::BadGaugeValue(b.to_string())),
        }
    }

    pub fn to_i64(&self) -> Result<i64> {
        let overflow = |v: &dyn std::fmt::Display| WireError::BadCounterValue(v.to_string());
        match self {
            NumericIn::F64(v) if v.is_finite() => Ok(v.trunc() as i64),
            NumericIn::F64(v) => Err(overflow(v)),
            NumericIn::F32(v) if v.is_finite() => Ok(v.trunc() as i64),
            NumericIn::F32(v) => Err(overflow(v)),
            NumericIn::I64(v) => Ok(*v),
            NumericIn::I32(v) => Ok(i64::from(*v)),
            NumericIn::U64(v) => i64::try_from(*v).map_err(|_| overflow(v)),
            NumericIn::U32(v) => Ok(i64::from(*v)),
            NumericIn::Usize(v) => i64::try_from(*v).map_err(|_| overflow(v)),
            NumericIn::Text(s) => Err(WireError::BadCounterValue(s.clone())),
            NumericIn::Bool(b) => Err(WireError::BadCounterValue(b.to_string())),
        }
    }
}

macro_rules! numeric_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for NumericIn {
                fn from(v: $ty) -> Self {
                    NumericIn::$variant(v)
                }
            }
        )*
    };
}

numeric_from!(
    f64 => F64,
    f32 => F32,
    i64 => I64,
    i32 => I32,
    u64 => U64,
    u32 => U32,
    usize => Usize,
    String => Text,
    bool => Bool,
);
