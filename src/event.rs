//! Measurement events as produced by probes, and the checks that turn one
//! into a [`Datum`] for the store.
//!
//! An event carries a timestamp, string labels and named metric values. The
//! store only cares about three labels/metrics:
//!
//! - label `probe`: the probe name
//! - label `dst`: the target name
//! - metrics `total`, `success` (cumulative counters) and `latency` (opaque)

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timeseries::Datum;

pub const PROBE_LABEL: &str = "probe";
pub const TARGET_LABEL: &str = "dst";
/// Probe name used for the agent's own bookkeeping events.
pub const SYSVARS_PROBE: &str = "sysvars";

// ---------------------------------------------------------------------------
// Metric values
// ---------------------------------------------------------------------------

/// Histogram-style latency value.
///
/// `lower_bounds[i]` is the inclusive lower bound of bucket `i + 1`; bucket 0
/// starts at negative infinity. `bucket_counts` therefore has one more entry
/// than `lower_bounds`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Distribution {
    pub lower_bounds: Vec<f64>,
    pub bucket_counts: Vec<i64>,
    pub sum: f64,
    pub count: i64,
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dist:sum:{}|count:{}|lb:-Inf", self.sum, self.count)?;
        for lb in &self.lower_bounds {
            write!(f, ",{lb}")?;
        }
        f.write_str("|bc:")?;
        for (i, c) in self.bucket_counts.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// A single metric value. Cloning is the duplication operation the store
/// uses to keep its own copy of the latency value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
    Str(String),
    Dist(Distribution),
}

impl MetricValue {
    /// Numeric view of the value. Floats are truncated toward zero.
    /// Strings and distributions are not numeric.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetricValue::Int(v) => Some(*v),
            MetricValue::Float(v) => Some(*v as i64),
            MetricValue::Str(_) | MetricValue::Dist(_) => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Int(v) => write!(f, "{v}"),
            MetricValue::Float(v) => write!(f, "{v:.3}"),
            MetricValue::Str(s) => write!(f, "\"{s}\""),
            MetricValue::Dist(d) => d.fmt(f),
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Str(v.to_string())
    }
}

impl From<Distribution> for MetricValue {
    fn from(d: Distribution) -> Self {
        MetricValue::Dist(d)
    }
}

// ---------------------------------------------------------------------------
// EventMetrics
// ---------------------------------------------------------------------------

/// One measurement event. Deserializes from a JSON object such as
///
/// ```json
/// {"timestamp": "2026-10-18T12:00:00Z",
///  "labels": {"probe": "http", "dst": "example.com"},
///  "metrics": {"total": 10, "success": 9, "latency": 12.5}}
/// ```
///
/// A missing `timestamp` defaults to the time the event is decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetrics {
    #[serde(default = "chrono::Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricValue>,
}

impl EventMetrics {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            labels: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn add_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn add_metric(mut self, name: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(name.into(), value.into());
        self
    }

    /// Label value, or `""` when the label is absent.
    pub fn label(&self, key: &str) -> &str {
        self.labels.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Why an event was not admitted into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The event comes from the agent's own bookkeeping probe.
    InternalProbe,
    /// The event has no `total` metric.
    MissingTotal,
    /// `total` or `success` is missing or not numeric.
    NotNumeric(&'static str),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InternalProbe => write!(f, "internal bookkeeping probe"),
            Rejection::MissingTotal => write!(f, "no 'total' metric"),
            Rejection::NotNumeric(name) => write!(f, "metric '{name}' is not numeric"),
        }
    }
}

/// A validated event: where it goes and what gets stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<'a> {
    pub probe: &'a str,
    pub target: &'a str,
    pub datum: Datum,
}

/// Check an event and extract the snapshot the store records for it.
pub fn extract_datum(em: &EventMetrics) -> Result<Sample<'_>, Rejection> {
    let probe = em.label(PROBE_LABEL);
    if probe == SYSVARS_PROBE {
        return Err(Rejection::InternalProbe);
    }
    let total = em.metric("total").ok_or(Rejection::MissingTotal)?;
    let total = total.as_i64().ok_or(Rejection::NotNumeric("total"))?;
    let success = em
        .metric("success")
        .and_then(MetricValue::as_i64)
        .ok_or(Rejection::NotNumeric("success"))?;

    Ok(Sample {
        probe,
        target: em.label(TARGET_LABEL),
        datum: Datum {
            total,
            success,
            latency: em.metric("latency").cloned(),
        },
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
