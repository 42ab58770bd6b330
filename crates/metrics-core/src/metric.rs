// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric value types shared by the agent and the server.
//!
//! A [`Metric`] is either a gauge (last write wins) or a counter (deltas are
//! summed). The wire format keeps the payload in one of two optional fields:
//!
//! ```text
//! {"id":"Alloc","type":"gauge","value":128.0}
//! {"id":"PollCount","type":"counter","delta":1}
//! ```
//!
//! Decoding goes through [`WireMetric`] so that a record with an unknown type,
//! an empty id, or a missing payload field never becomes a `Metric`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const GAUGE: &str = "gauge";
pub const COUNTER: &str = "counter";

/// Ordered group of metrics shipped and stored together.
pub type Batch = Vec<Metric>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

impl MetricKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => GAUGE,
            MetricKind::Counter => COUNTER,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetricError {
    #[error("unknown metric type: {0}")]
    UnknownKind(String),
    #[error("metric id is empty")]
    EmptyId,
    #[error("{kind} metric {id} has no {field}")]
    MissingPayload {
        id: String,
        kind: MetricKind,
        field: &'static str,
    },
    #[error("invalid {kind} value: {value}")]
    InvalidValue { kind: MetricKind, value: String },
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            GAUGE => Ok(MetricKind::Gauge),
            COUNTER => Ok(MetricKind::Counter),
            other => Err(MetricError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    #[must_use]
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parses a raw path segment according to `kind`.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, MetricError> {
        let invalid = || MetricError::InvalidValue {
            kind,
            value: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(MetricValue::Gauge)
                .ok_or_else(invalid),
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|_| invalid()),
        }
    }
}

/// Plain-text rendering used by the read endpoints: the shortest decimal that
/// round-trips for gauges, a bare integer for counters.
impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMetric", into = "WireMetric")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    #[must_use]
    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMetric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl TryFrom<WireMetric> for Metric {
    type Error = MetricError;

    fn try_from(wire: WireMetric) -> Result<Self, Self::Error> {
        if wire.id.is_empty() {
            return Err(MetricError::EmptyId);
        }
        let kind = wire.kind.parse::<MetricKind>()?;
        let value = match kind {
            MetricKind::Gauge => wire.value.map(MetricValue::Gauge).ok_or_else(|| {
                MetricError::MissingPayload {
                    id: wire.id.clone(),
                    kind,
                    field: "value",
                }
            })?,
            MetricKind::Counter => wire.delta.map(MetricValue::Counter).ok_or_else(|| {
                MetricError::MissingPayload {
                    id: wire.id.clone(),
                    kind,
                    field: "delta",
                }
            })?,
        };
        Ok(Metric { id: wire.id, value })
    }
}

impl From<Metric> for WireMetric {
    fn from(metric: Metric) -> Self {
        let kind = metric.kind().as_str().to_string();
        match metric.value {
            MetricValue::Gauge(v) => WireMetric {
                id: metric.id,
                kind,
                delta: None,
                value: Some(v),
            },
            MetricValue::Counter(d) => WireMetric {
                id: metric.id,
                kind,
                delta: Some(d),
                value: None,
            },
        }
    }
}

/// Body of a JSON point lookup: names a metric without carrying a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_wire_format() {
        let json = serde_json::to_string(&Metric::gauge("Alloc", 128.0)).unwrap();
        assert_eq!(json, r#"{"id":"Alloc","type":"gauge","value":128.0}"#);
    }

    #[test]
    fn test_counter_wire_format() {
        let json = serde_json::to_string(&Metric::counter("PollCount", 1)).unwrap();
        assert_eq!(json, r#"{"id":"PollCount","type":"counter","delta":1}"#);
    }

    #[test]
    fn test_decode_batch() {
        let batch: Batch = serde_json::from_str(
            r#"[{"id":"Alloc","type":"gauge","value":128},{"id":"PollCount","type":"counter","delta":1}]"#,
        )
        .unwrap();
        assert_eq!(
            batch,
            vec![Metric::gauge("Alloc", 128.0), Metric::counter("PollCount", 1)]
        );
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = serde_json::from_str::<Metric>(r#"{"id":"x","type":"histogram","value":1}"#)
            .unwrap_err();
        assert!(err.to_string().contains("unknown metric type"));
    }

    #[test]
    fn test_decode_rejects_missing_payload() {
        assert!(serde_json::from_str::<Metric>(r#"{"id":"x","type":"gauge","delta":1}"#).is_err());
        assert!(serde_json::from_str::<Metric>(r#"{"id":"x","type":"counter"}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_empty_id() {
        assert!(serde_json::from_str::<Metric>(r#"{"id":"","type":"gauge","value":1}"#).is_err());
    }

    #[test]
    fn test_decode_ignores_foreign_payload_field() {
        let metric: Metric =
            serde_json::from_str(r#"{"id":"x","type":"counter","delta":5,"value":2.5}"#).unwrap();
        assert_eq!(metric, Metric::counter("x", 5));
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(
            MetricValue::parse(MetricKind::Gauge, "12.5").unwrap(),
            MetricValue::Gauge(12.5)
        );
        assert_eq!(
            MetricValue::parse(MetricKind::Counter, "-3").unwrap(),
            MetricValue::Counter(-3)
        );
        assert!(MetricValue::parse(MetricKind::Counter, "1.5").is_err());
        assert!(MetricValue::parse(MetricKind::Gauge, "abc").is_err());
        assert!(MetricValue::parse(MetricKind::Gauge, "NaN").is_err());
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("gauge".parse::<MetricKind>().unwrap(), MetricKind::Gauge);
        assert_eq!("counter".parse::<MetricKind>().unwrap(), MetricKind::Counter);
        assert_eq!(
            "Gauge".parse::<MetricKind>(),
            Err(MetricError::UnknownKind("Gauge".to_string()))
        );
    }

    #[test]
    fn test_value_display() {
        assert_eq!(MetricValue::Gauge(128.0).to_string(), "128");
        assert_eq!(MetricValue::Gauge(0.25).to_string(), "0.25");
        assert_eq!(MetricValue::Counter(2).to_string(), "2");
    }

    #[test]
    fn test_query_decode() {
        let query: MetricQuery = serde_json::from_str(r#"{"id":"Alloc","type":"gauge"}"#).unwrap();
        assert_eq!(query.kind, MetricKind::Gauge);
        assert!(serde_json::from_str::<MetricQuery>(r#"{"id":"Alloc","type":"set"}"#).is_err());
    }
}
