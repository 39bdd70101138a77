// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Time-series store seam
//!
//! The core only needs three operations from its store: write a point, get
//! the latest value of some fields, and get a (possibly aggregated) range of
//! records. [`TimeSeriesStore`] captures exactly that; query languages stay
//! inside the implementations.
//!
//! - [`MemoryStore`]: process-local store, used by tests and the `memory` store kind
//! - [`InfluxStore`]: InfluxDB 2.x over HTTP

pub mod influx;
pub mod memory;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::TelemetryResult;

pub use influx::InfluxStore;
pub use memory::MemoryStore;

/// Measurement receiving decoded register values
pub const METRICS_MEASUREMENT: &str = "generator_metrics";
/// Measurement receiving active controller events
pub const EVENTS_MEASUREMENT: &str = "generator_events";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl FieldValue {
    /// Numeric view of the field; booleans count as 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(v) => Some(*v),
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            FieldValue::Text(s) => s.parse().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            FieldValue::Int(v) => Some(*v != 0),
            FieldValue::Text(s) => s.parse().ok(),
            FieldValue::Float(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

/// One point to write.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// One row returned by a query: fields sharing a timestamp and tag set.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn f64(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(FieldValue::as_f64)
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(FieldValue::as_str)
    }
}

/// Selection of series over a time range.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesQuery {
    pub measurement: String,
    /// Requested fields; empty means every field
    pub fields: Vec<String>,
    /// Only series carrying all these tags
    pub tags: BTreeMap<String, String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Mean-aggregate values into windows of this size
    pub aggregate: Option<Duration>,
}

impl SeriesQuery {
    pub fn new(measurement: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            fields: Vec::new(),
            tags: BTreeMap::new(),
            start,
            end,
            aggregate: None,
        }
    }

    /// Everything written to `measurement` during the last `window`.
    pub fn latest(measurement: impl Into<String>, window: chrono::Duration) -> Self {
        let end = Utc::now();
        Self::new(measurement, end - window, end)
    }

    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn aggregate(mut self, window: Duration) -> Self {
        self.aggregate = Some(window);
        self
    }

    pub fn wants_field(&self, field: &str) -> bool {
        self.fields.is_empty() || self.fields.iter().any(|f| f == field)
    }
}

#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Write one point; failures are reported, never retried.
    async fn write_point(&self, point: &Point) -> TelemetryResult<()>;

    /// Latest value of each requested field within the query range, merged
    /// into one record stamped with the most recent timestamp. `None` when
    /// no requested field has a value.
    async fn query_latest(&self, query: &SeriesQuery) -> TelemetryResult<Option<Record>>;

    /// Records in the range ordered by time, aggregated when requested.
    async fn query_range(&self, query: &SeriesQuery) -> TelemetryResult<Vec<Record>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_builder() {
        let point = Point::new(EVENTS_MEASUREMENT)
            .tag("fmi", "18")
            .field("message", "Low Oil Pressure Warning");
        assert_eq!(point.tags.get("fmi").map(String::as_str), Some("18"));
        assert_eq!(
            point.fields.get("message"),
            Some(&FieldValue::Text("Low Oil Pressure Warning".into()))
        );
    }

    #[test]
    fn test_field_value_views() {
        assert_eq!(FieldValue::from(3i64).as_f64(), Some(3.0));
        assert_eq!(FieldValue::from(true).as_f64(), Some(1.0));
        assert_eq!(FieldValue::from("12.5").as_f64(), Some(12.5));
        assert_eq!(FieldValue::from("true").as_bool(), Some(true));
        assert_eq!(FieldValue::from(1.5).as_bool(), None);
    }

    #[test]
    fn test_query_field_selection() {
        let query = SeriesQuery::latest(METRICS_MEASUREMENT, chrono::Duration::minutes(5));
        assert!(query.wants_field("anything"));
        let query = query.fields(["Engine_Speed"]);
        assert!(query.wants_field("Engine_Speed"));
        assert!(!query.wants_field("Engine_Oil_Pressure"));
    }
}
