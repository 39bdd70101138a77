// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Anomaly analysis
//!
//! The local analyzer compares a metric snapshot with the baseline of the
//! current load band and always runs. The remote gateway is optional and
//! best-effort: when it fails the local result stands.

pub mod gateway;
pub mod local;
pub mod record;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::baseline::Metric;
use crate::load_band::LoadBand;
use crate::store::Record;

pub use gateway::{AnalysisGateway, GatewayAnalysis, GatewayClient};
pub use local::{LocalAnalysis, LocalAnomalyAnalyzer};
pub use record::{AnalysisKind, AnalysisRecord};

/// Field of the live rating in the metrics measurement.
const RATED_POWER_FIELD: &str = "Genset_kW_Rating";

/// Per-metric classification against the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Ok => "OK",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        })
    }
}

/// Overall level of an analysis cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

impl AlertLevel {
    /// Highest severity wins; nothing above OK is INFO.
    pub fn from_severities(severities: impl IntoIterator<Item = Severity>) -> Self {
        match severities.into_iter().max() {
            Some(Severity::Critical) => AlertLevel::Critical,
            Some(Severity::Warning) => AlertLevel::Warning,
            _ => AlertLevel::Info,
        }
    }

    /// Lenient parse of a level reported by a remote service.
    pub fn parse_lenient(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(AlertLevel::Critical),
            "WARNING" => Some(AlertLevel::Warning),
            "INFO" | "OK" => Some(AlertLevel::Info),
            _ => None,
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertLevel::Info => "INFO",
            AlertLevel::Warning => "WARNING",
            AlertLevel::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyVerdict {
    pub metric: Metric,
    pub level: Severity,
    pub value: f64,
    pub baseline_avg: f64,
    pub baseline_stddev: f64,
}

impl AnomalyVerdict {
    /// Deviation expressed in standard deviations; infinite for a flat baseline.
    pub fn sigma(&self) -> f64 {
        let deviation = (self.value - self.baseline_avg).abs();
        if self.baseline_stddev > 0.0 {
            deviation / self.baseline_stddev
        } else if deviation > 0.0 {
            f64::INFINITY
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    pub metric: Option<Metric>,
    pub value: Option<f64>,
    pub unit: String,
}

/// Latest value of each tracked metric.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<Metric, f64>,
    /// Live rating reported by the controller
    pub rated_power_kw: Option<f64>,
}

impl MetricSnapshot {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.values.insert(metric, value);
        self
    }

    pub fn from_record(record: &Record) -> Self {
        Self {
            timestamp: record.timestamp,
            values: Metric::ALL
                .into_iter()
                .filter_map(|m| record.f64(m.store_field()).map(|v| (m, v)))
                .collect(),
            rated_power_kw: record.f64(RATED_POWER_FIELD).filter(|r| *r > 0.0),
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }

    /// Engine speed, `0` when absent or not a number.
    pub fn engine_speed(&self) -> f64 {
        self.get(Metric::EngineSpeed)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    pub fn load_band(&self, default_rated_power_kw: f64) -> LoadBand {
        LoadBand::classify(
            self.engine_speed(),
            self.get(Metric::PowerOutput).unwrap_or(0.0),
            self.rated_power_kw.unwrap_or(default_rated_power_kw),
        )
    }

    /// Flat metric map sent to the gateway.
    pub fn to_metric_map(&self) -> BTreeMap<String, f64> {
        let mut map: BTreeMap<String, f64> = self
            .values
            .iter()
            .map(|(metric, value)| (metric.key().to_string(), *value))
            .collect();
        if let Some(rated) = self.rated_power_kw {
            map.insert("rated_power_kw".to_string(), rated);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_level() {
        assert_eq!(AlertLevel::from_severities([]), AlertLevel::Info);
        assert_eq!(
            AlertLevel::from_severities([Severity::Ok, Severity::Ok]),
            AlertLevel::Info
        );
        assert_eq!(
            AlertLevel::from_severities([Severity::Warning, Severity::Ok]),
            AlertLevel::Warning
        );
        assert_eq!(
            AlertLevel::from_severities([Severity::Warning, Severity::Critical]),
            AlertLevel::Critical
        );
        assert_eq!(AlertLevel::parse_lenient("warning"), Some(AlertLevel::Warning));
        assert_eq!(AlertLevel::parse_lenient("bogus"), None);
    }

    #[test]
    fn test_snapshot_from_record() {
        let mut record = Record::default();
        record
            .fields
            .insert("Engine_Speed".into(), crate::store::FieldValue::Float(1800.0));
        record.fields.insert(
            "Generator_Total_Real_Power".into(),
            crate::store::FieldValue::Float(75.0),
        );
        record
            .fields
            .insert("Genset_kW_Rating".into(), crate::store::FieldValue::Float(150.0));
        let snapshot = MetricSnapshot::from_record(&record);
        assert_eq!(snapshot.engine_speed(), 1800.0);
        assert_eq!(snapshot.load_band(500.0), LoadBand::Band60To80);
        assert_eq!(snapshot.to_metric_map().get("rated_power_kw"), Some(&150.0));
        assert_eq!(MetricSnapshot::default().engine_speed(), 0.0);
    }
}
