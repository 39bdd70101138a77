// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Persisted form of an analysis result

use std::fmt;

use chrono::{DateTime, Utc};

use super::gateway::GatewayAnalysis;
use super::local::LocalAnalysis;
use super::{AlertLevel, MetricSnapshot};
use crate::baseline::Metric;
use crate::load_band::LoadBand;
use crate::store::Point;

pub const ANALYSIS_MEASUREMENT: &str = "powertrain_analysis";
pub const RECOMMENDATIONS_MEASUREMENT: &str = "powertrain_recommendations";
pub const ALERTS_MEASUREMENT: &str = "powertrain_alerts";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisKind {
    Local,
    Gateway,
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AnalysisKind::Local => "LOCAL",
            AnalysisKind::Gateway => "GATEWAY",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    pub kind: AnalysisKind,
    pub timestamp: DateTime<Utc>,
    pub load_band: LoadBand,
    pub alert_level: AlertLevel,
    pub agent_active: bool,
    pub ai_enabled: bool,
    pub summary: String,
    pub details: Vec<String>,
    pub alert_messages: Vec<String>,
    pub recommendations: Vec<String>,
    pub snapshot: MetricSnapshot,
}

impl AnalysisRecord {
    pub fn local(
        analysis: &LocalAnalysis,
        snapshot: &MetricSnapshot,
        agent_active: bool,
        ai_enabled: bool,
    ) -> Self {
        Self {
            kind: AnalysisKind::Local,
            timestamp: analysis.timestamp,
            load_band: analysis.load_band,
            alert_level: analysis.alert_level,
            agent_active,
            ai_enabled,
            summary: analysis.summary(),
            details: analysis.insights.clone(),
            alert_messages: analysis.alerts.iter().map(|a| a.message.clone()).collect(),
            recommendations: Vec::new(),
            snapshot: snapshot.clone(),
        }
    }

    pub fn gateway(
        analysis: &GatewayAnalysis,
        snapshot: &MetricSnapshot,
        load_band: LoadBand,
        agent_active: bool,
    ) -> Self {
        Self {
            kind: AnalysisKind::Gateway,
            timestamp: snapshot.timestamp,
            load_band,
            alert_level: analysis.alert_level(),
            agent_active,
            ai_enabled: true,
            summary: analysis.summary(),
            details: analysis.analysis.clone(),
            alert_messages: analysis
                .alerts
                .iter()
                .map(|a| a.message.clone())
                .filter(|m| !m.is_empty())
                .collect(),
            recommendations: analysis.recommendations.clone(),
            snapshot: snapshot.clone(),
        }
    }

    fn agent_state(&self) -> &'static str {
        if self.agent_active {
            "ACTIVE"
        } else {
            "PAUSED"
        }
    }

    fn metric(&self, metric: Metric) -> f64 {
        self.snapshot.get(metric).filter(|v| v.is_finite()).unwrap_or(0.0)
    }

    /// Main record, one point per recommendation, and an alert record when
    /// the level is WARNING or above.
    pub fn to_points(&self) -> Vec<Point> {
        let kind = self.kind.to_string();
        let level = self.alert_level.to_string();
        let mut points = vec![Point::new(ANALYSIS_MEASUREMENT)
            .tag("load_band", self.load_band.label())
            .tag("alert_level", level.as_str())
            .tag("analysis_type", kind.as_str())
            .tag("agent_state", self.agent_state())
            .field("engine_speed", self.metric(Metric::EngineSpeed))
            .field("engine_oil_pressure", self.metric(Metric::OilPressure))
            .field("generator_power", self.metric(Metric::PowerOutput))
            .field("coolant_temperature", self.metric(Metric::CoolantTemperature))
            .field("analysis_summary", self.summary.as_str())
            .field("analysis", self.details.join("\n"))
            .field("alert_count", self.alert_messages.len() as i64)
            .field("ai_enabled", self.ai_enabled)
            .at(self.timestamp)];

        for (i, recommendation) in self.recommendations.iter().enumerate() {
            points.push(
                Point::new(RECOMMENDATIONS_MEASUREMENT)
                    .tag("alert_level", level.as_str())
                    .tag("priority", (i + 1).to_string())
                    .tag("analysis_type", kind.as_str())
                    .field("recommendation", recommendation.as_str())
                    .field("status", "pending")
                    .at(self.timestamp),
            );
        }

        if self.alert_level >= AlertLevel::Warning {
            let description = if self.alert_messages.is_empty() {
                self.summary.clone()
            } else {
                self.alert_messages.join("; ")
            };
            points.push(
                Point::new(ALERTS_MEASUREMENT)
                    .tag("severity", level.as_str())
                    .tag("load_band", self.load_band.label())
                    .tag("alert_type", "powertrain_analysis")
                    .tag("analysis_type", kind.as_str())
                    .field("description", description)
                    .field("oil_pressure", self.metric(Metric::OilPressure))
                    .field("engine_speed", self.metric(Metric::EngineSpeed))
                    .field("power_output", self.metric(Metric::PowerOutput))
                    .field("resolved", false)
                    .at(self.timestamp),
            );
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FieldValue;

    #[test]
    fn test_gateway_record_points() {
        let analysis: GatewayAnalysis = serde_json::from_str(
            r#"{"analysis_summary":"Coolant trending up","alert_level":"WARNING",
                "alerts":[{"level":"WARNING","message":"Coolant temperature rising"}],
                "recommendations":["Inspect radiator","Check coolant level"]}"#,
        )
        .unwrap();
        let snapshot = MetricSnapshot::new(Utc::now())
            .with(Metric::EngineSpeed, 1800.0)
            .with(Metric::CoolantTemperature, 94.0);
        let record = AnalysisRecord::gateway(&analysis, &snapshot, LoadBand::Band40To60, true);
        let points = record.to_points();
        assert_eq!(points.len(), 4);

        let main = &points[0];
        assert_eq!(main.measurement, ANALYSIS_MEASUREMENT);
        assert_eq!(main.tags.get("analysis_type").map(String::as_str), Some("GATEWAY"));
        assert_eq!(main.tags.get("agent_state").map(String::as_str), Some("ACTIVE"));
        assert_eq!(main.fields.get("engine_oil_pressure"), Some(&FieldValue::Float(0.0)));
        assert_eq!(points[2].tags.get("priority").map(String::as_str), Some("2"));
        assert_eq!(points[3].measurement, ALERTS_MEASUREMENT);
        assert_eq!(
            points[3].fields.get("description"),
            Some(&FieldValue::Text("Coolant temperature rising".into()))
        );
    }
}
