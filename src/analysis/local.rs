// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Sigma-based local analysis

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use super::{Alert, AlertLevel, AnomalyVerdict, MetricSnapshot, Severity};
use crate::baseline::{Baseline, Metric};
use crate::load_band::LoadBand;

/// Metrics checked against the baseline. Power output defines the load band
/// and is not scored.
pub const ANALYZED_METRICS: [Metric; 8] = [
    Metric::EngineSpeed,
    Metric::OilPressure,
    Metric::CoolantTemperature,
    Metric::FuelPressure,
    Metric::FuelTemperature,
    Metric::FuelRate,
    Metric::IntakeAirTemperature,
    Metric::IntakeAirPressure,
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalAnalysis {
    pub timestamp: DateTime<Utc>,
    pub load_band: LoadBand,
    pub baseline_available: bool,
    pub verdicts: Vec<AnomalyVerdict>,
    pub alerts: Vec<Alert>,
    pub alert_level: AlertLevel,
    pub insights: Vec<String>,
}

impl LocalAnalysis {
    /// One-line description stored with the result.
    pub fn summary(&self) -> String {
        if !self.baseline_available {
            return format!("Local analysis - no baseline for load band {}", self.load_band);
        }
        match self.alerts.len() {
            0 => format!(
                "Local analysis - all parameters within normal range ({} load band)",
                self.load_band
            ),
            n => format!(
                "Local analysis - {} parameter(s) outside normal range ({} load band)",
                n, self.load_band
            ),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LocalAnomalyAnalyzer {
    pub warning_sigma: f64,
    pub critical_sigma: f64,
}

impl Default for LocalAnomalyAnalyzer {
    fn default() -> Self {
        Self {
            warning_sigma: 2.0,
            critical_sigma: 3.0,
        }
    }
}

impl LocalAnomalyAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, value: f64, avg: f64, stddev: f64) -> Severity {
        let deviation = (value - avg).abs();
        if deviation > self.critical_sigma * stddev {
            Severity::Critical
        } else if deviation > self.warning_sigma * stddev {
            Severity::Warning
        } else {
            Severity::Ok
        }
    }

    /// Verdicts for every positive reading that has a baseline counterpart.
    pub fn evaluate(&self, snapshot: &MetricSnapshot, baseline: &Baseline) -> Vec<AnomalyVerdict> {
        ANALYZED_METRICS
            .into_iter()
            .filter_map(|metric| {
                let value = snapshot.get(metric).filter(|v| *v > 0.0)?;
                let stats = baseline.stats(metric)?;
                Some(AnomalyVerdict {
                    metric,
                    level: self.classify(value, stats.avg, stats.stddev),
                    value,
                    baseline_avg: stats.avg,
                    baseline_stddev: stats.stddev,
                })
            })
            .collect()
    }

    pub fn analyze(
        &self,
        snapshot: &MetricSnapshot,
        baseline: Option<&Baseline>,
        load_band: LoadBand,
    ) -> LocalAnalysis {
        info!("Running local statistical analysis for {} load band", load_band);
        let engine_speed = snapshot.engine_speed();

        let Some(baseline) = baseline else {
            let mut insights = vec![
                "No baseline data available - statistical analysis unavailable".to_string(),
                format!("Load band: {}", load_band),
            ];
            insights.push(if engine_speed > 0.0 {
                format!("Engine running at {:.0} RPM", engine_speed)
            } else {
                "Engine stopped".to_string()
            });
            return LocalAnalysis {
                timestamp: snapshot.timestamp,
                load_band,
                baseline_available: false,
                verdicts: Vec::new(),
                alerts: Vec::new(),
                alert_level: AlertLevel::Info,
                insights,
            };
        };

        let verdicts = self.evaluate(snapshot, baseline);
        let alerts: Vec<Alert> = verdicts
            .iter()
            .filter_map(|verdict| {
                let (level, message) = match verdict.level {
                    Severity::Critical => (
                        AlertLevel::Critical,
                        format!("{} critically outside normal range", verdict.metric.label()),
                    ),
                    Severity::Warning => (
                        AlertLevel::Warning,
                        format!("{} outside normal range", verdict.metric.label()),
                    ),
                    Severity::Ok => return None,
                };
                Some(Alert {
                    level,
                    message,
                    metric: Some(verdict.metric),
                    value: Some(verdict.value),
                    unit: verdict.metric.unit().to_string(),
                })
            })
            .collect();
        let alert_level = AlertLevel::from_severities(verdicts.iter().map(|v| v.level));

        let mut insights = vec![
            format!("Statistical analysis using {} load band baselines", load_band),
            format!("Analyzing {} baseline parameters", baseline.metrics.len()),
        ];
        insights.push(if engine_speed > 0.0 {
            format!("Engine operational at {:.0} RPM", engine_speed)
        } else {
            "Engine stopped - monitoring for activity".to_string()
        });

        debug!(
            "Analysis completed - alert level {}, {} alert(s)",
            alert_level,
            alerts.len()
        );
        LocalAnalysis {
            timestamp: snapshot.timestamp,
            load_band,
            baseline_available: true,
            verdicts,
            alerts,
            alert_level,
            insights,
        }
    }
}
