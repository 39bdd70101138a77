// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Load-banded statistical baselines
//!
//! "Normal" values differ by an order of magnitude between idle and full
//! load, so reference statistics are kept per [`LoadBand`]. A [`Baseline`]
//! holds, for each tracked [`Metric`], the mean, population standard
//! deviation, range and daily trend observed in that band.
//!
//! - [`stats`]: pure statistics
//! - [`engine`]: batch computation, history loading and recompute runs
//! - [`repository`]: persistence of baselines and of the status record
//! - [`freshness`]: when a recompute is due

pub mod engine;
pub mod freshness;
pub mod repository;
pub mod stats;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::load_band::LoadBand;

pub use engine::{compute_baselines, load_history, BaselineEngine, BaselineRun};
pub use freshness::{FreshnessDecision, FreshnessPolicy};
pub use repository::{BaselineRepository, BaselineStatus};

/// Powertrain metrics tracked by baselines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    EngineSpeed,
    OilPressure,
    CoolantTemperature,
    FuelPressure,
    FuelTemperature,
    FuelRate,
    IntakeAirTemperature,
    IntakeAirPressure,
    PowerOutput,
}

impl Metric {
    pub const ALL: [Metric; 9] = [
        Metric::EngineSpeed,
        Metric::OilPressure,
        Metric::CoolantTemperature,
        Metric::FuelPressure,
        Metric::FuelTemperature,
        Metric::FuelRate,
        Metric::IntakeAirTemperature,
        Metric::IntakeAirPressure,
        Metric::PowerOutput,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Metric::EngineSpeed => "engine_speed",
            Metric::OilPressure => "oil_pressure",
            Metric::CoolantTemperature => "coolant_temperature",
            Metric::FuelPressure => "fuel_pressure",
            Metric::FuelTemperature => "fuel_temperature",
            Metric::FuelRate => "fuel_rate",
            Metric::IntakeAirTemperature => "intake_air_temperature",
            Metric::IntakeAirPressure => "intake_air_pressure",
            Metric::PowerOutput => "power_output",
        }
    }

    /// Field written by the poller for this metric.
    pub fn store_field(&self) -> &'static str {
        match self {
            Metric::EngineSpeed => "Engine_Speed",
            Metric::OilPressure => "Engine_Oil_Pressure",
            Metric::CoolantTemperature => "Engine_Coolant_Temperature",
            Metric::FuelPressure => "Engine_Fuel_Pressure",
            Metric::FuelTemperature => "Engine_Fuel_Temperature",
            Metric::FuelRate => "Engine_Fuel_Rate",
            Metric::IntakeAirTemperature => "Intake_Air_Temperature",
            Metric::IntakeAirPressure => "Intake_Air_Pressure",
            Metric::PowerOutput => "Generator_Total_Real_Power",
        }
    }

    /// Human-readable name used in alerts.
    pub fn label(&self) -> &'static str {
        match self {
            Metric::EngineSpeed => "Engine Speed",
            Metric::OilPressure => "Oil Pressure",
            Metric::CoolantTemperature => "Coolant Temperature",
            Metric::FuelPressure => "Fuel Pressure",
            Metric::FuelTemperature => "Fuel Temperature",
            Metric::FuelRate => "Fuel Rate",
            Metric::IntakeAirTemperature => "Intake Air Temperature",
            Metric::IntakeAirPressure => "Intake Air Pressure",
            Metric::PowerOutput => "Power Output",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::EngineSpeed => "RPM",
            Metric::OilPressure | Metric::FuelPressure | Metric::IntakeAirPressure => "kPa",
            Metric::CoolantTemperature | Metric::FuelTemperature | Metric::IntakeAirTemperature => "°C",
            Metric::FuelRate => "l/hr",
            Metric::PowerOutput => "kW",
        }
    }

    pub fn from_store_field(field: &str) -> Option<Self> {
        Metric::ALL.into_iter().find(|m| m.store_field() == field)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.key() == s)
            .ok_or_else(|| format!("Unknown metric: {}", s))
    }
}

/// Statistics of one metric within one band.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricStats {
    pub avg: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub trend_per_day: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub load_band: LoadBand,
    pub metrics: BTreeMap<Metric, MetricStats>,
    pub sample_count: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl Baseline {
    pub fn stats(&self, metric: Metric) -> Option<&MetricStats> {
        self.metrics.get(&metric)
    }

    fn avg_or_zero(&self, metric: Metric) -> f64 {
        self.stats(metric).map(|s| s.avg).unwrap_or(0.0)
    }

    /// All-zero record left behind by a run that had no data for the band.
    pub fn is_placeholder(&self) -> bool {
        self.sample_count == 0
            && self.avg_or_zero(Metric::EngineSpeed) == 0.0
            && self.avg_or_zero(Metric::OilPressure) == 0.0
            && self.avg_or_zero(Metric::PowerOutput) == 0.0
    }

    /// Same statistics with a fresh window.
    pub fn restamped(&self, now: DateTime<Utc>) -> Self {
        Self {
            window_start: now,
            window_end: now,
            ..self.clone()
        }
    }
}

/// One time-aligned sample of the tracked metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalSample {
    pub timestamp: DateTime<Utc>,
    pub load_band: LoadBand,
    pub values: BTreeMap<Metric, f64>,
}

impl HistoricalSample {
    pub fn value(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }
}

/// Samples grouped by load band.
pub fn group_by_band(batch: &[HistoricalSample]) -> BTreeMap<LoadBand, Vec<&HistoricalSample>> {
    let mut groups: BTreeMap<LoadBand, Vec<&HistoricalSample>> = BTreeMap::new();
    for sample in batch {
        groups.entry(sample.load_band).or_default().push(sample);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert_eq!(Metric::OilPressure.store_field(), "Engine_Oil_Pressure");
        assert_eq!(
            Metric::from_store_field("Generator_Total_Real_Power"),
            Some(Metric::PowerOutput)
        );
        assert_eq!("fuel_rate".parse::<Metric>(), Ok(Metric::FuelRate));
    }

    #[test]
    fn test_placeholder_detection() {
        let now = Utc::now();
        let mut baseline = Baseline {
            load_band: LoadBand::Band20To40,
            metrics: BTreeMap::new(),
            sample_count: 0,
            window_start: now,
            window_end: now,
        };
        assert!(baseline.is_placeholder());
        baseline.metrics.insert(
            Metric::OilPressure,
            MetricStats {
                avg: 410.0,
                ..MetricStats::default()
            },
        );
        assert!(!baseline.is_placeholder());
    }
}
