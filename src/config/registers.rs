// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register map, anomaly threshold and event table configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::catalog::ThresholdCategory;

/// One register as written in the configuration file.
///
/// `category` and `cumulative` are normally derived from the name; set them
/// explicitly when a vendor name would be misclassified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterConfig {
    pub name: String,

    /// 1-based register number from the controller documentation.
    pub address: u16,

    /// Raw value is divided by this factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,

    #[serde(default)]
    pub units: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<ThresholdCategory>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cumulative: Option<bool>,

    /// Labels for enumerated registers, keyed by raw value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub states: BTreeMap<u16, String>,
}

/// Inclusive plausibility band for one category.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBand {
    pub min: f64,
    pub max: f64,
}

impl ThresholdBand {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Plausibility bands used by the decoder, one per category.
///
/// Categories missing from the map fall back to the `default` band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnomalyThresholds {
    bands: BTreeMap<ThresholdCategory, ThresholdBand>,
}

impl AnomalyThresholds {
    pub fn new(bands: BTreeMap<ThresholdCategory, ThresholdBand>) -> Self {
        Self { bands }
    }

    pub fn band(&self, category: ThresholdCategory) -> ThresholdBand {
        self.bands
            .get(&category)
            .or_else(|| self.bands.get(&ThresholdCategory::Default))
            .copied()
            .unwrap_or(ThresholdBand::new(f64::MIN, f64::MAX))
    }

    pub fn set(&mut self, category: ThresholdCategory, band: ThresholdBand) {
        self.bands.insert(category, band);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ThresholdCategory, &ThresholdBand)> {
        self.bands.iter()
    }
}

impl Default for AnomalyThresholds {
    fn default() -> Self {
        let bands = [
            (ThresholdCategory::Temperature, ThresholdBand::new(-50.0, 200.0)),
            (ThresholdCategory::Pressure, ThresholdBand::new(0.0, 1000.0)),
            (ThresholdCategory::Degrees, ThresholdBand::new(-360.0, 360.0)),
            (ThresholdCategory::Frequency, ThresholdBand::new(0.0, 100.0)),
            (ThresholdCategory::Voltage, ThresholdBand::new(0.0, 1000.0)),
            (ThresholdCategory::Current, ThresholdBand::new(0.0, 10000.0)),
            (ThresholdCategory::Power, ThresholdBand::new(-1000.0, 20000.0)),
            (ThresholdCategory::Percentage, ThresholdBand::new(0.0, 200.0)),
            (ThresholdCategory::Flow, ThresholdBand::new(0.0, 1000.0)),
            (ThresholdCategory::Default, ThresholdBand::new(-32768.0, 65535.0)),
        ];
        Self {
            bands: bands.into_iter().collect(),
        }
    }
}

/// Active event table layout and presentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Disable to skip the event table entirely.
    pub enabled: bool,

    /// 1-based register holding the active event count; slots follow it.
    pub base_address: u16,

    /// Slots read per cycle, whatever the count register says.
    pub max_events: u16,

    /// Consecutive absent polls before an event is considered cleared.
    pub expiry_polls: u8,

    /// Event keys (`fmi-level-param_id`) never written to the store.
    pub ignore_codes: Vec<String>,

    /// Human descriptions keyed by event key.
    pub descriptions: BTreeMap<String, String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        let descriptions = [
            ("1-3-100", "Low Oil Pressure Shutdown"),
            ("18-2-100", "Low Oil Pressure Warning"),
            ("0-3-110", "High Coolant Temperature Shutdown"),
            ("15-2-110", "High Coolant Temperature Warning"),
            ("1-2-168", "Low Battery Voltage Warning"),
            ("0-3-190", "Engine Overspeed Shutdown"),
            ("1-2-96", "Low Fuel Level Warning"),
        ]
        .iter()
        .map(|(key, text)| (key.to_string(), text.to_string()))
        .collect();

        Self {
            enabled: true,
            base_address: 100,
            max_events: 7,
            expiry_polls: 3,
            ignore_codes: Vec::new(),
            descriptions,
        }
    }
}
