// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Load band classification

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Engine speed below which the engine counts as stopped (RPM).
pub const RUNNING_SPEED_RPM: f64 = 100.0;

/// Discretized generator output, used to pick a comparable baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LoadBand {
    #[serde(rename = "0%")]
    Stopped,
    #[serde(rename = "0-20%")]
    Band0To20,
    #[serde(rename = "20-40%")]
    Band20To40,
    #[serde(rename = "40-60%")]
    Band40To60,
    #[serde(rename = "60-80%")]
    Band60To80,
    #[serde(rename = "80-100%")]
    Band80To100,
}

impl LoadBand {
    pub const ALL: [LoadBand; 6] = [
        LoadBand::Stopped,
        LoadBand::Band0To20,
        LoadBand::Band20To40,
        LoadBand::Band40To60,
        LoadBand::Band60To80,
        LoadBand::Band80To100,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            LoadBand::Stopped => "0%",
            LoadBand::Band0To20 => "0-20%",
            LoadBand::Band20To40 => "20-40%",
            LoadBand::Band40To60 => "40-60%",
            LoadBand::Band60To80 => "60-80%",
            LoadBand::Band80To100 => "80-100%",
        }
    }

    /// Bring a power reading to a percentage of rated output.
    ///
    /// Controllers report power either in kW, in hundredths of kW or in raw
    /// units proportional to the rating, depending on firmware.
    pub fn normalize_power(power_output: f64, rated_power: f64) -> f64 {
        if !power_output.is_finite() || power_output < 0.0 {
            return 0.0;
        }
        if power_output > 125.0 && power_output <= 12_500.0 {
            power_output / 100.0
        } else if power_output > 12_500.0 && rated_power > 0.0 {
            power_output / rated_power * 100.0
        } else {
            power_output
        }
    }

    pub fn classify(engine_speed: f64, power_output: f64, rated_power: f64) -> Self {
        if engine_speed.is_nan() || engine_speed < RUNNING_SPEED_RPM {
            return LoadBand::Stopped;
        }
        let load = Self::normalize_power(power_output, rated_power);
        if load < 20.0 {
            LoadBand::Band0To20
        } else if load < 40.0 {
            LoadBand::Band20To40
        } else if load < 60.0 {
            LoadBand::Band40To60
        } else if load < 80.0 {
            LoadBand::Band60To80
        } else {
            LoadBand::Band80To100
        }
    }
}

impl fmt::Display for LoadBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LoadBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LoadBand::ALL
            .into_iter()
            .find(|band| band.label() == s.trim())
            .ok_or_else(|| format!("Unknown load band: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_engine_ignores_power() {
        assert_eq!(LoadBand::classify(50.0, 900.0, 150.0), LoadBand::Stopped);
        assert_eq!(LoadBand::classify(0.0, 0.0, 150.0), LoadBand::Stopped);
        assert_eq!(LoadBand::classify(f64::NAN, 50.0, 150.0), LoadBand::Stopped);
    }

    #[test]
    fn test_banding() {
        assert_eq!(LoadBand::classify(1800.0, 15.0, 150.0), LoadBand::Band0To20);
        assert_eq!(LoadBand::classify(1800.0, 20.0, 150.0), LoadBand::Band20To40);
        assert_eq!(LoadBand::classify(1800.0, 59.9, 150.0), LoadBand::Band40To60);
        assert_eq!(LoadBand::classify(1800.0, 79.0, 150.0), LoadBand::Band60To80);
        assert_eq!(LoadBand::classify(1800.0, 110.0, 150.0), LoadBand::Band80To100);
    }

    #[test]
    fn test_power_normalization() {
        // hundredths of kW
        assert_eq!(LoadBand::normalize_power(9000.0, 150.0), 90.0);
        assert_eq!(LoadBand::classify(1800.0, 9000.0, 150.0), LoadBand::Band80To100);
        assert_eq!(LoadBand::normalize_power(30000.0, 150.0), 20000.0);
        assert_eq!(LoadBand::normalize_power(30000.0, 0.0), 30000.0);
        assert_eq!(LoadBand::normalize_power(-5.0, 150.0), 0.0);
        assert_eq!(LoadBand::normalize_power(f64::INFINITY, 150.0), 0.0);
    }

    #[test]
    fn test_labels_round_trip() {
        for band in LoadBand::ALL {
            assert_eq!(band.to_string().parse::<LoadBand>(), Ok(band));
        }
        assert!("90%".parse::<LoadBand>().is_err());
        assert_eq!(serde_json::to_string(&LoadBand::Band40To60).unwrap(), "\"40-60%\"");
    }
}
