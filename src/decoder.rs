// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Raw register decoding and value correction
//!
//! The controller flags registers it does not support with reserved raw
//! values. Writing those values as-is shows up downstream as absurd spikes
//! (an apparent power of 655 % for instance), so every raw read goes through
//! [`RegisterDecoder::decode`]:
//!
//! 1. Reserved flag on a cumulative counter: the write is skipped.
//! 2. Reserved flag on any other register: the value becomes `0`, flagged corrected.
//! 3. Scaling by the register's factor.
//! 4. Plausibility check against the category band and the literal error
//!    sentinels; implausible non-cumulative values become `0`, flagged corrected.
//!
//! Decoding is a pure function of the raw value, the register definition and
//! the threshold table.

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;

use crate::catalog::RegisterDef;
use crate::config::AnomalyThresholds;

/// Exact raw value meaning "unsupported register".
pub const UNSUPPORTED_FLAG: u16 = 0xFFC0;

/// Reserved raw ranges for unknown signed and unsigned values.
pub const INVALID_FLAG_RANGES: [(u16, u16); 2] = [(0x7FE0, 0x7FFF), (0xFFE0, 0xFFFF)];

/// Scaled values that always denote a Modbus read error.
pub const ERROR_SENTINELS: [f64; 8] = [
    32767.0, 32764.0, 32765.0, 32766.0, 3276.7, 3276.4, 3276.5, 3276.6,
];

/// True when `raw` is one of the controller's invalid-data flags.
pub fn is_invalid_flag(raw: u16) -> bool {
    raw == UNSUPPORTED_FLAG
        || INVALID_FLAG_RANGES
            .iter()
            .any(|(start, end)| (*start..=*end).contains(&raw))
}

pub fn is_error_sentinel(value: f64) -> bool {
    ERROR_SENTINELS.contains(&value)
}

/// One raw 16-bit read, as produced by the poller.
#[derive(Debug, Clone, PartialEq)]
pub struct RawReading {
    pub register_name: String,
    pub raw: u16,
    pub timestamp: DateTime<Utc>,
}

impl RawReading {
    pub fn new(register_name: impl Into<String>, raw: u16) -> Self {
        Self {
            register_name: register_name.into(),
            raw,
            timestamp: Utc::now(),
        }
    }
}

/// Reason a value was rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    /// The controller flagged the register as unsupported
    InvalidFlag,
    /// The scaled value was outside its plausibility band
    AnomalyClamped,
}

/// Engineering value ready for the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectedReading {
    pub register_name: String,
    pub value: f64,
    pub units: String,
    pub corrected: bool,
    pub correction: Option<Correction>,
    /// Label of enumerated registers, when the raw value has one
    pub text: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    Reading(CorrectedReading),
    /// Cumulative counter flagged unsupported; nothing must be written
    SkipWrite { register_name: String, raw: u16 },
}

impl DecodeOutcome {
    pub fn reading(&self) -> Option<&CorrectedReading> {
        match self {
            DecodeOutcome::Reading(reading) => Some(reading),
            DecodeOutcome::SkipWrite { .. } => None,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, DecodeOutcome::SkipWrite { .. })
    }
}

/// Stateless decoder bound to a threshold table.
#[derive(Debug, Clone)]
pub struct RegisterDecoder {
    thresholds: AnomalyThresholds,
}

impl RegisterDecoder {
    pub fn new(thresholds: AnomalyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AnomalyThresholds {
        &self.thresholds
    }

    /// True when `value` would be clamped on a non-cumulative register of this definition.
    pub fn is_anomalous(&self, value: f64, def: &RegisterDef) -> bool {
        is_error_sentinel(value) || !self.thresholds.band(def.category).contains(value)
    }

    pub fn decode(&self, raw: &RawReading, def: &RegisterDef) -> DecodeOutcome {
        let mut correction = None;

        let mut value = if is_invalid_flag(raw.raw) {
            if def.cumulative {
                debug!(
                    "Skipping {} due to invalid register flag: {:#06X}",
                    def.name, raw.raw
                );
                return DecodeOutcome::SkipWrite {
                    register_name: def.name.clone(),
                    raw: raw.raw,
                };
            }
            info!(
                "Corrected invalid register flag for {}: raw={:#06X}, set to 0",
                def.name, raw.raw
            );
            correction = Some(Correction::InvalidFlag);
            0.0
        } else {
            match def.scale {
                Some(scale) => f64::from(raw.raw) / scale,
                None => f64::from(raw.raw),
            }
        };

        if !def.cumulative && correction.is_none() && self.is_anomalous(value, def) {
            debug!(
                "Anomalous {} value for {}: {} {}, set to 0",
                def.category, def.name, value, def.units
            );
            value = 0.0;
            correction = Some(Correction::AnomalyClamped);
        }

        let text = if correction.is_none() {
            def.states.get(&raw.raw).cloned()
        } else {
            None
        };

        DecodeOutcome::Reading(CorrectedReading {
            register_name: def.name.clone(),
            value,
            units: def.units.clone(),
            corrected: correction.is_some(),
            correction,
            text,
            timestamp: raw.timestamp,
        })
    }
}

impl Default for RegisterDecoder {
    fn default() -> Self {
        Self::new(AnomalyThresholds::default())
    }
}
