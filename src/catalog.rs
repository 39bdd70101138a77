// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register catalog for the generator controller
//!
//! The catalog is built once at startup from the `registers` section of the
//! configuration. Every [`RegisterDef`] carries its anomaly threshold category
//! and its cumulative-counter classification, both resolved at load time so
//! that decoding never has to inspect register names again.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_genset_monitor::catalog::RegisterCatalog;
//! use rust_genset_monitor::config::Config;
//!
//! let config = Config::default();
//! let catalog = RegisterCatalog::from_config(&config).unwrap();
//! let speed = catalog.engine_speed();
//! println!("{} lives at offset {}", speed.name, speed.offset());
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{Config, RegisterConfig};
use crate::error::{TelemetryError, TelemetryResult};

/// Name fragments identifying counters that must never be zeroed by correction.
pub const CUMULATIVE_KEYWORDS: [&str; 5] = ["Total", "Hours", "Starts", "Runtime", "Number of"];

/// Anomaly threshold category of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdCategory {
    Temperature,
    Pressure,
    Degrees,
    Frequency,
    Voltage,
    Current,
    Power,
    Percentage,
    Flow,
    Default,
}

impl ThresholdCategory {
    pub const ALL: [ThresholdCategory; 10] = [
        ThresholdCategory::Temperature,
        ThresholdCategory::Pressure,
        ThresholdCategory::Degrees,
        ThresholdCategory::Frequency,
        ThresholdCategory::Voltage,
        ThresholdCategory::Current,
        ThresholdCategory::Power,
        ThresholdCategory::Percentage,
        ThresholdCategory::Flow,
        ThresholdCategory::Default,
    ];

    /// Classify a register from its name and units.
    ///
    /// The first matching rule wins, so "Generator Power Factor" is a power
    /// register and "Engine Fuel Rate" with units "l/hr" is a flow register.
    pub fn classify(name: &str, units: &str) -> Self {
        let text = format!("{} {}", name, units);
        let has = |needle: &str| text.contains(needle);

        if has("Temperature") {
            ThresholdCategory::Temperature
        } else if has("Pressure") {
            ThresholdCategory::Pressure
        } else if has("Angle") || has("Degrees") {
            ThresholdCategory::Degrees
        } else if has("Frequency") || has("Hz") {
            ThresholdCategory::Frequency
        } else if has("Voltage") {
            ThresholdCategory::Voltage
        } else if has("Current") {
            ThresholdCategory::Current
        } else if has("Power") || has("kW") {
            ThresholdCategory::Power
        } else if has("% of") {
            ThresholdCategory::Percentage
        } else if has("Rate") || has("l/hr") {
            ThresholdCategory::Flow
        } else {
            ThresholdCategory::Default
        }
    }
}

impl fmt::Display for ThresholdCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ThresholdCategory::Temperature => "temperature",
            ThresholdCategory::Pressure => "pressure",
            ThresholdCategory::Degrees => "degrees",
            ThresholdCategory::Frequency => "frequency",
            ThresholdCategory::Voltage => "voltage",
            ThresholdCategory::Current => "current",
            ThresholdCategory::Power => "power",
            ThresholdCategory::Percentage => "percentage",
            ThresholdCategory::Flow => "flow",
            ThresholdCategory::Default => "default",
        };
        f.write_str(label)
    }
}

/// True when the register name marks a cumulative counter.
pub fn is_cumulative_name(name: &str) -> bool {
    CUMULATIVE_KEYWORDS.iter().any(|keyword| name.contains(keyword))
}

/// Immutable definition of one holding register.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterDef {
    pub name: String,
    /// 1-based register number as documented by the controller vendor
    pub address: u16,
    pub scale: Option<f64>,
    pub units: String,
    pub category: ThresholdCategory,
    pub cumulative: bool,
    /// Text labels for enumerated registers
    pub states: BTreeMap<u16, String>,
}

impl RegisterDef {
    /// Build a definition, resolving category and cumulative flags.
    pub fn new(name: impl Into<String>, address: u16, scale: Option<f64>, units: impl Into<String>) -> Self {
        let name = name.into();
        let units = units.into();
        let category = ThresholdCategory::classify(&name, &units);
        let cumulative = is_cumulative_name(&name);
        Self {
            name,
            address,
            scale,
            units,
            category,
            cumulative,
            states: BTreeMap::new(),
        }
    }

    pub fn from_config(cfg: &RegisterConfig) -> Self {
        let mut def = Self::new(cfg.name.clone(), cfg.address, cfg.scale, cfg.units.clone());
        if let Some(category) = cfg.category {
            def.category = category;
        }
        if let Some(cumulative) = cfg.cumulative {
            def.cumulative = cumulative;
        }
        def.states = cfg.states.clone();
        def
    }

    pub fn with_states(mut self, states: &[(u16, &str)]) -> Self {
        self.states = states
            .iter()
            .map(|(raw, label)| (*raw, label.to_string()))
            .collect();
        self
    }

    /// 0-based protocol offset used on the wire.
    pub fn offset(&self) -> u16 {
        self.address.saturating_sub(1)
    }

    /// Field name used when the reading is written to the store.
    pub fn field_name(&self) -> String {
        self.name.replace(' ', "_")
    }
}

/// Read-only table of every register the poller knows about.
#[derive(Debug, Clone)]
pub struct RegisterCatalog {
    registers: Vec<RegisterDef>,
    by_name: HashMap<String, usize>,
    canary: usize,
    engine_speed: usize,
}

impl RegisterCatalog {
    /// Build the catalog from a list of definitions.
    ///
    /// Fails when a name is duplicated or when the canary or engine-speed
    /// register is missing: the poller cannot run without them.
    pub fn new(
        registers: Vec<RegisterDef>,
        canary_name: &str,
        engine_speed_name: &str,
    ) -> TelemetryResult<Self> {
        if registers.is_empty() {
            return Err(TelemetryError::Config("register catalog is empty".into()));
        }
        let mut by_name = HashMap::with_capacity(registers.len());
        for (index, def) in registers.iter().enumerate() {
            if def.address == 0 {
                return Err(TelemetryError::Config(format!(
                    "register {} has address 0, addresses are 1-based",
                    def.name
                )));
            }
            if by_name.insert(def.name.clone(), index).is_some() {
                return Err(TelemetryError::Config(format!(
                    "register {} is defined twice",
                    def.name
                )));
            }
        }
        let lookup = |name: &str| {
            by_name.get(name).copied().ok_or_else(|| {
                TelemetryError::Config(format!("required register '{}' is missing from the catalog", name))
            })
        };
        let canary = lookup(canary_name)?;
        let engine_speed = lookup(engine_speed_name)?;

        Ok(Self {
            registers,
            by_name,
            canary,
            engine_speed,
        })
    }

    pub fn from_config(config: &Config) -> TelemetryResult<Self> {
        let registers = config.registers.iter().map(RegisterDef::from_config).collect();
        Self::new(
            registers,
            &config.modbus.canary_register,
            &config.modbus.engine_speed_register,
        )
    }

    pub fn get(&self, name: &str) -> Option<&RegisterDef> {
        self.by_name.get(name).map(|&index| &self.registers[index])
    }

    /// Identity register read to validate a fresh link.
    pub fn canary(&self) -> &RegisterDef {
        &self.registers[self.canary]
    }

    pub fn engine_speed(&self) -> &RegisterDef {
        &self.registers[self.engine_speed]
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDef> {
        self.registers.iter()
    }

    /// Registers read by the regular sweep (everything but canary and engine speed).
    pub fn polled(&self) -> impl Iterator<Item = &RegisterDef> {
        let skip = [self.canary, self.engine_speed];
        self.registers
            .iter()
            .enumerate()
            .filter(move |(index, _)| !skip.contains(index))
            .map(|(_, def)| def)
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

/// Register map of a Decision-Maker 3500 controller.
pub fn default_register_configs() -> Vec<RegisterConfig> {
    let plain = |name: &str, address: u16, scale: Option<f64>, units: &str| RegisterConfig {
        name: name.to_string(),
        address,
        scale,
        units: units.to_string(),
        category: None,
        cumulative: None,
        states: BTreeMap::new(),
    };

    let mut registers = vec![
        plain("ECM Model", 1, None, ""),
        plain("Engine Speed", 2, None, "RPM"),
        plain("Engine Oil Pressure", 3, Some(10.0), "kPa"),
        plain("Engine Coolant Temperature", 4, Some(10.0), "°C"),
        plain("Engine Fuel Pressure", 5, Some(10.0), "kPa"),
        plain("Engine Fuel Temperature", 6, Some(10.0), "°C"),
        plain("Engine Fuel Rate", 7, Some(10.0), "l/hr"),
        plain("Intake Air Temperature", 8, Some(10.0), "°C"),
        plain("Intake Air Pressure", 9, Some(10.0), "kPa"),
        plain("Battery Voltage", 10, Some(10.0), "V"),
        plain("Controller Temperature", 11, Some(10.0), "°C"),
        plain("Generator Frequency", 20, Some(10.0), "Hz"),
        plain("Generator Average Line-Line Voltage", 21, None, "V"),
        plain("Generator Average Current", 22, None, "A"),
        plain("Generator Total Real Power", 23, None, "kW"),
        plain("Generator Total Reactive Power", 24, None, "kVAr"),
        plain("Generator Apparent Power", 25, None, "kVA"),
        plain("Generator Power Factor Average", 26, Some(100.0), ""),
        plain("Generator Load % of Rated", 27, Some(10.0), "%"),
        plain("Genset kW Rating", 28, None, "kW"),
        plain("Total Runtime Hours", 40, None, "h"),
        plain("Total Runtime Loaded Hours", 41, None, "h"),
        plain("Total Runtime Unloaded Hours", 42, None, "h"),
        plain("Total Runtime kW Hours", 43, None, "kWh"),
        plain("Total Number of Starts", 44, None, ""),
        plain("Runtime Hours Since Maintenance", 45, None, "h"),
        plain("Number of Starts Since Last Maintenance", 46, None, ""),
        plain("Operating Days Since Last Maintenance", 47, None, "days"),
    ];

    let mut state = plain("Generator State", 29, None, "");
    state.states = [
        (0, "Stopped"),
        (1, "Cranking"),
        (2, "Warmup"),
        (3, "Running"),
        (4, "Cooldown"),
        (5, "Fault Shutdown"),
    ]
    .iter()
    .map(|(raw, label)| (*raw, label.to_string()))
    .collect();
    registers.push(state);

    registers
}
