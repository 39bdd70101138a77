// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the generator monitor
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration is backed by a YAML file and
//! validated against a JSON schema before it is deserialized.
//!
//! ## Configuration Structure
//!
//! - `modbus`: Link to the generator controller, retry budgets and poll cadence
//! - `registers`: Register map of the controller
//! - `anomaly_thresholds`: Plausibility band per register category
//! - `events`: Active event table layout, descriptions and ignore list
//! - `store`: Time-series store receiving readings, events and baselines
//! - `gateway`: Remote analysis gateway
//! - `agent`: Analysis loop and baseline computation
//! - `heartbeat`: Liveness reporting
//!
//! ## Usage
//!
//! ```no_run
//! use rust_genset_monitor::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("10.0.0.20".to_string()),          // Modbus host
//!     Some(502),                              // Modbus port
//!     None,                                   // Unit id
//!     Some("http://influx:8086".to_string()), // Store URL
//!     None,                                   // Store token
//!     None,                                   // Store org
//!     None,                                   // Store bucket
//!     None,                                   // Gateway URL
//!     None,                                   // Gateway API key
//!     Some(true),                             // AI enabled
//!     None,                                   // Heartbeat backend URL
//! );
//!
//! println!("Controller: {}", config.modbus.socket_address());
//! ```

pub mod agent;
pub mod modbus;
pub mod registers;
pub mod store;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use agent::{AgentConfig, BaselineConfig, GatewayConfig, HeartbeatConfig};
pub use modbus::{Framing, ModbusConfig};
pub use registers::{AnomalyThresholds, EventsConfig, RegisterConfig, ThresholdBand};
pub use store::{StoreConfig, StoreKind};
pub use utils::{is_valid_ip_address, output_config_schema};

fn default_registers() -> Vec<RegisterConfig> {
    crate::catalog::default_register_configs()
}

/// Root configuration structure of the monitor.
///
/// Each section uses default values when not explicitly specified in the
/// configuration file, so a file containing only the controller address is
/// a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Connection to the generator controller.
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Register map. Defaults to the Decision-Maker 3500 layout.
    #[serde(default = "default_registers")]
    pub registers: Vec<RegisterConfig>,

    #[serde(default)]
    pub anomaly_thresholds: AnomalyThresholds,

    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modbus: ModbusConfig::default(),
            registers: default_registers(),
            anomaly_thresholds: AnomalyThresholds::default(),
            events: EventsConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        Self::from_yaml_str(&contents, Some(path))
    }

    /// Validate and deserialize a YAML document.
    ///
    /// When `origin` is given, a sample file with default values is written
    /// next to it on failure.
    pub fn from_yaml_str(contents: &str, origin: Option<&Path>) -> Result<Self> {
        let on_failure = |reason: &str| {
            error!("{}", reason);
            if let Some(path) = origin {
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
            }
        };

        let yaml_value: serde_yml::Value =
            serde_yml::from_str(contents).context("Failed to parse YAML configuration")?;

        let json_value = serde_json::to_value(&yaml_value)
            .context("Failed to convert YAML to JSON for validation")?;

        let validator = schema_validator()?;
        debug!("Validating configuration against schema");
        if let Err(error) = validator.validate(&json_value) {
            on_failure("Configuration validation error before deserialization");
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_yml::from_str(contents) {
            Ok(config) => config,
            Err(err) => {
                on_failure("Configuration deserialization error");
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration: {}",
                    err
                ));
            }
        };

        if let Err(err) = utils::validate_specific_rules(&config) {
            on_failure("Configuration specific validation error");
            return Err(err);
        }

        Ok(config)
    }

    /// Run schema and rule validation on an in-memory configuration.
    pub fn validate(&self) -> Result<()> {
        let json_value =
            serde_json::to_value(self).context("Failed to serialize configuration to JSON")?;
        let validator = schema_validator()?;
        if let Err(error) = validator.validate(&json_value) {
            anyhow::bail!("Configuration validation failed: {}", error);
        }
        utils::validate_specific_rules(self)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only values explicitly provided (on the command line or through the
    /// matching environment variable) override the loaded configuration.
    ///
    /// # Parameters
    ///
    /// * `modbus_host` - Controller or serial gateway address
    /// * `modbus_port` - Controller TCP port
    /// * `unit_id` - Modbus unit identifier
    /// * `store_url` - InfluxDB base URL
    /// * `store_token` - InfluxDB API token
    /// * `store_org` - InfluxDB organisation
    /// * `store_bucket` - InfluxDB bucket
    /// * `gateway_url` - Remote analysis gateway base URL
    /// * `gateway_api_key` - Remote analysis gateway key
    /// * `ai_enabled` - Initial remote analysis switch
    /// * `heartbeat_url` - Backend receiving heartbeats
    #[allow(clippy::too_many_arguments)]
    pub fn apply_args(
        &mut self,
        modbus_host: Option<String>,
        modbus_port: Option<u16>,
        unit_id: Option<u8>,
        store_url: Option<String>,
        store_token: Option<String>,
        store_org: Option<String>,
        store_bucket: Option<String>,
        gateway_url: Option<String>,
        gateway_api_key: Option<String>,
        ai_enabled: Option<bool>,
        heartbeat_url: Option<String>,
    ) {
        if let Some(host) = modbus_host {
            debug!("Overriding Modbus host from command line: {}", host);
            self.modbus.host = host;
        }
        if let Some(port) = modbus_port {
            debug!("Overriding Modbus port from command line: {}", port);
            self.modbus.port = port;
        }
        if let Some(unit_id) = unit_id {
            debug!("Overriding Modbus unit id from command line: {}", unit_id);
            self.modbus.unit_id = unit_id;
        }

        if let Some(url) = store_url {
            debug!("Overriding store URL from command line: {}", url);
            self.store.url = url;
        }
        if let Some(token) = store_token {
            debug!("Overriding store token from command line");
            self.store.token = token;
        }
        if let Some(org) = store_org {
            debug!("Overriding store org from command line: {}", org);
            self.store.org = org;
        }
        if let Some(bucket) = store_bucket {
            debug!("Overriding store bucket from command line: {}", bucket);
            self.store.bucket = bucket;
        }

        if let Some(url) = gateway_url {
            debug!("Overriding gateway URL from command line: {}", url);
            self.gateway.url = url;
        }
        if let Some(key) = gateway_api_key {
            debug!("Overriding gateway API key from command line");
            self.gateway.api_key = key;
        }
        if let Some(enabled) = ai_enabled {
            debug!("Overriding AI analysis switch from command line: {}", enabled);
            self.agent.ai_enabled = enabled;
        }
        if let Some(url) = heartbeat_url {
            debug!("Overriding heartbeat backend from command line: {}", url);
            self.heartbeat.url = url;
        }
    }
}

fn schema_validator() -> Result<jsonschema::Validator> {
    let schema_str = include_str!("../../resources/config.schema.json");
    let schema: serde_json::Value = serde_json::from_str(schema_str).with_context(|| {
        debug!("JSON schema string: {}", schema_str);
        "Failed to parse JSON schema"
    })?;

    let validator = jsonschema::draft202012::options()
        .should_validate_formats(true)
        .build(&schema)?;
    Ok(validator)
}
