// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use std::collections::HashSet;

use anyhow::{Context, Result};
use log::{debug, warn};

use super::{Config, StoreKind};

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./rust_genset_monitor --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema_str = include_str!("../../resources/config.schema.json");

    let schema: serde_json::Value =
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

fn check_url(label: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value).with_context(|| format!("{} is not a valid URL: {}", label, value))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must use http or https: {}", label, value);
    }
    Ok(())
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Controller endpoint**: port in 1-65534, unit id in 1-247, non-empty host
/// - **Register map**: unique names, 1-based addresses, positive scales, canary
///   and engine-speed registers present
/// - **Thresholds**: `min <= max` for every category
/// - **Event table**: 1-based base address, at least one expiry poll
/// - **Endpoints**: store, gateway and heartbeat URLs parse when used
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    let modbus = &config.modbus;
    if modbus.port < 1 || modbus.port > 65534 {
        anyhow::bail!("Invalid Modbus port number: {}", modbus.port);
    }
    if modbus.unit_id == 0 || modbus.unit_id > 247 {
        anyhow::bail!("Invalid Modbus unit id: {}", modbus.unit_id);
    }
    if modbus.host.trim().is_empty() {
        anyhow::bail!("Modbus host is empty");
    }
    if !is_valid_ip_address(&modbus.host) {
        // Host names are legitimate, only note it
        debug!("Modbus host is not an IP literal: {}", modbus.host);
    }
    if modbus.poll_jitter_min_ms > modbus.poll_jitter_max_ms {
        anyhow::bail!(
            "Poll jitter minimum {} ms exceeds maximum {} ms",
            modbus.poll_jitter_min_ms,
            modbus.poll_jitter_max_ms
        );
    }
    if modbus.health_check_interval == 0 {
        anyhow::bail!("Health check interval must be at least one poll");
    }

    let mut names = HashSet::new();
    for register in &config.registers {
        if !names.insert(register.name.as_str()) {
            anyhow::bail!("Register {} is defined twice", register.name);
        }
        if register.address == 0 {
            anyhow::bail!(
                "Register {} has address 0, addresses are 1-based",
                register.name
            );
        }
        if let Some(scale) = register.scale {
            if !(scale.is_finite() && scale > 0.0) {
                anyhow::bail!("Register {} has invalid scale {}", register.name, scale);
            }
        }
    }
    for required in [&modbus.canary_register, &modbus.engine_speed_register] {
        if !names.contains(required.as_str()) {
            anyhow::bail!("Required register '{}' is missing from the register map", required);
        }
    }

    for (category, band) in config.anomaly_thresholds.iter() {
        if band.min > band.max {
            anyhow::bail!(
                "Threshold band for {} has min {} above max {}",
                category,
                band.min,
                band.max
            );
        }
    }

    if config.events.enabled {
        if config.events.base_address == 0 {
            anyhow::bail!("Event table base address must be 1-based");
        }
        let table_end = u32::from(config.events.base_address) + 4 * u32::from(config.events.max_events);
        if table_end > u32::from(u16::MAX) {
            anyhow::bail!(
                "Event table ({} slots from address {}) runs past register 65535",
                config.events.max_events,
                config.events.base_address
            );
        }
        if config.events.expiry_polls == 0 {
            anyhow::bail!("Event expiry must be at least one poll");
        }
    }

    if config.store.kind == StoreKind::Influx {
        check_url("Store URL", &config.store.url)?;
        if config.store.bucket.is_empty() {
            anyhow::bail!("Store bucket is empty");
        }
    }
    if config.agent.enabled && config.agent.ai_enabled {
        check_url("Gateway URL", &config.gateway.url)?;
        if config.gateway.api_key.is_empty() {
            warn!("AI analysis enabled without a gateway API key");
        }
    }
    if config.heartbeat.enabled {
        check_url("Heartbeat URL", &config.heartbeat.url)?;
    }
    if config.agent.rated_power_kw < 0.0 {
        anyhow::bail!("Rated power cannot be negative");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes() {
        assert!(validate_specific_rules(&Config::default()).is_ok());
    }

    #[test]
    fn test_missing_canary_register_is_fatal() {
        let mut config = Config::default();
        config.registers.retain(|r| r.name != "ECM Model");
        let err = validate_specific_rules(&config).unwrap_err();
        assert!(err.to_string().contains("ECM Model"));
    }

    #[test]
    fn test_inverted_threshold_band() {
        let mut config = Config::default();
        config.anomaly_thresholds.set(
            crate::catalog::ThresholdCategory::Voltage,
            crate::config::ThresholdBand::new(500.0, 10.0),
        );
        assert!(validate_specific_rules(&config).is_err());
    }

    #[test]
    fn test_bad_store_url() {
        let mut config = Config::default();
        config.store.url = "influx:8086 nope".to_string();
        assert!(validate_specific_rules(&config).is_err());

        config.store.kind = StoreKind::Memory;
        assert!(validate_specific_rules(&config).is_ok());
    }

    #[test]
    fn test_event_table_must_fit_register_space() {
        let mut config = Config::default();
        config.events.base_address = 65500;
        config.events.max_events = 64;
        assert!(validate_specific_rules(&config).is_err());

        config.events.max_events = 8;
        assert!(validate_specific_rules(&config).is_ok());
    }

    #[test]
    fn test_ip_helper() {
        assert!(is_valid_ip_address("192.168.127.254"));
        assert!(is_valid_ip_address("localhost"));
        assert!(!is_valid_ip_address("controller.local"));
    }
}
