// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use rust_genset_monitor::config::{Config, Framing, StoreKind};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_config_load_and_save() -> Result<()> {
    // Create a temporary directory
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Create a custom config
    let mut config = Config::default();
    config.modbus.host = "10.0.0.42".to_string();
    config.modbus.port = 5020;
    config.modbus.framing = Framing::Tcp;
    config.store.kind = StoreKind::Memory;
    config.agent.rated_power_kw = 200.0;

    // Save config to file
    config.save_to_file(&config_path)?;

    // Load config from file
    let loaded_config = Config::from_file(&config_path)?;

    // Verify loaded config matches original
    assert_eq!(loaded_config.modbus.host, "10.0.0.42");
    assert_eq!(loaded_config.modbus.port, 5020);
    assert_eq!(loaded_config.modbus.framing, Framing::Tcp);
    assert_eq!(loaded_config.store.kind, StoreKind::Memory);
    assert_eq!(loaded_config.agent.rated_power_kw, 200.0);
    assert_eq!(loaded_config.registers.len(), config.registers.len());

    // Test loading default config for non-existent file
    let non_existent_path = temp_dir.path().join("non_existent.yaml");
    let default_config = Config::from_file(&non_existent_path)?;

    // Verify default config was created
    assert!(non_existent_path.exists());
    assert_eq!(default_config.modbus.port, 502);
    assert_eq!(default_config.modbus.framing, Framing::RtuOverTcp);

    Ok(())
}

#[test]
fn test_partial_file_uses_defaults() -> Result<()> {
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(
        &config_path,
        "modbus:\n  host: 172.16.0.9\nagent:\n  ai_enabled: true\n",
    )?;

    let config = Config::from_file(&config_path)?;
    assert_eq!(config.modbus.host, "172.16.0.9");
    assert_eq!(config.modbus.port, 502);
    assert!(config.agent.ai_enabled);
    assert_eq!(config.agent.analysis_interval_minutes, 5);
    assert_eq!(config.registers, Config::default().registers);
    Ok(())
}

#[test]
fn test_apply_args() {
    let mut config = Config::default();
    assert_eq!(config.modbus.port, 502);

    // Apply command-line arguments
    config.apply_args(
        Some("192.168.0.1".to_string()),
        Some(1502),
        Some(7),
        Some("http://influx:8086".to_string()),
        Some("token".to_string()),
        None,
        Some("plant".to_string()),
        Some("http://gateway:8000".to_string()),
        None,
        Some(true),
        None,
    );

    // Verify values were overridden
    assert_eq!(config.modbus.host, "192.168.0.1");
    assert_eq!(config.modbus.port, 1502);
    assert_eq!(config.modbus.unit_id, 7);
    assert_eq!(config.store.url, "http://influx:8086");
    assert_eq!(config.store.token, "token");
    assert_eq!(config.store.bucket, "plant");
    assert_eq!(config.gateway.url, "http://gateway:8000");
    assert!(config.agent.ai_enabled);

    // Unset arguments keep the loaded values
    let defaults = Config::default();
    assert_eq!(config.store.org, defaults.store.org);
    assert_eq!(config.gateway.api_key, defaults.gateway.api_key);
    assert_eq!(config.heartbeat.url, defaults.heartbeat.url);
}

#[test]
fn test_config_validation() -> Result<()> {
    // Valid config
    assert!(Config::default().validate().is_ok());

    // Invalid port (schema allows 1-65534)
    let mut invalid_port_config = Config::default();
    invalid_port_config.modbus.port = 0;
    assert!(invalid_port_config.validate().is_err());

    // Canary register must be part of the register map
    let mut missing_canary = Config::default();
    let canary = missing_canary.modbus.canary_register.clone();
    missing_canary.registers.retain(|r| r.name != canary);
    assert!(missing_canary.validate().is_err());

    // Store URL must be http(s)
    let mut bad_store = Config::default();
    bad_store.store.url = "ftp://influx".to_string();
    assert!(bad_store.validate().is_err());

    Ok(())
}
