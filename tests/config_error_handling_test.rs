// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use rust_genset_monitor::config::Config;
use std::fs;
use std::path::Path;
use std::sync::Once;
use tempfile::tempdir;

static INIT: Once = Once::new();

// Setup logger for tests
fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

#[test]
fn test_config_type_error_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Valid YAML, wrong types
    let invalid_yaml = r#"
modbus:
  host: 12345
  port: "not-an-integer"
  framing: serial
"#;
    fs::write(&config_path, invalid_yaml)?;

    let result = Config::from_file(&config_path);
    assert!(result.is_err(), "Config loading should have failed");

    let sample_path = config_path.with_extension("sample.yaml");
    assert!(Path::new(&sample_path).exists(), "Sample config file was not created");

    // The sample holds the defaults and loads cleanly
    let sample_config = Config::from_file(&sample_path)?;
    assert_eq!(sample_config.modbus.port, 502);

    Ok(())
}

#[test]
fn test_config_out_of_range_port_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, "modbus:\n  port: 99999\n")?;

    let err = Config::from_file(&config_path).unwrap_err();
    assert!(err.to_string().contains("validation"));
    assert!(config_path.with_extension("sample.yaml").exists());

    Ok(())
}

#[test]
fn test_config_rule_violation_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Schema-valid, but the canary register is missing from the map
    let yaml = r#"
registers:
  - name: Engine Speed
    address: 2
    units: RPM
"#;
    fs::write(&config_path, yaml)?;

    let err = Config::from_file(&config_path).unwrap_err();
    assert!(err.to_string().contains("missing"));
    assert!(config_path.with_extension("sample.yaml").exists());

    Ok(())
}

#[test]
fn test_malformed_yaml_is_rejected() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, "modbus: [unterminated\n")?;

    assert!(Config::from_file(&config_path).is_err());
    // The original file is left untouched
    assert_eq!(fs::read_to_string(&config_path)?, "modbus: [unterminated\n");

    Ok(())
}

#[test]
fn test_from_yaml_str_without_origin_writes_nothing() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let result = Config::from_yaml_str("modbus:\n  port: 0\n", None);
    assert!(result.is_err());
    assert_eq!(fs::read_dir(temp_dir.path())?.count(), 0);
    Ok(())
}
