// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus client configuration
//!
//! This module defines how the monitor reaches the generator controller:
//! network endpoint, framing, retry budgets and polling cadence.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Frame format spoken on the TCP link.
///
/// Serial-to-Ethernet gateways in front of generator controllers often pass
/// raw RTU frames through a TCP socket instead of speaking Modbus TCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    Tcp,
    RtuOverTcp,
}

/// Configuration for the Modbus link to the generator controller.
///
/// # Example
///
/// ```
/// use rust_genset_monitor::config::ModbusConfig;
///
/// let modbus = ModbusConfig {
///     host: "10.0.0.20".to_string(),
///     port: 4001,
///     ..ModbusConfig::default()
/// };
/// assert_eq!(modbus.unit_id, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModbusConfig {
    /// Controller (or serial gateway) host name or IP address.
    pub host: String,

    /// TCP port, 502 for native Modbus TCP.
    pub port: u16,

    /// Modbus unit identifier of the controller.
    pub unit_id: u8,

    pub framing: Framing,

    /// Timeout applied to every single request.
    pub timeout_ms: u64,

    /// Attempts at reading the canary register after the transport opened.
    pub canary_retries: u32,
    pub canary_retry_delay_ms: u64,

    /// Attempts for each register read before the register is skipped for the cycle.
    pub read_retries: u32,
    pub read_retry_delay_ms: u64,

    /// Reconnect delay for the first failed attempt, doubled on each failure.
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,

    /// Give up connecting after this many attempts. Unbounded when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connect_attempts: Option<u32>,

    /// Number of poll cycles between two health checks.
    pub health_check_interval: u64,

    pub poll_interval_ms: u64,
    pub poll_jitter_min_ms: u64,
    pub poll_jitter_max_ms: u64,

    /// Consecutive transport failures that demote a live connection.
    pub max_consecutive_failures: u32,

    /// Identity register read to prove the link works.
    pub canary_register: String,

    /// Register read first on every cycle and used for health checks.
    pub engine_speed_register: String,
}

impl ModbusConfig {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            host: "192.168.127.254".to_string(), // Factory address of the serial gateway
            port: 502,                           // Standard Modbus TCP port
            unit_id: 1,
            framing: Framing::RtuOverTcp,
            timeout_ms: 1000,
            canary_retries: 5,
            canary_retry_delay_ms: 100,
            read_retries: 5,
            read_retry_delay_ms: 200,
            backoff_base_secs: 5,
            backoff_max_secs: 60,
            max_connect_attempts: None,
            health_check_interval: 10,
            poll_interval_ms: 2000,
            poll_jitter_min_ms: 200,
            poll_jitter_max_ms: 800,
            max_consecutive_failures: 5,
            canary_register: "ECM Model".to_string(),
            engine_speed_register: "Engine Speed".to_string(),
        }
    }
}
