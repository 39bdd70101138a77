// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Analysis agent, remote gateway, baseline and heartbeat configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of the baseline computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineConfig {
    /// Samples needed in a band for a full-confidence baseline.
    pub min_samples: usize,

    /// History window fed to a recomputation.
    pub history_days: i64,

    /// Baselines older than this are recomputed.
    pub max_age_days: i64,

    /// How far back stored baselines and status records are searched.
    pub lookback_days: i64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            history_days: 30,
            max_age_days: 7,
            lookback_days: 180,
        }
    }
}

/// Settings of the analysis agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub enabled: bool,

    /// Initial state of the remote analysis switch, refreshed from the store.
    pub ai_enabled: bool,

    pub analysis_interval_minutes: u64,

    /// Re-check period while the engine is stopped.
    pub paused_check_secs: u64,

    /// Used when the controller does not report `Genset kW Rating`.
    pub rated_power_kw: f64,

    /// Age limit of the live snapshot read from the store.
    pub snapshot_window_secs: i64,

    pub baseline: BaselineConfig,
}

impl AgentConfig {
    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_minutes * 60)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ai_enabled: false,
            analysis_interval_minutes: 5,
            paused_check_secs: 10,
            rated_power_kw: 150.0,
            snapshot_window_secs: 300,
            baseline: BaselineConfig::default(),
        }
    }
}

/// Remote analysis gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub url: String,
    pub api_key: String,
    pub site_id: String,
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            site_id: "site-001".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Liveness reporting towards the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub url: String,
    pub agent_id: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "http://localhost:8000".to_string(),
            agent_id: "powertrain-agent".to_string(),
            interval_secs: 10,
            timeout_secs: 2,
        }
    }
}
