// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Time-series store configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// InfluxDB 2.x over its HTTP API
    Influx,
    /// Process-local store, nothing survives a restart
    Memory,
}

/// Configuration of the time-series store readings are written to.
///
/// # Fields
///
/// * `kind` - Backend selection
/// * `url` - Base URL of the InfluxDB server
/// * `token` - API token sent as `Authorization: Token ...`
/// * `org` - Organisation owning the bucket
/// * `bucket` - Bucket receiving every measurement
/// * `timeout_secs` - HTTP timeout for writes and queries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Influx,
            url: "http://localhost:8086".to_string(),
            token: String::new(),
            org: "mlr".to_string(),
            bucket: "generator".to_string(),
            timeout_secs: 10,
        }
    }
}
