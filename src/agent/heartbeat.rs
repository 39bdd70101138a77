// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Liveness reporting
//!
//! Runs independently of the analysis loop and only reads the shared
//! [`AgentStatus`] flags. Delivery is fire-and-forget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error};
use serde::Serialize;

use super::{AgentState, AgentStatus, AiStatus};
use crate::config::HeartbeatConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::modbus::Sleeper;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub agent_state: AgentState,
    pub ai_status: AiStatus,
    pub timestamp: DateTime<Utc>,
}

impl Heartbeat {
    pub fn from_status(agent_id: impl Into<String>, status: &AgentStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_state: status.agent_state(),
            ai_status: status.ai_status(),
            timestamp,
        }
    }
}

#[async_trait]
pub trait HeartbeatSink: Send + Sync {
    async fn post_heartbeat(&self, heartbeat: &Heartbeat) -> TelemetryResult<()>;
}

/// Posts heartbeats to `{backend}/api/agent-heartbeat`.
#[derive(Debug, Clone)]
pub struct HttpHeartbeatSink {
    url: String,
    client: reqwest::Client,
    timeout_seconds: u64,
}

impl HttpHeartbeatSink {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            url: backend_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout_seconds: 2,
        }
    }

    pub fn from_config(config: &HeartbeatConfig) -> Self {
        Self::new(&config.url).with_timeout_seconds(config.timeout_secs)
    }

    /// Set HTTP request timeout (1-60 s)
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds.clamp(1, 60);
        self
    }
}

#[async_trait]
impl HeartbeatSink for HttpHeartbeatSink {
    async fn post_heartbeat(&self, heartbeat: &Heartbeat) -> TelemetryResult<()> {
        let response = self
            .client
            .post(format!("{}/api/agent-heartbeat", self.url))
            .json(heartbeat)
            .timeout(Duration::from_secs(self.timeout_seconds))
            .send()
            .await
            .map_err(|e| TelemetryError::Heartbeat(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TelemetryError::Heartbeat(format!("HTTP {}", response.status())))
        }
    }
}

/// Post a heartbeat every `interval` until `running` is cleared.
pub async fn run_liveness(
    sink: Arc<dyn HeartbeatSink>,
    status: Arc<AgentStatus>,
    agent_id: String,
    interval: Duration,
    running: Arc<AtomicBool>,
    sleeper: Arc<dyn Sleeper>,
) {
    while running.load(Ordering::SeqCst) {
        let heartbeat = Heartbeat::from_status(agent_id.as_str(), &status, Utc::now());
        match sink.post_heartbeat(&heartbeat).await {
            Ok(()) => debug!(
                "Heartbeat sent: {} / AI {}",
                heartbeat.agent_state, heartbeat.ai_status
            ),
            Err(err) => error!("Heartbeat post failed: {}", err),
        }
        sleeper.sleep(interval).await;
    }
    debug!("Liveness task stopped");
}
