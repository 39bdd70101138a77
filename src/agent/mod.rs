// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Powertrain analysis agent
//!
//! The agent periodically reads the latest metrics written by the poller,
//! keeps the load-band baselines fresh and stores a local analysis for every
//! cycle. When the remote switch is on, the gateway is consulted as well and
//! its answer stored next to the local one.
//!
//! The agent pauses itself while the engine is stopped and resumes on the
//! first cycle that sees it running again. Its state is shared with the
//! liveness task through [`AgentStatus`].

pub mod heartbeat;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::analysis::gateway::{AnalysisGateway, GatewayAnalysis, GatewayRequest};
use crate::analysis::{AnalysisRecord, LocalAnalysis, LocalAnomalyAnalyzer, MetricSnapshot};
use crate::baseline::engine::RATED_POWER_FIELD;
use crate::baseline::{BaselineEngine, FreshnessDecision, Metric};
use crate::config::{AgentConfig, Config};
use crate::error::{TelemetryError, TelemetryResult};
use crate::load_band::LoadBand;
use crate::modbus::Sleeper;
use crate::store::{SeriesQuery, TimeSeriesStore, METRICS_MEASUREMENT};

pub use heartbeat::{run_liveness, Heartbeat, HeartbeatSink, HttpHeartbeatSink};

/// Measurement holding the operator switches written by the backend.
pub const SETTINGS_MEASUREMENT: &str = "ai_global_status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentState {
    Active,
    Paused,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AgentState::Active => "ACTIVE",
            AgentState::Paused => "PAUSED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AiStatus {
    Enabled,
    Disabled,
}

impl fmt::Display for AiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AiStatus::Enabled => "ENABLED",
            AiStatus::Disabled => "DISABLED",
        })
    }
}

/// Flags shared between the analysis loop and the liveness task.
#[derive(Debug)]
pub struct AgentStatus {
    agent_active: AtomicBool,
    ai_enabled: AtomicBool,
    analysis_interval_minutes: AtomicU64,
}

impl AgentStatus {
    pub fn new(ai_enabled: bool, analysis_interval_minutes: u64) -> Self {
        Self {
            agent_active: AtomicBool::new(true),
            ai_enabled: AtomicBool::new(ai_enabled),
            analysis_interval_minutes: AtomicU64::new(analysis_interval_minutes.max(1)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.agent_active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.agent_active.store(active, Ordering::SeqCst);
    }

    pub fn ai_enabled(&self) -> bool {
        self.ai_enabled.load(Ordering::SeqCst)
    }

    pub fn set_ai_enabled(&self, enabled: bool) {
        self.ai_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_interval_minutes.load(Ordering::SeqCst) * 60)
    }

    pub fn set_analysis_interval_minutes(&self, minutes: u64) {
        self.analysis_interval_minutes
            .store(minutes.max(1), Ordering::SeqCst);
    }

    pub fn agent_state(&self) -> AgentState {
        if self.is_active() {
            AgentState::Active
        } else {
            AgentState::Paused
        }
    }

    pub fn ai_status(&self) -> AiStatus {
        if self.ai_enabled() {
            AiStatus::Enabled
        } else {
            AiStatus::Disabled
        }
    }
}

/// What one analysis cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No recent metrics in the store
    NoData,
    /// Engine stopped; the agent is paused
    Paused,
    Analyzed {
        load_band: LoadBand,
        freshness: Option<FreshnessDecision>,
        local: LocalAnalysis,
        gateway: Option<GatewayAnalysis>,
    },
}

pub struct PowertrainAgent {
    store: Arc<dyn TimeSeriesStore>,
    engine: Arc<BaselineEngine>,
    analyzer: LocalAnomalyAnalyzer,
    gateway: Option<Arc<dyn AnalysisGateway>>,
    status: Arc<AgentStatus>,
    config: AgentConfig,
    site_id: String,
    gateway_timeout: Duration,
}

impl PowertrainAgent {
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        engine: Arc<BaselineEngine>,
        status: Arc<AgentStatus>,
        config: AgentConfig,
        site_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            engine,
            analyzer: LocalAnomalyAnalyzer::new(),
            gateway: None,
            status,
            config,
            site_id: site_id.into(),
            gateway_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn TimeSeriesStore>,
        gateway: Option<Arc<dyn AnalysisGateway>>,
    ) -> Self {
        let engine = Arc::new(BaselineEngine::new(
            store.clone(),
            config.agent.baseline.clone(),
            config.agent.rated_power_kw,
        ));
        let status = Arc::new(AgentStatus::new(
            config.agent.ai_enabled,
            config.agent.analysis_interval_minutes,
        ));
        let agent = Self::new(store, engine, status, config.agent.clone(), &config.gateway.site_id)
            .with_gateway_timeout(Duration::from_secs(config.gateway.timeout_secs.max(1)));
        match gateway {
            Some(gateway) => agent.with_gateway(gateway),
            None => agent,
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn AnalysisGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    pub fn status(&self) -> Arc<AgentStatus> {
        self.status.clone()
    }

    pub fn engine(&self) -> &BaselineEngine {
        &self.engine
    }

    /// Latest value of every tracked metric within the snapshot window.
    pub async fn current_snapshot(&self, now: DateTime<Utc>) -> TelemetryResult<Option<MetricSnapshot>> {
        let window = chrono::Duration::seconds(self.config.snapshot_window_secs.max(1));
        let query = SeriesQuery::new(METRICS_MEASUREMENT, now - window, now).fields(
            Metric::ALL
                .iter()
                .map(|m| m.store_field())
                .chain(std::iter::once(RATED_POWER_FIELD)),
        );
        Ok(self
            .store
            .query_latest(&query)
            .await?
            .map(|record| MetricSnapshot::from_record(&record)))
    }

    /// Pick up the remote analysis switch and cadence written by the backend.
    pub async fn refresh_settings(&self, now: DateTime<Utc>) {
        let query = SeriesQuery::new(SETTINGS_MEASUREMENT, now - chrono::Duration::days(7), now)
            .fields(["ai_enabled", "analysis_frequency"]);
        let record = match self.store.query_latest(&query).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                debug!("Could not refresh AI settings: {}", err);
                return;
            }
        };

        let enabled = record
            .fields
            .get("ai_enabled")
            .and_then(|v| v.as_bool().or_else(|| v.as_f64().map(|n| n != 0.0)));
        if let Some(enabled) = enabled {
            if enabled != self.status.ai_enabled() {
                info!("AI analysis {}", if enabled { "enabled" } else { "disabled" });
            }
            self.status.set_ai_enabled(enabled);
        }

        if let Some(minutes) = record.f64("analysis_frequency").filter(|m| *m >= 1.0) {
            let minutes = minutes as u64;
            if self.status.analysis_interval() != Duration::from_secs(minutes * 60) {
                info!("Analysis interval set to {} minute(s)", minutes);
            }
            self.status.set_analysis_interval_minutes(minutes);
        }
    }

    async fn store_record(&self, record: &AnalysisRecord) {
        for point in record.to_points() {
            if let Err(err) = self.store.write_point(&point).await {
                warn!("Failed to store {} analysis: {}", record.kind, err);
            }
        }
    }

    async fn consult_gateway(
        &self,
        gateway: &dyn AnalysisGateway,
        snapshot: &MetricSnapshot,
        load_band: LoadBand,
    ) -> TelemetryResult<GatewayAnalysis> {
        debug!("Requesting gateway analysis for {} load band", load_band);
        let request = GatewayRequest::new(&self.site_id, snapshot.to_metric_map(), true);
        match tokio::time::timeout(self.gateway_timeout, gateway.analyze(&request)).await {
            Ok(result) => result,
            Err(_) => Err(TelemetryError::GatewayTimeout {
                seconds: self.gateway_timeout.as_secs(),
            }),
        }
    }

    /// One analysis cycle at `now`.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleOutcome {
        let snapshot = match self.current_snapshot(now).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                if self.status.is_active() {
                    info!("No recent metrics, pausing agent");
                    self.status.set_active(false);
                }
                return CycleOutcome::NoData;
            }
            Err(err) => {
                warn!("Failed to read current metrics: {}", err);
                return CycleOutcome::NoData;
            }
        };

        let engine_speed = snapshot.engine_speed();
        if engine_speed <= 0.0 {
            if self.status.is_active() {
                info!("Engine stopped, pausing agent");
                self.status.set_active(false);
            }
            return CycleOutcome::Paused;
        }
        if !self.status.is_active() {
            info!("Engine running at {:.0} RPM, resuming agent", engine_speed);
            self.status.set_active(true);
        }

        let load_band = snapshot.load_band(self.config.rated_power_kw);
        let freshness = match self.engine.ensure_fresh(load_band, now).await {
            Ok(decision) => Some(decision),
            Err(err) => {
                warn!("Baseline check failed: {}", err);
                None
            }
        };
        let baseline = match self.engine.repository().load_latest(load_band, now).await {
            Ok(baseline) => baseline.filter(|b| !b.is_placeholder()),
            Err(err) => {
                warn!("Failed to load baseline for {}: {}", load_band, err);
                None
            }
        };

        let local = self.analyzer.analyze(&snapshot, baseline.as_ref(), load_band);
        for insight in &local.insights {
            debug!("{}", insight);
        }
        let ai_enabled = self.status.ai_enabled();
        self.store_record(&AnalysisRecord::local(&local, &snapshot, true, ai_enabled))
            .await;

        let mut gateway_result = None;
        if ai_enabled {
            if let Some(gateway) = &self.gateway {
                match self.consult_gateway(gateway.as_ref(), &snapshot, load_band).await {
                    Ok(analysis) => {
                        self.store_record(&AnalysisRecord::gateway(&analysis, &snapshot, load_band, true))
                            .await;
                        gateway_result = Some(analysis);
                    }
                    Err(err) => warn!("Gateway analysis failed, keeping local result: {}", err),
                }
            }
        }

        info!(
            "Analysis cycle complete: {} load band, level {}",
            load_band, local.alert_level
        );
        CycleOutcome::Analyzed {
            load_band,
            freshness,
            local,
            gateway: gateway_result,
        }
    }

    /// Run cycles until `running` is cleared.
    pub async fn run(&self, running: Arc<AtomicBool>, sleeper: Arc<dyn Sleeper>) {
        info!("Powertrain agent started");
        let paused_check = Duration::from_secs(self.config.paused_check_secs.max(1));
        while running.load(Ordering::SeqCst) {
            let now = Utc::now();
            self.refresh_settings(now).await;
            let delay = match self.run_cycle(now).await {
                CycleOutcome::Analyzed { .. } => self.status.analysis_interval(),
                CycleOutcome::Paused | CycleOutcome::NoData => paused_check,
            };
            sleeper.sleep(delay).await;
        }
        info!("Powertrain agent stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::gateway::MockAnalysisGateway;
    use crate::analysis::record::ANALYSIS_MEASUREMENT;
    use crate::config::BaselineConfig;
    use crate::store::{MemoryStore, Point};

    async fn seeded_store(speed: f64, now: DateTime<Utc>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .write_point(
                &Point::new(METRICS_MEASUREMENT)
                    .field("Engine_Speed", speed)
                    .field("Engine_Oil_Pressure", 410.0)
                    .field("Generator_Total_Real_Power", 70.0)
                    .at(now - chrono::Duration::seconds(30)),
            )
            .await
            .unwrap();
        store
    }

    fn agent(store: Arc<MemoryStore>, ai_enabled: bool) -> PowertrainAgent {
        let engine = Arc::new(BaselineEngine::new(store.clone(), BaselineConfig::default(), 150.0));
        let status = Arc::new(AgentStatus::new(ai_enabled, 5));
        PowertrainAgent::new(store, engine, status, AgentConfig::default(), "site-test")
    }

    async fn analysis_types(store: &MemoryStore) -> Vec<String> {
        store
            .points(ANALYSIS_MEASUREMENT)
            .await
            .into_iter()
            .filter_map(|p| p.tags.get("analysis_type").cloned())
            .collect()
    }

    #[tokio::test]
    async fn test_gateway_failure_falls_back_to_local() {
        let now = Utc::now();
        let store = seeded_store(1800.0, now).await;
        let mut gateway = MockAnalysisGateway::new();
        gateway
            .expect_analyze()
            .times(1)
            .returning(|_| Err(TelemetryError::GatewayTimeout { seconds: 30 }));
        let agent = agent(store.clone(), true).with_gateway(Arc::new(gateway));

        let outcome = agent.run_cycle(now).await;
        match outcome {
            CycleOutcome::Analyzed {
                load_band, gateway, ..
            } => {
                assert_eq!(load_band, LoadBand::Band60To80);
                assert!(gateway.is_none());
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(analysis_types(&store).await, vec!["LOCAL".to_string()]);
    }

    #[tokio::test]
    async fn test_gateway_result_is_stored() {
        let now = Utc::now();
        let store = seeded_store(1800.0, now).await;
        let mut gateway = MockAnalysisGateway::new();
        gateway
            .expect_analyze()
            .withf(|request| request.site_id == "site-test" && request.metrics["engine_speed"] == 1800.0)
            .returning(|_| {
                Ok(GatewayAnalysis {
                    summary: Some("Nominal".into()),
                    ..GatewayAnalysis::default()
                })
            });
        let agent = agent(store.clone(), true).with_gateway(Arc::new(gateway));

        agent.run_cycle(now).await;
        assert_eq!(
            analysis_types(&store).await,
            vec!["LOCAL".to_string(), "GATEWAY".to_string()]
        );
    }

    #[tokio::test]
    async fn test_gateway_skipped_when_ai_disabled() {
        let now = Utc::now();
        let store = seeded_store(1800.0, now).await;
        let mut gateway = MockAnalysisGateway::new();
        gateway.expect_analyze().never();
        let agent = agent(store.clone(), false).with_gateway(Arc::new(gateway));

        assert!(matches!(agent.run_cycle(now).await, CycleOutcome::Analyzed { .. }));
        assert_eq!(analysis_types(&store).await, vec!["LOCAL".to_string()]);
    }

    #[tokio::test]
    async fn test_pause_and_resume() {
        let now = Utc::now();
        let store = seeded_store(0.0, now).await;
        let agent = agent(store.clone(), false);

        assert_eq!(agent.run_cycle(now).await, CycleOutcome::Paused);
        assert_eq!(agent.status().agent_state(), AgentState::Paused);
        assert!(store.points(ANALYSIS_MEASUREMENT).await.is_empty());

        store
            .write_point(
                &Point::new(METRICS_MEASUREMENT)
                    .field("Engine_Speed", 1500.0)
                    .at(now),
            )
            .await
            .unwrap();
        assert!(matches!(agent.run_cycle(now).await, CycleOutcome::Analyzed { .. }));
        assert_eq!(agent.status().agent_state(), AgentState::Active);
    }

    #[tokio::test]
    async fn test_no_data_pauses() {
        let agent = agent(Arc::new(MemoryStore::new()), false);
        assert_eq!(agent.run_cycle(Utc::now()).await, CycleOutcome::NoData);
        assert!(!agent.status().is_active());
    }

    #[tokio::test]
    async fn test_refresh_settings() {
        let now = Utc::now();
        let store = Arc::new(MemoryStore::new());
        store
            .write_point(
                &Point::new(SETTINGS_MEASUREMENT)
                    .field("ai_enabled", true)
                    .field("analysis_frequency", 15i64)
                    .at(now - chrono::Duration::hours(1)),
            )
            .await
            .unwrap();
        let agent = agent(store, false);
        agent.refresh_settings(now).await;
        assert_eq!(agent.status().ai_status(), AiStatus::Enabled);
        assert_eq!(agent.status().analysis_interval(), Duration::from_secs(900));
    }
}
