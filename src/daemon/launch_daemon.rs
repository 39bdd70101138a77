// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::{Context, Result};
use log::{debug, error, info};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::agent::{run_liveness, HttpHeartbeatSink, PowertrainAgent};
use crate::analysis::{AnalysisGateway, GatewayClient};
use crate::catalog::RegisterCatalog;
use crate::config::{Config, StoreKind};
use crate::modbus::{ConnectionManager, ConnectionSettings, Sleeper, TcpConnector, TokioSleeper};
use crate::poller::Poller;
use crate::store::{InfluxStore, MemoryStore, TimeSeriesStore};

/// Represents a daemon task that can be started and managed
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    store: Option<Arc<dyn TimeSeriesStore>>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            store: None,
        }
    }

    /// Shared shutdown flag of every task
    pub fn running(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Store the tasks write to, once launched
    pub fn store(&self) -> Option<Arc<dyn TimeSeriesStore>> {
        self.store.clone()
    }

    /// Launch all configured tasks based on configuration
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        config.validate().context("Refusing to start with an invalid configuration")?;
        let store = Self::build_store(config);
        self.store = Some(store.clone());

        self.start_poller(config, store.clone())?;

        if config.agent.enabled {
            self.start_agent(config, store)?;
        } else {
            info!("Analysis agent disabled");
        }

        Ok(())
    }

    fn build_store(config: &Config) -> Arc<dyn TimeSeriesStore> {
        match config.store.kind {
            StoreKind::Influx => {
                info!(
                    "Writing to InfluxDB at {} (bucket {})",
                    config.store.url, config.store.bucket
                );
                Arc::new(InfluxStore::from_config(&config.store))
            }
            StoreKind::Memory => {
                info!("Using the in-memory store, data is not persisted");
                Arc::new(MemoryStore::new())
            }
        }
    }

    fn sleeper(&self) -> Arc<dyn Sleeper> {
        Arc::new(TokioSleeper::interruptible(self.running.clone()))
    }

    /// Start the register polling task
    fn start_poller(&mut self, config: &Config, store: Arc<dyn TimeSeriesStore>) -> Result<()> {
        let catalog = Arc::new(RegisterCatalog::from_config(config)?);
        info!(
            "Starting register poller for {} ({} registers)",
            config.modbus.socket_address(),
            catalog.len()
        );

        let mut conn = ConnectionManager::new(
            Arc::new(TcpConnector::from_config(&config.modbus)),
            self.sleeper(),
            ConnectionSettings::from_config(&config.modbus, &catalog),
        );
        let mut poller = Poller::from_config(config, catalog, store);

        let running = self.running.clone();
        let task = tokio::spawn(async move {
            let result = poller.run(&mut conn, running.clone()).await;
            if result.is_err() {
                // a poller that gave up takes the daemon down with it
                running.store(false, Ordering::SeqCst);
            }
            result.map_err(anyhow::Error::from)
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start the analysis agent and its liveness reporter
    fn start_agent(&mut self, config: &Config, store: Arc<dyn TimeSeriesStore>) -> Result<()> {
        let gateway: Arc<dyn AnalysisGateway> = Arc::new(GatewayClient::from_config(&config.gateway));
        let agent = PowertrainAgent::from_config(config, store, Some(gateway));
        let status = agent.status();

        info!(
            "Starting powertrain agent (every {} min, AI {})",
            config.agent.analysis_interval_minutes,
            status.ai_status()
        );
        let running = self.running.clone();
        let sleeper = self.sleeper();
        let task = tokio::spawn(async move {
            agent.run(running, sleeper).await;
            Ok(())
        });
        self.tasks.push(task);

        if config.heartbeat.enabled {
            debug!("Starting heartbeat towards {}", config.heartbeat.url);
            let sink = Arc::new(HttpHeartbeatSink::from_config(&config.heartbeat));
            let agent_id = config.heartbeat.agent_id.clone();
            let interval = Duration::from_secs(config.heartbeat.interval_secs.max(1));
            let running = self.running.clone();
            let sleeper = self.sleeper();
            let task = tokio::spawn(async move {
                run_liveness(sink, status, agent_id, interval, running, sleeper).await;
                Ok(())
            });
            self.tasks.push(task);
        }

        Ok(())
    }

    /// Whether every task is still expected to run
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop all running tasks
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete
    pub async fn join(self) -> Result<()> {
        let mut first_error = None;
        for task in self.tasks {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Task failed: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) => error!("Task panicked: {}", e),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
