// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Connection state machine for the controller link
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──canary ok──▶ Connected
//!      ▲                        │                        │
//!      │                  canary/transport          health check failed or
//!      │                      failure               repeated transport faults
//!      │                        ▼                        ▼
//!      └──────────────────── Disconnected ◀──disconnect── Degraded
//! ```
//!
//! A transport that opens but cannot serve the canary (identity) register is
//! not considered connected. Every attempt, failure and scheduled retry is
//! logged and forwarded to an optional listener.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::backoff::{BackoffPolicy, RetryPolicy, Sleeper};
use super::bus::{BusConnector, RegisterBus};
use crate::catalog::RegisterCatalog;
use crate::config::ModbusConfig;
use crate::error::{TelemetryError, TelemetryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Link still open but no longer trusted; must be torn down and reopened
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Degraded => "DEGRADED",
        };
        f.write_str(label)
    }
}

/// Status notifications published by the [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Attempt { attempt: u32, target: String },
    Connected { attempt: u32, identity: u16 },
    AttemptFailed { attempt: u32, reason: String },
    RetryScheduled { attempt: u32, delay: Duration },
    HealthCheckFailed { reason: String },
    Demoted { consecutive_failures: u32 },
    Disconnected,
}

pub type ConnectionListener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Tunables of the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// 0-based offset of the identity register
    pub canary_offset: u16,
    /// 0-based offset of the engine-speed register
    pub health_offset: u16,
    pub canary_retry: RetryPolicy,
    pub read_retry: RetryPolicy,
    pub backoff: BackoffPolicy,
    pub max_attempts: Option<u32>,
    pub max_consecutive_failures: u32,
}

impl ConnectionSettings {
    pub fn from_config(modbus: &ModbusConfig, catalog: &RegisterCatalog) -> Self {
        Self {
            canary_offset: catalog.canary().offset(),
            health_offset: catalog.engine_speed().offset(),
            canary_retry: RetryPolicy::new(
                modbus.canary_retries,
                Duration::from_millis(modbus.canary_retry_delay_ms),
            ),
            read_retry: RetryPolicy::new(
                modbus.read_retries,
                Duration::from_millis(modbus.read_retry_delay_ms),
            ),
            backoff: BackoffPolicy::new(
                Duration::from_secs(modbus.backoff_base_secs),
                Duration::from_secs(modbus.backoff_max_secs),
            ),
            max_attempts: modbus.max_connect_attempts,
            max_consecutive_failures: modbus.max_consecutive_failures.max(1),
        }
    }
}

/// Owner of the controller link.
pub struct ConnectionManager {
    connector: Arc<dyn BusConnector>,
    sleeper: Arc<dyn Sleeper>,
    settings: ConnectionSettings,
    state: ConnectionState,
    bus: Option<Box<dyn RegisterBus>>,
    failed_attempts: u32,
    consecutive_failures: u32,
    identity: Option<u16>,
    listener: Option<ConnectionListener>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("target", &self.connector.describe())
            .field("state", &self.state)
            .field("failed_attempts", &self.failed_attempts)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("identity", &self.identity)
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn BusConnector>,
        sleeper: Arc<dyn Sleeper>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            connector,
            sleeper,
            settings,
            state: ConnectionState::Disconnected,
            bus: None,
            failed_attempts: 0,
            consecutive_failures: 0,
            identity: None,
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: ConnectionListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Value read from the canary register on the last successful connect.
    pub fn identity(&self) -> Option<u16> {
        self.identity
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn sleeper(&self) -> Arc<dyn Sleeper> {
        self.sleeper.clone()
    }

    pub fn needs_reconnect(&self) -> bool {
        self.state != ConnectionState::Connected
    }

    fn emit(&self, event: ConnectionEvent) {
        if let Some(listener) = &self.listener {
            listener(&event);
        }
    }

    /// Connect, retrying with backoff until success, shutdown or the attempt cap.
    pub async fn connect(&mut self, running: &AtomicBool) -> TelemetryResult<u16> {
        loop {
            if !running.load(Ordering::SeqCst) {
                return Err(TelemetryError::Shutdown);
            }

            match self.connect_once().await {
                Ok(identity) => return Ok(identity),
                Err(err) => {
                    if let Some(max) = self.settings.max_attempts {
                        if self.failed_attempts >= max {
                            warn!(
                                "Giving up on {} after {} attempts",
                                self.connector.describe(),
                                self.failed_attempts
                            );
                            return Err(err);
                        }
                    }
                    let delay = self.settings.backoff.delay_for(self.failed_attempts);
                    info!(
                        "Retrying connection to {} in {}s (attempt {})",
                        self.connector.describe(),
                        delay.as_secs(),
                        self.failed_attempts + 1
                    );
                    self.emit(ConnectionEvent::RetryScheduled {
                        attempt: self.failed_attempts,
                        delay,
                    });
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }

    /// One connection attempt: open the transport, then prove it with the canary.
    pub async fn connect_once(&mut self) -> TelemetryResult<u16> {
        self.close_bus().await;
        self.state = ConnectionState::Connecting;
        let attempt = self.failed_attempts + 1;
        let target = self.connector.describe();
        debug!("Connecting to {} (attempt {})", target, attempt);
        self.emit(ConnectionEvent::Attempt { attempt, target });

        let bus = match self.connector.open().await {
            Ok(bus) => bus,
            Err(err) => {
                self.fail_attempt(&err);
                return Err(err);
            }
        };
        self.bus = Some(bus);

        match self.read_canary().await {
            Ok(identity) => {
                self.state = ConnectionState::Connected;
                self.failed_attempts = 0;
                self.consecutive_failures = 0;
                self.identity = Some(identity);
                info!(
                    "Connected to {} (identity register: {})",
                    self.connector.describe(),
                    identity
                );
                self.emit(ConnectionEvent::Connected { attempt, identity });
                Ok(identity)
            }
            Err(err) => {
                self.close_bus().await;
                self.fail_attempt(&err);
                Err(err)
            }
        }
    }

    fn fail_attempt(&mut self, err: &TelemetryError) {
        self.failed_attempts += 1;
        self.state = ConnectionState::Disconnected;
        warn!(
            "Connection attempt {} to {} failed: {}",
            self.failed_attempts,
            self.connector.describe(),
            err
        );
        self.emit(ConnectionEvent::AttemptFailed {
            attempt: self.failed_attempts,
            reason: err.to_string(),
        });
    }

    async fn read_canary(&mut self) -> TelemetryResult<u16> {
        let policy = self.settings.canary_retry;
        let offset = self.settings.canary_offset;
        let mut last_error = TelemetryError::NotConnected;

        for attempt in 1..=policy.attempts {
            match self.read_register(offset, 1).await {
                Ok(words) => return Ok(words[0]),
                Err(err) => {
                    debug!("Canary read {}/{} failed: {}", attempt, policy.attempts, err);
                    last_error = err;
                }
            }
            if attempt < policy.attempts {
                self.sleeper.sleep(policy.pause).await;
            }
        }
        Err(last_error)
    }

    /// Single read on the open link, no retry.
    pub async fn read_register(&mut self, offset: u16, count: u16) -> TelemetryResult<Vec<u16>> {
        let bus = self.bus.as_mut().ok_or(TelemetryError::NotConnected)?;
        let words = bus.read_holding_registers(offset, count).await?;
        if words.len() < usize::from(count) {
            return Err(TelemetryError::decode(
                offset,
                format!("expected {} word(s), got {}", count, words.len()),
            ));
        }
        Ok(words)
    }

    /// Read with the per-register retry budget.
    ///
    /// A read that still fails with a transport fault after all retries
    /// counts toward demotion of the link.
    pub async fn read_register_retrying(
        &mut self,
        offset: u16,
        count: u16,
    ) -> TelemetryResult<Vec<u16>> {
        let policy = self.settings.read_retry;
        let mut last_error = TelemetryError::NotConnected;

        for attempt in 1..=policy.attempts {
            match self.read_register(offset, count).await {
                Ok(words) => {
                    self.consecutive_failures = 0;
                    return Ok(words);
                }
                Err(TelemetryError::NotConnected) => return Err(TelemetryError::NotConnected),
                Err(err) => {
                    debug!(
                        "Read of offset {} failed ({}/{}): {}",
                        offset, attempt, policy.attempts, err
                    );
                    last_error = err;
                }
            }
            if attempt < policy.attempts {
                self.sleeper.sleep(policy.pause).await;
            }
        }

        if last_error.is_transport() {
            self.record_transport_failure();
        }
        Err(last_error)
    }

    fn record_transport_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.state == ConnectionState::Connected
            && self.consecutive_failures >= self.settings.max_consecutive_failures
        {
            warn!(
                "{} consecutive transport failures, link to {} degraded",
                self.consecutive_failures,
                self.connector.describe()
            );
            self.state = ConnectionState::Degraded;
            self.emit(ConnectionEvent::Demoted {
                consecutive_failures: self.consecutive_failures,
            });
        }
    }

    /// Lightweight liveness probe on the engine-speed register.
    ///
    /// Returns `false` and degrades the link when the probe fails.
    pub async fn health_check(&mut self) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        let offset = self.settings.health_offset;
        match self.read_register_retrying(offset, 1).await {
            Ok(_) => {
                debug!("Health check passed");
                true
            }
            Err(err) => {
                warn!("Health check failed: {}", err);
                self.state = ConnectionState::Degraded;
                self.emit(ConnectionEvent::HealthCheckFailed {
                    reason: err.to_string(),
                });
                false
            }
        }
    }

    /// Tear the link down; the next [`connect`](Self::connect) starts fresh.
    pub async fn disconnect(&mut self) {
        self.close_bus().await;
        if self.state != ConnectionState::Disconnected {
            info!("Disconnected from {}", self.connector.describe());
            self.state = ConnectionState::Disconnected;
            self.emit(ConnectionEvent::Disconnected);
        }
        self.identity = None;
        self.consecutive_failures = 0;
    }

    async fn close_bus(&mut self) {
        if let Some(mut bus) = self.bus.take() {
            bus.close().await;
        }
    }
}
