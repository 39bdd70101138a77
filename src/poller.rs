// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register polling loop
//!
//! One poll cycle reads engine speed, the active-event table and every
//! catalog register, decodes each raw value and writes the result to the
//! store. A register that cannot be read is skipped for this cycle only.
//!
//! [`Poller::run`] wraps the cycle in the outer connect loop: it reconnects
//! whenever the link is not `Connected`, runs a health check every N cycles
//! and sleeps a jittered interval between cycles.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use rand::Rng;

use crate::catalog::{RegisterCatalog, RegisterDef};
use crate::config::Config;
use crate::decoder::{CorrectedReading, DecodeOutcome, RawReading, RegisterDecoder};
use crate::error::{TelemetryError, TelemetryResult};
use crate::events::EventDetector;
use crate::modbus::{ConnectionManager, ConnectionState};
use crate::store::{Point, TimeSeriesStore, METRICS_MEASUREMENT};

/// Timing of the poll loop.
#[derive(Debug, Clone)]
pub struct PollSchedule {
    pub interval: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    /// Health check every this many cycles
    pub health_check_every: u64,
}

impl PollSchedule {
    /// Interval plus a random jitter within the configured band.
    pub fn next_delay(&self) -> Duration {
        let min = self.jitter_min.as_millis() as u64;
        let max = self.jitter_max.as_millis() as u64;
        let jitter = if max > min {
            rand::rng().random_range(min..=max)
        } else {
            min
        };
        self.interval + Duration::from_millis(jitter)
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            jitter_min: Duration::from_millis(200),
            jitter_max: Duration::from_millis(800),
            health_check_every: 10,
        }
    }
}

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    /// Metric points accepted by the store
    pub written: usize,
    /// Cumulative registers flagged unsupported
    pub skipped: usize,
    /// Registers that could not be read
    pub failed: usize,
    pub corrected: usize,
    /// Event points written
    pub events: usize,
    /// Points the store refused
    pub write_errors: usize,
    pub engine_speed: f64,
    /// Store field name to engineering value
    pub values: BTreeMap<String, f64>,
    /// The cycle stopped early because the link was demoted
    pub interrupted: bool,
}

pub struct Poller {
    catalog: Arc<RegisterCatalog>,
    decoder: RegisterDecoder,
    store: Arc<dyn TimeSeriesStore>,
    events: Option<EventDetector>,
    schedule: PollSchedule,
}

impl Poller {
    pub fn new(
        catalog: Arc<RegisterCatalog>,
        decoder: RegisterDecoder,
        store: Arc<dyn TimeSeriesStore>,
    ) -> Self {
        Self {
            catalog,
            decoder,
            store,
            events: None,
            schedule: PollSchedule::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        catalog: Arc<RegisterCatalog>,
        store: Arc<dyn TimeSeriesStore>,
    ) -> Self {
        let poller = Self::new(
            catalog,
            RegisterDecoder::new(config.anomaly_thresholds.clone()),
            store,
        )
        .with_schedule(PollSchedule {
            interval: Duration::from_millis(config.modbus.poll_interval_ms),
            jitter_min: Duration::from_millis(config.modbus.poll_jitter_min_ms),
            jitter_max: Duration::from_millis(config.modbus.poll_jitter_max_ms),
            health_check_every: config.modbus.health_check_interval,
        });
        if config.events.enabled {
            poller.with_events(EventDetector::new(&config.events))
        } else {
            poller
        }
    }

    pub fn with_events(mut self, detector: EventDetector) -> Self {
        self.events = Some(detector);
        self
    }

    pub fn with_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn events(&self) -> Option<&EventDetector> {
        self.events.as_ref()
    }

    /// Store point for a decoded reading.
    pub fn reading_point(def: &RegisterDef, reading: &CorrectedReading) -> Point {
        let field = def.field_name();
        let mut point = Point::new(METRICS_MEASUREMENT)
            .tag("unit", reading.units.as_str())
            .field(field.as_str(), reading.value)
            .at(reading.timestamp);
        if reading.corrected {
            point = point.field(format!("{}_corrected", field), true);
        }
        if let Some(text) = &reading.text {
            point = point.field(format!("{}_text", field), text.as_str());
        }
        point
    }

    async fn write(&self, point: &Point, report: &mut PollReport) -> bool {
        match self.store.write_point(point).await {
            Ok(()) => true,
            Err(err) => {
                warn!("Dropping point: {}", err);
                report.write_errors += 1;
                false
            }
        }
    }

    async fn record(&self, def: &RegisterDef, raw: u16, report: &mut PollReport) {
        let outcome = self.decoder.decode(&RawReading::new(&def.name, raw), def);
        match outcome {
            DecodeOutcome::SkipWrite { .. } => report.skipped += 1,
            DecodeOutcome::Reading(reading) => {
                if reading.corrected {
                    report.corrected += 1;
                }
                report.values.insert(def.field_name(), reading.value);
                if self.write(&Self::reading_point(def, &reading), report).await {
                    report.written += 1;
                }
            }
        }
    }

    /// Run one complete poll cycle on an open link.
    pub async fn poll_cycle(&mut self, conn: &mut ConnectionManager) -> PollReport {
        let mut report = PollReport::default();
        let catalog = self.catalog.clone();

        let speed_def = catalog.engine_speed();
        match conn.read_register_retrying(speed_def.offset(), 1).await {
            Ok(words) => self.record(speed_def, words[0], &mut report).await,
            Err(err) => {
                warn!("Engine speed read failed, assuming 0: {}", err);
                report.failed += 1;
            }
        }
        report.engine_speed = report
            .values
            .get(&speed_def.field_name())
            .copied()
            .unwrap_or(0.0);

        if let Some(mut detector) = self.events.take() {
            let points = detector.poll(conn).await;
            self.events = Some(detector);
            for point in &points {
                if self.write(point, &mut report).await {
                    report.events += 1;
                }
            }
        }

        for def in catalog.polled() {
            if conn.state() == ConnectionState::Degraded {
                warn!("Link degraded, abandoning poll cycle");
                report.interrupted = true;
                break;
            }
            match conn.read_register_retrying(def.offset(), 1).await {
                Ok(words) => self.record(def, words[0], &mut report).await,
                Err(err) => {
                    warn!("Skipping {} this cycle: {}", def.name, err);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Poll cycle at {}: {} written, {} skipped, {} failed, {} corrected, {} event(s)",
            Utc::now().format("%H:%M:%S"),
            report.written,
            report.skipped,
            report.failed,
            report.corrected,
            report.events
        );
        report
    }

    /// Poll until `running` is cleared, reconnecting as needed.
    ///
    /// Returns an error only when the connection gives up after its attempt cap.
    pub async fn run(
        &mut self,
        conn: &mut ConnectionManager,
        running: Arc<AtomicBool>,
    ) -> TelemetryResult<()> {
        let sleeper = conn.sleeper();
        let health_every = self.schedule.health_check_every.max(1);
        let mut cycles: u64 = 0;

        while running.load(Ordering::SeqCst) {
            if conn.needs_reconnect() {
                if conn.state() == ConnectionState::Degraded {
                    conn.disconnect().await;
                }
                match conn.connect(&running).await {
                    Ok(identity) => info!("Polling controller (identity {})", identity),
                    Err(TelemetryError::Shutdown) => break,
                    Err(err) => {
                        error!("Unable to connect to the controller: {}", err);
                        return Err(err);
                    }
                }
                cycles = 0;
            }

            let report = self.poll_cycle(conn).await;
            cycles += 1;
            if report.interrupted || conn.state() == ConnectionState::Degraded {
                continue;
            }

            if cycles % health_every == 0 && !conn.health_check().await {
                warn!("Health check failed after {} cycles, reconnecting", cycles);
                continue;
            }

            if running.load(Ordering::SeqCst) {
                sleeper.sleep(self.schedule.next_delay()).await;
            }
        }

        conn.disconnect().await;
        info!("Poller stopped");
        Ok(())
    }
}
