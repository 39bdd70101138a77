// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Baseline computation
//!
//! [`compute_baselines`] is a pure function over a batch of historical
//! samples. [`BaselineEngine`] wraps it with history loading, persistence
//! and a single-flight guard so that two recompute runs never overlap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use tokio::sync::Mutex;

use super::freshness::{FreshnessDecision, FreshnessPolicy};
use super::repository::BaselineRepository;
use super::{group_by_band, stats, Baseline, HistoricalSample, Metric, MetricStats};
use crate::config::BaselineConfig;
use crate::error::TelemetryResult;
use crate::load_band::{LoadBand, RUNNING_SPEED_RPM};
use crate::store::{SeriesQuery, TimeSeriesStore, METRICS_MEASUREMENT};

/// Live rating field, preferred over the configured rated power.
pub const RATED_POWER_FIELD: &str = "Genset_kW_Rating";

/// Samples needed for a band before a provisional baseline is produced.
pub fn provisional_threshold(min_samples: usize) -> usize {
    (min_samples / 2).max(3)
}

fn metric_stats(samples: &[&HistoricalSample], metric: Metric) -> Option<MetricStats> {
    let values: Vec<f64> = samples
        .iter()
        .filter_map(|s| s.value(metric))
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() {
        return None;
    }

    let running: Vec<&&HistoricalSample> = samples
        .iter()
        .filter(|s| s.value(Metric::EngineSpeed).is_some_and(|rpm| rpm > RUNNING_SPEED_RPM))
        .collect();
    let origin = running.first().map(|s| s.timestamp);
    let trend_points: Vec<(f64, f64)> = running
        .iter()
        .filter_map(|s| {
            let value = s.value(metric).filter(|v| v.is_finite())?;
            let elapsed = (s.timestamp - origin?).num_milliseconds() as f64 / 1000.0;
            Some((elapsed, value))
        })
        .collect();

    Some(MetricStats {
        avg: stats::mean(&values),
        stddev: stats::stddev(&values),
        min: stats::min(&values),
        max: stats::max(&values),
        trend_per_day: stats::ols_slope_per_day(&trend_points),
    })
}

fn build_baseline(band: LoadBand, samples: &[&HistoricalSample]) -> Baseline {
    let mut sorted = samples.to_vec();
    sorted.sort_by_key(|s| s.timestamp);
    let metrics = Metric::ALL
        .into_iter()
        .filter_map(|metric| metric_stats(&sorted, metric).map(|s| (metric, s)))
        .collect();
    Baseline {
        load_band: band,
        metrics,
        sample_count: sorted.len(),
        window_start: sorted.first().map(|s| s.timestamp).unwrap_or_default(),
        window_end: sorted.last().map(|s| s.timestamp).unwrap_or_default(),
    }
}

/// Compute one baseline per band present in `batch`.
///
/// A band short of `min_samples` keeps its previous baseline (re-stamped) or,
/// without one, gets a provisional baseline once it reaches the provisional
/// threshold. With `preserve_existing`, previous bands absent from the batch
/// are carried over re-stamped.
pub fn compute_baselines(
    batch: &[HistoricalSample],
    previous: &BTreeMap<LoadBand, Baseline>,
    now: DateTime<Utc>,
    min_samples: usize,
    preserve_existing: bool,
) -> Vec<Baseline> {
    let groups = group_by_band(batch);
    let mut results: BTreeMap<LoadBand, Baseline> = BTreeMap::new();

    for (band, samples) in &groups {
        let count = samples.len();
        if count >= min_samples {
            results.insert(*band, build_baseline(*band, samples));
        } else if let Some(prior) = previous.get(band) {
            info!(
                "Only {} samples for {}, keeping previous baseline ({} samples)",
                count, band, prior.sample_count
            );
            results.insert(*band, prior.restamped(now));
        } else if count >= provisional_threshold(min_samples) {
            info!(
                "Provisional baseline for {} from {} samples (target {})",
                band, count, min_samples
            );
            results.insert(*band, build_baseline(*band, samples));
        } else {
            debug!("Not enough samples for {}: {} < {}", band, count, min_samples);
        }
    }

    if preserve_existing {
        for (band, prior) in previous {
            if !groups.contains_key(band) {
                debug!("Preserving baseline for {} (no new samples)", band);
                results.insert(*band, prior.restamped(now));
            }
        }
    }

    results.into_values().collect()
}

/// Load `days` of 1-minute averaged history and classify each row.
pub async fn load_history(
    store: &dyn TimeSeriesStore,
    now: DateTime<Utc>,
    days: i64,
    rated_power_kw: f64,
) -> TelemetryResult<Vec<HistoricalSample>> {
    let mut fields: Vec<&str> = Metric::ALL.iter().map(|m| m.store_field()).collect();
    fields.push(RATED_POWER_FIELD);
    let query = SeriesQuery::new(METRICS_MEASUREMENT, now - Duration::days(days), now)
        .fields(fields)
        .aggregate(StdDuration::from_secs(60));

    let records = store.query_range(&query).await?;
    let samples: Vec<HistoricalSample> = records
        .iter()
        .filter_map(|record| {
            let values: BTreeMap<Metric, f64> = Metric::ALL
                .into_iter()
                .filter_map(|m| record.f64(m.store_field()).map(|v| (m, v)))
                .collect();
            if values.is_empty() {
                return None;
            }
            let rated = record
                .f64(RATED_POWER_FIELD)
                .filter(|r| *r > 0.0)
                .unwrap_or(rated_power_kw);
            let load_band = LoadBand::classify(
                values.get(&Metric::EngineSpeed).copied().unwrap_or(0.0),
                values.get(&Metric::PowerOutput).copied().unwrap_or(0.0),
                rated,
            );
            Some(HistoricalSample {
                timestamp: record.timestamp,
                load_band,
                values,
            })
        })
        .collect();
    debug!("Loaded {} historical samples over {} days", samples.len(), days);
    Ok(samples)
}

/// Outcome of a recompute request.
#[derive(Debug, Clone, PartialEq)]
pub enum BaselineRun {
    Completed(Vec<Baseline>),
    /// Another run holds the guard
    AlreadyRunning,
}

pub struct BaselineEngine {
    store: Arc<dyn TimeSeriesStore>,
    repository: BaselineRepository,
    config: BaselineConfig,
    rated_power_kw: f64,
    policy: FreshnessPolicy,
    guard: Mutex<()>,
}

impl BaselineEngine {
    pub fn new(store: Arc<dyn TimeSeriesStore>, config: BaselineConfig, rated_power_kw: f64) -> Self {
        Self {
            repository: BaselineRepository::new(store.clone(), config.lookback_days),
            policy: FreshnessPolicy::new(config.max_age_days),
            store,
            config,
            rated_power_kw,
            guard: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &BaselineRepository {
        &self.repository
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }

    pub fn compute(
        &self,
        batch: &[HistoricalSample],
        previous: &BTreeMap<LoadBand, Baseline>,
        now: DateTime<Utc>,
        preserve_existing: bool,
    ) -> Vec<Baseline> {
        compute_baselines(batch, previous, now, self.config.min_samples, preserve_existing)
    }

    async fn persist(&self, baselines: &[Baseline], now: DateTime<Utc>) -> usize {
        let mut saved = 0;
        for baseline in baselines {
            match self.repository.save(baseline, now).await {
                Ok(()) => saved += 1,
                Err(err) => warn!("Failed to save baseline for {}: {}", baseline.load_band, err),
            }
        }
        saved
    }

    /// Recompute every band from the configured history window.
    pub async fn recompute_all(&self, now: DateTime<Utc>) -> TelemetryResult<BaselineRun> {
        let Ok(_guard) = self.guard.try_lock() else {
            info!("Baseline computation already running, skipping");
            return Ok(BaselineRun::AlreadyRunning);
        };

        info!("Recomputing baselines over {} days", self.config.history_days);
        let history =
            load_history(self.store.as_ref(), now, self.config.history_days, self.rated_power_kw)
                .await?;
        let previous = self.repository.load_all(now).await;
        let baselines = self.compute(&history, &previous, now, true);
        let saved = self.persist(&baselines, now).await;
        if saved > 0 {
            self.repository.save_status(saved, now).await?;
            info!("Baseline computation complete: {} band(s) saved", saved);
        } else {
            // no status, so the next check is still a cold start
            warn!("No baseline could be computed from {} sample(s)", history.len());
        }
        Ok(BaselineRun::Completed(baselines))
    }

    /// Recompute one band from recent history, leaving the others alone.
    pub async fn recompute_band(&self, band: LoadBand, now: DateTime<Utc>) -> TelemetryResult<BaselineRun> {
        let Ok(_guard) = self.guard.try_lock() else {
            info!("Baseline computation already running, skipping {}", band);
            return Ok(BaselineRun::AlreadyRunning);
        };

        info!("Recomputing baseline for {}", band);
        let history =
            load_history(self.store.as_ref(), now, self.config.history_days, self.rated_power_kw)
                .await?;
        let batch: Vec<HistoricalSample> = history.into_iter().filter(|s| s.load_band == band).collect();
        let mut previous = BTreeMap::new();
        if let Some(prior) = self.repository.load_latest(band, now).await? {
            if !prior.is_placeholder() {
                previous.insert(band, prior);
            }
        }
        let baselines = self.compute(&batch, &previous, now, false);
        if baselines.is_empty() {
            info!("Not enough history to build a baseline for {} yet", band);
        }
        self.persist(&baselines, now).await;
        Ok(BaselineRun::Completed(baselines))
    }

    /// Apply the freshness policy for the active band, recomputing as needed.
    pub async fn ensure_fresh(
        &self,
        active_band: LoadBand,
        now: DateTime<Utc>,
    ) -> TelemetryResult<FreshnessDecision> {
        let status = self.repository.load_status(now).await?;
        let band_baseline = self.repository.load_latest(active_band, now).await?;
        let decision = self
            .policy
            .evaluate(status.as_ref(), active_band, band_baseline.as_ref(), now);

        match decision {
            FreshnessDecision::ColdStart | FreshnessDecision::Stale => {
                info!("Baselines {}, recomputing all bands", decision);
                self.recompute_all(now).await?;
            }
            FreshnessDecision::BandMissing(band) => {
                info!("Baseline {}, recomputing", decision);
                self.recompute_band(band, now).await?;
            }
            FreshnessDecision::Current => {}
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(minute: i64, band: LoadBand, speed: f64, oil: f64) -> HistoricalSample {
        let base = DateTime::parse_from_rfc3339("2025-03-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut values = BTreeMap::new();
        values.insert(Metric::EngineSpeed, speed);
        values.insert(Metric::OilPressure, oil);
        HistoricalSample {
            timestamp: base + Duration::minutes(minute),
            load_band: band,
            values,
        }
    }

    fn prior(band: LoadBand, oil_avg: f64) -> Baseline {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            Metric::OilPressure,
            MetricStats {
                avg: oil_avg,
                stddev: 5.0,
                min: oil_avg - 10.0,
                max: oil_avg + 10.0,
                trend_per_day: 0.0,
            },
        );
        Baseline {
            load_band: band,
            metrics,
            sample_count: 50,
            window_start: Utc::now() - Duration::days(40),
            window_end: Utc::now() - Duration::days(10),
        }
    }

    #[test]
    fn test_known_mean_and_stddev() {
        // alternating 400 / 420 → mean 410, population stddev 10
        let batch: Vec<HistoricalSample> = (0..20)
            .map(|i| sample(i, LoadBand::Band40To60, 1800.0, if i % 2 == 0 { 400.0 } else { 420.0 }))
            .collect();
        let result = compute_baselines(&batch, &BTreeMap::new(), Utc::now(), 10, true);
        assert_eq!(result.len(), 1);
        let oil = result[0].stats(Metric::OilPressure).unwrap();
        assert_relative_eq!(oil.avg, 410.0);
        assert_relative_eq!(oil.stddev, 10.0);
        assert_eq!(oil.min, 400.0);
        assert_eq!(oil.max, 420.0);
        assert_eq!(result[0].sample_count, 20);
        assert_eq!(result[0].window_start, batch[0].timestamp);
        assert_eq!(result[0].window_end, batch[19].timestamp);
        assert!(result[0].stats(Metric::FuelRate).is_none());
    }

    #[test]
    fn test_short_batch_reuses_previous() {
        let band = LoadBand::Band20To40;
        let batch = vec![sample(0, band, 1800.0, 999.0), sample(1, band, 1800.0, 999.0)];
        let mut previous = BTreeMap::new();
        previous.insert(band, prior(band, 380.0));
        let now = Utc::now();

        let result = compute_baselines(&batch, &previous, now, 10, true);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].metrics, previous[&band].metrics);
        assert_eq!(result[0].sample_count, 50);
        assert_eq!(result[0].window_start, now);
        assert_eq!(result[0].window_end, now);

        assert!(compute_baselines(&batch, &BTreeMap::new(), now, 10, true).is_empty());
    }

    #[test]
    fn test_provisional_baseline() {
        let band = LoadBand::Band60To80;
        let batch: Vec<HistoricalSample> = (0..5).map(|i| sample(i, band, 1800.0, 450.0)).collect();
        let result = compute_baselines(&batch, &BTreeMap::new(), Utc::now(), 10, true);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].sample_count, 5);
        assert_eq!(provisional_threshold(10), 5);
        assert_eq!(provisional_threshold(4), 3);
    }

    #[test]
    fn test_absent_bands_preserved_only_on_request() {
        let batch: Vec<HistoricalSample> = (0..12)
            .map(|i| sample(i, LoadBand::Band40To60, 1800.0, 410.0))
            .collect();
        let mut previous = BTreeMap::new();
        previous.insert(LoadBand::Band80To100, prior(LoadBand::Band80To100, 480.0));

        let kept = compute_baselines(&batch, &previous, Utc::now(), 10, true);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].load_band, LoadBand::Band80To100);

        let dropped = compute_baselines(&batch, &previous, Utc::now(), 10, false);
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn test_trend_uses_running_samples_only() {
        let band = LoadBand::Band20To40;
        // oil rises 1 kPa per hour while running; stopped samples are noise
        let mut batch: Vec<HistoricalSample> = (0..6)
            .map(|h| sample(h * 60, band, 1800.0, 400.0 + h as f64))
            .collect();
        batch.push(sample(30, band, 0.0, 0.0));
        batch.push(sample(90, band, 50.0, 900.0));
        let result = compute_baselines(&batch, &BTreeMap::new(), Utc::now(), 5, true);
        let oil = result[0].stats(Metric::OilPressure).unwrap();
        assert_relative_eq!(oil.trend_per_day, 24.0, epsilon = 1e-6);

        let few: Vec<HistoricalSample> = (0..2)
            .map(|h| sample(h * 60, band, 1800.0, 400.0 + h as f64))
            .chain((0..4).map(|i| sample(200 + i, band, 0.0, 0.0)))
            .collect();
        let result = compute_baselines(&few, &BTreeMap::new(), Utc::now(), 5, true);
        assert_eq!(result[0].stats(Metric::OilPressure).unwrap().trend_per_day, 0.0);
    }
}
