// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Baseline persistence

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};

use super::{Baseline, Metric, MetricStats};
use crate::error::TelemetryResult;
use crate::load_band::LoadBand;
use crate::store::{Point, Record, SeriesQuery, TimeSeriesStore};

pub const BASELINES_MEASUREMENT: &str = "powertrain_baselines";
pub const STATUS_MEASUREMENT: &str = "powertrain_system_status";

/// Last completed full recompute.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineStatus {
    pub baseline_count: i64,
    pub bootstrap_timestamp: DateTime<Utc>,
}

/// Reads and writes baselines through a [`TimeSeriesStore`].
///
/// The newest record per band is the active baseline; older ones stay in the
/// store as history.
#[derive(Clone)]
pub struct BaselineRepository {
    store: Arc<dyn TimeSeriesStore>,
    lookback: Duration,
}

impl BaselineRepository {
    pub fn new(store: Arc<dyn TimeSeriesStore>, lookback_days: i64) -> Self {
        Self {
            store,
            lookback: Duration::days(lookback_days.max(1)),
        }
    }

    pub fn to_point(baseline: &Baseline, now: DateTime<Utc>) -> Point {
        let mut point = Point::new(BASELINES_MEASUREMENT)
            .tag("load_band", baseline.load_band.label())
            .field("sample_count", baseline.sample_count as i64)
            .field("window_start", baseline.window_start.to_rfc3339())
            .field("window_end", baseline.window_end.to_rfc3339())
            .at(now);
        for (metric, stats) in &baseline.metrics {
            let key = metric.key();
            point = point
                .field(format!("avg_{}", key), stats.avg)
                .field(format!("stddev_{}", key), stats.stddev)
                .field(format!("min_{}", key), stats.min)
                .field(format!("max_{}", key), stats.max)
                .field(format!("trend_{}", key), stats.trend_per_day);
        }
        point
    }

    /// Rebuild a baseline from a stored record; metrics without an average are absent.
    pub fn from_record(load_band: LoadBand, record: &Record) -> Baseline {
        let metrics = Metric::ALL
            .into_iter()
            .filter_map(|metric| {
                let key = metric.key();
                let avg = record.f64(&format!("avg_{}", key))?;
                Some((
                    metric,
                    MetricStats {
                        avg,
                        stddev: record.f64(&format!("stddev_{}", key)).unwrap_or(0.0),
                        min: record.f64(&format!("min_{}", key)).unwrap_or(avg),
                        max: record.f64(&format!("max_{}", key)).unwrap_or(avg),
                        trend_per_day: record.f64(&format!("trend_{}", key)).unwrap_or(0.0),
                    },
                ))
            })
            .collect();

        let parse_time = |field: &str| {
            record
                .text(field)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(record.timestamp)
        };

        Baseline {
            load_band,
            metrics,
            sample_count: record.f64("sample_count").map(|c| c.max(0.0) as usize).unwrap_or(0),
            window_start: parse_time("window_start"),
            window_end: parse_time("window_end"),
        }
    }

    pub async fn save(&self, baseline: &Baseline, now: DateTime<Utc>) -> TelemetryResult<()> {
        debug!(
            "Saving baseline for {} ({} samples)",
            baseline.load_band, baseline.sample_count
        );
        self.store.write_point(&Self::to_point(baseline, now)).await
    }

    pub async fn load_latest(
        &self,
        band: LoadBand,
        now: DateTime<Utc>,
    ) -> TelemetryResult<Option<Baseline>> {
        let query = SeriesQuery::new(BASELINES_MEASUREMENT, now - self.lookback, now)
            .tag("load_band", band.label());
        Ok(self
            .store
            .query_latest(&query)
            .await?
            .map(|record| Self::from_record(band, &record)))
    }

    /// Latest baseline of every band that has one. Bands whose query fails are
    /// left out.
    pub async fn load_all(&self, now: DateTime<Utc>) -> BTreeMap<LoadBand, Baseline> {
        let mut baselines = BTreeMap::new();
        for band in LoadBand::ALL {
            match self.load_latest(band, now).await {
                Ok(Some(baseline)) => {
                    baselines.insert(band, baseline);
                }
                Ok(None) => {}
                Err(err) => warn!("Could not load baseline for {}: {}", band, err),
            }
        }
        baselines
    }

    pub async fn save_status(&self, baseline_count: usize, now: DateTime<Utc>) -> TelemetryResult<()> {
        let point = Point::new(STATUS_MEASUREMENT)
            .field("baseline_count", baseline_count as i64)
            .field("bootstrap_timestamp", now.to_rfc3339())
            .at(now);
        self.store.write_point(&point).await
    }

    pub async fn load_status(&self, now: DateTime<Utc>) -> TelemetryResult<Option<BaselineStatus>> {
        let query = SeriesQuery::new(STATUS_MEASUREMENT, now - self.lookback, now)
            .fields(["baseline_count", "bootstrap_timestamp"]);
        Ok(self.store.query_latest(&query).await?.map(|record| {
            let bootstrap_timestamp = record
                .text("bootstrap_timestamp")
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or(record.timestamp);
            BaselineStatus {
                baseline_count: record.f64("baseline_count").unwrap_or(0.0) as i64,
                bootstrap_timestamp,
            }
        }))
    }
}
