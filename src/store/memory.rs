// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-process time-series store

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{FieldValue, Point, Record, SeriesQuery, TimeSeriesStore};
use crate::error::{TelemetryError, TelemetryResult};

/// Keeps every point in memory, ordered by arrival.
#[derive(Debug, Default)]
pub struct MemoryStore {
    points: RwLock<Vec<Point>>,
    reject_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail, to exercise error paths.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub async fn points(&self, measurement: &str) -> Vec<Point> {
        self.points
            .read()
            .await
            .iter()
            .filter(|p| p.measurement == measurement)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }

    fn matches(query: &SeriesQuery, point: &Point) -> bool {
        point.measurement == query.measurement
            && point.timestamp >= query.start
            && point.timestamp <= query.end
            && query
                .tags
                .iter()
                .all(|(key, value)| point.tags.get(key) == Some(value))
    }
}

fn window_start(timestamp: DateTime<Utc>, start: DateTime<Utc>, window_ms: i64) -> DateTime<Utc> {
    let offset = (timestamp - start).num_milliseconds();
    start + chrono::Duration::milliseconds(offset - offset.rem_euclid(window_ms))
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn write_point(&self, point: &Point) -> TelemetryResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(TelemetryError::StoreWrite {
                measurement: point.measurement.clone(),
                message: "store rejected the write".into(),
            });
        }
        self.points.write().await.push(point.clone());
        Ok(())
    }

    async fn query_latest(&self, query: &SeriesQuery) -> TelemetryResult<Option<Record>> {
        let points = self.points.read().await;
        let mut latest: BTreeMap<String, (DateTime<Utc>, FieldValue)> = BTreeMap::new();
        let mut tags = BTreeMap::new();
        let mut newest: Option<DateTime<Utc>> = None;

        for point in points.iter().filter(|p| Self::matches(query, p)) {
            for (name, value) in &point.fields {
                if !query.wants_field(name) {
                    continue;
                }
                let replace = latest
                    .get(name)
                    .map(|(ts, _)| point.timestamp >= *ts)
                    .unwrap_or(true);
                if replace {
                    latest.insert(name.clone(), (point.timestamp, value.clone()));
                    if newest.map(|n| point.timestamp >= n).unwrap_or(true) {
                        newest = Some(point.timestamp);
                        tags = point.tags.clone();
                    }
                }
            }
        }

        Ok(newest.map(|timestamp| Record {
            timestamp,
            tags,
            fields: latest.into_iter().map(|(k, (_, v))| (k, v)).collect(),
        }))
    }

    async fn query_range(&self, query: &SeriesQuery) -> TelemetryResult<Vec<Record>> {
        let points = self.points.read().await;
        let selected = points.iter().filter(|p| Self::matches(query, p));

        let Some(window) = query.aggregate else {
            let mut records: Vec<Record> = selected
                .filter_map(|point| {
                    let fields: BTreeMap<String, FieldValue> = point
                        .fields
                        .iter()
                        .filter(|(name, _)| query.wants_field(name))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    (!fields.is_empty()).then(|| Record {
                        timestamp: point.timestamp,
                        tags: point.tags.clone(),
                        fields,
                    })
                })
                .collect();
            records.sort_by_key(|r| r.timestamp);
            return Ok(records);
        };

        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1);
        // window start -> field -> (sum, count)
        let mut buckets: BTreeMap<DateTime<Utc>, BTreeMap<String, (f64, usize)>> = BTreeMap::new();
        for point in selected {
            let bucket = window_start(point.timestamp, query.start, window_ms);
            for (name, value) in &point.fields {
                if !query.wants_field(name) {
                    continue;
                }
                if let Some(v) = value.as_f64() {
                    let entry = buckets
                        .entry(bucket)
                        .or_default()
                        .entry(name.clone())
                        .or_insert((0.0, 0));
                    entry.0 += v;
                    entry.1 += 1;
                }
            }
        }

        Ok(buckets
            .into_iter()
            .map(|(timestamp, fields)| Record {
                timestamp,
                tags: query.tags.clone(),
                fields: fields
                    .into_iter()
                    .map(|(name, (sum, count))| (name, FieldValue::Float(sum / count as f64)))
                    .collect(),
            })
            .collect())
    }
}
