// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! InfluxDB 2.x store adapter
//!
//! Writes use the line protocol on `/api/v2/write`; reads send Flux to
//! `/api/v2/query` and parse the CSV answer back into [`Record`]s.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use super::{FieldValue, Point, Record, SeriesQuery, TimeSeriesStore};
use crate::config::StoreConfig;
use crate::error::{TelemetryError, TelemetryResult};

/// HTTP client for one InfluxDB bucket.
#[derive(Debug, Clone)]
pub struct InfluxStore {
    url: String,
    token: String,
    org: String,
    bucket: String,
    client: reqwest::Client,
    timeout_seconds: u64,
}

impl InfluxStore {
    pub fn new(
        url: impl Into<String>,
        token: impl Into<String>,
        org: impl Into<String>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            org: org.into(),
            bucket: bucket.into(),
            client: reqwest::Client::new(),
            timeout_seconds: 10,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(&config.url, &config.token, &config.org, &config.bucket)
            .with_timeout_seconds(config.timeout_secs)
    }

    /// Set HTTP request timeout (1-300 s)
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds.clamp(1, 300);
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if !self.token.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&format!("Token {}", self.token)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    async fn run_flux(&self, measurement: &str, flux: String) -> TelemetryResult<Vec<Record>> {
        debug!("Flux query: {}", flux);
        let query_error = |message: String| TelemetryError::StoreQuery {
            measurement: measurement.to_string(),
            message,
        };

        let response = self
            .client
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .headers(self.headers())
            .header(CONTENT_TYPE, "application/vnd.flux")
            .header(ACCEPT, "application/csv")
            .timeout(Duration::from_secs(self.timeout_seconds))
            .body(flux)
            .send()
            .await
            .map_err(|e| query_error(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| query_error(e.to_string()))?;
        if !status.is_success() {
            warn!("InfluxDB query on {} failed with status {}", measurement, status);
            return Err(query_error(format!("HTTP {}: {}", status, body.trim())));
        }
        Ok(parse_flux_csv(&body))
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxStore {
    async fn write_point(&self, point: &Point) -> TelemetryResult<()> {
        let write_error = |message: String| TelemetryError::StoreWrite {
            measurement: point.measurement.clone(),
            message,
        };
        let line = to_line_protocol(point).ok_or_else(|| write_error("point has no writable field".into()))?;

        let response = self
            .client
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .headers(self.headers())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .timeout(Duration::from_secs(self.timeout_seconds))
            .body(line)
            .send()
            .await
            .map_err(|e| write_error(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                "InfluxDB write to {} failed with status {}: {}",
                point.measurement,
                status,
                body.trim()
            );
            Err(write_error(format!("HTTP {}", status)))
        }
    }

    async fn query_latest(&self, query: &SeriesQuery) -> TelemetryResult<Option<Record>> {
        let flux = format!("{}\n  |> last()", base_flux(&self.bucket, query));
        let records = self.run_flux(&query.measurement, flux).await?;
        Ok(merge_latest(records))
    }

    async fn query_range(&self, query: &SeriesQuery) -> TelemetryResult<Vec<Record>> {
        let mut flux = base_flux(&self.bucket, query);
        let Some(window) = query.aggregate else {
            return self.run_flux(&query.measurement, flux).await;
        };
        // one series per field, whatever tags the writers attached
        flux.push_str(&format!(
            "\n  |> group(columns: [\"_field\"])\n  |> aggregateWindow(every: {}s, fn: mean, createEmpty: false, timeSrc: \"_start\")",
            window.as_secs().max(1)
        ));
        let records = self.run_flux(&query.measurement, flux).await?;
        Ok(merge_by_window(records, &query.tags))
    }
}

fn flux_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `from |> range |> filter` prefix shared by every query.
pub(crate) fn base_flux(bucket: &str, query: &SeriesQuery) -> String {
    let mut flux = format!(
        "from(bucket: {})\n  |> range(start: {}, stop: {})\n  |> filter(fn: (r) => r._measurement == {})",
        flux_string(bucket),
        rfc3339(query.start),
        rfc3339(query.end),
        flux_string(&query.measurement)
    );
    if !query.fields.is_empty() {
        let predicate = query
            .fields
            .iter()
            .map(|f| format!("r._field == {}", flux_string(f)))
            .collect::<Vec<_>>()
            .join(" or ");
        flux.push_str(&format!("\n  |> filter(fn: (r) => {})", predicate));
    }
    for (key, value) in &query.tags {
        flux.push_str(&format!(
            "\n  |> filter(fn: (r) => r[{}] == {})",
            flux_string(key),
            flux_string(value)
        ));
    }
    flux
}

fn escape(value: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Render a point as one line-protocol line. Non-finite floats are dropped;
/// `None` when nothing writable remains.
pub(crate) fn to_line_protocol(point: &Point) -> Option<String> {
    let fields: Vec<String> = point
        .fields
        .iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                FieldValue::Float(v) if v.is_finite() => format!("{:?}", v),
                FieldValue::Float(_) => return None,
                FieldValue::Int(v) => format!("{}i", v),
                FieldValue::Bool(v) => v.to_string(),
                FieldValue::Text(s) => format!("\"{}\"", escape(s, &['"'])),
            };
            Some(format!("{}={}", escape(key, &[',', '=', ' ']), rendered))
        })
        .collect();
    if fields.is_empty() {
        return None;
    }

    let mut line = escape(&point.measurement, &[',', ' ']);
    for (key, value) in &point.tags {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        line.push_str(&escape(key, &[',', '=', ' ']));
        line.push('=');
        line.push_str(&escape(value, &[',', '=', ' ']));
    }
    line.push(' ');
    line.push_str(&fields.join(","));
    if let Some(ns) = point.timestamp.timestamp_nanos_opt() {
        line.push(' ');
        line.push_str(&ns.to_string());
    }
    Some(line)
}

/// Split one CSV line, honouring double-quoted cells.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cell.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    cells
}

fn parse_value(raw: &str) -> FieldValue {
    if let Ok(v) = raw.parse::<f64>() {
        FieldValue::Float(v)
    } else if let Ok(v) = raw.parse::<bool>() {
        FieldValue::Bool(v)
    } else {
        FieldValue::Text(raw.to_string())
    }
}

/// Parse the CSV emitted by `/api/v2/query` into records keyed by time and tag set.
pub(crate) fn parse_flux_csv(body: &str) -> Vec<Record> {
    let mut grouped: BTreeMap<(DateTime<Utc>, BTreeMap<String, String>), BTreeMap<String, FieldValue>> =
        BTreeMap::new();
    let mut header: Option<Vec<String>> = None;

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            header = None;
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let cells = split_csv_line(line);
        let Some(columns) = &header else {
            header = Some(cells);
            continue;
        };

        let mut time = None;
        let mut field = None;
        let mut value = None;
        let mut tags = BTreeMap::new();
        for (column, cell) in columns.iter().zip(cells.iter()) {
            match column.as_str() {
                "_time" => time = DateTime::parse_from_rfc3339(cell).ok().map(|t| t.with_timezone(&Utc)),
                "_field" => field = Some(cell.clone()),
                "_value" => value = Some(parse_value(cell)),
                "" | "result" | "table" => {}
                other if other.starts_with('_') => {}
                other => {
                    tags.insert(other.to_string(), cell.clone());
                }
            }
        }
        if let (Some(time), Some(field), Some(value)) = (time, field, value) {
            grouped.entry((time, tags)).or_default().insert(field, value);
        }
    }

    grouped
        .into_iter()
        .map(|((timestamp, tags), fields)| Record {
            timestamp,
            tags,
            fields,
        })
        .collect()
}

/// Fold aggregated rows sharing a window start into one record carrying the
/// query's tag filter.
pub(crate) fn merge_by_window(records: Vec<Record>, tags: &BTreeMap<String, String>) -> Vec<Record> {
    let mut windows: BTreeMap<DateTime<Utc>, BTreeMap<String, FieldValue>> = BTreeMap::new();
    for record in records {
        windows.entry(record.timestamp).or_default().extend(record.fields);
    }
    windows
        .into_iter()
        .map(|(timestamp, fields)| Record {
            timestamp,
            tags: tags.clone(),
            fields,
        })
        .collect()
}

/// Fold per-field `last()` rows into one record stamped with the newest time.
fn merge_latest(records: Vec<Record>) -> Option<Record> {
    let mut merged: Option<Record> = None;
    for record in records {
        match merged.as_mut() {
            None => merged = Some(record),
            Some(current) => {
                if record.timestamp >= current.timestamp {
                    current.timestamp = record.timestamp;
                    current.tags = record.tags.clone();
                    current.fields.extend(record.fields);
                } else {
                    for (name, value) in record.fields {
                        current.fields.entry(name).or_insert(value);
                    }
                }
            }
        }
    }
    merged
}
