// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Remote analysis gateway client
//!
//! The gateway is an opaque `analyze(metrics) -> result` service. Calls are
//! bounded by a timeout and every failure is reported to the caller, which
//! falls back to the local analysis.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use log::{info, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use super::AlertLevel;
use crate::config::GatewayConfig;
use crate::error::{TelemetryError, TelemetryResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayRequest {
    pub site_id: String,
    pub metrics: BTreeMap<String, f64>,
    pub ai_enabled: bool,
}

impl GatewayRequest {
    /// Build a request; NaN and infinite metrics are sent as `0`.
    pub fn new(site_id: impl Into<String>, metrics: BTreeMap<String, f64>, ai_enabled: bool) -> Self {
        let metrics = metrics
            .into_iter()
            .map(|(k, v)| (k, if v.is_finite() { v } else { 0.0 }))
            .collect();
        Self {
            site_id: site_id.into(),
            metrics,
            ai_enabled,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayAlert {
    pub level: Option<String>,
    pub severity: Option<String>,
    pub message: String,
}

impl GatewayAlert {
    pub fn alert_level(&self) -> Option<AlertLevel> {
        self.level
            .as_deref()
            .or(self.severity.as_deref())
            .and_then(AlertLevel::parse_lenient)
    }
}

/// Answer of the gateway; every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayAnalysis {
    #[serde(alias = "analysis_summary")]
    pub summary: Option<String>,
    pub analysis: Vec<String>,
    pub alerts: Vec<GatewayAlert>,
    pub recommendations: Vec<String>,
    pub alert_level: Option<String>,
}

impl GatewayAnalysis {
    pub fn summary(&self) -> String {
        self.summary
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.analysis.first().cloned())
            .unwrap_or_else(|| "Gateway AI analysis".to_string())
    }

    /// Reported level, else the highest alert level, else INFO.
    pub fn alert_level(&self) -> AlertLevel {
        self.alert_level
            .as_deref()
            .and_then(AlertLevel::parse_lenient)
            .or_else(|| self.alerts.iter().filter_map(GatewayAlert::alert_level).max())
            .unwrap_or(AlertLevel::Info)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisGateway: Send + Sync {
    async fn analyze(&self, request: &GatewayRequest) -> TelemetryResult<GatewayAnalysis>;
}

/// HTTP client for `POST {url}/api/analyze`.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    url: String,
    api_key: String,
    client: reqwest::Client,
    timeout_seconds: u64,
}

impl GatewayClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            timeout_seconds: 30,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(&config.url, &config.api_key).with_timeout_seconds(config.timeout_secs)
    }

    /// Set HTTP request timeout (1-300 s)
    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds.clamp(1, 300);
        self
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if !self.api_key.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    fn map_error(&self, err: reqwest::Error) -> TelemetryError {
        if err.is_timeout() {
            warn!("Gateway request timed out after {}s", self.timeout_seconds);
            TelemetryError::GatewayTimeout {
                seconds: self.timeout_seconds,
            }
        } else if err.is_connect() {
            warn!("Cannot connect to gateway at {}", self.url);
            TelemetryError::Gateway("gateway unreachable".to_string())
        } else {
            TelemetryError::Gateway(err.to_string())
        }
    }
}

#[async_trait]
impl AnalysisGateway for GatewayClient {
    async fn analyze(&self, request: &GatewayRequest) -> TelemetryResult<GatewayAnalysis> {
        info!("Sending analysis request to gateway for site: {}", request.site_id);
        let response = self
            .client
            .post(format!("{}/api/analyze", self.url))
            .headers(self.headers())
            .json(request)
            .timeout(Duration::from_secs(self.timeout_seconds))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Gateway request failed: {} - {}", status, body.trim());
            return Err(TelemetryError::Gateway(format!("HTTP {}", status)));
        }

        let analysis = response
            .json::<GatewayAnalysis>()
            .await
            .map_err(|e| self.map_error(e))?;
        info!("Gateway analysis completed successfully");
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_sanitizes_non_finite() {
        let mut metrics = BTreeMap::new();
        metrics.insert("oil_pressure".to_string(), f64::NAN);
        metrics.insert("fuel_rate".to_string(), f64::NEG_INFINITY);
        metrics.insert("engine_speed".to_string(), 1800.0);
        let request = GatewayRequest::new("site-001", metrics, true);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["metrics"]["oil_pressure"], 0.0);
        assert_eq!(json["metrics"]["fuel_rate"], 0.0);
        assert_eq!(json["metrics"]["engine_speed"], 1800.0);
        assert_eq!(json["ai_enabled"], true);
    }

    #[test]
    fn test_lenient_response() {
        let analysis: GatewayAnalysis = serde_json::from_str(
            r#"{"analysis":["Oil pressure trending down"],
                "alerts":[{"severity":"warning","message":"low oil"},{"level":"INFO","message":"ok"}],
                "recommendations":["Check oil level"],
                "extra":"ignored"}"#,
        )
        .unwrap();
        assert_eq!(analysis.summary(), "Oil pressure trending down");
        assert_eq!(analysis.alert_level(), AlertLevel::Warning);

        let empty: GatewayAnalysis = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.summary(), "Gateway AI analysis");
        assert_eq!(empty.alert_level(), AlertLevel::Info);

        let explicit: GatewayAnalysis =
            serde_json::from_str(r#"{"analysis_summary":"All good","alert_level":"CRITICAL"}"#).unwrap();
        assert_eq!(explicit.summary(), "All good");
        assert_eq!(explicit.alert_level(), AlertLevel::Critical);
    }
}
