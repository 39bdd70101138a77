// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Baseline freshness policy

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use super::{Baseline, BaselineStatus};
use crate::load_band::LoadBand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessDecision {
    /// No status record: compute every band now
    ColdStart,
    /// Last full computation is too old: recompute every band
    Stale,
    /// The active band has no usable baseline: compute that band only
    BandMissing(LoadBand),
    Current,
}

impl fmt::Display for FreshnessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreshnessDecision::ColdStart => f.write_str("cold start"),
            FreshnessDecision::Stale => f.write_str("stale"),
            FreshnessDecision::BandMissing(band) => write!(f, "missing baseline for {}", band),
            FreshnessDecision::Current => f.write_str("current"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    pub max_age: Duration,
}

impl FreshnessPolicy {
    pub fn new(max_age_days: i64) -> Self {
        Self {
            max_age: Duration::days(max_age_days),
        }
    }

    pub fn evaluate(
        &self,
        status: Option<&BaselineStatus>,
        active_band: LoadBand,
        band_baseline: Option<&Baseline>,
        now: DateTime<Utc>,
    ) -> FreshnessDecision {
        let Some(status) = status else {
            return FreshnessDecision::ColdStart;
        };
        if now - status.bootstrap_timestamp > self.max_age {
            return FreshnessDecision::Stale;
        }
        match band_baseline {
            Some(baseline) if !baseline.is_placeholder() => FreshnessDecision::Current,
            _ => FreshnessDecision::BandMissing(active_band),
        }
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(7)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::{Metric, MetricStats};
    use std::collections::BTreeMap;

    fn status(age_days: i64, now: DateTime<Utc>) -> BaselineStatus {
        BaselineStatus {
            baseline_count: 3,
            bootstrap_timestamp: now - Duration::days(age_days),
        }
    }

    fn baseline(sample_count: usize, oil_avg: f64) -> Baseline {
        let now = Utc::now();
        let mut metrics = BTreeMap::new();
        metrics.insert(
            Metric::OilPressure,
            MetricStats {
                avg: oil_avg,
                ..MetricStats::default()
            },
        );
        Baseline {
            load_band: LoadBand::Band20To40,
            metrics,
            sample_count,
            window_start: now,
            window_end: now,
        }
    }

    #[test]
    fn test_decisions() {
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        let band = LoadBand::Band20To40;
        let good = baseline(25, 400.0);

        assert_eq!(policy.evaluate(None, band, Some(&good), now), FreshnessDecision::ColdStart);
        assert_eq!(
            policy.evaluate(Some(&status(8, now)), band, Some(&good), now),
            FreshnessDecision::Stale
        );
        assert_eq!(
            policy.evaluate(Some(&status(2, now)), band, None, now),
            FreshnessDecision::BandMissing(band)
        );
        assert_eq!(
            policy.evaluate(Some(&status(2, now)), band, Some(&baseline(0, 0.0)), now),
            FreshnessDecision::BandMissing(band)
        );
        assert_eq!(
            policy.evaluate(Some(&status(2, now)), band, Some(&good), now),
            FreshnessDecision::Current
        );
    }
}
