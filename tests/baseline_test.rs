// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Baseline engine through the repository, on top of the in-memory store

use std::sync::Arc;

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, Utc};
use rust_genset_monitor::baseline::repository::{BASELINES_MEASUREMENT, STATUS_MEASUREMENT};
use rust_genset_monitor::baseline::{BaselineEngine, BaselineRun, FreshnessDecision, Metric};
use rust_genset_monitor::catalog::RegisterCatalog;
use rust_genset_monitor::config::{BaselineConfig, Config};
use rust_genset_monitor::decoder::CorrectedReading;
use rust_genset_monitor::load_band::LoadBand;
use rust_genset_monitor::poller::Poller;
use rust_genset_monitor::store::{MemoryStore, Point, TimeSeriesStore, METRICS_MEASUREMENT};

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// 20 minutes at half load, then 5 minutes near full load (power in percent).
async fn seeded_store() -> Arc<MemoryStore> {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(MemoryStore::new());
    for minute in 0..25i64 {
        let (power, oil) = if minute < 20 {
            (50.0, if minute % 2 == 0 { 395.0 } else { 405.0 })
        } else {
            (90.0, 450.0)
        };
        store
            .write_point(
                &Point::new(METRICS_MEASUREMENT)
                    .field("Engine_Speed", 1800.0)
                    .field("Engine_Oil_Pressure", oil)
                    .field("Generator_Total_Real_Power", power)
                    .field("Genset_kW_Rating", 150.0)
                    .at(now() - Duration::minutes(60 - minute)),
            )
            .await
            .unwrap();
    }
    store
}

fn engine(store: Arc<MemoryStore>) -> BaselineEngine {
    BaselineEngine::new(store, BaselineConfig::default(), 500.0)
}

#[tokio::test]
async fn test_cold_start_computes_every_band() {
    let store = seeded_store().await;
    let engine = engine(store.clone());

    let decision = engine.ensure_fresh(LoadBand::Band40To60, now()).await.unwrap();
    assert_eq!(decision, FreshnessDecision::ColdStart);

    let half = engine
        .repository()
        .load_latest(LoadBand::Band40To60, now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(half.sample_count, 20);
    let oil = half.stats(Metric::OilPressure).unwrap();
    assert_relative_eq!(oil.avg, 400.0, epsilon = 1e-9);
    assert_relative_eq!(oil.stddev, 5.0, epsilon = 1e-9);
    assert_relative_eq!(oil.min, 395.0);
    assert_relative_eq!(oil.max, 405.0);

    // five samples reach the provisional threshold of the default minimum
    let full = engine
        .repository()
        .load_latest(LoadBand::Band80To100, now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(full.sample_count, 5);
    assert_relative_eq!(full.stats(Metric::OilPressure).unwrap().avg, 450.0);

    let status = engine.repository().load_status(now()).await.unwrap().unwrap();
    assert_eq!(status.baseline_count, 2);
    assert_eq!(status.bootstrap_timestamp, now());

    let again = engine.ensure_fresh(LoadBand::Band40To60, now()).await.unwrap();
    assert_eq!(again, FreshnessDecision::Current);
    assert_eq!(store.points(BASELINES_MEASUREMENT).await.len(), 2);
}

#[tokio::test]
async fn test_missing_band_recomputes_only_that_band() {
    let store = seeded_store().await;
    let engine = engine(store.clone());
    engine.recompute_all(now()).await.unwrap();
    let saved = store.points(BASELINES_MEASUREMENT).await.len();

    let decision = engine.ensure_fresh(LoadBand::Band0To20, now()).await.unwrap();
    assert_eq!(decision, FreshnessDecision::BandMissing(LoadBand::Band0To20));
    // no history for that band, nothing new written
    assert_eq!(store.points(BASELINES_MEASUREMENT).await.len(), saved);
    assert_eq!(store.points(STATUS_MEASUREMENT).await.len(), 1);
}

#[tokio::test]
async fn test_stale_status_triggers_full_recompute() {
    let store = seeded_store().await;
    let old = now() - Duration::days(10);
    store
        .write_point(
            &Point::new(STATUS_MEASUREMENT)
                .field("baseline_count", 0i64)
                .field("bootstrap_timestamp", old.to_rfc3339())
                .at(old),
        )
        .await
        .unwrap();
    let engine = engine(store.clone());

    let decision = engine.ensure_fresh(LoadBand::Band40To60, now()).await.unwrap();
    assert_eq!(decision, FreshnessDecision::Stale);
    let status = engine.repository().load_status(now()).await.unwrap().unwrap();
    assert_eq!(status.bootstrap_timestamp, now());
}

#[tokio::test]
async fn test_recompute_band_keeps_previous_when_short() {
    let store = seeded_store().await;
    let engine = engine(store.clone());
    engine.recompute_all(now()).await.unwrap();

    let later = now() + Duration::hours(1);
    let run = engine.recompute_band(LoadBand::Band80To100, later).await.unwrap();
    let BaselineRun::Completed(baselines) = run else {
        panic!("recompute did not run");
    };
    assert_eq!(baselines.len(), 1);
    // five samples are short of the minimum, so the previous statistics are re-stamped
    assert_eq!(baselines[0].sample_count, 5);
    assert_eq!(baselines[0].window_end, later);
}

#[tokio::test]
async fn test_cold_start_without_history_writes_no_status() {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(store.clone());

    let decision = engine.ensure_fresh(LoadBand::Band40To60, now()).await.unwrap();
    assert_eq!(decision, FreshnessDecision::ColdStart);
    assert!(engine.repository().load_status(now()).await.unwrap().is_none());
    assert!(store.points(STATUS_MEASUREMENT).await.is_empty());

    // still a cold start on the next check
    let again = engine.ensure_fresh(LoadBand::Band40To60, now()).await.unwrap();
    assert_eq!(again, FreshnessDecision::ColdStart);
}

/// One point per register with its unit tag, as the poller writes them.
async fn write_register_history(store: &MemoryStore, catalog: &RegisterCatalog) {
    for minute in 0..20i64 {
        let timestamp = now() - Duration::minutes(60 - minute);
        let oil = if minute % 2 == 0 { 395.0 } else { 405.0 };
        for (name, value) in [
            ("Engine Speed", 1800.0),
            ("Engine Oil Pressure", oil),
            ("Generator Total Real Power", 50.0),
        ] {
            let def = catalog.get(name).unwrap();
            let reading = CorrectedReading {
                register_name: def.name.clone(),
                value,
                units: def.units.clone(),
                corrected: false,
                correction: None,
                text: None,
                timestamp,
            };
            store
                .write_point(&Poller::reading_point(def, &reading))
                .await
                .unwrap();
        }
    }
}

#[tokio::test]
async fn test_per_register_history_feeds_running_band() {
    let _ = env_logger::builder().is_test(true).try_init();
    let catalog = RegisterCatalog::from_config(&Config::default()).unwrap();
    let store = Arc::new(MemoryStore::new());
    write_register_history(&store, &catalog).await;
    let engine = engine(store.clone());

    engine.recompute_all(now()).await.unwrap();

    let half = engine
        .repository()
        .load_latest(LoadBand::Band40To60, now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(half.sample_count, 20);
    let oil = half.stats(Metric::OilPressure).unwrap();
    assert_relative_eq!(oil.avg, 400.0, epsilon = 1e-9);
    assert_relative_eq!(oil.stddev, 5.0, epsilon = 1e-9);
    assert!(engine
        .repository()
        .load_latest(LoadBand::Stopped, now())
        .await
        .unwrap()
        .is_none());
}
