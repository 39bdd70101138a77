// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Poll cycles end to end: simulated controller to in-memory store

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_genset_monitor::catalog::RegisterCatalog;
use rust_genset_monitor::config::Config;
use rust_genset_monitor::modbus::{
    ConnectionManager, ConnectionSettings, ConnectionState, RecordingSleeper, RegisterImage,
    SimulatedController,
};
use rust_genset_monitor::poller::{PollSchedule, Poller};
use rust_genset_monitor::store::{
    FieldValue, MemoryStore, TimeSeriesStore, EVENTS_MEASUREMENT, METRICS_MEASUREMENT,
};

struct Rig {
    controller: SimulatedController,
    store: Arc<MemoryStore>,
    conn: ConnectionManager,
    poller: Poller,
}

async fn rig() -> Rig {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = Config::default();
    let catalog = Arc::new(RegisterCatalog::from_config(&config).unwrap());
    let controller = SimulatedController::new(RegisterImage::running_engine(
        &config.registers,
        &config.events,
    ));
    let store = Arc::new(MemoryStore::new());
    let mut conn = ConnectionManager::new(
        Arc::new(controller.clone()),
        Arc::new(RecordingSleeper::new()),
        ConnectionSettings::from_config(&config.modbus, &catalog),
    );
    conn.connect(&AtomicBool::new(true)).await.unwrap();
    let poller = Poller::from_config(&config, catalog, store.clone());
    Rig {
        controller,
        store,
        conn,
        poller,
    }
}

fn field<'a>(points: &'a [rust_genset_monitor::store::Point], name: &str) -> Option<&'a FieldValue> {
    points.iter().find_map(|p| p.fields.get(name))
}

#[tokio::test]
async fn test_cycle_writes_corrected_readings() {
    let mut rig = rig().await;
    let report = rig.poller.poll_cycle(&mut rig.conn).await;

    assert!(!report.interrupted);
    assert_eq!(report.failed, 0);
    assert_eq!(report.engine_speed, 1800.0);
    // cumulative kWh counter flagged unsupported
    assert_eq!(report.skipped, 1);
    assert!(report.corrected >= 1);
    assert_eq!(report.events, 1);

    let metrics = rig.store.points(METRICS_MEASUREMENT).await;
    assert_eq!(metrics.len(), report.written);
    assert_eq!(field(&metrics, "Engine_Oil_Pressure"), Some(&FieldValue::Float(412.5)));
    assert_eq!(field(&metrics, "Generator_Apparent_Power"), Some(&FieldValue::Float(0.0)));
    assert_eq!(
        field(&metrics, "Generator_Apparent_Power_corrected"),
        Some(&FieldValue::Bool(true))
    );
    assert_eq!(
        field(&metrics, "Generator_State_text"),
        Some(&FieldValue::Text("Running".to_string()))
    );
    assert!(field(&metrics, "Total_Runtime_kW_Hours").is_none());

    let events = rig.store.points(EVENTS_MEASUREMENT).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].tags.get("param_id").map(String::as_str), Some("100"));
    assert_eq!(
        events[0].fields.get("message"),
        Some(&FieldValue::Text("Low Oil Pressure Warning".to_string()))
    );
}

#[tokio::test]
async fn test_event_expires_after_three_absent_polls() {
    let mut rig = rig().await;
    rig.poller.poll_cycle(&mut rig.conn).await;

    // controller clears its table
    rig.controller.image().set_address(100, 0);
    for expected in [1, 1, 0] {
        let report = rig.poller.poll_cycle(&mut rig.conn).await;
        assert_eq!(report.events, expected);
    }
    let table = rig.poller.events().unwrap().table();
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_failed_register_is_skipped_for_the_cycle() {
    let mut rig = rig().await;
    // Engine Fuel Rate, address 7
    rig.controller.fail_reads(6, 5);

    let report = rig.poller.poll_cycle(&mut rig.conn).await;
    assert_eq!(report.failed, 1);
    assert!(!report.values.contains_key("Engine_Fuel_Rate"));
    assert!(report.values.contains_key("Intake_Air_Temperature"));
    assert_eq!(rig.conn.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_link_loss_interrupts_cycle() {
    let mut rig = rig().await;
    rig.controller.set_link_down(true);

    let report = rig.poller.poll_cycle(&mut rig.conn).await;
    assert!(report.interrupted);
    assert_eq!(rig.conn.state(), ConnectionState::Degraded);
    assert_eq!(report.written, 0);
}

#[tokio::test]
async fn test_store_rejection_counts_write_errors() {
    let mut rig = rig().await;
    rig.store.reject_writes(true);

    let report = rig.poller.poll_cycle(&mut rig.conn).await;
    assert_eq!(report.written, 0);
    assert!(report.write_errors > 0);
    assert!(rig.store.is_empty().await);
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let mut rig = rig().await;
    let running = Arc::new(AtomicBool::new(true));
    let mut poller = rig.poller.with_schedule(PollSchedule {
        health_check_every: 1,
        ..PollSchedule::default()
    });

    let stopper = running.clone();
    let store = rig.store.clone();
    let watcher = tokio::spawn(async move {
        while store.len().await < 60 {
            tokio::task::yield_now().await;
        }
        stopper.store(false, Ordering::SeqCst);
    });

    poller.run(&mut rig.conn, running).await.unwrap();
    watcher.await.unwrap();
    assert_eq!(rig.conn.state(), ConnectionState::Disconnected);
    assert!(rig.store.len().await >= 60);

    let latest = rig
        .store
        .query_latest(&rust_genset_monitor::store::SeriesQuery::latest(
            METRICS_MEASUREMENT,
            chrono::Duration::minutes(5),
        ))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.f64("Engine_Speed"), Some(1800.0));
}
