// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-genset-monitor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! InfluxStore against a mocked InfluxDB 2.x HTTP API

use chrono::{DateTime, Duration, Utc};
use rust_genset_monitor::store::{
    FieldValue, InfluxStore, Point, SeriesQuery, TimeSeriesStore, METRICS_MEASUREMENT,
};
use rust_genset_monitor::TelemetryError;
use wiremock::matchers::{body_string, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn at(ts: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc)
}

fn store(server: &MockServer) -> InfluxStore {
    let _ = env_logger::builder().is_test(true).try_init();
    InfluxStore::new(server.uri(), "secret", "plant", "genset").with_timeout_seconds(2)
}

#[tokio::test]
async fn test_write_point_sends_line_protocol() {
    let server = MockServer::start().await;
    let ts = at("2025-06-01T12:00:00Z");
    let expected = format!(
        "generator_metrics,site=north Engine_Speed=1800.0,Generator_State_text=\"Running\" {}",
        ts.timestamp_nanos_opt().unwrap()
    );

    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .and(query_param("org", "plant"))
        .and(query_param("bucket", "genset"))
        .and(query_param("precision", "ns"))
        .and(header("authorization", "Token secret"))
        .and(body_string(expected))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let point = Point::new(METRICS_MEASUREMENT)
        .tag("site", "north")
        .field("Engine_Speed", 1800.0)
        .field("Generator_State_text", "Running")
        .at(ts);
    store(&server).write_point(&point).await.unwrap();
}

#[tokio::test]
async fn test_rejected_write_is_a_store_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized access"))
        .mount(&server)
        .await;

    let point = Point::new(METRICS_MEASUREMENT).field("Engine_Speed", 0.0);
    let err = store(&server).write_point(&point).await.unwrap_err();
    match err {
        TelemetryError::StoreWrite {
            measurement,
            message,
        } => {
            assert_eq!(measurement, METRICS_MEASUREMENT);
            assert!(message.contains("401"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn test_point_without_finite_fields_is_not_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let point = Point::new(METRICS_MEASUREMENT).field("Engine_Speed", f64::NAN);
    assert!(store(&server).write_point(&point).await.is_err());
}

const LATEST_CSV: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string\r
#group,false,false,true,true,false,false,true,true\r
#default,_result,,,,,,,\r
,result,table,_start,_stop,_time,_value,_field,_measurement\r
,,0,2025-06-01T11:55:00Z,2025-06-01T12:00:00Z,2025-06-01T11:59:30Z,1800,Engine_Speed,generator_metrics\r
,,1,2025-06-01T11:55:00Z,2025-06-01T12:00:00Z,2025-06-01T11:59:00Z,412.5,Engine_Oil_Pressure,generator_metrics\r
\r
";

#[tokio::test]
async fn test_query_latest_merges_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/query"))
        .and(query_param("org", "plant"))
        .and(header("authorization", "Token secret"))
        .and(header("content-type", "application/vnd.flux"))
        .and(body_string_contains("from(bucket: \"genset\")"))
        .and(body_string_contains("r._field == \"Engine_Speed\""))
        .and(body_string_contains("|> last()"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LATEST_CSV))
        .expect(1)
        .mount(&server)
        .await;

    let end = at("2025-06-01T12:00:00Z");
    let query = SeriesQuery::new(METRICS_MEASUREMENT, end - Duration::minutes(5), end)
        .fields(["Engine_Speed", "Engine_Oil_Pressure"]);
    let record = store(&server).query_latest(&query).await.unwrap().unwrap();

    assert_eq!(record.timestamp, at("2025-06-01T11:59:30Z"));
    assert_eq!(record.f64("Engine_Speed"), Some(1800.0));
    assert_eq!(record.f64("Engine_Oil_Pressure"), Some(412.5));
}

#[tokio::test]
async fn test_query_range_keeps_tags_and_text() {
    let server = MockServer::start().await;
    let csv = "\
,result,table,_time,_value,_field,_measurement,load_band\r
,,0,2025-06-01T10:00:00Z,400,Engine_Oil_Pressure_avg,powertrain_baselines,40-60\r
,,1,2025-06-01T10:00:00Z,\"a, quoted\",note,powertrain_baselines,40-60\r
,,2,2025-06-01T10:00:00Z,true,provisional,powertrain_baselines,40-60\r
";
    Mock::given(method("POST"))
        .and(path("/api/v2/query"))
        .and(body_string_contains("aggregateWindow(every: 60s"))
        .and(body_string_contains("r[\"load_band\"] == \"40-60\""))
        .respond_with(ResponseTemplate::new(200).set_body_string(csv))
        .mount(&server)
        .await;

    let end = at("2025-06-01T12:00:00Z");
    let query = SeriesQuery::new("powertrain_baselines", end - Duration::days(1), end)
        .tag("load_band", "40-60")
        .aggregate(std::time::Duration::from_secs(60));
    let records = store(&server).query_range(&query).await.unwrap();

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.tags.get("load_band").map(String::as_str), Some("40-60"));
    assert_eq!(record.f64("Engine_Oil_Pressure_avg"), Some(400.0));
    assert_eq!(record.text("note"), Some("a, quoted"));
    assert_eq!(record.fields.get("provisional"), Some(&FieldValue::Bool(true)));
}

#[tokio::test]
async fn test_failed_query_is_a_store_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/query"))
        .respond_with(ResponseTemplate::new(400).set_body_string("{\"code\":\"invalid\"}"))
        .mount(&server)
        .await;

    let query = SeriesQuery::latest(METRICS_MEASUREMENT, Duration::minutes(5));
    let err = store(&server).query_latest(&query).await.unwrap_err();
    assert!(matches!(err, TelemetryError::StoreQuery { .. }));
}

#[tokio::test]
async fn test_history_merges_per_unit_series_by_window() {
    let server = MockServer::start().await;
    // one table per register series, each carrying its own unit tag
    let csv = "\
,result,table,_start,_stop,_time,_value,_field,_measurement,unit\r
,_result,0,2025-03-01T00:00:00Z,2025-03-02T00:00:00Z,2025-03-01T00:01:00Z,1800,Engine_Speed,generator_metrics,RPM\r
,_result,1,2025-03-01T00:00:00Z,2025-03-02T00:00:00Z,2025-03-01T00:01:00Z,412.5,Engine_Oil_Pressure,generator_metrics,kPa\r
,_result,2,2025-03-01T00:00:00Z,2025-03-02T00:00:00Z,2025-03-01T00:01:00Z,75,Generator_Total_Real_Power,generator_metrics,kW\r
,_result,0,2025-03-01T00:00:00Z,2025-03-02T00:00:00Z,2025-03-01T00:02:00Z,1795,Engine_Speed,generator_metrics,RPM\r
";
    Mock::given(method("POST"))
        .and(path("/api/v2/query"))
        .and(body_string_contains("|> group(columns: [\"_field\"])"))
        .and(body_string_contains("aggregateWindow(every: 60s"))
        .respond_with(ResponseTemplate::new(200).set_body_string(csv))
        .expect(1)
        .mount(&server)
        .await;

    let end = at("2025-03-02T00:00:00Z");
    let query = SeriesQuery::new(METRICS_MEASUREMENT, end - Duration::days(1), end)
        .fields(["Engine_Speed", "Engine_Oil_Pressure", "Generator_Total_Real_Power"])
        .aggregate(std::time::Duration::from_secs(60));
    let records = store(&server).query_range(&query).await.unwrap();

    assert_eq!(records.len(), 2);
    let first = &records[0];
    assert_eq!(first.timestamp, at("2025-03-01T00:01:00Z"));
    assert!(first.tags.is_empty());
    assert_eq!(first.f64("Engine_Speed"), Some(1800.0));
    assert_eq!(first.f64("Engine_Oil_Pressure"), Some(412.5));
    assert_eq!(first.f64("Generator_Total_Real_Power"), Some(75.0));
    assert_eq!(records[1].f64("Engine_Speed"), Some(1795.0));
}
