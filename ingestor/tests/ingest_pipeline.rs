use chrono::{Duration, TimeZone, Utc};
use senml_ingestor::clock::FixedClock;
use senml_ingestor::ingest::{IngestOutcome, Ingestor};
use senml_ingestor::memory::{MemoryStationStore, MemoryTelemetryStore};
use senml_ingestor::model::InboundMessage;
use senml_ingestor::pagination::PageRequest;
use senml_ingestor::planner::TelemetryQuery;
use senml_ingestor::query::TelemetryQueries;
use senml_ingestor::stations::StationRegistry;
use std::sync::Arc;

struct Harness {
    ingestor: Ingestor,
    stations: Arc<MemoryStationStore>,
    queries: TelemetryQueries,
}

fn harness() -> Harness {
    let stations = Arc::new(MemoryStationStore::new());
    let telemetry = Arc::new(MemoryTelemetryStore::new());
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let registry = StationRegistry::new(stations.clone(), clock);
    Harness {
        ingestor: Ingestor::new(registry, telemetry.clone()),
        stations,
        queries: TelemetryQueries::new(telemetry),
    }
}

fn message(payload: &str, received_at: chrono::DateTime<Utc>) -> InboundMessage {
    InboundMessage {
        topic: "telemetry/d1".to_string(),
        payload: payload.as_bytes().to_vec(),
        received_at,
    }
}

#[tokio::test]
async fn test_end_to_end_zero_is_not_null() {
    let h = harness();
    let t = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();

    let outcome = h
        .ingestor
        .ingest(&message(
            r#"{"device_info":{"uuid":"d1","fw_ver":"1.0"},"measures":[{"n":"temp","v":21.5},{"n":"hum","v":0}]}"#,
            t,
        ))
        .await
        .unwrap();
    let IngestOutcome::Stored(point) = outcome else {
        panic!("expected a stored point");
    };

    assert_eq!(point.metrics.temp, Some(21.5));
    assert_eq!(point.metrics.hum, Some(0.0));
    assert_eq!(point.metrics.press, None);
    assert_eq!(point.time, t);
    assert_eq!(point.ingested_at, t);

    let station = h.stations.raw("d1").await.unwrap();
    assert_eq!(station.status, "pending");
    assert!(station.auto_created);
    assert_eq!(station.firmware_version.as_deref(), Some("1.0"));

    let page = h
        .queries
        .page(
            &TelemetryQuery::new(
                Some("d1".to_string()),
                t - Duration::hours(1),
                t + Duration::hours(1),
                PageRequest::forward(10, None),
            )
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(page.edges.len(), 1);
    assert_eq!(page.edges[0].node, point);
    assert!(!page.page_info.has_next_page);
}

#[tokio::test]
async fn test_burst_with_base_time_and_mixed_values() {
    let h = harness();
    let received = Utc.with_ymd_and_hms(2024, 6, 1, 13, 0, 0).unwrap();
    let bt = Utc.with_ymd_and_hms(2024, 6, 1, 12, 59, 0).unwrap().timestamp();

    let payload = format!(
        r#"{{"device_info":{{"uuid":"d2","fw_ver":"3.1","model":"aq-1"}},
            "measures":[
              {{"bt":{bt},"n":"co2","vs":"412.5","t":0}},
              {{"n":"door","vb":true,"t":5}},
              {{"n":"pm25","vs":"n/a","t":2}},
              {{"n":"leaf","vs":"oops"}}
            ]}}"#
    );
    let outcome = h.ingestor.ingest(&message(&payload, received)).await.unwrap();
    let IngestOutcome::Stored(point) = outcome else {
        panic!("expected a stored point");
    };

    assert_eq!(point.time.timestamp(), bt + 5);
    assert_eq!(point.ingested_at, received);
    assert_eq!(point.model.as_deref(), Some("aq-1"));
    assert_eq!(point.metrics.co2, Some(412.5));
    assert_eq!(point.metrics.pm25, None);
    assert_eq!(point.extras.get("door"), Some(&1.0));
    assert!(!point.extras.contains_key("leaf"));

    let station = h.stations.raw("d2").await.unwrap();
    assert_eq!(station.model.as_deref(), Some("aq-1"));
}

#[tokio::test]
async fn test_one_bad_message_does_not_stop_the_stream() {
    let h = harness();
    let t = Utc.with_ymd_and_hms(2024, 6, 1, 14, 0, 0).unwrap();

    h.ingestor.process(message("{broken", t)).await;
    h.ingestor
        .process(message(r#"{"device_info":{"uuid":"d3"},"measures":[]}"#, t))
        .await;
    h.ingestor
        .process(message(
            r#"{"device_info":{"uuid":"d3","fw_ver":"1"},"measures":[{"n":"rssi","v":-71}]}"#,
            t,
        ))
        .await;

    assert_eq!(h.stations.count().await, 1);
    let page = h
        .queries
        .page(
            &TelemetryQuery::new(None, t - Duration::minutes(1), t, PageRequest::forward(5, None))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(page.edges.len(), 1);
    assert_eq!(page.edges[0].node.metrics.rssi, Some(-71.0));
}

#[tokio::test]
async fn test_mixed_value_kinds_resolve_by_priority() {
    let h = harness();
    let t = Utc.with_ymd_and_hms(2024, 6, 1, 15, 0, 0).unwrap();

    let outcome = h
        .ingestor
        .ingest(&message(
            r#"{"device_info":{"uuid":"d4","fw_ver":"1.0"},
                "measures":[{"n":"temp","v":21.5},{"n":"hum","v":0,"vb":true},{"n":"","v":3}]}"#,
            t,
        ))
        .await
        .unwrap();
    let IngestOutcome::Stored(point) = outcome else {
        panic!("expected a stored point");
    };
    assert_eq!(point.metrics.temp, Some(21.5));
    assert_eq!(point.metrics.hum, Some(0.0));
    assert!(point.extras.is_empty());
}

#[tokio::test]
async fn test_padded_uuid_keys_the_same_station() {
    let h = harness();
    let t = Utc.with_ymd_and_hms(2024, 6, 1, 16, 0, 0).unwrap();

    for (uuid, offset) in [("d5", 0), (" d5 ", 1)] {
        let payload = format!(
            r#"{{"device_info":{{"uuid":"{uuid}","fw_ver":"1.0"}},"measures":[{{"n":"uv","v":{offset}}}]}}"#
        );
        h.ingestor
            .ingest(&message(&payload, t + Duration::seconds(offset)))
            .await
            .unwrap();
    }

    assert_eq!(h.stations.count().await, 1);
    assert!(h.stations.raw("d5").await.is_some());
    let page = h
        .queries
        .page(
            &TelemetryQuery::new(
                Some("d5".to_string()),
                t - Duration::minutes(1),
                t + Duration::minutes(1),
                PageRequest::forward(10, None),
            )
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(page.edges.len(), 2);
}

#[tokio::test]
async fn test_redelivery_dedup_depends_on_base_time() {
    let h = harness();
    let first = Utc.with_ymd_and_hms(2024, 6, 1, 17, 0, 0).unwrap();
    let again = first + Duration::seconds(3);
    let bt = first.timestamp();

    let stamped = format!(
        r#"{{"device_info":{{"uuid":"d6","fw_ver":"1"}},"measures":[{{"bt":{bt},"n":"lux","v":5}}]}}"#
    );
    let outcome = h.ingestor.ingest(&message(&stamped, first)).await.unwrap();
    assert!(matches!(outcome, IngestOutcome::Stored(_)));
    let outcome = h.ingestor.ingest(&message(&stamped, again)).await.unwrap();
    assert_eq!(outcome, IngestOutcome::Duplicate);

    let unstamped = r#"{"device_info":{"uuid":"d7","fw_ver":"1"},"measures":[{"n":"lux","v":5}]}"#;
    for received in [first, again] {
        let outcome = h.ingestor.ingest(&message(unstamped, received)).await.unwrap();
        assert!(matches!(outcome, IngestOutcome::Stored(_)));
    }
}
