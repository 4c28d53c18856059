use crate::errors::Result;
use crate::metrics::{
    DUPLICATE_POINTS_TOTAL, FAILED_MESSAGES_TOTAL, INGESTED_POINTS_TOTAL, INGEST_LATENCY_SECONDS,
    INVALID_MESSAGES_TOTAL, STATIONS_RECONCILED_TOTAL, VALID_MESSAGES_TOTAL,
};
use crate::model::{InboundMessage, ObservedStation, TelemetryPoint};
use crate::senml::normalize;
use crate::stations::StationRegistry;
use crate::store::TelemetryStore;
use crate::validate::parse_payload;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// What became of one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Stored(TelemetryPoint),
    /// A row for this device and time already existed.
    Duplicate,
}

/// Runs each inbound message through parse, validate, normalize, station
/// reconcile and insert.
///
/// Delivery is at-most-once: a failed message is logged and counted, never
/// retried or re-queued.
#[derive(Clone)]
pub struct Ingestor {
    stations: StationRegistry,
    telemetry: Arc<dyn TelemetryStore>,
}

impl Ingestor {
    pub fn new(stations: StationRegistry, telemetry: Arc<dyn TelemetryStore>) -> Self {
        Self {
            stations,
            telemetry,
        }
    }

    /// Processes one message and reports the outcome to the caller.
    pub async fn ingest(&self, message: &InboundMessage) -> Result<IngestOutcome> {
        let payload = parse_payload(&message.payload)?;
        VALID_MESSAGES_TOTAL.inc();

        let device = &payload.device_info;
        let draft = normalize(device, &payload.measures, message.received_at)?;

        self.stations
            .reconcile(&ObservedStation {
                uuid: device.uuid.clone(),
                model: device.model.clone(),
                firmware_version: Some(device.fw_ver.clone()),
            })
            .await?;
        STATIONS_RECONCILED_TOTAL.inc();

        match self.telemetry.insert(&draft).await? {
            Some(point) => {
                INGESTED_POINTS_TOTAL.inc();
                Ok(IngestOutcome::Stored(point))
            }
            None => {
                DUPLICATE_POINTS_TOTAL.inc();
                Ok(IngestOutcome::Duplicate)
            }
        }
    }

    /// Processes one message, logging and swallowing any failure so the
    /// listener keeps running.
    pub async fn process(&self, message: InboundMessage) {
        let start = Instant::now();
        match self.ingest(&message).await {
            Ok(IngestOutcome::Stored(point)) => {
                INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
                debug!(
                    topic = %message.topic,
                    device_uuid = %point.device_uuid,
                    cursor_id = point.cursor_id,
                    time = %point.time,
                    "telemetry stored"
                );
            }
            Ok(IngestOutcome::Duplicate) => {
                debug!(topic = %message.topic, "duplicate telemetry point dropped");
            }
            Err(e) if e.is_client_error() => {
                INVALID_MESSAGES_TOTAL.inc();
                warn!(
                    topic = %message.topic,
                    size = message.payload.len(),
                    error = %e,
                    "rejected message"
                );
            }
            Err(e) => {
                FAILED_MESSAGES_TOTAL.inc();
                error!(
                    topic = %message.topic,
                    size = message.payload.len(),
                    received_at = %message.received_at,
                    error = %e,
                    "message dropped after storage failure"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::errors::Error;
    use crate::memory::{MemoryStationStore, MemoryTelemetryStore};
    use chrono::{TimeZone, Utc};

    fn ingestor() -> (Ingestor, Arc<MemoryStationStore>, Arc<MemoryTelemetryStore>) {
        let stations = Arc::new(MemoryStationStore::new());
        let telemetry = Arc::new(MemoryTelemetryStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let registry = StationRegistry::new(stations.clone(), clock);
        (Ingestor::new(registry, telemetry.clone()), stations, telemetry)
    }

    fn message(payload: &str) -> InboundMessage {
        InboundMessage {
            topic: "telemetry/d1".to_string(),
            payload: payload.as_bytes().to_vec(),
            received_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_ingest_stores_point() {
        tokio_test::block_on(async {
            let (ingestor, stations, _) = ingestor();
            let outcome = ingestor
                .ingest(&message(
                    r#"{"device_info":{"uuid":"d1","fw_ver":"1.0"},"measures":[{"n":"temp","v":21.5}]}"#,
                ))
                .await
                .unwrap();
            let IngestOutcome::Stored(point) = outcome else {
                panic!("expected a stored point");
            };
            assert_eq!(point.metrics.temp, Some(21.5));
            assert!(stations.raw("d1").await.is_some());
        });
    }

    #[test]
    fn test_invalid_message_touches_nothing() {
        tokio_test::block_on(async {
            let (ingestor, stations, telemetry) = ingestor();
            let err = ingestor
                .ingest(&message(r#"{"device_info":{"uuid":"","fw_ver":"1"},"measures":[]}"#))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Validation { .. }));
            assert_eq!(stations.count().await, 0);
            assert!(telemetry.is_empty().await);
        });
    }

    #[test]
    fn test_redelivery_is_a_duplicate() {
        tokio_test::block_on(async {
            let (ingestor, _, telemetry) = ingestor();
            let msg = message(
                r#"{"device_info":{"uuid":"d1","fw_ver":"1.0"},"measures":[{"n":"hum","v":40}]}"#,
            );
            assert!(matches!(ingestor.ingest(&msg).await, Ok(IngestOutcome::Stored(_))));
            assert_eq!(ingestor.ingest(&msg).await.unwrap(), IngestOutcome::Duplicate);
            assert_eq!(telemetry.len().await, 1);
        });
    }

    #[test]
    fn test_process_swallows_failures() {
        tokio_test::block_on(async {
            let (ingestor, _, telemetry) = ingestor();
            ingestor.process(message("invalid json")).await;
            ingestor
                .process(message(
                    r#"{"device_info":{"uuid":"d1","fw_ver":"1.0"},"measures":[]}"#,
                ))
                .await;
            assert_eq!(telemetry.len().await, 1);
        });
    }
}
