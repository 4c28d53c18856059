use crate::ingest::Ingestor;
use crate::model::InboundMessage;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};

/// Drains the inbound channel, running each message in its own task with at
/// most `concurrency` in flight. Returns once the channel is closed and every
/// in-flight message has finished.
pub async fn run_workers(
    mut rx: mpsc::Receiver<InboundMessage>,
    ingestor: Ingestor,
    concurrency: usize,
) {
    let concurrency = concurrency.max(1);
    info!("Starting worker pool with concurrency={}", concurrency);

    let permits = Arc::new(Semaphore::new(concurrency));

    while let Some(message) = rx.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("Worker semaphore closed: {}", e);
                break;
            }
        };
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            ingestor.process(message).await;
            drop(permit);
        });
    }

    info!("Channel closed, waiting for in-flight messages");
    if permits.acquire_many(concurrency as u32).await.is_err() {
        error!("Worker semaphore closed while draining");
    }
    info!("Worker pool stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::memory::{MemoryStationStore, MemoryTelemetryStore};
    use crate::stations::StationRegistry;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_pool_processes_everything_before_returning() {
        let telemetry = Arc::new(MemoryTelemetryStore::new());
        let stations = Arc::new(MemoryStationStore::new());
        let registry = StationRegistry::new(stations.clone(), Arc::new(SystemClock));
        let ingestor = Ingestor::new(registry, telemetry.clone());

        let (tx, rx) = mpsc::channel(8);
        let pool = tokio::spawn(run_workers(rx, ingestor, 3));

        let base = Utc::now();
        for i in 0..20 {
            let payload = format!(
                r#"{{"device_info":{{"uuid":"dev-{}","fw_ver":"1.0"}},"measures":[{{"n":"temp","v":{}}}]}}"#,
                i % 4,
                i
            );
            tx.send(InboundMessage {
                topic: format!("telemetry/dev-{}", i % 4),
                payload: payload.into_bytes(),
                received_at: base + Duration::seconds(i),
            })
            .await
            .unwrap();
        }
        tx.send(InboundMessage {
            topic: "telemetry/broken".to_string(),
            payload: b"{".to_vec(),
            received_at: base,
        })
        .await
        .unwrap();
        drop(tx);

        pool.await.unwrap();
        assert_eq!(telemetry.len().await, 20);
        assert_eq!(stations.count().await, 4);
    }
}
