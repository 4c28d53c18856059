use crate::clock::Clock;
use crate::errors::{Error, Result};
use crate::metrics::{CHANNEL_FULL_TOTAL, MESSAGES_TOTAL};
use crate::model::InboundMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub struct MqttSettings {
    pub broker: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
}

/// Subscribes to the telemetry topic and hands every publish to the worker
/// pool. Never processes payloads itself.
///
/// Each publish is stamped with the receipt time. QoS 1 redeliveries are only
/// deduplicated downstream when the payload carries `bt`; otherwise the
/// receipt time becomes the row time and a redelivery stores a new row.
pub async fn run_mqtt(
    settings: MqttSettings,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<InboundMessage>,
) -> Result<()> {
    info!(
        "Connecting to MQTT broker at {}:{}",
        settings.broker, settings.port
    );

    let mut mqtt_options = MqttOptions::new(settings.client_id, settings.broker, settings.port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    client
        .subscribe(settings.topic.as_str(), QoS::AtLeastOnce)
        .await
        .map_err(Error::Mqtt)?;

    info!("Subscribed to {} with QoS 1", settings.topic);

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    MESSAGES_TOTAL.inc();

                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    let message = InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                        received_at: clock.now(),
                    };
                    if let Err(e) = forward(message, &tx).await {
                        error!("Worker channel closed, stopping MQTT listener: {}", e);
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// Queues a message for the workers, waiting when the channel is full.
async fn forward(message: InboundMessage, tx: &mpsc::Sender<InboundMessage>) -> Result<()> {
    match tx.try_send(message) {
        Ok(()) => Ok(()),
        Err(mpsc::error::TrySendError::Full(message)) => {
            CHANNEL_FULL_TOTAL.inc();
            debug!("Channel full, using blocking send");
            tx.send(message).await.map_err(|_| Error::ChannelSend)
        }
        Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::ChannelSend),
    }
}
