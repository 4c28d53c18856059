mod senml;

use chrono::Utc;
use clap::Parser;
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use senml::{DeviceInfo, Measure, SenmlPayload};
use std::time::Duration;
use tracing::{error, info, warn};

/// Publishes synthetic SenML telemetry for a fleet of stations.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Messages per second across all devices
    #[arg(long, env = "RATE", default_value_t = 1000)]
    rate: u64,

    #[arg(long, env = "DEVICES", default_value_t = 100)]
    devices: usize,

    /// Share of messages that are deliberately malformed
    #[arg(long, env = "BAD_RATIO", default_value_t = 0.01)]
    bad_ratio: f64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt::init();

    info!("Starting SenML simulator");
    info!(
        "Broker: {}:{}, Rate: {} msg/s, Devices: {}",
        args.broker, args.port, args.rate, args.devices
    );

    let mut rng = rand::thread_rng();
    let client_id = format!("sim-{}", uuid::Uuid::new_v4());

    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Connected to MQTT broker, starting to publish telemetry");

    let mut counter = 0u64;

    const BURST_SIZE: usize = 200;
    let burst_interval = Duration::from_millis((BURST_SIZE as u64 * 1000) / args.rate.max(1));

    info!("Publishing in bursts of {} messages every {:?}", BURST_SIZE, burst_interval);

    loop {
        let burst_start = std::time::Instant::now();

        for _ in 0..BURST_SIZE {
            let device_uuid = format!("station-{:04}", counter % args.devices.max(1) as u64);
            let topic = format!("telemetry/{}", device_uuid);

            let payload = if rng.gen_bool(args.bad_ratio.clamp(0.0, 1.0)) {
                malformed_payload(&mut rng, &device_uuid)
            } else {
                match serde_json::to_string(&generate_payload(&mut rng, device_uuid)) {
                    Ok(p) => p,
                    Err(e) => {
                        error!("Failed to serialize payload: {}", e);
                        continue;
                    }
                }
            };

            match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
                Ok(_) => counter += 1,
                Err(e) => warn!("Failed to publish: {}", e),
            }
        }

        if counter % 10000 == 0 {
            info!("Published {} messages", counter);
        }

        let elapsed = burst_start.elapsed();
        if elapsed < burst_interval {
            tokio::time::sleep(burst_interval - elapsed).await;
        } else if elapsed > burst_interval * 2 {
            warn!(
                "Burst took {:?}, target was {:?} - system may be overloaded",
                elapsed, burst_interval
            );
        }
    }
}

/// A reading burst covering fixed columns, explicit zeros, string and
/// boolean values, and names the ingestor does not know.
fn generate_payload(rng: &mut impl Rng, device_uuid: String) -> SenmlPayload {
    let mut temp = Measure::number("temp", rng.gen_range(15.0..35.0));
    if rng.gen_bool(0.5) {
        temp.bt = Some(Utc::now().timestamp() as f64 - 10.0);
    }

    let mut measures = vec![
        temp,
        Measure::number("hum", rng.gen_range(30.0..80.0)).at(1.0),
        // Calm air is reported as an explicit zero.
        Measure::number("wind_speed", calm_or(rng, 0.5..12.0)).at(2.0),
        Measure::text("bat", format!("{:.1}", rng.gen_range(20.0..100.0))).at(3.0),
        Measure::flag("door_open", rng.gen_bool(0.1)).at(3.0),
    ];

    if rng.gen_bool(0.3) {
        measures.push(Measure::number("soil_moisture", rng.gen_range(0.05..0.45)).at(4.0));
    }
    if rng.gen_bool(0.05) {
        measures.push(Measure::text("pm25", "n/a".to_string()));
    }

    SenmlPayload {
        device_info: DeviceInfo {
            uuid: device_uuid,
            fw_ver: "1.4.2".to_string(),
            model: rng.gen_bool(0.8).then(|| "ws-200".to_string()),
        },
        measures,
    }
}

fn calm_or(rng: &mut impl Rng, range: std::ops::Range<f64>) -> f64 {
    if rng.gen_bool(0.2) {
        0.0
    } else {
        rng.gen_range(range)
    }
}

fn malformed_payload(rng: &mut impl Rng, device_uuid: &str) -> String {
    match rng.gen_range(0..3) {
        0 => "{not json".to_string(),
        1 => format!(r#"{{"device_info":{{"uuid":"{device_uuid}"}},"measures":[]}}"#),
        _ => format!(
            r#"{{"device_info":{{"uuid":"{device_uuid}","fw_ver":"1"}},"measures":[{{"n":"temp","t":"soon"}}]}}"#
        ),
    }
}
