use axum::{routing::get, Router};
use senml_ingestor::clock::{Clock, SystemClock};
use senml_ingestor::config::Config;
use senml_ingestor::db::{self, PgStationStore, PgTelemetryStore};
use senml_ingestor::ingest::Ingestor;
use senml_ingestor::mqtt::{self, MqttSettings};
use senml_ingestor::query::TelemetryQueries;
use senml_ingestor::rest::{self, AppState};
use senml_ingestor::stations::StationRegistry;
use senml_ingestor::store::{StationStore, TelemetryStore};
use senml_ingestor::{metrics, worker};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    info!("Starting SenML ingestor");
    info!("MQTT broker: {}:{} ({})", config.mqtt_broker, config.mqtt_port, config.mqtt_topic);
    info!("HTTP server: {}", config.http_addr);
    info!("Database: {}", config.redacted_database_url());
    info!("Delivery is at-most-once: failed messages are logged and dropped, never retried");

    if let Err(e) = metrics::init_metrics() {
        error!("Failed to register metrics: {}", e);
        std::process::exit(1);
    }

    let pool = match db::make_pool(&config.database_url, config.db_max_connections).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let telemetry: Arc<dyn TelemetryStore> = Arc::new(PgTelemetryStore::new(pool.clone()));
    let station_store: Arc<dyn StationStore> = Arc::new(PgStationStore::new(pool));
    let stations = StationRegistry::new(station_store, clock.clone());
    let ingestor = Ingestor::new(stations.clone(), telemetry.clone());

    info!("Channel capacity: {}", config.channel_capacity);
    let (tx, rx) = mpsc::channel(config.channel_capacity);

    let settings = MqttSettings {
        broker: config.mqtt_broker.clone(),
        port: config.mqtt_port,
        client_id: format!("{}-{}", config.mqtt_client_prefix, uuid::Uuid::new_v4()),
        topic: config.mqtt_topic.clone(),
    };
    let mqtt_clock = clock.clone();
    let mqtt_handle = tokio::spawn(async move {
        if let Err(e) = mqtt::run_mqtt(settings, mqtt_clock, tx).await {
            error!("MQTT task failed: {}", e);
        }
    });

    let concurrency = config.worker_concurrency;
    let worker_handle = tokio::spawn(async move {
        worker::run_workers(rx, ingestor, concurrency).await;
    });

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(AppState {
            queries: TelemetryQueries::new(telemetry.clone()),
            stations,
            telemetry,
            clock,
            default_page_size: config.default_page_size,
        }));

    let listener = match tokio::net::TcpListener::bind(&config.http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.http_addr, e);
            std::process::exit(1);
        }
    };

    info!("HTTP server listening on {}", config.http_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = mqtt_handle => {
            error!("MQTT task terminated");
        }
        _ = worker_handle => {
            error!("Worker pool terminated");
        }
        _ = server_handle => {
            error!("HTTP server terminated");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutting down");
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
