use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_messages_total",
        "Total messages received from MQTT"
    ))
    .unwrap();
    pub static ref VALID_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_valid_messages_total",
        "Total messages that parsed and passed validation"
    ))
    .unwrap();
    pub static ref INVALID_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_invalid_messages_total",
        "Total messages rejected as malformed"
    ))
    .unwrap();
    pub static ref FAILED_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_failed_messages_total",
        "Total valid messages dropped because storage failed"
    ))
    .unwrap();
    pub static ref INGESTED_POINTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_points_total",
        "Total telemetry rows written"
    ))
    .unwrap();
    pub static ref DUPLICATE_POINTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_duplicate_points_total",
        "Total redelivered points dropped on (device, time) conflict"
    ))
    .unwrap();
    pub static ref STATIONS_RECONCILED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_stations_reconciled_total",
        "Total station upserts performed by ingestion"
    ))
    .unwrap();
    pub static ref INGEST_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "ingestor_ingest_latency_seconds",
            "Time taken to reconcile and store one message"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
    pub static ref CHANNEL_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "ingestor_channel_full_total",
        "Total number of times channel was full (backpressure events)"
    ))
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FAILED_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGESTED_POINTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DUPLICATE_POINTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATIONS_RECONCILED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_LATENCY_SECONDS.clone()))?;
    REGISTRY.register(Box::new(CHANNEL_FULL_TOTAL.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
