use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declares the fixed metric columns once: the struct, the SenML name of each
/// column, and by-name writes in declaration order.
macro_rules! metric_columns {
    ($($field:ident),+ $(,)?) => {
        /// The fixed, independently nullable metric columns of a telemetry row.
        /// Field names double as SenML measurement names and SQL column names.
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
        pub struct Metrics {
            $(pub $field: Option<f64>,)+
        }

        impl Metrics {
            pub const COLUMNS: &'static [&'static str] = &[$(stringify!($field)),+];

            /// Writes `value` into the column called `name`. Returns false when
            /// `name` is not a fixed column.
            pub fn set(&mut self, name: &str, value: Option<f64>) -> bool {
                match name {
                    $(stringify!($field) => {
                        self.$field = value;
                        true
                    })+
                    _ => false,
                }
            }

            /// Column values in `COLUMNS` order.
            pub fn values(&self) -> Vec<Option<f64>> {
                vec![$(self.$field),+]
            }
        }
    };
}

metric_columns!(
    temp, hum, press, dew_point, wind_speed, wind_dir, wind_gust, rain, rain_rate, solar_rad,
    uv, lux, pm1, pm25, pm10, co2, voc, noise, bat, rssi,
);

/// A normalized telemetry row before storage assigns its cursor id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryDraft {
    pub time: DateTime<Utc>,
    pub device_uuid: String,
    pub firmware_version: String,
    pub model: Option<String>,
    pub ingested_at: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: Metrics,
    pub extras: BTreeMap<String, f64>,
}

/// A stored telemetry row. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPoint {
    /// Insertion-ordered, never reused. Serialized as a string since clients
    /// only ever hand it back inside a cursor.
    #[serde(serialize_with = "serialize_cursor_id")]
    pub cursor_id: i64,
    pub time: DateTime<Utc>,
    pub device_uuid: String,
    pub firmware_version: String,
    pub model: Option<String>,
    pub ingested_at: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: Metrics,
    pub extras: BTreeMap<String, f64>,
}

fn serialize_cursor_id<S: serde::Serializer>(id: &i64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&id.to_string())
}

impl TelemetryPoint {
    pub fn from_draft(cursor_id: i64, draft: TelemetryDraft) -> Self {
        Self {
            cursor_id,
            time: draft.time,
            device_uuid: draft.device_uuid,
            firmware_version: draft.firmware_version,
            model: draft.model,
            ingested_at: draft.ingested_at,
            metrics: draft.metrics,
            extras: draft.extras,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

pub const DEFAULT_STATION_STATUS: &str = "pending";

/// One registered device. Soft-deleted rows keep their identity and history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub uuid: String,
    pub name: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub location: Option<Location>,
    pub description: Option<String>,
    pub status: String,
    pub auto_created: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Station {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Device identity as seen in an ingestion event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedStation {
    pub uuid: String,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
}

/// Body of `POST /api/v1/stations`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStation {
    pub uuid: String,
    pub name: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub location: Option<Location>,
    pub description: Option<String>,
    pub status: Option<String>,
}

/// Body of `PATCH /api/v1/stations/{uuid}`. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationPatch {
    pub name: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub location: Option<Location>,
    pub description: Option<String>,
    pub status: Option<String>,
}

/// SenML-derived MQTT payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenmlPayload {
    pub device_info: DeviceInfo,
    pub measures: Vec<Measure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub uuid: String,
    pub fw_ver: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// One sparse SenML record. Carries at most one of `v`, `vs`, `vb`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vb: Option<bool>,
    /// Offset in seconds from the base time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<f64>,
    /// Base time in epoch seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bt: Option<f64>,
}

/// A publish as handed from the MQTT listener to the worker pool.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}
