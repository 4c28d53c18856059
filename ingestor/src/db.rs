use crate::errors::Result;
use crate::model::{
    Location, Metrics, NewStation, ObservedStation, Station, StationPatch, TelemetryDraft,
    TelemetryPoint, DEFAULT_STATION_STATUS,
};
use crate::planner::{telemetry_columns, QueryPlan};
use crate::store::{StationStore, TelemetryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

const STATION_COLUMNS: &str = "uuid, name, model, firmware_version, latitude, longitude, \
     description, status, auto_created, deleted_at, created_at, updated_at";

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

#[derive(Debug, sqlx::FromRow)]
struct TelemetryRow {
    cursor_id: i64,
    time: DateTime<Utc>,
    device_uuid: String,
    firmware_version: String,
    model: Option<String>,
    ingested_at: DateTime<Utc>,
    extras: Json<BTreeMap<String, f64>>,
    #[sqlx(flatten)]
    metrics: Metrics,
}

impl From<TelemetryRow> for TelemetryPoint {
    fn from(row: TelemetryRow) -> Self {
        TelemetryPoint {
            cursor_id: row.cursor_id,
            time: row.time,
            device_uuid: row.device_uuid,
            firmware_version: row.firmware_version,
            model: row.model,
            ingested_at: row.ingested_at,
            metrics: row.metrics,
            extras: row.extras.0,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StationRow {
    uuid: String,
    name: Option<String>,
    model: Option<String>,
    firmware_version: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    description: Option<String>,
    status: String,
    auto_created: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<StationRow> for Station {
    fn from(row: StationRow) -> Self {
        let location = match (row.latitude, row.longitude) {
            (Some(latitude), Some(longitude)) => Some(Location {
                latitude,
                longitude,
            }),
            _ => None,
        };
        Station {
            uuid: row.uuid,
            name: row.name,
            model: row.model,
            firmware_version: row.firmware_version,
            location,
            description: row.description,
            status: row.status,
            auto_created: row.auto_created,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgTelemetryStore {
    pool: PgPool,
}

impl PgTelemetryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TelemetryStore for PgTelemetryStore {
    async fn insert(&self, draft: &TelemetryDraft) -> Result<Option<TelemetryPoint>> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO telemetry (time, device_uuid, firmware_version, model, ingested_at, extras, {}) VALUES (",
            Metrics::COLUMNS.join(", ")
        ));
        {
            let mut values = qb.separated(", ");
            values.push_bind(draft.time);
            values.push_bind(draft.device_uuid.as_str());
            values.push_bind(draft.firmware_version.as_str());
            values.push_bind(draft.model.as_deref());
            values.push_bind(draft.ingested_at);
            values.push_bind(Json(&draft.extras));
            for value in draft.metrics.values() {
                values.push_bind(value);
            }
        }
        qb.push(format!(
            ") ON CONFLICT (device_uuid, time) DO NOTHING RETURNING {}",
            telemetry_columns()
        ));

        let row = qb
            .build_query_as::<TelemetryRow>()
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(TelemetryPoint::from))
    }

    async fn fetch(&self, plan: &QueryPlan) -> Result<Vec<TelemetryPoint>> {
        let mut qb = plan.to_sql();
        debug!(sql = %qb.sql(), "fetching telemetry window");
        let rows = qb
            .build_query_as::<TelemetryRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(TelemetryPoint::from).collect())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgStationStore {
    pool: PgPool,
}

impl PgStationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StationStore for PgStationStore {
    async fn reconcile(&self, observed: &ObservedStation, now: DateTime<Utc>) -> Result<Station> {
        let query = format!(
            r#"
            INSERT INTO stations (uuid, model, firmware_version, status, auto_created, created_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $5)
            ON CONFLICT (uuid) DO UPDATE SET
                model = COALESCE(EXCLUDED.model, stations.model),
                firmware_version = COALESCE(EXCLUDED.firmware_version, stations.firmware_version),
                deleted_at = NULL,
                updated_at = EXCLUDED.updated_at
            RETURNING {STATION_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, StationRow>(&query)
            .bind(&observed.uuid)
            .bind(&observed.model)
            .bind(&observed.firmware_version)
            .bind(DEFAULT_STATION_STATUS)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn create(&self, input: &NewStation, now: DateTime<Utc>) -> Result<Option<Station>> {
        let query = format!(
            r#"
            INSERT INTO stations (uuid, name, model, firmware_version, latitude, longitude,
                                  description, status, auto_created, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9, $9)
            ON CONFLICT (uuid) DO UPDATE SET
                name = EXCLUDED.name,
                model = EXCLUDED.model,
                firmware_version = EXCLUDED.firmware_version,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                description = EXCLUDED.description,
                status = EXCLUDED.status,
                auto_created = FALSE,
                deleted_at = NULL,
                updated_at = EXCLUDED.updated_at
            WHERE stations.deleted_at IS NOT NULL
            RETURNING {STATION_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, StationRow>(&query)
            .bind(&input.uuid)
            .bind(&input.name)
            .bind(&input.model)
            .bind(&input.firmware_version)
            .bind(input.location.map(|l| l.latitude))
            .bind(input.location.map(|l| l.longitude))
            .bind(&input.description)
            .bind(input.status.as_deref().unwrap_or(DEFAULT_STATION_STATUS))
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Station::from))
    }

    async fn get(&self, uuid: &str) -> Result<Option<Station>> {
        let query = format!(
            "SELECT {STATION_COLUMNS} FROM stations WHERE uuid = $1 AND deleted_at IS NULL"
        );
        let row = sqlx::query_as::<_, StationRow>(&query)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Station::from))
    }

    async fn list(&self) -> Result<Vec<Station>> {
        let query = format!(
            "SELECT {STATION_COLUMNS} FROM stations WHERE deleted_at IS NULL ORDER BY created_at, uuid"
        );
        let rows = sqlx::query_as::<_, StationRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Station::from).collect())
    }

    async fn update(
        &self,
        uuid: &str,
        patch: &StationPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Station>> {
        let query = format!(
            r#"
            UPDATE stations SET
                name = COALESCE($2, name),
                model = COALESCE($3, model),
                firmware_version = COALESCE($4, firmware_version),
                latitude = COALESCE($5, latitude),
                longitude = COALESCE($6, longitude),
                description = COALESCE($7, description),
                status = COALESCE($8, status),
                updated_at = $9
            WHERE uuid = $1 AND deleted_at IS NULL
            RETURNING {STATION_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, StationRow>(&query)
            .bind(uuid)
            .bind(&patch.name)
            .bind(&patch.model)
            .bind(&patch.firmware_version)
            .bind(patch.location.map(|l| l.latitude))
            .bind(patch.location.map(|l| l.longitude))
            .bind(&patch.description)
            .bind(&patch.status)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Station::from))
    }

    async fn soft_delete(&self, uuid: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE stations SET deleted_at = $2, updated_at = $2 WHERE uuid = $1 AND deleted_at IS NULL",
        )
        .bind(uuid)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
