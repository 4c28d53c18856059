use crate::clock::Clock;
use crate::cursor::decode_composite_or;
use crate::errors::{Error, Result};
use crate::model::{NewStation, Station, StationPatch, TelemetryPoint};
use crate::pagination::{Connection, PageRequest};
use crate::planner::TelemetryQuery;
use crate::query::TelemetryQueries;
use crate::stations::StationRegistry;
use crate::store::TelemetryStore;
use crate::validate::resolve_page;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

const DEFAULT_RANGE_DAYS: i64 = 7;
const DEFAULT_DEVICE_RANGE_HOURS: i64 = 24;

#[derive(Clone)]
pub struct AppState {
    pub queries: TelemetryQueries,
    pub stations: StationRegistry,
    pub telemetry: Arc<dyn TelemetryStore>,
    pub clock: Arc<dyn Clock>,
    pub default_page_size: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct TelemetryParams {
    device_uuid: Option<String>,
    start: Option<String>,
    end: Option<String>,
    first: Option<String>,
    after: Option<String>,
    last: Option<String>,
    before: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceTelemetryParams {
    start: Option<String>,
    end: Option<String>,
    first: Option<String>,
    after: Option<String>,
    last: Option<String>,
    before: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/telemetry", get(get_telemetry))
        .route(
            "/api/v1/stations",
            get(list_stations).post(create_station),
        )
        .route(
            "/api/v1/stations/:uuid",
            get(get_station).patch(update_station).delete(delete_station),
        )
        .route("/api/v1/stations/:uuid/telemetry", get(get_station_telemetry))
        .with_state(state)
}

/// Parses an ISO 8601 time bound. RFC 3339 with an offset is preferred; a
/// date-time without an offset is read as UTC.
fn parse_time(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(value)
            .map(|t| t.with_timezone(&Utc))
            .or_else(|_| {
                NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map(|t| t.and_utc())
            })
            .map_err(|_| {
                Error::validation(
                    field,
                    format!("{value:?} is not an ISO 8601 timestamp (e.g. 2024-06-01T00:00:00Z)"),
                )
            })
    })
    .transpose()
}

fn parse_count(field: &str, raw: Option<&str>) -> Result<Option<i64>> {
    raw.map(|value| {
        value
            .parse::<i64>()
            .map_err(|_| Error::validation(field, format!("{value:?} is not an integer")))
    })
    .transpose()
}

/// Resolves optional bounds: `end` defaults to now, `start` to `end - span`.
fn time_bounds(
    start: Option<&str>,
    end: Option<&str>,
    now: DateTime<Utc>,
    span: Duration,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = parse_time("end", end)?.unwrap_or(now);
    let start = parse_time("start", start)?.unwrap_or(end - span);
    Ok((start, end))
}

async fn get_telemetry(
    State(state): State<AppState>,
    Query(params): Query<TelemetryParams>,
) -> std::result::Result<Json<Connection<TelemetryPoint>>, AppError> {
    let (start, end) = time_bounds(
        params.start.as_deref(),
        params.end.as_deref(),
        state.clock.now(),
        Duration::days(DEFAULT_RANGE_DAYS),
    )?;
    let page = resolve_page(
        parse_count("first", params.first.as_deref())?,
        params.after,
        parse_count("last", params.last.as_deref())?,
        params.before,
        state.default_page_size,
    )?;
    let device = params.device_uuid.filter(|d| !d.is_empty());
    let query = TelemetryQuery::new(device, start, end, page)?;
    Ok(Json(state.queries.page(&query).await?))
}

async fn get_station_telemetry(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Query(params): Query<DeviceTelemetryParams>,
) -> std::result::Result<Json<Connection<TelemetryPoint>>, AppError> {
    let (start, end) = time_bounds(
        params.start.as_deref(),
        params.end.as_deref(),
        state.clock.now(),
        Duration::hours(DEFAULT_DEVICE_RANGE_HOURS),
    )?;
    let page = resolve_page(
        parse_count("first", params.first.as_deref())?,
        params.after,
        parse_count("last", params.last.as_deref())?,
        params.before,
        state.default_page_size,
    )?;
    let after = decode_composite_or(page.after.as_deref(), None);
    // Keep the raw cursor only when it decoded, so page flags reflect it.
    let page = PageRequest {
        after: after.as_ref().and(page.after),
        ..page
    };
    let query = TelemetryQuery::new(Some(uuid), start, end, page)?;
    Ok(Json(state.queries.page_by_device_time(&query, after).await?))
}

async fn create_station(
    State(state): State<AppState>,
    Json(input): Json<NewStation>,
) -> std::result::Result<(StatusCode, Json<Station>), AppError> {
    let station = state.stations.create(input).await?;
    Ok((StatusCode::CREATED, Json(station)))
}

async fn list_stations(
    State(state): State<AppState>,
) -> std::result::Result<Json<Vec<Station>>, AppError> {
    Ok(Json(state.stations.list().await?))
}

async fn get_station(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> std::result::Result<Json<Station>, AppError> {
    Ok(Json(state.stations.get(&uuid).await?))
}

async fn update_station(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
    Json(patch): Json<StationPatch>,
) -> std::result::Result<Json<Station>, AppError> {
    Ok(Json(state.stations.update(&uuid, patch).await?))
}

async fn delete_station(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> std::result::Result<StatusCode, AppError> {
    state.stations.delete(&uuid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health(State(state): State<AppState>) -> Response {
    match state.telemetry.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response(),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

pub struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            Error::Validation { .. } => (StatusCode::BAD_REQUEST, "validation_error"),
            Error::Cursor(_) => (StatusCode::BAD_REQUEST, "cursor_error"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("API error: {}", self.0);
            json!({ "error": kind, "message": "internal server error" })
        } else {
            json!({ "error": kind, "message": self.0.to_string() })
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::ingest::Ingestor;
    use crate::memory::{MemoryStationStore, MemoryTelemetryStore};
    use crate::model::InboundMessage;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::TimeZone;
    use serde_json::Value;
    use tower::ServiceExt;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    async fn app() -> Router {
        let telemetry = Arc::new(MemoryTelemetryStore::new());
        let clock = Arc::new(FixedClock::new(now()));
        let stations = StationRegistry::new(Arc::new(MemoryStationStore::new()), clock.clone());
        let ingestor = Ingestor::new(stations.clone(), telemetry.clone());

        for i in 0..3 {
            let payload = format!(
                r#"{{"device_info":{{"uuid":"d1","fw_ver":"1.0"}},"measures":[{{"n":"temp","v":{i}}}]}}"#
            );
            ingestor
                .ingest(&InboundMessage {
                    topic: "telemetry/d1".to_string(),
                    payload: payload.into_bytes(),
                    received_at: now() - Duration::minutes(i),
                })
                .await
                .unwrap();
        }

        create_router(AppState {
            queries: TelemetryQueries::new(telemetry.clone()),
            stations,
            telemetry,
            clock,
            default_page_size: 50,
        })
    }

    async fn call(
        app: Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
        let response = app.oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_telemetry_page() {
        let (status, body) = call(app().await, "GET", "/api/v1/telemetry?first=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edges"].as_array().unwrap().len(), 2);
        assert_eq!(body["edges"][0]["node"]["temp"], 0.0);
        assert_eq!(body["pageInfo"]["hasNextPage"], true);
        assert_eq!(body["pageInfo"]["hasPreviousPage"], false);
    }

    #[tokio::test]
    async fn test_telemetry_rejects_bad_input() {
        let (status, body) = call(
            app().await,
            "GET",
            "/api/v1/telemetry?start=2024-06-02T00:00:00Z&end=2024-06-01T00:00:00Z",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");

        let (status, body) = call(app().await, "GET", "/api/v1/telemetry?after=***", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "cursor_error");

        let (status, _) = call(
            app().await,
            "GET",
            "/api/v1/telemetry?after=MQ%3D%3D&before=Mg%3D%3D",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            call(app().await, "GET", "/api/v1/telemetry?end=yesterday", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("end"));

        let (status, body) = call(app().await, "GET", "/api/v1/telemetry?first=ten", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("first"));
    }

    #[tokio::test]
    async fn test_time_bounds_without_offset_are_utc() {
        let (status, body) = call(
            app().await,
            "GET",
            "/api/v1/telemetry?start=2024-06-01T11:58:30&end=2024-06-01T12:00:00",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edges"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_parse_time_accepts_offsets_and_naive() {
        let naive = parse_time("start", Some("2024-06-01T08:30:00.250")).unwrap();
        let zoned = parse_time("start", Some("2024-06-01T10:30:00.250+02:00")).unwrap();
        assert_eq!(naive, zoned);
        assert_eq!(parse_time("start", None).unwrap(), None);
        assert!(parse_time("start", Some("2024-06-01")).is_err());
    }

    #[tokio::test]
    async fn test_station_telemetry_ignores_broken_cursor() {
        let (status, body) = call(
            app().await,
            "GET",
            "/api/v1/stations/d1/telemetry?after=garbage",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edges"].as_array().unwrap().len(), 3);
        assert_eq!(body["pageInfo"]["hasPreviousPage"], false);
    }

    #[tokio::test]
    async fn test_station_telemetry_is_forward_only() {
        let (status, body) = call(
            app().await,
            "GET",
            "/api/v1/stations/d1/telemetry?last=1&before=abcd",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");

        let (status, _) =
            call(app().await, "GET", "/api/v1/stations/d1/telemetry?last=2", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            call(app().await, "GET", "/api/v1/stations/d1/telemetry?first=2", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["edges"].as_array().unwrap().len(), 2);
        assert_eq!(body["pageInfo"]["hasNextPage"], true);
    }

    #[tokio::test]
    async fn test_station_lifecycle_over_http() {
        let app = app().await;
        let (status, body) = call(app.clone(), "GET", "/api/v1/stations/d1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "pending");
        assert_eq!(body["autoCreated"], true);

        let (status, _) = call(
            app.clone(),
            "POST",
            "/api/v1/stations",
            Some(json!({ "uuid": "d1" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            app.clone(),
            "PATCH",
            "/api/v1/stations/d1",
            Some(json!({ "name": "Roof" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Roof");

        let (status, _) = call(app.clone(), "DELETE", "/api/v1/stations/d1", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = call(app.clone(), "GET", "/api/v1/stations/d1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) = call(app.clone(), "GET", "/api/v1/stations", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(app().await, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[test]
    fn test_internal_errors_are_not_leaked() {
        let response = AppError(Error::Storage(sqlx::Error::PoolTimedOut)).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
