//! Turns a telemetry range request into a deterministic, totally ordered scan.
//!
//! Rows are ordered newest first by event `time`, with ties broken by
//! `cursor_id` ascending. A backward page scans the exact reverse order and is
//! flipped back before it is returned, so callers always see newest first.

use crate::cursor::{self, CompositeKey};
use crate::errors::{CursorError, Error, Result};
use crate::model::{Metrics, TelemetryPoint};
use crate::pagination::{Direction, PageRequest};
use crate::validate::validate_time_range;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use std::cmp::Ordering;

/// A validated time-range request.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryQuery {
    pub device_uuid: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub page: PageRequest,
}

impl TelemetryQuery {
    pub fn new(
        device_uuid: Option<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<Self> {
        validate_time_range(start, end)?;
        Ok(Self {
            device_uuid,
            start,
            end,
            page,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    /// `time DESC, cursor_id ASC`
    NewestFirst,
    /// `time ASC, cursor_id DESC`, the exact reverse of `NewestFirst`.
    OldestFirst,
    /// `time DESC, device_uuid ASC`, for `(device, time)` keyed pages.
    NewestFirstByDevice,
}

impl ScanOrder {
    fn order_by(self) -> &'static str {
        match self {
            ScanOrder::NewestFirst => " ORDER BY time DESC, cursor_id ASC",
            ScanOrder::OldestFirst => " ORDER BY time ASC, cursor_id DESC",
            ScanOrder::NewestFirstByDevice => " ORDER BY time DESC, device_uuid ASC, cursor_id ASC",
        }
    }
}

/// Where a page resumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    Start,
    /// Resume strictly past the row with this cursor id. The row's `time` is
    /// looked up at execution; a missing row yields an empty page.
    Row(i64),
    Key(CompositeKey),
}

/// Position of a row in scan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub time: DateTime<Utc>,
    pub cursor_id: i64,
    pub device_uuid: String,
}

impl SortKey {
    pub fn of(point: &TelemetryPoint) -> Self {
        Self {
            time: point.time,
            cursor_id: point.cursor_id,
            device_uuid: point.device_uuid.clone(),
        }
    }
}

impl From<&CompositeKey> for SortKey {
    fn from(key: &CompositeKey) -> Self {
        Self {
            time: key.time,
            cursor_id: 0,
            device_uuid: key.device_uuid.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub device_uuid: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub anchor: Anchor,
    pub scan: ScanOrder,
    pub direction: Direction,
    pub fetch_limit: u32,
}

fn parse_row_cursor(raw: &str) -> Result<i64> {
    let id = cursor::decode_simple(raw)?;
    id.parse::<i64>().map_err(|_| {
        Error::Cursor(CursorError::InvalidIdentifier {
            cursor: raw.to_string(),
        })
    })
}

/// Plans a bidirectional page keyed by `cursor_id`.
pub fn plan_by_cursor_id(query: &TelemetryQuery) -> Result<QueryPlan> {
    let anchor = match query.page.cursor() {
        Some(raw) => Anchor::Row(parse_row_cursor(raw)?),
        None => Anchor::Start,
    };
    let scan = match query.page.direction {
        Direction::Forward => ScanOrder::NewestFirst,
        Direction::Backward => ScanOrder::OldestFirst,
    };
    Ok(QueryPlan {
        device_uuid: query.device_uuid.clone(),
        start: query.start,
        end: query.end,
        anchor,
        scan,
        direction: query.page.direction,
        fetch_limit: query.page.limit,
    })
}

/// Plans a forward-only page keyed by `(device_uuid, time)`. The cursor has
/// already been decoded by the caller.
pub fn plan_by_device_time(
    query: &TelemetryQuery,
    after: Option<CompositeKey>,
) -> Result<QueryPlan> {
    if query.page.direction == Direction::Backward {
        return Err(Error::validation(
            "last",
            "backward pagination is not supported for device/time cursors",
        ));
    }
    Ok(QueryPlan {
        device_uuid: query.device_uuid.clone(),
        start: query.start,
        end: query.end,
        anchor: after.map_or(Anchor::Start, Anchor::Key),
        scan: ScanOrder::NewestFirstByDevice,
        direction: Direction::Forward,
        fetch_limit: query.page.limit,
    })
}

/// Comma separated select list for telemetry rows.
pub fn telemetry_columns() -> String {
    let mut cols = vec![
        "cursor_id",
        "time",
        "device_uuid",
        "firmware_version",
        "model",
        "ingested_at",
        "extras",
    ];
    cols.extend_from_slice(Metrics::COLUMNS);
    cols.join(", ")
}

impl QueryPlan {
    /// Orders two rows by this plan's scan order.
    pub fn compare(&self, a: &SortKey, b: &SortKey) -> Ordering {
        match self.scan {
            ScanOrder::NewestFirst => b.time.cmp(&a.time).then(a.cursor_id.cmp(&b.cursor_id)),
            ScanOrder::OldestFirst => a.time.cmp(&b.time).then(b.cursor_id.cmp(&a.cursor_id)),
            ScanOrder::NewestFirstByDevice => b
                .time
                .cmp(&a.time)
                .then_with(|| a.device_uuid.cmp(&b.device_uuid))
                .then(a.cursor_id.cmp(&b.cursor_id)),
        }
    }

    /// Device filter and inclusive time bounds.
    pub fn matches(&self, point: &TelemetryPoint) -> bool {
        point.time >= self.start
            && point.time <= self.end
            && self
                .device_uuid
                .as_deref()
                .map_or(true, |d| d == point.device_uuid)
    }

    /// Whether `point` lies strictly past `anchor` in scan order.
    pub fn is_past(&self, point: &TelemetryPoint, anchor: &SortKey) -> bool {
        let key = SortKey::of(point);
        match self.scan {
            ScanOrder::NewestFirstByDevice => {
                key.time < anchor.time
                    || (key.time == anchor.time && key.device_uuid > anchor.device_uuid)
            }
            _ => self.compare(&key, anchor) == Ordering::Greater,
        }
    }

    /// Puts a fetched window into output order (newest first).
    pub fn finish(&self, mut rows: Vec<TelemetryPoint>) -> Vec<TelemetryPoint> {
        if self.direction == Direction::Backward {
            rows.reverse();
        }
        rows
    }

    /// The cursor handed out for a row under this plan.
    pub fn cursor_of(&self, point: &TelemetryPoint) -> String {
        match self.scan {
            ScanOrder::NewestFirstByDevice => cursor::encode_composite(&CompositeKey {
                device_uuid: point.device_uuid.clone(),
                time: point.time,
            }),
            _ => cursor::encode_simple(&point.cursor_id.to_string()),
        }
    }

    /// Renders the plan as a single Postgres statement.
    pub fn to_sql(&self) -> QueryBuilder<'static, Postgres> {
        let mut qb = QueryBuilder::new(format!(
            "SELECT {} FROM telemetry WHERE time >= ",
            telemetry_columns()
        ));
        qb.push_bind(self.start);
        qb.push(" AND time <= ");
        qb.push_bind(self.end);

        if let Some(device) = &self.device_uuid {
            qb.push(" AND device_uuid = ");
            qb.push_bind(device.clone());
        }

        match &self.anchor {
            Anchor::Start => {}
            Anchor::Row(id) => {
                let past = match self.scan {
                    ScanOrder::OldestFirst => {
                        "(telemetry.time > a.time \
                         OR (telemetry.time = a.time AND telemetry.cursor_id < a.cursor_id))"
                    }
                    _ => {
                        "(telemetry.time < a.time \
                         OR (telemetry.time = a.time AND telemetry.cursor_id > a.cursor_id))"
                    }
                };
                qb.push(" AND EXISTS (SELECT 1 FROM telemetry a WHERE a.cursor_id = ");
                qb.push_bind(*id);
                qb.push(" AND ");
                qb.push(past);
                qb.push(")");
            }
            Anchor::Key(key) => {
                qb.push(" AND (time < ");
                qb.push_bind(key.time);
                qb.push(" OR (time = ");
                qb.push_bind(key.time);
                qb.push(" AND device_uuid > ");
                qb.push_bind(key.device_uuid.clone());
                qb.push("))");
            }
        }

        qb.push(self.scan.order_by());
        qb.push(" LIMIT ");
        qb.push_bind(self.fetch_limit as i64);
        qb
    }
}
