//! In-process storage with the same ordering and upsert semantics as the
//! Postgres adapter. Backs the test suite and database-less local runs.

use crate::errors::Result;
use crate::model::{
    NewStation, ObservedStation, Station, StationPatch, TelemetryDraft, TelemetryPoint,
    DEFAULT_STATION_STATUS,
};
use crate::planner::{Anchor, QueryPlan, SortKey};
use crate::store::{StationStore, TelemetryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct TelemetryTable {
    next_cursor_id: i64,
    rows: Vec<TelemetryPoint>,
}

#[derive(Default)]
pub struct MemoryTelemetryStore {
    table: Mutex<TelemetryTable>,
}

impl MemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops a row, for exercising cursors whose anchor has disappeared.
    pub async fn remove(&self, cursor_id: i64) -> bool {
        let mut table = self.table.lock().await;
        let before = table.rows.len();
        table.rows.retain(|p| p.cursor_id != cursor_id);
        table.rows.len() != before
    }
}

#[async_trait]
impl TelemetryStore for MemoryTelemetryStore {
    async fn insert(&self, draft: &TelemetryDraft) -> Result<Option<TelemetryPoint>> {
        let mut table = self.table.lock().await;
        if table
            .rows
            .iter()
            .any(|p| p.device_uuid == draft.device_uuid && p.time == draft.time)
        {
            return Ok(None);
        }
        table.next_cursor_id += 1;
        let point = TelemetryPoint::from_draft(table.next_cursor_id, draft.clone());
        table.rows.push(point.clone());
        Ok(Some(point))
    }

    async fn fetch(&self, plan: &QueryPlan) -> Result<Vec<TelemetryPoint>> {
        let table = self.table.lock().await;

        let anchor = match &plan.anchor {
            Anchor::Start => None,
            Anchor::Key(key) => Some(SortKey::from(key)),
            Anchor::Row(id) => match table.rows.iter().find(|p| p.cursor_id == *id) {
                Some(p) => Some(SortKey::of(p)),
                None => return Ok(Vec::new()),
            },
        };

        let mut rows: Vec<TelemetryPoint> = table
            .rows
            .iter()
            .filter(|p| plan.matches(p))
            .filter(|p| anchor.as_ref().map_or(true, |a| plan.is_past(p, a)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| plan.compare(&SortKey::of(a), &SortKey::of(b)));
        rows.truncate(plan.fetch_limit as usize);
        Ok(rows)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStationStore {
    rows: Mutex<BTreeMap<String, Station>>,
}

impl MemoryStationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row regardless of soft-delete state.
    pub async fn raw(&self, uuid: &str) -> Option<Station> {
        self.rows.lock().await.get(uuid).cloned()
    }

    pub async fn count(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl StationStore for MemoryStationStore {
    async fn reconcile(&self, observed: &ObservedStation, now: DateTime<Utc>) -> Result<Station> {
        let mut rows = self.rows.lock().await;
        let station = rows
            .entry(observed.uuid.clone())
            .and_modify(|s| {
                s.deleted_at = None;
                if observed.model.is_some() {
                    s.model = observed.model.clone();
                }
                if observed.firmware_version.is_some() {
                    s.firmware_version = observed.firmware_version.clone();
                }
                s.updated_at = now;
            })
            .or_insert_with(|| Station {
                uuid: observed.uuid.clone(),
                name: None,
                model: observed.model.clone(),
                firmware_version: observed.firmware_version.clone(),
                location: None,
                description: None,
                status: DEFAULT_STATION_STATUS.to_string(),
                auto_created: true,
                deleted_at: None,
                created_at: now,
                updated_at: now,
            });
        Ok(station.clone())
    }

    async fn create(&self, input: &NewStation, now: DateTime<Utc>) -> Result<Option<Station>> {
        let mut rows = self.rows.lock().await;
        let created_at = match rows.get(&input.uuid) {
            Some(existing) if existing.is_active() => return Ok(None),
            Some(existing) => existing.created_at,
            None => now,
        };
        let station = Station {
            uuid: input.uuid.clone(),
            name: input.name.clone(),
            model: input.model.clone(),
            firmware_version: input.firmware_version.clone(),
            location: input.location,
            description: input.description.clone(),
            status: input
                .status
                .clone()
                .unwrap_or_else(|| DEFAULT_STATION_STATUS.to_string()),
            auto_created: false,
            deleted_at: None,
            created_at,
            updated_at: now,
        };
        rows.insert(input.uuid.clone(), station.clone());
        Ok(Some(station))
    }

    async fn get(&self, uuid: &str) -> Result<Option<Station>> {
        Ok(self
            .rows
            .lock()
            .await
            .get(uuid)
            .filter(|s| s.is_active())
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Station>> {
        let mut stations: Vec<Station> = self
            .rows
            .lock()
            .await
            .values()
            .filter(|s| s.is_active())
            .cloned()
            .collect();
        stations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.uuid.cmp(&b.uuid)));
        Ok(stations)
    }

    async fn update(
        &self,
        uuid: &str,
        patch: &StationPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Station>> {
        let mut rows = self.rows.lock().await;
        let Some(station) = rows.get_mut(uuid).filter(|s| s.is_active()) else {
            return Ok(None);
        };
        if let Some(name) = &patch.name {
            station.name = Some(name.clone());
        }
        if let Some(model) = &patch.model {
            station.model = Some(model.clone());
        }
        if let Some(fw) = &patch.firmware_version {
            station.firmware_version = Some(fw.clone());
        }
        if let Some(location) = patch.location {
            station.location = Some(location);
        }
        if let Some(description) = &patch.description {
            station.description = Some(description.clone());
        }
        if let Some(status) = &patch.status {
            station.status = status.clone();
        }
        station.updated_at = now;
        Ok(Some(station.clone()))
    }

    async fn soft_delete(&self, uuid: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        match rows.get_mut(uuid).filter(|s| s.is_active()) {
            Some(station) => {
                station.deleted_at = Some(now);
                station.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
