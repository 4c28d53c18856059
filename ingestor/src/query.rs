use crate::cursor::CompositeKey;
use crate::errors::Result;
use crate::model::TelemetryPoint;
use crate::pagination::{paginate, Connection};
use crate::planner::{plan_by_cursor_id, plan_by_device_time, QueryPlan, TelemetryQuery};
use crate::store::TelemetryStore;
use std::sync::Arc;
use tracing::debug;

/// Read side of the telemetry table.
#[derive(Clone)]
pub struct TelemetryQueries {
    store: Arc<dyn TelemetryStore>,
}

impl TelemetryQueries {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    /// Bidirectional page keyed by `cursor_id`.
    pub async fn page(&self, query: &TelemetryQuery) -> Result<Connection<TelemetryPoint>> {
        let plan = plan_by_cursor_id(query)?;
        self.run(query, plan).await
    }

    /// Forward-only page keyed by `(device_uuid, time)`.
    pub async fn page_by_device_time(
        &self,
        query: &TelemetryQuery,
        after: Option<CompositeKey>,
    ) -> Result<Connection<TelemetryPoint>> {
        let plan = plan_by_device_time(query, after)?;
        self.run(query, plan).await
    }

    async fn run(
        &self,
        query: &TelemetryQuery,
        plan: QueryPlan,
    ) -> Result<Connection<TelemetryPoint>> {
        let rows = self.store.fetch(&plan).await?;
        debug!(
            rows = rows.len(),
            limit = plan.fetch_limit,
            direction = ?plan.direction,
            "telemetry window fetched"
        );
        let rows = plan.finish(rows);
        Ok(paginate(rows, &query.page, |p| plan.cursor_of(p)))
    }
}
