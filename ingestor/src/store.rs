use crate::errors::Result;
use crate::model::{
    NewStation, ObservedStation, Station, StationPatch, TelemetryDraft, TelemetryPoint,
};
use crate::planner::QueryPlan;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Append-only telemetry storage.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Appends a row and assigns its cursor id. Returns `None` when a row for
    /// the same device and time already exists.
    async fn insert(&self, draft: &TelemetryDraft) -> Result<Option<TelemetryPoint>>;

    /// Executes a plan, returning at most `plan.fetch_limit` rows in scan
    /// order. A row anchor that no longer exists yields no rows.
    async fn fetch(&self, plan: &QueryPlan) -> Result<Vec<TelemetryPoint>>;

    async fn ping(&self) -> Result<()>;
}

/// Station registry storage.
#[async_trait]
pub trait StationStore: Send + Sync {
    /// Single atomic insert-or-update keyed by uuid. Inserts a `pending`,
    /// auto-created row, or clears `deleted_at` on the existing row and
    /// coalesces model and firmware version into it.
    async fn reconcile(&self, observed: &ObservedStation, now: DateTime<Utc>) -> Result<Station>;

    /// Inserts a new station or revives a soft-deleted one with the given
    /// fields. Returns `None` when an active station already holds the uuid.
    async fn create(&self, input: &NewStation, now: DateTime<Utc>) -> Result<Option<Station>>;

    /// Active station by uuid.
    async fn get(&self, uuid: &str) -> Result<Option<Station>>;

    /// All active stations, oldest first.
    async fn list(&self) -> Result<Vec<Station>>;

    /// Patches an active station. `None` if it does not exist or is deleted.
    async fn update(
        &self,
        uuid: &str,
        patch: &StationPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Station>>;

    /// Marks an active station deleted. False if there was nothing to delete.
    async fn soft_delete(&self, uuid: &str, now: DateTime<Utc>) -> Result<bool>;
}
