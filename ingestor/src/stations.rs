use crate::clock::Clock;
use crate::errors::{Error, Result};
use crate::model::{NewStation, ObservedStation, Station, StationPatch};
use crate::store::StationStore;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Station lifecycle: implicit reconciliation from telemetry plus explicit
/// registry operations from the API.
#[derive(Clone)]
pub struct StationRegistry {
    store: Arc<dyn StationStore>,
    clock: Arc<dyn Clock>,
}

impl StationRegistry {
    pub fn new(store: Arc<dyn StationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Makes sure an active station exists for a device seen in telemetry.
    ///
    /// Delegates to one atomic upsert, so concurrent messages for an unseen
    /// device converge on a single row. Never reports not-found.
    #[instrument(skip(self, observed), fields(device_uuid = %observed.uuid))]
    pub async fn reconcile(&self, observed: &ObservedStation) -> Result<Station> {
        let station = self.store.reconcile(observed, self.clock.now()).await?;
        debug!(
            auto_created = station.auto_created,
            status = %station.status,
            "station reconciled"
        );
        Ok(station)
    }

    pub async fn create(&self, input: NewStation) -> Result<Station> {
        if input.uuid.trim().is_empty() {
            return Err(Error::validation("uuid", "station uuid cannot be empty"));
        }
        if input.status.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(Error::validation("status", "cannot be blank"));
        }
        match self.store.create(&input, self.clock.now()).await? {
            Some(station) => {
                info!(uuid = %station.uuid, "station registered");
                Ok(station)
            }
            None => Err(Error::Conflict(format!("station {} already exists", input.uuid))),
        }
    }

    pub async fn get(&self, uuid: &str) -> Result<Station> {
        self.store
            .get(uuid)
            .await?
            .ok_or_else(|| Error::NotFound(format!("station {uuid}")))
    }

    pub async fn list(&self) -> Result<Vec<Station>> {
        self.store.list().await
    }

    pub async fn update(&self, uuid: &str, patch: StationPatch) -> Result<Station> {
        if patch.status.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(Error::validation("status", "cannot be blank"));
        }
        self.store
            .update(uuid, &patch, self.clock.now())
            .await?
            .ok_or_else(|| Error::NotFound(format!("station {uuid}")))
    }

    pub async fn delete(&self, uuid: &str) -> Result<()> {
        if self.store.soft_delete(uuid, self.clock.now()).await? {
            info!(uuid = %uuid, "station soft-deleted");
            Ok(())
        } else {
            Err(Error::NotFound(format!("station {uuid}")))
        }
    }
}
