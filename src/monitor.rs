//! Thread-safe front for the detector and dispatcher.
//!
//! One mutex guards the region registry and the containment table
//! together. It is held for exactly one registry mutation or one fix
//! evaluation and released before events are dispatched. It is a blocking
//! `std` mutex and must never be held across an `.await`.
//!
//! Events from one `evaluate` call reach the sink in region order. Across
//! concurrent calls there is no ordering guarantee: a sink may see the
//! ENTER of a later fix before the EXIT of an earlier one for the same
//! region.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::detector::TransitionDetector;
use crate::dispatch::{DispatchStats, Dispatcher};
use crate::error::GeofenceError;
use crate::lock::{LockMode, position_of};
use crate::model::{GeofenceRegion, LocationFix, TransitionEvent};
use crate::storage::Storage;

#[derive(Default)]
struct MonitorState {
    detector: TransitionDetector,
    last_fix: Option<LocationFix>,
}

pub struct GeofenceMonitor {
    state: Mutex<MonitorState>,
    dispatcher: Dispatcher,
}

impl GeofenceMonitor {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            state: Mutex::new(MonitorState::default()),
            dispatcher,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        // Every mutation leaves the state consistent, so a poisoned lock is usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(
        &self,
        region: GeofenceRegion,
    ) -> Result<Option<GeofenceRegion>, GeofenceError> {
        self.lock_state().detector.register(region)
    }

    pub fn unregister(&self, id: &str) -> Option<GeofenceRegion> {
        self.lock_state().detector.unregister(id)
    }

    pub fn unregister_all(&self) {
        self.lock_state().detector.unregister_all();
    }

    pub fn active_regions(&self, now: DateTime<Utc>) -> Vec<GeofenceRegion> {
        self.lock_state().detector.active_regions(now)
    }

    pub fn region_count(&self) -> usize {
        self.lock_state().detector.region_count()
    }

    /// Most recent valid fix seen by [`evaluate`](Self::evaluate).
    pub fn last_known_location(&self) -> Option<LocationFix> {
        self.lock_state().last_fix
    }

    /// Evaluate a fix and dispatch every resulting event.
    #[instrument(skip(self, fix), fields(lat = fix.latitude, lon = fix.longitude))]
    pub fn evaluate(&self, fix: &LocationFix) -> Vec<TransitionEvent> {
        self.evaluate_at(fix, Utc::now())
    }

    pub fn evaluate_at(&self, fix: &LocationFix, now: DateTime<Utc>) -> Vec<TransitionEvent> {
        let events = {
            let mut state = self.lock_state();
            let events = state.detector.evaluate_at(fix, now);
            if fix.validate().is_ok() {
                state.last_fix = Some(*fix);
            }
            events
        };

        for event in &events {
            self.dispatcher.dispatch(event);
        }
        events
    }

    /// Prune expired regions, returning every id that expired since the
    /// last call (including those pruned while evaluating fixes).
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        self.lock_state().detector.prune_expired(now)
    }

    /// Build the region `mode` would lock to, without changing anything.
    ///
    /// A current-location lock without an explicit position uses the last
    /// known location.
    pub fn lock_region(
        &self,
        mode: LockMode,
        position: Option<(f64, f64)>,
    ) -> Result<GeofenceRegion, GeofenceError> {
        let position = match mode {
            LockMode::CurrentLocation => {
                position.or(self.lock_state().last_fix.as_ref().map(position_of))
            }
            _ => position,
        };

        let region = mode.region(position)?;
        region.validate()?;
        Ok(region)
    }

    /// Replace every region with `region`. Nothing changes if it is invalid.
    pub fn apply_lock(&self, region: GeofenceRegion) -> Result<(), GeofenceError> {
        region.validate()?;

        let mut state = self.lock_state();
        state.detector.unregister_all();
        state.detector.register(region)?;
        Ok(())
    }

    /// Replace every region with the one for `mode`.
    pub fn lock(
        &self,
        mode: LockMode,
        position: Option<(f64, f64)>,
    ) -> Result<GeofenceRegion, GeofenceError> {
        let region = self.lock_region(mode, position)?;
        self.apply_lock(region.clone())?;
        info!(mode = mode.as_str(), region_id = %region.id, "Lock engaged");
        Ok(region)
    }

    /// Re-register every stored region against the wall clock.
    pub async fn restore(&self, storage: &Storage) -> anyhow::Result<usize> {
        self.restore_at(storage, Utc::now()).await
    }

    /// Re-register stored regions, deleting rows that are expired at `now`
    /// or no longer valid. Restored regions start UNKNOWN.
    pub async fn restore_at(&self, storage: &Storage, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut restored = 0;

        for region in storage.load_regions().await? {
            if region.is_expired(now) {
                info!(region_id = %region.id, "Dropping expired stored region");
                storage.delete_region(&region.id).await?;
                continue;
            }
            let id = region.id.clone();
            match self.register(region) {
                Ok(_) => restored += 1,
                Err(e) => {
                    warn!(region_id = %id, error = %e, "Skipping stored region");
                    storage.delete_region(&id).await?;
                }
            }
        }

        info!(restored, "Regions restored");
        Ok(restored)
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }
}

impl Default for GeofenceMonitor {
    fn default() -> Self {
        Self::new(Dispatcher::default())
    }
}
