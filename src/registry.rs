//! Region registry: the set of geofences currently being monitored.
//!
//! Regions are kept in registration order, which is also the order in
//! which the detector evaluates them and emits events.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::GeofenceError;
use crate::model::GeofenceRegion;

#[derive(Debug, Default)]
pub struct RegionRegistry {
    regions: Vec<GeofenceRegion>,
}

impl RegionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a region, replacing any region with the same id.
    ///
    /// A replaced region keeps its position in the evaluation order. Returns
    /// the region that was replaced, if any. Invalid regions are rejected and
    /// leave the registry untouched.
    pub fn register(
        &mut self,
        region: GeofenceRegion,
    ) -> Result<Option<GeofenceRegion>, GeofenceError> {
        region.validate()?;

        match self.regions.iter_mut().find(|r| r.id == region.id) {
            Some(slot) => {
                debug!(region_id = %region.id, "Replacing registered region");
                Ok(Some(std::mem::replace(slot, region)))
            }
            None => {
                info!(
                    region_id = %region.id,
                    radius_meters = region.radius_meters,
                    "Region registered"
                );
                self.regions.push(region);
                Ok(None)
            }
        }
    }

    /// Remove a single region by id.
    pub fn unregister(&mut self, id: &str) -> Option<GeofenceRegion> {
        let index = self.regions.iter().position(|r| r.id == id)?;
        Some(self.regions.remove(index))
    }

    pub fn unregister_all(&mut self) {
        if !self.regions.is_empty() {
            info!(count = self.regions.len(), "All regions unregistered");
        }
        self.regions.clear();
    }

    /// Non-expired regions in registration order.
    ///
    /// Expired regions are removed from the registry as a side effect.
    pub fn active_regions(&mut self, now: DateTime<Utc>) -> &[GeofenceRegion] {
        self.prune_expired(now);
        &self.regions
    }

    /// Drop every region expired at `now`, returning their ids.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut pruned = Vec::new();
        self.regions.retain(|region| {
            if region.is_expired(now) {
                pruned.push(region.id.clone());
                false
            } else {
                true
            }
        });
        for id in &pruned {
            info!(region_id = %id, "Region expired");
        }
        pruned
    }

    pub fn get(&self, id: &str) -> Option<&GeofenceRegion> {
        self.regions.iter().find(|r| r.id == id)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
