//! Transition detection.
//!
//! Each region moves through a small state machine:
//!
//! ```text
//! UNKNOWN ──► INSIDE      (silent)
//! UNKNOWN ──► OUTSIDE     (silent)
//! INSIDE  ──► OUTSIDE     EXIT, if watched
//! OUTSIDE ──► INSIDE      ENTER, if watched
//! ```
//!
//! UNKNOWN is the absence of an entry in the containment table. The first
//! classification after registration never emits, so a region registered
//! around the current position does not immediately report an exit or
//! enter. Classification is purely distance based: the time between fixes
//! has no effect on the outcome.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::GeofenceError;
use crate::model::{
    Containment, ContainmentState, GeofenceRegion, LocationFix, Transition, TransitionEvent,
};
use crate::registry::RegionRegistry;

/// Region registry plus per-region containment state.
///
/// Both live in one value so that a single exclusive borrow covers a whole
/// registry mutation or a whole fix evaluation.
#[derive(Debug, Default)]
pub struct TransitionDetector {
    registry: RegionRegistry,
    states: HashMap<String, ContainmentState>,
    /// Ids pruned for expiry and not yet taken by [`take_expired`](Self::take_expired).
    expired: Vec<String>,
}

impl TransitionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a region. Its containment resets to UNKNOWN.
    pub fn register(
        &mut self,
        region: GeofenceRegion,
    ) -> Result<Option<GeofenceRegion>, GeofenceError> {
        let id = region.id.clone();
        let replaced = self.registry.register(region)?;
        self.states.remove(&id);
        self.expired.retain(|e| *e != id);
        Ok(replaced)
    }

    pub fn unregister(&mut self, id: &str) -> Option<GeofenceRegion> {
        self.states.remove(id);
        self.registry.unregister(id)
    }

    pub fn unregister_all(&mut self) {
        self.registry.unregister_all();
        self.states.clear();
        self.expired.clear();
    }

    /// Non-expired regions, pruning expired ones and their state.
    pub fn active_regions(&mut self, now: DateTime<Utc>) -> Vec<GeofenceRegion> {
        self.prune(now);
        self.registry.active_regions(now).to_vec()
    }

    pub fn containment(&self, id: &str) -> Option<ContainmentState> {
        self.states.get(id).copied()
    }

    pub fn region_count(&self) -> usize {
        self.registry.len()
    }

    /// Evaluate a fix against the wall clock.
    pub fn evaluate(&mut self, fix: &LocationFix) -> Vec<TransitionEvent> {
        self.evaluate_at(fix, Utc::now())
    }

    /// Evaluate a fix, using `now` to decide which regions have expired.
    ///
    /// Invalid fixes are discarded without touching any state. Events come
    /// out in region registration order.
    pub fn evaluate_at(&mut self, fix: &LocationFix, now: DateTime<Utc>) -> Vec<TransitionEvent> {
        if let Err(e) = fix.validate() {
            debug!(error = %e, "Discarding location fix");
            return Vec::new();
        }

        self.prune(now);

        let mut events = Vec::new();
        for region in self.registry.active_regions(now) {
            let containment = if region.contains(fix) {
                Containment::Inside
            } else {
                Containment::Outside
            };
            let next = ContainmentState {
                containment,
                updated_at: fix.timestamp,
            };

            let previous = self.states.insert(region.id.clone(), next);
            let transition = match (previous.map(|s| s.containment), containment) {
                (Some(Containment::Outside), Containment::Inside) => Transition::Enter,
                (Some(Containment::Inside), Containment::Outside) => Transition::Exit,
                (None, _) => {
                    debug!(region_id = %region.id, ?containment, "Initial classification");
                    continue;
                }
                _ => continue,
            };

            if !region.watch.contains(transition) {
                debug!(
                    region_id = %region.id,
                    transition = transition.as_str(),
                    "Unwatched transition"
                );
                continue;
            }

            events.push(TransitionEvent {
                region_id: region.id.clone(),
                transition,
                timestamp: fix.timestamp,
                fix: *fix,
            });
        }

        events
    }

    /// Prune regions expired at `now` and return every id expired since the
    /// last call, including those pruned during evaluation.
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        self.prune(now);
        self.take_expired()
    }

    pub fn take_expired(&mut self) -> Vec<String> {
        std::mem::take(&mut self.expired)
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        for id in self.registry.prune_expired(now) {
            self.states.remove(&id);
            self.expired.push(id);
        }
    }
}
