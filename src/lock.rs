//! Lock modes: the user-facing ways of creating a geofence.
//!
//! - current location: alert when the user leaves a small zone around them
//! - destination: alert when the user arrives at a fixed place
//! - driving: declared, not implemented

use serde::{Deserialize, Serialize};

use crate::error::GeofenceError;
use crate::model::{GeofenceRegion, LocationFix, WatchedTransitions};

/// Region id used by the current-location lock.
pub const CURRENT_LOCATION_ID: &str = "current_location";

/// Region id used by the destination lock.
pub const DESTINATION_ID: &str = "destination_location";

/// Radius of every lock region.
pub const LOCK_RADIUS_METERS: f64 = 100.0;

/// Destination used when the request does not name one.
pub const DEFAULT_DESTINATION: (f64, f64) = (33.9965, -81.0271);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    CurrentLocation,
    Destination,
    Driving,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::CurrentLocation => "current_location",
            LockMode::Destination => "destination",
            LockMode::Driving => "driving",
        }
    }

    /// Build the region this mode locks to.
    ///
    /// `position` is the user's position for a current-location lock and the
    /// target for a destination lock.
    pub fn region(&self, position: Option<(f64, f64)>) -> Result<GeofenceRegion, GeofenceError> {
        match self {
            LockMode::CurrentLocation => {
                let (latitude, longitude) = position.ok_or(GeofenceError::NoLocation)?;
                Ok(GeofenceRegion::new(
                    CURRENT_LOCATION_ID,
                    latitude,
                    longitude,
                    LOCK_RADIUS_METERS,
                    WatchedTransitions::EXIT,
                ))
            }
            LockMode::Destination => {
                let (latitude, longitude) = position.unwrap_or(DEFAULT_DESTINATION);
                Ok(GeofenceRegion::new(
                    DESTINATION_ID,
                    latitude,
                    longitude,
                    LOCK_RADIUS_METERS,
                    WatchedTransitions::ENTER,
                ))
            }
            LockMode::Driving => Err(GeofenceError::UnsupportedMode(self.as_str().to_string())),
        }
    }
}

/// Coordinates of a fix, for feeding [`LockMode::region`].
pub fn position_of(fix: &LocationFix) -> (f64, f64) {
    (fix.latitude, fix.longitude)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Transition;

    #[test]
    fn test_current_location_watches_exit() {
        let region = LockMode::CurrentLocation
            .region(Some((51.5, -0.12)))
            .unwrap();

        assert_eq!(region.id, CURRENT_LOCATION_ID);
        assert_eq!(region.radius_meters, LOCK_RADIUS_METERS);
        assert!(region.watch.contains(Transition::Exit));
        assert!(!region.watch.contains(Transition::Enter));
        assert!(region.expires_at.is_none());
    }

    #[test]
    fn test_current_location_requires_position() {
        assert_eq!(
            LockMode::CurrentLocation.region(None),
            Err(GeofenceError::NoLocation)
        );
    }

    #[test]
    fn test_destination_defaults() {
        let region = LockMode::Destination.region(None).unwrap();

        assert_eq!(region.id, DESTINATION_ID);
        assert_eq!((region.latitude, region.longitude), DEFAULT_DESTINATION);
        assert!(region.watch.contains(Transition::Enter));
        assert!(!region.watch.contains(Transition::Exit));
    }

    #[test]
    fn test_driving_is_unsupported() {
        assert!(matches!(
            LockMode::Driving.region(Some((0.0, 0.0))),
            Err(GeofenceError::UnsupportedMode(_))
        ));
    }

    #[test]
    fn test_mode_json() {
        let mode: LockMode = serde_json::from_str(r#""current_location""#).unwrap();
        assert_eq!(mode, LockMode::CurrentLocation);
    }
}
