//! Data models for Geolockr.
//!
//! Every type here has a JSON form used by the HTTP layer and by the
//! webhook sink. Coordinates are WGS-84 degrees, distances are meters and
//! timestamps are UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GeofenceError;
use crate::lock::LockMode;

/// A single reported geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Latitude in degrees north (-90 to 90).
    pub latitude: f64,

    /// Longitude in degrees east (-180 to 180).
    pub longitude: f64,

    /// When the position was sampled.
    pub timestamp: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }

    /// Reject fixes whose coordinates are not finite or out of range.
    pub fn validate(&self) -> Result<(), GeofenceError> {
        validate_coordinates(self.latitude, self.longitude).map_err(GeofenceError::InvalidFix)
    }
}

pub(crate) fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), String> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(format!("latitude {latitude} out of range"));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(format!("longitude {longitude} out of range"));
    }
    Ok(())
}

/// A change in containment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    /// Outside to inside.
    Enter,
    /// Inside to outside.
    Exit,
}

impl Transition {
    fn bit(self) -> u8 {
        match self {
            Transition::Enter => 0b01,
            Transition::Exit => 0b10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Enter => "enter",
            Transition::Exit => "exit",
        }
    }
}

/// The subset of transitions a region reports.
///
/// Serialized as a list, e.g. `["enter", "exit"]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Transition>", into = "Vec<Transition>")]
pub struct WatchedTransitions(u8);

impl WatchedTransitions {
    pub const NONE: Self = Self(0);
    pub const ENTER: Self = Self(0b01);
    pub const EXIT: Self = Self(0b10);
    pub const BOTH: Self = Self(0b11);

    pub fn contains(&self, transition: Transition) -> bool {
        self.0 & transition.bit() != 0
    }

    /// Raw mask, as stored in the database.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Rebuild from a stored mask, ignoring unknown bits.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::BOTH.0)
    }
}

impl Default for WatchedTransitions {
    fn default() -> Self {
        Self::BOTH
    }
}

impl From<Vec<Transition>> for WatchedTransitions {
    fn from(transitions: Vec<Transition>) -> Self {
        Self(transitions.iter().fold(0, |mask, t| mask | t.bit()))
    }
}

impl From<WatchedTransitions> for Vec<Transition> {
    fn from(watch: WatchedTransitions) -> Self {
        [Transition::Enter, Transition::Exit]
            .into_iter()
            .filter(|t| watch.contains(*t))
            .collect()
    }
}

/// A named circular geofence.
///
/// Immutable once registered; replacing it means registering a new region
/// under the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceRegion {
    /// Unique within the registry.
    pub id: String,

    /// Center latitude in degrees.
    pub latitude: f64,

    /// Center longitude in degrees.
    pub longitude: f64,

    /// Radius in meters, strictly positive.
    pub radius_meters: f64,

    /// Transitions that produce events (default: both).
    #[serde(default)]
    pub watch: WatchedTransitions,

    /// Absolute expiration; `None` means the region never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl GeofenceRegion {
    /// A region that never expires.
    pub fn new(
        id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
        watch: WatchedTransitions,
    ) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            radius_meters,
            watch,
            expires_at: None,
        }
    }

    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn validate(&self) -> Result<(), GeofenceError> {
        if self.id.trim().is_empty() {
            return Err(GeofenceError::invalid_region(&self.id, "empty identifier"));
        }
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(GeofenceError::invalid_region(
                &self.id,
                format!("radius must be positive, got {}", self.radius_meters),
            ));
        }
        validate_coordinates(self.latitude, self.longitude)
            .map_err(|reason| GeofenceError::invalid_region(&self.id, reason))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Whether a fix was last classified inside or outside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Containment {
    Inside,
    Outside,
}

/// Per-region containment. A region with no entry is UNKNOWN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContainmentState {
    pub containment: Containment,
    pub updated_at: DateTime<Utc>,
}

/// An ENTER or EXIT detected for one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub region_id: String,
    pub transition: Transition,
    /// Timestamp of the triggering fix.
    pub timestamp: DateTime<Utc>,
    pub fix: LocationFix,
}

/// Request body for POST /fix.
///
/// Coordinates may be null (the sampler had no position); such fixes are
/// discarded. The timestamp defaults to server time.
#[derive(Debug, Clone, Deserialize)]
pub struct FixRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl FixRequest {
    /// The fix this request describes, if both coordinates are present.
    pub fn into_fix(self, now: DateTime<Utc>) -> Option<LocationFix> {
        Some(LocationFix::new(
            self.latitude?,
            self.longitude?,
            self.timestamp.unwrap_or(now),
        ))
    }
}

/// Response for POST /fix.
#[derive(Debug, Clone, Serialize)]
pub struct FixResponse {
    pub events: Vec<TransitionEvent>,

    /// True when the fix was missing or invalid and nothing was evaluated.
    pub discarded: bool,
}

/// Request body for POST /lock.
#[derive(Debug, Clone, Deserialize)]
pub struct LockRequest {
    pub mode: LockMode,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// Query parameters for GET /events/recent.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Lookback window in minutes (default: 60).
    #[serde(default = "default_lookback_minutes")]
    pub minutes: u32,
}

fn default_lookback_minutes() -> u32 {
    60
}

/// Response for GET /events/recent.
#[derive(Debug, Clone, Serialize)]
pub struct EventsResponse {
    pub events: Vec<TransitionEvent>,
    pub lookback_minutes: u32,
}

/// Response for GET /health.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_regions: usize,
    pub delivered: u64,
    pub dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn region(radius: f64) -> GeofenceRegion {
        GeofenceRegion::new("home", 33.9965, -81.0271, radius, WatchedTransitions::BOTH)
    }

    #[test]
    fn test_region_validation() {
        assert!(region(100.0).validate().is_ok());
        assert!(matches!(
            region(0.0).validate(),
            Err(GeofenceError::InvalidRegion { .. })
        ));
        assert!(region(-5.0).validate().is_err());
        assert!(region(f64::NAN).validate().is_err());

        let mut bad_center = region(100.0);
        bad_center.latitude = 91.0;
        assert!(bad_center.validate().is_err());

        let mut no_id = region(100.0);
        no_id.id = "  ".to_string();
        assert!(no_id.validate().is_err());
    }

    #[test]
    fn test_fix_validation() {
        let now = Utc::now();
        assert!(LocationFix::new(0.0, 0.0, now).validate().is_ok());
        assert!(LocationFix::new(-90.0, 180.0, now).validate().is_ok());
        assert!(LocationFix::new(90.1, 0.0, now).validate().is_err());
        assert!(LocationFix::new(0.0, -180.5, now).validate().is_err());
        assert!(LocationFix::new(f64::INFINITY, 0.0, now).validate().is_err());
    }

    #[test]
    fn test_expiration() {
        let now = Utc::now();
        assert!(!region(10.0).is_expired(now));

        let expiring = region(10.0).with_expiration(now);
        assert!(expiring.is_expired(now));
        assert!(!expiring.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn test_watched_transitions_json() {
        let watch: WatchedTransitions = serde_json::from_str(r#"["exit"]"#).unwrap();
        assert!(watch.contains(Transition::Exit));
        assert!(!watch.contains(Transition::Enter));

        let json = serde_json::to_string(&WatchedTransitions::BOTH).unwrap();
        assert_eq!(json, r#"["enter","exit"]"#);
    }

    #[test]
    fn test_region_defaults_to_both_transitions() {
        let region: GeofenceRegion = serde_json::from_str(
            r#"{"id": "r", "latitude": 1.0, "longitude": 2.0, "radius_meters": 50.0}"#,
        )
        .unwrap();
        assert_eq!(region.watch, WatchedTransitions::BOTH);
        assert!(region.expires_at.is_none());
    }

    #[test]
    fn test_fix_request_with_null_coordinates() {
        let now = Utc::now();
        let request: FixRequest =
            serde_json::from_str(r#"{"latitude": null, "longitude": 3.0}"#).unwrap();
        assert!(request.into_fix(now).is_none());

        let request: FixRequest =
            serde_json::from_str(r#"{"latitude": 1.0, "longitude": 3.0}"#).unwrap();
        assert_eq!(request.into_fix(now).unwrap().timestamp, now);
    }
}
