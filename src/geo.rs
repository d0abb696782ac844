//! Great-circle distance on a spherical Earth.

use crate::model::{GeofenceRegion, LocationFix};

/// Mean Earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance in meters between two points given in degrees.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Clamp guards asin against rounding just above 1 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

impl GeofenceRegion {
    /// Distance in meters from the region center to the fix.
    pub fn distance_to(&self, fix: &LocationFix) -> f64 {
        haversine_distance_m(self.latitude, self.longitude, fix.latitude, fix.longitude)
    }

    /// Inside when the distance is at most the radius.
    pub fn contains(&self, fix: &LocationFix) -> bool {
        self.distance_to(fix) <= self.radius_meters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WatchedTransitions;
    use chrono::Utc;

    #[test]
    fn test_zero_distance() {
        assert_eq!(haversine_distance_m(33.9965, -81.0271, 33.9965, -81.0271), 0.0);
    }

    #[test]
    fn test_one_degree_of_latitude() {
        // One degree along a meridian is R * pi / 180
        let d = haversine_distance_m(0.0, 0.0, 1.0, 0.0);
        let expected = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        assert!((d - expected).abs() < 1e-6, "got {d}");
    }

    #[test]
    fn test_known_city_pair() {
        // London to Paris is roughly 343.5 km on a sphere
        let d = haversine_distance_m(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((d - 343_500.0).abs() < 1_000.0, "got {d}");
    }

    #[test]
    fn test_symmetric_and_antipodal() {
        let a = haversine_distance_m(10.0, 20.0, -30.0, 140.0);
        let b = haversine_distance_m(-30.0, 140.0, 10.0, 20.0);
        assert!((a - b).abs() < 1e-6);

        let half_circumference = EARTH_RADIUS_M * std::f64::consts::PI;
        let antipodal = haversine_distance_m(0.0, 0.0, 0.0, 180.0);
        assert!((antipodal - half_circumference).abs() < 1e-3);
    }

    #[test]
    fn test_contains_is_boundary_inclusive() {
        let now = Utc::now();
        let fix = LocationFix::new(0.001, 0.0, now);
        let distance = haversine_distance_m(0.0, 0.0, fix.latitude, fix.longitude);

        let exact = GeofenceRegion::new("r", 0.0, 0.0, distance, WatchedTransitions::BOTH);
        assert!(exact.contains(&fix));

        let smaller =
            GeofenceRegion::new("r", 0.0, 0.0, distance * 0.999, WatchedTransitions::BOTH);
        assert!(!smaller.contains(&fix));
    }
}
