//! Geographic primitives.
//!
//! Coordinates are WGS84 latitude/longitude pairs in degrees. Distances are
//! great-circle distances on a spherical earth, which is accurate to well
//! under a meter for the few-kilometer regions this crate monitors.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Mean earth radius in meters (IUGG).
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// A latitude/longitude pair in degrees.
///
/// # Examples
///
/// ```
/// use geofence::Coordinate;
///
/// let cupertino = Coordinate::new(37.3361, -122.0).unwrap();
/// assert!(cupertino.distance_to(&cupertino) < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees, `[-90, 90]`.
    pub latitude: f64,
    /// Longitude in degrees, `[-180, 180]`.
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a validated coordinate.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::CoordinateOutOfRange` when either component
    /// is non-finite or outside its valid range.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        let coordinate = Self { latitude, longitude };
        if coordinate.is_valid() {
            Ok(coordinate)
        } else {
            Err(ValidationError::CoordinateOutOfRange { latitude, longitude })
        }
    }

    /// Returns true when both components are finite and in range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Location providers report `(0, 0)` when they have no fix.
    #[must_use]
    pub fn is_null_island(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    /// Great-circle distance in meters (haversine).
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = lat2 - lat1;
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        // Clamp guards against rounding pushing `a` past 1.0 for antipodal points.
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_METERS * c
    }

    /// Returns the coordinate `meters` north of this one (negative for south).
    ///
    /// Used by hosts and tests to place points at a known distance.
    #[must_use]
    pub fn offset_north(&self, meters: f64) -> Self {
        let delta = (meters / EARTH_RADIUS_METERS).to_degrees();
        Self {
            latitude: (self.latitude + delta).clamp(-90.0, 90.0),
            longitude: self.longitude,
        }
    }
}
