//! Geographic primitives: points, bounding boxes, great-circle distance.
//!
//! Distances use the Haversine formula with a mean Earth radius of
//! 6,371,000 m. Bounding boxes support date-line wrap-around: a box with
//! `west > east` covers the longitudes `[west, 180] ∪ [-180, east]`.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A WGS-84 point. Latitude in [-90, 90], longitude in [-180, 180].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Create a validated point.
    pub fn new(lat: f64, lng: f64) -> crate::Result<Self> {
        if !(-90.0..=90.0).contains(&lat) || lat.is_nan() {
            return Err(crate::SearchError::invalid_argument(
                "latitude",
                lat,
                "must lie in [-90, 90]",
            ));
        }
        if !(-180.0..=180.0).contains(&lng) || lng.is_nan() {
            return Err(crate::SearchError::invalid_argument(
                "longitude",
                lng,
                "must lie in [-180, 180]",
            ));
        }
        Ok(Self { lat, lng })
    }

    /// Great-circle distance to `other` in meters (Haversine).
    pub fn distance_to(&self, other: &Self) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlng = (other.lng - self.lng).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    /// Axis-aligned bounds that contain every point within `radius_m`
    /// meters. Latitude edges clamp at the poles; the longitude span
    /// widens with latitude and degenerates to the full [-180, 180] range
    /// near the poles.
    pub fn bounding_box(&self, radius_m: f64) -> GeoBounds {
        let lat_delta = (radius_m / EARTH_RADIUS_M).to_degrees();
        let north = (self.lat + lat_delta).min(90.0);
        let south = (self.lat - lat_delta).max(-90.0);

        let cos_lat = self.lat.to_radians().cos();
        let (west, east) = if cos_lat.abs() < 1e-9 {
            // At a pole every longitude is within range.
            (-180.0, 180.0)
        } else {
            let lng_delta = (radius_m / (EARTH_RADIUS_M * cos_lat)).to_degrees();
            if lng_delta >= 180.0 {
                (-180.0, 180.0)
            } else {
                (
                    wrap_lng(self.lng - lng_delta),
                    wrap_lng(self.lng + lng_delta),
                )
            }
        };

        GeoBounds {
            north,
            south,
            east,
            west,
        }
    }
}

/// Wrap a longitude into [-180, 180].
fn wrap_lng(lng: f64) -> f64 {
    let mut l = lng;
    while l > 180.0 {
        l -= 360.0;
    }
    while l < -180.0 {
        l += 360.0;
    }
    l
}

/// An axis-aligned bounding box with `north >= south`.
///
/// `west > east` is permitted and means the box crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl GeoBounds {
    /// Create validated bounds.
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> crate::Result<Self> {
        for (name, lat) in [("north", north), ("south", south)] {
            if !(-90.0..=90.0).contains(&lat) || lat.is_nan() {
                return Err(crate::SearchError::invalid_argument(
                    "bounds",
                    lat,
                    format!("{name} latitude must lie in [-90, 90]"),
                ));
            }
        }
        for (name, lng) in [("east", east), ("west", west)] {
            if !(-180.0..=180.0).contains(&lng) || lng.is_nan() {
                return Err(crate::SearchError::invalid_argument(
                    "bounds",
                    lng,
                    format!("{name} longitude must lie in [-180, 180]"),
                ));
            }
        }
        if north < south {
            return Err(crate::SearchError::invalid_argument(
                "bounds",
                format!("north={north} south={south}"),
                "north must be >= south",
            ));
        }
        Ok(Self {
            north,
            south,
            east,
            west,
        })
    }

    /// Whether this box crosses the antimeridian.
    #[inline]
    pub fn crosses_date_line(&self) -> bool {
        self.west > self.east
    }

    /// Whether `point` lies inside the box (edges inclusive).
    pub fn contains(&self, point: &GeoPoint) -> bool {
        if point.lat < self.south || point.lat > self.north {
            return false;
        }
        if self.crosses_date_line() {
            point.lng >= self.west || point.lng <= self.east
        } else {
            point.lng >= self.west && point.lng <= self.east
        }
    }

    /// Whether this box and `other` overlap.
    pub fn intersects(&self, other: &Self) -> bool {
        if self.north < other.south || other.north < self.south {
            return false;
        }
        // Compare longitude intervals segment-wise so wrap-around boxes
        // work against both plain and wrapped boxes.
        self.lng_segments()
            .iter()
            .any(|(w1, e1)| {
                other
                    .lng_segments()
                    .iter()
                    .any(|(w2, e2)| w1 <= e2 && w2 <= e1)
            })
    }

    /// Geometric center. For wrap-around boxes the center sits on the
    /// antimeridian side.
    pub fn center(&self) -> GeoPoint {
        let lat = (self.north + self.south) / 2.0;
        let lng = if self.crosses_date_line() {
            wrap_lng((self.west + self.east + 360.0) / 2.0)
        } else {
            (self.west + self.east) / 2.0
        };
        GeoPoint { lat, lng }
    }

    /// Grow the box by `meters` in every direction, clamping at the poles.
    pub fn expand(&self, meters: f64) -> Self {
        let lat_delta = (meters / EARTH_RADIUS_M).to_degrees();
        // Use the widest latitude for the longitude delta so the expanded
        // box is a superset at every latitude it covers.
        let widest = self.north.abs().max(self.south.abs()).to_radians().cos();
        let lng_delta = if widest < 1e-9 {
            360.0
        } else {
            (meters / (EARTH_RADIUS_M * widest)).to_degrees()
        };
        let (west, east) = if lng_delta >= 180.0 {
            (-180.0, 180.0)
        } else {
            (wrap_lng(self.west - lng_delta), wrap_lng(self.east + lng_delta))
        };
        Self {
            north: (self.north + lat_delta).min(90.0),
            south: (self.south - lat_delta).max(-90.0),
            east,
            west,
        }
    }

    /// The box's longitude coverage as non-wrapping `[west, east]`
    /// segments. One segment for plain boxes, two when crossing the
    /// antimeridian.
    pub(crate) fn lng_segments(&self) -> Vec<(f64, f64)> {
        if self.crosses_date_line() {
            vec![(self.west, 180.0), (-180.0, self.east)]
        } else {
            vec![(self.west, self.east)]
        }
    }
}
