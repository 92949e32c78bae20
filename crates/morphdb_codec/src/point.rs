//! Geographic point record.

use crate::structure;
use serde::{Deserialize, Serialize};

/// A WGS84 coordinate in degrees.
///
/// Stored as two plain float columns, `{path}__latitude` and
/// `{path}__longitude`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees, -90 to 90.
    pub latitude: f64,
    /// Longitude in degrees, -180 to 180.
    pub longitude: f64,
}

structure!(GeoPoint {
    latitude: f64,
    longitude: f64,
});

impl GeoPoint {
    /// Creates a point.
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Type identity used to recognize geo fields in descriptors.
    pub fn type_name() -> &'static str {
        std::any::type_name::<GeoPoint>()
    }
}
