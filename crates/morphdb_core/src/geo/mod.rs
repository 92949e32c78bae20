//! Geographic distance helpers.

pub mod geohash;

use crate::error::{CoreError, CoreResult};
use morphdb_codec::{GeoPoint, Value};

/// Mean Earth radius in kilometers (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Reads a point from a record value with `latitude` and `longitude` fields.
///
/// # Errors
///
/// Returns a type mismatch if either coordinate is missing or not a number.
pub fn point_of(value: &Value) -> CoreResult<GeoPoint> {
    let coordinate = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_float)
            .ok_or_else(|| CoreError::type_mismatch(name, "expected a numeric coordinate"))
    };
    Ok(GeoPoint::new(coordinate("latitude")?, coordinate("longitude")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn london_to_paris() {
        let london = GeoPoint::new(51.5074, -0.1278);
        let paris = GeoPoint::new(48.8566, 2.3522);
        let d = haversine_km(&london, &paris);
        assert!((d - 343.5).abs() < 1.0, "distance was {d}");
    }

    #[test]
    fn zero_distance() {
        let p = GeoPoint::new(10.0, 20.0);
        assert!(haversine_km(&p, &p).abs() < 1e-9);
    }

    #[test]
    fn point_from_record() {
        let value = Value::record(vec![
            ("latitude", Value::Float(1.5)),
            ("longitude", Value::Integer(2)),
        ]);
        assert_eq!(point_of(&value).unwrap(), GeoPoint::new(1.5, 2.0));
        assert!(point_of(&Value::record(vec![("latitude", Value::Float(1.0))])).is_err());
    }
}
