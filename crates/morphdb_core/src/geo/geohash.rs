//! Geohash encoding over the standard base-32 alphabet.
//!
//! Neighbors are computed from decoded cell bounds rather than from
//! border/neighbor lookup tables, so every precision and direction uses the
//! same arithmetic.

use crate::error::{CoreError, CoreResult};
use morphdb_codec::GeoPoint;

/// The standard geohash alphabet.
pub const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Longest supported hash.
pub const MAX_PRECISION: usize = 12;

/// Kilometers per degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;

/// Bounding box of a geohash cell, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl Bounds {
    /// Center of the cell.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Returns true if the point lies inside the cell (edges inclusive).
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.latitude)
            && (self.min_lon..=self.max_lon).contains(&point.longitude)
    }
}

/// Compass direction to a neighboring cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Up.
    North,
    /// Up and right.
    NorthEast,
    /// Right.
    East,
    /// Down and right.
    SouthEast,
    /// Down.
    South,
    /// Down and left.
    SouthWest,
    /// Left.
    West,
    /// Up and left.
    NorthWest,
}

impl Direction {
    /// All eight directions, clockwise from north.
    pub const ALL: [Direction; 8] = [
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
    ];

    /// Latitude and longitude steps in cell units.
    fn offset(self) -> (f64, f64) {
        match self {
            Direction::North => (1.0, 0.0),
            Direction::NorthEast => (1.0, 1.0),
            Direction::East => (0.0, 1.0),
            Direction::SouthEast => (-1.0, 1.0),
            Direction::South => (-1.0, 0.0),
            Direction::SouthWest => (-1.0, -1.0),
            Direction::West => (0.0, -1.0),
            Direction::NorthWest => (1.0, -1.0),
        }
    }
}

/// Encodes a point at the given precision (number of characters).
pub fn encode(point: &GeoPoint, precision: usize) -> String {
    let precision = precision.min(MAX_PRECISION);
    let (mut lat, mut lon) = ((-90.0_f64, 90.0_f64), (-180.0_f64, 180.0_f64));
    let mut hash = String::with_capacity(precision);
    let (mut bits, mut bit_count, mut even) = (0usize, 0, true);

    while hash.len() < precision {
        let (range, coordinate) = if even {
            (&mut lon, point.longitude)
        } else {
            (&mut lat, point.latitude)
        };
        let mid = (range.0 + range.1) / 2.0;
        bits <<= 1;
        if coordinate >= mid {
            bits |= 1;
            range.0 = mid;
        } else {
            range.1 = mid;
        }
        even = !even;
        bit_count += 1;
        if bit_count == 5 {
            hash.push(char::from(BASE32[bits]));
            bits = 0;
            bit_count = 0;
        }
    }
    hash
}

/// Decodes the bounding box of a hash.
///
/// # Errors
///
/// Returns an invalid query error for characters outside the alphabet.
pub fn decode_bounds(hash: &str) -> CoreResult<Bounds> {
    let (mut lat, mut lon) = ((-90.0_f64, 90.0_f64), (-180.0_f64, 180.0_f64));
    let mut even = true;
    for c in hash.bytes() {
        let index = BASE32
            .iter()
            .position(|&b| b == c.to_ascii_lowercase())
            .ok_or_else(|| {
                CoreError::invalid_query(format!("invalid geohash character {:?}", char::from(c)))
            })?;
        for shift in (0..5).rev() {
            let range = if even { &mut lon } else { &mut lat };
            let mid = (range.0 + range.1) / 2.0;
            if (index >> shift) & 1 == 1 {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            even = !even;
        }
    }
    Ok(Bounds {
        min_lat: lat.0,
        max_lat: lat.1,
        min_lon: lon.0,
        max_lon: lon.1,
    })
}

/// The adjacent cell in a direction, or `None` past a pole.
///
/// Longitude wraps around the antimeridian.
///
/// # Errors
///
/// Returns an invalid query error if `hash` is not a valid geohash.
pub fn neighbor(hash: &str, direction: Direction) -> CoreResult<Option<String>> {
    let bounds = decode_bounds(hash)?;
    let center = bounds.center();
    let (d_lat, d_lon) = direction.offset();

    let latitude = center.latitude + d_lat * (bounds.max_lat - bounds.min_lat);
    if !(-90.0..=90.0).contains(&latitude) {
        return Ok(None);
    }
    let mut longitude = center.longitude + d_lon * (bounds.max_lon - bounds.min_lon);
    if longitude > 180.0 {
        longitude -= 360.0;
    } else if longitude < -180.0 {
        longitude += 360.0;
    }
    Ok(Some(encode(&GeoPoint::new(latitude, longitude), hash.len())))
}

/// The distinct cells surrounding `hash`, excluding `hash` itself.
///
/// # Errors
///
/// Returns an invalid query error if `hash` is not a valid geohash.
pub fn neighbors(hash: &str) -> CoreResult<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(8);
    for direction in Direction::ALL {
        if let Some(cell) = neighbor(hash, direction)? {
            if cell != hash && !out.contains(&cell) {
                out.push(cell);
            }
        }
    }
    Ok(out)
}

/// Longest precision whose cells are at least `radius_km` tall and wide
/// at `latitude`, so that a cell and its neighbors cover the circle.
///
/// Returns `None` when even a single-character cell is too small.
pub fn precision_for_radius(radius_km: f64, latitude: f64) -> Option<usize> {
    let lon_scale = latitude.to_radians().cos().abs().max(1e-6);
    (1..=MAX_PRECISION).rev().find(|&precision| {
        let bits = precision * 5;
        let lon_bits = bits.div_ceil(2);
        let lat_bits = bits / 2;
        let height_km = 180.0 / f64::from(1u32 << lat_bits.min(31)) * KM_PER_DEGREE;
        let width_km = 360.0 / f64::from(1u32 << lon_bits.min(31)) * KM_PER_DEGREE * lon_scale;
        height_km >= radius_km && width_km >= radius_km
    })
}

/// Geohash prefixes that cover a circle: the center cell and its neighbors.
///
/// Returns `None` when the radius is too large for any prefix to help.
pub fn covering_cells(center: &GeoPoint, radius_km: f64) -> Option<Vec<String>> {
    let precision = precision_for_radius(radius_km, center.latitude)?;
    let cell = encode(center, precision);
    let mut cells = vec![cell.clone()];
    // The cell was produced by `encode`, so it always decodes.
    cells.extend(neighbors(&cell).unwrap_or_default());
    Some(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::haversine_km;

    #[test]
    fn known_encoding() {
        let p = GeoPoint::new(57.64911, 10.40744);
        assert_eq!(encode(&p, 11), "u4pruydqqvj");
        assert_eq!(encode(&p, 3), "u4p");
    }

    #[test]
    fn decode_contains_point() {
        let p = GeoPoint::new(-33.8688, 151.2093);
        for precision in 1..=MAX_PRECISION {
            let bounds = decode_bounds(&encode(&p, precision)).unwrap();
            assert!(bounds.contains(&p));
        }
    }

    #[test]
    fn invalid_characters_are_rejected() {
        assert!(decode_bounds("u4a").is_err());
        assert!(decode_bounds("U4P").is_ok());
    }

    #[test]
    fn top_level_neighbors() {
        assert_eq!(neighbor("s", Direction::North).unwrap().as_deref(), Some("u"));
        assert_eq!(neighbor("s", Direction::East).unwrap().as_deref(), Some("t"));
        assert_eq!(neighbor("s", Direction::West).unwrap().as_deref(), Some("e"));
        assert_eq!(neighbor("s", Direction::South).unwrap().as_deref(), Some("k"));
    }

    #[test]
    fn neighbor_is_reversible() {
        let hash = encode(&GeoPoint::new(40.7128, -74.0060), 6);
        let north = neighbor(&hash, Direction::North).unwrap().unwrap();
        assert_eq!(neighbor(&north, Direction::South).unwrap().unwrap(), hash);
        assert_eq!(neighbors(&hash).unwrap().len(), 8);
    }

    #[test]
    fn wraps_antimeridian_and_stops_at_poles() {
        let east_edge = encode(&GeoPoint::new(0.0, 179.99), 2);
        let wrapped = neighbor(&east_edge, Direction::East).unwrap().unwrap();
        assert!(decode_bounds(&wrapped).unwrap().min_lon < -170.0);

        let top = encode(&GeoPoint::new(89.99, 0.0), 2);
        assert_eq!(neighbor(&top, Direction::North).unwrap(), None);
    }

    #[test]
    fn covering_cells_contain_nearby_points() {
        let center = GeoPoint::new(51.5074, -0.1278);
        let cells = covering_cells(&center, 5.0).unwrap();
        assert_eq!(cells.len(), 9);

        let nearby = GeoPoint::new(51.53, -0.10);
        assert!(haversine_km(&center, &nearby) < 5.0);
        let precision = cells[0].len();
        assert!(cells.contains(&encode(&nearby, precision)));
    }

    #[test]
    fn huge_radius_has_no_prefix() {
        assert_eq!(precision_for_radius(30_000.0, 0.0), None);
    }
}
