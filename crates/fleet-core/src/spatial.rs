//! Spatial math for routing, obstacle clearance and airspace overlap checks.

use crate::error::ValidationError;
use crate::models::GeoPoint;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Parse a `"lat,lon"` coordinate string.
///
/// `field` names the argument in the returned error so callers can tell
/// origin and destination failures apart.
pub fn parse_coordinates(field: &'static str, raw: &str) -> Result<GeoPoint, ValidationError> {
    let invalid = || ValidationError::InvalidCoordinates {
        field,
        value: raw.to_string(),
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let (lat_raw, lon_raw) = trimmed.split_once(',').ok_or_else(invalid)?;
    let lat: f64 = lat_raw.trim().parse().map_err(|_| invalid())?;
    let lon: f64 = lon_raw.trim().parse().map_err(|_| invalid())?;

    if !lat.is_finite() || !lon.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
        return Err(invalid());
    }

    Ok(GeoPoint { lat, lon })
}

/// Calculate distance between two points in meters using Haversine formula.
///
/// # Arguments
/// * `lat1`, `lon1` - First point coordinates in decimal degrees
/// * `lat2`, `lon2` - Second point coordinates in decimal degrees
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Haversine distance between two [`GeoPoint`]s.
pub fn distance_between(a: GeoPoint, b: GeoPoint) -> f64 {
    haversine_distance(a.lat, a.lon, b.lat, b.lon)
}

/// Meters per degree of latitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lat(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_132.954 - 559.822 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
        - 0.0023 * (6.0 * lat_rad).cos()
}

/// Meters per degree of longitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos() + 0.118 * (5.0 * lat_rad).cos()
}

pub fn lat_to_meters(deg: f64, ref_lat_deg: f64) -> f64 {
    deg * meters_per_deg_lat(ref_lat_deg)
}

pub fn lon_to_meters(deg: f64, ref_lat_deg: f64) -> f64 {
    deg * meters_per_deg_lon(ref_lat_deg)
}

/// Calculate bearing from point 1 to point 2 in radians.
/// Returns bearing in radians, 0 = north, π/2 = east.
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let x = delta_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    x.atan2(y)
}

/// Bearing in degrees normalized to [0, 360).
pub fn bearing_deg(from: GeoPoint, to: GeoPoint) -> f64 {
    normalize_heading(bearing(from.lat, from.lon, to.lat, to.lon).to_degrees())
}

pub fn normalize_heading(heading_deg: f64) -> f64 {
    heading_deg.rem_euclid(360.0)
}

/// Offset a position by distance and bearing.
///
/// # Arguments
/// * `lat`, `lon` - Starting position in degrees
/// * `distance_m` - Distance in meters
/// * `bearing_rad` - Bearing in radians (0 = north, π/2 = east)
///
/// # Returns
/// (new_lat, new_lon) in degrees
pub fn offset_by_bearing(lat: f64, lon: f64, distance_m: f64, bearing_rad: f64) -> (f64, f64) {
    if distance_m.abs() <= f64::EPSILON {
        return (lat, lon);
    }

    let lat1 = lat.to_radians();
    let lon1 = lon.to_radians();
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let mut lon2 = lon1 + y.atan2(x);
    lon2 =
        (lon2 + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI) - std::f64::consts::PI;

    (lat2.to_degrees(), lon2.to_degrees())
}

/// [`offset_by_bearing`] for a [`GeoPoint`] with the bearing in degrees.
pub fn offset_point(point: GeoPoint, distance_m: f64, bearing_deg: f64) -> GeoPoint {
    let (lat, lon) = offset_by_bearing(point.lat, point.lon, distance_m, bearing_deg.to_radians());
    GeoPoint { lat, lon }
}

/// Calculate minimum distance from a point to a line segment (in meters).
///
/// Works in a local east-north plane anchored at the segment start, which is
/// accurate enough for the few-kilometre legs a delivery flight is made of.
pub fn distance_to_segment_m(point: GeoPoint, seg_start: GeoPoint, seg_end: GeoPoint) -> f64 {
    let (distance, _) = closest_point_on_segment(point, seg_start, seg_end);
    distance
}

/// Distance to the segment plus the projection parameter `t` in [0, 1] of the
/// closest point.
pub fn closest_point_on_segment(point: GeoPoint, seg_start: GeoPoint, seg_end: GeoPoint) -> (f64, f64) {
    let ref_lat = seg_start.lat;

    let px = lon_to_meters(point.lon - seg_start.lon, ref_lat);
    let py = lat_to_meters(point.lat - seg_start.lat, ref_lat);

    let sx = lon_to_meters(seg_end.lon - seg_start.lon, ref_lat);
    let sy = lat_to_meters(seg_end.lat - seg_start.lat, ref_lat);

    let seg_len_sq = sx * sx + sy * sy;
    if seg_len_sq < 0.0001 {
        // Segment is essentially a point
        return ((px * px + py * py).sqrt(), 0.0);
    }

    // Project point onto segment line: t = ((P-A) · (B-A)) / |B-A|²
    let t = ((px * sx + py * sy) / seg_len_sq).clamp(0.0, 1.0);
    let dx = px - t * sx;
    let dy = py - t * sy;

    ((dx * dx + dy * dy).sqrt(), t)
}

/// A point beside a circular hazard, pushed out from its centre on the side
/// of the leg's closest approach.
pub fn detour_around(from: GeoPoint, to: GeoPoint, center: GeoPoint, radius_m: f64, clearance_m: f64) -> GeoPoint {
    let (_, t) = closest_point_on_segment(center, from, to);
    let closest = GeoPoint {
        lat: from.lat + (to.lat - from.lat) * t,
        lon: from.lon + (to.lon - from.lon) * t,
    };

    let push_bearing = if distance_between(center, closest) < 1.0 {
        // Centre sits on the leg: sidestep perpendicular to travel
        bearing_deg(from, to) + 90.0
    } else {
        bearing_deg(center, closest)
    };

    offset_point(center, radius_m.max(0.0) + clearance_m.max(0.0) * 2.0, push_bearing)
}

/// Total length of a polyline in meters.
pub fn path_length_m(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|pair| distance_between(pair[0], pair[1]))
        .sum()
}

/// Half-open ranges `[a_lo, a_hi)` and `[b_lo, b_hi)` intersect once each is
/// widened by `buffer` on both sides.
pub fn ranges_overlap(a_lo: f64, a_hi: f64, b_lo: f64, b_hi: f64, buffer: f64) -> bool {
    let buffer = buffer.max(0.0);
    a_lo < b_hi + buffer && b_lo < a_hi + buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // ~111km between these points (1 degree latitude)
        let dist = haversine_distance(0.0, 0.0, 1.0, 0.0);
        assert!((dist - 111_194.0).abs() < 100.0);
    }

    #[test]
    fn test_haversine_same_point() {
        let dist = haversine_distance(37.7749, -122.4194, 37.7749, -122.4194);
        assert!(dist < 0.001);
    }

    #[test]
    fn parse_coordinates_accepts_lat_lon_pairs() {
        let point = parse_coordinates("origin", " 37.7749, -122.4194 ").unwrap();
        assert!((point.lat - 37.7749).abs() < 1e-9);
        assert!((point.lon + 122.4194).abs() < 1e-9);
    }

    #[test]
    fn parse_coordinates_rejects_empty_and_malformed() {
        for raw in ["", "   ", "37.7", "abc,def", "91.0,0.0", "0.0,181.0", "NaN,1.0"] {
            let err = parse_coordinates("destination", raw).unwrap_err();
            assert!(
                matches!(err, ValidationError::InvalidCoordinates { field: "destination", .. }),
                "expected invalid coordinates for {raw:?}"
            );
        }
    }

    #[test]
    fn offset_point_round_trips_distance() {
        let start = GeoPoint { lat: 37.7749, lon: -122.4194 };
        let moved = offset_point(start, 250.0, 90.0);
        let dist = distance_between(start, moved);
        assert!((dist - 250.0).abs() < 0.5, "got {dist}");
        assert!((bearing_deg(start, moved) - 90.0).abs() < 0.5);
    }

    #[test]
    fn distance_to_segment_measures_perpendicular_offset() {
        let a = GeoPoint { lat: 33.0, lon: -117.0 };
        let b = offset_point(a, 1_000.0, 0.0);
        let mid = offset_point(a, 500.0, 0.0);
        let beside = offset_point(mid, 40.0, 90.0);

        let (dist, t) = closest_point_on_segment(beside, a, b);
        assert!((dist - 40.0).abs() < 1.0, "got {dist}");
        assert!((t - 0.5).abs() < 0.01);
    }

    #[test]
    fn half_open_ranges_touching_do_not_overlap() {
        assert!(!ranges_overlap(0.0, 50.0, 50.0, 100.0, 0.0));
        assert!(ranges_overlap(0.0, 50.0, 49.0, 100.0, 0.0));
        assert!(ranges_overlap(0.0, 50.0, 55.0, 100.0, 10.0));
    }
}
