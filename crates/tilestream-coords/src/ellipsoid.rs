//! WGS84 ellipsoid conversions between ECEF and geodetic coordinates.

use glam::DVec3;

use crate::GeodeticPosition;

/// Semi-major axis in meters.
pub const WGS84_A: f64 = 6_378_137.0;

/// Flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Semi-minor axis in meters.
pub const WGS84_B: f64 = WGS84_A * (1.0 - WGS84_F);

/// First eccentricity squared.
pub const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

/// Second eccentricity squared.
pub const WGS84_EP2: f64 = WGS84_E2 / (1.0 - WGS84_E2);

/// Below this horizontal distance from the polar axis the longitude is
/// meaningless and the point is treated as lying on the axis.
const POLAR_AXIS_EPSILON: f64 = 1e-9;

/// Maximum number of Bowring refinement steps.
const MAX_ITERATIONS: usize = 10;

/// Convert a geodetic position to ECEF meters.
#[must_use]
pub fn geodetic_to_ecef(position: GeodeticPosition) -> DVec3 {
    let lat = position.latitude.to_radians();
    let lon = position.longitude.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    // Prime vertical radius of curvature.
    let n = WGS84_A / (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();

    DVec3::new(
        (n + position.height) * cos_lat * cos_lon,
        (n + position.height) * cos_lat * sin_lon,
        (n * (1.0 - WGS84_E2) + position.height) * sin_lat,
    )
}

/// Convert ECEF meters to a geodetic position.
///
/// Uses Bowring's parametric-latitude iteration, which converges in one or
/// two steps near the surface and in a handful at orbital altitudes. The
/// height is computed with a formula that stays well conditioned at the
/// poles, where the usual `p / cos(lat) - N` form divides by zero.
#[must_use]
pub fn ecef_to_geodetic(position: DVec3) -> GeodeticPosition {
    let p = position.x.hypot(position.y);
    let z = position.z;

    if p < POLAR_AXIS_EPSILON {
        let latitude = if z < 0.0 { -90.0 } else { 90.0 };
        return GeodeticPosition::new(latitude, 0.0, z.abs() - WGS84_B);
    }

    let lon = position.y.atan2(position.x);

    // Initial parametric latitude from the point itself.
    let mut beta = (WGS84_A * z).atan2(WGS84_B * p);
    let mut lat = bowring_step(p, z, beta);

    for _ in 0..MAX_ITERATIONS {
        beta = ((1.0 - WGS84_F) * lat.sin()).atan2(lat.cos());
        let next = bowring_step(p, z, beta);
        let converged = (next - lat).abs() < 1e-15;
        lat = next;
        if converged {
            break;
        }
    }

    let (sin_lat, cos_lat) = lat.sin_cos();
    let height =
        p * cos_lat + z * sin_lat - WGS84_A * (1.0 - WGS84_E2 * sin_lat * sin_lat).sqrt();

    GeodeticPosition::from_radians(lat, lon, height)
}

fn bowring_step(p: f64, z: f64, beta: f64) -> f64 {
    let (sin_beta, cos_beta) = beta.sin_cos();
    (z + WGS84_EP2 * WGS84_B * sin_beta.powi(3)).atan2(p - WGS84_E2 * WGS84_A * cos_beta.powi(3))
}

/// Unit normal of the ellipsoid at a geodetic position, in ECEF axes.
#[must_use]
pub fn surface_normal(position: GeodeticPosition) -> DVec3 {
    let lat = position.latitude.to_radians();
    let lon = position.longitude.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_equator_prime_meridian() {
        let ecef = geodetic_to_ecef(GeodeticPosition::new(0.0, 0.0, 0.0));
        assert!((ecef - DVec3::new(WGS84_A, 0.0, 0.0)).length() < 1e-9);
    }

    #[test]
    fn test_north_pole() {
        let ecef = geodetic_to_ecef(GeodeticPosition::new(90.0, 0.0, 100.0));
        assert!(ecef.x.abs() < 1e-6);
        assert!((ecef.z - (WGS84_B + 100.0)).abs() < 1e-6);

        let back = ecef_to_geodetic(DVec3::new(0.0, 0.0, WGS84_B + 100.0));
        assert_eq!(back.latitude, 90.0);
        assert!((back.height - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_south_pole_on_axis() {
        let back = ecef_to_geodetic(DVec3::new(0.0, 0.0, -WGS84_B - 5.0));
        assert_eq!(back.latitude, -90.0);
        assert!((back.height - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_known_location() {
        // Eiffel Tower base on the ellipsoid.
        let ecef = geodetic_to_ecef(GeodeticPosition::new(48.858_370, 2.294_481, 0.0));
        assert!((ecef.x - 4_200_938.385).abs() < 0.01, "x = {}", ecef.x);
        assert!((ecef.y - 168_321.810).abs() < 0.01, "y = {}", ecef.y);
        assert!((ecef.z - 4_780_210.847).abs() < 0.01, "z = {}", ecef.z);
    }

    #[test]
    fn test_geostationary_altitude() {
        let geo = GeodeticPosition::new(12.5, -70.25, 35_786_000.0);
        let back = ecef_to_geodetic(geodetic_to_ecef(geo));
        assert!((back.latitude - geo.latitude).abs() < 1e-9);
        assert!((back.longitude - geo.longitude).abs() < 1e-9);
        assert!((back.height - geo.height).abs() < 1e-4);
    }

    #[test]
    fn test_surface_normal_is_unit() {
        let n = surface_normal(GeodeticPosition::new(33.0, 151.0, 0.0));
        assert!((n.length() - 1.0).abs() < 1e-12);
        assert!(n.z > 0.0);
    }

    proptest! {
        #[test]
        fn prop_geodetic_round_trip(
            latitude in -89.9f64..89.9,
            longitude in -179.999f64..179.999,
            height in -10_000.0f64..40_000_000.0,
        ) {
            let geo = GeodeticPosition::new(latitude, longitude, height);
            let back = ecef_to_geodetic(geodetic_to_ecef(geo));
            prop_assert!((back.latitude - latitude).abs() < 1e-7);
            prop_assert!((back.longitude - longitude).abs() < 1e-7);
            prop_assert!((back.height - height).abs() < 1e-3);
        }
    }
}
