//! Local tangent-plane frames and the engine axis convention.
//!
//! The engine renders in a Y-up, left-handed frame. An East-North-Up vector
//! `(e, n, u)` is brought into that frame in two fixed steps:
//!
//! 1. Axis permutation `(e, n, u) -> (e, u, n)`, which makes up the second axis.
//! 2. A 180° rotation about the up axis, `(x, y, z) -> (-x, y, -z)`.
//!
//! Together: `engine = (-e, u, -n)`. The recipe must not change; getting any
//! single sign wrong renders tiles mirrored or upside down.
//!
//! Content whose geometry is expressed in ECEF axes is brought into engine
//! handedness with the same recipe, so the pose rotation of an ECEF-anchored
//! node is the engine-frame conjugate of the ECEF-to-ENU rotation.

use glam::{DMat3, DQuat, DVec3};

use crate::{GeodeticPosition, LocalPose, ecef_to_geodetic, geodetic_to_ecef};

/// Maps ENU components to engine components.
const ENU_TO_ENGINE: DMat3 = DMat3::from_cols(
    // Image of east.
    DVec3::new(-1.0, 0.0, 0.0),
    // Image of north.
    DVec3::new(0.0, 0.0, -1.0),
    // Image of up.
    DVec3::new(0.0, 1.0, 0.0),
);

/// Origins closer than this to the Earth's center have no tangent plane.
const MIN_ORIGIN_RADIUS: f64 = 1.0;

fn assert_valid_origin(origin: DVec3) {
    assert!(
        origin.is_finite() && origin.length_squared() > MIN_ORIGIN_RADIUS * MIN_ORIGIN_RADIUS,
        "ENU transform requires a defined origin away from the Earth's center, got {origin}"
    );
}

/// Rotation from ECEF axes into ENU axes at `origin`.
///
/// The rows of the returned matrix are the east, north and up unit vectors
/// at the geodetic position of `origin`, so `enu_frame(o) * v` expresses the
/// ECEF vector `v` in local ENU components.
///
/// # Panics
///
/// Panics if `origin` is not finite or lies at the Earth's center.
#[must_use]
pub fn enu_frame(origin: DVec3) -> DMat3 {
    assert_valid_origin(origin);

    let geo = ecef_to_geodetic(origin);
    let (sin_lat, cos_lat) = geo.latitude.to_radians().sin_cos();
    let (sin_lon, cos_lon) = geo.longitude.to_radians().sin_cos();

    let east = DVec3::new(-sin_lon, cos_lon, 0.0);
    let north = DVec3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
    let up = DVec3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat);

    DMat3::from_cols(east, north, up).transpose()
}

/// Convert an ENU vector to engine axes.
#[must_use]
pub fn enu_to_engine(enu: DVec3) -> DVec3 {
    ENU_TO_ENGINE * enu
}

/// Convert an engine-axis vector back to ENU components.
#[must_use]
pub fn engine_to_enu(engine: DVec3) -> DVec3 {
    ENU_TO_ENGINE.transpose() * engine
}

/// Express `point` relative to `origin` in the engine-local frame.
///
/// The returned rotation orients content authored in ECEF axes so that it
/// lines up with the local frame.
///
/// # Panics
///
/// Panics if `origin` is not finite or lies at the Earth's center.
#[must_use]
pub fn ecef_to_enu(point: DVec3, origin: DVec3) -> LocalPose {
    let frame = enu_frame(origin);
    let position = enu_to_engine(frame * (point - origin));
    let rotation = DQuat::from_mat3(&(ENU_TO_ENGINE * frame * ENU_TO_ENGINE.transpose()));
    LocalPose::new(position, rotation)
}

/// Inverse of [`ecef_to_enu`] for positions.
///
/// # Panics
///
/// Panics if `origin` is not finite or lies at the Earth's center.
#[must_use]
pub fn enu_to_ecef(local: DVec3, origin: DVec3) -> DVec3 {
    let frame = enu_frame(origin);
    origin + frame.transpose() * engine_to_enu(local)
}

/// Convert an orientation of ECEF-axis content into an engine-local rotation.
///
/// # Panics
///
/// Panics if `origin` is not finite or lies at the Earth's center.
#[must_use]
pub fn ecef_rotation_to_engine(rotation: DQuat, origin: DVec3) -> DQuat {
    let frame = enu_frame(origin);
    let m = ENU_TO_ENGINE * frame * DMat3::from_quat(rotation) * ENU_TO_ENGINE.transpose();
    DQuat::from_mat3(&m).normalize()
}

/// Convert an engine-local rotation back into an orientation in ECEF axes.
///
/// # Panics
///
/// Panics if `origin` is not finite or lies at the Earth's center.
#[must_use]
pub fn engine_rotation_to_ecef(rotation: DQuat, origin: DVec3) -> DQuat {
    let frame = enu_frame(origin);
    let m = frame.transpose() * ENU_TO_ENGINE.transpose() * DMat3::from_quat(rotation) * ENU_TO_ENGINE;
    DQuat::from_mat3(&m).normalize()
}

/// Pose of an ECEF-anchored node relative to an ECEF-anchored parent node.
///
/// Both nodes carry content in ECEF axes with the given orientations. The
/// result does not depend on the current origin, so nested nodes keep it
/// across origin changes while only the outermost anchored node moves.
#[must_use]
pub fn relative_pose(
    anchor: DVec3,
    orientation: DQuat,
    parent_anchor: DVec3,
    parent_orientation: DQuat,
) -> LocalPose {
    let inverse_parent = parent_orientation.normalize().inverse();
    let position = enu_to_engine(inverse_parent * (anchor - parent_anchor));
    let relative = DMat3::from_quat(inverse_parent * orientation.normalize());
    let rotation = DQuat::from_mat3(&(ENU_TO_ENGINE * relative * ENU_TO_ENGINE.transpose()));
    LocalPose::new(position, rotation)
}

/// Map an engine-local point to its geodetic position.
///
/// # Panics
///
/// Panics if `origin` is not finite or lies at the Earth's center.
#[must_use]
pub fn local_to_geodetic(local: DVec3, origin: DVec3) -> GeodeticPosition {
    ecef_to_geodetic(enu_to_ecef(local, origin))
}

/// Map a geodetic position into the engine-local frame at `origin`.
#[must_use]
pub fn geodetic_to_local(position: GeodeticPosition, origin: DVec3) -> DVec3 {
    ecef_to_enu(geodetic_to_ecef(position), origin).position
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WGS84_A;
    use proptest::prelude::*;

    const EQUATOR: DVec3 = DVec3::new(WGS84_A, 0.0, 0.0);

    fn assert_close(actual: DVec3, expected: DVec3, tolerance: f64) {
        assert!(
            (actual - expected).length() < tolerance,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_axis_recipe_at_equator() {
        // At (0°, 0°): east = +Y, north = +Z, up = +X in ECEF.
        let east = ecef_to_enu(EQUATOR + DVec3::Y, EQUATOR).position;
        let north = ecef_to_enu(EQUATOR + DVec3::Z, EQUATOR).position;
        let up = ecef_to_enu(EQUATOR + DVec3::X, EQUATOR).position;

        assert_close(east, DVec3::new(-1.0, 0.0, 0.0), 1e-9);
        assert_close(north, DVec3::new(0.0, 0.0, -1.0), 1e-9);
        assert_close(up, DVec3::new(0.0, 1.0, 0.0), 1e-9);
    }

    #[test]
    fn test_recipe_is_left_handed() {
        assert!((ENU_TO_ENGINE.determinant() + 1.0).abs() < 1e-12);
        assert_close(enu_to_engine(DVec3::new(1.0, 2.0, 3.0)), DVec3::new(-1.0, 3.0, -2.0), 1e-12);
        assert_close(engine_to_enu(DVec3::new(-1.0, 3.0, -2.0)), DVec3::new(1.0, 2.0, 3.0), 1e-12);
    }

    #[test]
    fn test_origin_maps_to_zero() {
        let origin = geodetic_to_ecef(GeodeticPosition::new(-33.86, 151.21, 40.0));
        let pose = ecef_to_enu(origin, origin);
        assert_close(pose.position, DVec3::ZERO, 1e-9);
    }

    #[test]
    fn test_rotation_aligns_ecef_content() {
        let origin = geodetic_to_ecef(GeodeticPosition::new(51.5, -0.12, 30.0));
        let offset = DVec3::new(120.0, -45.0, 300.0);
        let pose = ecef_to_enu(origin + offset, origin);

        // Rotating ECEF-axis content (converted with the same recipe) must
        // land on the converted offset.
        let rotated = pose.rotation * enu_to_engine(offset);
        assert_close(rotated, pose.position, 1e-6);
        assert!((pose.rotation.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rotation_round_trip() {
        let origin = geodetic_to_ecef(GeodeticPosition::new(10.0, 20.0, 0.0));
        let q = DQuat::from_axis_angle(DVec3::new(1.0, 2.0, 3.0).normalize(), 0.7);
        let engine = ecef_rotation_to_engine(q, origin);
        let back = engine_rotation_to_ecef(engine, origin);
        assert!(back.dot(q).abs() > 1.0 - 1e-12);
        assert!((engine.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_identity_rotation_matches_pose() {
        let origin = geodetic_to_ecef(GeodeticPosition::new(-12.0, 77.0, 5.0));
        let pose = ecef_to_enu(origin, origin);
        let converted = ecef_rotation_to_engine(DQuat::IDENTITY, origin);
        assert!(pose.rotation.dot(converted).abs() > 1.0 - 1e-12);
    }

    #[test]
    fn test_up_is_engine_y_everywhere() {
        for (lat, lon) in [(0.0, 0.0), (45.0, 90.0), (-60.0, -120.0), (89.0, 10.0)] {
            let geo = GeodeticPosition::new(lat, lon, 0.0);
            let origin = geodetic_to_ecef(geo);
            let above = geodetic_to_ecef(geo.with_height(100.0));
            let local = ecef_to_enu(above, origin).position;
            assert_close(local, DVec3::new(0.0, 100.0, 0.0), 1e-6);
        }
    }

    #[test]
    fn test_local_to_geodetic() {
        let geo = GeodeticPosition::new(35.0, 139.0, 12.0);
        let origin = geodetic_to_ecef(geo);
        let back = local_to_geodetic(DVec3::ZERO, origin);
        assert!((back.latitude - geo.latitude).abs() < 1e-9);
        assert!((back.longitude - geo.longitude).abs() < 1e-9);
        assert!((back.height - geo.height).abs() < 1e-6);

        let elevated = geodetic_to_local(geo.with_height(112.0), origin);
        assert_close(elevated, DVec3::new(0.0, 100.0, 0.0), 1e-6);
    }

    #[test]
    fn test_relative_pose_composes_with_parent() {
        let parent_anchor = geodetic_to_ecef(GeodeticPosition::new(48.85, 2.29, 35.0));
        let parent_orientation = DQuat::from_rotation_z(0.3);
        let anchor = parent_anchor + DVec3::new(250.0, -80.0, 40.0);
        let orientation = DQuat::from_rotation_x(-0.2);

        let relative = relative_pose(anchor, orientation, parent_anchor, parent_orientation);

        for origin in [parent_anchor + DVec3::new(900.0, 0.0, 0.0), anchor] {
            let parent_position = ecef_to_enu(parent_anchor, origin).position;
            let parent_rotation = ecef_rotation_to_engine(parent_orientation, origin);
            let world_position = parent_position + parent_rotation * relative.position;
            let world_rotation = parent_rotation * relative.rotation;

            assert_close(world_position, ecef_to_enu(anchor, origin).position, 1e-6);
            let expected = ecef_rotation_to_engine(orientation, origin);
            assert!(world_rotation.dot(expected).abs() > 1.0 - 1e-9);
        }
    }

    #[test]
    fn test_relative_pose_of_self_is_identity() {
        let anchor = geodetic_to_ecef(GeodeticPosition::new(0.0, 90.0, 0.0));
        let q = DQuat::from_rotation_y(1.1);
        let pose = relative_pose(anchor, q, anchor, q);
        assert_close(pose.position, DVec3::ZERO, 1e-9);
        assert!(pose.rotation.dot(DQuat::IDENTITY).abs() > 1.0 - 1e-12);
    }

    #[test]
    #[should_panic(expected = "requires a defined origin")]
    fn test_zero_origin_panics() {
        let _ = ecef_to_enu(EQUATOR, DVec3::ZERO);
    }

    #[test]
    #[should_panic(expected = "requires a defined origin")]
    fn test_nan_origin_panics() {
        let _ = enu_to_ecef(DVec3::ONE, DVec3::NAN);
    }

    proptest! {
        #[test]
        fn prop_enu_round_trip(
            lat in -89.0f64..89.0,
            lon in -180.0f64..180.0,
            height in -1_000.0f64..1_000_000.0,
            dx in -50_000.0f64..50_000.0,
            dy in -50_000.0f64..50_000.0,
            dz in -50_000.0f64..50_000.0,
        ) {
            let origin = geodetic_to_ecef(GeodeticPosition::new(lat, lon, height));
            let point = origin + DVec3::new(dx, dy, dz);
            let pose = ecef_to_enu(point, origin);
            let back = enu_to_ecef(pose.position, origin);
            prop_assert!((back - point).length() < 1e-6);
            prop_assert!((pose.rotation.length() - 1.0).abs() < 1e-12);
        }
    }
}
