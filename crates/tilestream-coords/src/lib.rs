//! Coordinate conversions for planet-scale scenes rendered around a floating origin.
//!
//! This crate provides pure synchronous functions for moving positions and
//! rotations between three frames:
//!
//! - **ECEF**: Earth-centered, Earth-fixed Cartesian meters (`glam::DVec3`)
//! - **Geodetic**: latitude/longitude in degrees and height above the WGS84 ellipsoid
//! - **Engine-local**: an East-North-Up tangent frame anchored at a movable
//!   origin, expressed in the engine's Y-up, left-handed axis convention
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no threading primitives
//! - **Double precision**: All inputs and outputs are `f64`
//! - **Fail loudly**: Degenerate origins are caller bugs and panic

mod ellipsoid;
mod enu;

pub use ellipsoid::{
    WGS84_A, WGS84_B, WGS84_E2, WGS84_EP2, WGS84_F, ecef_to_geodetic, geodetic_to_ecef,
    surface_normal,
};
pub use enu::{
    ecef_rotation_to_engine, ecef_to_enu, engine_rotation_to_ecef, engine_to_enu, enu_frame,
    enu_to_ecef, enu_to_engine, geodetic_to_local, local_to_geodetic, relative_pose,
};

use glam::{DQuat, DVec3};

/// A position in Earth-centered, Earth-fixed meters.
pub type EcefPosition = DVec3;

/// A position on or above the WGS84 ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeodeticPosition {
    /// Geodetic latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
    /// Height above the ellipsoid in meters.
    pub height: f64,
}

impl GeodeticPosition {
    /// Create a geodetic position from degrees and meters.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64, height: f64) -> Self {
        Self {
            latitude,
            longitude,
            height,
        }
    }

    /// Create a geodetic position from radians and meters.
    #[must_use]
    pub fn from_radians(latitude: f64, longitude: f64, height: f64) -> Self {
        Self {
            latitude: latitude.to_degrees(),
            longitude: longitude.to_degrees(),
            height,
        }
    }

    /// Return the same horizontal position at a different height.
    #[must_use]
    pub const fn with_height(self, height: f64) -> Self {
        Self { height, ..self }
    }
}

/// A pose in engine-local units relative to the current origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPose {
    /// Translation from the origin, in meters, engine axes.
    pub position: DVec3,
    /// Orientation as a unit quaternion.
    pub rotation: DQuat,
}

impl LocalPose {
    /// The pose of anything sitting exactly at the origin with no rotation.
    pub const IDENTITY: Self = Self {
        position: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
    };

    /// Create a pose, normalizing the rotation.
    #[must_use]
    pub fn new(position: DVec3, rotation: DQuat) -> Self {
        Self {
            position,
            rotation: rotation.normalize(),
        }
    }
}

impl Default for LocalPose {
    fn default() -> Self {
        Self::IDENTITY
    }
}
