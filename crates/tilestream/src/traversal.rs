//! Interface to the level-of-detail traversal that decides which tiles to load.
//!
//! Selection heuristics are not implemented here. The streaming manager hands
//! a [`TilesetTraversal`] the camera each frame and acts on the tiles it
//! returns.

use std::collections::VecDeque;
use std::fmt;

use glam::{DMat4, DVec3};
use tilestream_coords::GeodeticPosition;

use crate::tileset::{TileId, Tileset};

/// A half-space `normal · p + distance >= 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal pointing into the half-space.
    pub normal: DVec3,
    /// Signed offset along the normal.
    pub distance: f64,
}

impl Plane {
    fn from_coefficients(a: f64, b: f64, c: f64, d: f64) -> Self {
        let normal = DVec3::new(a, b, c);
        let length = normal.length();
        if length > 0.0 {
            Self {
                normal: normal / length,
                distance: d / length,
            }
        } else {
            Self {
                normal: DVec3::ZERO,
                distance: 0.0,
            }
        }
    }

    /// Signed distance from the plane to `point`.
    #[must_use]
    pub fn signed_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }
}

/// Six view frustum planes, in engine-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near and far planes.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extract the frustum of a view-projection matrix.
    #[must_use]
    pub fn from_view_projection(vp: DMat4) -> Self {
        let m = vp.to_cols_array_2d();
        let row = |i: usize, sign: f64| {
            Plane::from_coefficients(
                m[0][3] + sign * m[0][i],
                m[1][3] + sign * m[1][i],
                m[2][3] + sign * m[2][i],
                m[3][3] + sign * m[3][i],
            )
        };

        Self {
            planes: [
                row(0, 1.0),
                row(0, -1.0),
                row(1, 1.0),
                row(1, -1.0),
                row(2, 1.0),
                row(2, -1.0),
            ],
        }
    }

    /// Whether any part of a sphere lies inside the frustum.
    #[must_use]
    pub fn intersects_sphere(&self, center: DVec3, radius: f64) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.signed_distance(center) >= -radius)
    }
}

/// Camera pose and frustum for one frame, in engine-local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    /// Camera position.
    pub position: DVec3,
    /// Unit view direction.
    pub direction: DVec3,
    /// Unit up vector.
    pub up: DVec3,
    /// View frustum.
    pub frustum: Frustum,
}

/// Everything a traversal needs for one frame.
pub struct CameraParams<'a> {
    /// Camera position, engine-local.
    pub position: DVec3,
    /// Unit view direction.
    pub direction: DVec3,
    /// Unit up vector.
    pub up: DVec3,
    /// View frustum.
    pub frustum: Frustum,
    /// Maps an engine-local point to its geodetic position at the current origin.
    pub unproject: &'a dyn Fn(DVec3) -> GeodeticPosition,
}

impl CameraParams<'_> {
    /// Geodetic position of an engine-local point.
    #[must_use]
    pub fn local_to_geodetic(&self, point: DVec3) -> GeodeticPosition {
        (self.unproject)(point)
    }
}

impl fmt::Debug for CameraParams<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraParams")
            .field("position", &self.position)
            .field("direction", &self.direction)
            .field("up", &self.up)
            .finish_non_exhaustive()
    }
}

/// Tiles whose content should change this frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalResult {
    /// Tiles that now need content.
    pub load: Vec<TileId>,
    /// Tiles whose content is no longer needed.
    pub unload: Vec<TileId>,
}

/// Level-of-detail selection over a tileset.
pub trait TilesetTraversal {
    /// Decide which tiles of `tileset` to load and unload for this camera.
    fn update(&mut self, tileset: &Tileset, camera: &CameraParams<'_>) -> TraversalResult;
}

/// A traversal that replays queued results, one per call, then selects nothing.
///
/// Results are matched to tiles by content URL so a script can be written
/// before the tileset is parsed.
#[derive(Debug, Default)]
pub struct ScriptedTraversal {
    frames: VecDeque<ScriptedFrame>,
    calls: usize,
}

#[derive(Debug, Default)]
struct ScriptedFrame {
    load: Vec<Selector>,
    unload: Vec<Selector>,
}

#[derive(Debug, Clone)]
enum Selector {
    Root,
    ContentUrlSuffix(String),
    Tile(TileId),
}

impl Selector {
    fn resolve(&self, tileset: &Tileset) -> Option<TileId> {
        match self {
            Selector::Root => Some(tileset.root()),
            Selector::Tile(id) => tileset.get(*id).map(|t| t.id),
            Selector::ContentUrlSuffix(suffix) => tileset
                .iter()
                .find(|t| {
                    t.content_url
                        .as_deref()
                        .is_some_and(|u| u.ends_with(suffix.as_str()))
                })
                .map(|t| t.id),
        }
    }
}

impl ScriptedTraversal {
    /// Create an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a frame that loads tiles whose content URL ends with each suffix.
    #[must_use]
    pub fn then_load(mut self, suffixes: &[&str]) -> Self {
        self.frames.push_back(ScriptedFrame {
            load: suffixes
                .iter()
                .map(|s| Selector::ContentUrlSuffix((*s).to_string()))
                .collect(),
            unload: Vec::new(),
        });
        self
    }

    /// Queue a frame that unloads tiles whose content URL ends with each suffix.
    #[must_use]
    pub fn then_unload(mut self, suffixes: &[&str]) -> Self {
        self.frames.push_back(ScriptedFrame {
            load: Vec::new(),
            unload: suffixes
                .iter()
                .map(|s| Selector::ContentUrlSuffix((*s).to_string()))
                .collect(),
        });
        self
    }

    /// Queue a frame that loads the root tile.
    #[must_use]
    pub fn then_load_root(mut self) -> Self {
        self.frames.push_back(ScriptedFrame {
            load: vec![Selector::Root],
            unload: Vec::new(),
        });
        self
    }

    /// Queue a frame that unloads the given tiles.
    #[must_use]
    pub fn then_unload_tiles(mut self, tiles: &[TileId]) -> Self {
        self.frames.push_back(ScriptedFrame {
            load: Vec::new(),
            unload: tiles.iter().copied().map(Selector::Tile).collect(),
        });
        self
    }

    /// Queue a frame that selects nothing.
    #[must_use]
    pub fn then_idle(mut self) -> Self {
        self.frames.push_back(ScriptedFrame::default());
        self
    }

    /// Number of `update` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl TilesetTraversal for ScriptedTraversal {
    fn update(&mut self, tileset: &Tileset, _camera: &CameraParams<'_>) -> TraversalResult {
        self.calls += 1;
        let Some(frame) = self.frames.pop_front() else {
            return TraversalResult::default();
        };

        let resolve = |selectors: &[Selector]| -> Vec<TileId> {
            selectors
                .iter()
                .filter_map(|s| {
                    let id = s.resolve(tileset);
                    if id.is_none() {
                        tracing::warn!("Scripted traversal: no tile matches {:?}", s);
                    }
                    id
                })
                .collect()
        };

        TraversalResult {
            load: resolve(&frame.load),
            unload: resolve(&frame.unload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_frustum() -> Frustum {
        let view = DMat4::look_at_rh(DVec3::ZERO, DVec3::NEG_Z, DVec3::Y);
        let projection = DMat4::perspective_rh_gl(60f64.to_radians(), 1.0, 1.0, 1000.0);
        Frustum::from_view_projection(projection * view)
    }

    #[test]
    fn test_frustum_planes_are_normalized() {
        for plane in camera_frustum().planes {
            assert!((plane.normal.length() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_frustum_sphere_culling() {
        let frustum = camera_frustum();
        assert!(frustum.intersects_sphere(DVec3::new(0.0, 0.0, -50.0), 1.0));
        // Behind the camera.
        assert!(!frustum.intersects_sphere(DVec3::new(0.0, 0.0, 50.0), 1.0));
        // Past the far plane.
        assert!(!frustum.intersects_sphere(DVec3::new(0.0, 0.0, -2000.0), 10.0));
        // Far off to the side but large enough to reach in.
        assert!(frustum.intersects_sphere(DVec3::new(200.0, 0.0, -50.0), 200.0));
    }

    #[test]
    fn test_scripted_traversal_replays_frames() {
        let json = r#"{ "root": { "geometricError": 1, "children": [
            { "geometricError": 0, "content": { "uri": "a.b3dm" } }
        ] } }"#;
        let tileset = Tileset::from_json("tileset.json", json.as_bytes()).unwrap();
        let unproject = |_: DVec3| GeodeticPosition::new(0.0, 0.0, 0.0);
        let camera = CameraParams {
            position: DVec3::ZERO,
            direction: DVec3::NEG_Z,
            up: DVec3::Y,
            frustum: camera_frustum(),
            unproject: &unproject,
        };

        let mut traversal = ScriptedTraversal::new()
            .then_load_root()
            .then_load(&["a.b3dm", "missing.b3dm"])
            .then_unload(&["a.b3dm"]);

        assert_eq!(traversal.update(&tileset, &camera).load, vec![tileset.root()]);
        assert_eq!(traversal.update(&tileset, &camera).load, vec![TileId(1)]);
        assert_eq!(traversal.update(&tileset, &camera).unload, vec![TileId(1)]);
        assert_eq!(traversal.update(&tileset, &camera), TraversalResult::default());
        assert_eq!(traversal.calls(), 4);
    }
}
