//! Ground mesh rebuilt around the camera from sampled elevations.
//!
//! The mesh is double-buffered: a replacement is inserted first and the
//! previous mesh is disposed one frame later, so the ground never blinks out.

use std::cell::Cell;
use std::rc::Rc;

use glam::DVec3;
use tilestream_coords::{
    GeodeticPosition, ecef_to_geodetic, enu_frame, geodetic_to_ecef, geodetic_to_local,
};

use crate::config::StreamingConfig;
use crate::elevation::ElevationService;
use crate::error::{Error, Result};
use crate::origin::{OriginListener, OriginManager};
use crate::scene::{NodeId, Scene};

/// Outcome of [`TerrainUpdater::update_terrain`].
#[derive(Debug, Clone, PartialEq)]
pub enum TerrainUpdate {
    /// The center barely moved; the current mesh was kept.
    Skipped,
    /// A new mesh was built from these engine-local points, row-major.
    Rebuilt {
        /// Grid points in engine-local coordinates.
        points: Vec<DVec3>,
    },
}

/// Last built center and cell size, cleared whenever the origin moves.
#[derive(Default)]
struct TerrainMemo {
    last: Cell<Option<(DVec3, f64)>>,
}

impl OriginListener for TerrainMemo {
    fn after_origin_change(&self, _new: DVec3) {
        // Local points baked into the mesh are stale now.
        self.last.set(None);
    }
}

/// Keeps a terrain mesh centered under a moving point.
pub struct TerrainUpdater {
    scene: Rc<dyn Scene>,
    origin: Rc<OriginManager>,
    elevation: Option<Rc<dyn ElevationService>>,
    skip_epsilon: f64,
    memo: Rc<TerrainMemo>,
    mesh: Option<NodeId>,
}

impl TerrainUpdater {
    /// Create an updater. Without an elevation service every mesh is flat.
    #[must_use]
    pub fn new(
        scene: Rc<dyn Scene>,
        origin: Rc<OriginManager>,
        elevation: Option<Rc<dyn ElevationService>>,
        config: &StreamingConfig,
    ) -> Self {
        let memo = Rc::new(TerrainMemo::default());
        let listener: Rc<dyn OriginListener> = memo.clone();
        origin.subscribe(&listener);
        Self {
            scene,
            origin,
            elevation,
            skip_epsilon: config.terrain_skip_epsilon,
            memo,
            mesh: None,
        }
    }

    /// The current terrain mesh, if one was built.
    #[must_use]
    pub fn mesh(&self) -> Option<NodeId> {
        self.mesh
    }

    /// Rebuild the mesh around `center_local` unless it is already there.
    ///
    /// Samples a `grid_resolution × grid_resolution` grid spaced `cell_size`
    /// meters apart on the ground below the center. Heights come from the
    /// elevation service unless `use_simplified` is set; if the service
    /// fails, the flat grid is used instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `grid_resolution < 2` or `cell_size`
    /// is not a positive finite number.
    pub async fn update_terrain(
        &mut self,
        center_local: DVec3,
        grid_resolution: usize,
        cell_size: f64,
        use_simplified: bool,
    ) -> Result<TerrainUpdate> {
        if grid_resolution < 2 {
            return Err(Error::InvalidData {
                context: "terrain grid",
                detail: format!("resolution must be at least 2, got {grid_resolution}"),
            });
        }
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(Error::InvalidData {
                context: "terrain grid",
                detail: format!("cell size must be positive, got {cell_size}"),
            });
        }

        let center_ecef = self.origin.to_ecef(center_local);
        if let Some((last_center, last_cell)) = self.memo.last.get() {
            #[allow(clippy::float_cmp)]
            let same_cell = last_cell == cell_size;
            if same_cell && last_center.distance(center_ecef) < self.skip_epsilon {
                return Ok(TerrainUpdate::Skipped);
            }
        }

        let grid = sample_grid(center_ecef, grid_resolution, cell_size);
        let grid = match (&self.elevation, use_simplified) {
            (Some(elevation), false) => match elevation.sample_heights(grid.clone()).await {
                Ok(resolved) if resolved.len() == grid.len() => resolved,
                Ok(resolved) => {
                    tracing::warn!(
                        "Elevation service returned {} heights for {} points, using flat terrain",
                        resolved.len(),
                        grid.len()
                    );
                    grid
                }
                Err(e) => {
                    tracing::warn!("Elevation lookup failed, using flat terrain: {}", e);
                    grid
                }
            },
            _ => grid,
        };

        // The origin may have moved while heights were in flight.
        let origin = self.origin.origin();
        let points: Vec<DVec3> = grid
            .into_iter()
            .map(|position| geodetic_to_local(position, origin))
            .collect();

        let mesh = self
            .scene
            .create_grid_mesh("terrain", &points, grid_resolution);
        let previous = self.mesh.replace(mesh);
        self.memo.last.set(Some((center_ecef, cell_size)));
        tracing::debug!(points = points.len(), cell_size, "rebuilt terrain mesh");

        if let Some(previous) = previous {
            self.scene.next_frame().await;
            self.scene.dispose(previous);
        }

        Ok(TerrainUpdate::Rebuilt { points })
    }

    /// Remove the mesh and stop following the origin.
    pub fn dispose(&mut self) {
        if let Some(mesh) = self.mesh.take() {
            self.scene.dispose(mesh);
        }
        let listener: Rc<dyn OriginListener> = self.memo.clone();
        self.origin.unsubscribe(&listener);
        self.memo.last.set(None);
    }
}

impl Drop for TerrainUpdater {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for TerrainUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerrainUpdater")
            .field("mesh", &self.mesh)
            .field("skip_epsilon", &self.skip_epsilon)
            .finish_non_exhaustive()
    }
}

/// Ground-level geodetic grid centered below `center_ecef`, row-major from
/// south-west to north-east.
fn sample_grid(center_ecef: DVec3, resolution: usize, cell_size: f64) -> Vec<GeodeticPosition> {
    let ground = ecef_to_geodetic(center_ecef).with_height(0.0);
    let ground_ecef = geodetic_to_ecef(ground);
    let enu_to_ecef = enu_frame(ground_ecef).transpose();

    #[allow(clippy::cast_precision_loss)]
    let half = (resolution - 1) as f64 / 2.0;
    let mut grid = Vec::with_capacity(resolution * resolution);
    for row in 0..resolution {
        for col in 0..resolution {
            #[allow(clippy::cast_precision_loss)]
            let offset = DVec3::new(
                (col as f64 - half) * cell_size,
                (row as f64 - half) * cell_size,
                0.0,
            );
            let point = ground_ecef + enu_to_ecef * offset;
            grid.push(ecef_to_geodetic(point).with_height(0.0));
        }
    }
    grid
}
