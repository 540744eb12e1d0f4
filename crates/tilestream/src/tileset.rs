//! Tileset tree model and `tileset.json` manifest parsing.
//!
//! Tiles live in an arena owned by [`Tileset`] and refer to each other by
//! [`TileId`]. The renderer-side content nodes are tracked separately by the
//! streaming manager, keyed by content URL, so neither tree owns the other.

use glam::{DMat3, DMat4, DQuat, DVec3};
use serde::Deserialize;
use tilestream_coords::{GeodeticPosition, geodetic_to_ecef};

use crate::error::{Error, Result};

/// Index of a tile within its [`Tileset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub usize);

/// How a tile's children relate to its own content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refinement {
    /// Children add detail on top of the parent's content.
    Add,
    /// Children supersede the parent's content once they are all loaded.
    #[default]
    Replace,
}

/// Spatial extent of a tile, in the tile's own coordinate frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundingVolume {
    /// Oriented box: center plus three half-axis vectors (matrix columns).
    Box {
        /// Box center.
        center: DVec3,
        /// Half-length axes.
        half_axes: DMat3,
    },
    /// Geographic region in radians and meters above the ellipsoid.
    Region {
        /// Westernmost longitude.
        west: f64,
        /// Southernmost latitude.
        south: f64,
        /// Easternmost longitude.
        east: f64,
        /// Northernmost latitude.
        north: f64,
        /// Minimum height.
        min_height: f64,
        /// Maximum height.
        max_height: f64,
    },
    /// Sphere.
    Sphere {
        /// Sphere center.
        center: DVec3,
        /// Sphere radius.
        radius: f64,
    },
}

impl BoundingVolume {
    /// A sphere enclosing this volume after applying `transform`.
    ///
    /// Regions are absolute ECEF extents and ignore the transform.
    #[must_use]
    pub fn bounding_sphere(&self, transform: &DMat4) -> (DVec3, f64) {
        match *self {
            BoundingVolume::Box { center, half_axes } => {
                let center = transform.transform_point3(center);
                let extent = transform.transform_vector3(half_axes.x_axis).length()
                    + transform.transform_vector3(half_axes.y_axis).length()
                    + transform.transform_vector3(half_axes.z_axis).length();
                (center, extent)
            }
            BoundingVolume::Sphere { center, radius } => {
                let (scale, _, _) = transform.to_scale_rotation_translation();
                (
                    transform.transform_point3(center),
                    radius * scale.max_element(),
                )
            }
            BoundingVolume::Region {
                west,
                south,
                east,
                north,
                min_height,
                max_height,
            } => {
                let center = geodetic_to_ecef(GeodeticPosition::from_radians(
                    (south + north) * 0.5,
                    (west + east) * 0.5,
                    (min_height + max_height) * 0.5,
                ));
                let radius = [south, north]
                    .into_iter()
                    .flat_map(|lat| [west, east].map(|lon| (lat, lon)))
                    .flat_map(|(lat, lon)| [min_height, max_height].map(|h| (lat, lon, h)))
                    .map(|(lat, lon, h)| {
                        geodetic_to_ecef(GeodeticPosition::from_radians(lat, lon, h))
                            .distance(center)
                    })
                    .fold(0.0, f64::max);
                (center, radius)
            }
        }
    }
}

/// A node in the tile tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// This tile's index.
    pub id: TileId,
    /// Parent tile, `None` for the root.
    pub parent: Option<TileId>,
    /// Child tiles in manifest order.
    pub children: Vec<TileId>,
    /// Absolute content URL, or `None` for grouping tiles.
    pub content_url: Option<String>,
    /// Transform from this tile's frame to its parent's frame.
    pub transform: DMat4,
    /// Spatial extent, if the manifest gave one.
    pub bounding_volume: Option<BoundingVolume>,
    /// Refinement, inherited from the parent when unspecified.
    pub refine: Refinement,
    /// Error, in meters, of rendering this tile instead of its children.
    pub geometric_error: f64,
}

impl Tile {
    /// Whether the tile carries a renderable payload.
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.content_url.is_some()
    }
}

/// A parsed tileset: an arena of tiles plus the manifest's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Tileset {
    url: String,
    version: Option<String>,
    geometric_error: f64,
    tiles: Vec<Tile>,
}

impl Tileset {
    /// Parse a `tileset.json` manifest fetched from `url`.
    ///
    /// Content URIs are resolved against `url`.
    pub fn from_json(url: &str, bytes: &[u8]) -> Result<Self> {
        let raw: RawTileset = serde_json::from_slice(bytes).map_err(|e| Error::Manifest {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let mut tileset = Self {
            url: url.to_string(),
            version: raw.asset.map(|a| a.version),
            geometric_error: raw.geometric_error.unwrap_or(raw.root.geometric_error),
            tiles: Vec::new(),
        };

        // Iterative depth-first flattening; deep trees must not recurse.
        let mut stack = vec![(raw.root, None::<TileId>, Refinement::default())];
        while let Some((mut raw_tile, parent, inherited)) = stack.pop() {
            let id = TileId(tileset.tiles.len());
            let children = std::mem::take(&mut raw_tile.children);
            let tile = tileset.convert_tile(raw_tile, id, parent, inherited)?;
            let refine = tile.refine;
            tileset.tiles.push(tile);
            if let Some(parent) = parent {
                tileset.tiles[parent.0].children.push(id);
            }
            // Reverse so children keep manifest order in the arena.
            for child in children.into_iter().rev() {
                stack.push((child, Some(id), refine));
            }
        }

        Ok(tileset)
    }

    fn convert_tile(
        &self,
        raw: RawTile,
        id: TileId,
        parent: Option<TileId>,
        inherited: Refinement,
    ) -> Result<Tile> {
        let manifest_error = |message: String| Error::Manifest {
            url: self.url.clone(),
            message,
        };

        let refine = match raw.refine.as_deref() {
            None => inherited,
            Some(r) if r.eq_ignore_ascii_case("add") => Refinement::Add,
            Some(r) if r.eq_ignore_ascii_case("replace") => Refinement::Replace,
            Some(other) => return Err(manifest_error(format!("unknown refine mode {other:?}"))),
        };

        let transform = match raw.transform {
            None => DMat4::IDENTITY,
            Some(values) => {
                let array: [f64; 16] = values.try_into().map_err(|v: Vec<f64>| {
                    manifest_error(format!("transform needs 16 values, got {}", v.len()))
                })?;
                DMat4::from_cols_array(&array)
            }
        };

        let bounding_volume = raw
            .bounding_volume
            .map(|bv| bv.convert())
            .transpose()
            .map_err(manifest_error)?;

        let content_url = raw
            .content
            .and_then(|c| c.uri.or(c.url))
            .map(|uri| resolve_uri(&self.url, &uri));

        Ok(Tile {
            id,
            parent,
            children: Vec::new(),
            content_url,
            transform,
            bounding_volume,
            refine,
            geometric_error: raw.geometric_error,
        })
    }

    /// The manifest URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The manifest's `asset.version`, if present.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Top-level geometric error.
    #[must_use]
    pub fn geometric_error(&self) -> f64 {
        self.geometric_error
    }

    /// The root tile's id.
    #[must_use]
    pub fn root(&self) -> TileId {
        TileId(0)
    }

    /// Look up a tile.
    #[must_use]
    pub fn get(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id.0)
    }

    /// Look up a tile.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not belong to this tileset.
    #[must_use]
    pub fn tile(&self, id: TileId) -> &Tile {
        &self.tiles[id.0]
    }

    /// Number of tiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Whether the tileset has no tiles. Parsed tilesets always have a root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// All tiles in depth-first manifest order.
    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.iter()
    }

    /// The tile whose content lives at `url`.
    #[must_use]
    pub fn find_by_content(&self, url: &str) -> Option<TileId> {
        self.tiles
            .iter()
            .find(|t| t.content_url.as_deref() == Some(url))
            .map(|t| t.id)
    }

    /// Nearest proper ancestor that carries content.
    #[must_use]
    pub fn content_ancestor(&self, id: TileId) -> Option<TileId> {
        let mut current = self.tile(id).parent;
        while let Some(tile) = current.map(|t| self.tile(t)) {
            if tile.has_content() {
                return Some(tile.id);
            }
            current = tile.parent;
        }
        None
    }

    /// Nearest content-bearing descendants of `id`, stopping at the first
    /// tile with content on each branch. `id` itself is included when it
    /// has content.
    #[must_use]
    pub fn content_frontier(&self, id: TileId) -> Vec<TileId> {
        let mut frontier = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let tile = self.tile(current);
            if tile.has_content() {
                frontier.push(current);
            } else {
                stack.extend(tile.children.iter().rev());
            }
        }
        frontier
    }

    /// Every descendant of `id`, not including `id`.
    #[must_use]
    pub fn descendants(&self, id: TileId) -> Vec<TileId> {
        let mut out = Vec::new();
        let mut stack: Vec<TileId> = self.tile(id).children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.tile(current).children.iter().rev());
        }
        out
    }

    /// Composed transform from `id`'s frame to the tileset's frame.
    #[must_use]
    pub fn world_transform(&self, id: TileId) -> DMat4 {
        let mut transform = DMat4::IDENTITY;
        let mut current = Some(id);
        while let Some(tile) = current.map(|t| self.tile(t)) {
            transform = tile.transform * transform;
            current = tile.parent;
        }
        transform
    }

    /// Translation and rotation of `id`'s composed transform.
    #[must_use]
    pub fn world_placement(&self, id: TileId) -> (DVec3, DQuat) {
        let (_, rotation, translation) = self.world_transform(id).to_scale_rotation_translation();
        (translation, rotation.normalize())
    }
}

/// Resolve a content URI relative to the manifest that references it.
#[must_use]
pub fn resolve_uri(base: &str, uri: &str) -> String {
    if let Ok(resolved) = reqwest::Url::parse(base).and_then(|b| b.join(uri)) {
        return resolved.to_string();
    }
    if uri.contains("://") || uri.starts_with('/') {
        return uri.to_string();
    }
    match base.rfind('/') {
        Some(slash) => format!("{}/{uri}", &base[..slash]),
        None => uri.to_string(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTileset {
    asset: Option<RawAsset>,
    geometric_error: Option<f64>,
    root: RawTile,
}

#[derive(Debug, Deserialize)]
struct RawAsset {
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTile {
    bounding_volume: Option<RawBoundingVolume>,
    #[serde(default)]
    geometric_error: f64,
    refine: Option<String>,
    content: Option<RawContent>,
    transform: Option<Vec<f64>>,
    #[serde(default)]
    children: Vec<RawTile>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawContent {
    uri: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawBoundingVolume {
    #[serde(rename = "box")]
    obb: Option<Vec<f64>>,
    region: Option<Vec<f64>>,
    sphere: Option<Vec<f64>>,
}

impl RawBoundingVolume {
    fn convert(self) -> std::result::Result<BoundingVolume, String> {
        if let Some(b) = self.obb {
            let [cx, cy, cz, xx, xy, xz, yx, yy, yz, zx, zy, zz]: [f64; 12] = b
                .try_into()
                .map_err(|v: Vec<f64>| format!("box needs 12 values, got {}", v.len()))?;
            return Ok(BoundingVolume::Box {
                center: DVec3::new(cx, cy, cz),
                half_axes: DMat3::from_cols(
                    DVec3::new(xx, xy, xz),
                    DVec3::new(yx, yy, yz),
                    DVec3::new(zx, zy, zz),
                ),
            });
        }
        if let Some(r) = self.region {
            let [west, south, east, north, min_height, max_height]: [f64; 6] = r
                .try_into()
                .map_err(|v: Vec<f64>| format!("region needs 6 values, got {}", v.len()))?;
            return Ok(BoundingVolume::Region {
                west,
                south,
                east,
                north,
                min_height,
                max_height,
            });
        }
        if let Some(s) = self.sphere {
            let [x, y, z, radius]: [f64; 4] = s
                .try_into()
                .map_err(|v: Vec<f64>| format!("sphere needs 4 values, got {}", v.len()))?;
            return Ok(BoundingVolume::Sphere {
                center: DVec3::new(x, y, z),
                radius,
            });
        }
        Err("bounding volume has no box, region or sphere".to_string())
    }
}
