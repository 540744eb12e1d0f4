//! Hierarchical tile streaming for planet-scale scenes around a floating origin.
//!
//! This crate loads and unloads the content of a tileset's tiles as a camera
//! moves, keeping every loaded node positioned against an [`OriginManager`]
//! that can be recentered at any time without losing precision.
//!
//! # Design principles
//!
//! - **Single-threaded**: Everything runs on one thread; async loads are
//!   local tasks on a tokio `LocalSet`, and shared state uses `Rc`/`Cell`
//! - **Collaborators behind traits**: Rendering ([`Scene`]), level-of-detail
//!   selection ([`TilesetTraversal`]), payload decoding ([`ContentDecoder`]),
//!   fetching ([`Fetcher`]) and elevation lookups ([`ElevationService`]) are
//!   supplied by the caller
//! - **Content failures are local**: A tile that fails to fetch or decode is
//!   logged and retried later; it never stops its siblings
//!
//! # Example
//!
//! ```ignore
//! use tilestream::{OriginManager, StreamingConfig, TileStreamer};
//!
//! let streamer = TileStreamer::new(scene, origin, fetcher, decoders, traversal, StreamingConfig::default());
//! let id = streamer.load("https://example.com/tileset.json").await?;
//!
//! // Every frame:
//! streamer.update(&camera);
//! ```

pub mod cache;
mod config;
mod content_node;
pub mod decoder;
pub mod elevation;
mod error;
pub mod fetch;
mod origin;
pub mod scene;
mod streamer;
mod terrain;
pub mod tileset;
pub mod traversal;

use std::future::Future;
use std::pin::Pin;

pub use cache::{Cache, MemoryCache, NoCache};
pub use config::{
    DEFAULT_LOAD_RETRY_INTERVAL_MS, DEFAULT_RECENTER_DISTANCE, DEFAULT_TERRAIN_SKIP_EPSILON,
    StreamingConfig,
};
pub use content_node::ContentNode;
pub use decoder::{ContentDecoder, DecodedContent, DecoderRegistry};
pub use elevation::{ElevationService, OpenElevation};
pub use error::{Error, Result};
pub use fetch::{Fetcher, HttpFetcher, MemoryFetcher};
pub use origin::{OriginListener, OriginManager, OriginState};
pub use scene::{MemoryScene, NodeId, Scene};
pub use streamer::{LoadStatus, TileStreamer, TilesetId};
pub use terrain::{TerrainUpdate, TerrainUpdater};
pub use tileset::{BoundingVolume, Refinement, Tile, TileId, Tileset};
pub use traversal::{
    CameraParams, CameraState, Frustum, Plane, ScriptedTraversal, TilesetTraversal,
    TraversalResult,
};

// Re-export the coordinate kernel for convenience.
pub use tilestream_coords::{
    EcefPosition, GeodeticPosition, LocalPose, ecef_to_enu, ecef_to_geodetic, enu_to_ecef,
    geodetic_to_ecef,
};

/// Boxed future that is not required to be `Send`.
pub type LocalBoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;
