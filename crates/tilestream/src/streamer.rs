//! Camera-driven loading and unloading of tileset content.
//!
//! Each frame, [`TileStreamer::update`] asks the traversal which tiles need
//! content and which no longer do. Every content URL gets at most one
//! [`LoadSlot`] at a time, created synchronously before any await so two
//! selections of the same URL can never race. Loads run as local tasks and
//! wait for their content ancestor to finish before attaching beneath it.
//!
//! Waits are push-based: every status change calls `notify_waiters` on one
//! shared [`Notify`], and waiters re-check their condition. The configured
//! retry interval only bounds how long a waiter sleeps between checks.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use glam::{DQuat, DVec3};
use tilestream_coords::relative_pose;
use tokio::sync::{Notify, Semaphore};
use web_time::Instant;

use crate::config::StreamingConfig;
use crate::content_node::ContentNode;
use crate::decoder::{DecoderRegistry, extension_of};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::origin::OriginManager;
use crate::scene::Scene;
use crate::tileset::{Refinement, TileId, Tileset};
use crate::traversal::{CameraParams, CameraState, TilesetTraversal};

/// Handle to a loaded tileset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilesetId(u64);

impl TilesetId {
    /// The raw id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Lifecycle of one content URL's load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// Selected; waiting for its content ancestor or a load permit.
    Pending,
    /// Fetching or decoding.
    Loading,
    /// Content attached and positioned.
    Loaded,
    /// Removed from the load map; disposal follows once the load settles.
    Unloading,
}

/// Absolute ECEF placement of a node's content frame.
type Frame = (DVec3, DQuat);

struct LoadSlot {
    url: String,
    tileset: TilesetId,
    tile: TileId,
    status: Cell<LoadStatus>,
    node: RefCell<Option<Rc<ContentNode>>>,
    frame: Cell<Option<Frame>>,
    settled: Cell<bool>,
}

impl LoadSlot {
    fn is_unloading(&self) -> bool {
        self.status.get() == LoadStatus::Unloading
    }

    fn cancelled(&self) -> Error {
        Error::Cancelled {
            url: self.url.clone(),
        }
    }
}

struct TilesetEntry {
    tileset: Rc<Tileset>,
    root: Rc<ContentNode>,
    groups: HashMap<TileId, Rc<ContentNode>>,
}

struct Inner {
    scene: Rc<dyn Scene>,
    origin: Rc<OriginManager>,
    fetcher: Rc<dyn Fetcher>,
    decoders: DecoderRegistry,
    traversal: RefCell<Box<dyn TilesetTraversal>>,
    config: StreamingConfig,
    tilesets: RefCell<BTreeMap<TilesetId, TilesetEntry>>,
    loads: RefCell<HashMap<String, Rc<LoadSlot>>>,
    events: Notify,
    limiter: Option<Semaphore>,
    pending_unloads: Cell<usize>,
    next_id: Cell<u64>,
}

/// Streams tile content into a [`Scene`] as the camera moves.
///
/// Cheap to clone; clones share state. Must be driven from inside a tokio
/// [`LocalSet`](tokio::task::LocalSet), since loads are spawned with
/// `spawn_local`.
#[derive(Clone)]
pub struct TileStreamer {
    inner: Rc<Inner>,
}

impl TileStreamer {
    /// Create a streamer.
    #[must_use]
    pub fn new(
        scene: Rc<dyn Scene>,
        origin: Rc<OriginManager>,
        fetcher: Rc<dyn Fetcher>,
        decoders: DecoderRegistry,
        traversal: Box<dyn TilesetTraversal>,
        config: StreamingConfig,
    ) -> Self {
        let limiter = config.max_concurrent_loads.map(Semaphore::new);
        Self {
            inner: Rc::new(Inner {
                scene,
                origin,
                fetcher,
                decoders,
                traversal: RefCell::new(traversal),
                config,
                tilesets: RefCell::new(BTreeMap::new()),
                loads: RefCell::new(HashMap::new()),
                events: Notify::new(),
                limiter,
                pending_unloads: Cell::new(0),
                next_id: Cell::new(0),
            }),
        }
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &StreamingConfig {
        &self.inner.config
    }

    /// The origin manager every content node follows.
    #[must_use]
    pub fn origin(&self) -> &Rc<OriginManager> {
        &self.inner.origin
    }

    /// Fetch and parse a tileset manifest, returning its id.
    ///
    /// No content is loaded until [`update`](Self::update) selects tiles.
    pub async fn load(&self, url: &str) -> Result<TilesetId> {
        let bytes = self.inner.fetcher.fetch(url).await?;
        let tileset = Tileset::from_json(url, &bytes)?;

        let id = TilesetId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        let root = ContentNode::new(
            Rc::clone(&self.inner.scene),
            Rc::clone(&self.inner.origin),
            &format!("tileset:{url}"),
        );

        tracing::info!("Loaded tileset '{}': {} tiles", url, tileset.len());

        self.inner.tilesets.borrow_mut().insert(
            id,
            TilesetEntry {
                tileset: Rc::new(tileset),
                root,
                groups: HashMap::new(),
            },
        );
        Ok(id)
    }

    /// Unload every tile of a tileset and dispose its nodes.
    ///
    /// Waits for in-flight loads to settle before disposing their nodes.
    /// Unloading an unknown or already unloaded tileset does nothing.
    pub async fn unload(&self, id: TilesetId) {
        let Some(entry) = self.inner.tilesets.borrow_mut().remove(&id) else {
            tracing::debug!("Tileset {:?} already unloaded", id);
            return;
        };

        let slots: Vec<Rc<LoadSlot>> = {
            let mut loads = self.inner.loads.borrow_mut();
            let urls: Vec<String> = loads
                .iter()
                .filter(|(_, slot)| slot.tileset == id)
                .map(|(url, _)| url.clone())
                .collect();
            urls.iter().filter_map(|url| loads.remove(url)).collect()
        };
        for slot in &slots {
            slot.status.set(LoadStatus::Unloading);
        }
        self.inner.events.notify_waiters();

        for slot in slots {
            self.inner.dispose_when_settled(&slot).await;
        }
        for group in entry.groups.values() {
            group.dispose();
        }
        entry.root.dispose();

        tracing::info!("Unloaded tileset '{}'", entry.tileset.url());
    }

    /// Run one frame of streaming for every tileset.
    ///
    /// Starts loads for newly selected tiles and unloads deselected ones.
    /// Never awaits; loads continue as local tasks.
    pub fn update(&self, camera: &CameraState) {
        let origin = Rc::clone(&self.inner.origin);
        let unproject = move |point: DVec3| origin.local_to_geodetic(point);
        let params = CameraParams {
            position: camera.position,
            direction: camera.direction,
            up: camera.up,
            frustum: camera.frustum,
            unproject: &unproject,
        };

        let tilesets: Vec<(TilesetId, Rc<Tileset>)> = self
            .inner
            .tilesets
            .borrow()
            .iter()
            .map(|(id, entry)| (*id, Rc::clone(&entry.tileset)))
            .collect();

        for (id, tileset) in tilesets {
            let result = self.inner.traversal.borrow_mut().update(&tileset, &params);
            for tile in result.load {
                self.request_tile(id, &tileset, tile);
            }
            for tile in result.unload {
                self.release_tile(id, &tileset, tile);
            }
        }
    }

    /// Move the origin to the camera once it strays past the configured
    /// recenter distance. Returns whether the origin moved.
    pub fn recenter_if_needed(&self, camera_local: DVec3) -> bool {
        let camera_ecef = self.inner.origin.to_ecef(camera_local);
        self.inner
            .origin
            .recenter_beyond(camera_ecef, self.inner.config.recenter_distance)
    }

    /// Load status of a content URL, if it has a live entry.
    #[must_use]
    pub fn status_of(&self, url: &str) -> Option<LoadStatus> {
        self.inner.status_of(url)
    }

    /// Content node of a URL's live entry, if it still has one.
    #[must_use]
    pub fn content_node(&self, url: &str) -> Option<Rc<ContentNode>> {
        self.inner
            .loads
            .borrow()
            .get(url)
            .and_then(|slot| slot.node.borrow().clone())
    }

    /// Root content node of a tileset.
    #[must_use]
    pub fn root_node(&self, id: TilesetId) -> Option<Rc<ContentNode>> {
        self.inner
            .tilesets
            .borrow()
            .get(&id)
            .map(|entry| Rc::clone(&entry.root))
    }

    /// Node standing in for a grouping tile, if one was created.
    #[must_use]
    pub fn group_node(&self, id: TilesetId, tile: TileId) -> Option<Rc<ContentNode>> {
        self.inner
            .tilesets
            .borrow()
            .get(&id)
            .and_then(|entry| entry.groups.get(&tile).cloned())
    }

    /// The parsed tileset behind an id.
    #[must_use]
    pub fn tileset(&self, id: TilesetId) -> Option<Rc<Tileset>> {
        self.inner
            .tilesets
            .borrow()
            .get(&id)
            .map(|entry| Rc::clone(&entry.tileset))
    }

    /// Ids of every loaded tileset.
    #[must_use]
    pub fn tileset_ids(&self) -> Vec<TilesetId> {
        self.inner.tilesets.borrow().keys().copied().collect()
    }

    /// Number of entries that finished loading.
    #[must_use]
    pub fn loaded_count(&self) -> usize {
        self.inner.count(|status| status == LoadStatus::Loaded)
    }

    /// Number of entries still pending or loading.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.inner
            .count(|status| matches!(status, LoadStatus::Pending | LoadStatus::Loading))
    }

    /// Resolves once no load is in flight and every unload has disposed
    /// its content.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.events.notified();
            if self.in_flight_count() == 0 && self.inner.pending_unloads.get() == 0 {
                return;
            }
            let _ = tokio::time::timeout(self.inner.retry_interval(), notified).await;
        }
    }

    fn request_tile(&self, id: TilesetId, tileset: &Rc<Tileset>, tile: TileId) {
        let Some(url) = tileset.tile(tile).content_url.clone() else {
            self.ensure_group_node(id, tileset, tile);
            for child in &tileset.tile(tile).children {
                self.request_tile(id, tileset, *child);
            }
            return;
        };

        let slot = {
            let mut loads = self.inner.loads.borrow_mut();
            if loads.contains_key(&url) {
                return;
            }
            // Placeholder stays at the scene root until the ancestor has loaded.
            let node = ContentNode::new(
                Rc::clone(&self.inner.scene),
                Rc::clone(&self.inner.origin),
                &url,
            );
            let slot = Rc::new(LoadSlot {
                url: url.clone(),
                tileset: id,
                tile,
                status: Cell::new(LoadStatus::Pending),
                node: RefCell::new(Some(node)),
                frame: Cell::new(None),
                settled: Cell::new(false),
            });
            loads.insert(url, Rc::clone(&slot));
            slot
        };

        tokio::task::spawn_local(run_load(
            Rc::clone(&self.inner),
            Rc::clone(tileset),
            slot,
        ));
    }

    fn ensure_group_node(&self, id: TilesetId, tileset: &Tileset, tile: TileId) {
        let exists = self
            .inner
            .tilesets
            .borrow()
            .get(&id)
            .is_none_or(|entry| entry.groups.contains_key(&tile));
        if exists {
            return;
        }
        let Some(parent) = self.inner.nearest_node(id, tileset, tile) else {
            return;
        };

        let node = ContentNode::new(
            Rc::clone(&self.inner.scene),
            Rc::clone(&self.inner.origin),
            &format!("group:{}", tile.0),
        );
        node.set_parent(Some(parent.as_ref()));
        if let Some(entry) = self.inner.tilesets.borrow_mut().get_mut(&id) {
            entry.groups.insert(tile, node);
        }
    }

    fn release_tile(&self, id: TilesetId, tileset: &Tileset, tile: TileId) {
        match tileset.tile(tile).content_url.as_deref() {
            Some(url) => self.release_content(id, tileset, tile, url),
            None => {
                // Grouping tiles take their whole subtree with them.
                for descendant in tileset.descendants(tile) {
                    match tileset.tile(descendant).content_url.as_deref() {
                        Some(url) => self.release_content(id, tileset, descendant, url),
                        None => self.inner.dispose_group(id, descendant),
                    }
                }
                self.inner.dispose_group(id, tile);
            }
        }
    }

    fn release_content(&self, id: TilesetId, tileset: &Tileset, tile: TileId, url: &str) {
        let Some(slot) = self.inner.loads.borrow_mut().remove(url) else {
            return;
        };
        slot.status.set(LoadStatus::Unloading);
        self.inner.events.notify_waiters();

        // Loaded content below keeps its ECEF placement under the next node up.
        if let Some((parent, parent_frame)) = self.inner.content_parent(id, tileset, tile) {
            self.inner.adopt_subtree(id, tileset, tile, &parent, parent_frame);
        }

        // A replaced ancestor must cover the gap this tile leaves.
        if let Some(ancestor) = tileset.content_ancestor(tile) {
            self.inner.refresh_replacement(tileset, ancestor);
        }

        self.inner.pending_unloads.set(self.inner.pending_unloads.get() + 1);
        let inner = Rc::clone(&self.inner);
        tokio::task::spawn_local(async move {
            inner.dispose_when_settled(&slot).await;
            inner.pending_unloads.set(inner.pending_unloads.get() - 1);
            inner.events.notify_waiters();
        });
    }
}

impl std::fmt::Debug for TileStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStreamer")
            .field("tilesets", &self.tileset_ids())
            .field("loaded", &self.loaded_count())
            .field("in_flight", &self.in_flight_count())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.config.load_retry_interval_ms)
    }

    fn status_of(&self, url: &str) -> Option<LoadStatus> {
        self.loads.borrow().get(url).map(|slot| slot.status.get())
    }

    fn count(&self, predicate: impl Fn(LoadStatus) -> bool) -> usize {
        self.loads
            .borrow()
            .values()
            .filter(|slot| predicate(slot.status.get()))
            .count()
    }

    /// Node of a URL whose content has finished loading.
    fn loaded_node(&self, url: &str) -> Option<Rc<ContentNode>> {
        let loads = self.loads.borrow();
        let slot = loads.get(url)?;
        if slot.status.get() != LoadStatus::Loaded {
            return None;
        }
        slot.node.borrow().clone()
    }

    fn is_current(&self, slot: &Rc<LoadSlot>) -> bool {
        self.loads
            .borrow()
            .get(&slot.url)
            .is_some_and(|current| Rc::ptr_eq(current, slot))
    }

    /// Drop a failed entry so a later update can retry it.
    fn forget(&self, slot: &Rc<LoadSlot>) {
        if self.is_current(slot) {
            self.loads.borrow_mut().remove(&slot.url);
        }
    }

    /// Nearest ancestor node of `tile`, falling back to the tileset root.
    fn nearest_node(
        &self,
        id: TilesetId,
        tileset: &Tileset,
        tile: TileId,
    ) -> Option<Rc<ContentNode>> {
        let tilesets = self.tilesets.borrow();
        let entry = tilesets.get(&id)?;
        let loads = self.loads.borrow();

        let mut current = tileset.tile(tile).parent;
        while let Some(ancestor) = current.map(|t| tileset.tile(t)) {
            let node = match &ancestor.content_url {
                Some(url) => loads
                    .get(url)
                    .filter(|slot| slot.tileset == id)
                    .and_then(|slot| slot.node.borrow().clone()),
                None => entry.groups.get(&ancestor.id).cloned(),
            };
            if node.is_some() {
                return node;
            }
            current = ancestor.parent;
        }
        Some(Rc::clone(&entry.root))
    }

    /// Node and frame that content of `tile` attaches to: the nearest
    /// loaded content ancestor with a node, or the tileset root.
    fn content_parent(
        &self,
        id: TilesetId,
        tileset: &Tileset,
        tile: TileId,
    ) -> Option<(Rc<ContentNode>, Option<Frame>)> {
        let mut current = tileset.content_ancestor(tile);
        while let Some(ancestor) = current {
            let found = tileset
                .tile(ancestor)
                .content_url
                .as_deref()
                .and_then(|url| self.loaded_entry(id, url));
            if found.is_some() {
                return found;
            }
            current = tileset.content_ancestor(ancestor);
        }
        self.tilesets
            .borrow()
            .get(&id)
            .map(|entry| (Rc::clone(&entry.root), None))
    }

    fn loaded_entry(&self, id: TilesetId, url: &str) -> Option<(Rc<ContentNode>, Option<Frame>)> {
        let loads = self.loads.borrow();
        let slot = loads
            .get(url)
            .filter(|slot| slot.tileset == id && slot.status.get() == LoadStatus::Loaded)?;
        let node = slot.node.borrow().clone()?;
        Some((node, slot.frame.get()))
    }

    /// Move the nearest loaded content below `tile`, and the group nodes on
    /// the way, under `parent` without changing where they sit in ECEF.
    fn adopt_subtree(
        &self,
        id: TilesetId,
        tileset: &Tileset,
        tile: TileId,
        parent: &ContentNode,
        parent_frame: Option<Frame>,
    ) {
        let mut stack: Vec<(TileId, bool)> = tileset
            .tile(tile)
            .children
            .iter()
            .map(|child| (*child, true))
            .collect();
        while let Some((current, reparent_groups)) = stack.pop() {
            let child = tileset.tile(current);
            let mut below = reparent_groups;
            match child.content_url.as_deref() {
                Some(url) => {
                    if let Some((node, frame)) = self.loaded_entry(id, url) {
                        place_node(&node, frame, parent, parent_frame);
                        continue;
                    }
                }
                None if reparent_groups => {
                    let group = self
                        .tilesets
                        .borrow()
                        .get(&id)
                        .and_then(|entry| entry.groups.get(&current).cloned());
                    if let Some(group) = group {
                        group.set_parent(Some(parent));
                        below = false;
                    }
                }
                None => {}
            }
            stack.extend(child.children.iter().map(|c| (*c, below)));
        }
    }

    /// Hide a REPLACE tile once the nearest content below each of its
    /// children has loaded, and show it again otherwise. Leaves stay visible.
    fn refresh_replacement(&self, tileset: &Tileset, tile: TileId) {
        let replaced = tileset.tile(tile);
        if replaced.refine != Refinement::Replace {
            return;
        }
        let Some(url) = replaced.content_url.as_deref() else {
            return;
        };
        let Some(node) = self.loaded_node(url) else {
            return;
        };

        let mut frontier = replaced
            .children
            .iter()
            .flat_map(|child| tileset.content_frontier(*child))
            .filter_map(|t| tileset.tile(t).content_url.as_deref())
            .peekable();
        let covered = frontier.peek().is_some()
            && frontier.all(|u| self.status_of(u) == Some(LoadStatus::Loaded));

        if covered == node.is_visible() {
            if covered {
                tracing::debug!("Children of '{}' loaded, hiding it", url);
            }
            node.set_visible(!covered);
        }
    }

    fn dispose_group(&self, id: TilesetId, tile: TileId) {
        let node = self
            .tilesets
            .borrow_mut()
            .get_mut(&id)
            .and_then(|entry| entry.groups.remove(&tile));
        if let Some(node) = node {
            node.dispose();
        }
    }

    async fn dispose_when_settled(&self, slot: &LoadSlot) {
        loop {
            let notified = self.events.notified();
            if slot.settled.get() {
                break;
            }
            let _ = tokio::time::timeout(self.retry_interval(), notified).await;
        }
        let node = slot.node.borrow_mut().take();
        if let Some(node) = node {
            node.dispose();
        }
        tracing::debug!("Unloaded tile '{}'", slot.url);
    }
}

async fn run_load(inner: Rc<Inner>, tileset: Rc<Tileset>, slot: Rc<LoadSlot>) {
    let started = Instant::now();
    let result = load_content(&inner, &tileset, &slot).await;
    slot.settled.set(true);

    match result {
        Ok(()) => {
            tracing::debug!(
                "Loaded tile '{}' in {:.1}ms",
                slot.url,
                started.elapsed().as_secs_f64() * 1000.0
            );
            // Children that outlived an earlier load of this tile come back under it.
            let node = slot.node.borrow().clone();
            if let Some(node) = node {
                inner.adopt_subtree(slot.tileset, &tileset, slot.tile, &node, slot.frame.get());
            }
            inner.refresh_replacement(&tileset, slot.tile);
            if let Some(ancestor) = tileset.content_ancestor(slot.tile) {
                inner.refresh_replacement(&tileset, ancestor);
            }
            inner.events.notify_waiters();
        }
        Err(Error::Cancelled { .. }) => {
            tracing::debug!("Load of '{}' abandoned by unload", slot.url);
            inner.events.notify_waiters();
        }
        Err(e) => {
            tracing::warn!("Failed to load tile '{}': {}", slot.url, e);
            let node = slot.node.borrow_mut().take();
            if let Some(node) = node {
                node.dispose();
            }
            inner.forget(&slot);
            inner.events.notify_waiters();
        }
    }
}

async fn load_content(inner: &Inner, tileset: &Tileset, slot: &LoadSlot) -> Result<()> {
    if slot.is_unloading() {
        return Err(slot.cancelled());
    }

    let Some(decoder) = inner.decoders.decoder_for(&slot.url) else {
        let error = Error::UnsupportedContent {
            url: slot.url.clone(),
            extension: extension_of(&slot.url),
        };
        tracing::warn!("Skipping tile: {}", error);
        let node = slot.node.borrow_mut().take();
        if let Some(node) = node {
            node.dispose();
        }
        slot.status.set(LoadStatus::Loaded);
        return Ok(());
    };

    wait_for_ancestor(inner, tileset, slot).await?;

    let _permit = match &inner.limiter {
        Some(limiter) => Some(limiter.acquire().await.map_err(|_| slot.cancelled())?),
        None => None,
    };
    if slot.is_unloading() {
        return Err(slot.cancelled());
    }

    slot.status.set(LoadStatus::Loading);
    let bytes = inner.fetcher.fetch(&slot.url).await?;
    if slot.is_unloading() {
        return Err(slot.cancelled());
    }

    let decoded = decoder.decode(bytes, &slot.url, &inner.scene).await?;

    // The ancestor may have unloaded while this tile was decoding, so the
    // parent is resolved only now.
    let node = slot.node.borrow().clone();
    let target = inner.content_parent(slot.tileset, tileset, slot.tile);
    let (Some(node), Some((parent, parent_frame))) =
        (node.filter(|_| !slot.is_unloading()), target)
    else {
        for primitive in decoded.primitives {
            inner.scene.dispose(primitive);
        }
        return Err(slot.cancelled());
    };
    node.attach(decoded.primitives);

    // Content anchored in ECEF carries its own frame; anything else lives in
    // its parent's frame.
    let (translation, rotation) = tileset.world_placement(slot.tile);
    let own_frame = decoded
        .anchor_ecef
        .or((translation != DVec3::ZERO).then_some(translation))
        .map(|anchor| (anchor, rotation));

    place_node(&node, own_frame, &parent, parent_frame);
    slot.frame.set(own_frame.or(parent_frame));
    slot.status.set(LoadStatus::Loaded);
    Ok(())
}

/// Parent `node` under `parent` so content in `frame` lands at its ECEF
/// placement. Content without a frame shares its parent's.
fn place_node(
    node: &ContentNode,
    frame: Option<Frame>,
    parent: &ContentNode,
    parent_frame: Option<Frame>,
) {
    node.set_parent(Some(parent));
    match (frame, parent_frame) {
        (Some((anchor, orientation)), Some((parent_anchor, parent_orientation))) => {
            node.set_local_pose(relative_pose(
                anchor,
                orientation,
                parent_anchor,
                parent_orientation,
            ));
        }
        (Some((anchor, orientation)), None) => {
            node.set_orientation_ecef(orientation);
            node.set_origin_ecef(Some(anchor));
        }
        (None, _) => node.set_origin_ecef(None),
    }
}

/// Wait until the nearest content ancestor has loaded or has no live entry.
async fn wait_for_ancestor(inner: &Inner, tileset: &Tileset, slot: &LoadSlot) -> Result<()> {
    let Some(ancestor_url) = tileset
        .content_ancestor(slot.tile)
        .and_then(|t| tileset.tile(t).content_url.as_deref())
    else {
        return Ok(());
    };

    loop {
        let notified = inner.events.notified();
        if slot.is_unloading() {
            return Err(slot.cancelled());
        }

        match inner.status_of(ancestor_url) {
            None => {
                tracing::debug!(
                    "Tile '{}' has no live ancestor '{}'",
                    slot.url,
                    ancestor_url
                );
                return Ok(());
            }
            Some(LoadStatus::Loaded) => return Ok(()),
            Some(_) => {}
        }

        let _ = tokio::time::timeout(inner.retry_interval(), notified).await;
    }
}
