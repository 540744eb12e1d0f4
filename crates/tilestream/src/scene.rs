//! Renderer-facing scene graph interface.
//!
//! The streaming engine never talks to a renderer directly. It creates,
//! parents, poses, hides and disposes opaque nodes through [`Scene`], and
//! asks it to build ground meshes from grids of points.
//!
//! # Implementations
//!
//! - [`MemoryScene`]: Headless scene that records every node and event

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use glam::DVec3;
use tilestream_coords::LocalPose;

use crate::LocalBoxFuture;

/// Opaque handle to a renderer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Create a handle from a renderer-specific raw id.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The renderer-specific raw id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Scene graph primitives consumed by the streaming engine.
///
/// All methods take `&self`; implementations use interior mutability and
/// are driven from a single thread.
pub trait Scene {
    /// Create an empty transform node at the scene root.
    fn create_node(&self, name: &str) -> NodeId;

    /// Reparent a node. `None` moves it back to the scene root.
    fn set_parent(&self, node: NodeId, parent: Option<NodeId>);

    /// Set a node's pose relative to its parent.
    fn set_pose(&self, node: NodeId, pose: LocalPose);

    /// Show or hide a node's own geometry. Visibility is not inherited.
    fn set_visible(&self, node: NodeId, visible: bool);

    /// Destroy a node and release its GPU resources.
    fn dispose(&self, node: NodeId);

    /// Build a triangulated mesh from a row-major `resolution × resolution`
    /// grid of engine-local points.
    fn create_grid_mesh(&self, name: &str, points: &[DVec3], resolution: usize) -> NodeId;

    /// Resolves once the renderer has presented another frame.
    fn next_frame(&self) -> LocalBoxFuture<'_, ()>;
}

/// Snapshot of a node held by a [`MemoryScene`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryNode {
    /// Debug name given at creation.
    pub name: String,
    /// Current parent, if any.
    pub parent: Option<NodeId>,
    /// Pose relative to the parent.
    pub pose: LocalPose,
    /// Whether the node's own geometry is shown.
    pub visible: bool,
    /// Grid points for mesh nodes.
    pub mesh: Option<Vec<DVec3>>,
    /// Whether the node has been disposed.
    pub disposed: bool,
}

/// Something that happened to a [`MemoryScene`], in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    /// A node was created.
    Created(NodeId),
    /// A node was reparented.
    Parented {
        /// The child.
        node: NodeId,
        /// The new parent.
        parent: Option<NodeId>,
    },
    /// A node's visibility changed.
    Visibility {
        /// The node.
        node: NodeId,
        /// The new visibility.
        visible: bool,
    },
    /// A node was disposed.
    Disposed(NodeId),
    /// A frame was presented.
    Frame(u64),
}

/// A headless scene that keeps every node in memory.
///
/// Disposed nodes stay inspectable; disposing twice is recorded rather than
/// ignored so callers can assert exactly-once disposal.
#[derive(Debug, Default)]
pub struct MemoryScene {
    inner: RefCell<MemorySceneInner>,
}

#[derive(Debug, Default)]
struct MemorySceneInner {
    next_id: u64,
    nodes: BTreeMap<NodeId, MemoryNode>,
    dispose_counts: HashMap<NodeId, usize>,
    events: Vec<SceneEvent>,
    frame: u64,
}

impl MemorySceneInner {
    fn insert(&mut self, name: &str, mesh: Option<Vec<DVec3>>) -> NodeId {
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.nodes.insert(
            id,
            MemoryNode {
                name: name.to_string(),
                parent: None,
                pose: LocalPose::IDENTITY,
                visible: true,
                mesh,
                disposed: false,
            },
        );
        self.events.push(SceneEvent::Created(id));
        id
    }

    fn live_mut(&mut self, node: NodeId, operation: &str) -> Option<&mut MemoryNode> {
        match self.nodes.get_mut(&node) {
            Some(n) if !n.disposed => Some(n),
            Some(_) => {
                tracing::warn!(?node, operation, "operation on disposed node");
                None
            }
            None => {
                tracing::warn!(?node, operation, "operation on unknown node");
                None
            }
        }
    }
}

impl MemoryScene {
    /// Create an empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a node, including disposed ones.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<MemoryNode> {
        self.inner.borrow().nodes.get(&id).cloned()
    }

    /// Whether a node exists and has not been disposed.
    #[must_use]
    pub fn is_live(&self, id: NodeId) -> bool {
        self.inner
            .borrow()
            .nodes
            .get(&id)
            .is_some_and(|n| !n.disposed)
    }

    /// How many times `dispose` was called for a node.
    #[must_use]
    pub fn dispose_count(&self, id: NodeId) -> usize {
        self.inner
            .borrow()
            .dispose_counts
            .get(&id)
            .copied()
            .unwrap_or(0)
    }

    /// Ids of all nodes that have not been disposed.
    #[must_use]
    pub fn live_nodes(&self) -> Vec<NodeId> {
        self.inner
            .borrow()
            .nodes
            .iter()
            .filter(|(_, n)| !n.disposed)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Live nodes whose parent is `parent`.
    #[must_use]
    pub fn children_of(&self, parent: NodeId) -> Vec<NodeId> {
        self.inner
            .borrow()
            .nodes
            .iter()
            .filter(|(_, n)| !n.disposed && n.parent == Some(parent))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Every event so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<SceneEvent> {
        self.inner.borrow().events.clone()
    }

    /// Number of frames presented.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.inner.borrow().frame
    }
}

impl Scene for MemoryScene {
    fn create_node(&self, name: &str) -> NodeId {
        self.inner.borrow_mut().insert(name, None)
    }

    fn set_parent(&self, node: NodeId, parent: Option<NodeId>) {
        let mut inner = self.inner.borrow_mut();
        if let Some(n) = inner.live_mut(node, "set_parent") {
            n.parent = parent;
            inner.events.push(SceneEvent::Parented { node, parent });
        }
    }

    fn set_pose(&self, node: NodeId, pose: LocalPose) {
        if let Some(n) = self.inner.borrow_mut().live_mut(node, "set_pose") {
            n.pose = pose;
        }
    }

    fn set_visible(&self, node: NodeId, visible: bool) {
        let mut inner = self.inner.borrow_mut();
        if let Some(n) = inner.live_mut(node, "set_visible") {
            if n.visible == visible {
                return;
            }
            n.visible = visible;
            inner.events.push(SceneEvent::Visibility { node, visible });
        }
    }

    fn dispose(&self, node: NodeId) {
        let mut inner = self.inner.borrow_mut();
        *inner.dispose_counts.entry(node).or_default() += 1;
        if let Some(n) = inner.nodes.get_mut(&node) {
            n.disposed = true;
        }
        // Children fall back to the scene root, as in most engines.
        for n in inner.nodes.values_mut() {
            if n.parent == Some(node) {
                n.parent = None;
            }
        }
        inner.events.push(SceneEvent::Disposed(node));
    }

    fn create_grid_mesh(&self, name: &str, points: &[DVec3], resolution: usize) -> NodeId {
        debug_assert_eq!(points.len(), resolution * resolution);
        self.inner.borrow_mut().insert(name, Some(points.to_vec()))
    }

    fn next_frame(&self) -> LocalBoxFuture<'_, ()> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            let mut inner = self.inner.borrow_mut();
            inner.frame += 1;
            let frame = inner.frame;
            inner.events.push(SceneEvent::Frame(frame));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DQuat;

    #[test]
    fn test_create_and_parent() {
        let scene = MemoryScene::new();
        let parent = scene.create_node("parent");
        let child = scene.create_node("child");
        scene.set_parent(child, Some(parent));

        assert_eq!(scene.node(child).unwrap().parent, Some(parent));
        assert_eq!(scene.children_of(parent), vec![child]);
        assert_eq!(scene.live_nodes().len(), 2);
    }

    #[test]
    fn test_dispose_is_counted() {
        let scene = MemoryScene::new();
        let node = scene.create_node("node");
        scene.dispose(node);
        assert!(!scene.is_live(node));
        assert_eq!(scene.dispose_count(node), 1);

        scene.dispose(node);
        assert_eq!(scene.dispose_count(node), 2);
    }

    #[test]
    fn test_dispose_orphans_children() {
        let scene = MemoryScene::new();
        let parent = scene.create_node("parent");
        let child = scene.create_node("child");
        scene.set_parent(child, Some(parent));
        scene.dispose(parent);
        assert_eq!(scene.node(child).unwrap().parent, None);
        assert!(scene.is_live(child));
    }

    #[test]
    fn test_disposed_nodes_ignore_updates() {
        let scene = MemoryScene::new();
        let node = scene.create_node("node");
        scene.dispose(node);
        scene.set_pose(node, LocalPose::new(DVec3::ONE, DQuat::IDENTITY));
        assert_eq!(scene.node(node).unwrap().pose, LocalPose::IDENTITY);
    }

    #[test]
    fn test_visibility_events_only_on_change() {
        let scene = MemoryScene::new();
        let node = scene.create_node("node");
        scene.set_visible(node, true);
        scene.set_visible(node, false);
        scene.set_visible(node, false);

        let toggles = scene
            .events()
            .into_iter()
            .filter(|e| matches!(e, SceneEvent::Visibility { .. }))
            .count();
        assert_eq!(toggles, 1);
    }

    #[tokio::test]
    async fn test_next_frame_advances() {
        let scene = MemoryScene::new();
        scene.next_frame().await;
        scene.next_frame().await;
        assert_eq!(scene.frame(), 2);
    }
}
