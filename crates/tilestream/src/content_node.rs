//! Scene nodes that keep themselves positioned against the floating origin.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use glam::{DQuat, DVec3};
use tilestream_coords::{LocalPose, ecef_rotation_to_engine, ecef_to_enu};

use crate::origin::{OriginListener, OriginManager};
use crate::scene::{NodeId, Scene};

/// A renderer node holding one tile's content.
///
/// A node is either *anchored*, with an absolute ECEF position that is
/// re-expressed against the origin every time it moves, or *unanchored*,
/// with a static pose relative to its parent. Nodes subscribe to the
/// [`OriginManager`] on construction and unsubscribe in [`dispose`](Self::dispose).
pub struct ContentNode {
    name: String,
    node: NodeId,
    scene: Rc<dyn Scene>,
    origin: Rc<OriginManager>,
    anchor: Cell<Option<DVec3>>,
    orientation: Cell<DQuat>,
    pose: Cell<LocalPose>,
    visible: Cell<bool>,
    primitives: RefCell<Vec<NodeId>>,
    disposed: Cell<bool>,
    origin_updates: Cell<u64>,
    self_weak: Weak<ContentNode>,
}

impl ContentNode {
    /// Create an empty, unanchored node at the scene root.
    pub fn new(scene: Rc<dyn Scene>, origin: Rc<OriginManager>, name: &str) -> Rc<Self> {
        let node = scene.create_node(name);
        let content = Rc::new_cyclic(|self_weak| Self {
            name: name.to_string(),
            node,
            scene,
            origin,
            anchor: Cell::new(None),
            orientation: Cell::new(DQuat::IDENTITY),
            pose: Cell::new(LocalPose::IDENTITY),
            visible: Cell::new(true),
            primitives: RefCell::new(Vec::new()),
            disposed: Cell::new(false),
            origin_updates: Cell::new(0),
            self_weak: self_weak.clone(),
        });

        let listener: Rc<dyn OriginListener> = content.clone();
        content.origin.subscribe(&listener);
        content
    }

    /// Debug name, usually the content URL.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The renderer node backing this content.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Absolute ECEF anchor, if the node has one.
    #[must_use]
    pub fn origin_ecef(&self) -> Option<DVec3> {
        self.anchor.get()
    }

    /// Orientation of the content's axes in ECEF.
    #[must_use]
    pub fn orientation_ecef(&self) -> DQuat {
        self.orientation.get()
    }

    /// Pose last applied to the renderer node.
    #[must_use]
    pub fn local_pose(&self) -> LocalPose {
        self.pose.get()
    }

    /// Anchor the node at an ECEF position, or clear the anchor with `None`.
    ///
    /// An anchored node is immediately re-posed against the current origin.
    /// Clearing the anchor resets the node to the identity pose, for content
    /// that already lives in the scene's native frame.
    pub fn set_origin_ecef(&self, anchor: Option<DVec3>) {
        if self.disposed.get() {
            return;
        }
        self.anchor.set(anchor);
        match anchor {
            Some(_) => self.reproject(),
            None => self.apply_pose(LocalPose::IDENTITY),
        }
    }

    /// Set the orientation of ECEF-axis content. Takes effect on anchored nodes.
    pub fn set_orientation_ecef(&self, orientation: DQuat) {
        if self.disposed.get() {
            return;
        }
        self.orientation.set(orientation.normalize());
        if self.anchor.get().is_some() {
            self.reproject();
        }
    }

    /// Give the node a fixed pose relative to its parent, dropping any anchor.
    pub fn set_local_pose(&self, pose: LocalPose) {
        if self.disposed.get() {
            return;
        }
        self.anchor.set(None);
        self.apply_pose(pose);
    }

    /// Reparent under another content node, or the scene root with `None`.
    pub fn set_parent(&self, parent: Option<&ContentNode>) {
        if self.disposed.get() {
            return;
        }
        self.scene.set_parent(self.node, parent.map(ContentNode::node_id));
    }

    /// Show or hide this node's own primitives. Child content nodes are unaffected.
    pub fn set_visible(&self, visible: bool) {
        if self.disposed.get() || self.visible.get() == visible {
            return;
        }
        self.visible.set(visible);
        self.scene.set_visible(self.node, visible);
        for primitive in self.primitives.borrow().iter() {
            self.scene.set_visible(*primitive, visible);
        }
    }

    /// Whether the node's own primitives are shown.
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    /// Parent decoded renderer primitives beneath this node. The node takes
    /// ownership and disposes them with itself.
    pub fn attach(&self, primitives: Vec<NodeId>) {
        if self.disposed.get() {
            for primitive in primitives {
                self.scene.dispose(primitive);
            }
            return;
        }
        let visible = self.visible.get();
        for primitive in &primitives {
            self.scene.set_parent(*primitive, Some(self.node));
            if !visible {
                self.scene.set_visible(*primitive, false);
            }
        }
        self.primitives.borrow_mut().extend(primitives);
    }

    /// Number of attached primitives.
    #[must_use]
    pub fn primitive_count(&self) -> usize {
        self.primitives.borrow().len()
    }

    /// How many origin changes this node has reacted to.
    #[must_use]
    pub fn origin_updates(&self) -> u64 {
        self.origin_updates.get()
    }

    /// Whether [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Stop listening to the origin and release every renderer resource.
    /// Calling it again does nothing.
    pub fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        if let Some(this) = self.self_weak.upgrade() {
            let listener: Rc<dyn OriginListener> = this;
            self.origin.unsubscribe(&listener);
        }
        self.release();
    }

    fn release(&self) {
        for primitive in self.primitives.borrow_mut().drain(..) {
            self.scene.dispose(primitive);
        }
        self.scene.dispose(self.node);
    }

    fn reproject(&self) {
        let Some(anchor) = self.anchor.get() else {
            return;
        };
        let origin = self.origin.origin();
        let position = ecef_to_enu(anchor, origin).position;
        let rotation = ecef_rotation_to_engine(self.orientation.get(), origin);
        self.apply_pose(LocalPose::new(position, rotation));
    }

    fn apply_pose(&self, pose: LocalPose) {
        self.pose.set(pose);
        self.scene.set_pose(self.node, pose);
    }
}

impl OriginListener for ContentNode {
    fn after_origin_change(&self, _new: DVec3) {
        if self.disposed.get() {
            return;
        }
        self.origin_updates.set(self.origin_updates.get() + 1);
        self.reproject();
    }
}

impl Drop for ContentNode {
    fn drop(&mut self) {
        // The origin manager only holds a weak reference, which is now dead.
        if !self.disposed.replace(true) {
            self.release();
        }
    }
}

impl std::fmt::Debug for ContentNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentNode")
            .field("name", &self.name)
            .field("node", &self.node)
            .field("anchor", &self.anchor.get())
            .field("visible", &self.visible.get())
            .field("disposed", &self.disposed.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::MemoryScene;
    use tilestream_coords::{GeodeticPosition, geodetic_to_ecef};

    fn setup() -> (Rc<MemoryScene>, Rc<OriginManager>) {
        let origin = geodetic_to_ecef(GeodeticPosition::new(37.8, -122.4, 0.0));
        (Rc::new(MemoryScene::new()), Rc::new(OriginManager::new(origin)))
    }

    fn node(scene: &Rc<MemoryScene>, origin: &Rc<OriginManager>, name: &str) -> Rc<ContentNode> {
        let scene: Rc<dyn Scene> = scene.clone();
        ContentNode::new(scene, Rc::clone(origin), name)
    }

    #[test]
    fn test_subscribes_on_construction() {
        let (scene, origin) = setup();
        let _node = node(&scene, &origin, "tile");
        assert_eq!(origin.listener_count(), 1);
    }

    #[test]
    fn test_set_origin_ecef_poses_immediately() {
        let (scene, origin) = setup();
        let content = node(&scene, &origin, "tile");
        let anchor = origin.to_ecef(DVec3::new(10.0, 20.0, -30.0));

        content.set_origin_ecef(Some(anchor));

        let pose = content.local_pose();
        assert!((pose.position - DVec3::new(10.0, 20.0, -30.0)).length() < 1e-6);
        assert_eq!(scene.node(content.node_id()).unwrap().pose, pose);
    }

    #[test]
    fn test_clearing_anchor_resets_pose() {
        let (scene, origin) = setup();
        let content = node(&scene, &origin, "tile");
        content.set_origin_ecef(Some(origin.to_ecef(DVec3::X * 50.0)));
        content.set_origin_ecef(None);

        assert_eq!(content.local_pose(), LocalPose::IDENTITY);
        assert_eq!(content.origin_ecef(), None);
    }

    #[test]
    fn test_follows_origin_changes() {
        let (scene, origin) = setup();
        let content = node(&scene, &origin, "tile");
        let anchor = origin.to_ecef(DVec3::new(500.0, 0.0, 500.0));
        content.set_origin_ecef(Some(anchor));

        let new_origin = origin.to_ecef(DVec3::new(20_000.0, 0.0, 0.0));
        origin.change_origin(new_origin);

        let expected = ecef_to_enu(anchor, new_origin);
        assert_eq!(content.local_pose().position, expected.position);
        assert!(content.local_pose().rotation.dot(expected.rotation).abs() > 1.0 - 1e-12);
        assert_eq!(content.origin_updates(), 1);
    }

    #[test]
    fn test_unanchored_node_keeps_pose() {
        let (scene, origin) = setup();
        let content = node(&scene, &origin, "nested");
        let pose = LocalPose::new(DVec3::new(1.0, 2.0, 3.0), DQuat::from_rotation_y(0.5));
        content.set_local_pose(pose);

        origin.change_origin(origin.to_ecef(DVec3::X * 15_000.0));
        assert_eq!(content.local_pose(), pose);
    }

    #[test]
    fn test_disposed_node_receives_no_callbacks() {
        let (scene, origin) = setup();
        let content = node(&scene, &origin, "tile");
        content.set_origin_ecef(Some(origin.origin()));
        content.dispose();

        assert_eq!(origin.listener_count(), 0);
        origin.change_origin(origin.to_ecef(DVec3::X * 15_000.0));
        assert_eq!(content.origin_updates(), 0);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (scene, origin) = setup();
        let content = node(&scene, &origin, "tile");
        let primitive = scene.create_node("mesh");
        content.attach(vec![primitive]);

        content.dispose();
        content.dispose();

        assert_eq!(scene.dispose_count(content.node_id()), 1);
        assert_eq!(scene.dispose_count(primitive), 1);
    }

    #[test]
    fn test_drop_releases_resources() {
        let (scene, origin) = setup();
        let id = {
            let content = node(&scene, &origin, "tile");
            content.node_id()
        };
        assert_eq!(scene.dispose_count(id), 1);
        assert_eq!(origin.listener_count(), 0);
    }

    #[test]
    fn test_visibility_applies_to_own_primitives_only() {
        let (scene, origin) = setup();
        let parent = node(&scene, &origin, "parent");
        let child = node(&scene, &origin, "child");
        child.set_parent(Some(&parent));
        let primitive = scene.create_node("mesh");
        parent.attach(vec![primitive]);

        parent.set_visible(false);

        assert!(!scene.node(primitive).unwrap().visible);
        assert!(!scene.node(parent.node_id()).unwrap().visible);
        assert!(scene.node(child.node_id()).unwrap().visible);
        assert_eq!(scene.node(child.node_id()).unwrap().parent, Some(parent.node_id()));
    }

    #[test]
    fn test_attach_after_hide_stays_hidden() {
        let (scene, origin) = setup();
        let content = node(&scene, &origin, "tile");
        content.set_visible(false);
        let primitive = scene.create_node("mesh");
        content.attach(vec![primitive]);
        assert!(!scene.node(primitive).unwrap().visible);
    }
}
