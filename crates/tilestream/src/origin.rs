//! Floating origin for rendering planet-scale scenes with small local coordinates.
//!
//! Earth coordinates are millions of meters, which loses precision once they
//! reach the renderer. Every positioned object stores its ECEF anchor and
//! asks the [`OriginManager`] for the current origin to derive its local pose.
//! When the origin moves, listeners are told twice: once before the change,
//! while the old origin is still authoritative, and once after.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use glam::DVec3;
use tilestream_coords::{GeodeticPosition, LocalPose, ecef_to_enu, enu_to_ecef, local_to_geodetic};

use crate::config::DEFAULT_RECENTER_DISTANCE;

/// Receives origin change notifications.
///
/// Both callbacks run synchronously inside [`OriginManager::change_origin`].
/// Calling `change_origin` from either of them panics.
pub trait OriginListener {
    /// Called while `old` is still the authoritative origin.
    fn before_origin_change(&self, old: DVec3) {
        let _ = old;
    }

    /// Called once `new` has replaced the previous origin.
    fn after_origin_change(&self, new: DVec3) {
        let _ = new;
    }
}

/// Whether an origin change is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginState {
    /// No notification is running.
    Stable,
    /// Listeners are being notified.
    Changing,
}

/// Owner of the scene's ECEF origin.
///
/// Shared as `Rc<OriginManager>`; [`change_origin`](Self::change_origin) is
/// the only mutator. Listeners are held weakly and form a set keyed by
/// allocation, so subscribing the same listener twice is a no-op.
pub struct OriginManager {
    origin: Cell<DVec3>,
    state: Cell<OriginState>,
    listeners: RefCell<Vec<Weak<dyn OriginListener>>>,
    recenter_distance: f64,
}

impl OriginManager {
    /// Create a manager with the given initial origin in ECEF meters.
    #[must_use]
    pub fn new(origin: DVec3) -> Self {
        Self {
            origin: Cell::new(origin),
            state: Cell::new(OriginState::Stable),
            listeners: RefCell::new(Vec::new()),
            recenter_distance: DEFAULT_RECENTER_DISTANCE,
        }
    }

    /// Create a manager whose initial origin sits at a geodetic position.
    #[must_use]
    pub fn at_geodetic(position: GeodeticPosition) -> Self {
        Self::new(tilestream_coords::geodetic_to_ecef(position))
    }

    /// Override the distance used by [`recenter_if_needed`](Self::recenter_if_needed).
    #[must_use]
    pub fn with_recenter_distance(mut self, meters: f64) -> Self {
        self.recenter_distance = meters;
        self
    }

    /// The current origin in ECEF meters.
    #[must_use]
    pub fn origin(&self) -> DVec3 {
        self.origin.get()
    }

    /// Whether a change notification is running.
    #[must_use]
    pub fn state(&self) -> OriginState {
        self.state.get()
    }

    /// Distance past which [`recenter_if_needed`](Self::recenter_if_needed) moves the origin.
    #[must_use]
    pub fn recenter_distance(&self) -> f64 {
        self.recenter_distance
    }

    /// Register a listener. Returns `false` if it was already registered.
    pub fn subscribe(&self, listener: &Rc<dyn OriginListener>) -> bool {
        let weak = Rc::downgrade(listener);
        let mut listeners = self.listeners.borrow_mut();
        listeners.retain(|l| l.strong_count() > 0);
        if listeners.iter().any(|l| Weak::ptr_eq(l, &weak)) {
            return false;
        }
        listeners.push(weak);
        true
    }

    /// Remove a listener. Returns `false` if it was not registered.
    ///
    /// Safe to call from inside a notification; the running notification
    /// still completes with the listener set it started with.
    pub fn unsubscribe(&self, listener: &Rc<dyn OriginListener>) -> bool {
        let weak = Rc::downgrade(listener);
        let mut removed = false;
        self.listeners.borrow_mut().retain(|l| {
            if Weak::ptr_eq(l, &weak) {
                removed = true;
                false
            } else {
                l.strong_count() > 0
            }
        });
        removed
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|l| l.strong_count() > 0)
            .count()
    }

    /// Move the origin, notifying every listener before and after the change.
    ///
    /// # Panics
    ///
    /// Panics if called from inside another origin notification, or if
    /// `new_origin` is not a finite position.
    pub fn change_origin(&self, new_origin: DVec3) {
        assert!(
            self.state.get() == OriginState::Stable,
            "change_origin called re-entrantly from an origin listener"
        );
        assert!(
            new_origin.is_finite(),
            "origin must be a finite ECEF position, got {new_origin}"
        );

        let _guard = ChangingGuard::enter(&self.state);

        // Snapshot so listeners may subscribe or unsubscribe while we iterate.
        let snapshot: Vec<Rc<dyn OriginListener>> = self
            .listeners
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        let old = self.origin.get();
        tracing::debug!(?old, new = ?new_origin, listeners = snapshot.len(), "changing origin");

        for listener in &snapshot {
            listener.before_origin_change(old);
        }
        self.origin.set(new_origin);
        for listener in &snapshot {
            listener.after_origin_change(new_origin);
        }
    }

    /// Move the origin to `camera_ecef` if it is farther than the recenter
    /// distance from the current origin. Returns whether the origin moved.
    ///
    /// The caller is responsible for re-expressing the camera's own local
    /// position afterwards.
    pub fn recenter_if_needed(&self, camera_ecef: DVec3) -> bool {
        self.recenter_beyond(camera_ecef, self.recenter_distance)
    }

    /// Like [`recenter_if_needed`](Self::recenter_if_needed) with an explicit threshold.
    pub fn recenter_beyond(&self, camera_ecef: DVec3, threshold: f64) -> bool {
        let distance = camera_ecef.distance(self.origin.get());
        if distance <= threshold {
            return false;
        }
        tracing::info!(distance, "recentering origin");
        self.change_origin(camera_ecef);
        true
    }

    /// Pose of an ECEF point relative to the current origin.
    #[must_use]
    pub fn local_pose_of(&self, ecef: DVec3) -> LocalPose {
        ecef_to_enu(ecef, self.origin.get())
    }

    /// Engine-local position of an ECEF point.
    #[must_use]
    pub fn to_local(&self, ecef: DVec3) -> DVec3 {
        self.local_pose_of(ecef).position
    }

    /// ECEF position of an engine-local point.
    #[must_use]
    pub fn to_ecef(&self, local: DVec3) -> DVec3 {
        enu_to_ecef(local, self.origin.get())
    }

    /// Geodetic position of an engine-local point.
    #[must_use]
    pub fn local_to_geodetic(&self, local: DVec3) -> GeodeticPosition {
        local_to_geodetic(local, self.origin.get())
    }
}

impl std::fmt::Debug for OriginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OriginManager")
            .field("origin", &self.origin.get())
            .field("state", &self.state.get())
            .field("listeners", &self.listener_count())
            .field("recenter_distance", &self.recenter_distance)
            .finish()
    }
}

/// Marks the manager as changing and restores `Stable` even if a listener panics.
struct ChangingGuard<'a> {
    state: &'a Cell<OriginState>,
}

impl<'a> ChangingGuard<'a> {
    fn enter(state: &'a Cell<OriginState>) -> Self {
        state.set(OriginState::Changing);
        Self { state }
    }
}

impl Drop for ChangingGuard<'_> {
    fn drop(&mut self) {
        self.state.set(OriginState::Stable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilestream_coords::geodetic_to_ecef;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Phase {
        Before,
        After,
    }

    /// Records every callback along with what the manager reported at that moment.
    struct Recorder {
        manager: Weak<OriginManager>,
        seen: RefCell<Vec<(Phase, DVec3, DVec3, OriginState)>>,
    }

    impl Recorder {
        fn new(manager: &Rc<OriginManager>) -> Rc<Self> {
            Rc::new(Self {
                manager: Rc::downgrade(manager),
                seen: RefCell::new(Vec::new()),
            })
        }

        fn record(&self, phase: Phase, value: DVec3) {
            let manager = self.manager.upgrade().unwrap();
            self.seen
                .borrow_mut()
                .push((phase, value, manager.origin(), manager.state()));
        }
    }

    impl OriginListener for Recorder {
        fn before_origin_change(&self, old: DVec3) {
            self.record(Phase::Before, old);
        }

        fn after_origin_change(&self, new: DVec3) {
            self.record(Phase::After, new);
        }
    }

    fn origin_at(lat: f64, lon: f64) -> DVec3 {
        geodetic_to_ecef(GeodeticPosition::new(lat, lon, 0.0))
    }

    #[test]
    fn test_before_and_after_see_consistent_origin() {
        let a = origin_at(0.0, 0.0);
        let b = origin_at(1.0, 1.0);
        let manager = Rc::new(OriginManager::new(a));
        let recorder = Recorder::new(&manager);
        let listener: Rc<dyn OriginListener> = recorder.clone();
        assert!(manager.subscribe(&listener));

        manager.change_origin(b);

        let seen = recorder.seen.borrow();
        assert_eq!(
            *seen,
            vec![
                (Phase::Before, a, a, OriginState::Changing),
                (Phase::After, b, b, OriginState::Changing),
            ]
        );
        assert_eq!(manager.state(), OriginState::Stable);
    }

    #[test]
    fn test_two_back_to_back_changes() {
        let a = origin_at(0.0, 0.0);
        let b = origin_at(0.1, 0.0);
        let c = origin_at(0.2, 0.0);
        let manager = Rc::new(OriginManager::new(a));
        let first = Recorder::new(&manager);
        let second = Recorder::new(&manager);
        let first_listener: Rc<dyn OriginListener> = first.clone();
        let second_listener: Rc<dyn OriginListener> = second.clone();
        manager.subscribe(&first_listener);
        manager.subscribe(&second_listener);

        manager.change_origin(b);
        manager.change_origin(c);

        for recorder in [&first, &second] {
            let seen = recorder.seen.borrow();
            let afters: Vec<DVec3> = seen
                .iter()
                .filter(|(phase, ..)| *phase == Phase::After)
                .map(|(_, value, ..)| *value)
                .collect();
            assert_eq!(afters, vec![b, c]);
            // Every callback saw the value it was handed as the live origin.
            assert!(seen.iter().all(|(_, value, live, _)| value == live));
        }
    }

    #[test]
    fn test_duplicate_subscribe_is_noop() {
        let manager = Rc::new(OriginManager::new(origin_at(0.0, 0.0)));
        let recorder = Recorder::new(&manager);
        let listener: Rc<dyn OriginListener> = recorder.clone();
        assert!(manager.subscribe(&listener));
        assert!(!manager.subscribe(&listener));
        assert_eq!(manager.listener_count(), 1);

        manager.change_origin(origin_at(1.0, 0.0));
        assert_eq!(recorder.seen.borrow().len(), 2);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let manager = Rc::new(OriginManager::new(origin_at(0.0, 0.0)));
        let recorder = Recorder::new(&manager);
        let listener: Rc<dyn OriginListener> = recorder.clone();
        manager.subscribe(&listener);
        assert!(manager.unsubscribe(&listener));
        assert!(!manager.unsubscribe(&listener));

        manager.change_origin(origin_at(1.0, 0.0));
        assert!(recorder.seen.borrow().is_empty());
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let manager = Rc::new(OriginManager::new(origin_at(0.0, 0.0)));
        {
            let recorder = Recorder::new(&manager);
            let listener: Rc<dyn OriginListener> = recorder;
            manager.subscribe(&listener);
            assert_eq!(manager.listener_count(), 1);
        }
        assert_eq!(manager.listener_count(), 0);
        manager.change_origin(origin_at(1.0, 0.0));
    }

    /// Unsubscribes a victim from inside its own before-change callback.
    struct Unsubscriber {
        manager: Rc<OriginManager>,
        victim: RefCell<Option<Rc<dyn OriginListener>>>,
    }

    impl OriginListener for Unsubscriber {
        fn before_origin_change(&self, _old: DVec3) {
            if let Some(victim) = self.victim.borrow_mut().take() {
                self.manager.unsubscribe(&victim);
            }
        }
    }

    #[test]
    fn test_unsubscribe_mid_notification_applies_next_time() {
        let manager = Rc::new(OriginManager::new(origin_at(0.0, 0.0)));
        let victim = Recorder::new(&manager);
        let victim_listener: Rc<dyn OriginListener> = victim.clone();
        let unsubscriber: Rc<dyn OriginListener> = Rc::new(Unsubscriber {
            manager: Rc::clone(&manager),
            victim: RefCell::new(Some(Rc::clone(&victim_listener))),
        });
        manager.subscribe(&unsubscriber);
        manager.subscribe(&victim_listener);

        manager.change_origin(origin_at(1.0, 0.0));
        // The running notification still reached the victim.
        assert_eq!(victim.seen.borrow().len(), 2);

        manager.change_origin(origin_at(2.0, 0.0));
        assert_eq!(victim.seen.borrow().len(), 2);
    }

    struct Reentrant {
        manager: Rc<OriginManager>,
    }

    impl OriginListener for Reentrant {
        fn after_origin_change(&self, new: DVec3) {
            self.manager.change_origin(new + DVec3::X);
        }
    }

    #[test]
    #[should_panic(expected = "re-entrantly")]
    fn test_reentrant_change_panics() {
        let manager = Rc::new(OriginManager::new(origin_at(0.0, 0.0)));
        let listener: Rc<dyn OriginListener> = Rc::new(Reentrant {
            manager: Rc::clone(&manager),
        });
        manager.subscribe(&listener);
        manager.change_origin(origin_at(1.0, 0.0));
    }

    #[test]
    fn test_recenter_threshold() {
        let origin = origin_at(0.0, 0.0);
        let manager = OriginManager::new(origin).with_recenter_distance(10_000.0);

        let near = manager.to_ecef(DVec3::new(5_000.0, 0.0, 0.0));
        assert!(!manager.recenter_if_needed(near));
        assert_eq!(manager.origin(), origin);

        let far = manager.to_ecef(DVec3::new(12_000.0, 0.0, 0.0));
        assert!(manager.recenter_if_needed(far));
        assert_eq!(manager.origin(), far);
        assert!(manager.to_local(far).length() < 1e-9);
    }

    #[test]
    fn test_local_to_geodetic_at_origin() {
        let manager = OriginManager::at_geodetic(GeodeticPosition::new(47.0, 8.0, 400.0));
        let geo = manager.local_to_geodetic(DVec3::ZERO);
        assert!((geo.latitude - 47.0).abs() < 1e-9);
        assert!((geo.longitude - 8.0).abs() < 1e-9);
        assert!((geo.height - 400.0).abs() < 1e-6);
    }
}
