//! Concurrent registry of physics objects.
//!
//! Bodies are indexed by native id, by [`BodyUuid`], and by host entity. The
//! physics thread writes; the host thread may read concurrently through the
//! shared `Arc`. The active subset is maintained from backend activation
//! events instead of scanning every body each tick.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};

use dashmap::{DashMap, DashSet};
use rustc_hash::FxHashSet;
use tracing::{error, info};

use crate::backend::{ActivationEvent, BackendError, BodyId, ConstraintId, PhysicsBackend};
use crate::body::{BodyUuid, DisplaySettings, EntityId, PhysicsBody};

/// Outcome of [`ObjectManager::clear_all`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Bodies destroyed cleanly.
    pub destroyed: usize,
    /// Bodies whose teardown failed or panicked.
    pub failed: usize,
}

/// Registry of every body this world created.
#[derive(Default)]
pub struct ObjectManager {
    bodies: DashMap<BodyId, PhysicsBody>,
    by_uuid: DashMap<BodyUuid, BodyId>,
    by_entity: DashMap<EntityId, BodyId>,
    active: DashSet<BodyId>,
    constraints: DashMap<ConstraintId, (BodyId, BodyId)>,
}

impl ObjectManager {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `object` to every index. Returns its uuid.
    pub fn register(&self, object: PhysicsBody) -> BodyUuid {
        let uuid = object.uuid;
        self.by_uuid.insert(uuid, object.body);
        if let Some(entity) = object.entity {
            self.by_entity.insert(entity, object.body);
        }
        self.bodies.insert(object.body, object);
        uuid
    }

    /// Removes a body from every index. Does not touch the backend.
    pub fn unregister(&self, id: BodyId) -> Option<PhysicsBody> {
        let (_, object) = self.bodies.remove(&id)?;
        self.by_uuid.remove(&object.uuid);
        if let Some(entity) = object.entity {
            self.by_entity.remove_if(&entity, |_, body| *body == id);
        }
        self.active.remove(&id);
        for constraint in &object.constraints {
            self.constraints.remove(constraint);
        }
        Some(object)
    }

    /// Copy of the record for a native id.
    pub fn get(&self, id: BodyId) -> Option<PhysicsBody> {
        self.bodies.get(&id).map(|entry| entry.value().clone())
    }

    /// Returns `true` if `id` is registered.
    pub fn contains(&self, id: BodyId) -> bool {
        self.bodies.contains_key(&id)
    }

    /// Native id for a uuid.
    pub fn by_uuid(&self, uuid: BodyUuid) -> Option<BodyId> {
        self.by_uuid.get(&uuid).map(|entry| *entry)
    }

    /// Native id for a host entity.
    pub fn by_entity(&self, entity: EntityId) -> Option<BodyId> {
        self.by_entity.get(&entity).map(|entry| *entry)
    }

    /// Number of registered bodies.
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    /// Every registered native id.
    pub fn ids(&self) -> Vec<BodyId> {
        self.bodies.iter().map(|entry| *entry.key()).collect()
    }

    /// Registered bodies that are currently awake.
    pub fn active_ids(&self) -> Vec<BodyId> {
        self.active.iter().map(|id| *id).collect()
    }

    /// Returns `true` if the body is registered and awake.
    pub fn is_active(&self, id: BodyId) -> bool {
        self.active.contains(&id)
    }

    /// Bodies with a renderable attached.
    pub fn displayed(&self) -> Vec<(BodyId, DisplaySettings)> {
        self.bodies
            .iter()
            .filter_map(|entry| entry.display.map(|display| (*entry.key(), display)))
            .collect()
    }

    /// Replaces a body's display settings.
    pub fn set_display(&self, id: BodyId, display: Option<DisplaySettings>) -> bool {
        match self.bodies.get_mut(&id) {
            Some(mut entry) => {
                entry.display = display;
                true
            }
            None => false,
        }
    }

    /// Applies backend activation events to the active set.
    pub fn apply_activation_events(&self, events: &[ActivationEvent]) {
        for event in events {
            match *event {
                ActivationEvent::Activated(id) => {
                    if self.bodies.contains_key(&id) {
                        self.active.insert(id);
                    }
                }
                ActivationEvent::Deactivated(id) => {
                    self.active.remove(&id);
                }
            }
        }
    }

    /// Records a constraint between two registered bodies.
    pub fn link(&self, constraint: ConstraintId, a: BodyId, b: BodyId) {
        self.constraints.insert(constraint, (a, b));
        for id in [a, b] {
            if let Some(mut entry) = self.bodies.get_mut(&id) {
                entry.constraints.insert(constraint);
            }
        }
    }

    /// Forgets a constraint. Returns the bodies it joined.
    pub fn unlink(&self, constraint: ConstraintId) -> Option<(BodyId, BodyId)> {
        let (_, (a, b)) = self.constraints.remove(&constraint)?;
        for id in [a, b] {
            if let Some(mut entry) = self.bodies.get_mut(&id) {
                entry.constraints.remove(&constraint);
            }
        }
        Some((a, b))
    }

    /// Every body reachable from `start` through constraints, `start` first.
    pub fn connected_cluster(&self, start: BodyId) -> Vec<BodyId> {
        if !self.bodies.contains_key(&start) {
            return Vec::new();
        }
        let mut seen = FxHashSet::default();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([start]);
        seen.insert(start);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            let links: Vec<ConstraintId> = match self.bodies.get(&id) {
                Some(entry) => entry.constraints.iter().copied().collect(),
                None => continue,
            };
            for constraint in links {
                let Some(pair) = self.constraints.get(&constraint).map(|e| *e) else {
                    continue;
                };
                let other = if pair.0 == id { pair.1 } else { pair.0 };
                if seen.insert(other) {
                    queue.push_back(other);
                }
            }
        }
        order
    }

    /// Destroys one body: its constraints, the native body, then the record.
    pub fn destroy(&self, backend: &mut dyn PhysicsBackend, id: BodyId) -> Result<(), BackendError> {
        let constraints: Vec<ConstraintId> = self
            .bodies
            .get(&id)
            .map(|entry| entry.constraints.iter().copied().collect())
            .unwrap_or_default();
        for constraint in constraints {
            self.unlink(constraint);
            // The backend may already have dropped it with the other body.
            let _ = backend.destroy_constraint(constraint);
        }
        self.unregister(id);
        backend.destroy_body(id)
    }

    /// Destroys every registered body. A failure on one body is logged and
    /// does not stop the rest.
    pub fn clear_all(&self, backend: &mut dyn PhysicsBackend) -> ClearReport {
        let mut report = ClearReport::default();
        for id in self.ids() {
            let outcome = catch_unwind(AssertUnwindSafe(|| self.destroy(&mut *backend, id)));
            match outcome {
                Ok(Ok(())) => report.destroyed += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!(body = id.0, "failed to destroy body during clear: {e}");
                }
                Err(_) => {
                    report.failed += 1;
                    error!(body = id.0, "panic while destroying body during clear");
                }
            }
        }
        self.bodies.clear();
        self.by_uuid.clear();
        self.by_entity.clear();
        self.active.clear();
        self.constraints.clear();
        info!(
            destroyed = report.destroyed,
            failed = report.failed,
            "object registry cleared"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::backend::{BodyDesc, BodyKind, ConstraintDesc, ShapeDesc};
    use crate::body::VisualId;
    use crate::rapier_backend::RapierBackend;

    fn spawn(backend: &mut RapierBackend, objects: &ObjectManager, x: f32) -> BodyId {
        let id = backend
            .create_body(&BodyDesc::dynamic(
                ShapeDesc::Ball { radius: 0.5 },
                Vec3::new(x, 0.0, 0.0),
            ))
            .unwrap();
        objects.register(PhysicsBody::new(id, BodyKind::Dynamic));
        id
    }

    #[test]
    fn test_lookup_by_every_index() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let objects = ObjectManager::new();
        let id = backend
            .create_body(&BodyDesc::dynamic(ShapeDesc::Ball { radius: 0.5 }, Vec3::ZERO))
            .unwrap();
        let uuid = objects.register(
            PhysicsBody::new(id, BodyKind::Dynamic)
                .with_entity(EntityId(7))
                .with_display(DisplaySettings::new(VisualId(3))),
        );
        assert_eq!(objects.by_uuid(uuid), Some(id));
        assert_eq!(objects.by_entity(EntityId(7)), Some(id));
        assert_eq!(objects.get(id).map(|o| o.uuid), Some(uuid));
        assert_eq!(objects.displayed().len(), 1);

        objects.unregister(id);
        assert!(objects.by_uuid(uuid).is_none());
        assert!(objects.by_entity(EntityId(7)).is_none());
        assert!(objects.is_empty());
    }

    #[test]
    fn test_activation_events_track_active_set() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let objects = ObjectManager::new();
        let a = spawn(&mut backend, &objects, 0.0);
        let b = spawn(&mut backend, &objects, 5.0);
        objects.apply_activation_events(&backend.drain_activation_events());
        assert!(objects.is_active(a));
        assert!(objects.is_active(b));

        objects.apply_activation_events(&[ActivationEvent::Deactivated(a)]);
        assert!(!objects.is_active(a));
        assert_eq!(objects.active_ids(), vec![b]);

        // Unregistered bodies never enter the active set.
        objects.apply_activation_events(&[ActivationEvent::Activated(BodyId(999))]);
        assert!(!objects.is_active(BodyId(999)));
    }

    #[test]
    fn test_connected_cluster_follows_constraints() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let objects = ObjectManager::new();
        let a = spawn(&mut backend, &objects, 0.0);
        let b = spawn(&mut backend, &objects, 2.0);
        let c = spawn(&mut backend, &objects, 4.0);
        let lonely = spawn(&mut backend, &objects, 8.0);
        let ab = backend.create_constraint(a, b, ConstraintDesc::Fixed).unwrap();
        let bc = backend.create_constraint(b, c, ConstraintDesc::Fixed).unwrap();
        objects.link(ab, a, b);
        objects.link(bc, b, c);

        let cluster = objects.connected_cluster(c);
        assert_eq!(cluster.len(), 3);
        assert_eq!(cluster[0], c);
        assert!(cluster.contains(&a));
        assert_eq!(objects.connected_cluster(lonely), vec![lonely]);

        objects.unlink(bc);
        assert_eq!(objects.connected_cluster(c), vec![c]);
    }

    fn root(parent: &[usize], mut i: usize) -> usize {
        while parent[i] != i {
            i = parent[i];
        }
        i
    }

    #[test]
    fn test_clusters_match_union_find() {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(0xba11a57);
        let objects = ObjectManager::new();
        let ids: Vec<BodyId> = (0..24)
            .map(|n| {
                objects.register(PhysicsBody::new(BodyId(n), BodyKind::Dynamic));
                BodyId(n)
            })
            .collect();
        let mut parent: Vec<usize> = (0..ids.len()).collect();
        for n in 0..18 {
            let a = rng.random_range(0..ids.len());
            let b = rng.random_range(0..ids.len());
            if a == b {
                continue;
            }
            objects.link(ConstraintId(n), ids[a], ids[b]);
            let (ra, rb) = (root(&parent, a), root(&parent, b));
            parent[ra] = rb;
        }

        for (i, &id) in ids.iter().enumerate() {
            let cluster = objects.connected_cluster(id);
            let r = root(&parent, i);
            let expected = (0..ids.len()).filter(|&j| root(&parent, j) == r).count();
            assert_eq!(cluster.len(), expected, "body {i}");
            assert_eq!(cluster[0], id);
        }
    }

    #[test]
    fn test_clear_all_continues_past_failures() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let objects = ObjectManager::new();
        spawn(&mut backend, &objects, 0.0);
        spawn(&mut backend, &objects, 2.0);
        // Registered but never created natively: destroy fails.
        objects.register(PhysicsBody::new(BodyId(4242), BodyKind::Dynamic));

        let report = objects.clear_all(&mut backend);
        assert_eq!(report, ClearReport { destroyed: 2, failed: 1 });
        assert!(objects.is_empty());
        assert_eq!(backend.body_count(), 0);
    }

    #[test]
    fn test_destroy_removes_constraints() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let objects = ObjectManager::new();
        let a = spawn(&mut backend, &objects, 0.0);
        let b = spawn(&mut backend, &objects, 2.0);
        let joint = backend.create_constraint(a, b, ConstraintDesc::Fixed).unwrap();
        objects.link(joint, a, b);

        objects.destroy(&mut backend, a).unwrap();
        assert!(objects.get(b).unwrap().constraints.is_empty());
        assert!(!backend.is_added(a));
    }
}
