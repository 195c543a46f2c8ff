//! Ray casts, sphere overlaps, and radial impulses.

use glam::Vec3;

use crate::backend::{BodyId, BodyKind, PhysicsBackend};
use crate::body::BodyUuid;
use crate::object_manager::ObjectManager;

const MIN_DISTANCE_SQ: f32 = 1.0e-6;

/// A ray hit on a registered body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastHit {
    /// Native id of the body hit.
    pub body: BodyId,
    /// Stable id of the body hit.
    pub uuid: BodyUuid,
    /// World-space hit point.
    pub point: Vec3,
    /// Position along the cast, 0 at the origin and 1 at full distance.
    pub fraction: f32,
}

/// Read queries plus explosions over one world.
///
/// Hits on native bodies that are not registered (terrain, for example)
/// are left out of ray and overlap results.
pub struct QueryEngine<'a> {
    backend: &'a mut dyn PhysicsBackend,
    objects: &'a ObjectManager,
    force_scale: f32,
}

impl<'a> QueryEngine<'a> {
    /// Borrows a world for querying. `force_scale` multiplies explosion force.
    pub fn new(
        backend: &'a mut dyn PhysicsBackend,
        objects: &'a ObjectManager,
        force_scale: f32,
    ) -> Self {
        Self {
            backend,
            objects,
            force_scale,
        }
    }

    /// Closest registered hit within `distance`.
    pub fn raycast(&self, origin: Vec3, direction: Vec3, distance: f32) -> Option<RaycastHit> {
        self.raycast_all(origin, direction, distance).into_iter().next()
    }

    /// Every registered hit within `distance`, nearest first.
    pub fn raycast_all(&self, origin: Vec3, direction: Vec3, distance: f32) -> Vec<RaycastHit> {
        let Some(direction) = direction.try_normalize() else {
            return Vec::new();
        };
        if !(distance > 0.0) {
            return Vec::new();
        }
        let segment = direction * distance;
        self.backend
            .cast_ray(origin, direction, distance)
            .into_iter()
            .filter_map(|hit| {
                let object = self.objects.get(hit.body)?;
                Some(RaycastHit {
                    body: hit.body,
                    uuid: object.uuid,
                    point: origin + segment * hit.fraction,
                    fraction: hit.fraction,
                })
            })
            .collect()
    }

    /// Registered bodies whose bounds touch the sphere.
    pub fn overlap_sphere(&self, center: Vec3, radius: f32) -> Vec<BodyId> {
        if !(radius > 0.0) {
            return Vec::new();
        }
        self.backend
            .overlap_sphere(center, radius)
            .into_iter()
            .filter(|id| self.objects.contains(*id))
            .collect()
    }

    /// Pushes every dynamic, non-sensor body within `radius` away from
    /// `origin`, falling off linearly to zero at the edge. Returns the number
    /// of bodies pushed.
    pub fn explode(&mut self, origin: Vec3, radius: f32, force: f32) -> usize {
        if force <= 0.0 || radius <= 0.0 {
            return 0;
        }
        let scaled = force * self.force_scale;
        let radius_sq = radius * radius;
        let mut pushed = 0;
        for id in self.backend.overlap_sphere(origin, radius) {
            let Some(state) = self.backend.body_state(id) else {
                continue;
            };
            if state.kind != BodyKind::Dynamic || state.sensor {
                continue;
            }
            let offset = state.center_of_mass - origin;
            let distance_sq = offset.length_squared();
            if distance_sq <= MIN_DISTANCE_SQ || distance_sq > radius_sq {
                continue;
            }
            let factor = 1.0 - distance_sq.sqrt() / radius;
            if factor <= 0.0 {
                continue;
            }
            let impulse = offset.normalize() * scaled * factor;
            if self.backend.wake(id).is_ok() && self.backend.apply_impulse(id, impulse).is_ok() {
                pushed += 1;
            }
        }
        pushed
    }
}
