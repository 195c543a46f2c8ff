//! [`PhysicsBackend`] on top of rapier3d.
//!
//! Rapier may re-export a different glam version than the workspace, so all
//! values cross the boundary component by component.

use std::panic::{AssertUnwindSafe, catch_unwind};

use glam::{Quat, Vec3};
use rapier3d::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::backend::{
    Aabb, ActivationEvent, BackendError, BodyDesc, BodyId, BodyKind, BodyState, BuoyancyImpulse,
    ConstraintDesc, ConstraintId, PhysicsBackend, RayHit, ShapeDesc, StepError,
};

/// Reads any `x/y/z` vector (by value or by reference) into a workspace `Vec3`.
macro_rules! glam_vec {
    ($v:expr) => {{
        let v = $v;
        Vec3::new(v.x, v.y, v.z)
    }};
}

fn to_rapier(v: Vec3) -> Vector {
    Vector::new(v.x, v.y, v.z)
}

struct BodyEntry {
    handle: RigidBodyHandle,
    kind: BodyKind,
    sensor: bool,
    awake: bool,
}

/// Owns every piece of rapier simulation state for one world.
pub struct RapierBackend {
    gravity: Vector,
    integration_parameters: IntegrationParameters,
    physics_pipeline: PhysicsPipeline,
    island_manager: IslandManager,
    broad_phase: BroadPhaseBvh,
    narrow_phase: NarrowPhase,
    rigid_body_set: RigidBodySet,
    collider_set: ColliderSet,
    impulse_joint_set: ImpulseJointSet,
    multibody_joint_set: MultibodyJointSet,
    ccd_solver: CCDSolver,
    bodies: FxHashMap<BodyId, BodyEntry>,
    handles: FxHashMap<RigidBodyHandle, BodyId>,
    constraints: FxHashMap<ConstraintId, ImpulseJointHandle>,
    next_body: u64,
    next_constraint: u64,
    events: Vec<ActivationEvent>,
}

impl RapierBackend {
    /// Creates an empty simulation with the given gravity.
    pub fn new(gravity: Vec3) -> Self {
        Self {
            gravity: to_rapier(gravity),
            integration_parameters: IntegrationParameters::default(),
            physics_pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: BroadPhaseBvh::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_body_set: RigidBodySet::new(),
            collider_set: ColliderSet::new(),
            impulse_joint_set: ImpulseJointSet::new(),
            multibody_joint_set: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            bodies: FxHashMap::default(),
            handles: FxHashMap::default(),
            constraints: FxHashMap::default(),
            next_body: 1,
            next_constraint: 1,
            events: Vec::new(),
        }
    }

    /// Creates a backend from a configured gravity vector.
    pub fn from_gravity(gravity: [f32; 3]) -> Self {
        Self::new(Vec3::from_array(gravity))
    }

    fn handle(&self, id: BodyId) -> Result<RigidBodyHandle, BackendError> {
        self.bodies
            .get(&id)
            .map(|entry| entry.handle)
            .ok_or(BackendError::UnknownBody(id))
    }

    fn body_mut(&mut self, id: BodyId) -> Result<&mut RigidBody, BackendError> {
        let handle = self.handle(id)?;
        self.rigid_body_set
            .get_mut(handle)
            .ok_or(BackendError::UnknownBody(id))
    }

    fn collider_builders(desc: &BodyDesc) -> Vec<ColliderBuilder> {
        match &desc.shape {
            ShapeDesc::Ball { radius } => vec![ColliderBuilder::ball(*radius)],
            ShapeDesc::Cuboid { half_extents } => vec![ColliderBuilder::cuboid(
                half_extents.x,
                half_extents.y,
                half_extents.z,
            )],
            ShapeDesc::Capsule {
                half_height,
                radius,
            } => vec![ColliderBuilder::capsule_y(*half_height, *radius)],
            ShapeDesc::Boxes(boxes) => boxes
                .iter()
                .map(|b| {
                    ColliderBuilder::cuboid(b.half_extents.x, b.half_extents.y, b.half_extents.z)
                        .translation(to_rapier(b.center))
                })
                .collect(),
        }
    }

    /// Records sleep transitions of every non-static body since the last step.
    fn collect_activation_changes(&mut self) {
        for (id, entry) in self.bodies.iter_mut() {
            if entry.kind == BodyKind::Static {
                continue;
            }
            let Some(body) = self.rigid_body_set.get(entry.handle) else {
                continue;
            };
            let awake = !body.is_sleeping();
            if awake != entry.awake {
                entry.awake = awake;
                self.events.push(if awake {
                    ActivationEvent::Activated(*id)
                } else {
                    ActivationEvent::Deactivated(*id)
                });
            }
        }
    }

    /// Writes the current collider bounds of `handle` into the broad phase.
    /// Rapier only refreshes the BVH at the start of a step, so new and
    /// freshly moved bodies would otherwise be invisible to scene queries.
    fn sync_query_bounds(&mut self, handle: RigidBodyHandle) {
        let Some(body) = self.rigid_body_set.get(handle) else {
            return;
        };
        for collider_handle in body.colliders() {
            if let Some(collider) = self.collider_set.get(*collider_handle) {
                self.broad_phase.set_aabb(
                    &self.integration_parameters,
                    *collider_handle,
                    collider.compute_aabb(),
                );
            }
        }
    }

    fn query_pipeline(&self) -> QueryPipeline<'_> {
        self.broad_phase.as_query_pipeline(
            self.narrow_phase.query_dispatcher(),
            &self.rigid_body_set,
            &self.collider_set,
            QueryFilter::default(),
        )
    }

    fn body_of(&self, collider: &Collider) -> Option<BodyId> {
        collider
            .parent()
            .and_then(|handle| self.handles.get(&handle))
            .copied()
    }

    fn step_once(&mut self) {
        self.physics_pipeline.step(
            self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_body_set,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            &mut self.ccd_solver,
            &(),
            &(),
        );
    }
}

impl PhysicsBackend for RapierBackend {
    fn advance(&mut self, dt: f32, collision_steps: u32) -> Result<(), StepError> {
        if !dt.is_finite() || dt <= 0.0 || collision_steps == 0 {
            return Err(StepError::InvalidTimestep {
                dt,
                steps: collision_steps,
            });
        }
        self.integration_parameters.dt = dt / collision_steps as f32;
        let stepped = catch_unwind(AssertUnwindSafe(|| {
            for _ in 0..collision_steps {
                self.step_once();
            }
        }));
        self.collect_activation_changes();
        let moving: Vec<RigidBodyHandle> = self
            .bodies
            .values()
            .filter(|entry| entry.kind != BodyKind::Static && entry.awake)
            .map(|entry| entry.handle)
            .collect();
        for handle in moving {
            self.sync_query_bounds(handle);
        }
        stepped.map_err(|_| StepError::SolverPanicked)
    }

    fn create_body(&mut self, desc: &BodyDesc) -> Result<BodyId, BackendError> {
        desc.shape.validate()?;

        let builder = match desc.kind {
            BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
            BodyKind::Static => RigidBodyBuilder::fixed(),
            BodyKind::Kinematic => RigidBodyBuilder::kinematic_position_based(),
        };
        let (axis, angle) = desc.rotation.normalize().to_axis_angle();
        let body = builder
            .translation(to_rapier(desc.position))
            .rotation(to_rapier(axis * angle))
            .linvel(to_rapier(desc.linear_velocity))
            .build();
        let handle = self.rigid_body_set.insert(body);

        for collider in Self::collider_builders(desc) {
            let collider = collider
                .density(desc.density)
                .friction(desc.friction)
                .restitution(desc.restitution)
                .sensor(desc.sensor)
                .build();
            self.collider_set
                .insert_with_parent(collider, handle, &mut self.rigid_body_set);
        }
        self.sync_query_bounds(handle);

        let id = BodyId(self.next_body);
        self.next_body += 1;
        let awake = desc.kind != BodyKind::Static;
        self.bodies.insert(
            id,
            BodyEntry {
                handle,
                kind: desc.kind,
                sensor: desc.sensor,
                awake,
            },
        );
        self.handles.insert(handle, id);
        if awake {
            self.events.push(ActivationEvent::Activated(id));
        }
        Ok(id)
    }

    fn destroy_body(&mut self, id: BodyId) -> Result<(), BackendError> {
        let entry = self.bodies.remove(&id).ok_or(BackendError::UnknownBody(id))?;
        self.handles.remove(&entry.handle);
        self.rigid_body_set.remove(
            entry.handle,
            &mut self.island_manager,
            &mut self.collider_set,
            &mut self.impulse_joint_set,
            &mut self.multibody_joint_set,
            true,
        );
        // Attached joints went with the body.
        let joints = &self.impulse_joint_set;
        self.constraints
            .retain(|_, handle| joints.get(*handle).is_some());
        Ok(())
    }

    fn create_constraint(
        &mut self,
        a: BodyId,
        b: BodyId,
        desc: ConstraintDesc,
    ) -> Result<ConstraintId, BackendError> {
        let ha = self.handle(a)?;
        let hb = self.handle(b)?;
        let (Some(body_a), Some(body_b)) = (self.rigid_body_set.get(ha), self.rigid_body_set.get(hb))
        else {
            return Err(BackendError::UnknownBody(a));
        };

        let joint = match desc {
            ConstraintDesc::Fixed => {
                // Anchor b's origin in a's frame so the pair keeps its offset.
                let ra = body_a.rotation();
                let rot_a = Quat::from_xyzw(ra.x, ra.y, ra.z, ra.w);
                let offset = glam_vec!(body_b.translation()) - glam_vec!(body_a.translation());
                let local = rot_a.inverse() * offset;
                FixedJointBuilder::new()
                    .local_anchor1(to_rapier(local))
                    .local_anchor2(Vector::new(0.0, 0.0, 0.0))
                    .build()
            }
        };
        let handle = self.impulse_joint_set.insert(ha, hb, joint, true);
        let id = ConstraintId(self.next_constraint);
        self.next_constraint += 1;
        self.constraints.insert(id, handle);
        Ok(id)
    }

    fn destroy_constraint(&mut self, id: ConstraintId) -> Result<(), BackendError> {
        let handle = self
            .constraints
            .remove(&id)
            .ok_or(BackendError::UnknownConstraint(id))?;
        self.impulse_joint_set.remove(handle, true);
        Ok(())
    }

    fn body_state(&self, id: BodyId) -> Option<BodyState> {
        let entry = self.bodies.get(&id)?;
        let body = self.rigid_body_set.get(entry.handle)?;
        let r = body.rotation();
        Some(BodyState {
            kind: entry.kind,
            position: glam_vec!(body.translation()),
            rotation: Quat::from_xyzw(r.x, r.y, r.z, r.w),
            center_of_mass: glam_vec!(body.center_of_mass()),
            linear_velocity: glam_vec!(body.linvel()),
            mass: body.mass(),
            sleeping: body.is_sleeping(),
            sensor: entry.sensor,
        })
    }

    fn is_added(&self, id: BodyId) -> bool {
        self.bodies.contains_key(&id)
    }

    fn is_active(&self, id: BodyId) -> bool {
        let Some(entry) = self.bodies.get(&id) else {
            return false;
        };
        if entry.kind == BodyKind::Static {
            return false;
        }
        self.rigid_body_set
            .get(entry.handle)
            .is_some_and(|body| !body.is_sleeping())
    }

    fn body_aabb(&self, id: BodyId) -> Option<Aabb> {
        let entry = self.bodies.get(&id)?;
        let body = self.rigid_body_set.get(entry.handle)?;
        body.colliders()
            .iter()
            .filter_map(|h| self.collider_set.get(*h))
            .map(|collider| {
                let aabb = collider.compute_aabb();
                Aabb {
                    min: glam_vec!(aabb.mins),
                    max: glam_vec!(aabb.maxs),
                }
            })
            .reduce(Aabb::union)
    }

    fn apply_impulse(&mut self, id: BodyId, impulse: Vec3) -> Result<(), BackendError> {
        let body = self.body_mut(id)?;
        body.apply_impulse(to_rapier(impulse), true);
        Ok(())
    }

    fn apply_buoyancy_impulse(
        &mut self,
        id: BodyId,
        impulse: &BuoyancyImpulse,
    ) -> Result<bool, BackendError> {
        let aabb = self.body_aabb(id).ok_or(BackendError::UnknownBody(id))?;
        let body = self.body_mut(id)?;
        if !body.is_dynamic() {
            return Ok(false);
        }

        let height = (aabb.max.y - aabb.min.y).max(f32::EPSILON);
        let submerged =
            ((impulse.surface_position.y - aabb.min.y) / height).clamp(0.0, 1.0) * impulse.coverage;
        if submerged <= 0.0 || impulse.dt <= 0.0 {
            return Ok(false);
        }

        let mass = body.mass();
        let normal = impulse.surface_normal.normalize_or(Vec3::Y);
        let lift = normal
            * impulse.gravity.length()
            * mass
            * impulse.buoyancy
            * submerged
            * impulse.dt;

        let velocity = glam_vec!(body.linvel());
        let linear = (impulse.linear_drag * submerged * impulse.dt).min(1.0);
        let drag = -(velocity - impulse.fluid_velocity) * linear * mass;
        body.apply_impulse(to_rapier(lift + drag), true);

        let angular = 1.0 - (impulse.angular_drag * submerged * impulse.dt).min(1.0);
        let av = glam_vec!(body.angvel());
        body.set_angvel(to_rapier(av * angular), true);
        Ok(true)
    }

    fn wake(&mut self, id: BodyId) -> Result<(), BackendError> {
        let body = self.body_mut(id)?;
        body.wake_up(true);
        Ok(())
    }

    fn cast_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Vec<RayHit> {
        if !(max_distance > 0.0) {
            return Vec::new();
        }
        let ray = Ray::new(to_rapier(origin), to_rapier(direction));
        let pipeline = self.query_pipeline();
        let mut nearest: FxHashMap<BodyId, f32> = FxHashMap::default();
        for (_, collider, hit) in pipeline.intersect_ray(ray, max_distance, true) {
            let Some(id) = self.body_of(collider) else {
                continue;
            };
            let fraction = hit.time_of_impact / max_distance;
            nearest
                .entry(id)
                .and_modify(|f| *f = f.min(fraction))
                .or_insert(fraction);
        }
        let mut hits: Vec<RayHit> = nearest
            .into_iter()
            .map(|(body, fraction)| RayHit { body, fraction })
            .collect();
        hits.sort_by(|a, b| a.fraction.total_cmp(&b.fraction).then(a.body.cmp(&b.body)));
        hits
    }

    fn overlap_sphere(&self, center: Vec3, radius: f32) -> Vec<BodyId> {
        if !(radius > 0.0) {
            return Vec::new();
        }
        let ball = Ball::new(radius);
        let pose = Pose::from_translation(to_rapier(center));
        let pipeline = self.query_pipeline();
        let mut found: Vec<BodyId> = pipeline
            .intersect_shape(pose, &ball)
            .filter_map(|(_, collider)| self.body_of(collider))
            .collect();
        found.sort();
        found.dedup();
        found
    }

    fn drain_activation_events(&mut self) -> Vec<ActivationEvent> {
        std::mem::take(&mut self.events)
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn gravity(&self) -> Vec3 {
        glam_vec!(self.gravity)
    }
}

impl Drop for RapierBackend {
    fn drop(&mut self) {
        if !self.bodies.is_empty() {
            debug!(bodies = self.bodies.len(), "dropping backend with live bodies");
        }
        if !self.constraints.is_empty() {
            warn!(
                constraints = self.constraints.len(),
                "dropping backend with live constraints"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BoxShape;

    fn ball_at(y: f32) -> BodyDesc {
        BodyDesc::dynamic(ShapeDesc::Ball { radius: 0.5 }, Vec3::new(0.0, y, 0.0))
    }

    #[test]
    fn test_dynamic_body_falls() {
        let mut backend = RapierBackend::new(Vec3::new(0.0, -9.81, 0.0));
        let id = backend.create_body(&ball_at(10.0)).unwrap();
        for _ in 0..20 {
            backend.advance(1.0 / 20.0, 2).unwrap();
        }
        let state = backend.body_state(id).unwrap();
        assert!(state.position.y < 10.0, "y={}", state.position.y);
        assert_eq!(state.kind, BodyKind::Dynamic);
    }

    #[test]
    fn test_invalid_timestep_is_reported() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        assert!(matches!(
            backend.advance(0.0, 4),
            Err(StepError::InvalidTimestep { .. })
        ));
        assert!(backend.advance(0.05, 0).is_err());
        assert!(backend.advance(0.05, 1).is_ok());
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let a = backend.create_body(&ball_at(0.0)).unwrap();
        backend.destroy_body(a).unwrap();
        let b = backend.create_body(&ball_at(0.0)).unwrap();
        assert_ne!(a, b);
        assert!(!backend.is_added(a));
        assert_eq!(
            backend.destroy_body(a),
            Err(BackendError::UnknownBody(a))
        );
    }

    #[test]
    fn test_static_body_is_never_active() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let floor = backend
            .create_body(&BodyDesc::fixed(
                ShapeDesc::Cuboid {
                    half_extents: Vec3::new(5.0, 0.5, 5.0),
                },
                Vec3::ZERO,
            ))
            .unwrap();
        let ball = backend.create_body(&ball_at(3.0)).unwrap();
        assert!(backend.is_added(floor));
        assert!(!backend.is_active(floor));
        assert!(backend.is_active(ball));
        assert_eq!(
            backend.drain_activation_events(),
            vec![ActivationEvent::Activated(ball)]
        );
        assert!(backend.drain_activation_events().is_empty());
    }

    #[test]
    fn test_box_list_aabb_covers_every_box() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let id = backend
            .create_body(&BodyDesc::fixed(
                ShapeDesc::Boxes(vec![
                    BoxShape {
                        center: Vec3::new(0.5, 0.5, 0.5),
                        half_extents: Vec3::splat(0.5),
                    },
                    BoxShape {
                        center: Vec3::new(4.5, 2.5, 0.5),
                        half_extents: Vec3::splat(0.5),
                    },
                ]),
                Vec3::new(16.0, 0.0, 0.0),
            ))
            .unwrap();
        let aabb = backend.body_aabb(id).unwrap();
        assert!((aabb.min.x - 16.0).abs() < 1e-3);
        assert!((aabb.max.x - 21.0).abs() < 1e-3);
        assert!((aabb.max.y - 3.0).abs() < 1e-3);
    }

    #[test]
    fn test_cast_ray_orders_hits() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let far = backend
            .create_body(&BodyDesc::fixed(
                ShapeDesc::Ball { radius: 0.5 },
                Vec3::new(0.0, 0.0, 8.0),
            ))
            .unwrap();
        let near = backend
            .create_body(&BodyDesc::fixed(
                ShapeDesc::Ball { radius: 0.5 },
                Vec3::new(0.0, 0.0, 3.0),
            ))
            .unwrap();
        let hits = backend.cast_ray(Vec3::ZERO, Vec3::Z, 10.0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].body, near);
        assert_eq!(hits[1].body, far);
        assert!((hits[0].fraction - 0.25).abs() < 1e-3);

        assert!(backend.cast_ray(Vec3::ZERO, Vec3::X, 10.0).is_empty());
    }

    #[test]
    fn test_overlap_sphere_finds_touching_bodies() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let inside = backend.create_body(&ball_at(0.0)).unwrap();
        let _outside = backend
            .create_body(&BodyDesc::dynamic(
                ShapeDesc::Ball { radius: 0.5 },
                Vec3::new(10.0, 0.0, 0.0),
            ))
            .unwrap();
        assert_eq!(backend.overlap_sphere(Vec3::new(1.0, 0.0, 0.0), 1.0), vec![inside]);
    }

    #[test]
    fn test_queries_ignore_distant_terrain() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        for x in 0..20 {
            for z in 0..20 {
                backend
                    .create_body(&BodyDesc::fixed(
                        ShapeDesc::Cuboid {
                            half_extents: Vec3::splat(0.5),
                        },
                        Vec3::new(100.0 + x as f32 * 2.0, 0.0, z as f32 * 2.0 - 20.0),
                    ))
                    .unwrap();
            }
        }
        let target = backend
            .create_body(&BodyDesc::fixed(
                ShapeDesc::Cuboid {
                    half_extents: Vec3::splat(1.0),
                },
                Vec3::new(5.0, 0.0, 0.0),
            ))
            .unwrap();

        let check = |backend: &RapierBackend| {
            let hits = backend.cast_ray(Vec3::ZERO, Vec3::X, 50.0);
            assert_eq!(hits.len(), 1);
            assert_eq!(hits[0].body, target);
            assert!((hits[0].fraction - 4.0 / 50.0).abs() < 1e-4);
            assert_eq!(backend.overlap_sphere(Vec3::new(3.5, 0.0, 0.0), 1.0), vec![target]);
        };
        check(&backend);
        backend.advance(1.0 / 20.0, 2).unwrap();
        check(&backend);
        assert_eq!(backend.cast_ray(Vec3::new(0.0, 0.0, -20.0), Vec3::X, 500.0).len(), 20);
    }

    #[test]
    fn test_queries_follow_moving_and_removed_bodies() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let mut desc = ball_at(0.0);
        desc.linear_velocity = Vec3::new(20.0, 0.0, 0.0);
        let id = backend.create_body(&desc).unwrap();
        assert_eq!(backend.overlap_sphere(Vec3::ZERO, 1.0), vec![id]);

        for _ in 0..4 {
            backend.advance(0.25, 4).unwrap();
        }
        let x = backend.body_state(id).unwrap().position.x;
        assert!(x > 15.0, "x={x}");
        assert!(backend.overlap_sphere(Vec3::ZERO, 1.0).is_empty());
        assert_eq!(backend.overlap_sphere(Vec3::new(x, 0.0, 0.0), 1.0), vec![id]);

        backend.destroy_body(id).unwrap();
        assert!(backend.overlap_sphere(Vec3::new(x, 0.0, 0.0), 1.0).is_empty());
        assert!(backend.cast_ray(Vec3::new(x, 5.0, 0.0), Vec3::NEG_Y, 10.0).is_empty());
    }

    #[test]
    fn test_buoyancy_lifts_submerged_body() {
        let mut backend = RapierBackend::new(Vec3::new(0.0, -10.0, 0.0));
        let id = backend
            .create_body(&BodyDesc::dynamic(
                ShapeDesc::Cuboid {
                    half_extents: Vec3::splat(0.5),
                },
                Vec3::new(0.0, 0.0, 0.0),
            ))
            .unwrap();
        let applied = backend
            .apply_buoyancy_impulse(
                id,
                &BuoyancyImpulse {
                    surface_position: Vec3::new(0.0, 2.0, 0.0),
                    surface_normal: Vec3::Y,
                    buoyancy: 1.1,
                    linear_drag: 0.5,
                    angular_drag: 0.05,
                    fluid_velocity: Vec3::ZERO,
                    gravity: Vec3::new(0.0, -10.0, 0.0),
                    dt: 0.05,
                    coverage: 1.0,
                },
            )
            .unwrap();
        assert!(applied);
        let v = backend.body_state(id).unwrap().linear_velocity;
        assert!(v.y > 0.0, "vy={}", v.y);
    }

    #[test]
    fn test_buoyancy_skips_body_above_surface() {
        let mut backend = RapierBackend::new(Vec3::new(0.0, -10.0, 0.0));
        let id = backend.create_body(&ball_at(5.0)).unwrap();
        let impulse = BuoyancyImpulse {
            surface_position: Vec3::new(0.0, 1.0, 0.0),
            surface_normal: Vec3::Y,
            buoyancy: 1.1,
            linear_drag: 0.5,
            angular_drag: 0.05,
            fluid_velocity: Vec3::ZERO,
            gravity: Vec3::new(0.0, -10.0, 0.0),
            dt: 0.05,
            coverage: 1.0,
        };
        assert!(!backend.apply_buoyancy_impulse(id, &impulse).unwrap());
    }

    #[test]
    fn test_destroying_body_drops_its_constraints() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let a = backend.create_body(&ball_at(0.0)).unwrap();
        let b = backend.create_body(&ball_at(2.0)).unwrap();
        let joint = backend.create_constraint(a, b, ConstraintDesc::Fixed).unwrap();
        backend.destroy_body(b).unwrap();
        assert_eq!(
            backend.destroy_constraint(joint),
            Err(BackendError::UnknownConstraint(joint))
        );
        backend.destroy_body(a).unwrap();
        assert_eq!(backend.body_count(), 0);
    }
}
