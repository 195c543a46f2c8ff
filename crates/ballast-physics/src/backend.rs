//! The native simulation seam.
//!
//! Everything above this module talks to the simulation through
//! [`PhysicsBackend`], using plain ids and value types. The rapier3d
//! implementation lives in [`crate::rapier_backend`].

use glam::{Quat, Vec3};
use thiserror::Error;

/// Native body id. Stable for the life of the body, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u64);

/// Native constraint id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintId(pub u64);

/// Motion type, fixed at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BodyKind {
    /// Simulated.
    Dynamic,
    /// Never moves.
    Static,
    /// Moved by the caller.
    Kinematic,
}

/// One axis-aligned box in body-local space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxShape {
    /// Box center relative to the body origin.
    pub center: Vec3,
    /// Half extents.
    pub half_extents: Vec3,
}

/// Collision shape, resolved once when the body is created.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeDesc {
    /// Sphere.
    Ball {
        /// Radius.
        radius: f32,
    },
    /// Box centered on the body origin.
    Cuboid {
        /// Half extents.
        half_extents: Vec3,
    },
    /// Y-aligned capsule.
    Capsule {
        /// Half height of the cylindrical part.
        half_height: f32,
        /// Radius.
        radius: f32,
    },
    /// Several boxes attached to one body (terrain).
    Boxes(Vec<BoxShape>),
}

impl ShapeDesc {
    /// Rejects degenerate shapes.
    pub fn validate(&self) -> Result<(), BackendError> {
        let positive = |v: f32| v.is_finite() && v > 0.0;
        let ok = match self {
            ShapeDesc::Ball { radius } => positive(*radius),
            ShapeDesc::Cuboid { half_extents } => half_extents.to_array().into_iter().all(positive),
            ShapeDesc::Capsule {
                half_height,
                radius,
            } => positive(*radius) && half_height.is_finite() && *half_height >= 0.0,
            ShapeDesc::Boxes(boxes) => {
                !boxes.is_empty()
                    && boxes
                        .iter()
                        .all(|b| b.half_extents.to_array().into_iter().all(positive))
            }
        };
        if ok {
            Ok(())
        } else {
            Err(BackendError::InvalidShape)
        }
    }
}

/// Everything needed to create a body.
#[derive(Clone, Debug, PartialEq)]
pub struct BodyDesc {
    /// Motion type.
    pub kind: BodyKind,
    /// Collision shape.
    pub shape: ShapeDesc,
    /// Initial position.
    pub position: Vec3,
    /// Initial rotation.
    pub rotation: Quat,
    /// Initial linear velocity.
    pub linear_velocity: Vec3,
    /// Collider density.
    pub density: f32,
    /// Collider friction.
    pub friction: f32,
    /// Collider restitution.
    pub restitution: f32,
    /// Sensors report overlaps but never collide.
    pub sensor: bool,
}

impl BodyDesc {
    /// A body of `kind` with default material.
    pub fn new(kind: BodyKind, shape: ShapeDesc, position: Vec3) -> Self {
        Self {
            kind,
            shape,
            position,
            rotation: Quat::IDENTITY,
            linear_velocity: Vec3::ZERO,
            density: 1.0,
            friction: 0.5,
            restitution: 0.0,
            sensor: false,
        }
    }

    /// Dynamic body.
    pub fn dynamic(shape: ShapeDesc, position: Vec3) -> Self {
        Self::new(BodyKind::Dynamic, shape, position)
    }

    /// Static body.
    pub fn fixed(shape: ShapeDesc, position: Vec3) -> Self {
        Self::new(BodyKind::Static, shape, position)
    }

    /// Sets friction and restitution.
    pub fn with_material(mut self, friction: f32, restitution: f32) -> Self {
        self.friction = friction;
        self.restitution = restitution;
        self
    }

    /// Sets density.
    pub fn with_density(mut self, density: f32) -> Self {
        self.density = density;
        self
    }

    /// Marks the body as a sensor.
    pub fn as_sensor(mut self) -> Self {
        self.sensor = true;
        self
    }
}

/// Constraint between two bodies.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstraintDesc {
    /// Locks relative position and rotation as they are at creation.
    Fixed,
}

/// Read-only copy of a body's state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BodyState {
    /// Motion type.
    pub kind: BodyKind,
    /// Body origin.
    pub position: Vec3,
    /// Body rotation.
    pub rotation: Quat,
    /// World-space center of mass.
    pub center_of_mass: Vec3,
    /// Linear velocity.
    pub linear_velocity: Vec3,
    /// Mass.
    pub mass: f32,
    /// `true` if the body is asleep.
    pub sleeping: bool,
    /// `true` if every collider is a sensor.
    pub sensor: bool,
}

/// World-space axis-aligned bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// Smallest box containing both.
    pub fn union(self, other: Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Squared distance from `point` to the box (0 inside).
    pub fn distance_sq(&self, point: Vec3) -> f32 {
        let clamped = point.clamp(self.min, self.max);
        clamped.distance_squared(point)
    }

    /// Box size.
    pub fn extents(&self) -> Vec3 {
        self.max - self.min
    }
}

/// One ray intersection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Body hit.
    pub body: BodyId,
    /// Distance along the ray as a fraction of the cast length.
    pub fraction: f32,
}

/// Inputs to a single buoyancy impulse.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BuoyancyImpulse {
    /// A point on the fluid surface.
    pub surface_position: Vec3,
    /// Surface normal (up).
    pub surface_normal: Vec3,
    /// Lift relative to displaced weight.
    pub buoyancy: f32,
    /// Linear drag coefficient.
    pub linear_drag: f32,
    /// Angular drag coefficient.
    pub angular_drag: f32,
    /// Fluid flow velocity.
    pub fluid_velocity: Vec3,
    /// World gravity.
    pub gravity: Vec3,
    /// Step duration in seconds.
    pub dt: f32,
    /// Fraction of the body's footprint over fluid (0..=1).
    pub coverage: f32,
}

/// Body sleep transitions observed during a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActivationEvent {
    /// The body woke up (or was created awake).
    Activated(BodyId),
    /// The body fell asleep.
    Deactivated(BodyId),
}

/// Backend failures on individual operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// No live body has this id.
    #[error("unknown body {0:?}")]
    UnknownBody(BodyId),
    /// No live constraint has this id.
    #[error("unknown constraint {0:?}")]
    UnknownConstraint(ConstraintId),
    /// The shape has a zero, negative, or non-finite dimension.
    #[error("invalid collision shape")]
    InvalidShape,
}

/// Failure advancing the simulation. Logged by the caller, never fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StepError {
    /// The timestep or sub-step count is unusable.
    #[error("invalid timestep {dt} with {steps} collision steps")]
    InvalidTimestep {
        /// Requested step duration.
        dt: f32,
        /// Requested sub-steps.
        steps: u32,
    },
    /// The native solver panicked mid-step.
    #[error("native solver panicked during step")]
    SolverPanicked,
}

/// Primitive operations of the native simulation.
pub trait PhysicsBackend: Send {
    /// Advances by `dt` seconds split into `collision_steps` sub-steps.
    fn advance(&mut self, dt: f32, collision_steps: u32) -> Result<(), StepError>;

    /// Creates a body.
    fn create_body(&mut self, desc: &BodyDesc) -> Result<BodyId, BackendError>;

    /// Destroys a body, its colliders, and its constraints.
    fn destroy_body(&mut self, id: BodyId) -> Result<(), BackendError>;

    /// Creates a constraint between two bodies.
    fn create_constraint(
        &mut self,
        a: BodyId,
        b: BodyId,
        desc: ConstraintDesc,
    ) -> Result<ConstraintId, BackendError>;

    /// Destroys a constraint.
    fn destroy_constraint(&mut self, id: ConstraintId) -> Result<(), BackendError>;

    /// Current state of a body.
    fn body_state(&self, id: BodyId) -> Option<BodyState>;

    /// `true` while the body exists in the simulation.
    fn is_added(&self, id: BodyId) -> bool;

    /// `true` if the body exists and is awake.
    fn is_active(&self, id: BodyId) -> bool;

    /// World-space bounds of all of a body's colliders.
    fn body_aabb(&self, id: BodyId) -> Option<Aabb>;

    /// Applies an impulse at the center of mass.
    fn apply_impulse(&mut self, id: BodyId, impulse: Vec3) -> Result<(), BackendError>;

    /// Applies one buoyancy + drag impulse. Returns `false` if nothing was applied.
    fn apply_buoyancy_impulse(
        &mut self,
        id: BodyId,
        impulse: &BuoyancyImpulse,
    ) -> Result<bool, BackendError>;

    /// Wakes a sleeping body.
    fn wake(&mut self, id: BodyId) -> Result<(), BackendError>;

    /// Every body hit by the ray within `max_distance`, nearest first.
    /// `direction` must be normalized.
    fn cast_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Vec<RayHit>;

    /// Bodies whose bounds intersect the sphere.
    fn overlap_sphere(&self, center: Vec3, radius: f32) -> Vec<BodyId>;

    /// Activation changes since the last call.
    fn drain_activation_events(&mut self) -> Vec<ActivationEvent>;

    /// Number of live bodies (all kinds).
    fn body_count(&self) -> usize;

    /// World gravity.
    fn gravity(&self) -> Vec3;
}
