//! Rigid-body simulation for a chunked voxel host.
//!
//! Each host world gets a [`PhysicsWorld`] driven on its own fixed-rate
//! thread (see [`spawn`]). The host talks to it through a [`PhysicsHandle`]:
//! work goes in as tasks, per-tick [`PhysicsSnapshot`]s come back out and
//! are applied with [`apply_snapshot`]. Terrain collision comes from
//! `ballast-terrain` via a [`TerrainBridge`]; fluids push bodies through the
//! buoyancy pipeline.

mod backend;
mod body;
mod bounds;
pub mod buoyancy;
mod object_manager;
mod physics_loop;
mod query;
mod rapier_backend;
mod snapshot;
mod task_manager;
mod terrain_bridge;
mod tickets;
mod world;

pub use backend::{
    Aabb, ActivationEvent, BackendError, BodyDesc, BodyId, BodyKind, BodyState, BoxShape,
    BuoyancyImpulse, ConstraintDesc, ConstraintId, PhysicsBackend, RayHit, ShapeDesc, StepError,
};
pub use body::{BodyUuid, DisplaySettings, EntityId, PhysicsBody, VisualId};
pub use bounds::{BoundaryBodies, WorldBounds, floor_plane_desc};
pub use buoyancy::{BuoyancyManager, FluidBlock, FluidKind, FluidSource};
pub use object_manager::{ClearReport, ObjectManager};
pub use physics_loop::{BodyFuture, PhysicsHandle, ShutdownReport, spawn, spawn_from_config};
pub use query::{QueryEngine, RaycastHit};
pub use rapier_backend::RapierBackend;
pub use snapshot::{
    PhysicsSnapshot, SnapshotReceiver, SnapshotSender, VisualSink, VisualUpdate, apply_snapshot,
    snapshot_queue,
};
pub use task_manager::{
    OneShotTask, TaskId, TaskManager, TaskMetrics, TaskPriority, TaskSender, TickTask,
};
pub use terrain_bridge::{TerrainBodies, TerrainBridge};
pub use tickets::{ChunkTicketManager, TicketError, TicketHost};
pub use world::{
    BodySpec, PhysicsContext, PhysicsWorld, SpawnedBody, TickListener, WorldError,
};
