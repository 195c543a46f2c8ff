//! One physics world: the context tasks run against and the fixed-step
//! `step` that drives it.
//!
//! Within a tick, scheduled tasks run first, then the simulation advances,
//! then the snapshot is taken. Buoyancy impulses from the previous broad
//! phase are applied just before the advance and the next broad phase runs
//! just after it.

use std::sync::Arc;

use glam::Vec3;
use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

use ballast_config::{Config, FloorPlaneConfig, WorldProfile};
use ballast_terrain::{ChunkPos, MeshData};

use crate::backend::{
    BackendError, BodyDesc, BodyId, BodyKind, ConstraintDesc, ConstraintId, PhysicsBackend,
};
use crate::body::{BodyUuid, DisplaySettings, EntityId, PhysicsBody};
use crate::bounds::{BoundaryBodies, WorldBounds};
use crate::buoyancy::{BuoyancyManager, FluidSource};
use crate::object_manager::{ClearReport, ObjectManager};
use crate::query::QueryEngine;
use crate::rapier_backend::RapierBackend;
use crate::snapshot::{PhysicsSnapshot, VisualUpdate};
use crate::task_manager::{TaskManager, TaskMetrics, TaskSender};
use crate::terrain_bridge::TerrainBodies;

/// Errors from world-level body operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorldError {
    /// The world already holds its maximum number of bodies.
    #[error("body limit of {limit} reached")]
    Capacity {
        /// Configured limit.
        limit: usize,
    },
    /// The physics loop has stopped.
    #[error("physics world is shut down")]
    Shutdown,
    /// A result did not arrive in time.
    #[error("timed out waiting for the physics thread")]
    Timeout,
    /// The request was cancelled before it ran.
    #[error("request cancelled")]
    Cancelled,
    /// The physics thread could not be started.
    #[error("failed to start physics thread: {0}")]
    Spawn(String),
    /// The backend rejected the operation.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A body to create, with its registry metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct BodySpec {
    /// Native body description.
    pub desc: BodyDesc,
    /// Owning host entity.
    pub entity: Option<EntityId>,
    /// Renderable driven by the body.
    pub display: Option<DisplaySettings>,
}

impl BodySpec {
    /// A body with no entity and no renderable.
    pub fn new(desc: BodyDesc) -> Self {
        Self {
            desc,
            entity: None,
            display: None,
        }
    }

    /// Ties the body to a host entity.
    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Drives a renderable from the body.
    pub fn with_display(mut self, display: DisplaySettings) -> Self {
        self.display = Some(display);
        self
    }
}

/// Ids of a freshly created body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpawnedBody {
    /// Native id.
    pub body: BodyId,
    /// Stable id.
    pub uuid: BodyUuid,
}

/// Everything a task can touch on the physics thread.
pub struct PhysicsContext {
    world: Arc<str>,
    backend: Box<dyn PhysicsBackend>,
    objects: Arc<ObjectManager>,
    bounds: WorldBounds,
    boundaries: BoundaryBodies,
    max_bodies: usize,
    tasks: TaskSender<PhysicsContext>,
    terrain: TerrainBodies,
    tick: u64,
    step_seconds: f32,
    force_scale: f32,
}

impl PhysicsContext {
    /// Host world name.
    pub fn world(&self) -> &Arc<str> {
        &self.world
    }

    /// The native simulation.
    pub fn backend(&self) -> &dyn PhysicsBackend {
        self.backend.as_ref()
    }

    /// The native simulation, mutably.
    pub fn backend_mut(&mut self) -> &mut dyn PhysicsBackend {
        self.backend.as_mut()
    }

    /// Registry of created bodies.
    pub fn objects(&self) -> &Arc<ObjectManager> {
        &self.objects
    }

    /// World bounds.
    pub fn bounds(&self) -> &WorldBounds {
        &self.bounds
    }

    /// Walls and floor slab owned by the world.
    pub fn boundaries(&self) -> &BoundaryBodies {
        &self.boundaries
    }

    fn build_boundaries(&mut self, floor: &FloorPlaneConfig) {
        self.boundaries.build(self.backend.as_mut(), &self.bounds, floor);
    }

    /// Ticks completed so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Duration of one tick in seconds.
    pub fn step_seconds(&self) -> f32 {
        self.step_seconds
    }

    /// Sender for scheduling follow-up work.
    pub fn tasks(&self) -> &TaskSender<PhysicsContext> {
        &self.tasks
    }

    /// Terrain collision bodies.
    pub fn terrain(&self) -> &TerrainBodies {
        &self.terrain
    }

    /// Configured body limit.
    pub fn max_bodies(&self) -> usize {
        self.max_bodies
    }

    /// `true` if `count` more bodies fit under the limit. Callers check this
    /// before creating bodies; nothing is evicted to make room.
    pub fn can_spawn_bodies(&self, count: usize) -> bool {
        self.objects.len().saturating_add(count) <= self.max_bodies
    }

    /// Creates and registers a body.
    pub fn spawn_body(&mut self, spec: BodySpec) -> Result<SpawnedBody, WorldError> {
        if !self.can_spawn_bodies(1) {
            return Err(WorldError::Capacity {
                limit: self.max_bodies,
            });
        }
        let body = self.backend.create_body(&spec.desc)?;
        let mut object = PhysicsBody::new(body, spec.desc.kind);
        object.entity = spec.entity;
        object.display = spec.display;
        let uuid = self.objects.register(object);
        // Creation emits an activation event; apply it now so the body is
        // in this tick's snapshot.
        let events = self.backend.drain_activation_events();
        self.objects.apply_activation_events(&events);
        Ok(SpawnedBody { body, uuid })
    }

    /// Destroys a registered body and its constraints.
    pub fn remove_body(&mut self, id: BodyId) -> Result<(), WorldError> {
        self.objects.destroy(self.backend.as_mut(), id)?;
        Ok(())
    }

    /// Joins two registered bodies.
    pub fn create_constraint(
        &mut self,
        a: BodyId,
        b: BodyId,
        desc: ConstraintDesc,
    ) -> Result<ConstraintId, WorldError> {
        let id = self.backend.create_constraint(a, b, desc)?;
        self.objects.link(id, a, b);
        Ok(id)
    }

    /// Removes a constraint.
    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<(), WorldError> {
        self.objects.unlink(id);
        self.backend.destroy_constraint(id)?;
        Ok(())
    }

    /// Query interface over the registered bodies.
    pub fn query(&mut self) -> QueryEngine<'_> {
        QueryEngine::new(self.backend.as_mut(), &self.objects, self.force_scale)
    }

    /// Registered non-static bodies outside the XZ bounds or below the floor.
    /// Disposal is the caller's decision.
    pub fn bodies_out_of_bounds(&self) -> Vec<BodyId> {
        self.objects
            .ids()
            .into_iter()
            .filter(|id| {
                self.backend.body_state(*id).is_some_and(|state| {
                    let p = state.position.as_dvec3();
                    state.kind != BodyKind::Static
                        && (!self.bounds.is_inside(p) || self.bounds.is_below_bottom(p))
                })
            })
            .collect()
    }

    /// Queues a finished terrain mesh built for chunk `revision`. Meshes
    /// older than the chunk's last removal are dropped.
    pub fn queue_terrain_mesh(&mut self, pos: ChunkPos, revision: u64, mesh: Arc<MeshData>) {
        self.terrain.enqueue(pos, revision, mesh);
    }

    /// Removes the chunk's terrain bodies now. `revision` is the chunk's
    /// revision after the unload.
    pub fn remove_terrain(&mut self, pos: ChunkPos, revision: u64) {
        self.terrain.remove_chunk(self.backend.as_mut(), pos, revision);
    }

    fn apply_terrain(&mut self, limit: usize) -> usize {
        self.terrain
            .apply_pending(self.backend.as_mut(), &self.objects, limit)
    }

    fn snapshot(&self) -> PhysicsSnapshot {
        let updates = self
            .objects
            .displayed()
            .into_iter()
            .filter_map(|(id, display)| {
                let state = self.backend.body_state(id)?;
                Some(VisualUpdate {
                    visual: display.visual,
                    position: state.position + state.rotation * display.offset,
                    rotation: state.rotation,
                    visible: display.visible,
                })
            })
            .collect();

        let active_chunks: FxHashSet<ChunkPos> = self
            .objects
            .active_ids()
            .into_iter()
            .filter_map(|id| self.backend.body_state(id))
            .map(|state| {
                let com = state.center_of_mass;
                ChunkPos::containing(f64::from(com.x), f64::from(com.z))
            })
            .collect();

        PhysicsSnapshot {
            tick: self.tick,
            updates,
            active_chunks,
        }
    }
}

/// Runs after every step on the physics thread.
pub type TickListener = Box<dyn FnMut(&PhysicsContext, &PhysicsSnapshot) + Send + 'static>;

/// One host world's simulation.
pub struct PhysicsWorld {
    ctx: PhysicsContext,
    tasks: TaskManager<PhysicsContext>,
    buoyancy: Option<BuoyancyManager>,
    listeners: Vec<TickListener>,
    collision_steps: u32,
    mesh_apply_per_tick: usize,
    last_tasks: TaskMetrics,
}

impl PhysicsWorld {
    /// Creates a world for `world` using its profile from `config`.
    pub fn new(world: &str, config: &Config, backend: Box<dyn PhysicsBackend>) -> Self {
        let profile = config.profile_for(world);
        let tasks = TaskManager::new(&config.tasks);
        let mut ctx = PhysicsContext {
            world: Arc::from(world),
            backend,
            objects: Arc::new(ObjectManager::new()),
            bounds: WorldBounds::from(&profile.bounds),
            boundaries: BoundaryBodies::default(),
            max_bodies: profile.max_bodies as usize,
            tasks: tasks.sender(),
            terrain: TerrainBodies::new(),
            tick: 0,
            step_seconds: profile.step_seconds(),
            force_scale: config.query.explosion_force_scale,
        };
        ctx.build_boundaries(&profile.floor_plane);
        info!(
            world,
            tick_rate = profile.effective_tick_rate(),
            collision_steps = profile.effective_collision_steps(),
            max_bodies = profile.max_bodies,
            "physics world created"
        );
        Self {
            ctx,
            tasks,
            buoyancy: None,
            listeners: Vec::new(),
            collision_steps: profile.effective_collision_steps(),
            mesh_apply_per_tick: profile.terrain.mesh_apply_per_tick.max(1) as usize,
            last_tasks: TaskMetrics::default(),
        }
    }

    /// Creates a world backed by rapier3d.
    pub fn with_rapier(world: &str, config: &Config) -> Self {
        let gravity = config.profile_for(world).gravity;
        Self::new(world, config, Box::new(RapierBackend::from_gravity(gravity)))
    }

    /// Enables buoyancy against a host fluid source.
    pub fn with_buoyancy(mut self, fluids: Box<dyn FluidSource>, config: &Config) -> Self {
        self.buoyancy = Some(BuoyancyManager::new(fluids, config.buoyancy.clone()));
        self
    }

    /// Applies a reloaded config. The tick period is owned by whoever drives
    /// [`PhysicsWorld::step`].
    pub fn reload(&mut self, config: &Config) {
        let profile: &WorldProfile = config.profile_for(&self.ctx.world);
        self.tasks.update_limits(&config.tasks);
        if let Some(buoyancy) = self.buoyancy.as_mut() {
            buoyancy.set_config(config.buoyancy.clone());
        }
        self.ctx.bounds = WorldBounds::from(&profile.bounds);
        self.ctx.boundaries.clear(self.ctx.backend.as_mut());
        self.ctx.build_boundaries(&profile.floor_plane);
        self.ctx.max_bodies = profile.max_bodies as usize;
        self.ctx.step_seconds = profile.step_seconds();
        self.ctx.force_scale = config.query.explosion_force_scale;
        self.collision_steps = profile.effective_collision_steps();
        self.mesh_apply_per_tick = profile.terrain.mesh_apply_per_tick.max(1) as usize;
        info!(world = %self.ctx.world, "physics world reloaded");
    }

    /// Task context, for direct use when no loop is running.
    pub fn context(&self) -> &PhysicsContext {
        &self.ctx
    }

    /// Task context, mutably.
    pub fn context_mut(&mut self) -> &mut PhysicsContext {
        &mut self.ctx
    }

    /// Sender for scheduling onto this world.
    pub fn task_sender(&self) -> TaskSender<PhysicsContext> {
        self.tasks.sender()
    }

    /// Shared registry handle.
    pub fn objects(&self) -> Arc<ObjectManager> {
        Arc::clone(&self.ctx.objects)
    }

    /// The buoyancy pipeline, if enabled.
    pub fn buoyancy(&self) -> Option<&BuoyancyManager> {
        self.buoyancy.as_ref()
    }

    /// Task statistics from the last step.
    pub fn last_task_metrics(&self) -> TaskMetrics {
        self.last_tasks
    }

    /// Registers a listener run after every step.
    pub fn add_tick_listener(
        &mut self,
        listener: impl FnMut(&PhysicsContext, &PhysicsSnapshot) + Send + 'static,
    ) {
        self.listeners.push(Box::new(listener));
    }

    /// Runs one tick and returns its snapshot.
    pub fn step(&mut self) -> PhysicsSnapshot {
        self.last_tasks = self.tasks.run_all(&mut self.ctx);

        let applied = self.ctx.apply_terrain(self.mesh_apply_per_tick);
        if applied > 0 {
            debug!(world = %self.ctx.world, chunks = applied, "terrain meshes applied");
        }

        let dt = self.ctx.step_seconds;
        if let Some(buoyancy) = self.buoyancy.as_mut().filter(|b| b.enabled()) {
            buoyancy.apply_buoyancy_forces(self.ctx.backend.as_mut(), dt);
        }

        if let Err(e) = self.ctx.backend.advance(dt, self.collision_steps) {
            warn!(world = %self.ctx.world, tick = self.ctx.tick, "physics step failed: {e}");
        }

        let events = self.ctx.backend.drain_activation_events();
        self.ctx.objects.apply_activation_events(&events);

        if let Some(buoyancy) = self.buoyancy.as_mut().filter(|b| b.enabled()) {
            let candidates: Vec<BodyId> = self.ctx.objects.active_ids();
            buoyancy.update_fluid_states(&candidates, self.ctx.backend.as_ref());
        }

        let snapshot = self.ctx.snapshot();
        for listener in &mut self.listeners {
            listener(&self.ctx, &snapshot);
        }
        self.ctx.tick += 1;
        snapshot
    }

    /// Destroys every body and constraint, plus terrain and boundary bodies.
    pub fn destroy_all(&mut self) -> ClearReport {
        let report = self.ctx.objects.clear_all(self.ctx.backend.as_mut());
        let terrain = self.ctx.terrain.clear(self.ctx.backend.as_mut());
        let boundaries = self.ctx.boundaries.clear(self.ctx.backend.as_mut());
        info!(
            world = %self.ctx.world,
            destroyed = report.destroyed,
            failed = report.failed,
            terrain_chunks = terrain,
            boundaries,
            "physics world torn down"
        );
        report
    }

    /// Total live native bodies, terrain included.
    pub fn native_body_count(&self) -> usize {
        self.ctx.backend.body_count()
    }

    /// Gravity of the native simulation.
    pub fn gravity(&self) -> Vec3 {
        self.ctx.backend.gravity()
    }
}

#[cfg(test)]
#[path = "world_tests.rs"]
mod tests;
