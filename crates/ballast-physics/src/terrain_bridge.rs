//! Glue between host chunk events, the terrain collision pipeline, and the
//! physics thread.
//!
//! [`TerrainBridge`] lives on the host thread. It turns chunk loads, unloads
//! and block edits into requests on the [`ChunkPhysicsManager`]. Finished
//! meshes come back as one-shot tasks that queue them on [`TerrainBodies`],
//! which turns a bounded number of them into static bodies each tick.

use std::collections::VecDeque;
use std::sync::Arc;

use glam::Vec3;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use ballast_config::{Config, TerrainProfile};
use ballast_terrain::{
    ChunkPhysicsCache, ChunkPhysicsManager, ChunkPos, ChunkProvider, DirtyChunkRegion,
    GENERATOR_VERSION, GenerationQueue, GreedyMeshGenerator, MeshData, MeshGenerator,
    MeshSettings, OnReady, ProfileRegistry, RequestReason,
};

use crate::backend::{BodyDesc, BodyId, BodyKind, BoxShape, PhysicsBackend, ShapeDesc};
use crate::bounds::WorldBounds;
use crate::object_manager::ObjectManager;
use crate::task_manager::TaskSender;
use crate::world::PhysicsContext;

/// Static terrain bodies per chunk, plus meshes waiting to become bodies.
///
/// Meshes carry the chunk revision they were built for. Removing a chunk
/// records its unload revision, and any mesh older than that is dropped
/// on arrival or before it is applied.
#[derive(Default)]
pub struct TerrainBodies {
    pending: VecDeque<(ChunkPos, u64, Arc<MeshData>)>,
    bodies: FxHashMap<ChunkPos, Vec<BodyId>>,
    unloaded: FxHashMap<ChunkPos, u64>,
    stale: u64,
}

impl TerrainBodies {
    /// Nothing built, nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a mesh built for `revision`. A mesh already pending for the
    /// same chunk is replaced. Returns `false` if the chunk was removed at a
    /// later revision.
    pub fn enqueue(&mut self, pos: ChunkPos, revision: u64, mesh: Arc<MeshData>) -> bool {
        if self.is_stale(pos, revision) {
            self.stale += 1;
            debug!(chunk_x = pos.x, chunk_z = pos.z, revision, "dropping mesh for removed chunk");
            return false;
        }
        if let Some(slot) = self.pending.iter_mut().find(|(p, _, _)| *p == pos) {
            slot.1 = revision;
            slot.2 = mesh;
        } else {
            self.pending.push_back((pos, revision, mesh));
        }
        true
    }

    /// Meshes waiting to be applied.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Meshes dropped because their chunk was removed after they were built.
    pub fn stale_count(&self) -> u64 {
        self.stale
    }

    /// Bodies built for `pos`.
    pub fn chunk_bodies(&self, pos: ChunkPos) -> Option<&[BodyId]> {
        self.bodies.get(&pos).map(Vec::as_slice)
    }

    /// Chunks that currently have terrain bodies.
    pub fn chunk_count(&self) -> usize {
        self.bodies.len()
    }

    /// Replaces the bodies of up to `limit` chunks with their pending meshes,
    /// then wakes registered dynamic bodies standing in those chunks.
    /// Returns the number of chunks applied.
    pub fn apply_pending(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        objects: &ObjectManager,
        limit: usize,
    ) -> usize {
        let mut applied = 0;
        while applied < limit {
            let Some((pos, revision, mesh)) = self.pending.pop_front() else {
                break;
            };
            if self.is_stale(pos, revision) {
                self.stale += 1;
                continue;
            }
            self.unloaded.remove(&pos);
            self.destroy_chunk(backend, pos);
            let built = build_chunk(backend, pos, &mesh);
            if !built.is_empty() {
                self.bodies.insert(pos, built);
            }
            wake_bodies_in(backend, objects, pos);
            applied += 1;
        }
        applied
    }

    /// Destroys the chunk's bodies and drops any pending mesh for it.
    /// Meshes built before `revision` that arrive later are ignored.
    pub fn remove_chunk(&mut self, backend: &mut dyn PhysicsBackend, pos: ChunkPos, revision: u64) {
        let recorded = self.unloaded.entry(pos).or_insert(revision);
        *recorded = (*recorded).max(revision);
        self.pending.retain(|(p, _, _)| *p != pos);
        self.destroy_chunk(backend, pos);
    }

    /// Destroys every terrain body. Returns the number of chunks cleared.
    pub fn clear(&mut self, backend: &mut dyn PhysicsBackend) -> usize {
        self.pending.clear();
        self.unloaded.clear();
        let chunks: Vec<ChunkPos> = self.bodies.keys().copied().collect();
        for &pos in &chunks {
            self.destroy_chunk(backend, pos);
        }
        chunks.len()
    }

    fn is_stale(&self, pos: ChunkPos, revision: u64) -> bool {
        self.unloaded.get(&pos).is_some_and(|&unloaded| revision < unloaded)
    }

    fn destroy_chunk(&mut self, backend: &mut dyn PhysicsBackend, pos: ChunkPos) {
        for id in self.bodies.remove(&pos).unwrap_or_default() {
            if let Err(e) = backend.destroy_body(id) {
                warn!(chunk_x = pos.x, chunk_z = pos.z, "failed to remove terrain body: {e}");
            }
        }
    }
}

/// One static body per `(friction, restitution)` group, positioned at the
/// chunk's block origin.
fn build_chunk(backend: &mut dyn PhysicsBackend, pos: ChunkPos, mesh: &MeshData) -> Vec<BodyId> {
    let origin = Vec3::new(pos.min_block_x() as f32, 0.0, pos.min_block_z() as f32);
    let mut built = Vec::new();
    for ((friction, restitution), shapes) in mesh.group_by_surface() {
        let boxes = shapes
            .iter()
            .map(|shape| BoxShape {
                center: Vec3::from_array(shape.center()),
                half_extents: Vec3::from_array(shape.half_extents()),
            })
            .collect();
        let desc = BodyDesc::fixed(ShapeDesc::Boxes(boxes), origin).with_material(friction, restitution);
        match backend.create_body(&desc) {
            Ok(id) => built.push(id),
            Err(e) => warn!(chunk_x = pos.x, chunk_z = pos.z, "failed to build terrain body: {e}"),
        }
    }
    built
}

fn wake_bodies_in(backend: &mut dyn PhysicsBackend, objects: &ObjectManager, pos: ChunkPos) {
    for id in objects.ids() {
        let Some(state) = backend.body_state(id) else {
            continue;
        };
        if state.kind != BodyKind::Dynamic {
            continue;
        }
        let p = state.position;
        if ChunkPos::containing(f64::from(p.x), f64::from(p.z)) == pos {
            let _ = backend.wake(id);
        }
    }
}

/// Host-thread driver for one world's terrain collision.
pub struct TerrainBridge {
    manager: ChunkPhysicsManager,
    tasks: TaskSender<PhysicsContext>,
    bounds: WorldBounds,
    profile: TerrainProfile,
    dirty: FxHashMap<ChunkPos, (DirtyChunkRegion, u32)>,
}

impl TerrainBridge {
    /// Wraps an existing manager. Meshes are delivered through `tasks`.
    pub fn new(
        manager: ChunkPhysicsManager,
        tasks: TaskSender<PhysicsContext>,
        bounds: WorldBounds,
        profile: TerrainProfile,
    ) -> Self {
        Self {
            manager,
            tasks,
            bounds,
            profile,
            dirty: FxHashMap::default(),
        }
    }

    /// Builds the full pipeline (greedy mesher, cache, worker queue) for
    /// `world` from `config`.
    pub fn from_config(
        world: &str,
        config: &Config,
        registry: Arc<ProfileRegistry>,
        tasks: TaskSender<PhysicsContext>,
    ) -> Self {
        let profile = config.profile_for(world);
        let settings = MeshSettings::from(&profile.terrain);
        let generator = Arc::new(GreedyMeshGenerator::new(Arc::clone(&registry), settings));
        let cache = Arc::new(ChunkPhysicsCache::from_config(
            &config.cache,
            GENERATOR_VERSION,
            generator.settings_hash(),
        ));
        let queue = Arc::new(GenerationQueue::from_config(&config.generation));
        let manager = ChunkPhysicsManager::new(
            world,
            registry,
            generator as Arc<dyn MeshGenerator>,
            cache,
            queue,
            &profile.terrain,
        );
        Self::new(
            manager,
            tasks,
            WorldBounds::from(&profile.bounds),
            profile.terrain.clone(),
        )
    }

    /// The underlying manager.
    pub fn manager(&self) -> &ChunkPhysicsManager {
        &self.manager
    }

    /// Chunks with an edit waiting out its debounce.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Host loaded a chunk.
    pub fn on_chunk_load(&mut self, pos: ChunkPos) -> bool {
        if !self.profile.generate_on_load || !self.bounds.chunk_inside(pos) {
            return false;
        }
        let on_ready = self.deliver();
        self.manager.request(pos, RequestReason::Load, on_ready)
    }

    /// Host unloaded a chunk.
    pub fn on_chunk_unload(&mut self, pos: ChunkPos) {
        let revision = self.manager.unload(pos);
        self.dirty.remove(&pos);
        if self.profile.remove_on_unload {
            self.tasks
                .schedule(move |ctx: &mut PhysicsContext| ctx.remove_terrain(pos, revision));
        }
    }

    /// Host changed the block at world coordinates `x`, `y`, `z`.
    /// Rebuilding waits until the chunk has seen no edit for the debounce
    /// period.
    pub fn on_block_change(&mut self, x: i32, y: i32, z: i32) {
        if !self.profile.update_on_block_change {
            return;
        }
        let pos = ChunkPos::of_block(x, z);
        if !self.bounds.chunk_inside(pos) {
            return;
        }
        let block = DirtyChunkRegion::single_block(x - pos.min_block_x(), y, z - pos.min_block_z());
        let debounce = self.profile.update_debounce_ticks;
        self.dirty
            .entry(pos)
            .and_modify(|(region, countdown)| {
                *region = region.merge(&block);
                *countdown = debounce;
            })
            .or_insert((block, debounce));
    }

    /// Drops every cached mesh for this world and requests loaded chunks
    /// again. Call after block profiles or mesh settings change.
    pub fn invalidate_all(&mut self) -> usize {
        let cancelled = self.manager.invalidate_all();
        let mut requested = 0;
        for pos in cancelled {
            let on_ready = self.deliver();
            if self.manager.request(pos, RequestReason::Load, on_ready) {
                requested += 1;
            }
        }
        requested
    }

    /// Host tick: flushes debounced edits and runs captures. Returns the
    /// number of chunks captured.
    pub fn tick(&mut self, provider: &dyn ChunkProvider, observers: &[ChunkPos]) -> usize {
        let mut ready = Vec::new();
        for (pos, (region, countdown)) in self.dirty.iter_mut() {
            if *countdown == 0 {
                ready.push((*pos, *region));
            } else {
                *countdown -= 1;
            }
        }
        for (pos, region) in ready {
            self.dirty.remove(&pos);
            let on_ready = self.deliver();
            if !self.manager.mark_dirty(pos, region.expanded(1), on_ready) {
                debug!(chunk_x = pos.x, chunk_z = pos.z, "dirty chunk not requeued");
            }
        }
        self.manager.tick(provider, observers)
    }

    /// Cancels all terrain work.
    pub fn close(&mut self) {
        self.dirty.clear();
        self.manager.close();
    }

    fn deliver(&self) -> OnReady {
        let tasks = self.tasks.clone();
        Box::new(move |pos, revision, mesh| {
            tasks.schedule(move |ctx: &mut PhysicsContext| {
                ctx.queue_terrain_mesh(pos, revision, mesh);
            });
        })
    }
}

impl Drop for TerrainBridge {
    fn drop(&mut self) {
        self.manager.close();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    use ballast_terrain::{BlockSample, ChunkSource, MeshShape, ProfileId, Surface};

    use super::*;
    use crate::body::PhysicsBody;
    use crate::rapier_backend::RapierBackend;
    use crate::world::PhysicsWorld;

    const STONE: u32 = 1;

    fn shape(min: [f32; 3], max: [f32; 3], friction: f32) -> MeshShape {
        MeshShape {
            profile: ProfileId::EMPTY,
            density: 1.0,
            friction,
            restitution: 0.0,
            min,
            max,
        }
    }

    fn floor_mesh() -> Arc<MeshData> {
        Arc::new(MeshData {
            shapes: vec![
                shape([0.0, 0.0, 0.0], [16.0, 1.0, 8.0], 0.6),
                shape([0.0, 0.0, 8.0], [16.0, 1.0, 16.0], 0.1),
            ],
        })
    }

    #[test]
    fn test_apply_groups_by_surface_and_replaces() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let objects = ObjectManager::new();
        let mut terrain = TerrainBodies::new();
        let pos = ChunkPos::new(1, -1);

        terrain.enqueue(pos, 0, floor_mesh());
        assert_eq!(terrain.apply_pending(&mut backend, &objects, 4), 1);
        assert_eq!(terrain.chunk_bodies(pos).map(<[BodyId]>::len), Some(2));
        assert_eq!(backend.body_count(), 2);

        terrain.enqueue(pos, 0, floor_mesh());
        terrain.apply_pending(&mut backend, &objects, 4);
        assert_eq!(backend.body_count(), 2);

        // The floor spans block x 16..32 at y 0..1.
        let hits = backend.cast_ray(Vec3::new(20.0, 5.0, -12.0), Vec3::NEG_Y, 10.0);
        assert_eq!(hits.len(), 1);
        assert!((hits[0].fraction - 0.4).abs() < 1e-3);

        terrain.remove_chunk(&mut backend, pos, 1);
        assert_eq!(backend.body_count(), 0);
        assert!(terrain.chunk_bodies(pos).is_none());
    }

    #[test]
    fn test_apply_respects_limit_and_dedupes_pending() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let objects = ObjectManager::new();
        let mut terrain = TerrainBodies::new();
        terrain.enqueue(ChunkPos::new(0, 0), 0, floor_mesh());
        terrain.enqueue(ChunkPos::new(0, 0), 0, floor_mesh());
        terrain.enqueue(ChunkPos::new(1, 0), 0, floor_mesh());
        terrain.enqueue(ChunkPos::new(2, 0), 0, Arc::new(MeshData::default()));
        assert_eq!(terrain.pending_len(), 3);

        assert_eq!(terrain.apply_pending(&mut backend, &objects, 2), 2);
        assert_eq!(terrain.pending_len(), 1);
        assert_eq!(terrain.apply_pending(&mut backend, &objects, 2), 1);
        // Empty meshes build nothing.
        assert!(terrain.chunk_bodies(ChunkPos::new(2, 0)).is_none());
        assert_eq!(terrain.clear(&mut backend), 2);
        assert_eq!(backend.body_count(), 0);
    }

    #[test]
    fn test_mesh_delivered_after_unload_is_dropped() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let objects = ObjectManager::new();
        let mut terrain = TerrainBodies::new();
        let pos = ChunkPos::new(0, 0);

        terrain.enqueue(pos, 0, floor_mesh());
        terrain.apply_pending(&mut backend, &objects, 4);
        assert_eq!(backend.body_count(), 2);

        // Unload runs first, then a mesh built before it arrives.
        terrain.remove_chunk(&mut backend, pos, 1);
        assert!(!terrain.enqueue(pos, 0, floor_mesh()));
        assert_eq!(terrain.apply_pending(&mut backend, &objects, 4), 0);
        assert_eq!(backend.body_count(), 0);
        assert!(terrain.chunk_bodies(pos).is_none());
        assert_eq!(terrain.stale_count(), 1);

        // A reload requested after the unload carries its revision.
        assert!(terrain.enqueue(pos, 1, floor_mesh()));
        assert_eq!(terrain.apply_pending(&mut backend, &objects, 4), 1);
        assert_eq!(backend.body_count(), 2);
    }

    #[test]
    fn test_removal_drops_meshes_queued_before_it() {
        let mut backend = RapierBackend::new(Vec3::ZERO);
        let objects = ObjectManager::new();
        let mut terrain = TerrainBodies::new();
        let pos = ChunkPos::new(3, 3);

        assert!(terrain.enqueue(pos, 4, floor_mesh()));
        terrain.remove_chunk(&mut backend, pos, 5);
        // A late removal with an older revision keeps the newer record.
        terrain.remove_chunk(&mut backend, pos, 2);
        assert_eq!(terrain.pending_len(), 0);
        assert!(!terrain.enqueue(pos, 4, floor_mesh()));
        assert_eq!(terrain.apply_pending(&mut backend, &objects, 4), 0);
        assert_eq!(backend.body_count(), 0);
    }

    #[test]
    fn test_apply_wakes_bodies_in_chunk() {
        let mut backend = RapierBackend::new(Vec3::new(0.0, -9.81, 0.0));
        let objects = ObjectManager::new();
        let desc = BodyDesc::dynamic(ShapeDesc::Ball { radius: 0.5 }, Vec3::new(4.0, 3.0, 4.0));
        let id = backend.create_body(&desc).unwrap();
        objects.register(PhysicsBody::new(id, BodyKind::Dynamic));
        backend.drain_activation_events();

        let mut terrain = TerrainBodies::new();
        terrain.enqueue(ChunkPos::new(0, 0), 0, floor_mesh());
        terrain.apply_pending(&mut backend, &objects, 1);
        assert!(backend.is_active(id));
    }

    struct Column {
        floor: bool,
    }

    impl ChunkSource for Column {
        fn min_section_y(&self) -> i32 {
            0
        }

        fn section_count(&self) -> usize {
            1
        }

        fn block(&self, _x: usize, y: i32, _z: usize) -> BlockSample {
            if self.floor && y == 0 {
                BlockSample::of(STONE)
            } else {
                BlockSample::AIR
            }
        }
    }

    #[derive(Default)]
    struct FlatHost {
        loaded: HashMap<ChunkPos, bool>,
    }

    impl ChunkProvider for FlatHost {
        fn chunk(&self, pos: ChunkPos) -> Option<Box<dyn ChunkSource + '_>> {
            let floor = *self.loaded.get(&pos)?;
            Some(Box::new(Column { floor }))
        }
    }

    fn bridge_for(world: &PhysicsWorld, profile: TerrainProfile) -> TerrainBridge {
        let mut registry = ProfileRegistry::new();
        registry
            .register_solid(STONE, "stone", Surface::default())
            .unwrap();
        let mut config = Config::default();
        config.cache.enabled = false;
        config.generation.worker_threads = 1;
        config.physics.terrain = profile;
        TerrainBridge::from_config("overworld", &config, Arc::new(registry), world.task_sender())
    }

    fn pump_until(
        bridge: &mut TerrainBridge,
        world: &mut PhysicsWorld,
        host: &FlatHost,
        done: impl Fn(&PhysicsWorld) -> bool,
    ) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            bridge.tick(host, &[]);
            world.step();
            if done(world) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_load_builds_terrain_and_unload_removes_it() {
        let config = Config::default();
        let mut world = PhysicsWorld::with_rapier("overworld", &config);
        let mut bridge = bridge_for(&world, TerrainProfile::default());
        let pos = ChunkPos::new(0, 0);
        let mut host = FlatHost::default();
        host.loaded.insert(pos, true);

        assert!(bridge.on_chunk_load(pos));
        assert!(pump_until(&mut bridge, &mut world, &host, |w| {
            w.context().terrain().chunk_bodies(pos).is_some()
        }));

        bridge.on_chunk_unload(pos);
        host.loaded.remove(&pos);
        assert!(pump_until(&mut bridge, &mut world, &host, |w| {
            w.context().terrain().chunk_count() == 0
        }));
        assert_eq!(world.native_body_count(), 0);
    }

    #[test]
    fn test_block_edits_are_debounced() {
        let config = Config::default();
        let world = PhysicsWorld::with_rapier("overworld", &config);
        let profile = TerrainProfile {
            update_debounce_ticks: 2,
            ..TerrainProfile::default()
        };
        let mut bridge = bridge_for(&world, profile);
        let host = FlatHost::default();
        let pos = ChunkPos::new(-1, 0);

        bridge.on_block_change(-3, 10, 5);
        bridge.on_block_change(-4, 11, 5);
        assert_eq!(bridge.dirty_len(), 1);
        bridge.tick(&host, &[]);
        bridge.tick(&host, &[]);
        assert!(!bridge.manager().is_in_flight(pos));
        // A further edit restarts the wait.
        bridge.on_block_change(-3, 10, 6);
        bridge.tick(&host, &[]);
        bridge.tick(&host, &[]);
        assert_eq!(bridge.dirty_len(), 1);
        bridge.tick(&host, &[]);
        assert_eq!(bridge.dirty_len(), 0);
    }

    #[test]
    fn test_chunks_outside_bounds_are_ignored() {
        let mut config = Config::default();
        config.physics.bounds.min = [-16.0, 0.0, -16.0];
        config.physics.bounds.max = [16.0, 256.0, 16.0];
        let world = PhysicsWorld::with_rapier("overworld", &config);
        let mut registry = ProfileRegistry::new();
        registry
            .register_solid(STONE, "stone", Surface::default())
            .unwrap();
        config.cache.enabled = false;
        let mut bridge =
            TerrainBridge::from_config("overworld", &config, Arc::new(registry), world.task_sender());
        assert!(!bridge.on_chunk_load(ChunkPos::new(5, 0)));
        bridge.on_block_change(200, 4, 0);
        assert_eq!(bridge.dirty_len(), 0);
        assert!(bridge.on_chunk_load(ChunkPos::new(0, 0)));
    }
}
