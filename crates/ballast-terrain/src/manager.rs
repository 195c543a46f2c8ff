//! Chunk physics manager: request → capture → cache → generate → deliver.
//!
//! Requests are de-duplicated per chunk: while a chunk has a pending or
//! running request, further requests for it are dropped and only the first
//! caller's continuation runs. Captures happen on the calling (host) thread
//! inside [`ChunkPhysicsManager::tick`] under a per-tick time budget, closest
//! chunks first. Cache reads happen on a single IO thread; cache misses go to
//! the [`GenerationQueue`]. Each chunk carries a revision that every
//! invalidation bumps, and a result whose revision is stale is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, unbounded};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info, warn};

use ballast_config::TerrainProfile;

use crate::cache::{CachedChunkPhysicsData, ChunkPhysicsCache};
use crate::capture::{ChunkSnapshotData, ChunkSource};
use crate::coords::{ChunkKey, ChunkPos};
use crate::dirty_region::DirtyChunkRegion;
use crate::generation_queue::GenerationQueue;
use crate::greedy::{MeshData, MeshGenerator};
use crate::profile::ProfileRegistry;

/// Continuation invoked once with the finished mesh and the chunk revision
/// it was built for. Runs on the IO thread or a terrain worker, never on the
/// host thread.
pub type OnReady = Box<dyn FnOnce(ChunkPos, u64, Arc<MeshData>) + Send + 'static>;

type IoJob = Box<dyn FnOnce() + Send + 'static>;

const DIRTY_BASE_SCORE: i64 = 0;
const LOAD_BASE_SCORE: i64 = 10_000;
const NO_OBSERVER_DISTANCE: i64 = 4096;
const AGE_WEIGHT: i64 = 2;

/// Host access to loaded chunk columns.
pub trait ChunkProvider {
    /// The loaded column at `pos`, or `None` if it is not loaded.
    fn chunk(&self, pos: ChunkPos) -> Option<Box<dyn ChunkSource + '_>>;
}

/// Why a chunk was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestReason {
    /// The host loaded the chunk.
    Load,
    /// Blocks in the chunk changed.
    Dirty,
}

impl RequestReason {
    fn base_score(self) -> i64 {
        match self {
            RequestReason::Dirty => DIRTY_BASE_SCORE,
            RequestReason::Load => LOAD_BASE_SCORE,
        }
    }
}

/// Capture-side counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CaptureMetrics {
    /// Requests waiting for capture.
    pub queue_depth: usize,
    /// Chunks with a pending or running request.
    pub in_flight: usize,
    /// Mean capture time.
    pub avg_capture_ms: f64,
    /// Requests left over because a tick's capture budget ran out.
    pub skipped_by_budget: u64,
    /// Snapshots captured so far.
    pub captures: u64,
    /// Results dropped as cancelled or stale.
    pub discarded: u64,
}

struct InFlight {
    revision: u64,
    cancelled: Arc<AtomicBool>,
}

struct PendingCapture {
    pos: ChunkPos,
    reason: RequestReason,
    queued_at: Instant,
    on_ready: OnReady,
}

impl PendingCapture {
    fn score(&self, observers: &[ChunkPos], now: Instant) -> i64 {
        let distance = observers
            .iter()
            .map(|o| o.distance_sq(self.pos))
            .min()
            .unwrap_or(NO_OBSERVER_DISTANCE);
        let age_ms = now.saturating_duration_since(self.queued_at).as_millis() as i64;
        self.reason.base_score() + distance - age_ms * AGE_WEIGHT
    }
}

/// State shared with the IO thread and terrain workers.
struct Shared {
    world: Arc<str>,
    cache: Arc<ChunkPhysicsCache>,
    generator: Arc<dyn MeshGenerator>,
    in_flight: DashMap<ChunkPos, InFlight>,
    revisions: DashMap<ChunkPos, u64>,
    discarded: AtomicU64,
}

impl Shared {
    fn revision(&self, pos: ChunkPos) -> u64 {
        self.revisions.get(&pos).map_or(0, |r| *r)
    }

    fn bump_revision(&self, pos: ChunkPos) -> u64 {
        let mut entry = self.revisions.entry(pos).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Clears the in-flight marker if it still belongs to `revision`.
    fn finish(&self, pos: ChunkPos, revision: u64) {
        self.in_flight.remove_if(&pos, |_, f| f.revision == revision);
    }

    /// Delivers unless cancelled or superseded.
    fn deliver(
        &self,
        pos: ChunkPos,
        revision: u64,
        cancelled: &AtomicBool,
        mesh: Arc<MeshData>,
        on_ready: OnReady,
    ) {
        let current = !cancelled.load(Ordering::Relaxed) && self.revision(pos) == revision;
        self.finish(pos, revision);
        if current {
            on_ready(pos, revision, mesh);
        } else {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            debug!(world = %self.world, chunk_x = pos.x, chunk_z = pos.z, "dropping stale chunk mesh");
        }
    }
}

struct IoThread {
    sender: Sender<IoJob>,
    handle: JoinHandle<()>,
}

/// Orchestrates collision generation for one host world.
pub struct ChunkPhysicsManager {
    shared: Arc<Shared>,
    registry: Arc<ProfileRegistry>,
    queue: Arc<GenerationQueue>,
    io: Option<IoThread>,
    pending: Vec<PendingCapture>,
    fast_capture: bool,
    capture_budget: Duration,
    captures: u64,
    capture_time: Duration,
    skipped_by_budget: u64,
}

impl ChunkPhysicsManager {
    /// Creates a manager and starts its cache-IO thread.
    pub fn new(
        world: impl Into<Arc<str>>,
        registry: Arc<ProfileRegistry>,
        generator: Arc<dyn MeshGenerator>,
        cache: Arc<ChunkPhysicsCache>,
        queue: Arc<GenerationQueue>,
        profile: &TerrainProfile,
    ) -> Self {
        let world: Arc<str> = world.into();
        let (sender, receiver) = unbounded::<IoJob>();
        let io = std::thread::Builder::new()
            .name(format!("ballast-cache-io-{world}"))
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job();
                }
            });
        let io = match io {
            Ok(handle) => Some(IoThread { sender, handle }),
            Err(e) => {
                warn!(world = %world, "failed to spawn cache IO thread: {e}");
                None
            }
        };

        Self {
            shared: Arc::new(Shared {
                world,
                cache,
                generator,
                in_flight: DashMap::new(),
                revisions: DashMap::new(),
                discarded: AtomicU64::new(0),
            }),
            registry,
            queue,
            io,
            pending: Vec::new(),
            fast_capture: profile.fast_capture,
            capture_budget: Duration::from_millis(u64::from(profile.max_capture_millis_per_tick)),
            captures: 0,
            capture_time: Duration::ZERO,
            skipped_by_budget: 0,
        }
    }

    /// Host world this manager serves.
    pub fn world(&self) -> &Arc<str> {
        &self.shared.world
    }

    /// Queues a chunk for collision generation.
    ///
    /// Returns `false` (dropping `on_ready`) if the chunk already has a
    /// pending or running request, or if the manager is closed.
    pub fn request(&mut self, pos: ChunkPos, reason: RequestReason, on_ready: OnReady) -> bool {
        if self.io.is_none() {
            return false;
        }
        let revision = self.shared.revision(pos);
        match self.shared.in_flight.entry(pos) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    revision,
                    cancelled: Arc::new(AtomicBool::new(false)),
                });
            }
        }
        self.pending.push(PendingCapture {
            pos,
            reason,
            queued_at: Instant::now(),
            on_ready,
        });
        true
    }

    /// Returns `true` if `pos` has a pending or running request.
    pub fn is_in_flight(&self, pos: ChunkPos) -> bool {
        self.shared.in_flight.contains_key(&pos)
    }

    /// Captures queued chunks, closest to `observers` first, until this
    /// tick's capture budget is spent. At least one capture runs per call.
    /// Returns the number of chunks captured.
    pub fn tick(&mut self, provider: &dyn ChunkProvider, observers: &[ChunkPos]) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let now = Instant::now();
        self.pending
            .sort_by_cached_key(|p| std::cmp::Reverse(p.score(observers, now)));

        let started = Instant::now();
        let mut captured = 0;
        while let Some(request) = self.pending.pop() {
            if captured > 0 && started.elapsed() >= self.capture_budget {
                self.pending.push(request);
                self.skipped_by_budget += self.pending.len() as u64;
                break;
            }
            if self.capture_and_dispatch(provider, request) {
                captured += 1;
            }
        }
        captured
    }

    fn capture_and_dispatch(&mut self, provider: &dyn ChunkProvider, request: PendingCapture) -> bool {
        let PendingCapture { pos, on_ready, .. } = request;
        let Some((revision, cancelled)) = self
            .shared
            .in_flight
            .get(&pos)
            .map(|f| (f.revision, Arc::clone(&f.cancelled)))
        else {
            return false;
        };
        let Some(source) = provider.chunk(pos) else {
            debug!(world = %self.shared.world, chunk_x = pos.x, chunk_z = pos.z, "chunk not loaded, dropping request");
            self.shared.finish(pos, revision);
            return false;
        };

        let start = Instant::now();
        let snapshot = if self.fast_capture {
            ChunkSnapshotData::capture_fast(pos, source.as_ref(), &self.registry)
        } else {
            ChunkSnapshotData::capture(pos, source.as_ref(), &self.registry)
        };
        drop(source);
        self.capture_time += start.elapsed();
        self.captures += 1;

        let Some(io) = &self.io else {
            self.shared.finish(pos, revision);
            return true;
        };
        let shared = Arc::clone(&self.shared);
        let queue = Arc::clone(&self.queue);
        let job: IoJob = Box::new(move || {
            lookup_or_generate(shared, queue, snapshot, revision, cancelled, on_ready);
        });
        if io.sender.send(job).is_err() {
            self.shared.finish(pos, revision);
        }
        true
    }

    /// Current revision of `pos`. Meshes delivered for an older revision
    /// are stale.
    pub fn revision(&self, pos: ChunkPos) -> u64 {
        self.shared.revision(pos)
    }

    /// Cancels work for an unloaded chunk and forgets its pending request.
    /// Returns the new revision; any mesh already handed out for `pos` has
    /// a lower one.
    pub fn unload(&mut self, pos: ChunkPos) -> u64 {
        self.pending.retain(|p| p.pos != pos);
        let revision = self.shared.bump_revision(pos);
        if let Some((_, entry)) = self.shared.in_flight.remove(&pos) {
            entry.cancelled.store(true, Ordering::Relaxed);
        }
        revision
    }

    /// Drops the cached mesh for `pos` and cancels its running request.
    pub fn invalidate(&mut self, pos: ChunkPos) {
        self.pending.retain(|p| p.pos != pos);
        self.shared.bump_revision(pos);
        if let Some((_, entry)) = self.shared.in_flight.remove(&pos) {
            entry.cancelled.store(true, Ordering::Relaxed);
        }
        self.shared
            .cache
            .invalidate(&ChunkKey::at(&self.shared.world, pos));
    }

    /// Invalidates the chunk owning `region` and requests regeneration.
    pub fn mark_dirty(&mut self, pos: ChunkPos, region: DirtyChunkRegion, on_ready: OnReady) -> bool {
        debug!(
            world = %self.shared.world,
            chunk_x = pos.x,
            chunk_z = pos.z,
            sections = ?region.section_span(),
            "chunk marked dirty"
        );
        self.invalidate(pos);
        self.request(pos, RequestReason::Dirty, on_ready)
    }

    /// Drops every cached mesh for this world and cancels all requests.
    /// Returns the chunks whose requests were cancelled so the caller can
    /// request them again.
    pub fn invalidate_all(&mut self) -> Vec<ChunkPos> {
        let mut cancelled: Vec<ChunkPos> = self.pending.drain(..).map(|p| p.pos).collect();
        let running: Vec<ChunkPos> = self.shared.in_flight.iter().map(|e| *e.key()).collect();
        for pos in running {
            self.shared.bump_revision(pos);
            if let Some((_, entry)) = self.shared.in_flight.remove(&pos) {
                entry.cancelled.store(true, Ordering::Relaxed);
            }
            if !cancelled.contains(&pos) {
                cancelled.push(pos);
            }
        }
        self.shared.cache.invalidate_world(&self.shared.world);
        info!(world = %self.shared.world, cancelled = cancelled.len(), "terrain cache invalidated");
        cancelled
    }

    /// Cancels everything and stops the IO thread. Further requests fail.
    pub fn close(&mut self) {
        self.pending.clear();
        for entry in self.shared.in_flight.iter() {
            entry.cancelled.store(true, Ordering::Relaxed);
        }
        self.shared.in_flight.clear();
        if let Some(io) = self.io.take() {
            drop(io.sender);
            if io.handle.join().is_err() {
                warn!(world = %self.shared.world, "cache IO thread exited by panic");
            }
        }
    }

    /// Current capture counters.
    pub fn metrics(&self) -> CaptureMetrics {
        let avg_capture_ms = if self.captures == 0 {
            0.0
        } else {
            self.capture_time.as_secs_f64() * 1000.0 / self.captures as f64
        };
        CaptureMetrics {
            queue_depth: self.pending.len(),
            in_flight: self.shared.in_flight.len(),
            avg_capture_ms,
            skipped_by_budget: self.skipped_by_budget,
            captures: self.captures,
            discarded: self.shared.discarded.load(Ordering::Relaxed),
        }
    }

    /// The cache this manager reads and writes.
    pub fn cache(&self) -> &Arc<ChunkPhysicsCache> {
        &self.shared.cache
    }

    /// The queue running generation jobs.
    pub fn queue(&self) -> &Arc<GenerationQueue> {
        &self.queue
    }
}

impl Drop for ChunkPhysicsManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Runs on the IO thread.
fn lookup_or_generate(
    shared: Arc<Shared>,
    queue: Arc<GenerationQueue>,
    snapshot: ChunkSnapshotData,
    revision: u64,
    cancelled: Arc<AtomicBool>,
    on_ready: OnReady,
) {
    let pos = snapshot.pos();
    if cancelled.load(Ordering::Relaxed) {
        shared.finish(pos, revision);
        return;
    }

    let key = ChunkKey::at(&shared.world, pos);
    if let Some(cached) = shared.cache.get(&key) {
        if cached.matches(snapshot.fingerprints()) {
            let mesh = Arc::clone(&cached.mesh);
            shared.deliver(pos, revision, &cancelled, mesh, on_ready);
            return;
        }
        debug!(
            chunk = %key,
            mismatched = ?cached.mismatched_sections(snapshot.fingerprints()),
            "cached mesh out of date"
        );
    }

    let worker_shared = Arc::clone(&shared);
    let flag = Arc::clone(&cancelled);
    let submitted = queue.submit_with_cancel(Arc::clone(&cancelled), move || {
        let start = Instant::now();
        let mesh = Arc::new(worker_shared.generator.generate(&snapshot));
        let record = CachedChunkPhysicsData::new(snapshot.fingerprints().to_vec(), Arc::clone(&mesh));
        // Written even when cancelled; the fingerprints keep it honest.
        if let Err(e) = worker_shared.cache.put(&key, record) {
            warn!(chunk = %key, "failed to write terrain cache: {e}");
        }
        debug!(
            chunk = %key,
            shapes = mesh.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "chunk mesh generated"
        );
        worker_shared.deliver(pos, revision, &flag, mesh, on_ready);
    });

    if let Err(e) = submitted {
        warn!(world = %shared.world, chunk_x = pos.x, chunk_z = pos.z, "failed to queue generation: {e}");
        shared.finish(pos, revision);
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
