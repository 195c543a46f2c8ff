use super::*;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;

use crossbeam_channel::{Receiver, bounded};

use crate::cache::{CacheHeader, FORMAT_VERSION};
use crate::greedy::{GreedyMeshGenerator, MeshSettings};
use crate::profile::{BlockSample, Surface};

const STONE: u32 = 1;

struct Column {
    blocks: Vec<(usize, i32, usize)>,
}

impl ChunkSource for Column {
    fn min_section_y(&self) -> i32 {
        0
    }

    fn section_count(&self) -> usize {
        2
    }

    fn block(&self, x: usize, y: i32, z: usize) -> BlockSample {
        if self.blocks.contains(&(x, y, z)) {
            BlockSample::of(STONE)
        } else {
            BlockSample::AIR
        }
    }
}

#[derive(Default)]
struct Host {
    chunks: HashMap<ChunkPos, Vec<(usize, i32, usize)>>,
    captured: RefCell<Vec<ChunkPos>>,
}

impl Host {
    fn with_stone(pos: ChunkPos, block: (usize, i32, usize)) -> Self {
        let mut host = Self::default();
        host.chunks.insert(pos, vec![block]);
        host
    }
}

impl ChunkProvider for Host {
    fn chunk(&self, pos: ChunkPos) -> Option<Box<dyn ChunkSource + '_>> {
        let blocks = self.chunks.get(&pos)?.clone();
        self.captured.borrow_mut().push(pos);
        Some(Box::new(Column { blocks }))
    }
}

/// Counts calls and can hold each call until released.
struct GatedGenerator {
    inner: GreedyMeshGenerator,
    calls: AtomicUsize,
    gate: Option<(crossbeam_channel::Sender<()>, Receiver<()>)>,
}

impl MeshGenerator for GatedGenerator {
    fn generate(&self, snapshot: &ChunkSnapshotData) -> MeshData {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((started, release)) = &self.gate {
            let _ = started.send(());
            let _ = release.recv_timeout(Duration::from_secs(5));
        }
        self.inner.generate(snapshot)
    }

    fn settings_hash(&self) -> u64 {
        self.inner.settings_hash()
    }
}

struct Fixture {
    manager: ChunkPhysicsManager,
    generator: Arc<GatedGenerator>,
    delivered: Arc<Mutex<Vec<(ChunkPos, u64)>>>,
}

impl Fixture {
    fn new(gate: Option<(crossbeam_channel::Sender<()>, Receiver<()>)>, profile: TerrainProfile) -> Self {
        let mut registry = ProfileRegistry::new();
        registry
            .register_solid(STONE, "stone", Surface::default())
            .unwrap();
        let registry = Arc::new(registry);
        let generator = Arc::new(GatedGenerator {
            inner: GreedyMeshGenerator::new(Arc::clone(&registry), MeshSettings::default()),
            calls: AtomicUsize::new(0),
            gate,
        });
        let header = CacheHeader {
            format_version: FORMAT_VERSION,
            generator_version: generator.version(),
            world_seed: 1,
            settings_hash: generator.settings_hash(),
        };
        let cache = Arc::new(ChunkPhysicsCache::new(None, header, 64, None, None));
        let queue = Arc::new(GenerationQueue::new(2, 2, 16));
        let manager = ChunkPhysicsManager::new(
            "overworld",
            registry,
            Arc::clone(&generator) as Arc<dyn MeshGenerator>,
            cache,
            queue,
            &profile,
        );
        Self {
            manager,
            generator,
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn on_ready(&self) -> OnReady {
        let delivered = Arc::clone(&self.delivered);
        Box::new(move |pos, revision, _mesh| delivered.lock().unwrap().push((pos, revision)))
    }

    fn delivered(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    fn calls(&self) -> usize {
        self.generator.calls.load(Ordering::SeqCst)
    }
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn gate() -> (
    (crossbeam_channel::Sender<()>, Receiver<()>),
    Receiver<()>,
    crossbeam_channel::Sender<()>,
) {
    let (started_tx, started_rx) = bounded(16);
    let (release_tx, release_rx) = bounded(16);
    ((started_tx, release_rx), started_rx, release_tx)
}

#[test]
fn test_duplicate_requests_run_one_job() {
    let pos = ChunkPos::new(10, 10);
    let host = Host::with_stone(pos, (3, 4, 5));
    let (gen_gate, started, release) = gate();
    let mut fx = Fixture::new(Some(gen_gate), TerrainProfile::default());

    assert!(fx.manager.request(pos, RequestReason::Load, fx.on_ready()));
    assert!(!fx.manager.request(pos, RequestReason::Load, fx.on_ready()));
    fx.manager.tick(&host, &[]);
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    // Still running: a third request is dropped too.
    assert!(!fx.manager.request(pos, RequestReason::Dirty, fx.on_ready()));
    fx.manager.tick(&host, &[]);
    release.send(()).unwrap();

    assert!(wait_until(|| fx.delivered() == 1));
    assert!(wait_until(|| !fx.manager.is_in_flight(pos)));
    assert_eq!(fx.calls(), 1);
    assert_eq!(fx.manager.queue().metrics().submitted, 1);
    assert_eq!(fx.manager.cache().stats().writes, 1);
    assert_eq!(fx.delivered(), 1);
}

#[test]
fn test_cached_mesh_reused_without_new_job() {
    let pos = ChunkPos::new(10, 10);
    let host = Host::with_stone(pos, (0, 0, 0));
    let mut fx = Fixture::new(None, TerrainProfile::default());

    assert!(fx.manager.request(pos, RequestReason::Load, fx.on_ready()));
    fx.manager.tick(&host, &[]);
    assert!(wait_until(|| fx.delivered() == 1));
    assert!(wait_until(|| !fx.manager.is_in_flight(pos)));

    for expected in 2..=3 {
        assert!(fx.manager.request(pos, RequestReason::Load, fx.on_ready()));
        fx.manager.tick(&host, &[]);
        assert!(wait_until(|| fx.delivered() == expected));
        assert!(wait_until(|| !fx.manager.is_in_flight(pos)));
    }
    assert_eq!(fx.calls(), 1);
    assert_eq!(fx.manager.queue().metrics().submitted, 1);
    assert_eq!(fx.manager.cache().stats().memory_hits, 2);
}

#[test]
fn test_changed_blocks_miss_the_cache() {
    let pos = ChunkPos::new(0, 0);
    let mut host = Host::with_stone(pos, (1, 1, 1));
    let mut fx = Fixture::new(None, TerrainProfile::default());

    fx.manager.request(pos, RequestReason::Load, fx.on_ready());
    fx.manager.tick(&host, &[]);
    assert!(wait_until(|| fx.delivered() == 1 && !fx.manager.is_in_flight(pos)));

    host.chunks.insert(pos, vec![(1, 1, 1), (1, 20, 1)]);
    fx.manager.request(pos, RequestReason::Load, fx.on_ready());
    fx.manager.tick(&host, &[]);
    assert!(wait_until(|| fx.delivered() == 2));
    assert_eq!(fx.calls(), 2);
}

#[test]
fn test_unload_cancels_delivery_but_keeps_cache_write() {
    let pos = ChunkPos::new(2, -3);
    let host = Host::with_stone(pos, (4, 4, 4));
    let (gen_gate, started, release) = gate();
    let mut fx = Fixture::new(Some(gen_gate), TerrainProfile::default());

    fx.manager.request(pos, RequestReason::Load, fx.on_ready());
    fx.manager.tick(&host, &[]);
    started.recv_timeout(Duration::from_secs(5)).unwrap();

    fx.manager.unload(pos);
    assert!(!fx.manager.is_in_flight(pos));
    release.send(()).unwrap();

    assert!(wait_until(|| fx.manager.metrics().discarded == 1));
    assert_eq!(fx.manager.cache().stats().writes, 1);
    assert_eq!(fx.delivered(), 0);
}

#[test]
fn test_delivery_carries_revision_below_the_unload_revision() {
    let pos = ChunkPos::new(3, 3);
    let host = Host::with_stone(pos, (2, 2, 2));
    let mut fx = Fixture::new(None, TerrainProfile::default());

    fx.manager.unload(pos);
    fx.manager.request(pos, RequestReason::Load, fx.on_ready());
    fx.manager.tick(&host, &[]);
    assert!(wait_until(|| fx.delivered() == 1));
    let (_, delivered) = fx.delivered.lock().unwrap()[0];
    assert_eq!(delivered, 1);
    assert_eq!(fx.manager.revision(pos), 1);

    assert!(wait_until(|| !fx.manager.is_in_flight(pos)));
    assert_eq!(fx.manager.unload(pos), 2);
    assert!(fx.manager.revision(pos) > delivered);
}

#[test]
fn test_unload_before_capture_drops_request() {
    let pos = ChunkPos::new(1, 1);
    let host = Host::with_stone(pos, (0, 0, 0));
    let mut fx = Fixture::new(None, TerrainProfile::default());

    fx.manager.request(pos, RequestReason::Load, fx.on_ready());
    fx.manager.unload(pos);
    assert_eq!(fx.manager.tick(&host, &[]), 0);
    assert!(host.captured.borrow().is_empty());
    assert_eq!(fx.manager.metrics().queue_depth, 0);
}

#[test]
fn test_missing_chunk_clears_marker() {
    let host = Host::default();
    let mut fx = Fixture::new(None, TerrainProfile::default());
    let pos = ChunkPos::new(7, 7);

    fx.manager.request(pos, RequestReason::Load, fx.on_ready());
    assert_eq!(fx.manager.tick(&host, &[]), 0);
    assert!(!fx.manager.is_in_flight(pos));
}

#[test]
fn test_nearest_chunk_captured_first_under_budget() {
    let near = ChunkPos::new(1, 1);
    let far = ChunkPos::new(40, 40);
    let mut host = Host::default();
    host.chunks.insert(near, vec![]);
    host.chunks.insert(far, vec![]);
    let profile = TerrainProfile {
        max_capture_millis_per_tick: 0,
        ..TerrainProfile::default()
    };
    let mut fx = Fixture::new(None, profile);

    fx.manager.request(far, RequestReason::Load, fx.on_ready());
    fx.manager.request(near, RequestReason::Load, fx.on_ready());
    assert_eq!(fx.manager.tick(&host, &[ChunkPos::new(0, 0)]), 1);
    assert_eq!(*host.captured.borrow(), vec![near]);

    let metrics = fx.manager.metrics();
    assert_eq!(metrics.queue_depth, 1);
    assert_eq!(metrics.skipped_by_budget, 1);

    assert_eq!(fx.manager.tick(&host, &[ChunkPos::new(0, 0)]), 1);
    assert_eq!(*host.captured.borrow(), vec![near, far]);
}

#[test]
fn test_dirty_chunk_beats_loaded_chunk_at_same_distance() {
    let a = ChunkPos::new(3, 0);
    let b = ChunkPos::new(0, 3);
    let mut host = Host::default();
    host.chunks.insert(a, vec![]);
    host.chunks.insert(b, vec![]);
    let profile = TerrainProfile {
        max_capture_millis_per_tick: 0,
        ..TerrainProfile::default()
    };
    let mut fx = Fixture::new(None, profile);

    fx.manager.request(a, RequestReason::Load, fx.on_ready());
    fx.manager.request(b, RequestReason::Dirty, fx.on_ready());
    fx.manager.tick(&host, &[ChunkPos::new(0, 0)]);
    assert_eq!(*host.captured.borrow(), vec![b]);
}

#[test]
fn test_mark_dirty_regenerates() {
    let pos = ChunkPos::new(5, 5);
    let mut host = Host::with_stone(pos, (8, 8, 8));
    let mut fx = Fixture::new(None, TerrainProfile::default());

    fx.manager.request(pos, RequestReason::Load, fx.on_ready());
    fx.manager.tick(&host, &[]);
    assert!(wait_until(|| fx.delivered() == 1 && !fx.manager.is_in_flight(pos)));

    host.chunks.insert(pos, vec![]);
    let region = DirtyChunkRegion::single_block(8, 8, 8).expanded(1);
    assert!(fx.manager.mark_dirty(pos, region, fx.on_ready()));
    fx.manager.tick(&host, &[]);
    assert!(wait_until(|| fx.delivered() == 2));
    assert_eq!(fx.calls(), 2);
}

#[test]
fn test_invalidate_all_returns_cancelled_chunks() {
    let (gen_gate, started, release) = gate();
    let mut host = Host::default();
    let running = ChunkPos::new(0, 0);
    let waiting = ChunkPos::new(9, 9);
    host.chunks.insert(running, vec![(0, 0, 0)]);
    host.chunks.insert(waiting, vec![]);
    let profile = TerrainProfile {
        max_capture_millis_per_tick: 0,
        ..TerrainProfile::default()
    };
    let mut fx = Fixture::new(Some(gen_gate), profile);

    fx.manager.request(running, RequestReason::Load, fx.on_ready());
    fx.manager.tick(&host, &[running]);
    started.recv_timeout(Duration::from_secs(5)).unwrap();
    fx.manager.request(waiting, RequestReason::Load, fx.on_ready());

    let mut cancelled = fx.manager.invalidate_all();
    cancelled.sort();
    assert_eq!(cancelled, vec![running, waiting]);
    assert_eq!(fx.manager.metrics().in_flight, 0);
    release.send(()).unwrap();
    assert!(wait_until(|| fx.manager.metrics().discarded == 1));
    assert_eq!(fx.delivered(), 0);
}

#[test]
fn test_close_rejects_further_requests() {
    let mut fx = Fixture::new(None, TerrainProfile::default());
    fx.manager.close();
    assert!(!fx.manager.request(ChunkPos::new(0, 0), RequestReason::Load, fx.on_ready()));
}
