//! A small flat host world: a stone floor, an ice strip, and a walled water
//! pool in chunk (1, 0).

use glam::Vec3;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use ballast_physics::{
    FluidBlock, FluidKind, FluidSource, TicketError, TicketHost, VisualId, VisualSink, VisualUpdate,
};
use ballast_terrain::{
    BlockSample, CHUNK_WIDTH, ChunkPos, ChunkProvider, ChunkSource, MaterialId, ProfileError,
    ProfileRegistry, Surface,
};

pub const STONE: MaterialId = 1;
pub const ICE: MaterialId = 2;

/// Chunks within this radius of the origin are loaded.
pub const LOAD_RADIUS: i32 = 2;

const POOL_MIN_X: i32 = 16;
const POOL_MAX_X: i32 = 31;
const POOL_MIN_Z: i32 = 0;
const POOL_MAX_Z: i32 = 15;
const POOL_TOP: i32 = 4;

pub fn block_registry() -> Result<ProfileRegistry, ProfileError> {
    let mut registry = ProfileRegistry::new();
    registry.register_solid(STONE, "stone", Surface::default())?;
    registry.register_solid(
        ICE,
        "ice",
        Surface {
            density: 0.9,
            friction: 0.02,
            restitution: 0.0,
        },
    )?;
    Ok(registry)
}

fn in_pool(x: i32, z: i32) -> bool {
    (POOL_MIN_X..=POOL_MAX_X).contains(&x) && (POOL_MIN_Z..=POOL_MAX_Z).contains(&z)
}

fn is_pool_wall(x: i32, z: i32) -> bool {
    in_pool(x, z) && (x == POOL_MIN_X || x == POOL_MAX_X || z == POOL_MIN_Z || z == POOL_MAX_Z)
}

/// Block contents of the generated terrain, before edits.
fn generated(x: i32, y: i32, z: i32) -> MaterialId {
    match y {
        0 if (-8..8).contains(&z) && x < 0 => ICE,
        0 => STONE,
        1..=POOL_TOP if is_pool_wall(x, z) => STONE,
        _ => 0,
    }
}

/// Host-thread view of the terrain, with player edits.
#[derive(Default)]
pub struct FlatWorld {
    removed: FxHashSet<(i32, i32, i32)>,
    placed: FxHashMap<(i32, i32, i32), MaterialId>,
}

impl FlatWorld {
    pub fn is_loaded(pos: ChunkPos) -> bool {
        pos.x.abs() <= LOAD_RADIUS && pos.z.abs() <= LOAD_RADIUS
    }

    pub fn loaded_chunks() -> impl Iterator<Item = ChunkPos> {
        (-LOAD_RADIUS..=LOAD_RADIUS)
            .flat_map(|x| (-LOAD_RADIUS..=LOAD_RADIUS).map(move |z| ChunkPos::new(x, z)))
    }

    pub fn block(&self, x: i32, y: i32, z: i32) -> MaterialId {
        if let Some(&material) = self.placed.get(&(x, y, z)) {
            return material;
        }
        if self.removed.contains(&(x, y, z)) {
            return 0;
        }
        generated(x, y, z)
    }

    pub fn break_block(&mut self, x: i32, y: i32, z: i32) {
        self.placed.remove(&(x, y, z));
        self.removed.insert((x, y, z));
    }

    pub fn place_block(&mut self, x: i32, y: i32, z: i32, material: MaterialId) {
        self.removed.remove(&(x, y, z));
        self.placed.insert((x, y, z), material);
    }
}

struct Column<'a> {
    world: &'a FlatWorld,
    pos: ChunkPos,
}

impl ChunkSource for Column<'_> {
    fn min_section_y(&self) -> i32 {
        0
    }

    fn section_count(&self) -> usize {
        1
    }

    fn block(&self, x: usize, y: i32, z: usize) -> BlockSample {
        let wx = self.pos.min_block_x() + x as i32;
        let wz = self.pos.min_block_z() + z as i32;
        match self.world.block(wx, y, wz) {
            0 => BlockSample::AIR,
            material => BlockSample::of(material),
        }
    }
}

impl ChunkProvider for FlatWorld {
    fn chunk(&self, pos: ChunkPos) -> Option<Box<dyn ChunkSource + '_>> {
        if !FlatWorld::is_loaded(pos) {
            return None;
        }
        Some(Box::new(Column { world: self, pos }))
    }
}

/// Fluid lookup handed to the physics thread. The pool is never edited.
pub struct Pool;

impl FluidSource for Pool {
    fn fluid(&self, x: i32, y: i32, z: i32) -> Option<FluidBlock> {
        let inside = in_pool(x, z) && !is_pool_wall(x, z);
        (inside && (1..POOL_TOP).contains(&y)).then(|| FluidBlock::source(FluidKind::Water))
    }
}

/// Centre of the pool's water surface.
pub fn pool_center() -> Vec3 {
    let half = CHUNK_WIDTH as f32 * 0.5;
    Vec3::new(POOL_MIN_X as f32 + half, POOL_TOP as f32, POOL_MIN_Z as f32 + half)
}

/// Renderer stand-in: remembers where each visual was last placed.
#[derive(Default)]
pub struct Screen {
    pub positions: FxHashMap<VisualId, Vec3>,
    pub hidden: usize,
    pub applied: u64,
}

impl VisualSink for Screen {
    fn apply(&mut self, update: &VisualUpdate) {
        self.applied += 1;
        if !update.visible {
            self.hidden += 1;
        }
        trace!(visual = update.visual.0, position = ?update.position, "visual moved");
        self.positions.insert(update.visual, update.position);
    }
}

/// Chunk tickets that only exist inside the loaded area.
#[derive(Default)]
pub struct Tickets {
    pub forced: FxHashSet<ChunkPos>,
}

impl TicketHost for Tickets {
    fn set_ticket(&mut self, pos: ChunkPos, forced: bool) -> Result<(), TicketError> {
        if !FlatWorld::is_loaded(pos) {
            return Err(TicketError::ChunkUnavailable(pos));
        }
        if forced {
            self.forced.insert(pos);
        } else {
            self.forced.remove(&pos);
        }
        debug!(chunk = %pos, forced, "chunk ticket changed");
        Ok(())
    }
}
