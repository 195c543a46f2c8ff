//! Chunk coordinates and world-qualified chunk keys.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Horizontal size of a chunk in blocks.
pub const CHUNK_WIDTH: usize = 16;

/// Column coordinate of a chunk (block coordinate `>> 4`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPos {
    /// Chunk X.
    pub x: i32,
    /// Chunk Z.
    pub z: i32,
}

impl ChunkPos {
    /// Creates a chunk position.
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Returns the chunk containing world position `(x, z)`.
    pub fn containing(x: f64, z: f64) -> Self {
        Self {
            x: (x.floor() as i32) >> 4,
            z: (z.floor() as i32) >> 4,
        }
    }

    /// Returns the chunk containing block `(x, z)`.
    pub fn of_block(x: i32, z: i32) -> Self {
        Self {
            x: x >> 4,
            z: z >> 4,
        }
    }

    /// World X of the chunk's first block column.
    pub fn min_block_x(self) -> i32 {
        self.x << 4
    }

    /// World Z of the chunk's first block column.
    pub fn min_block_z(self) -> i32 {
        self.z << 4
    }

    /// Squared distance in chunks.
    pub fn distance_sq(self, other: ChunkPos) -> i64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dz = i64::from(self.z) - i64::from(other.z);
        dx * dx + dz * dz
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.x, self.z)
    }
}

/// A chunk position qualified by host world name. Used as the cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    /// Host world name.
    pub world: Arc<str>,
    /// Chunk position.
    pub pos: ChunkPos,
}

impl ChunkKey {
    /// Creates a key.
    pub fn new(world: impl Into<Arc<str>>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            pos: ChunkPos::new(x, z),
        }
    }

    /// Creates a key from an existing world name handle.
    pub fn at(world: &Arc<str>, pos: ChunkPos) -> Self {
        Self {
            world: Arc::clone(world),
            pos,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.world, self.pos)
    }
}
