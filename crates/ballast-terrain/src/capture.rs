//! Chunk snapshot capture and per-section content fingerprints.
//!
//! A [`ChunkSnapshotData`] is an immutable copy of one chunk column's block
//! profiles, taken on the host thread so generation can run on a worker after
//! the chunk itself is gone. Every 16-block section gets a 64-bit fingerprint;
//! the cache compares fingerprints instead of diffing block content.
//!
//! ## Grid layout
//!
//! Profiles are stored at `(local_y << 8) | (z << 4) | x`, so each section is
//! a contiguous run of [`SECTION_VOLUME`] entries.

use crate::coords::{CHUNK_WIDTH, ChunkPos};
use crate::profile::{BlockSample, ProfileId, ProfileRegistry};

/// Height of a section in blocks.
pub const SECTION_HEIGHT: usize = 16;

/// Blocks in one horizontal layer of a chunk.
pub const LAYER_AREA: usize = CHUNK_WIDTH * CHUNK_WIDTH;

/// Blocks in one section.
pub const SECTION_VOLUME: usize = LAYER_AREA * SECTION_HEIGHT;

const FP_SEED: u64 = 0x9E37_79B9_7F4A_7C15;
const FP_MUL: u64 = 0xD6E8_FEB8_6659_FD93;

/// Read-only access to one chunk column, provided by the host.
pub trait ChunkSource {
    /// Section index of the lowest section (world Y `>> 4`).
    fn min_section_y(&self) -> i32;

    /// Number of vertical sections.
    fn section_count(&self) -> usize;

    /// Block at local `x`/`z` (0..16) and world `y`.
    fn block(&self, x: usize, y: i32, z: usize) -> BlockSample;

    /// Returns `true` if the host knows the section holds only air.
    /// Used by [`ChunkSnapshotData::capture_fast`] to skip whole sections.
    fn section_is_empty(&self, _section_y: i32) -> bool {
        false
    }
}

/// Immutable per-chunk profile grid plus section fingerprints.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkSnapshotData {
    pos: ChunkPos,
    min_section_y: i32,
    section_count: usize,
    profiles: Box<[ProfileId]>,
    section_has_blocks: Box<[bool]>,
    fingerprints: Box<[u64]>,
}

impl ChunkSnapshotData {
    /// Captures every block of the column.
    pub fn capture(pos: ChunkPos, source: &dyn ChunkSource, registry: &ProfileRegistry) -> Self {
        Self::capture_with(pos, source, registry, false)
    }

    /// Captures the column, skipping sections the host reports as empty.
    pub fn capture_fast(
        pos: ChunkPos,
        source: &dyn ChunkSource,
        registry: &ProfileRegistry,
    ) -> Self {
        Self::capture_with(pos, source, registry, true)
    }

    fn capture_with(
        pos: ChunkPos,
        source: &dyn ChunkSource,
        registry: &ProfileRegistry,
        skip_empty: bool,
    ) -> Self {
        let min_section_y = source.min_section_y();
        let section_count = source.section_count();
        let mut profiles = vec![ProfileId::EMPTY; section_count * SECTION_VOLUME];

        for section in 0..section_count {
            let section_y = min_section_y + section as i32;
            if skip_empty && source.section_is_empty(section_y) {
                continue;
            }
            let base_y = section_y << 4;
            for dy in 0..SECTION_HEIGHT {
                let local_y = section * SECTION_HEIGHT + dy;
                let world_y = base_y + dy as i32;
                for z in 0..CHUNK_WIDTH {
                    for x in 0..CHUNK_WIDTH {
                        profiles[flatten(x, local_y, z)] =
                            registry.resolve(source.block(x, world_y, z));
                    }
                }
            }
        }

        Self::from_profiles(pos, min_section_y, profiles)
    }

    /// Builds a snapshot from an already-resolved profile grid.
    ///
    /// `profiles.len()` is rounded down to whole sections.
    pub fn from_profiles(pos: ChunkPos, min_section_y: i32, mut profiles: Vec<ProfileId>) -> Self {
        let section_count = profiles.len() / SECTION_VOLUME;
        profiles.truncate(section_count * SECTION_VOLUME);

        let mut section_has_blocks = Vec::with_capacity(section_count);
        let mut fingerprints = Vec::with_capacity(section_count);
        for (i, section) in profiles.chunks_exact(SECTION_VOLUME).enumerate() {
            section_has_blocks.push(section.iter().any(|p| !p.is_empty()));
            fingerprints.push(section_fingerprint(min_section_y + i as i32, section));
        }

        Self {
            pos,
            min_section_y,
            section_count,
            profiles: profiles.into_boxed_slice(),
            section_has_blocks: section_has_blocks.into_boxed_slice(),
            fingerprints: fingerprints.into_boxed_slice(),
        }
    }

    /// Chunk position of the snapshot.
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    /// Section index of the lowest section.
    pub fn min_section_y(&self) -> i32 {
        self.min_section_y
    }

    /// Number of sections.
    pub fn section_count(&self) -> usize {
        self.section_count
    }

    /// World Y of the lowest block.
    pub fn min_height(&self) -> i32 {
        self.min_section_y << 4
    }

    /// Column height in blocks.
    pub fn height(&self) -> usize {
        self.section_count * SECTION_HEIGHT
    }

    /// Profile at local `x`, column-relative `local_y`, local `z`.
    pub fn profile(&self, x: usize, local_y: usize, z: usize) -> ProfileId {
        self.profiles[flatten(x, local_y, z)]
    }

    /// Returns `true` if section `index` holds any non-empty profile.
    pub fn section_has_blocks(&self, index: usize) -> bool {
        self.section_has_blocks[index]
    }

    /// One fingerprint per section, lowest first.
    pub fn fingerprints(&self) -> &[u64] {
        &self.fingerprints
    }

    /// Profiles of section `index` in grid order.
    pub fn section_profiles(&self, index: usize) -> &[ProfileId] {
        let start = index * SECTION_VOLUME;
        &self.profiles[start..start + SECTION_VOLUME]
    }
}

#[inline]
fn flatten(x: usize, local_y: usize, z: usize) -> usize {
    (local_y << 8) | (z << 4) | x
}

/// Order-sensitive 64-bit fingerprint of one section, seeded with its Y.
///
/// Every step of the chain is a bijection of the running state, so two
/// sections that differ in exactly one cell always fingerprint differently.
pub fn section_fingerprint(section_y: i32, profiles: &[ProfileId]) -> u64 {
    let mut h = FP_SEED ^ (i64::from(section_y) as u64).wrapping_mul(FP_MUL);
    for (i, id) in profiles.iter().enumerate() {
        h ^= u64::from(id.0) | ((i as u64) << 16);
        h = h.rotate_left(29).wrapping_mul(FP_MUL);
        h ^= h >> 32;
    }
    avalanche(h ^ profiles.len() as u64)
}

/// 64-bit finalizer (MurmurHash3 fmix64).
#[inline]
fn avalanche(mut z: u64) -> u64 {
    z ^= z >> 33;
    z = z.wrapping_mul(0xFF51_AFD7_ED55_8CCD);
    z ^= z >> 33;
    z = z.wrapping_mul(0xC4CE_B9FE_1A85_EC53);
    z ^ (z >> 33)
}
