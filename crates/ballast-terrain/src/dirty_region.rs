//! Dirty regions: the part of a chunk touched by block edits.
//!
//! A region stores chunk-local X/Z bounds, world Y bounds, and the section
//! span those Y bounds fall in. Edits merge into one region per chunk; the
//! region is expanded by a margin before use so boundary faces are covered.

use std::ops::RangeInclusive;

use thiserror::Error;

const LOCAL_MAX: i32 = 15;

/// Errors constructing a [`DirtyChunkRegion`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirtyRegionError {
    /// A minimum coordinate exceeds its maximum.
    #[error("dirty region min {min:?} exceeds max {max:?}")]
    Inverted {
        /// Requested minimum.
        min: [i32; 3],
        /// Requested maximum.
        max: [i32; 3],
    },
}

/// Axis-aligned edited range inside one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyChunkRegion {
    min_section_y: i32,
    max_section_y: i32,
    min: [i32; 3],
    max: [i32; 3],
}

impl DirtyChunkRegion {
    /// Creates a region from local X/Z and world Y bounds (inclusive).
    pub fn new(min: [i32; 3], max: [i32; 3]) -> Result<Self, DirtyRegionError> {
        if (0..3).any(|a| min[a] > max[a]) {
            return Err(DirtyRegionError::Inverted { min, max });
        }
        Ok(Self {
            min_section_y: min[1] >> 4,
            max_section_y: max[1] >> 4,
            min,
            max,
        })
    }

    /// A region covering one block.
    pub fn single_block(x: i32, y: i32, z: i32) -> Self {
        let p = [x, y, z];
        Self {
            min_section_y: y >> 4,
            max_section_y: y >> 4,
            min: p,
            max: p,
        }
    }

    /// Smallest region containing both `self` and `other`.
    pub fn merge(&self, other: &Self) -> Self {
        let mut min = [0; 3];
        let mut max = [0; 3];
        for a in 0..3 {
            min[a] = self.min[a].min(other.min[a]);
            max[a] = self.max[a].max(other.max[a]);
        }
        Self {
            min_section_y: self.min_section_y.min(other.min_section_y),
            max_section_y: self.max_section_y.max(other.max_section_y),
            min,
            max,
        }
    }

    /// Grows the region by `blocks` on every side.
    ///
    /// X/Z stay inside the chunk (0..=15); Y is left unclamped because the
    /// host's height limits are not known here. The section span is
    /// recomputed from the grown Y bounds.
    pub fn expanded(&self, blocks: i32) -> Self {
        let b = blocks.max(0);
        let min = [
            (self.min[0] - b).clamp(0, LOCAL_MAX),
            self.min[1] - b,
            (self.min[2] - b).clamp(0, LOCAL_MAX),
        ];
        let max = [
            (self.max[0] + b).clamp(0, LOCAL_MAX),
            self.max[1] + b,
            (self.max[2] + b).clamp(0, LOCAL_MAX),
        ];
        Self {
            min_section_y: min[1] >> 4,
            max_section_y: max[1] >> 4,
            min,
            max,
        }
    }

    /// Sections touched by the region.
    pub fn section_span(&self) -> RangeInclusive<i32> {
        self.min_section_y..=self.max_section_y
    }

    /// Minimum corner (local x, world y, local z).
    pub fn min(&self) -> [i32; 3] {
        self.min
    }

    /// Maximum corner (local x, world y, local z).
    pub fn max(&self) -> [i32; 3] {
        self.max
    }

    /// Returns `true` if the block lies inside the region.
    pub fn contains(&self, x: i32, y: i32, z: i32) -> bool {
        let p = [x, y, z];
        (0..3).all(|a| p[a] >= self.min[a] && p[a] <= self.max[a])
    }
}
