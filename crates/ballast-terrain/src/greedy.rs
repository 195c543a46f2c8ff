//! Greedy collision mesher: merges same-profile full cubes into large boxes.
//!
//! Each layer of the column is swept in X then Z to form maximal rectangles.
//! With vertical merging enabled, a rectangle identical to one in the layer
//! below extends that box upward instead of starting a new one, up to
//! `max_vertical_size` blocks. Partial profiles (slabs, multi-box shapes) are
//! never merged; they are emitted per block, one shape per unit box.

use std::hash::Hasher;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHasher};
use serde::{Deserialize, Serialize};

use ballast_config::TerrainProfile;

use crate::capture::{ChunkSnapshotData, LAYER_AREA, SECTION_HEIGHT};
use crate::coords::CHUNK_WIDTH;
use crate::profile::{BlockProfile, ProfileId, ProfileRegistry};

/// Bumped whenever the mesher's output for the same input changes.
pub const GENERATOR_VERSION: u32 = 2;

/// One collision box in chunk-local X/Z and world Y.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshShape {
    /// Profile the box was built from.
    pub profile: ProfileId,
    /// Density of the profile.
    pub density: f32,
    /// Friction of the profile.
    pub friction: f32,
    /// Restitution of the profile.
    pub restitution: f32,
    /// Minimum corner.
    pub min: [f32; 3],
    /// Maximum corner.
    pub max: [f32; 3],
}

impl MeshShape {
    /// Half extents of the box.
    pub fn half_extents(&self) -> [f32; 3] {
        [
            (self.max[0] - self.min[0]) * 0.5,
            (self.max[1] - self.min[1]) * 0.5,
            (self.max[2] - self.min[2]) * 0.5,
        ]
    }

    /// Center of the box.
    pub fn center(&self) -> [f32; 3] {
        [
            (self.max[0] + self.min[0]) * 0.5,
            (self.max[1] + self.min[1]) * 0.5,
            (self.max[2] + self.min[2]) * 0.5,
        ]
    }
}

/// Collision geometry for one chunk column.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    /// Boxes in no particular order.
    pub shapes: Vec<MeshShape>,
}

impl MeshData {
    /// Returns `true` if there is no collision geometry.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Number of boxes.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Groups boxes by `(friction, restitution)` so each group can become a
    /// single static body.
    pub fn group_by_surface(&self) -> Vec<((f32, f32), Vec<&MeshShape>)> {
        let mut groups: Vec<((f32, f32), Vec<&MeshShape>)> = Vec::new();
        for shape in &self.shapes {
            let key = (shape.friction, shape.restitution);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(shape),
                None => groups.push((key, vec![shape])),
            }
        }
        groups
    }
}

/// Converts a snapshot into collision geometry.
///
/// Implementations run on generation workers and must not touch host state.
pub trait MeshGenerator: Send + Sync {
    /// Builds the mesh for `snapshot`.
    fn generate(&self, snapshot: &ChunkSnapshotData) -> MeshData;

    /// Stable hash of every setting that affects the output.
    fn settings_hash(&self) -> u64;

    /// Version recorded in cache files.
    fn version(&self) -> u32 {
        GENERATOR_VERSION
    }
}

/// Settings for [`GreedyMeshGenerator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshSettings {
    /// Merge identical rectangles across consecutive layers.
    pub vertical_merging: bool,
    /// Upper bound on a vertically merged box height.
    pub max_vertical_size: u32,
}

impl MeshSettings {
    /// Stable FxHash of the settings.
    pub fn settings_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write_u32(GENERATOR_VERSION);
        hasher.write_u8(u8::from(self.vertical_merging));
        hasher.write_u32(self.max_vertical_size);
        hasher.finish()
    }
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            vertical_merging: true,
            max_vertical_size: 64,
        }
    }
}

impl From<&TerrainProfile> for MeshSettings {
    fn from(profile: &TerrainProfile) -> Self {
        Self {
            vertical_merging: profile.vertical_merging,
            max_vertical_size: profile.max_vertical_size.max(1),
        }
    }
}

/// Greedy box mesher backed by a [`ProfileRegistry`].
pub struct GreedyMeshGenerator {
    registry: Arc<ProfileRegistry>,
    settings: MeshSettings,
}

/// A rectangle in one layer: `(x0, z0, width, depth)`.
type Rect = (usize, usize, usize, usize);

impl GreedyMeshGenerator {
    /// Creates a mesher.
    pub fn new(registry: Arc<ProfileRegistry>, settings: MeshSettings) -> Self {
        Self { registry, settings }
    }

    /// Sweeps one layer, returning merged full-cube rectangles and emitting
    /// partial-profile boxes straight into `out`.
    fn sweep_layer(
        &self,
        snapshot: &ChunkSnapshotData,
        local_y: usize,
        world_y: f32,
        out: &mut Vec<MeshShape>,
    ) -> Vec<(Rect, ProfileId)> {
        let mut visited = [false; LAYER_AREA];
        let mut rects = Vec::new();

        for z in 0..CHUNK_WIDTH {
            for x in 0..CHUNK_WIDTH {
                if visited[z * CHUNK_WIDTH + x] {
                    continue;
                }
                let id = snapshot.profile(x, local_y, z);
                if id.is_empty() {
                    continue;
                }
                let Some(profile) = self.registry.get(id) else {
                    continue;
                };
                if !profile.is_full_cube() {
                    visited[z * CHUNK_WIDTH + x] = true;
                    emit_partial(profile, x, world_y, z, out);
                    continue;
                }

                // Extend width along x.
                let mut w = 1;
                while x + w < CHUNK_WIDTH
                    && !visited[z * CHUNK_WIDTH + x + w]
                    && snapshot.profile(x + w, local_y, z) == id
                {
                    w += 1;
                }

                // Extend depth along z.
                let mut d = 1;
                'outer: while z + d < CHUNK_WIDTH {
                    for dx in 0..w {
                        if visited[(z + d) * CHUNK_WIDTH + x + dx]
                            || snapshot.profile(x + dx, local_y, z + d) != id
                        {
                            break 'outer;
                        }
                    }
                    d += 1;
                }

                for dz in 0..d {
                    for dx in 0..w {
                        visited[(z + dz) * CHUNK_WIDTH + x + dx] = true;
                    }
                }
                rects.push(((x, z, w, d), id));
            }
        }

        rects
    }
}

impl MeshGenerator for GreedyMeshGenerator {
    fn generate(&self, snapshot: &ChunkSnapshotData) -> MeshData {
        let mut shapes = Vec::new();
        let mut merged: Vec<MeshShape> = Vec::new();
        // Boxes that ended on the previous layer, keyed by rectangle + profile.
        let mut open: FxHashMap<(Rect, ProfileId), usize> = FxHashMap::default();
        let min_y = snapshot.min_height();

        for local_y in 0..snapshot.height() {
            if !snapshot.section_has_blocks(local_y / SECTION_HEIGHT) {
                open.clear();
                continue;
            }
            let world_y = (min_y + local_y as i32) as f32;
            let rects = self.sweep_layer(snapshot, local_y, world_y, &mut shapes);

            let mut next_open = FxHashMap::default();
            for (rect, id) in rects {
                if self.settings.vertical_merging
                    && let Some(&idx) = open.get(&(rect, id))
                {
                    let shape = &mut merged[idx];
                    if shape.max[1] - shape.min[1] < self.settings.max_vertical_size as f32 {
                        shape.max[1] += 1.0;
                        next_open.insert((rect, id), idx);
                        continue;
                    }
                }
                let Some(profile) = self.registry.get(id) else {
                    continue;
                };
                let (x, z, w, d) = rect;
                merged.push(MeshShape {
                    profile: id,
                    density: profile.density,
                    friction: profile.friction,
                    restitution: profile.restitution,
                    min: [x as f32, world_y, z as f32],
                    max: [(x + w) as f32, world_y + 1.0, (z + d) as f32],
                });
                next_open.insert((rect, id), merged.len() - 1);
            }
            open = next_open;
        }

        shapes.extend(merged);
        MeshData { shapes }
    }

    fn settings_hash(&self) -> u64 {
        self.settings.settings_hash()
    }
}

fn emit_partial(profile: &BlockProfile, x: usize, world_y: f32, z: usize, out: &mut Vec<MeshShape>) {
    let (bx, bz) = (x as f32, z as f32);
    for b in &profile.boxes {
        out.push(MeshShape {
            profile: profile.id,
            density: profile.density,
            friction: profile.friction,
            restitution: profile.restitution,
            min: [bx + b.min[0], world_y + b.min[1], bz + b.min[2]],
            max: [bx + b.max[0], world_y + b.max[1], bz + b.max[2]],
        });
    }
}
