//! Terrain collision for voxel chunks: block profiles, snapshot capture with
//! section fingerprints, greedy meshing, a two-tier cache, and the bounded
//! generation pipeline that ties them together.

mod cache;
mod capture;
mod coords;
mod dirty_region;
mod generation_queue;
mod greedy;
mod manager;
mod profile;

pub use cache::{
    CacheError, CacheHeader, CacheStatsSnapshot, CachedChunkPhysicsData, ChunkPhysicsCache,
    FORMAT_VERSION,
};
pub use capture::{
    ChunkSnapshotData, ChunkSource, LAYER_AREA, SECTION_HEIGHT, SECTION_VOLUME,
    section_fingerprint,
};
pub use coords::{CHUNK_WIDTH, ChunkKey, ChunkPos};
pub use dirty_region::{DirtyChunkRegion, DirtyRegionError};
pub use generation_queue::{GenerationError, GenerationQueue, GenerationTicket, QueueMetrics};
pub use greedy::{
    GENERATOR_VERSION, GreedyMeshGenerator, MeshData, MeshGenerator, MeshSettings, MeshShape,
};
pub use manager::{CaptureMetrics, ChunkPhysicsManager, ChunkProvider, OnReady, RequestReason};
pub use profile::{
    BlockProfile, BlockSample, MaterialId, ProfileError, ProfileId, ProfileRegistry, SlabHalf,
    Surface, UnitBox,
};
