//! Two-tier terrain collision cache: an LRU memory tier in front of one
//! postcard file per chunk.
//!
//! ## Disk layout
//!
//! ```text
//! <root>/<world>/v<FORMAT_VERSION>_<settings_hash:016x>/<x>_<z>.bin
//! ```
//!
//! Each file holds a [`CacheHeader`] followed by the cached data. A file whose
//! header does not match the running configuration, that fails to decode, or
//! that has outlived the disk TTL is deleted and reported as a miss. IO
//! failures are logged and never surface to callers of [`ChunkPhysicsCache::get`].

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use ballast_config::CacheConfig;

use crate::coords::ChunkKey;
use crate::greedy::MeshData;

/// On-disk format version. Bump when [`CacheFile`] changes shape.
pub const FORMAT_VERSION: u32 = 3;

/// Errors writing to the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("cache io error at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Encoding the record failed.
    #[error("failed to encode cache record: {0}")]
    Encode(#[source] postcard::Error),
}

/// Collision mesh paired with the section fingerprints it was built from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedChunkPhysicsData {
    /// One fingerprint per section, lowest first.
    pub fingerprints: Vec<u64>,
    /// Generated geometry.
    pub mesh: Arc<MeshData>,
}

impl CachedChunkPhysicsData {
    /// Creates a record.
    pub fn new(fingerprints: Vec<u64>, mesh: Arc<MeshData>) -> Self {
        Self { fingerprints, mesh }
    }

    /// Returns `true` if every stored fingerprint equals the current one.
    pub fn matches(&self, current: &[u64]) -> bool {
        self.fingerprints == current
    }

    /// Indices of sections whose fingerprint differs. A differing section
    /// count marks every section of the longer side as mismatched.
    pub fn mismatched_sections(&self, current: &[u64]) -> Vec<usize> {
        let len = self.fingerprints.len().max(current.len());
        (0..len)
            .filter(|&i| self.fingerprints.get(i) != current.get(i))
            .collect()
    }
}

/// Identity of the configuration that produced a cache file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHeader {
    /// [`FORMAT_VERSION`] at write time.
    pub format_version: u32,
    /// Mesher version at write time.
    pub generator_version: u32,
    /// Host world seed.
    pub world_seed: u64,
    /// Mesher settings hash.
    pub settings_hash: u64,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    header: CacheHeader,
    data: CachedChunkPhysicsData,
}

struct MemoryEntry {
    data: Arc<CachedChunkPhysicsData>,
    inserted: Instant,
}

/// Hit/miss counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    discarded_files: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Lookups answered by the memory tier.
    pub memory_hits: u64,
    /// Lookups answered by the disk tier.
    pub disk_hits: u64,
    /// Lookups answered by neither tier.
    pub misses: u64,
    /// Successful `put` calls.
    pub writes: u64,
    /// Files deleted as incompatible, corrupt, or expired.
    pub discarded_files: u64,
}

/// Memory + disk cache keyed by `(world, x, z)`.
pub struct ChunkPhysicsCache {
    root: Option<PathBuf>,
    header: CacheHeader,
    memory: Mutex<LruCache<ChunkKey, MemoryEntry>>,
    memory_ttl: Option<Duration>,
    disk_ttl: Option<Duration>,
    stats: CacheStats,
}

impl ChunkPhysicsCache {
    /// Creates a cache. `root` of `None` disables the disk tier.
    pub fn new(
        root: Option<PathBuf>,
        header: CacheHeader,
        max_memory_entries: usize,
        memory_ttl: Option<Duration>,
        disk_ttl: Option<Duration>,
    ) -> Self {
        let capacity = NonZeroUsize::new(max_memory_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            root,
            header,
            memory: Mutex::new(LruCache::new(capacity)),
            memory_ttl,
            disk_ttl,
            stats: CacheStats::default(),
        }
    }

    /// Creates a cache from configuration and the mesher identity.
    pub fn from_config(config: &CacheConfig, generator_version: u32, settings_hash: u64) -> Self {
        let header = CacheHeader {
            format_version: FORMAT_VERSION,
            generator_version,
            world_seed: config.world_seed,
            settings_hash,
        };
        let root = config.enabled.then(|| config.resolve_directory());
        Self::new(
            root,
            header,
            config.max_memory_entries,
            config.memory_ttl(),
            config.disk_ttl(),
        )
    }

    /// Memory hit, else disk hit (which repopulates memory), else `None`.
    pub fn get(&self, key: &ChunkKey) -> Option<Arc<CachedChunkPhysicsData>> {
        if let Some(data) = self.get_memory(key) {
            self.stats.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Some(data);
        }

        match self.read_disk(key) {
            Some(data) => {
                let data = Arc::new(data);
                self.insert_memory(key.clone(), Arc::clone(&data));
                self.stats.disk_hits.fetch_add(1, Ordering::Relaxed);
                Some(data)
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Writes through both tiers.
    pub fn put(&self, key: &ChunkKey, data: CachedChunkPhysicsData) -> Result<(), CacheError> {
        let data = Arc::new(data);
        self.insert_memory(key.clone(), Arc::clone(&data));
        self.write_disk(key, &data)?;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Removes one chunk from both tiers.
    pub fn invalidate(&self, key: &ChunkKey) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.pop(key);
        }
        if let Some(path) = self.file_path(key) {
            remove_file_logged(&path);
        }
    }

    /// Removes every chunk of `world` from both tiers.
    pub fn invalidate_world(&self, world: &str) {
        if let Ok(mut memory) = self.memory.lock() {
            let doomed: Vec<ChunkKey> = memory
                .iter()
                .filter(|(k, _)| &*k.world == world)
                .map(|(k, _)| k.clone())
                .collect();
            for key in doomed {
                memory.pop(&key);
            }
        }
        if let Some(root) = &self.root {
            let dir = root.join(sanitize(world));
            if dir.exists()
                && let Err(e) = std::fs::remove_dir_all(&dir)
            {
                warn!(dir = %dir.display(), "failed to clear world cache: {e}");
            }
        }
    }

    /// Drops the memory tier only.
    pub fn clear_memory(&self) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.clear();
        }
    }

    /// Number of entries in the memory tier.
    pub fn memory_len(&self) -> usize {
        self.memory.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Header written to and expected from every file.
    pub fn header(&self) -> CacheHeader {
        self.header
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.stats.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.stats.disk_hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            discarded_files: self.stats.discarded_files.load(Ordering::Relaxed),
        }
    }

    /// Path of the file backing `key`, if the disk tier is enabled.
    pub fn file_path(&self, key: &ChunkKey) -> Option<PathBuf> {
        self.root.as_ref().map(|root| {
            root.join(sanitize(&key.world))
                .join(format!(
                    "v{}_{:016x}",
                    self.header.format_version, self.header.settings_hash
                ))
                .join(format!("{}_{}.bin", key.pos.x, key.pos.z))
        })
    }

    fn get_memory(&self, key: &ChunkKey) -> Option<Arc<CachedChunkPhysicsData>> {
        let mut memory = self.memory.lock().ok()?;
        let expired = match memory.get(key) {
            None => return None,
            Some(entry) => self
                .memory_ttl
                .is_some_and(|ttl| entry.inserted.elapsed() > ttl),
        };
        if expired {
            memory.pop(key);
            return None;
        }
        memory.get(key).map(|entry| Arc::clone(&entry.data))
    }

    fn insert_memory(&self, key: ChunkKey, data: Arc<CachedChunkPhysicsData>) {
        if let Ok(mut memory) = self.memory.lock() {
            memory.put(
                key,
                MemoryEntry {
                    data,
                    inserted: Instant::now(),
                },
            );
        }
    }

    fn read_disk(&self, key: &ChunkKey) -> Option<CachedChunkPhysicsData> {
        let path = self.file_path(key)?;
        if let Some(ttl) = self.disk_ttl {
            let age = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok());
            if age.is_some_and(|age| age > ttl) {
                debug!(chunk = %key, "cache file expired");
                self.discard(&path);
                return None;
            }
        }

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(chunk = %key, "failed to read cache file: {e}");
                return None;
            }
        };

        match postcard::from_bytes::<CacheFile>(&bytes) {
            Ok(file) if file.header == self.header => Some(file.data),
            Ok(file) => {
                debug!(chunk = %key, found = ?file.header, "incompatible cache file");
                self.discard(&path);
                None
            }
            Err(e) => {
                warn!(chunk = %key, "corrupt cache file: {e}");
                self.discard(&path);
                None
            }
        }
    }

    fn write_disk(&self, key: &ChunkKey, data: &CachedChunkPhysicsData) -> Result<(), CacheError> {
        let Some(path) = self.file_path(key) else {
            return Ok(());
        };
        let file = CacheFile {
            header: self.header,
            data: data.clone(),
        };
        let bytes = postcard::to_allocvec(&file).map_err(CacheError::Encode)?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| CacheError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        // Write beside the target and rename so readers never see a torn file.
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, &bytes).map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| CacheError::Io {
            path: path.clone(),
            source,
        })
    }

    fn discard(&self, path: &Path) {
        self.stats.discarded_files.fetch_add(1, Ordering::Relaxed);
        remove_file_logged(path);
    }
}

fn remove_file_logged(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "failed to delete cache file: {e}"),
    }
}

/// Maps a world name to a safe directory name. ASCII letters, digits and
/// `-` pass through, `_` doubles, and every other byte becomes `_` plus two
/// hex digits, so distinct names never share a directory.
fn sanitize(world: &str) -> String {
    if world.is_empty() {
        return "_".to_owned();
    }
    let mut out = String::with_capacity(world.len());
    for &b in world.as_bytes() {
        match b {
            b'_' => out.push_str("__"),
            b'-' => out.push('-'),
            _ if b.is_ascii_alphanumeric() => out.push(char::from(b)),
            _ => out.push_str(&format!("_{b:02x}")),
        }
    }
    out
}
