//! Configuration structs with sensible defaults and RON persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tick rate used when a profile asks for zero ticks per second.
pub const FALLBACK_TICK_RATE: u32 = 20;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Profile applied to every world without an explicit override.
    pub physics: WorldProfile,
    /// Per-world profile overrides keyed by host world name.
    pub worlds: HashMap<String, WorldProfile>,
    /// Terrain generation worker sizing.
    pub generation: GenerationConfig,
    /// Terrain collision cache settings.
    pub cache: CacheConfig,
    /// Fluid constants for the buoyancy pipeline.
    pub buoyancy: BuoyancyConfig,
    /// Per-tick task budgets.
    pub tasks: TaskBudgetConfig,
    /// Query engine tuning.
    pub query: QueryConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Simulation settings for a single host world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldProfile {
    /// Fixed simulation ticks per second.
    pub tick_rate: u32,
    /// Collision sub-steps per tick.
    pub collision_steps: u32,
    /// Gravity vector in blocks/s².
    pub gravity: [f32; 3],
    /// Maximum number of live bodies.
    pub max_bodies: u32,
    /// Simulation bounds.
    pub bounds: BoundsConfig,
    /// Optional static floor slab.
    pub floor_plane: FloorPlaneConfig,
    /// How snapshots queue up between the physics and host threads.
    pub snapshot_mode: SnapshotMode,
    /// Terrain collision behaviour.
    pub terrain: TerrainProfile,
}

/// Axis-aligned simulation bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BoundsConfig {
    /// Minimum corner (x, y, z).
    pub min: [f64; 3],
    /// Maximum corner (x, y, z).
    pub max: [f64; 3],
    /// Hint for callers that bodies below `min.y` should be removed.
    pub kill_below_min_y: bool,
    /// Surround the bounds with static walls, a floor and a ceiling.
    pub prevent_exit: bool,
}

/// A static slab whose top face sits at `y_level`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FloorPlaneConfig {
    pub enabled: bool,
    pub y_level: f32,
    /// Slab thickness below `y_level`.
    pub thickness: f32,
    pub friction: f32,
    pub restitution: f32,
    /// Minimum corner (x, z).
    pub min: [f32; 2],
    /// Maximum corner (x, z).
    pub max: [f32; 2],
}

/// Snapshot delivery policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SnapshotMode {
    /// Queue up to two snapshots; the oldest is dropped on overflow.
    #[default]
    Fifo,
    /// Keep only the newest snapshot.
    Latest,
}

/// Terrain collision settings for one world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerrainProfile {
    /// Build terrain collision when a chunk loads.
    pub generate_on_load: bool,
    /// Remove terrain collision when a chunk unloads.
    pub remove_on_unload: bool,
    /// Rebuild terrain collision after block edits.
    pub update_on_block_change: bool,
    /// Ticks to wait after the last edit before rebuilding.
    pub update_debounce_ticks: u32,
    /// Completed meshes turned into bodies per tick.
    pub mesh_apply_per_tick: u32,
    /// Merge identical rectangles across consecutive layers.
    pub vertical_merging: bool,
    /// Upper bound on a vertically merged box height.
    pub max_vertical_size: u32,
    /// Skip sections the host reports as empty during capture.
    pub fast_capture: bool,
    /// Wall-clock budget for chunk captures per tick.
    pub max_capture_millis_per_tick: u32,
}

/// Terrain generation worker sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Worker threads (0 = derive from CPU count).
    pub worker_threads: usize,
    /// Jobs allowed to execute concurrently.
    pub max_in_flight: usize,
    /// Jobs allowed to wait for a worker.
    pub queue_capacity: usize,
}

/// Terrain collision cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the disk tier.
    pub enabled: bool,
    /// Cache root (None = platform cache directory).
    pub directory: Option<PathBuf>,
    /// Entries kept in the memory tier.
    pub max_memory_entries: usize,
    /// Memory entry lifetime in seconds (0 = no expiry).
    pub memory_ttl_secs: u64,
    /// Disk entry lifetime in seconds (0 = no expiry).
    pub disk_ttl_secs: u64,
    /// Host world seed, recorded in every cache file.
    pub world_seed: u64,
}

/// Buoyancy constants for one fluid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FluidConstants {
    /// Buoyancy factor (1.0 = neutral for unit density).
    pub buoyancy: f32,
    /// Linear drag coefficient.
    pub linear_drag: f32,
    /// Angular drag coefficient.
    pub angular_drag: f32,
}

/// Buoyancy pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuoyancyConfig {
    /// Run the buoyancy pipeline at all.
    pub enabled: bool,
    /// Water constants.
    pub water: FluidConstants,
    /// Lava constants.
    pub lava: FluidConstants,
    /// Initial slot count of each contact buffer.
    pub initial_capacity: usize,
}

/// Per-tick task budgets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskBudgetConfig {
    /// Maximum one-shot tasks drained per tick.
    pub max_one_shot_per_tick: usize,
    /// Wall-clock budget for one-shot tasks per tick.
    pub one_shot_budget_ms: u64,
    /// Wall-clock budget shared by background recurring tasks.
    pub recurring_budget_ms: u64,
}

/// Query engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Multiplier applied to the caller's explosion force.
    pub explosion_force_scale: f32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for WorldProfile {
    fn default() -> Self {
        Self {
            tick_rate: FALLBACK_TICK_RATE,
            collision_steps: 4,
            gravity: [0.0, -17.18, 0.0],
            max_bodies: 65_536,
            bounds: BoundsConfig::default(),
            floor_plane: FloorPlaneConfig::default(),
            snapshot_mode: SnapshotMode::Fifo,
            terrain: TerrainProfile::default(),
        }
    }
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            min: [-30_000_000.0, -64.0, -30_000_000.0],
            max: [30_000_000.0, 320.0, 30_000_000.0],
            kill_below_min_y: false,
            prevent_exit: false,
        }
    }
}

impl Default for FloorPlaneConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            y_level: 0.0,
            thickness: 1.0,
            friction: 1.0,
            restitution: 0.0,
            min: [-100.0, -100.0],
            max: [100.0, 100.0],
        }
    }
}

impl Default for TerrainProfile {
    fn default() -> Self {
        Self {
            generate_on_load: true,
            remove_on_unload: true,
            update_on_block_change: true,
            update_debounce_ticks: 5,
            mesh_apply_per_tick: 4,
            vertical_merging: true,
            max_vertical_size: 64,
            fast_capture: true,
            max_capture_millis_per_tick: 2,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            max_in_flight: 4,
            queue_capacity: 256,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: None,
            max_memory_entries: 1024,
            memory_ttl_secs: 300,
            disk_ttl_secs: 0,
            world_seed: 0,
        }
    }
}

impl FluidConstants {
    /// Default water constants.
    pub const WATER: Self = Self {
        buoyancy: 1.1,
        linear_drag: 0.5,
        angular_drag: 0.05,
    };

    /// Default lava constants.
    pub const LAVA: Self = Self {
        buoyancy: 2.5,
        linear_drag: 5.0,
        angular_drag: 2.0,
    };
}

impl Default for FluidConstants {
    fn default() -> Self {
        Self::WATER
    }
}

impl Default for BuoyancyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            water: FluidConstants::WATER,
            lava: FluidConstants::LAVA,
            initial_capacity: 256,
        }
    }
}

impl Default for TaskBudgetConfig {
    fn default() -> Self {
        Self {
            max_one_shot_per_tick: 50,
            one_shot_budget_ms: 4,
            recurring_budget_ms: 3,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            explosion_force_scale: 500.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Derived values ---

impl WorldProfile {
    /// Tick rate with zero replaced by [`FALLBACK_TICK_RATE`].
    pub fn effective_tick_rate(&self) -> u32 {
        if self.tick_rate == 0 {
            FALLBACK_TICK_RATE
        } else {
            self.tick_rate
        }
    }

    /// Simulated seconds advanced per tick.
    pub fn step_seconds(&self) -> f32 {
        1.0 / self.effective_tick_rate() as f32
    }

    /// Wall-clock period between ticks.
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.effective_tick_rate()))
    }

    /// Collision sub-steps, never below one.
    pub fn effective_collision_steps(&self) -> u32 {
        self.collision_steps.max(1)
    }
}

impl CacheConfig {
    /// Resolves the cache root, falling back to the platform cache directory.
    pub fn resolve_directory(&self) -> PathBuf {
        if let Some(dir) = &self.directory {
            return dir.clone();
        }
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ballast")
            .join("terrain")
    }

    /// Memory tier lifetime, `None` when entries never expire.
    pub fn memory_ttl(&self) -> Option<Duration> {
        (self.memory_ttl_secs > 0).then(|| Duration::from_secs(self.memory_ttl_secs))
    }

    /// Disk tier lifetime, `None` when entries never expire.
    pub fn disk_ttl(&self) -> Option<Duration> {
        (self.disk_ttl_secs > 0).then(|| Duration::from_secs(self.disk_ttl_secs))
    }
}

impl TaskBudgetConfig {
    /// One-shot drain budget as a [`Duration`].
    pub fn one_shot_budget(&self) -> Duration {
        Duration::from_millis(self.one_shot_budget_ms)
    }

    /// Background recurring budget as a [`Duration`].
    pub fn recurring_budget(&self) -> Duration {
        Duration::from_millis(self.recurring_budget_ms)
    }
}

impl Config {
    /// Returns the profile for `world`, falling back to the default profile.
    pub fn profile_for(&self, world: &str) -> &WorldProfile {
        self.worlds.get(world).unwrap_or(&self.physics)
    }

    /// Rejects values no component can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.max_in_flight == 0 {
            return Err(invalid("generation.max_in_flight", "must be at least 1"));
        }
        if self.generation.queue_capacity == 0 {
            return Err(invalid("generation.queue_capacity", "must be at least 1"));
        }
        let profiles = std::iter::once(("physics", &self.physics))
            .chain(self.worlds.iter().map(|(k, v)| (k.as_str(), v)));
        for (name, profile) in profiles {
            let b = &profile.bounds;
            if (0..3).any(|axis| b.min[axis] > b.max[axis]) {
                return Err(invalid(&format!("{name}.bounds"), "min must not exceed max"));
            }
            let floor = &profile.floor_plane;
            if floor.enabled {
                if !(floor.thickness > 0.0) {
                    return Err(invalid(&format!("{name}.floor_plane"), "thickness must be positive"));
                }
                if (0..2).any(|axis| floor.min[axis] >= floor.max[axis]) {
                    return Err(invalid(&format!("{name}.floor_plane"), "min must be below max"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &'static str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason,
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            config.validate()?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(4)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(4))
                .unwrap();
        assert!(ron_str.contains("tick_rate: 20"));
        assert!(ron_str.contains("max_bodies: 65536"));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.worlds.insert(
            "nether".to_string(),
            WorldProfile {
                tick_rate: 30,
                ..Default::default()
            },
        );
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: Config = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        let ron_str = "(physics: (tick_rate: 40))";
        let config: Config = ron::from_str(ron_str).unwrap();
        assert_eq!(config.physics.tick_rate, 40);
        assert_eq!(config.physics.collision_steps, 4);
        assert_eq!(config.buoyancy, BuoyancyConfig::default());
    }

    #[test]
    fn test_extra_field_ignored() {
        let result: Result<Config, _> = ron::from_str("(future_setting: true)");
        assert!(result.is_ok());
    }

    #[test]
    fn test_fluid_defaults() {
        let buoyancy = BuoyancyConfig::default();
        assert_eq!(buoyancy.water.buoyancy, 1.1);
        assert_eq!(buoyancy.water.linear_drag, 0.5);
        assert_eq!(buoyancy.water.angular_drag, 0.05);
        assert_eq!(buoyancy.lava.buoyancy, 2.5);
        assert_eq!(buoyancy.lava.linear_drag, 5.0);
        assert_eq!(buoyancy.lava.angular_drag, 2.0);
    }

    #[test]
    fn test_zero_tick_rate_falls_back() {
        let profile = WorldProfile {
            tick_rate: 0,
            collision_steps: 0,
            ..Default::default()
        };
        assert_eq!(profile.effective_tick_rate(), FALLBACK_TICK_RATE);
        assert_eq!(profile.effective_collision_steps(), 1);
        assert!((profile.step_seconds() - 0.05).abs() < f32::EPSILON);
    }

    #[test]
    fn test_profile_for_falls_back_to_default() {
        let mut config = Config::default();
        config.worlds.insert(
            "end".to_string(),
            WorldProfile {
                max_bodies: 2,
                ..Default::default()
            },
        );
        assert_eq!(config.profile_for("end").max_bodies, 2);
        assert_eq!(config.profile_for("overworld").max_bodies, 65_536);
    }

    #[test]
    fn test_cache_ttl_zero_means_forever() {
        let cache = CacheConfig::default();
        assert_eq!(cache.memory_ttl(), Some(Duration::from_secs(300)));
        assert_eq!(cache.disk_ttl(), None);
    }

    #[test]
    fn test_cache_directory_override() {
        let cache = CacheConfig {
            directory: Some(PathBuf::from("/tmp/ballast-cache")),
            ..Default::default()
        };
        assert_eq!(cache.resolve_directory(), PathBuf::from("/tmp/ballast-cache"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.physics.tick_rate = 60;
        config.generation.max_in_flight = 2;
        config.physics.snapshot_mode = SnapshotMode::Latest;

        config.save(dir.path()).unwrap();
        let loaded = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_create(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert!(dir.path().join("config.ron").exists());
    }

    #[test]
    fn test_reload_detects_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        let mut modified = config.clone();
        modified.physics.max_bodies = 128;
        modified.save(dir.path()).unwrap();

        let result = config.reload(dir.path()).unwrap();
        assert_eq!(result.unwrap().physics.max_bodies, 128);
    }

    #[test]
    fn test_reload_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        config.save(dir.path()).unwrap();

        assert!(config.reload(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let mut config = Config::default();
        config.physics.bounds.min[1] = 500.0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "physics.bounds"));
    }

    #[test]
    fn test_validate_checks_enabled_floor_plane_only() {
        let mut config = Config::default();
        config.physics.floor_plane.thickness = 0.0;
        assert!(config.validate().is_ok());
        config.physics.floor_plane.enabled = true;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "physics.floor_plane"));
    }

    #[test]
    fn test_validate_rejects_zero_in_flight() {
        let mut config = Config::default();
        config.generation.max_in_flight = 0;
        assert!(config.validate().is_err());
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_ron_produces_error() {
        let result: Result<Config, _> = ron::from_str("{{not valid}}");
        assert!(result.is_err());
    }
}
