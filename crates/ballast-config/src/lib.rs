//! Configuration for the ballast physics runtime.
//!
//! Settings persist to disk as RON (`config.ron`) and can be overridden from
//! the command line. Every section is `#[serde(default)]`, so older or newer
//! files still load.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{
    BoundsConfig, BuoyancyConfig, CacheConfig, Config, DebugConfig, FALLBACK_TICK_RATE,
    FloorPlaneConfig, FluidConstants, GenerationConfig, QueryConfig, SnapshotMode,
    TaskBudgetConfig, TerrainProfile, WorldProfile,
};
pub use error::ConfigError;
