//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Command-line arguments for the ballast sandbox.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug)]
#[command(name = "ballast", about = "Voxel-world rigid-body physics runtime")]
pub struct CliArgs {
    /// Simulation ticks per second.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Collision sub-steps per tick.
    #[arg(long)]
    pub collision_steps: Option<u32>,

    /// Maximum live bodies per world.
    #[arg(long)]
    pub max_bodies: Option<u32>,

    /// Terrain generation worker threads (0 = auto).
    #[arg(long)]
    pub workers: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host world name to simulate.
    #[arg(long, default_value = "overworld")]
    pub world: String,

    /// Number of ticks to run before shutting down (0 = until interrupted).
    #[arg(long, default_value_t = 200)]
    pub ticks: u64,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    ///
    /// Simulation overrides land on the default profile, so they apply to
    /// every world without an explicit entry in `worlds`.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(rate) = args.tick_rate {
            self.physics.tick_rate = rate;
        }
        if let Some(steps) = args.collision_steps {
            self.physics.collision_steps = steps;
        }
        if let Some(max) = args.max_bodies {
            self.physics.max_bodies = max;
        }
        if let Some(workers) = args.workers {
            self.generation.worker_threads = workers;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_args() -> CliArgs {
        CliArgs {
            tick_rate: None,
            collision_steps: None,
            max_bodies: None,
            workers: None,
            log_level: None,
            config: None,
            world: "overworld".to_string(),
            ticks: 200,
        }
    }

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            tick_rate: Some(60),
            max_bodies: Some(2),
            ..empty_args()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.physics.tick_rate, 60);
        assert_eq!(config.physics.max_bodies, 2);
        // Non-overridden fields retain defaults
        assert_eq!(config.physics.collision_steps, 4);
        assert_eq!(config.generation.worker_threads, 0);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&empty_args());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from(["ballast", "--tick-rate", "30", "--world", "nether"]);
        assert_eq!(args.tick_rate, Some(30));
        assert_eq!(args.world, "nether");
        assert_eq!(args.ticks, 200);
    }
}
