//! Headless sandbox that runs one physics world against a small flat host.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI
//! flags. Run with `cargo run -p ballast-sandbox -- --ticks 400` to drop a
//! few dozen crates onto the floor and into the pool.

mod host;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::Vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, error, info, warn};

use ballast_config::{CliArgs, Config};
use ballast_physics::{
    BodyDesc, BodyFuture, BodyId, BodySpec, ChunkTicketManager, ConstraintDesc, DisplaySettings,
    PhysicsContext, PhysicsHandle, PhysicsWorld, ShapeDesc, TaskPriority, TerrainBridge,
    VisualId, apply_snapshot,
};
use ballast_terrain::ChunkPos;

use host::{FlatWorld, Pool, STONE, Screen, Tickets, block_registry, pool_center};

const CRATES: u64 = 24;
const STATS_EVERY: u64 = 50;
const WARM_UP: Duration = Duration::from_secs(5);
const CREATE_TIMEOUT: Duration = Duration::from_secs(1);

type SandboxResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config_dir = args.config.clone().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ballast")
    });

    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    ballast_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    match run(&args, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("sandbox failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &CliArgs, config: &Config) -> SandboxResult<()> {
    let world_name = args.world.as_str();
    let profile = config.profile_for(world_name);
    let registry = Arc::new(block_registry()?);

    let world = PhysicsWorld::with_rapier(world_name, config).with_buoyancy(Box::new(Pool), config);
    let handle = ballast_physics::spawn(world, profile.tick_period(), profile.snapshot_mode)?;
    let mut terrain =
        TerrainBridge::from_config(world_name, config, registry, handle.task_sender());
    let mut host = FlatWorld::default();
    let mut screen = Screen::default();
    let mut tickets = ChunkTicketManager::new(world_name, Tickets::default());
    let observers = [ChunkPos::new(0, 0)];

    for pos in FlatWorld::loaded_chunks() {
        terrain.on_chunk_load(pos);
    }
    warm_up(&mut terrain, &host, &observers, profile.tick_period());

    if profile.bounds.kill_below_min_y {
        handle.task_sender().add_tick_task(
            TaskPriority::Background,
            |ctx: &mut PhysicsContext| {
                for id in ctx.bodies_out_of_bounds() {
                    if ctx.remove_body(id).is_ok() {
                        debug!(body = id.0, "removed body outside world bounds");
                    }
                }
            },
        );
    }

    let crates = drop_crates(&handle, CRATES);
    info!(requested = CRATES, created = crates.len(), "crates dropped");
    if let &[a, b, ..] = crates.as_slice() {
        handle.submit(move |ctx: &mut PhysicsContext| {
            if let Err(e) = ctx.create_constraint(a, b, ConstraintDesc::Fixed) {
                warn!("failed to weld crates: {e}");
            }
        })?;
    }

    let period = profile.tick_period();
    let total = if args.ticks == 0 { u64::MAX } else { args.ticks };
    let mut deadline = Instant::now();
    for tick in 0..total {
        terrain.tick(&host, &observers);
        for snapshot in handle.drain_snapshots() {
            apply_snapshot(&snapshot, &mut screen, &mut tickets);
        }

        if tick == total / 3 {
            let origin = pool_center();
            handle.submit(move |ctx: &mut PhysicsContext| {
                let pushed = ctx.query().explode(origin, 8.0, 2.0);
                info!(pushed, "explosion over the pool");
            })?;
        }
        if tick == total / 2 {
            // Dig out the floor under the first drop site and patch it with stone
            // one block over.
            host.break_block(4, 0, 4);
            terrain.on_block_change(4, 0, 4);
            host.place_block(5, 1, 4, STONE);
            terrain.on_block_change(5, 1, 4);
        }
        if tick % STATS_EVERY == 0 {
            log_stats(tick, &handle, &terrain, &screen, &tickets);
        }

        deadline += period;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        } else {
            deadline = now;
        }
    }

    terrain.close();
    let report = handle.shutdown(&mut tickets);
    info!(
        ticks = report.ticks,
        destroyed = report.cleared.destroyed,
        failed = report.cleared.failed,
        visuals = screen.positions.len(),
        hidden = screen.hidden,
        "sandbox finished"
    );
    Ok(())
}

/// Pumps terrain until every loaded chunk has been generated, then gives the
/// physics thread a few ticks to turn the meshes into bodies.
fn warm_up(terrain: &mut TerrainBridge, host: &FlatWorld, observers: &[ChunkPos], period: Duration) {
    let started = Instant::now();
    loop {
        terrain.tick(host, observers);
        let metrics = terrain.manager().metrics();
        if metrics.in_flight == 0 && metrics.queue_depth == 0 {
            break;
        }
        if started.elapsed() >= WARM_UP {
            warn!(in_flight = metrics.in_flight, "terrain still generating after warm-up");
            break;
        }
        std::thread::sleep(period);
    }
    std::thread::sleep(period * 10);
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "terrain ready");
}

fn drop_crates(handle: &PhysicsHandle, count: u64) -> Vec<BodyId> {
    let mut rng = ChaCha8Rng::seed_from_u64(0xc0ffee);
    let pending: Vec<BodyFuture> = (0..count)
        .map(|n| {
            // Every other crate goes into the pool.
            let base_x = if n % 2 == 0 { 2.0 } else { 18.0 };
            let position = Vec3::new(
                base_x + rng.random_range(0.0..12.0),
                rng.random_range(6.0..16.0),
                2.0 + rng.random_range(0.0..12.0),
            );
            let shape = ShapeDesc::Cuboid {
                half_extents: Vec3::splat(0.4),
            };
            let desc = BodyDesc::dynamic(shape, position).with_density(0.6);
            handle.create_body(BodySpec::new(desc).with_display(DisplaySettings::new(VisualId(n))))
        })
        .collect();

    pending
        .iter()
        .filter_map(|future| match future.wait(CREATE_TIMEOUT) {
            Ok(spawned) => Some(spawned.body),
            Err(e) => {
                warn!("crate not created: {e}");
                None
            }
        })
        .collect()
}

fn log_stats(
    tick: u64,
    handle: &PhysicsHandle,
    terrain: &TerrainBridge,
    screen: &Screen,
    tickets: &ChunkTicketManager<Tickets>,
) {
    let capture = terrain.manager().metrics();
    let cache = terrain.manager().cache().stats();
    let queue = terrain.manager().queue().metrics();
    info!(
        tick,
        physics_ticks = handle.ticks(),
        bodies = handle.objects().len(),
        active = handle.objects().active_ids().len(),
        forced_chunks = tickets.forced().len(),
        host_tickets = tickets.host().forced.len(),
        dropped_snapshots = handle.dropped_snapshots(),
        visual_updates = screen.applied,
        captures = capture.captures,
        cache_hits = cache.memory_hits + cache.disk_hits,
        cache_misses = cache.misses,
        generated = queue.completed,
        "sandbox stats"
    );
}
