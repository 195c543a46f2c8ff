//! Dedicated fixed-rate thread per world.
//!
//! The thread owns the [`PhysicsWorld`]. Other threads reach it only
//! through scheduled tasks, the snapshot queue, and the shared
//! [`ObjectManager`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
use tracing::{error, info, warn};

use ballast_config::{Config, SnapshotMode};

use crate::object_manager::{ClearReport, ObjectManager};
use crate::snapshot::{PhysicsSnapshot, SnapshotReceiver, SnapshotSender, snapshot_queue};
use crate::task_manager::TaskSender;
use crate::tickets::{ChunkTicketManager, TicketHost};
use crate::world::{BodySpec, PhysicsContext, PhysicsWorld, SpawnedBody, WorldError};

enum Control {
    Reload(Box<Config>),
    Stop,
}

/// What a shutdown did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Ticks the loop completed.
    pub ticks: u64,
    /// Bodies destroyed during teardown.
    pub cleared: ClearReport,
}

/// Result of [`PhysicsHandle::create_body`], filled in on the physics thread.
pub struct BodyFuture {
    rx: Receiver<Result<SpawnedBody, WorldError>>,
    cancelled: Arc<AtomicBool>,
}

impl BodyFuture {
    /// Blocks until the body exists or `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> Result<SpawnedBody, WorldError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(WorldError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed()),
        }
    }

    /// The result if it is ready.
    pub fn try_get(&self) -> Option<Result<SpawnedBody, WorldError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(self.closed())),
        }
    }

    /// Asks the physics thread to skip creation. Has no effect once the
    /// body exists.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn closed(&self) -> WorldError {
        if self.cancelled.load(Ordering::Relaxed) {
            WorldError::Cancelled
        } else {
            WorldError::Shutdown
        }
    }
}

/// Host-side handle to a running world.
pub struct PhysicsHandle {
    world: Arc<str>,
    tasks: TaskSender<PhysicsContext>,
    objects: Arc<ObjectManager>,
    snapshots: SnapshotReceiver,
    ticks: Arc<AtomicU64>,
    control: Sender<Control>,
    thread: Option<JoinHandle<PhysicsWorld>>,
}

/// Starts the physics thread for `world`.
pub fn spawn(
    world: PhysicsWorld,
    tick_period: Duration,
    mode: SnapshotMode,
) -> Result<PhysicsHandle, WorldError> {
    let name: Arc<str> = Arc::clone(world.context().world());
    let tasks = world.task_sender();
    let objects = world.objects();
    let (snapshot_tx, snapshots) = snapshot_queue(mode);
    let ticks = Arc::new(AtomicU64::new(0));
    let (control, control_rx) = unbounded();

    let counter = Arc::clone(&ticks);
    let thread = std::thread::Builder::new()
        .name(format!("ballast-physics-{name}"))
        .spawn(move || run(world, tick_period, snapshot_tx, control_rx, counter))
        .map_err(|e| WorldError::Spawn(e.to_string()))?;

    info!(world = %name, period_ms = tick_period.as_millis() as u64, "physics thread started");
    Ok(PhysicsHandle {
        world: name,
        tasks,
        objects,
        snapshots,
        ticks,
        control,
        thread: Some(thread),
    })
}

/// Convenience: builds a rapier world from `config` and starts it.
pub fn spawn_from_config(world: &str, config: &Config) -> Result<PhysicsHandle, WorldError> {
    let profile = config.profile_for(world);
    spawn(
        PhysicsWorld::with_rapier(world, config),
        profile.tick_period(),
        profile.snapshot_mode,
    )
}

fn run(
    mut world: PhysicsWorld,
    mut period: Duration,
    snapshots: SnapshotSender,
    control: Receiver<Control>,
    ticks: Arc<AtomicU64>,
) -> PhysicsWorld {
    let mut deadline = Instant::now();
    'run: loop {
        match catch_unwind(AssertUnwindSafe(|| world.step())) {
            Ok(snapshot) => {
                snapshots.send(snapshot);
            }
            Err(_) => {
                error!(world = %world.context().world(), "physics tick panicked, continuing");
            }
        }
        ticks.fetch_add(1, Ordering::Relaxed);

        deadline += period;
        let now = Instant::now();
        if deadline < now {
            // Fell behind: don't try to catch up with a burst of ticks.
            deadline = now;
        }
        loop {
            match control.recv_deadline(deadline) {
                Ok(Control::Reload(config)) => {
                    world.reload(&config);
                    period = config.profile_for(world.context().world()).tick_period();
                }
                Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break 'run,
                Err(RecvTimeoutError::Timeout) => break,
            }
        }
    }
    world
}

impl PhysicsHandle {
    /// World name.
    pub fn world(&self) -> &Arc<str> {
        &self.world
    }

    /// Runs `task` on the physics thread at the start of a coming tick.
    pub fn submit(
        &self,
        task: impl FnOnce(&mut PhysicsContext) + Send + 'static,
    ) -> Result<(), WorldError> {
        if self.tasks.schedule(task) {
            Ok(())
        } else {
            Err(WorldError::Shutdown)
        }
    }

    /// Task sender, for wiring a [`crate::TerrainBridge`].
    pub fn task_sender(&self) -> TaskSender<PhysicsContext> {
        self.tasks.clone()
    }

    /// Creates a body on the physics thread.
    pub fn create_body(&self, spec: BodySpec) -> BodyFuture {
        let (tx, rx) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        // If scheduling fails the sender is dropped and `wait` reports Shutdown.
        self.tasks.schedule(move |ctx: &mut PhysicsContext| {
            if flag.load(Ordering::Relaxed) {
                return;
            }
            let result = ctx.spawn_body(spec);
            if let Err(crossbeam_channel::SendError(Ok(spawned))) = tx.send(result) {
                // Nobody can learn the id; don't leak the body.
                let _ = ctx.remove_body(spawned.body);
            }
        });
        BodyFuture { rx, cancelled }
    }

    /// Applies a new config on the physics thread, tick rate included.
    pub fn reload(&self, config: Config) -> Result<(), WorldError> {
        self.control
            .send(Control::Reload(Box::new(config)))
            .map_err(|_| WorldError::Shutdown)
    }

    /// Oldest unread snapshot.
    pub fn poll_snapshot(&self) -> Option<PhysicsSnapshot> {
        self.snapshots.poll()
    }

    /// Every unread snapshot, oldest first.
    pub fn drain_snapshots(&self) -> Vec<PhysicsSnapshot> {
        self.snapshots.drain()
    }

    /// Snapshots dropped because the host fell behind.
    pub fn dropped_snapshots(&self) -> u64 {
        self.snapshots.dropped()
    }

    /// Shared registry.
    pub fn objects(&self) -> &Arc<ObjectManager> {
        &self.objects
    }

    /// Ticks completed.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// `false` once the thread has exited.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the loop, destroys every body, then releases chunk tickets.
    pub fn shutdown<H: TicketHost>(mut self, tickets: &mut ChunkTicketManager<H>) -> ShutdownReport {
        let cleared = self.stop().map(|mut world| world.destroy_all()).unwrap_or_default();
        tickets.release_all();
        let report = ShutdownReport {
            ticks: self.ticks(),
            cleared,
        };
        info!(
            world = %self.world,
            ticks = report.ticks,
            destroyed = report.cleared.destroyed,
            "physics world shut down"
        );
        report
    }

    fn stop(&mut self) -> Option<PhysicsWorld> {
        let thread = self.thread.take()?;
        let _ = self.control.send(Control::Stop);
        match thread.join() {
            Ok(world) => Some(world),
            Err(_) => {
                warn!(world = %self.world, "physics thread exited by panic");
                None
            }
        }
    }
}

impl Drop for PhysicsHandle {
    fn drop(&mut self) {
        if let Some(mut world) = self.stop() {
            world.destroy_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::backend::{BodyDesc, ShapeDesc};
    use crate::body::{DisplaySettings, VisualId};
    use crate::tickets::TicketError;
    use ballast_terrain::ChunkPos;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.physics.tick_rate = 200;
        config
    }

    fn ball(y: f32) -> BodySpec {
        BodySpec::new(BodyDesc::dynamic(ShapeDesc::Ball { radius: 0.5 }, Vec3::new(0.0, y, 0.0)))
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[derive(Default)]
    struct Tickets {
        released: usize,
    }

    impl TicketHost for Tickets {
        fn set_ticket(&mut self, _pos: ChunkPos, forced: bool) -> Result<(), TicketError> {
            if !forced {
                self.released += 1;
            }
            Ok(())
        }
    }

    #[test]
    fn test_create_body_and_receive_snapshots() {
        let handle = spawn_from_config("overworld", &fast_config()).unwrap();
        let spawned = handle
            .create_body(ball(20.0).with_display(DisplaySettings::new(VisualId(4))))
            .wait(WAIT)
            .unwrap();
        assert_eq!(handle.objects().by_uuid(spawned.uuid), Some(spawned.body));

        let mut seen = None;
        assert!(wait_for(|| {
            seen = handle
                .drain_snapshots()
                .into_iter()
                .find(|s| !s.updates.is_empty());
            seen.is_some()
        }));
        let snapshot = seen.unwrap();
        assert_eq!(snapshot.updates[0].visual, VisualId(4));
        assert!(snapshot.active_chunks.contains(&ChunkPos::new(0, 0)));

        let mut tickets = ChunkTicketManager::new("overworld", Tickets::default());
        tickets.update(&snapshot.active_chunks);
        let report = handle.shutdown(&mut tickets);
        assert_eq!(report.cleared.destroyed, 1);
        assert!(report.ticks >= 1);
        assert!(tickets.forced().is_empty());
        assert_eq!(tickets.host().released, 1);
    }

    #[test]
    fn test_cancelled_create_never_runs() {
        let mut config = Config::default();
        config.physics.tick_rate = 20;
        let handle = spawn_from_config("overworld", &config).unwrap();
        assert!(wait_for(|| handle.ticks() >= 1));

        let future = handle.create_body(ball(5.0));
        future.cancel();
        assert!(wait_for(|| handle.ticks() >= 3));
        assert_eq!(future.wait(Duration::from_millis(10)), Err(WorldError::Cancelled));
        assert!(handle.objects().is_empty());
    }

    #[test]
    fn test_capacity_error_reaches_caller() {
        let mut config = fast_config();
        config.physics.max_bodies = 1;
        let handle = spawn_from_config("overworld", &config).unwrap();
        handle.create_body(ball(1.0)).wait(WAIT).unwrap();
        assert_eq!(
            handle.create_body(ball(3.0)).wait(WAIT),
            Err(WorldError::Capacity { limit: 1 })
        );
    }

    #[test]
    fn test_reload_reaches_running_world() {
        let handle = spawn_from_config("overworld", &fast_config()).unwrap();
        let mut config = fast_config();
        config.physics.max_bodies = 0;
        handle.reload(config).unwrap();
        assert!(wait_for(|| {
            handle.create_body(ball(1.0)).wait(WAIT) == Err(WorldError::Capacity { limit: 0 })
        }));
    }

    #[test]
    fn test_panicking_tick_does_not_stop_the_loop() {
        let mut world = PhysicsWorld::with_rapier("overworld", &fast_config());
        let tripped = AtomicBool::new(false);
        world.add_tick_listener(move |_, _| {
            if !tripped.swap(true, Ordering::Relaxed) {
                panic!("listener failure");
            }
        });
        let handle = spawn(world, Duration::from_millis(5), SnapshotMode::Latest).unwrap();
        assert!(wait_for(|| handle.ticks() >= 3));
        assert!(handle.is_running());
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let handle = spawn_from_config("overworld", &fast_config()).unwrap();
        let tasks = handle.task_sender();
        let mut tickets = ChunkTicketManager::new("overworld", Tickets::default());
        handle.shutdown(&mut tickets);
        assert!(!tasks.schedule(|_ctx: &mut PhysicsContext| {}));
    }
}
