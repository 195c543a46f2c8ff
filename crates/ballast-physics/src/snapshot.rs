//! Per-tick state handed from the physics thread to the host thread.
//!
//! A [`PhysicsSnapshot`] is a plain value. The physics thread builds it and
//! sends it; the host thread receives it and applies it. Nothing in it
//! points back into live simulation state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use glam::{Quat, Vec3};
use rustc_hash::FxHashSet;

use ballast_config::SnapshotMode;
use ballast_terrain::ChunkPos;

use crate::body::VisualId;
use crate::tickets::{ChunkTicketManager, TicketHost};

/// New transform for one renderable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisualUpdate {
    /// Renderable to move.
    pub visual: VisualId,
    /// World position.
    pub position: Vec3,
    /// World rotation.
    pub rotation: Quat,
    /// Whether the renderable is shown.
    pub visible: bool,
}

/// Everything the host needs from one tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PhysicsSnapshot {
    /// Tick that produced the snapshot.
    pub tick: u64,
    /// Renderable updates.
    pub updates: Vec<VisualUpdate>,
    /// Chunks containing at least one awake body.
    pub active_chunks: FxHashSet<ChunkPos>,
}

/// Host renderer. Called on the host thread only.
pub trait VisualSink {
    /// Moves, rotates, and shows or hides one renderable.
    fn apply(&mut self, update: &VisualUpdate);
}

/// Applies a snapshot on the host thread: visuals first, then tickets.
pub fn apply_snapshot<H: TicketHost>(
    snapshot: &PhysicsSnapshot,
    visuals: &mut dyn VisualSink,
    tickets: &mut ChunkTicketManager<H>,
) {
    for update in &snapshot.updates {
        visuals.apply(update);
    }
    tickets.update(&snapshot.active_chunks);
}

/// Creates the two ends of a snapshot queue.
pub fn snapshot_queue(mode: SnapshotMode) -> (SnapshotSender, SnapshotReceiver) {
    let capacity = match mode {
        SnapshotMode::Fifo => 2,
        SnapshotMode::Latest => 1,
    };
    let (tx, rx) = bounded(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    (
        SnapshotSender {
            tx,
            evict: rx.clone(),
            dropped: Arc::clone(&dropped),
            closed: Arc::clone(&closed),
        },
        SnapshotReceiver {
            rx,
            dropped,
            closed,
        },
    )
}

/// Physics-thread end of the queue.
pub struct SnapshotSender {
    tx: Sender<PhysicsSnapshot>,
    // Keeps the channel connected, so the receiver's drop is tracked in `closed`.
    evict: Receiver<PhysicsSnapshot>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl SnapshotSender {
    /// Queues a snapshot, evicting the oldest if the queue is full.
    /// Returns `false` once the receiver is gone.
    pub fn send(&self, snapshot: PhysicsSnapshot) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let mut pending = snapshot;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return true,
                Err(TrySendError::Disconnected(_)) => return false,
                Err(TrySendError::Full(back)) => {
                    pending = back;
                    if self.evict.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

/// Host-thread end of the queue.
pub struct SnapshotReceiver {
    rx: Receiver<PhysicsSnapshot>,
    dropped: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
}

impl SnapshotReceiver {
    /// Oldest queued snapshot, if any.
    pub fn poll(&self) -> Option<PhysicsSnapshot> {
        self.rx.try_recv().ok()
    }

    /// Every queued snapshot, oldest first.
    pub fn drain(&self) -> Vec<PhysicsSnapshot> {
        self.rx.try_iter().collect()
    }

    /// Snapshots evicted before the host read them.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for SnapshotReceiver {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}
