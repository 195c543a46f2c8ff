//! Keeps host chunk-loading tickets in step with where bodies are awake.

use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::{debug, error};

use ballast_terrain::ChunkPos;

/// A host refused to change a ticket.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TicketError {
    /// The chunk cannot be ticketed right now.
    #[error("chunk {0} is unavailable")]
    ChunkUnavailable(ChunkPos),
    /// Host-specific failure.
    #[error("host rejected ticket change: {0}")]
    Host(String),
}

/// Host side of chunk tickets. Called on the host thread only.
pub trait TicketHost {
    /// Adds (`forced = true`) or removes a ticket keeping `pos` loaded.
    fn set_ticket(&mut self, pos: ChunkPos, forced: bool) -> Result<(), TicketError>;
}

/// Tracks which chunks this world currently holds tickets for.
pub struct ChunkTicketManager<H: TicketHost> {
    world: String,
    host: H,
    forced: FxHashSet<ChunkPos>,
}

impl<H: TicketHost> ChunkTicketManager<H> {
    /// Creates a manager holding no tickets.
    pub fn new(world: impl Into<String>, host: H) -> Self {
        Self {
            world: world.into(),
            host,
            forced: FxHashSet::default(),
        }
    }

    /// Releases tickets for chunks no longer active and adds tickets for
    /// newly active ones.
    pub fn update(&mut self, active: &FxHashSet<ChunkPos>) {
        let released: Vec<ChunkPos> = self
            .forced
            .iter()
            .filter(|pos| !active.contains(pos))
            .copied()
            .collect();
        for pos in released {
            self.forced.remove(&pos);
            self.set(pos, false);
        }
        for &pos in active {
            if self.forced.insert(pos) {
                self.set(pos, true);
            }
        }
    }

    /// Releases every ticket.
    pub fn release_all(&mut self) {
        let count = self.forced.len();
        for pos in std::mem::take(&mut self.forced) {
            self.set(pos, false);
        }
        debug!(world = %self.world, released = count, "released chunk tickets");
    }

    /// Chunks currently ticketed.
    pub fn forced(&self) -> &FxHashSet<ChunkPos> {
        &self.forced
    }

    /// The host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The host, mutably.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    fn set(&mut self, pos: ChunkPos, forced: bool) {
        if let Err(e) = self.host.set_ticket(pos, forced) {
            error!(
                world = %self.world,
                chunk_x = pos.x,
                chunk_z = pos.z,
                forced,
                "failed to update chunk ticket: {e}"
            );
        }
    }
}
