//! Buoyancy: a broad phase that records which bodies stand in fluid and a
//! narrow phase that turns those records into impulses.
//!
//! The two phases never share a buffer. The broad phase fills its own store
//! and swaps it into the published slot; the narrow phase swaps its previous
//! store in and reads what it took out. Contacts reach the narrow phase one
//! tick after they are found.

mod broad_phase;
mod narrow_phase;
mod store;

use std::mem;

use ballast_config::BuoyancyConfig;

pub use broad_phase::{MAX_VERTICAL_SCAN, find_fluid_contacts};
pub use narrow_phase::{apply_fluid_impulses, constants_for};
pub use store::{BuoyancyDataStore, FluidContact};

use crate::backend::{BodyId, PhysicsBackend};

/// Fluids that push bodies around.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FluidKind {
    /// Water.
    Water,
    /// Lava.
    Lava,
}

/// One fluid block as reported by the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FluidBlock {
    /// Fluid type.
    pub kind: FluidKind,
    /// Flow level (0 = source/full).
    pub level: u8,
    /// Highest level this fluid uses (0 if it is not levelled).
    pub max_level: u8,
}

impl FluidBlock {
    /// A full block.
    pub fn source(kind: FluidKind) -> Self {
        Self {
            kind,
            level: 0,
            max_level: 0,
        }
    }

    /// A levelled block.
    pub fn levelled(kind: FluidKind, level: u8, max_level: u8) -> Self {
        Self {
            kind,
            level,
            max_level,
        }
    }

    /// Surface height inside the block, 0..=1.
    pub fn height(&self) -> f32 {
        let level = self.level.min(self.max_level);
        1.0 - f32::from(level) / f32::from(self.max_level.max(1))
    }
}

/// Host fluid lookup. Must be callable from the physics thread.
pub trait FluidSource: Send {
    /// Fluid at a block position, or `None` for anything else.
    fn fluid(&self, x: i32, y: i32, z: i32) -> Option<FluidBlock>;
}

/// Owns both buoyancy phases and the buffers between them.
pub struct BuoyancyManager {
    fluids: Box<dyn FluidSource>,
    config: BuoyancyConfig,
    filling: BuoyancyDataStore,
    published: BuoyancyDataStore,
    reading: BuoyancyDataStore,
}

impl BuoyancyManager {
    /// Creates a manager reading fluids from `fluids`.
    pub fn new(fluids: Box<dyn FluidSource>, config: BuoyancyConfig) -> Self {
        let capacity = config.initial_capacity;
        Self {
            fluids,
            config,
            filling: BuoyancyDataStore::with_capacity(capacity),
            published: BuoyancyDataStore::with_capacity(capacity),
            reading: BuoyancyDataStore::with_capacity(capacity),
        }
    }

    /// Replaces the fluid constants (after a config reload).
    pub fn set_config(&mut self, config: BuoyancyConfig) {
        self.config = config;
    }

    /// `false` when buoyancy is switched off in the config.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Broad phase: rebuilds the contact list and publishes it.
    pub fn update_fluid_states(&mut self, candidates: &[BodyId], backend: &dyn PhysicsBackend) {
        self.filling.clear();
        find_fluid_contacts(candidates, backend, self.fluids.as_ref(), &mut self.filling);
        mem::swap(&mut self.filling, &mut self.published);
    }

    /// Narrow phase: takes the latest published contacts and applies them.
    /// Returns the number of impulses applied.
    pub fn apply_buoyancy_forces(&mut self, backend: &mut dyn PhysicsBackend, dt: f32) -> usize {
        // The store handed back is emptied so a tick without a broad phase
        // never replays old contacts.
        self.reading.clear();
        mem::swap(&mut self.reading, &mut self.published);
        if self.reading.is_empty() {
            return 0;
        }
        apply_fluid_impulses(&self.reading, backend, &self.config, dt)
    }

    /// Contacts currently published and not yet consumed.
    pub fn published_len(&self) -> usize {
        self.published.len()
    }
}
