//! Struct-of-arrays list of fluid contacts.

use glam::Vec3;

use super::FluidKind;
use crate::backend::BodyId;

/// One body's contact with a fluid, as read back from the store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FluidContact {
    /// Body touching the fluid.
    pub body: BodyId,
    /// Average surface height over the body's footprint.
    pub surface_height: f32,
    /// Fluid the body is in.
    pub kind: FluidKind,
    /// Share of the footprint columns that contain fluid.
    pub area_fraction: f32,
    /// X of the submerged footprint's center.
    pub center_x: f32,
    /// Z of the submerged footprint's center.
    pub center_z: f32,
    /// Normalized horizontal flow, or zero.
    pub flow: Vec3,
}

/// Fluid contacts for one broad-phase pass.
///
/// Capacity doubles when full and is kept across [`clear`](Self::clear), so a
/// warmed-up store does not allocate.
#[derive(Debug)]
pub struct BuoyancyDataStore {
    capacity: usize,
    body_ids: Vec<BodyId>,
    surface_heights: Vec<f32>,
    kinds: Vec<FluidKind>,
    area_fractions: Vec<f32>,
    center_x: Vec<f32>,
    center_z: Vec<f32>,
    flow: Vec<Vec3>,
}

impl BuoyancyDataStore {
    /// Empty store with room for `initial_capacity` contacts (at least 1).
    pub fn with_capacity(initial_capacity: usize) -> Self {
        let mut store = Self {
            capacity: 0,
            body_ids: Vec::new(),
            surface_heights: Vec::new(),
            kinds: Vec::new(),
            area_fractions: Vec::new(),
            center_x: Vec::new(),
            center_z: Vec::new(),
            flow: Vec::new(),
        };
        store.allocate(initial_capacity.max(1));
        store
    }

    fn allocate(&mut self, capacity: usize) {
        if capacity <= self.capacity {
            return;
        }
        let extra = capacity - self.body_ids.len();
        self.body_ids.reserve_exact(extra);
        self.surface_heights.reserve_exact(extra);
        self.kinds.reserve_exact(extra);
        self.area_fractions.reserve_exact(extra);
        self.center_x.reserve_exact(extra);
        self.center_z.reserve_exact(extra);
        self.flow.reserve_exact(extra);
        self.capacity = capacity;
    }

    /// Number of contacts.
    pub fn len(&self) -> usize {
        self.body_ids.len()
    }

    /// Returns `true` if there are no contacts.
    pub fn is_empty(&self) -> bool {
        self.body_ids.is_empty()
    }

    /// Reserved slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every contact, keeping the allocation.
    pub fn clear(&mut self) {
        self.body_ids.clear();
        self.surface_heights.clear();
        self.kinds.clear();
        self.area_fractions.clear();
        self.center_x.clear();
        self.center_z.clear();
        self.flow.clear();
    }

    /// Appends a contact.
    pub fn push(&mut self, contact: FluidContact) {
        if self.len() >= self.capacity {
            self.allocate(self.capacity << 1);
        }
        self.body_ids.push(contact.body);
        self.surface_heights.push(contact.surface_height);
        self.kinds.push(contact.kind);
        self.area_fractions.push(contact.area_fraction);
        self.center_x.push(contact.center_x);
        self.center_z.push(contact.center_z);
        self.flow.push(contact.flow);
    }

    /// Contact at `index`.
    pub fn get(&self, index: usize) -> Option<FluidContact> {
        Some(FluidContact {
            body: *self.body_ids.get(index)?,
            surface_height: self.surface_heights[index],
            kind: self.kinds[index],
            area_fraction: self.area_fractions[index],
            center_x: self.center_x[index],
            center_z: self.center_z[index],
            flow: self.flow[index],
        })
    }

    /// Contacts in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = FluidContact> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }

    /// Bodies with a contact, in insertion order.
    pub fn bodies(&self) -> &[BodyId] {
        &self.body_ids
    }
}
