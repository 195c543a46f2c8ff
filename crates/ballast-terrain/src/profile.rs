//! Block profile registry: maps host materials to compact [`ProfileId`]s that
//! carry collision boxes and surface properties.
//!
//! Profile 0 is always empty so a zero-initialized snapshot grid means "no
//! collision". Slab materials register three profiles (bottom, top, double)
//! and capture picks one from the block's [`SlabHalf`] state.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Host material identifier. `0` is air.
pub type MaterialId = u32;

/// Compact profile identifier stored in every snapshot cell (2 bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub u16);

impl ProfileId {
    /// The empty profile (no collision).
    pub const EMPTY: Self = Self(0);

    /// Returns `true` for the empty profile.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Which half of a block a slab occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlabHalf {
    /// Lower half.
    Bottom,
    /// Upper half.
    Top,
    /// Both halves (a full block).
    Double,
}

/// One block as reported by the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockSample {
    /// Material of the block.
    pub material: MaterialId,
    /// Slab state, when the material is slab-like.
    pub slab: Option<SlabHalf>,
}

impl BlockSample {
    /// An air block.
    pub const AIR: Self = Self {
        material: 0,
        slab: None,
    };

    /// A plain block of `material`.
    pub fn of(material: MaterialId) -> Self {
        Self {
            material,
            slab: None,
        }
    }

    /// A slab block of `material`.
    pub fn slab(material: MaterialId, half: SlabHalf) -> Self {
        Self {
            material,
            slab: Some(half),
        }
    }
}

/// Axis-aligned box in unit block space (`0.0..=1.0` per axis).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitBox {
    /// Minimum corner.
    pub min: [f32; 3],
    /// Maximum corner.
    pub max: [f32; 3],
}

impl UnitBox {
    /// The whole block.
    pub const FULL: Self = Self {
        min: [0.0, 0.0, 0.0],
        max: [1.0, 1.0, 1.0],
    };
    /// Lower half of a block.
    pub const BOTTOM_HALF: Self = Self {
        min: [0.0, 0.0, 0.0],
        max: [1.0, 0.5, 1.0],
    };
    /// Upper half of a block.
    pub const TOP_HALF: Self = Self {
        min: [0.0, 0.5, 0.0],
        max: [1.0, 1.0, 1.0],
    };

    /// Returns `true` if the box covers the whole block.
    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    fn is_valid(&self) -> bool {
        (0..3).all(|a| self.min[a] < self.max[a] && self.min[a] >= 0.0 && self.max[a] <= 1.0)
    }
}

/// Collision description for one profile.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockProfile {
    /// Assigned identifier.
    pub id: ProfileId,
    /// Human-readable name (e.g. "stone", "oak_slab_top").
    pub name: String,
    /// Collision boxes; empty only for [`ProfileId::EMPTY`].
    pub boxes: Vec<UnitBox>,
    /// Density used for mass when the shape is ever dynamic.
    pub density: f32,
    /// Surface friction.
    pub friction: f32,
    /// Surface restitution.
    pub restitution: f32,
}

impl BlockProfile {
    /// Returns `true` if this profile is a single full cube, which is the only
    /// case the greedy mesher merges across blocks.
    pub fn is_full_cube(&self) -> bool {
        self.boxes.len() == 1 && self.boxes[0].is_full()
    }
}

/// Surface properties shared by the registration helpers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Surface {
    /// Density.
    pub density: f32,
    /// Friction.
    pub friction: f32,
    /// Restitution.
    pub restitution: f32,
}

impl Default for Surface {
    fn default() -> Self {
        Self {
            density: 1.0,
            friction: 0.6,
            restitution: 0.0,
        }
    }
}

/// Errors that can occur during profile registration.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The material already maps to a profile.
    #[error("material {0} already has a profile")]
    DuplicateMaterial(MaterialId),
    /// Air cannot be registered.
    #[error("material 0 is reserved for air")]
    ReservedMaterial,
    /// A profile needs at least one valid unit box.
    #[error("profile `{0}` has no valid collision boxes")]
    InvalidShape(String),
    /// All 65 535 profile slots have been consumed.
    #[error("profile registry is full")]
    RegistryFull,
}

#[derive(Clone, Copy, Debug)]
enum MaterialMapping {
    Plain(ProfileId),
    Slab {
        bottom: ProfileId,
        top: ProfileId,
        double: ProfileId,
    },
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps host materials to [`BlockProfile`]s.
///
/// Built once per world before the first capture and shared read-only with
/// the generation workers.
pub struct ProfileRegistry {
    /// Dense array where `index == ProfileId.0`.
    profiles: Vec<BlockProfile>,
    by_material: FxHashMap<MaterialId, MaterialMapping>,
}

impl ProfileRegistry {
    /// Creates a registry with only the empty profile.
    pub fn new() -> Self {
        let empty = BlockProfile {
            id: ProfileId::EMPTY,
            name: "empty".to_string(),
            boxes: Vec::new(),
            density: 0.0,
            friction: 0.0,
            restitution: 0.0,
        };
        Self {
            profiles: vec![empty],
            by_material: FxHashMap::default(),
        }
    }

    /// Registers a full-cube material.
    pub fn register_solid(
        &mut self,
        material: MaterialId,
        name: &str,
        surface: Surface,
    ) -> Result<ProfileId, ProfileError> {
        self.register(material, name, vec![UnitBox::FULL], surface)
    }

    /// Registers a material with arbitrary collision boxes.
    pub fn register(
        &mut self,
        material: MaterialId,
        name: &str,
        boxes: Vec<UnitBox>,
        surface: Surface,
    ) -> Result<ProfileId, ProfileError> {
        self.check_material(material)?;
        let id = self.push(name, boxes, surface)?;
        self.by_material.insert(material, MaterialMapping::Plain(id));
        Ok(id)
    }

    /// Registers a slab material, returning `[bottom, top, double]`.
    pub fn register_slab(
        &mut self,
        material: MaterialId,
        name: &str,
        surface: Surface,
    ) -> Result<[ProfileId; 3], ProfileError> {
        self.check_material(material)?;
        let bottom = self.push(&format!("{name}_bottom"), vec![UnitBox::BOTTOM_HALF], surface)?;
        let top = self.push(&format!("{name}_top"), vec![UnitBox::TOP_HALF], surface)?;
        let double = self.push(&format!("{name}_double"), vec![UnitBox::FULL], surface)?;
        self.by_material.insert(
            material,
            MaterialMapping::Slab {
                bottom,
                top,
                double,
            },
        );
        Ok([bottom, top, double])
    }

    /// Resolves the profile for a host block. Unknown materials are empty.
    pub fn resolve(&self, sample: BlockSample) -> ProfileId {
        match self.by_material.get(&sample.material) {
            None => ProfileId::EMPTY,
            Some(MaterialMapping::Plain(id)) => *id,
            Some(MaterialMapping::Slab {
                bottom,
                top,
                double,
            }) => match sample.slab.unwrap_or(SlabHalf::Bottom) {
                SlabHalf::Bottom => *bottom,
                SlabHalf::Top => *top,
                SlabHalf::Double => *double,
            },
        }
    }

    /// Returns the profile for `id`, if registered.
    pub fn get(&self, id: ProfileId) -> Option<&BlockProfile> {
        self.profiles.get(id.0 as usize)
    }

    /// Number of profiles including the empty one.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Returns `true` if only the empty profile exists.
    pub fn is_empty(&self) -> bool {
        self.profiles.len() <= 1
    }

    fn check_material(&self, material: MaterialId) -> Result<(), ProfileError> {
        if material == 0 {
            return Err(ProfileError::ReservedMaterial);
        }
        if self.by_material.contains_key(&material) {
            return Err(ProfileError::DuplicateMaterial(material));
        }
        Ok(())
    }

    fn push(
        &mut self,
        name: &str,
        boxes: Vec<UnitBox>,
        surface: Surface,
    ) -> Result<ProfileId, ProfileError> {
        if boxes.is_empty() || !boxes.iter().all(UnitBox::is_valid) {
            return Err(ProfileError::InvalidShape(name.to_string()));
        }
        if self.profiles.len() > u16::MAX as usize {
            return Err(ProfileError::RegistryFull);
        }
        let id = ProfileId(self.profiles.len() as u16);
        self.profiles.push(BlockProfile {
            id,
            name: name.to_string(),
            boxes,
            density: surface.density,
            friction: surface.friction,
            restitution: surface.restitution,
        });
        Ok(id)
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::new()
    }
}
