//! Registered physics objects.

use std::fmt;

use glam::Vec3;
use rustc_hash::FxHashSet;

use crate::backend::{BodyId, BodyKind, ConstraintId};

/// Stable identifier of a registered body, independent of the native id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BodyUuid(pub u128);

impl BodyUuid {
    /// A random version-4 style id.
    pub fn random() -> Self {
        let raw: u128 = rand::random();
        // Version 4, RFC 4122 variant.
        let raw = (raw & !(0xF << 76)) | (0x4 << 76);
        let raw = (raw & !(0x3 << 62)) | (0x2 << 62);
        Self(raw)
    }
}

impl fmt::Display for BodyUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// Host entity tied to a body (mob, item, vehicle seat, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityId(pub u64);

/// Renderable driven by a body's transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VisualId(pub u64);

/// How a body is shown on the host side.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplaySettings {
    /// Renderable to move.
    pub visual: VisualId,
    /// Offset from the body origin in body space.
    pub offset: Vec3,
    /// Whether the renderable is shown.
    pub visible: bool,
}

impl DisplaySettings {
    /// Visible renderable with no offset.
    pub fn new(visual: VisualId) -> Self {
        Self {
            visual,
            offset: Vec3::ZERO,
            visible: true,
        }
    }
}

/// A native body plus everything the registry tracks about it.
#[derive(Clone, Debug)]
pub struct PhysicsBody {
    /// Stable id.
    pub uuid: BodyUuid,
    /// Native id.
    pub body: BodyId,
    /// Motion type.
    pub kind: BodyKind,
    /// Owning host entity, if any.
    pub entity: Option<EntityId>,
    /// Renderable, if the body is displayed.
    pub display: Option<DisplaySettings>,
    /// Constraints attached to this body.
    pub constraints: FxHashSet<ConstraintId>,
}

impl PhysicsBody {
    /// A fresh record for a native body.
    pub fn new(body: BodyId, kind: BodyKind) -> Self {
        Self {
            uuid: BodyUuid::random(),
            body,
            kind,
            entity: None,
            display: None,
            constraints: FxHashSet::default(),
        }
    }

    /// Ties the body to a host entity.
    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Displays the body with `display`.
    pub fn with_display(mut self, display: DisplaySettings) -> Self {
        self.display = Some(display);
        self
    }
}
