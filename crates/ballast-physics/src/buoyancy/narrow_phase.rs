//! Turns recorded fluid contacts into impulses.

use glam::Vec3;
use tracing::warn;

use ballast_config::{BuoyancyConfig, FluidConstants};

use super::FluidKind;
use super::store::BuoyancyDataStore;
use crate::backend::{BuoyancyImpulse, PhysicsBackend};

/// Constants for `kind`.
pub fn constants_for(config: &BuoyancyConfig, kind: FluidKind) -> FluidConstants {
    match kind {
        FluidKind::Water => config.water,
        FluidKind::Lava => config.lava,
    }
}

/// Applies one impulse per contact whose body still exists and is awake.
/// Returns the number of impulses applied.
pub fn apply_fluid_impulses(
    contacts: &BuoyancyDataStore,
    backend: &mut dyn PhysicsBackend,
    config: &BuoyancyConfig,
    dt: f32,
) -> usize {
    let gravity = backend.gravity();
    let mut applied = 0;
    for contact in contacts.iter() {
        if !backend.is_added(contact.body) || !backend.is_active(contact.body) {
            continue;
        }
        let constants = constants_for(config, contact.kind);
        let impulse = BuoyancyImpulse {
            surface_position: Vec3::new(contact.center_x, contact.surface_height, contact.center_z),
            surface_normal: Vec3::Y,
            buoyancy: constants.buoyancy,
            linear_drag: constants.linear_drag,
            angular_drag: constants.angular_drag,
            fluid_velocity: contact.flow,
            gravity,
            dt,
            coverage: contact.area_fraction,
        };
        match backend.apply_buoyancy_impulse(contact.body, &impulse) {
            Ok(true) => applied += 1,
            Ok(false) => {}
            Err(e) => warn!(body = contact.body.0, "buoyancy impulse failed: {e}"),
        }
    }
    applied
}
