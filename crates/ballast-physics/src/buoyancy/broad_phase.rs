//! Finds bodies standing in fluid columns.

use glam::Vec3;

use super::store::{BuoyancyDataStore, FluidContact};
use super::{FluidBlock, FluidSource};
use crate::backend::{BodyId, PhysicsBackend};

/// How far above a body's top the surface search goes.
pub const MAX_VERTICAL_SCAN: i32 = 16;

/// Scans each candidate's footprint against `fluids` and appends one contact
/// per body touching fluid. Static, sleeping, or removed bodies are skipped.
pub fn find_fluid_contacts(
    candidates: &[BodyId],
    backend: &dyn PhysicsBackend,
    fluids: &dyn FluidSource,
    out: &mut BuoyancyDataStore,
) {
    for &id in candidates {
        if !backend.is_active(id) {
            continue;
        }
        let Some(bounds) = backend.body_aabb(id) else {
            continue;
        };

        let min_x = bounds.min.x.floor() as i32;
        let max_x = bounds.max.x.floor() as i32;
        let min_y = bounds.min.y.floor() as i32;
        let max_y = bounds.max.y.floor() as i32;
        let min_z = bounds.min.z.floor() as i32;
        let max_z = bounds.max.z.floor() as i32;

        let total_columns = ((max_x - min_x + 1) * (max_z - min_z + 1)).max(1);
        let mut fluid_columns = 0;
        let mut total_height = 0.0f32;
        let mut sum_x = 0.0f32;
        let mut sum_z = 0.0f32;
        let mut detected = None;

        for x in min_x..=max_x {
            for z in min_z..=max_z {
                let surface = match fluids.fluid(x, max_y, z) {
                    Some(top) => {
                        detected = detected.or(Some(top.kind));
                        Some(surface_upwards(fluids, x, max_y, z))
                    }
                    None => (min_y..max_y).rev().find_map(|y| {
                        fluids.fluid(x, y, z).map(|block| {
                            detected = detected.or(Some(block.kind));
                            y as f32 + block.height()
                        })
                    }),
                };
                if let Some(height) = surface {
                    total_height += height;
                    sum_x += x as f32 + 0.5;
                    sum_z += z as f32 + 0.5;
                    fluid_columns += 1;
                }
            }
        }

        let Some(kind) = detected else {
            continue;
        };
        if fluid_columns == 0 {
            continue;
        }
        let surface_height = total_height / fluid_columns as f32;
        if surface_height <= bounds.min.y {
            continue;
        }

        let center_x = sum_x / fluid_columns as f32;
        let center_z = sum_z / fluid_columns as f32;
        let flow = flow_at(
            fluids,
            center_x.floor() as i32,
            (surface_height - 0.5).floor() as i32,
            center_z.floor() as i32,
        );
        out.push(FluidContact {
            body: id,
            surface_height,
            kind,
            area_fraction: fluid_columns as f32 / total_columns as f32,
            center_x,
            center_z,
            flow,
        });
    }
}

/// Surface height of the fluid column starting at `start_y`.
fn surface_upwards(fluids: &dyn FluidSource, x: i32, start_y: i32, z: i32) -> f32 {
    let mut below: Option<FluidBlock> = fluids.fluid(x, start_y, z);
    for y in start_y + 1..=start_y + MAX_VERTICAL_SCAN {
        match fluids.fluid(x, y, z) {
            Some(block) => below = Some(block),
            None => {
                let height = below.map_or(1.0, |b| b.height());
                return (y - 1) as f32 + height;
            }
        }
    }
    start_y as f32 + 1.0
}

/// Horizontal flow from surface height differences with same-fluid neighbours.
fn flow_at(fluids: &dyn FluidSource, x: i32, y: i32, z: i32) -> Vec3 {
    let Some(center) = fluids.fluid(x, y, z) else {
        return Vec3::ZERO;
    };
    let center_height = center.height();
    let delta = |nx: i32, nz: i32| match fluids.fluid(nx, y, nz) {
        Some(neighbor) if neighbor.kind == center.kind => center_height - neighbor.height(),
        _ => 0.0,
    };

    let dx = delta(x + 1, z) - delta(x - 1, z);
    let dz = delta(x, z + 1) - delta(x, z - 1);
    let flow = Vec3::new(dx, 0.0, dz);
    if flow.length_squared() > 1.0e-6 {
        flow.normalize()
    } else {
        flow
    }
}
