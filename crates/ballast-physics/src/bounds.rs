//! World bounds checks and the static bodies that enforce them.
//!
//! Containment queries never remove anything; what to do with a body that
//! leaves the bounds is up to the caller. With `prevent_exit` set the bounds
//! are also closed off by static slabs, and a profile may add a floor slab.

use glam::{DVec3, Vec3};
use tracing::{debug, warn};

use ballast_config::{BoundsConfig, FloorPlaneConfig};
use ballast_terrain::{CHUNK_WIDTH, ChunkPos};

use crate::backend::{Aabb, BodyDesc, BodyId, PhysicsBackend, ShapeDesc};

const WALL_THICKNESS: f32 = 1.0;
const WALL_FRICTION: f32 = 0.0;
const WALL_RESTITUTION: f32 = 0.5;

/// Axis-aligned simulation bounds for one world.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldBounds {
    min: DVec3,
    max: DVec3,
    /// Bodies below `min.y` should be removed.
    pub kill_below_min_y: bool,
    /// The bounds are walled in.
    pub prevent_exit: bool,
}

impl WorldBounds {
    /// Bounds between two corners, with both policy flags off.
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
            kill_below_min_y: false,
            prevent_exit: false,
        }
    }

    /// Minimum corner.
    pub fn min(&self) -> DVec3 {
        self.min
    }

    /// Maximum corner.
    pub fn max(&self) -> DVec3 {
        self.max
    }

    /// `true` if the point is within the XZ bounds. Height is ignored.
    pub fn is_inside(&self, point: DVec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    /// `true` if the point is below the world floor.
    pub fn is_below_bottom(&self, point: DVec3) -> bool {
        point.y < self.min.y
    }

    /// `true` if the whole box lies inside the bounds on every axis.
    pub fn is_aabb_inside(&self, aabb: &Aabb) -> bool {
        let min = aabb.min.as_dvec3();
        let max = aabb.max.as_dvec3();
        min.cmpge(self.min).all() && max.cmple(self.max).all()
    }

    /// `true` if any block column of the chunk lies within the XZ bounds.
    pub fn chunk_inside(&self, pos: ChunkPos) -> bool {
        let min_x = f64::from(pos.min_block_x());
        let min_z = f64::from(pos.min_block_z());
        let width = CHUNK_WIDTH as f64;
        min_x + width > self.min.x
            && min_x <= self.max.x
            && min_z + width > self.min.z
            && min_z <= self.max.z
    }

    /// Static slabs closing off the bounds: four walls, a floor under
    /// `min.y` and a ceiling over `max.y`. Empty unless `prevent_exit` is set.
    pub fn wall_descs(&self) -> Vec<BodyDesc> {
        if !self.prevent_exit {
            return Vec::new();
        }
        let min = self.min.as_vec3();
        let max = self.max.as_vec3();
        let center = (min + max) * 0.5;
        let t = WALL_THICKNESS * 0.5;
        // Padded by the full thickness so the slabs overlap at the corners.
        let half = (max - min) * 0.5 + Vec3::splat(WALL_THICKNESS);
        let slab = |position: Vec3, half_extents: Vec3| {
            BodyDesc::fixed(ShapeDesc::Cuboid { half_extents }, position)
                .with_material(WALL_FRICTION, WALL_RESTITUTION)
        };
        vec![
            slab(Vec3::new(min.x - t, center.y, center.z), Vec3::new(t, half.y, half.z)),
            slab(Vec3::new(max.x + t, center.y, center.z), Vec3::new(t, half.y, half.z)),
            slab(Vec3::new(center.x, center.y, min.z - t), Vec3::new(half.x, half.y, t)),
            slab(Vec3::new(center.x, center.y, max.z + t), Vec3::new(half.x, half.y, t)),
            slab(Vec3::new(center.x, min.y - t, center.z), Vec3::new(half.x, t, half.z)),
            slab(Vec3::new(center.x, max.y + t, center.z), Vec3::new(half.x, t, half.z)),
        ]
    }
}

/// The floor slab described by `config`, if enabled.
pub fn floor_plane_desc(config: &FloorPlaneConfig) -> Option<BodyDesc> {
    if !config.enabled {
        return None;
    }
    let [min_x, min_z] = config.min;
    let [max_x, max_z] = config.max;
    let half_extents = Vec3::new(
        (max_x - min_x) * 0.5,
        config.thickness * 0.5,
        (max_z - min_z) * 0.5,
    );
    let position = Vec3::new(
        (min_x + max_x) * 0.5,
        config.y_level - half_extents.y,
        (min_z + max_z) * 0.5,
    );
    Some(
        BodyDesc::fixed(ShapeDesc::Cuboid { half_extents }, position)
            .with_material(config.friction, config.restitution),
    )
}

/// Native bodies owned by the world itself: boundary walls and the floor.
/// They are never registered with the object manager.
#[derive(Debug, Default)]
pub struct BoundaryBodies {
    ids: Vec<BodyId>,
}

impl BoundaryBodies {
    /// Creates the walls for `bounds` and the floor slab for `floor`.
    /// Returns the number of bodies now held.
    pub fn build(
        &mut self,
        backend: &mut dyn PhysicsBackend,
        bounds: &WorldBounds,
        floor: &FloorPlaneConfig,
    ) -> usize {
        for desc in bounds.wall_descs().into_iter().chain(floor_plane_desc(floor)) {
            match backend.create_body(&desc) {
                Ok(id) => self.ids.push(id),
                Err(e) => warn!(position = ?desc.position, "failed to create boundary body: {e}"),
            }
        }
        if !self.ids.is_empty() {
            debug!(bodies = self.ids.len(), "boundary bodies created");
        }
        self.ids.len()
    }

    /// Destroys every boundary body. Returns how many were destroyed.
    pub fn clear(&mut self, backend: &mut dyn PhysicsBackend) -> usize {
        self.ids
            .drain(..)
            .filter(|id| backend.destroy_body(*id).is_ok())
            .count()
    }

    /// Native ids of the boundary bodies.
    pub fn ids(&self) -> &[BodyId] {
        &self.ids
    }
}

impl From<&BoundsConfig> for WorldBounds {
    fn from(config: &BoundsConfig) -> Self {
        Self {
            kill_below_min_y: config.kill_below_min_y,
            prevent_exit: config.prevent_exit,
            ..Self::new(DVec3::from_array(config.min), DVec3::from_array(config.max))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> WorldBounds {
        WorldBounds::new(DVec3::new(-100.0, 0.0, -100.0), DVec3::new(100.0, 256.0, 100.0))
    }

    #[test]
    fn test_is_inside_ignores_height() {
        let b = bounds();
        assert!(b.is_inside(DVec3::new(0.0, -50.0, 0.0)));
        assert!(b.is_inside(DVec3::new(100.0, 1000.0, -100.0)));
        assert!(!b.is_inside(DVec3::new(100.5, 10.0, 0.0)));
    }

    #[test]
    fn test_below_bottom() {
        let b = bounds();
        assert!(b.is_below_bottom(DVec3::new(0.0, -0.1, 0.0)));
        assert!(!b.is_below_bottom(DVec3::new(0.0, 0.0, 0.0)));
    }

    #[test]
    fn test_aabb_inside_checks_every_axis() {
        let b = bounds();
        let inside = Aabb {
            min: Vec3::new(-1.0, 1.0, -1.0),
            max: Vec3::new(1.0, 3.0, 1.0),
        };
        let too_high = Aabb {
            min: Vec3::new(-1.0, 255.0, -1.0),
            max: Vec3::new(1.0, 257.0, 1.0),
        };
        assert!(b.is_aabb_inside(&inside));
        assert!(!b.is_aabb_inside(&too_high));
    }

    #[test]
    fn test_chunk_inside() {
        let b = bounds();
        assert!(b.chunk_inside(ChunkPos::new(0, 0)));
        assert!(b.chunk_inside(ChunkPos::new(-7, -7)));
        assert!(!b.chunk_inside(ChunkPos::new(7, 0)));
        assert!(!b.chunk_inside(ChunkPos::new(-8, 0)));
    }

    #[test]
    fn test_from_config_keeps_flags() {
        let config = BoundsConfig {
            min: [10.0, 5.0, 10.0],
            max: [-10.0, 64.0, -10.0],
            kill_below_min_y: false,
            prevent_exit: true,
        };
        let b = WorldBounds::from(&config);
        assert_eq!(b.min(), DVec3::new(-10.0, 5.0, -10.0));
        assert!(!b.kill_below_min_y);
        assert!(b.prevent_exit);
    }

    #[test]
    fn test_walls_only_when_exit_is_prevented() {
        let mut b = WorldBounds::new(DVec3::new(-8.0, 0.0, -8.0), DVec3::new(8.0, 32.0, 8.0));
        assert!(b.wall_descs().is_empty());

        b.prevent_exit = true;
        let walls = b.wall_descs();
        assert_eq!(walls.len(), 6);
        for wall in &walls {
            assert_eq!(wall.kind, crate::backend::BodyKind::Static);
            assert!(wall.shape.validate().is_ok());
            let ShapeDesc::Cuboid { half_extents } = wall.shape else {
                panic!("walls are cuboids");
            };
            let inner = Aabb {
                min: wall.position - half_extents,
                max: wall.position + half_extents,
            };
            // Every slab sits outside the box, at least half its width from the centre.
            assert!(!b.is_aabb_inside(&inner));
            assert!(inner.distance_sq(Vec3::new(0.0, 16.0, 0.0)) >= 63.9);
        }
        assert!(walls.iter().any(|w| w.position.y < 0.0));
        assert!(walls.iter().any(|w| w.position.y > 32.0));
    }

    #[test]
    fn test_degenerate_bounds_still_give_valid_walls() {
        let mut b = WorldBounds::new(DVec3::ZERO, DVec3::new(0.0, 10.0, 0.0));
        b.prevent_exit = true;
        assert!(b.wall_descs().iter().all(|w| w.shape.validate().is_ok()));
    }

    #[test]
    fn test_floor_plane_top_sits_at_y_level() {
        let mut config = FloorPlaneConfig::default();
        assert!(floor_plane_desc(&config).is_none());

        config.enabled = true;
        config.y_level = 4.0;
        config.thickness = 2.0;
        config.min = [0.0, -10.0];
        config.max = [20.0, 10.0];
        let floor = floor_plane_desc(&config).unwrap();
        let ShapeDesc::Cuboid { half_extents } = floor.shape else {
            panic!("floor is a cuboid");
        };
        assert_eq!(half_extents, Vec3::new(10.0, 1.0, 10.0));
        assert_eq!(floor.position, Vec3::new(10.0, 3.0, 0.0));
        assert_eq!(floor.friction, config.friction);
    }
}
