use frame_schema::{WorldPosition, ZoneKey};
use serde::Serialize;

use crate::config::ProjectionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlanePoint {
    pub x: f64,
    pub y: f64,
}

impl PlanePoint {
    pub fn distance(&self, other: &PlanePoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Maps world coordinates onto the flat map plane. World +z points up the
/// plane, so it is subtracted from the centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneProjection {
    zone_size: f64,
    world_radius: f64,
    center: (f64, f64),
    radius_px: f64,
    offset: (f64, f64),
}

impl PlaneProjection {
    pub fn from_config(config: &ProjectionConfig) -> Self {
        Self {
            zone_size: config.zone_size(),
            world_radius: if config.world_radius() > 0.0 {
                config.world_radius()
            } else {
                1.0
            },
            center: config.center(),
            radius_px: config.radius_px(),
            offset: config.offset(),
        }
    }

    pub fn zone_size(&self) -> f64 {
        self.zone_size
    }

    pub fn world_to_plane(&self, position: WorldPosition) -> PlanePoint {
        let (cx, cy) = self.center;
        let (ox, oy) = self.offset;
        PlanePoint {
            x: cx + (position.x / self.world_radius) * self.radius_px + ox,
            y: cy - (position.z / self.world_radius) * self.radius_px + oy,
        }
    }

    pub fn zone_center(&self, zone: ZoneKey) -> PlanePoint {
        self.world_to_plane(zone.center(self.zone_size))
    }
}

impl Default for PlaneProjection {
    fn default() -> Self {
        Self::from_config(&ProjectionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_zone_lands_near_centre() {
        let projection = PlaneProjection::default();
        let point = projection.zone_center(ZoneKey::new(0, 0));
        // Zone centre is (32, 32) world units.
        assert!((point.x - (512.0 + 32.0 / 10_000.0 * 500.0)).abs() < 1e-9);
        assert!((point.y - (512.0 - 32.0 / 10_000.0 * 500.0)).abs() < 1e-9);
    }

    #[test]
    fn world_edge_maps_to_radius() {
        let projection = PlaneProjection::default();
        let east = projection.world_to_plane(WorldPosition { x: 10_000.0, z: 0.0 });
        assert_eq!(east, PlanePoint { x: 1012.0, y: 512.0 });
        let north = projection.world_to_plane(WorldPosition { x: 0.0, z: 10_000.0 });
        assert_eq!(north, PlanePoint { x: 512.0, y: 12.0 });
    }
}
