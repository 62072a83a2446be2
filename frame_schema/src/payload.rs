use serde::{Deserialize, Serialize};

/// Integer grid coordinate of a world zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneKey {
    pub zx: i32,
    pub zy: i32,
}

impl ZoneKey {
    pub const fn new(zx: i32, zy: i32) -> Self {
        Self { zx, zy }
    }

    /// Zone containing a world-space position for the given zone edge length.
    pub fn containing(position: WorldPosition, zone_size: f64) -> Option<Self> {
        if !(zone_size > 0.0) || !position.x.is_finite() || !position.z.is_finite() {
            return None;
        }
        let zx = (position.x / zone_size).floor();
        let zy = (position.z / zone_size).floor();
        if zx.abs() > i32::MAX as f64 || zy.abs() > i32::MAX as f64 {
            return None;
        }
        Some(Self::new(zx as i32, zy as i32))
    }

    /// World-space centre of the zone.
    pub fn center(&self, zone_size: f64) -> WorldPosition {
        WorldPosition {
            x: (self.zx as f64 + 0.5) * zone_size,
            z: (self.zy as f64 + 0.5) * zone_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPosition {
    pub x: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneCount {
    pub zone: ZoneKey,
    pub count: f64,
}

/// Percentile summary published alongside the hotspot list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HotspotThresholds {
    pub p90: Option<f64>,
    pub p99: Option<f64>,
    pub epoch: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerSample {
    pub id: Option<String>,
    pub name: Option<String>,
    pub zone: Option<ZoneKey>,
    pub position: Option<WorldPosition>,
}

impl PlayerSample {
    /// Stable identity used to follow a player across frames.
    pub fn identity(&self) -> Option<&str> {
        self.id.as_deref().or(self.name.as_deref())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.id.as_deref())
    }

    /// Explicit zone if the frame carried one, otherwise derived from position.
    pub fn zone_for(&self, zone_size: f64) -> Option<ZoneKey> {
        self.zone
            .or_else(|| self.position.and_then(|pos| ZoneKey::containing(pos, zone_size)))
    }
}

/// One directed zone-to-zone movement record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowTransition {
    pub from: ZoneKey,
    pub to: ZoneKey,
    pub weight: f64,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameMeta {
    pub schema: Option<String>,
    /// Producer timestamp; the live feed deduplicates on it.
    pub timestamp: Option<String>,
}

/// Canonical snapshot of the world at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub meta: FrameMeta,
    pub players: Vec<PlayerSample>,
    pub hotspots: Vec<ZoneCount>,
    pub hotspot_thresholds: Option<HotspotThresholds>,
    pub transitions: Vec<FlowTransition>,
}

impl FramePayload {
    pub fn timestamp_key(&self) -> Option<&str> {
        self.meta.timestamp.as_deref().filter(|t| !t.is_empty())
    }

    /// Same frame with the hotspot list replaced.
    pub fn with_hotspots(&self, hotspots: Vec<ZoneCount>) -> Self {
        Self {
            hotspots,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containing_floors_negative_positions() {
        let zone = ZoneKey::containing(WorldPosition { x: -1.0, z: 130.0 }, 64.0);
        assert_eq!(zone, Some(ZoneKey::new(-1, 2)));
    }

    #[test]
    fn containing_rejects_degenerate_zone_size() {
        assert!(ZoneKey::containing(WorldPosition { x: 5.0, z: 5.0 }, 0.0).is_none());
    }

    #[test]
    fn explicit_zone_wins_over_position() {
        let player = PlayerSample {
            id: Some("p1".into()),
            name: None,
            zone: Some(ZoneKey::new(3, 4)),
            position: Some(WorldPosition { x: 0.0, z: 0.0 }),
        };
        assert_eq!(player.zone_for(64.0), Some(ZoneKey::new(3, 4)));
        assert_eq!(player.display_name(), Some("p1"));
    }
}
