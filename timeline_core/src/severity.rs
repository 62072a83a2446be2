use frame_schema::{HotspotThresholds, ZoneCount, ZoneKey};
use serde::Serialize;

use crate::config::SeverityConfig;
use crate::projection::{PlaneProjection, PlanePoint};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeverityThresholds {
    pub yellow: f64,
    pub red: f64,
    /// Whether the frame's percentile summary was usable.
    pub from_meta: bool,
}

impl SeverityThresholds {
    /// Percentile-driven thresholds, floored by the configured minimums.
    /// Summaries with non-finite, inverted or too-small percentiles are
    /// ignored.
    pub fn resolve(meta: Option<&HotspotThresholds>, config: &SeverityConfig) -> Self {
        let usable = meta.and_then(|meta| match (meta.p90, meta.p99) {
            (Some(p90), Some(p99))
                if p90.is_finite()
                    && p99.is_finite()
                    && p99 > p90
                    && p99 >= config.min_valid_p99() =>
            {
                Some((p90, p99))
            }
            _ => None,
        });
        match usable {
            Some((p90, p99)) => Self {
                yellow: p90.max(config.min_yellow()),
                red: p99.max(config.min_red()),
                from_meta: true,
            },
            None => Self {
                yellow: config.min_yellow(),
                red: config.min_red(),
                from_meta: false,
            },
        }
    }

    pub fn level(&self, count: f64) -> SeverityLevel {
        if count >= self.red {
            SeverityLevel::Red
        } else if count >= self.yellow {
            SeverityLevel::Yellow
        } else {
            SeverityLevel::Green
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityLevel {
    Green,
    Yellow,
    Red,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSeverity {
    pub zone: ZoneKey,
    pub count: f64,
    pub point: PlanePoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeverityBuckets {
    pub thresholds: SeverityThresholds,
    pub green: Vec<ZoneSeverity>,
    pub yellow: Vec<ZoneSeverity>,
    pub red: Vec<ZoneSeverity>,
}

impl SeverityBuckets {
    pub fn total(&self) -> usize {
        self.green.len() + self.yellow.len() + self.red.len()
    }
}

pub fn bucket_zones(
    zones: &[ZoneCount],
    thresholds: SeverityThresholds,
    projection: &PlaneProjection,
) -> SeverityBuckets {
    let mut buckets = SeverityBuckets {
        thresholds,
        green: Vec::new(),
        yellow: Vec::new(),
        red: Vec::new(),
    };
    for zone in zones.iter().filter(|zone| zone.count > 0.0) {
        let entry = ZoneSeverity {
            zone: zone.zone,
            count: zone.count,
            point: projection.zone_center(zone.zone),
        };
        match thresholds.level(zone.count) {
            SeverityLevel::Green => buckets.green.push(entry),
            SeverityLevel::Yellow => buckets.yellow.push(entry),
            SeverityLevel::Red => buckets.red.push(entry),
        }
    }
    buckets
}
