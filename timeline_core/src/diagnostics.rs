use serde::Serialize;

use crate::archive::ArchiveDiagnostics;
use crate::compute::ComputeDiagnostics;
use crate::live_ring::LiveDiagnostics;
use crate::union::UnionReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Live,
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeSource {
    Startup,
    User,
    Transport,
    Seek,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModeChange {
    pub from: Mode,
    pub to: Mode,
    pub source: ModeSource,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineStatus {
    Initializing,
    Ready,
    NoFrames,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDirection {
    Backward,
    Forward,
}

impl StepDirection {
    pub fn apply(self, index: usize, last: usize) -> usize {
        match self {
            StepDirection::Backward => index.saturating_sub(1),
            StepDirection::Forward => index.saturating_add(1).min(last),
        }
    }
}

/// Playback speed tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransportSpeed {
    X1,
    X3,
    X5,
}

impl TransportSpeed {
    pub fn from_multiplier(multiplier: u32) -> Option<Self> {
        match multiplier {
            1 => Some(TransportSpeed::X1),
            3 => Some(TransportSpeed::X3),
            5 => Some(TransportSpeed::X5),
            _ => None,
        }
    }

    pub fn frames_per_second(self) -> u32 {
        match self {
            TransportSpeed::X1 => 4,
            TransportSpeed::X3 => 12,
            TransportSpeed::X5 => 20,
        }
    }

    pub fn tick_ms(self) -> u64 {
        let fps = self.frames_per_second() as f64;
        ((1000.0 / fps).round() as u64).max(16)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransportDiagnostics {
    pub playing: bool,
    pub direction: StepDirection,
    pub speed: TransportSpeed,
    pub tick_ms: u64,
    pub ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeekDiagnostics {
    pub input: String,
    pub target_ms: i64,
    pub nearest_index: usize,
    pub nearest_sec: i64,
    pub delta_sec: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ManifestDiagnostics {
    pub signature: Option<String>,
    pub generation: u64,
    pub loads: u64,
    pub rebuilds: u64,
    pub failures: u64,
    pub live_locator: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowDiagnostics {
    pub window_key: Option<String>,
    pub edges: usize,
    pub clusters: usize,
    pub frames: usize,
    pub rebuilds: u64,
    pub stale_discarded: u64,
}

/// Snapshot of everything the controller knows, for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineDiagnostics {
    pub mode: Mode,
    pub mode_lock: Option<Mode>,
    pub last_mode_change: Option<ModeChange>,
    pub status: TimelineStatus,
    pub note: Option<String>,
    pub frame_count: usize,
    pub skipped_manifest_entries: usize,
    pub scrub_enabled: bool,
    pub focus: Option<usize>,
    pub focus_time: Option<String>,
    pub rendered_index: Option<usize>,
    pub delta: Option<String>,
    pub scrub_request_id: u64,
    pub pending_fetches: usize,
    pub transport: TransportDiagnostics,
    pub seek: Option<SeekDiagnostics>,
    pub manifest: ManifestDiagnostics,
    pub archive: ArchiveDiagnostics,
    pub live: LiveDiagnostics,
    pub union: Option<UnionReport>,
    pub flow: FlowDiagnostics,
    pub compute: ComputeDiagnostics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_tiers_map_to_tick_intervals() {
        assert_eq!(TransportSpeed::X1.tick_ms(), 250);
        assert_eq!(TransportSpeed::X3.tick_ms(), 83);
        assert_eq!(TransportSpeed::X5.tick_ms(), 50);
        assert_eq!(TransportSpeed::from_multiplier(2), None);
    }

    #[test]
    fn stepping_clamps_at_both_ends() {
        assert_eq!(StepDirection::Backward.apply(0, 9), 0);
        assert_eq!(StepDirection::Forward.apply(9, 9), 9);
        assert_eq!(StepDirection::Forward.apply(3, 9), 4);
    }
}
