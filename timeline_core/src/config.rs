use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::FixedOffset;
use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_TIMELINE_CONFIG: &str = include_str!("data/timeline_config.json");

pub const TIMELINE_CONFIG_ENV: &str = "TIMELINE_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    archive: ArchiveConfig,
    live: LiveConfig,
    manifest: ManifestConfig,
    union: UnionConfig,
    flow: FlowConfig,
    render: RenderConfig,
    projection: ProjectionConfig,
    severity: SeverityConfig,
    compute: ComputeConfig,
    seek: SeekConfig,
}

impl TimelineConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_TIMELINE_CONFIG)
                .expect("builtin timeline config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, TimelineConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| TimelineConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = TimelineConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn archive(&self) -> &ArchiveConfig {
        &self.archive
    }

    pub fn live(&self) -> &LiveConfig {
        &self.live
    }

    pub fn manifest(&self) -> &ManifestConfig {
        &self.manifest
    }

    pub fn union(&self) -> &UnionConfig {
        &self.union
    }

    pub fn flow(&self) -> &FlowConfig {
        &self.flow
    }

    pub fn render(&self) -> &RenderConfig {
        &self.render
    }

    pub fn projection(&self) -> &ProjectionConfig {
        &self.projection
    }

    pub fn severity(&self) -> &SeverityConfig {
        &self.severity
    }

    pub fn compute(&self) -> &ComputeConfig {
        &self.compute
    }

    pub fn seek(&self) -> &SeekConfig {
        &self.seek
    }
}

#[derive(Debug, Error)]
pub enum TimelineConfigError {
    #[error("failed to parse timeline config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read timeline config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    buffer_size: usize,
    prefetch_cap: usize,
    pump_debounce_ms: u64,
}

impl ArchiveConfig {
    /// Window span; never below one frame.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size.max(1)
    }

    /// Fetches handed to the pump per pass. Zero means the whole shortfall.
    pub fn prefetch_cap(&self) -> usize {
        self.prefetch_cap
    }

    pub fn pump_debounce(&self) -> Duration {
        Duration::from_millis(self.pump_debounce_ms)
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            buffer_size: 120,
            prefetch_cap: 20,
            pump_debounce_ms: 75,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    ring_capacity: usize,
    poll_ms: u64,
    frame_locator: String,
}

impl LiveConfig {
    pub fn ring_capacity(&self) -> usize {
        self.ring_capacity.max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }

    pub fn frame_locator(&self) -> &str {
        &self.frame_locator
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 30,
            poll_ms: 1000,
            frame_locator: "frame_live.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    retry_ms: u64,
    refresh_ms: u64,
}

impl ManifestConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_ms.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms.max(1))
    }
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            retry_ms: 1000,
            refresh_ms: 12_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UnionConfig {
    enabled: bool,
    window: usize,
    top_k: usize,
}

impl UnionConfig {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn window(&self) -> usize {
        self.window.max(1)
    }

    pub fn top_k(&self) -> usize {
        self.top_k.max(1)
    }
}

impl Default for UnionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 5,
            top_k: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    window: usize,
    min_weight: f64,
    max_edges: usize,
    rebuild_delay_ms: u64,
}

impl FlowConfig {
    pub fn window(&self) -> usize {
        self.window.max(1)
    }

    pub fn min_weight(&self) -> f64 {
        self.min_weight
    }

    /// Zero keeps every edge.
    pub fn max_edges(&self) -> usize {
        self.max_edges
    }

    pub fn rebuild_delay(&self) -> Duration {
        Duration::from_millis(self.rebuild_delay_ms)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            window: 5,
            min_weight: 1.0,
            max_edges: 180,
            rebuild_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    tick_ms: u64,
}

impl RenderConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { tick_ms: 16 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    zone_size: f64,
    world_radius: f64,
    center_x: f64,
    center_y: f64,
    radius_px: f64,
    offset_x: f64,
    offset_y: f64,
}

impl ProjectionConfig {
    pub fn zone_size(&self) -> f64 {
        self.zone_size
    }

    pub fn world_radius(&self) -> f64 {
        self.world_radius
    }

    pub fn center(&self) -> (f64, f64) {
        (self.center_x, self.center_y)
    }

    pub fn radius_px(&self) -> f64 {
        self.radius_px
    }

    pub fn offset(&self) -> (f64, f64) {
        (self.offset_x, self.offset_y)
    }
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            zone_size: 64.0,
            world_radius: 10_000.0,
            center_x: 512.0,
            center_y: 512.0,
            radius_px: 500.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeverityConfig {
    min_yellow: f64,
    min_red: f64,
    min_valid_p99: f64,
}

impl SeverityConfig {
    pub fn min_yellow(&self) -> f64 {
        self.min_yellow
    }

    pub fn min_red(&self) -> f64 {
        self.min_red
    }

    pub fn min_valid_p99(&self) -> f64 {
        self.min_valid_p99
    }
}

impl Default for SeverityConfig {
    fn default() -> Self {
        Self {
            min_yellow: 800.0,
            min_red: 2000.0,
            min_valid_p99: 500.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    offload: bool,
    max_jobs: usize,
}

impl ComputeConfig {
    pub fn offload(&self) -> bool {
        self.offload
    }

    pub fn max_jobs(&self) -> usize {
        self.max_jobs.max(1)
    }
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            offload: true,
            max_jobs: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SeekConfig {
    utc_offset_minutes: Option<i32>,
}

impl SeekConfig {
    /// Fixed zone for interpreting local seek input; `None` means host local time.
    pub fn fixed_offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .and_then(|minutes| FixedOffset::east_opt(minutes.saturating_mul(60)))
    }
}

#[derive(Debug, Clone)]
pub struct TimelineConfigMetadata {
    path: Option<PathBuf>,
}

impl TimelineConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Loads the config named by `TIMELINE_CONFIG_PATH`, falling back to the
/// builtin defaults when the variable is unset or the file is unusable.
pub fn load_timeline_config_from_env() -> (Arc<TimelineConfig>, TimelineConfigMetadata) {
    if let Some(path) = env::var(TIMELINE_CONFIG_ENV).ok().map(PathBuf::from) {
        match TimelineConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "frame_timeline::config",
                    path = %path.display(),
                    "timeline_config.loaded=file"
                );
                return (Arc::new(config), TimelineConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "frame_timeline::config",
                    path = %path.display(),
                    error = %err,
                    "timeline_config.load_failed"
                );
            }
        }
    }

    let config = TimelineConfig::builtin();
    tracing::info!(
        target: "frame_timeline::config",
        "timeline_config.loaded=builtin"
    );
    (config, TimelineConfigMetadata::new(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_matches_defaults() {
        let builtin = TimelineConfig::builtin();
        let defaults = TimelineConfig::default();
        assert_eq!(builtin.archive().buffer_size(), defaults.archive().buffer_size());
        assert_eq!(builtin.archive().prefetch_cap(), 20);
        assert_eq!(builtin.live().ring_capacity(), 30);
        assert_eq!(builtin.union().top_k(), 500);
        assert_eq!(builtin.flow().max_edges(), 180);
        assert_eq!(builtin.manifest().refresh_interval(), Duration::from_secs(12));
        assert!(builtin.seek().fixed_offset().is_none());
    }

    #[test]
    fn partial_json_keeps_section_defaults() {
        let config = TimelineConfig::from_json_str(
            r#"{ "archive": { "buffer_size": 5 }, "seek": { "utc_offset_minutes": 120 } }"#,
        )
        .expect("config should parse");
        assert_eq!(config.archive().buffer_size(), 5);
        assert_eq!(config.archive().prefetch_cap(), 20);
        assert_eq!(config.live().poll_interval(), Duration::from_secs(1));
        assert_eq!(
            config.seek().fixed_offset(),
            FixedOffset::east_opt(2 * 3600)
        );
    }

    #[test]
    fn degenerate_sizes_are_clamped() {
        let config = TimelineConfig::from_json_str(
            r#"{ "archive": { "buffer_size": 0 }, "union": { "window": 0, "top_k": 0 } }"#,
        )
        .expect("config should parse");
        assert_eq!(config.archive().buffer_size(), 1);
        assert_eq!(config.union().window(), 1);
        assert_eq!(config.union().top_k(), 1);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = TimelineConfig::from_file(Path::new("/nonexistent/timeline.json"))
            .expect_err("missing file");
        assert!(matches!(err, TimelineConfigError::Read { .. }));
    }
}
