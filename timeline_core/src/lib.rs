//! Temporal frame management for the telemetry timeline viewer.
//!
//! The [`TimelineController`] ties together the sorted [`FrameIndex`], the
//! windowed archive buffer with its prefetch pump, the live ring and the
//! derived union/flow views. Hosts drive it with fetch results and timer
//! ticks; nothing in this crate performs I/O.

pub mod archive;
pub mod cache;
pub mod compute;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod fetch;
pub mod flow;
pub mod frame_index;
pub mod hashing;
pub mod live_ring;
pub mod projection;
pub mod scheduler;
pub mod seek;
pub mod severity;
pub mod union;
pub mod window;

pub use archive::{ArchiveBuffer, ArchiveDiagnostics, ArchiveFetch, FallbackPlan, LoadStart};
pub use cache::{CacheEntry, FrameCache};
pub use compute::{ComputeCapabilities, ComputeJob, ComputeOutput, ComputePool};
pub use config::{
    load_timeline_config_from_env, TimelineConfig, TimelineConfigError, TimelineConfigMetadata,
    BUILTIN_TIMELINE_CONFIG, TIMELINE_CONFIG_ENV,
};
pub use controller::{FrameOrigin, RenderFrame, SeekOutcome, TimelineController};
pub use diagnostics::{
    Mode, ModeChange, ModeSource, StepDirection, TimelineDiagnostics, TimelineStatus,
    TransportSpeed,
};
pub use fetch::{FetchError, FetchId, FetchRequest, FetchTarget};
pub use flow::{
    aggregate_flow, cluster_edges, FlowAggregate, FlowCluster, FlowEdge, FlowParams, FlowWindowFrame,
};
pub use frame_index::{FrameDescriptor, FrameIndex};
pub use live_ring::{LiveFrameRecord, LiveRingBuffer, PushOutcome};
pub use projection::{PlanePoint, PlaneProjection};
pub use scheduler::{Clock, ManualClock, ScheduledTask, Scheduler, SystemClock, TaskHandle};
pub use seek::{format_delta, parse_seek_input, SeekError};
pub use severity::{bucket_zones, SeverityBuckets, SeverityLevel, SeverityThresholds};
pub use union::{union_merge, UnionAggregator, UnionReport};
pub use window::{compute_window, WindowState};
