//! Canonical data contracts for the telemetry timeline.
//!
//! Frames arrive as loosely-typed JSON produced by several generations of the
//! aggregator. Everything downstream of this crate works with the canonical
//! [`FramePayload`] and [`Manifest`] types; the alternate field spellings are
//! resolved exactly once, in [`ingest`] and [`manifest`].

pub mod ingest;
pub mod manifest;
pub mod payload;
pub mod time;

pub use ingest::{frame_from_value, parse_frame_payload, IngestError};
pub use manifest::{parse_frame_entry, parse_manifest, FrameEntry, Manifest, ManifestError};
pub use payload::{
    FlowTransition, FrameMeta, FramePayload, HotspotThresholds, PlayerSample, WorldPosition,
    ZoneCount, ZoneKey,
};
