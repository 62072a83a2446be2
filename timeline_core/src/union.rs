use std::sync::Arc;

use ahash::AHashMap;
use frame_schema::{FramePayload, ZoneCount, ZoneKey};
use serde::Serialize;

use crate::config::UnionConfig;

/// How much of the requested span a union actually covered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UnionReport {
    pub enabled: bool,
    pub n: usize,
    pub loaded: usize,
    pub wanted: usize,
}

/// Per-zone maximum across `frames`, highest counts first, at most `top_k`.
/// Equal counts are ordered by zone.
pub fn union_merge<'a, I>(frames: I, top_k: usize) -> Vec<ZoneCount>
where
    I: IntoIterator<Item = &'a FramePayload>,
{
    let mut peaks: AHashMap<ZoneKey, f64> = AHashMap::new();
    for frame in frames {
        for hotspot in &frame.hotspots {
            peaks
                .entry(hotspot.zone)
                .and_modify(|peak| *peak = peak.max(hotspot.count))
                .or_insert(hotspot.count);
        }
    }
    let mut merged: Vec<ZoneCount> = peaks
        .into_iter()
        .map(|(zone, count)| ZoneCount { zone, count })
        .collect();
    merged.sort_by(|a, b| b.count.total_cmp(&a.count).then(a.zone.cmp(&b.zone)));
    merged.truncate(top_k.max(1));
    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnionAggregator {
    enabled: bool,
    window: usize,
    top_k: usize,
}

impl UnionAggregator {
    pub fn from_config(config: &UnionConfig) -> Self {
        Self {
            enabled: config.enabled(),
            window: config.window(),
            top_k: config.top_k(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Replaces `base`'s hotspots with the union over `frames`.
    ///
    /// `wanted` is how many frames exist for the span; `frames` holds the
    /// ones that were actually available. With nothing available the base
    /// frame is returned untouched.
    pub fn merge(
        &self,
        base: &FramePayload,
        frames: &[Arc<FramePayload>],
        wanted: usize,
    ) -> (FramePayload, UnionReport) {
        if !self.enabled {
            return (
                base.clone(),
                UnionReport {
                    enabled: false,
                    n: self.window,
                    loaded: 0,
                    wanted: 0,
                },
            );
        }
        let report = UnionReport {
            enabled: true,
            n: self.window,
            loaded: frames.len(),
            wanted: wanted.min(self.window),
        };
        if frames.is_empty() {
            return (base.clone(), report);
        }
        let merged = union_merge(frames.iter().map(|frame| frame.as_ref()), self.top_k);
        (base.with_hotspots(merged), report)
    }
}
