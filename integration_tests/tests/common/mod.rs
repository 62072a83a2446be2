#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use frame_schema::time::{format_compact, format_iso};
use serde_json::{json, Value};
use timeline_core::{
    ComputePool, FetchError, FetchRequest, FetchTarget, ManualClock, TimelineConfig,
    TimelineController,
};

/// 2024-05-01T10:00:00Z
pub const BASE_SEC: i64 = 1_714_557_600;
pub const CADENCE_SEC: i64 = 60;
pub const LIVE_LOCATOR: &str = "frame_live.json";

pub fn frame_sec(index: usize) -> i64 {
    BASE_SEC + index as i64 * CADENCE_SEC
}

pub fn frame_locator(index: usize) -> String {
    timestamp_locator(frame_sec(index))
}

pub fn timestamp_locator(timestamp_sec: i64) -> String {
    format!("frames/frame_{}.json", format_compact(timestamp_sec))
}

pub fn frame_body(timestamp_sec: i64, hotspots: Value, flow: Value) -> String {
    json!({
        "meta": { "schema": "test", "t": format_iso(timestamp_sec) },
        "hotspots": hotspots,
        "flow": flow,
    })
    .to_string()
}

pub fn plain_frame(index: usize) -> String {
    frame_body(
        frame_sec(index),
        json!([{ "zx": index as i64, "zy": 0, "count": 100 }]),
        json!([]),
    )
}

/// Manifest listing `count` frames a minute apart.
pub fn archive_manifest(count: usize, revision: &str) -> String {
    let timestamps: Vec<i64> = (0..count).map(frame_sec).collect();
    manifest_for(&timestamps, revision)
}

/// Manifest listing bare compact-stamped locators. `revision` feeds the
/// manifest signature.
pub fn manifest_for(timestamps: &[i64], revision: &str) -> String {
    let frames: Vec<String> = timestamps.iter().copied().map(timestamp_locator).collect();
    json!({
        "time": {
            "earliest": revision,
            "latest": timestamps.last().copied().map(format_iso),
            "cadence_s": CADENCE_SEC,
            "frames": frames,
        },
        "paths": { "web": { "frame_live": LIVE_LOCATOR } }
    })
    .to_string()
}

/// In-memory stand-in for the frame server, driving a controller on a
/// manual clock.
pub struct TimelineHost {
    pub clock: ManualClock,
    pub controller: TimelineController,
    pub manifest: Option<String>,
    pub documents: HashMap<String, String>,
    pub live: Option<String>,
    pub pending: Vec<FetchRequest>,
    pub issued: Vec<FetchTarget>,
}

impl TimelineHost {
    pub fn new(config: &str) -> Self {
        Self::with_pool(config, ComputePool::in_process())
    }

    pub fn with_pool(config: &str, pool: ComputePool) -> Self {
        let clock = ManualClock::new();
        let config = Arc::new(TimelineConfig::from_json_str(config).expect("test config parses"));
        let controller = TimelineController::new(config, Arc::new(clock.clone()), pool);
        Self {
            clock,
            controller,
            manifest: None,
            documents: HashMap::new(),
            live: None,
            pending: Vec::new(),
            issued: Vec::new(),
        }
    }

    pub fn with_archive(mut self, count: usize) -> Self {
        self.manifest = Some(archive_manifest(count, "r1"));
        for index in 0..count {
            self.documents.insert(frame_locator(index), plain_frame(index));
        }
        self
    }

    /// Serves one frame per timestamp, with bodies from `body(index, sec)`.
    pub fn with_frames(mut self, timestamps: &[i64], body: impl Fn(usize, i64) -> String) -> Self {
        self.manifest = Some(manifest_for(timestamps, "r1"));
        for (index, &sec) in timestamps.iter().enumerate() {
            self.documents.insert(timestamp_locator(sec), body(index, sec));
        }
        self
    }

    /// Starts the controller and answers everything it asks for.
    pub fn start(&mut self) {
        self.controller.start();
        self.resolve_all();
    }

    pub fn collect(&mut self) {
        let requests = self.controller.take_fetch_requests();
        self.issued
            .extend(requests.iter().map(|request| request.target.clone()));
        self.pending.extend(requests);
    }

    pub fn respond(&mut self, request: FetchRequest) {
        let result = self.body_for(&request.target);
        self.controller.on_fetch_complete(request.id, result);
    }

    fn body_for(&self, target: &FetchTarget) -> Result<String, FetchError> {
        let found = match target {
            FetchTarget::Manifest => self.manifest.clone(),
            FetchTarget::Live { .. } => self.live.clone(),
            FetchTarget::Archive { locator, .. } => self.documents.get(locator).cloned(),
        };
        found.ok_or_else(|| FetchError::NotFound {
            locator: target.locator().unwrap_or("manifest.json").to_string(),
        })
    }

    /// Answers requests until the controller stops issuing new ones.
    pub fn resolve_all(&mut self) {
        loop {
            self.collect();
            if self.pending.is_empty() {
                break;
            }
            for request in std::mem::take(&mut self.pending) {
                self.respond(request);
            }
        }
    }

    /// Answers only the pending requests matching `keep`; returns how many.
    pub fn resolve_matching(&mut self, keep: impl Fn(&FetchTarget) -> bool) -> usize {
        self.collect();
        let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|request| keep(&request.target));
        self.pending = rest;
        let count = matched.len();
        for request in matched {
            self.respond(request);
        }
        count
    }

    /// Moves the clock and fires due timers without answering fetches.
    pub fn advance(&mut self, ms: u64) {
        self.clock.advance(Duration::from_millis(ms));
        self.controller.run_due_timers();
        self.collect();
    }

    /// Moves the clock, fires due timers and answers every fetch.
    pub fn settle(&mut self, ms: u64) {
        self.advance(ms);
        self.resolve_all();
    }

    pub fn archive_fetches_for(&self, index: usize) -> usize {
        self.issued
            .iter()
            .filter(|target| matches!(target, FetchTarget::Archive { index: i, .. } if *i == index))
            .count()
    }

    pub fn archive_fetch_count(&self) -> usize {
        self.issued
            .iter()
            .filter(|target| matches!(target, FetchTarget::Archive { .. }))
            .count()
    }

    pub fn manifest_fetch_count(&self) -> usize {
        self.issued
            .iter()
            .filter(|target| matches!(target, FetchTarget::Manifest))
            .count()
    }

    pub fn live_fetch_count(&self) -> usize {
        self.issued
            .iter()
            .filter(|target| matches!(target, FetchTarget::Live { .. }))
            .count()
    }
}
