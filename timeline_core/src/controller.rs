//! The timeline state machine.
//!
//! [`TimelineController`] owns every piece of temporal state: the frame
//! index, the archive window, the live ring, transport, scrubbing and the
//! derived union/flow views. It performs no I/O and never blocks. The host
//! drains [`FetchRequest`]s, reports their outcome via
//! [`TimelineController::on_fetch_complete`], and calls
//! [`TimelineController::run_due_timers`] when
//! [`TimelineController::time_until_next_timer`] elapses.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use frame_schema::time::{format_iso, parse_iso_seconds};
use frame_schema::{parse_frame_payload, parse_manifest, FramePayload, Manifest};

use crate::archive::{ArchiveBuffer, ArchiveFetch, FallbackPlan, LoadStart};
use crate::compute::{ComputeJob, ComputeOutput, ComputePool};
use crate::config::TimelineConfig;
use crate::diagnostics::{
    FlowDiagnostics, ManifestDiagnostics, Mode, ModeChange, ModeSource, SeekDiagnostics,
    StepDirection, TimelineDiagnostics, TimelineStatus, TransportDiagnostics, TransportSpeed,
};
use crate::fetch::{FetchError, FetchId, FetchRequest, FetchTarget};
use crate::flow::{FlowAggregate, FlowParams, FlowWindowFrame};
use crate::frame_index::FrameIndex;
use crate::hashing::payload_signature;
use crate::live_ring::{LiveRingBuffer, PushOutcome};
use crate::projection::PlaneProjection;
use crate::scheduler::{Clock, ScheduledTask, Scheduler, TaskHandle};
use crate::seek::{format_delta, parse_seek_input, SeekError};
use crate::severity::{SeverityBuckets, SeverityThresholds};
use crate::union::{UnionAggregator, UnionReport};

const LOG_TARGET: &str = "frame_timeline::controller";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    Live { sequence: u64 },
    Archive { index: usize, requested: usize },
}

/// What the renderer should draw.
#[derive(Debug, Clone)]
pub struct RenderFrame {
    /// Union-merged once the merge has landed, the raw frame until then.
    pub payload: Arc<FramePayload>,
    pub base: Arc<FramePayload>,
    pub origin: FrameOrigin,
    pub timestamp_sec: Option<i64>,
    pub union: Option<UnionReport>,
    pub buckets: Option<SeverityBuckets>,
}

impl RenderFrame {
    pub fn snapped(&self) -> bool {
        matches!(self.origin, FrameOrigin::Archive { index, requested } if index != requested)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeekOutcome {
    pub target_ms: i64,
    pub nearest_index: usize,
    pub nearest_sec: i64,
}

#[derive(Debug, Clone)]
enum FetchPurpose {
    Manifest,
    Live,
    Archive(ArchiveFetch),
}

#[derive(Debug)]
struct ScrubLoad {
    request_id: u64,
    plan: FallbackPlan,
    awaiting: Option<usize>,
}

#[derive(Debug)]
struct Transport {
    playing: bool,
    direction: StepDirection,
    speed: TransportSpeed,
    task: Option<TaskHandle>,
    ticks: u64,
}

pub struct TimelineController {
    config: Arc<TimelineConfig>,
    scheduler: Scheduler,
    compute: ComputePool,
    projection: PlaneProjection,
    union: UnionAggregator,
    flow_params: FlowParams,

    frames: FrameIndex,
    archive: ArchiveBuffer,
    live: LiveRingBuffer,
    manifest_diag: ManifestDiagnostics,

    mode: Mode,
    mode_lock: Option<Mode>,
    last_mode_change: Option<ModeChange>,
    status: TimelineStatus,
    note: Option<String>,

    focus: Option<usize>,
    rendered_index: Option<usize>,
    current: Option<RenderFrame>,
    delta_anchor: Option<i64>,
    last_seek: Option<SeekDiagnostics>,
    transport: Transport,

    scrub_pending: Option<usize>,
    scrub_busy: Option<ScrubLoad>,
    scrub_request_id: u64,
    render_task: Option<TaskHandle>,

    outbox: Vec<FetchRequest>,
    in_flight: AHashMap<FetchId, FetchPurpose>,
    next_fetch_id: u64,
    manifest_in_flight: bool,
    live_in_flight: bool,
    manifest_retry_task: Option<TaskHandle>,
    manifest_refresh_task: Option<TaskHandle>,
    live_poll_task: Option<TaskHandle>,

    flow: FlowAggregate,
    flow_diag: FlowDiagnostics,
    flow_task: Option<TaskHandle>,
    flow_pending: Option<u64>,
    union_pending: Option<u64>,
}

impl std::fmt::Debug for TimelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineController")
            .field("mode", &self.mode)
            .field("status", &self.status)
            .field("focus", &self.focus)
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl TimelineController {
    pub fn new(config: Arc<TimelineConfig>, clock: Arc<dyn Clock>, compute: ComputePool) -> Self {
        let manifest_diag = ManifestDiagnostics {
            live_locator: config.live().frame_locator().to_string(),
            ..ManifestDiagnostics::default()
        };
        Self {
            scheduler: Scheduler::new(clock),
            compute,
            projection: PlaneProjection::from_config(config.projection()),
            union: UnionAggregator::from_config(config.union()),
            flow_params: FlowParams::from_config(config.flow()),
            frames: FrameIndex::default(),
            archive: ArchiveBuffer::new(config.archive()),
            live: LiveRingBuffer::new(config.live().ring_capacity()),
            manifest_diag,
            mode: Mode::Live,
            mode_lock: None,
            last_mode_change: None,
            status: TimelineStatus::Initializing,
            note: None,
            focus: None,
            rendered_index: None,
            current: None,
            delta_anchor: None,
            last_seek: None,
            transport: Transport {
                playing: false,
                direction: StepDirection::Forward,
                speed: TransportSpeed::X1,
                task: None,
                ticks: 0,
            },
            scrub_pending: None,
            scrub_busy: None,
            scrub_request_id: 0,
            render_task: None,
            outbox: Vec::new(),
            in_flight: AHashMap::new(),
            next_fetch_id: 0,
            manifest_in_flight: false,
            live_in_flight: false,
            manifest_retry_task: None,
            manifest_refresh_task: None,
            live_poll_task: None,
            flow: FlowAggregate::default(),
            flow_diag: FlowDiagnostics::default(),
            flow_task: None,
            flow_pending: None,
            union_pending: None,
            config,
        }
    }

    /// Requests the first manifest and arms live polling.
    pub fn start(&mut self) {
        tracing::info!(target: LOG_TARGET, "timeline.start");
        self.request_manifest();
        self.arm_live_poll();
    }

    // ---- host plumbing -------------------------------------------------

    pub fn take_fetch_requests(&mut self) -> Vec<FetchRequest> {
        std::mem::take(&mut self.outbox)
    }

    pub fn time_until_next_timer(&self) -> Option<Duration> {
        self.scheduler.time_until_next()
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    pub fn run_due_timers(&mut self) {
        for (handle, task) in self.scheduler.drain_due() {
            match task {
                ScheduledTask::ArchivePump => self.on_archive_pump(handle),
                ScheduledTask::TransportTick => self.on_transport_tick(handle),
                ScheduledTask::LivePoll => self.on_live_poll(handle),
                ScheduledTask::ManifestRefresh => self.on_manifest_refresh(handle),
                ScheduledTask::ManifestRetry => self.on_manifest_retry(handle),
                ScheduledTask::RenderTick => self.on_render_tick(handle),
                ScheduledTask::FlowRebuild => self.on_flow_rebuild(handle),
            }
        }
        self.poll_compute();
    }

    pub fn on_fetch_complete(&mut self, id: FetchId, result: Result<String, FetchError>) {
        let Some(purpose) = self.in_flight.remove(&id) else {
            tracing::debug!(target: LOG_TARGET, id = id.0, "fetch.unknown_id");
            return;
        };
        match purpose {
            FetchPurpose::Manifest => self.on_manifest_fetched(result),
            FetchPurpose::Live => self.on_live_fetched(result),
            FetchPurpose::Archive(fetch) => self.on_archive_fetched(fetch, result),
        }
        self.poll_compute();
    }

    /// Applies background results whose correlation id is still current.
    pub fn poll_compute(&mut self) {
        for response in self.compute.drain() {
            match response.output {
                ComputeOutput::Flow(aggregate) => {
                    if self.flow_pending != Some(response.correlation_id) {
                        self.flow_diag.stale_discarded += 1;
                        continue;
                    }
                    self.flow_pending = None;
                    self.flow_diag.edges = aggregate.edge_count;
                    self.flow_diag.clusters = aggregate.clusters.len();
                    self.flow_diag.frames = aggregate.frame_count;
                    self.flow = aggregate;
                }
                ComputeOutput::Union(outcome) => {
                    if self.union_pending != Some(response.correlation_id) {
                        continue;
                    }
                    self.union_pending = None;
                    if let Some(current) = self.current.as_mut() {
                        current.payload = Arc::new(outcome.frame);
                        current.union = Some(outcome.report);
                        current.buckets = Some(outcome.buckets);
                    }
                }
            }
        }
    }

    // ---- read side -----------------------------------------------------

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn status(&self) -> TimelineStatus {
        self.status
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn focus(&self) -> Option<usize> {
        self.focus
    }

    pub fn frames(&self) -> &FrameIndex {
        &self.frames
    }

    pub fn archive(&self) -> &ArchiveBuffer {
        &self.archive
    }

    pub fn live(&self) -> &LiveRingBuffer {
        &self.live
    }

    pub fn current_frame(&self) -> Option<&RenderFrame> {
        self.current.as_ref()
    }

    pub fn flow(&self) -> &FlowAggregate {
        &self.flow
    }

    pub fn severity_buckets(&self) -> Option<&SeverityBuckets> {
        self.current.as_ref().and_then(|frame| frame.buckets.as_ref())
    }

    pub fn is_playing(&self) -> bool {
        self.transport.playing
    }

    pub fn scrub_enabled(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn delta_label(&self) -> Option<String> {
        let anchor = self.delta_anchor?;
        let focus_sec = self.focus_timestamp()?;
        Some(format_delta(focus_sec, anchor))
    }

    pub fn diagnostics(&self) -> TimelineDiagnostics {
        TimelineDiagnostics {
            mode: self.mode,
            mode_lock: self.mode_lock,
            last_mode_change: self.last_mode_change.clone(),
            status: self.status,
            note: self.note.clone(),
            frame_count: self.frames.len(),
            skipped_manifest_entries: self.frames.skipped_entries(),
            scrub_enabled: self.scrub_enabled(),
            focus: self.focus,
            focus_time: self.focus_timestamp().map(format_iso),
            rendered_index: self.rendered_index,
            delta: self.delta_label(),
            scrub_request_id: self.scrub_request_id,
            pending_fetches: self.in_flight.len() + self.outbox.len(),
            transport: TransportDiagnostics {
                playing: self.transport.playing,
                direction: self.transport.direction,
                speed: self.transport.speed,
                tick_ms: self.transport.speed.tick_ms(),
                ticks: self.transport.ticks,
            },
            seek: self.last_seek.clone(),
            manifest: ManifestDiagnostics {
                generation: self.archive.generation(),
                ..self.manifest_diag.clone()
            },
            archive: self.archive.diagnostics().clone(),
            live: self.live.diagnostics().clone(),
            union: self.current.as_ref().and_then(|frame| frame.union),
            flow: self.flow_diag.clone(),
            compute: self.compute.diagnostics().clone(),
        }
    }

    // ---- user actions --------------------------------------------------

    /// Follow the live feed.
    pub fn select_live(&mut self) {
        self.set_mode(Mode::Live, ModeSource::User);
        self.stop_transport();
        self.invalidate_scrub();
        self.archive.stop_pump(&mut self.scheduler);
        self.delta_anchor = None;
        self.focus = self.frames.newest_index();
        self.arm_live_poll();
        self.arm_manifest_refresh();
        if let Some(record) = self.live.newest().cloned() {
            self.show_live(record.sequence, record.payload);
        }
        self.schedule_flow_rebuild();
    }

    /// Freeze on the archive, starting from the current focus.
    pub fn select_archive(&mut self) {
        self.set_mode(Mode::Archive, ModeSource::User);
        self.stop_transport();
        self.cancel_live_tasks();
        if self.focus.is_none() {
            self.focus = self.frames.newest_index();
        }
        self.delta_anchor = self.focus_timestamp();
        if let Some(focus) = self.focus {
            self.refresh_window(focus);
            self.request_render(focus);
        }
    }

    /// Jump straight to `index`; stops playback.
    pub fn scrub(&mut self, index: usize) {
        let Some(last) = self.frames.newest_index() else {
            return;
        };
        self.apply_archive_index(index.min(last), true, ModeSource::User);
    }

    /// Move one frame without touching playback. Returns false at either end.
    pub fn step(&mut self, direction: StepDirection) -> bool {
        let Some(last) = self.frames.newest_index() else {
            return false;
        };
        if self.mode != Mode::Archive {
            self.set_mode(Mode::Archive, ModeSource::Transport);
            self.cancel_live_tasks();
        }
        self.ensure_anchor();
        let current = self.focus.unwrap_or(last);
        let next = direction.apply(current, last);
        if next == current {
            return false;
        }
        self.apply_archive_index(next, false, ModeSource::Transport);
        true
    }

    pub fn play(&mut self) {
        let direction = self.transport.direction;
        self.start_transport(direction);
    }

    pub fn pause(&mut self) {
        self.stop_transport();
    }

    pub fn toggle_play(&mut self) {
        if self.transport.playing {
            self.stop_transport();
        } else {
            self.play();
        }
    }

    pub fn rewind(&mut self) {
        self.start_transport(StepDirection::Backward);
    }

    pub fn forward(&mut self) {
        self.start_transport(StepDirection::Forward);
    }

    pub fn set_speed(&mut self, speed: TransportSpeed) {
        self.transport.speed = speed;
        if self.transport.playing {
            self.cancel_transport_task();
            self.schedule_transport_tick();
        }
    }

    /// Jump to the frame nearest a typed time. Invalid input leaves every
    /// piece of state untouched.
    pub fn seek(&mut self, input: &str) -> Result<SeekOutcome, SeekError> {
        if self.frames.is_empty() {
            return Err(SeekError::NoFrames);
        }
        let reference = self
            .focus_timestamp()
            .or_else(|| self.current.as_ref().and_then(|frame| frame.timestamp_sec));
        let target_ms = match self.config.seek().fixed_offset() {
            Some(offset) => parse_seek_input(input, reference, &offset)?,
            None => parse_seek_input(input, reference, &chrono::Local)?,
        };
        let nearest_index = self
            .frames
            .nearest_index(target_ms as f64 / 1000.0)
            .ok_or(SeekError::NoFrames)?;
        let nearest_sec = self
            .frames
            .get(nearest_index)
            .map(|frame| frame.timestamp_sec)
            .ok_or(SeekError::NoFrames)?;

        self.last_seek = Some(SeekDiagnostics {
            input: input.to_string(),
            target_ms,
            nearest_index,
            nearest_sec,
            delta_sec: nearest_sec as f64 - target_ms as f64 / 1000.0,
        });
        tracing::info!(
            target: LOG_TARGET,
            input,
            nearest_index,
            "seek.applied"
        );
        self.delta_anchor = Some(nearest_sec);
        self.apply_archive_index(nearest_index, true, ModeSource::Seek);
        Ok(SeekOutcome {
            target_ms,
            nearest_index,
            nearest_sec,
        })
    }

    // ---- mode ------------------------------------------------------------

    fn set_mode(&mut self, next: Mode, source: ModeSource) {
        if source == ModeSource::Startup {
            if let Some(lock) = self.mode_lock {
                if lock != next {
                    return;
                }
            }
        } else {
            self.mode_lock = Some(next);
        }
        if self.mode == next {
            return;
        }
        let change = ModeChange {
            from: self.mode,
            to: next,
            source,
            at_ms: u64::try_from(self.scheduler.now().as_millis()).unwrap_or(u64::MAX),
        };
        tracing::info!(
            target: LOG_TARGET,
            from = ?change.from,
            to = ?change.to,
            source = ?change.source,
            "mode.changed"
        );
        self.mode = next;
        self.last_mode_change = Some(change);
    }

    fn cancel_live_tasks(&mut self) {
        if let Some(handle) = self.live_poll_task.take() {
            self.scheduler.cancel(handle);
        }
    }

    // ---- manifest --------------------------------------------------------

    fn request_manifest(&mut self) {
        if self.manifest_in_flight {
            return;
        }
        self.manifest_in_flight = true;
        self.manifest_diag.loads += 1;
        self.issue_fetch(FetchTarget::Manifest, FetchPurpose::Manifest);
    }

    fn on_manifest_fetched(&mut self, result: Result<String, FetchError>) {
        self.manifest_in_flight = false;
        let parsed = result.map_err(|err| err.to_string()).and_then(|text| {
            parse_manifest(&text).map_err(|err| err.to_string())
        });
        match parsed {
            Ok(manifest) => {
                let force = self.status == TimelineStatus::Initializing;
                self.apply_manifest(manifest, force);
            }
            Err(error) => {
                self.manifest_diag.failures += 1;
                tracing::warn!(target: LOG_TARGET, %error, "manifest.load_failed");
                if self.status == TimelineStatus::Initializing {
                    self.note = Some("Waiting for manifest".to_string());
                    if self.manifest_retry_task.is_none() {
                        let delay = self.config.manifest().retry_interval();
                        self.manifest_retry_task =
                            Some(self.scheduler.schedule(delay, ScheduledTask::ManifestRetry));
                    }
                }
            }
        }
    }

    fn apply_manifest(&mut self, manifest: Manifest, force: bool) {
        if let Some(locator) = manifest.live_locator.clone() {
            self.manifest_diag.live_locator = locator;
        }
        let signature = manifest.signature();
        if !force && self.manifest_diag.signature.as_deref() == Some(signature.as_str()) {
            tracing::trace!(target: LOG_TARGET, "manifest.unchanged");
            return;
        }

        let preserved_sec = self.focus_timestamp();
        self.frames = FrameIndex::build_from_manifest(&manifest);
        self.manifest_diag.signature = Some(signature);
        self.manifest_diag.rebuilds += 1;
        self.archive.reset(&mut self.scheduler);
        self.rendered_index = None;
        self.scrub_busy = None;
        self.scrub_pending = None;
        if self.status == TimelineStatus::Initializing {
            self.note = None;
        }
        tracing::info!(
            target: LOG_TARGET,
            frames = self.frames.len(),
            skipped = self.frames.skipped_entries(),
            generation = self.archive.generation(),
            "manifest.applied"
        );

        if self.frames.is_empty() {
            self.status = TimelineStatus::NoFrames;
            self.focus = None;
            self.note = Some("No archive frames".to_string());
            self.arm_manifest_refresh();
            return;
        }
        self.status = TimelineStatus::Ready;
        self.arm_manifest_refresh();

        match self.mode {
            Mode::Live => self.focus = self.frames.newest_index(),
            Mode::Archive => {
                let focus = preserved_sec
                    .and_then(|sec| self.frames.nearest_older_or_equal_index(sec))
                    .unwrap_or(0);
                self.focus = Some(focus);
                self.refresh_window(focus);
                self.request_render(focus);
            }
        }
    }

    fn on_manifest_retry(&mut self, handle: TaskHandle) {
        if self.manifest_retry_task != Some(handle) {
            return;
        }
        self.manifest_retry_task = None;
        if self.status == TimelineStatus::Initializing {
            self.request_manifest();
        }
    }

    fn arm_manifest_refresh(&mut self) {
        if let Some(handle) = self.manifest_refresh_task {
            if self.scheduler.is_pending(handle) {
                return;
            }
        }
        let delay = self.config.manifest().refresh_interval();
        self.manifest_refresh_task =
            Some(self.scheduler.schedule(delay, ScheduledTask::ManifestRefresh));
    }

    fn on_manifest_refresh(&mut self, handle: TaskHandle) {
        if self.manifest_refresh_task != Some(handle) {
            return;
        }
        self.manifest_refresh_task = None;
        self.request_manifest();
        self.arm_manifest_refresh();
    }

    // ---- live ------------------------------------------------------------

    fn arm_live_poll(&mut self) {
        if self.mode != Mode::Live {
            return;
        }
        if let Some(handle) = self.live_poll_task {
            if self.scheduler.is_pending(handle) {
                return;
            }
        }
        let delay = self.config.live().poll_interval();
        self.live_poll_task = Some(self.scheduler.schedule(delay, ScheduledTask::LivePoll));
    }

    fn on_live_poll(&mut self, handle: TaskHandle) {
        if self.live_poll_task != Some(handle) {
            return;
        }
        self.live_poll_task = None;
        if self.mode != Mode::Live {
            return;
        }
        if self.status != TimelineStatus::Initializing && !self.live_in_flight {
            self.live_in_flight = true;
            self.live.record_poll();
            let locator = self.manifest_diag.live_locator.clone();
            self.issue_fetch(FetchTarget::Live { locator }, FetchPurpose::Live);
        }
        self.arm_live_poll();
    }

    fn on_live_fetched(&mut self, result: Result<String, FetchError>) {
        self.live_in_flight = false;
        let payload = match result.map_err(|err| err.to_string()).and_then(|text| {
            parse_frame_payload(&text).map_err(|err| err.to_string())
        }) {
            Ok(payload) => Arc::new(payload),
            Err(error) => {
                self.live.record_poll_failure();
                tracing::debug!(target: "frame_timeline::live", %error, "live.poll_failed");
                return;
            }
        };
        let key = payload
            .timestamp_key()
            .map(str::to_owned)
            .unwrap_or_else(|| payload_signature(&payload));
        match self.live.push(Arc::clone(&payload), &key) {
            PushOutcome::Duplicate => {
                tracing::trace!(target: "frame_timeline::live", %key, "live.skipped=duplicate");
            }
            PushOutcome::Appended { sequence, evicted } => {
                tracing::debug!(
                    target: "frame_timeline::live",
                    sequence,
                    evicted,
                    "live.pushed"
                );
                if self.mode == Mode::Live {
                    self.show_live(sequence, payload);
                    self.schedule_flow_rebuild();
                }
            }
        }
    }

    fn show_live(&mut self, sequence: u64, payload: Arc<FramePayload>) {
        let n = self.union.window();
        let frames: Vec<Arc<FramePayload>> = self
            .live
            .tail(n)
            .map(|record| Arc::clone(&record.payload))
            .collect();
        let wanted = n.min(self.live.len());
        let timestamp_sec = payload.timestamp_key().and_then(parse_iso_seconds);
        self.set_current(
            payload,
            FrameOrigin::Live { sequence },
            timestamp_sec,
            frames,
            wanted,
        );
    }

    // ---- archive ---------------------------------------------------------

    fn apply_archive_index(&mut self, index: usize, stop_transport: bool, source: ModeSource) {
        self.set_mode(Mode::Archive, source);
        self.cancel_live_tasks();
        if stop_transport {
            self.stop_transport();
        }
        self.focus = Some(index);
        self.refresh_window(index);
        self.request_render(index);
    }

    fn refresh_window(&mut self, focus: usize) {
        let batch = self.archive.ensure_window(focus, &self.frames);
        for fetch in batch {
            self.issue_archive_fetch(fetch);
        }
    }

    fn on_archive_pump(&mut self, handle: TaskHandle) {
        if self.mode != Mode::Archive {
            return;
        }
        let Some(focus) = self.focus else {
            return;
        };
        let batch = self.archive.on_pump_timer(handle, focus, &self.frames);
        for fetch in batch {
            self.issue_archive_fetch(fetch);
        }
    }

    fn on_archive_fetched(&mut self, fetch: ArchiveFetch, result: Result<String, FetchError>) {
        let payload = match result {
            Ok(text) => match parse_frame_payload(&text) {
                Ok(payload) => Some(Arc::new(payload)),
                Err(err) => {
                    tracing::warn!(
                        target: "frame_timeline::archive",
                        index = fetch.index,
                        error = %err,
                        "archive.decode_failed"
                    );
                    None
                }
            },
            Err(err) => {
                tracing::debug!(
                    target: "frame_timeline::archive",
                    index = fetch.index,
                    error = %err,
                    "archive.fetch_error"
                );
                None
            }
        };

        let completion = self
            .archive
            .complete(&fetch, payload.clone(), &mut self.scheduler);
        if !completion.current {
            return;
        }
        if completion.stored && self.mode == Mode::Archive {
            self.schedule_flow_rebuild();
        }

        let awaited = self
            .scrub_busy
            .as_ref()
            .is_some_and(|load| load.awaiting == Some(fetch.index));
        if !awaited {
            return;
        }
        if let Some(mut load) = self.scrub_busy.take() {
            load.awaiting = None;
            match payload {
                Some(payload) => self.finish_scrub(load, fetch.index, Some(payload)),
                None => {
                    load.plan.advance();
                    self.advance_scrub(load);
                }
            }
        }
    }

    fn issue_archive_fetch(&mut self, fetch: ArchiveFetch) {
        let target = FetchTarget::Archive {
            index: fetch.index,
            locator: fetch.locator.clone(),
            generation: fetch.generation,
        };
        self.issue_fetch(target, FetchPurpose::Archive(fetch));
    }

    // ---- scrubbing -------------------------------------------------------

    /// Coalesces scrub targets until the next render tick.
    fn request_render(&mut self, index: usize) {
        self.scrub_pending = Some(index);
        if let Some(handle) = self.render_task {
            if self.scheduler.is_pending(handle) {
                return;
            }
        }
        let delay = self.config.render().tick();
        self.render_task = Some(self.scheduler.schedule(delay, ScheduledTask::RenderTick));
    }

    fn on_render_tick(&mut self, handle: TaskHandle) {
        if self.render_task != Some(handle) {
            return;
        }
        self.render_task = None;
        if self.mode != Mode::Archive {
            self.scrub_pending = None;
            return;
        }
        let Some(index) = self.scrub_pending else {
            return;
        };
        if self.scrub_busy.is_some() {
            // The running load is now stale; the pending target is
            // picked up again once it settles.
            self.scrub_request_id += 1;
            return;
        }
        self.scrub_pending = None;
        if self.rendered_index == Some(index) {
            return;
        }
        self.scrub_request_id += 1;
        let load = ScrubLoad {
            request_id: self.scrub_request_id,
            plan: FallbackPlan::new(index, self.frames.len()),
            awaiting: None,
        };
        self.advance_scrub(load);
    }

    fn advance_scrub(&mut self, mut load: ScrubLoad) {
        loop {
            let Some(candidate) = load.plan.current() else {
                self.finish_scrub(load, 0, None);
                return;
            };
            match self.archive.begin_load(candidate, &self.frames) {
                LoadStart::Cached(payload) => {
                    self.finish_scrub(load, candidate, Some(payload));
                    return;
                }
                LoadStart::Pending => {
                    load.awaiting = Some(candidate);
                    self.scrub_busy = Some(load);
                    return;
                }
                LoadStart::Dispatch(fetch) => {
                    load.awaiting = Some(candidate);
                    self.scrub_busy = Some(load);
                    self.issue_archive_fetch(fetch);
                    return;
                }
                LoadStart::OutOfRange => {
                    load.plan.advance();
                }
            }
        }
    }

    fn finish_scrub(
        &mut self,
        load: ScrubLoad,
        index: usize,
        payload: Option<Arc<FramePayload>>,
    ) {
        self.scrub_busy = None;
        let target = load.plan.target();
        if load.request_id != self.scrub_request_id || self.mode != Mode::Archive {
            tracing::debug!(
                target: LOG_TARGET,
                request_id = load.request_id,
                latest = self.scrub_request_id,
                "scrub.discarded=stale"
            );
        } else {
            match payload {
                Some(payload) => {
                    self.note = (index != target).then(|| {
                        let when = self
                            .frames
                            .get(index)
                            .map(|frame| format_iso(frame.timestamp_sec))
                            .unwrap_or_default();
                        format!("Frame missing, snapped to {when}")
                    });
                    self.rendered_index = Some(index);
                    let timestamp_sec = self.frames.get(index).map(|frame| frame.timestamp_sec);
                    self.show_archive(index, target, timestamp_sec, payload);
                }
                None => {
                    self.note = Some(format!("Frame {target} unavailable"));
                    tracing::warn!(target: LOG_TARGET, index = target, "scrub.unavailable");
                }
            }
        }
        if let Some(pending) = self.scrub_pending {
            self.request_render(pending);
        }
    }

    fn invalidate_scrub(&mut self) {
        self.scrub_request_id += 1;
        self.scrub_pending = None;
        if let Some(handle) = self.render_task.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn show_archive(
        &mut self,
        index: usize,
        requested: usize,
        timestamp_sec: Option<i64>,
        payload: Arc<FramePayload>,
    ) {
        let n = self.union.window();
        let start = (index + 1).saturating_sub(n);
        let mut frames: Vec<Arc<FramePayload>> = if index > start {
            self.archive
                .cache()
                .payloads_in(start, index - 1)
                .into_iter()
                .map(|(_, payload)| payload)
                .collect()
        } else {
            Vec::new()
        };
        frames.push(Arc::clone(&payload));
        let wanted = index - start + 1;
        self.set_current(
            payload,
            FrameOrigin::Archive { index, requested },
            timestamp_sec,
            frames,
            wanted,
        );
        self.schedule_flow_rebuild();
    }

    fn set_current(
        &mut self,
        payload: Arc<FramePayload>,
        origin: FrameOrigin,
        timestamp_sec: Option<i64>,
        union_frames: Vec<Arc<FramePayload>>,
        wanted: usize,
    ) {
        let thresholds =
            SeverityThresholds::resolve(payload.hotspot_thresholds.as_ref(), self.config.severity());
        let job = ComputeJob::Union {
            base: Arc::clone(&payload),
            frames: union_frames,
            wanted,
            aggregator: self.union,
            thresholds,
            projection: self.projection,
        };
        self.union_pending = Some(self.compute.submit(job));
        self.current = Some(RenderFrame {
            payload: Arc::clone(&payload),
            base: payload,
            origin,
            timestamp_sec,
            union: None,
            buckets: None,
        });
    }

    // ---- transport -------------------------------------------------------

    fn start_transport(&mut self, direction: StepDirection) {
        if self.mode != Mode::Archive || self.frames.is_empty() {
            return;
        }
        self.ensure_anchor();
        self.transport.direction = direction;
        self.transport.playing = true;
        self.cancel_transport_task();
        self.schedule_transport_tick();
    }

    fn stop_transport(&mut self) {
        self.transport.playing = false;
        self.cancel_transport_task();
    }

    fn cancel_transport_task(&mut self) {
        if let Some(handle) = self.transport.task.take() {
            self.scheduler.cancel(handle);
        }
    }

    fn schedule_transport_tick(&mut self) {
        let delay = Duration::from_millis(self.transport.speed.tick_ms());
        self.transport.task = Some(self.scheduler.schedule(delay, ScheduledTask::TransportTick));
    }

    fn on_transport_tick(&mut self, handle: TaskHandle) {
        if self.transport.task != Some(handle) {
            return;
        }
        self.transport.task = None;
        if !self.transport.playing || self.mode != Mode::Archive {
            return;
        }
        self.transport.ticks += 1;
        let Some(last) = self.frames.newest_index() else {
            self.stop_transport();
            return;
        };
        let current = self.focus.unwrap_or(0);
        let next = self.transport.direction.apply(current, last);
        if next == current {
            tracing::debug!(target: LOG_TARGET, index = current, "transport.stopped=edge");
            self.stop_transport();
            return;
        }
        self.apply_archive_index(next, false, ModeSource::Transport);
        self.schedule_transport_tick();
    }

    fn ensure_anchor(&mut self) {
        if self.delta_anchor.is_none() {
            self.delta_anchor = self.focus_timestamp();
        }
    }

    // ---- flow ------------------------------------------------------------

    fn schedule_flow_rebuild(&mut self) {
        if let Some(handle) = self.flow_task.take() {
            self.scheduler.cancel(handle);
        }
        let delay = self.config.flow().rebuild_delay();
        self.flow_task = Some(self.scheduler.schedule(delay, ScheduledTask::FlowRebuild));
    }

    fn on_flow_rebuild(&mut self, handle: TaskHandle) {
        if self.flow_task != Some(handle) {
            return;
        }
        self.flow_task = None;
        let window = self.config.flow().window();
        let mut frames: Vec<FlowWindowFrame> = match self.mode {
            Mode::Archive => match self.focus {
                Some(focus) => {
                    let start = (focus + 1).saturating_sub(window);
                    self.archive
                        .cache()
                        .payloads_in(start, focus)
                        .into_iter()
                        .map(|(index, payload)| FlowWindowFrame {
                            id: index as u64,
                            payload,
                        })
                        .collect()
                }
                None => Vec::new(),
            },
            Mode::Live => self
                .live
                .tail(window)
                .map(|record| FlowWindowFrame {
                    id: record.sequence,
                    payload: Arc::clone(&record.payload),
                })
                .collect(),
        };
        if frames.is_empty() {
            if let Some(current) = self.current.as_ref() {
                let id = match current.origin {
                    FrameOrigin::Live { sequence } => sequence,
                    FrameOrigin::Archive { index, .. } => index as u64,
                };
                frames.push(FlowWindowFrame {
                    id,
                    payload: Arc::clone(&current.base),
                });
            }
        }

        let ids: Vec<String> = frames.iter().map(|frame| frame.id.to_string()).collect();
        let key = format!("{:?}:{}", self.mode, ids.join(","));
        if self.flow_diag.window_key.as_deref() == Some(key.as_str()) {
            return;
        }
        self.flow_diag.window_key = Some(key);
        self.flow_diag.rebuilds += 1;
        let job = ComputeJob::Flow {
            frames,
            params: self.flow_params,
            projection: self.projection,
        };
        self.flow_pending = Some(self.compute.submit(job));
    }

    // ---- helpers ---------------------------------------------------------

    fn issue_fetch(&mut self, target: FetchTarget, purpose: FetchPurpose) {
        self.next_fetch_id += 1;
        let id = FetchId(self.next_fetch_id);
        self.in_flight.insert(id, purpose);
        self.outbox.push(FetchRequest { id, target });
    }

    fn focus_timestamp(&self) -> Option<i64> {
        self.focus
            .and_then(|index| self.frames.get(index))
            .map(|frame| frame.timestamp_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualClock;
    use serde_json::json;

    const BASE_SEC: i64 = 1_714_557_600;

    struct Harness {
        clock: ManualClock,
        controller: TimelineController,
        frames: usize,
    }

    impl Harness {
        fn new(frames: usize, config: &str) -> Self {
            let clock = ManualClock::new();
            let config = Arc::new(TimelineConfig::from_json_str(config).expect("config"));
            let mut controller = TimelineController::new(
                config,
                Arc::new(clock.clone()),
                ComputePool::in_process(),
            );
            controller.start();
            let mut harness = Self {
                clock,
                controller,
                frames,
            };
            harness.resolve_all();
            harness
        }

        fn manifest(&self) -> String {
            let entries: Vec<serde_json::Value> = (0..self.frames)
                .map(|i| json!({ "path": format!("f{i}.json"), "t": BASE_SEC + i as i64 * 60 }))
                .collect();
            json!({ "time": { "earliest": "a", "latest": "b", "cadence_s": 60 }, "frames": entries })
                .to_string()
        }

        fn frame_body(index: usize) -> String {
            json!({
                "meta": { "t": format_iso(BASE_SEC + index as i64 * 60) },
                "hotspots": [{ "zx": 0, "zy": 0, "count": (index as f64) * 10.0 }],
                "flow": [{ "fx": 0, "fy": 0, "tx": 2, "ty": 0, "n": 1 }]
            })
            .to_string()
        }

        fn resolve_all(&mut self) {
            loop {
                let requests = self.controller.take_fetch_requests();
                if requests.is_empty() {
                    break;
                }
                for request in requests {
                    let body = match &request.target {
                        FetchTarget::Manifest => Ok(self.manifest()),
                        FetchTarget::Archive { index, .. } => Ok(Self::frame_body(*index)),
                        FetchTarget::Live { .. } => Ok(Self::frame_body(0)),
                    };
                    self.controller.on_fetch_complete(request.id, body);
                }
            }
        }

        fn advance(&mut self, ms: u64) {
            self.clock.advance(Duration::from_millis(ms));
            self.controller.run_due_timers();
            self.resolve_all();
        }
    }

    #[test]
    fn starts_live_on_newest_frame() {
        let harness = Harness::new(10, "{}");
        assert_eq!(harness.controller.status(), TimelineStatus::Ready);
        assert_eq!(harness.controller.mode(), Mode::Live);
        assert_eq!(harness.controller.focus(), Some(9));
    }

    #[test]
    fn scrub_renders_requested_frame() {
        let mut harness = Harness::new(10, r#"{ "archive": { "buffer_size": 5, "prefetch_cap": 2 } }"#);
        harness.controller.scrub(4);
        assert_eq!(harness.controller.mode(), Mode::Archive);
        harness.advance(16);
        let frame = harness.controller.current_frame().expect("rendered");
        assert_eq!(frame.origin, FrameOrigin::Archive { index: 4, requested: 4 });
        assert!(frame.union.is_some());
    }

    #[test]
    fn scrubs_within_a_tick_coalesce() {
        let mut harness = Harness::new(20, "{}");
        harness.controller.scrub(3);
        harness.controller.scrub(8);
        harness.controller.scrub(12);
        harness.advance(16);
        assert_eq!(harness.controller.diagnostics().scrub_request_id, 1);
        assert_eq!(harness.controller.diagnostics().rendered_index, Some(12));
    }

    #[test]
    fn invalid_seek_changes_nothing() {
        let mut harness = Harness::new(10, r#"{ "seek": { "utc_offset_minutes": 0 } }"#);
        let before = harness.controller.focus();
        assert_eq!(harness.controller.seek("half past"), Err(SeekError::InvalidFormat));
        assert_eq!(harness.controller.focus(), before);
        assert_eq!(harness.controller.mode(), Mode::Live);
        assert!(harness.controller.diagnostics().seek.is_none());
    }

    #[test]
    fn transport_walks_to_the_end_and_stops() {
        let mut harness = Harness::new(5, "{}");
        harness.controller.scrub(2);
        harness.advance(16);
        harness.controller.forward();
        for _ in 0..4 {
            harness.advance(250);
        }
        assert_eq!(harness.controller.focus(), Some(4));
        assert!(!harness.controller.is_playing());
        assert_eq!(harness.controller.delta_label().as_deref(), Some("+00:02:00"));
    }

    #[test]
    fn select_live_drops_anchor() {
        let mut harness = Harness::new(5, "{}");
        harness.controller.select_archive();
        assert!(harness.controller.delta_label().is_some());
        harness.controller.select_live();
        assert_eq!(harness.controller.mode(), Mode::Live);
        assert!(harness.controller.delta_label().is_none());
        assert_eq!(harness.controller.focus(), Some(4));
    }
}
