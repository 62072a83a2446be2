//! Sliding-window archive cache and its prefetch pump.
//!
//! [`ArchiveBuffer`] is the only place the archive cache and its in-flight
//! claims are mutated. It does no I/O: it returns [`ArchiveFetch`] tickets for
//! the host to run and is told about their outcome through
//! [`ArchiveBuffer::complete`].

use std::sync::Arc;

use ahash::AHashSet;
use frame_schema::FramePayload;
use serde::Serialize;

use crate::cache::{CacheEntry, FrameCache};
use crate::config::ArchiveConfig;
use crate::frame_index::FrameIndex;
use crate::scheduler::{ScheduledTask, Scheduler, TaskHandle};
use crate::window::{compute_window, WindowState};

const CACHED_SAMPLE_LEN: usize = 10;

/// Fetch the host should perform for an archive index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFetch {
    pub index: usize,
    pub locator: String,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpReason {
    BatchFinished,
    FetchSettled,
}

/// Result of asking for a single frame.
#[derive(Debug, Clone)]
pub enum LoadStart {
    Cached(Arc<FramePayload>),
    /// Someone else is already fetching it.
    Pending,
    Dispatch(ArchiveFetch),
    OutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// The fetch belonged to the current manifest generation.
    pub current: bool,
    pub stored: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ArchiveDiagnostics {
    pub focus: Option<usize>,
    pub window_start: Option<usize>,
    pub window_end: Option<usize>,
    pub buffer_size: usize,
    pub cache_size: usize,
    pub missing_in_window: usize,
    pub in_flight: usize,
    pub prefetched_this_call: usize,
    pub prefetch_cap: usize,
    pub cached_sample: Vec<usize>,
    pub pump_active: bool,
    pub last_pump_reason: Option<PumpReason>,
    pub evicted_total: usize,
    pub fetch_failures: usize,
    pub last_failed_index: Option<usize>,
    pub discarded_out_of_window: usize,
    pub discarded_stale_generation: usize,
}

/// Candidate indices tried when a frame is missing: the target, then one
/// step back, then one step forward.
#[derive(Debug, Clone)]
pub struct FallbackPlan {
    target: usize,
    candidates: Vec<usize>,
    position: usize,
}

impl FallbackPlan {
    pub fn new(target: usize, total: usize) -> Self {
        let mut candidates = Vec::with_capacity(3);
        if target < total {
            candidates.push(target);
            if target > 0 {
                candidates.push(target - 1);
            }
            if target + 1 < total {
                candidates.push(target + 1);
            }
        }
        Self {
            target,
            candidates,
            position: 0,
        }
    }

    pub fn target(&self) -> usize {
        self.target
    }

    pub fn current(&self) -> Option<usize> {
        self.candidates.get(self.position).copied()
    }

    /// Moves to the next candidate.
    pub fn advance(&mut self) -> Option<usize> {
        self.position += 1;
        self.current()
    }
}

#[derive(Debug)]
pub struct ArchiveBuffer {
    cache: FrameCache,
    buffer_size: usize,
    prefetch_cap: usize,
    debounce: std::time::Duration,
    window: Option<WindowState>,
    batch: AHashSet<usize>,
    pump_index: Option<usize>,
    pump_task: Option<TaskHandle>,
    generation: u64,
    diag: ArchiveDiagnostics,
}

impl ArchiveBuffer {
    pub fn new(config: &ArchiveConfig) -> Self {
        Self {
            cache: FrameCache::new(),
            buffer_size: config.buffer_size(),
            prefetch_cap: config.prefetch_cap(),
            debounce: config.pump_debounce(),
            window: None,
            batch: AHashSet::new(),
            pump_index: None,
            pump_task: None,
            generation: 0,
            diag: ArchiveDiagnostics {
                buffer_size: config.buffer_size(),
                prefetch_cap: config.prefetch_cap(),
                ..ArchiveDiagnostics::default()
            },
        }
    }

    pub fn cache(&self) -> &FrameCache {
        &self.cache
    }

    pub fn window(&self) -> Option<WindowState> {
        self.window
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pump_index(&self) -> Option<usize> {
        self.pump_index
    }

    pub fn diagnostics(&self) -> &ArchiveDiagnostics {
        &self.diag
    }

    pub fn get(&self, index: usize) -> Option<Arc<FramePayload>> {
        self.cache
            .get(index)
            .map(|entry| Arc::clone(&entry.payload))
    }

    /// Forgets everything after the frame list was rebuilt. Fetches started
    /// under the previous generation are ignored when they land.
    pub fn reset(&mut self, scheduler: &mut Scheduler) {
        self.generation += 1;
        self.cache.clear();
        self.batch.clear();
        self.window = None;
        self.pump_index = None;
        self.stop_pump(scheduler);
        self.refresh_diagnostics(None, 0);
        tracing::debug!(
            target: "frame_timeline::archive",
            generation = self.generation,
            "archive.reset"
        );
    }

    pub fn stop_pump(&mut self, scheduler: &mut Scheduler) {
        if let Some(handle) = self.pump_task.take() {
            scheduler.cancel(handle);
        }
        self.diag.pump_active = false;
    }

    /// Recomputes the window around `focus`, evicts what fell out of it and
    /// returns the next prefetch batch, if one may start now.
    pub fn ensure_window(&mut self, focus: usize, frames: &FrameIndex) -> Vec<ArchiveFetch> {
        let Some(window) = compute_window(focus, frames.len(), self.buffer_size) else {
            self.window = None;
            self.pump_index = None;
            self.refresh_diagnostics(None, 0);
            return Vec::new();
        };
        self.window = Some(window);
        self.pump_index = Some(focus);

        let evicted = self.cache.evict_not_in(window);
        self.diag.evicted_total += evicted;

        let missing: Vec<usize> = window
            .indices()
            .filter(|index| !self.cache.has(*index))
            .collect();
        if missing.is_empty() {
            self.pump_index = None;
            self.refresh_diagnostics(Some(focus), 0);
            return Vec::new();
        }

        let mut dispatched = Vec::new();
        if self.batch.is_empty() {
            let take = if self.prefetch_cap == 0 {
                missing.len()
            } else {
                self.prefetch_cap.min(missing.len())
            };
            for index in missing.into_iter().take(take) {
                let Some(descriptor) = frames.get(index) else {
                    continue;
                };
                if !self.cache.claim(index) {
                    continue;
                }
                self.batch.insert(index);
                dispatched.push(ArchiveFetch {
                    index,
                    locator: descriptor.locator.clone(),
                    generation: self.generation,
                });
            }
        }

        if !dispatched.is_empty() {
            tracing::debug!(
                target: "frame_timeline::archive",
                focus,
                window_start = window.start,
                window_end = window.end,
                batch = dispatched.len(),
                "archive.prefetch=batch_started"
            );
        }
        self.refresh_diagnostics(Some(focus), dispatched.len());
        dispatched
    }

    /// Claims a single index for an on-demand load.
    pub fn begin_load(&mut self, index: usize, frames: &FrameIndex) -> LoadStart {
        if let Some(payload) = self.get(index) {
            return LoadStart::Cached(payload);
        }
        let Some(descriptor) = frames.get(index) else {
            return LoadStart::OutOfRange;
        };
        if !self.cache.claim(index) {
            return LoadStart::Pending;
        }
        self.diag.in_flight = self.cache.in_flight_count();
        LoadStart::Dispatch(ArchiveFetch {
            index,
            locator: descriptor.locator.clone(),
            generation: self.generation,
        })
    }

    /// Records the outcome of an archive fetch.
    ///
    /// Successful payloads are stored only if their index is still inside
    /// the current window. When the pump still has work for an unchanged
    /// focus, a debounced re-pump is scheduled.
    pub fn complete(
        &mut self,
        fetch: &ArchiveFetch,
        outcome: Option<Arc<FramePayload>>,
        scheduler: &mut Scheduler,
    ) -> Completion {
        if fetch.generation != self.generation {
            self.diag.discarded_stale_generation += 1;
            return Completion {
                current: false,
                stored: false,
            };
        }

        self.cache.release(fetch.index);
        let was_batch = self.batch.remove(&fetch.index);

        let stored = match outcome {
            Some(payload) => {
                if self.window.is_some_and(|w| w.contains(fetch.index)) {
                    self.cache.set(CacheEntry {
                        index: fetch.index,
                        payload,
                        loaded_at: scheduler.now(),
                    });
                    true
                } else {
                    self.diag.discarded_out_of_window += 1;
                    false
                }
            }
            None => {
                self.diag.fetch_failures += 1;
                self.diag.last_failed_index = Some(fetch.index);
                tracing::warn!(
                    target: "frame_timeline::archive",
                    index = fetch.index,
                    locator = %fetch.locator,
                    "archive.fetch=failed"
                );
                false
            }
        };

        if self.batch.is_empty() && self.pump_index.is_some() {
            let reason = if was_batch {
                PumpReason::BatchFinished
            } else {
                PumpReason::FetchSettled
            };
            self.schedule_pump(reason, scheduler);
        }

        self.diag.cache_size = self.cache.len();
        self.diag.in_flight = self.cache.in_flight_count();
        self.diag.cached_sample = self.cached_sample();
        Completion {
            current: true,
            stored,
        }
    }

    /// Handles the debounced pump timer. Re-runs [`Self::ensure_window`] only
    /// if the focus has not moved since the pump was armed.
    pub fn on_pump_timer(
        &mut self,
        handle: TaskHandle,
        focus: usize,
        frames: &FrameIndex,
    ) -> Vec<ArchiveFetch> {
        if self.pump_task != Some(handle) {
            return Vec::new();
        }
        self.pump_task = None;
        self.diag.pump_active = false;
        if self.pump_index != Some(focus) {
            return Vec::new();
        }
        self.ensure_window(focus, frames)
    }

    /// Cached frame at `target` or its nearest neighbour; the flag is set
    /// when a neighbour had to stand in.
    pub fn get_with_fallback(
        &self,
        target: usize,
        total: usize,
    ) -> Option<(usize, Arc<FramePayload>, bool)> {
        let mut plan = FallbackPlan::new(target, total);
        let mut candidate = plan.current();
        while let Some(index) = candidate {
            if let Some(payload) = self.get(index) {
                return Some((index, payload, index != target));
            }
            candidate = plan.advance();
        }
        None
    }

    fn schedule_pump(&mut self, reason: PumpReason, scheduler: &mut Scheduler) {
        self.diag.last_pump_reason = Some(reason);
        if self.pump_task.is_some_and(|handle| scheduler.is_pending(handle)) {
            return;
        }
        self.pump_task = Some(scheduler.schedule(self.debounce, ScheduledTask::ArchivePump));
        self.diag.pump_active = true;
    }

    fn cached_sample(&self) -> Vec<usize> {
        let mut keys = self.cache.cached_indices();
        keys.truncate(CACHED_SAMPLE_LEN);
        keys
    }

    fn refresh_diagnostics(&mut self, focus: Option<usize>, prefetched: usize) {
        let window = self.window;
        self.diag.focus = focus;
        self.diag.window_start = window.map(|w| w.start);
        self.diag.window_end = window.map(|w| w.end);
        self.diag.cache_size = self.cache.len();
        self.diag.missing_in_window = window
            .map(|w| w.indices().filter(|i| !self.cache.has(*i)).count())
            .unwrap_or(0);
        self.diag.in_flight = self.cache.in_flight_count();
        self.diag.prefetched_this_call = prefetched;
        self.diag.cached_sample = self.cached_sample();
    }
}
