use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use frame_schema::FramePayload;

use crate::window::WindowState;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub index: usize,
    pub payload: Arc<FramePayload>,
    pub loaded_at: Duration,
}

/// Archive frames resident around the focus plus the set of indices with a
/// fetch outstanding.
#[derive(Debug, Default)]
pub struct FrameCache {
    entries: AHashMap<usize, CacheEntry>,
    in_flight: AHashSet<usize>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> Option<&CacheEntry> {
        self.entries.get(&index)
    }

    pub fn has(&self, index: usize) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn set(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.index, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry outside `keep`; returns how many were removed.
    ///
    /// In-flight claims are untouched: a fetch that lands after its index
    /// left the window is discarded on completion instead.
    pub fn evict_not_in(&mut self, keep: WindowState) -> usize {
        let before = self.entries.len();
        self.entries.retain(|index, _| keep.contains(*index));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.in_flight.clear();
    }

    pub fn is_in_flight(&self, index: usize) -> bool {
        self.in_flight.contains(&index)
    }

    /// Marks `index` as being fetched. Fails if it is already cached or
    /// already claimed.
    pub fn claim(&mut self, index: usize) -> bool {
        if self.entries.contains_key(&index) {
            return false;
        }
        self.in_flight.insert(index)
    }

    pub fn release(&mut self, index: usize) -> bool {
        self.in_flight.remove(&index)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Cached indices in ascending order.
    pub fn cached_indices(&self) -> Vec<usize> {
        let mut keys: Vec<usize> = self.entries.keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Cached payloads for `start..=end`, oldest first, skipping gaps.
    pub fn payloads_in(&self, start: usize, end: usize) -> Vec<(usize, Arc<FramePayload>)> {
        (start..=end)
            .filter_map(|index| {
                self.entries
                    .get(&index)
                    .map(|entry| (index, Arc::clone(&entry.payload)))
            })
            .collect()
    }
}
