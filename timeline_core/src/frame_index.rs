use frame_schema::{parse_frame_entry, Manifest};

/// One archived frame, addressed by its position in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub sequence_index: usize,
    pub timestamp_sec: i64,
    pub locator: String,
}

/// Timestamp-ordered, duplicate-free view of a manifest's frame list.
#[derive(Debug, Clone, Default)]
pub struct FrameIndex {
    frames: Vec<FrameDescriptor>,
    skipped: usize,
}

impl FrameIndex {
    /// Builds the index, dropping entries without a locator or a usable
    /// timestamp. When several entries share a timestamp the first one wins.
    pub fn build_from_manifest(manifest: &Manifest) -> Self {
        let mut entries = Vec::with_capacity(manifest.frame_entries.len());
        let mut skipped = 0usize;
        for raw in &manifest.frame_entries {
            match parse_frame_entry(raw) {
                Some(entry) => entries.push(entry),
                None => skipped += 1,
            }
        }
        // Stable, so equal timestamps keep manifest order.
        entries.sort_by_key(|entry| entry.timestamp_sec);
        let before = entries.len();
        entries.dedup_by_key(|entry| entry.timestamp_sec);
        let duplicates = before - entries.len();

        if skipped > 0 || duplicates > 0 {
            tracing::debug!(
                target: "frame_timeline::index",
                skipped,
                duplicates,
                "frame_index.entries_dropped"
            );
        }

        let frames = entries
            .into_iter()
            .enumerate()
            .map(|(sequence_index, entry)| FrameDescriptor {
                sequence_index,
                timestamp_sec: entry.timestamp_sec,
                locator: entry.locator,
            })
            .collect();
        Self { frames, skipped }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FrameDescriptor> {
        self.frames.get(index)
    }

    pub fn newest_index(&self) -> Option<usize> {
        self.frames.len().checked_sub(1)
    }

    pub fn skipped_entries(&self) -> usize {
        self.skipped
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameDescriptor> {
        self.frames.iter()
    }

    /// Index whose timestamp is closest to `target_sec`; equal distances
    /// resolve to the later frame.
    pub fn nearest_index(&self, target_sec: f64) -> Option<usize> {
        if self.frames.is_empty() || target_sec.is_nan() {
            return None;
        }
        let position = self
            .frames
            .partition_point(|frame| (frame.timestamp_sec as f64) < target_sec);
        if let Some(frame) = self.frames.get(position) {
            if frame.timestamp_sec as f64 == target_sec {
                return Some(position);
            }
        }

        let last = self.frames.len() - 1;
        let right = position.min(last);
        let left = position.saturating_sub(1).min(last);
        let distance = |idx: usize| (self.frames[idx].timestamp_sec as f64 - target_sec).abs();
        if distance(left) < distance(right) {
            Some(left)
        } else {
            Some(right)
        }
    }

    /// Largest index whose timestamp is at or before `target_sec`.
    pub fn nearest_older_or_equal_index(&self, target_sec: i64) -> Option<usize> {
        self.frames
            .iter()
            .rposition(|frame| frame.timestamp_sec <= target_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index_from(entries: serde_json::Value) -> FrameIndex {
        let manifest = Manifest {
            frame_entries: entries.as_array().cloned().unwrap_or_default(),
            ..Manifest::default()
        };
        FrameIndex::build_from_manifest(&manifest)
    }

    fn ten_second_index() -> FrameIndex {
        index_from(json!([
            { "path": "c.json", "t": 30 },
            { "path": "a.json", "t": 10 },
            { "path": "b.json", "t": 20 },
        ]))
    }

    #[test]
    fn entries_are_sorted_and_bad_ones_skipped() {
        let index = index_from(json!([
            { "path": "late.json", "t": 300 },
            { "t": 100 },
            { "path": "early.json", "t": 100 },
            { "path": "dup.json", "t": 100 },
            { "path": "bad.json", "t": "garbage" },
        ]));
        assert_eq!(index.len(), 2);
        assert_eq!(index.skipped_entries(), 2);
        assert_eq!(index.get(0).map(|f| f.locator.as_str()), Some("early.json"));
        assert_eq!(index.get(1).map(|f| f.sequence_index), Some(1));
    }

    #[test]
    fn nearest_prefers_exact_then_closest() {
        let index = ten_second_index();
        assert_eq!(index.nearest_index(20.0), Some(1));
        assert_eq!(index.nearest_index(12.0), Some(0));
        assert_eq!(index.nearest_index(18.0), Some(1));
        assert_eq!(index.nearest_index(-500.0), Some(0));
        assert_eq!(index.nearest_index(5000.0), Some(2));
    }

    #[test]
    fn nearest_ties_go_to_the_later_frame() {
        let index = ten_second_index();
        assert_eq!(index.nearest_index(15.0), Some(1));
        assert_eq!(index.nearest_index(25.0), Some(2));
    }

    #[test]
    fn older_or_equal_pins_to_past() {
        let index = ten_second_index();
        assert_eq!(index.nearest_older_or_equal_index(25), Some(1));
        assert_eq!(index.nearest_older_or_equal_index(30), Some(2));
        assert_eq!(index.nearest_older_or_equal_index(9), None);
    }

    #[test]
    fn empty_manifest_gives_empty_index() {
        let index = FrameIndex::build_from_manifest(&Manifest::default());
        assert!(index.is_empty());
        assert_eq!(index.nearest_index(1.0), None);
        assert_eq!(index.newest_index(), None);
    }
}
