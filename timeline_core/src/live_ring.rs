use std::collections::VecDeque;
use std::sync::Arc;

use frame_schema::FramePayload;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct LiveFrameRecord {
    pub sequence: u64,
    pub key: String,
    pub payload: Arc<FramePayload>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Appended { sequence: u64, evicted: usize },
    Duplicate,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LiveDiagnostics {
    pub ring_size: usize,
    pub ring_capacity: usize,
    pub last_key: Option<String>,
    pub polls: u64,
    pub pushed: u64,
    pub skipped_duplicate: u64,
    pub poll_failures: u64,
    pub last_sequence: Option<u64>,
}

/// Most recent live frames, oldest first.
#[derive(Debug)]
pub struct LiveRingBuffer {
    entries: VecDeque<LiveFrameRecord>,
    capacity: usize,
    next_sequence: u64,
    last_key: Option<String>,
    diag: LiveDiagnostics,
}

impl LiveRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            next_sequence: 1,
            last_key: None,
            diag: LiveDiagnostics {
                ring_capacity: capacity,
                ..LiveDiagnostics::default()
            },
        }
    }

    /// Appends unless `key` repeats the previous push.
    pub fn push(&mut self, payload: Arc<FramePayload>, key: &str) -> PushOutcome {
        if self.last_key.as_deref() == Some(key) {
            self.diag.skipped_duplicate += 1;
            return PushOutcome::Duplicate;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.entries.push_back(LiveFrameRecord {
            sequence,
            key: key.to_owned(),
            payload,
        });
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            evicted += 1;
        }
        self.last_key = Some(key.to_owned());

        self.diag.pushed += 1;
        self.diag.ring_size = self.entries.len();
        self.diag.last_key = self.last_key.clone();
        self.diag.last_sequence = Some(sequence);
        PushOutcome::Appended { sequence, evicted }
    }

    /// Last `n` records, oldest to newest.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &LiveFrameRecord> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip)
    }

    pub fn newest(&self) -> Option<&LiveFrameRecord> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Dedup keys, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|record| record.key.as_str())
    }

    pub fn record_poll(&mut self) {
        self.diag.polls += 1;
    }

    pub fn record_poll_failure(&mut self) {
        self.diag.poll_failures += 1;
    }

    pub fn diagnostics(&self) -> &LiveDiagnostics {
        &self.diag
    }
}
