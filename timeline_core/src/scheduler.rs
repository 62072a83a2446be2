//! Cancellable timers driven by an injected clock.
//!
//! The controller never sleeps; it schedules tasks here and the host calls
//! back once [`Scheduler::time_until_next`] has elapsed. Tests swap in a
//! [`ManualClock`] and advance it explicitly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use serde::Serialize;

/// Monotonic time since an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let step = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(step, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScheduledTask {
    ArchivePump,
    TransportTick,
    LivePoll,
    ManifestRefresh,
    ManifestRetry,
    RenderTick,
    FlowRebuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    queue: BTreeMap<(Duration, u64), ScheduledTask>,
    deadlines: AHashMap<u64, Duration>,
    next_id: u64,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.clock.now())
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            queue: BTreeMap::new(),
            deadlines: AHashMap::new(),
            next_id: 0,
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn schedule(&mut self, delay: Duration, task: ScheduledTask) -> TaskHandle {
        self.next_id += 1;
        let id = self.next_id;
        let deadline = self.clock.now() + delay;
        self.queue.insert((deadline, id), task);
        self.deadlines.insert(id, deadline);
        TaskHandle(id)
    }

    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        match self.deadlines.remove(&handle.0) {
            Some(deadline) => self.queue.remove(&(deadline, handle.0)).is_some(),
            None => false,
        }
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.deadlines.contains_key(&handle.0)
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Zero when something is already due.
    pub fn time_until_next(&self) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_sub(self.clock.now()))
    }

    /// Removes and returns every task due now, earliest first. Tasks scheduled
    /// while the caller handles these wait for the next drain.
    pub fn drain_due(&mut self) -> Vec<(TaskHandle, ScheduledTask)> {
        let now = self.clock.now();
        let mut due = Vec::new();
        while let Some((&(deadline, id), _)) = self.queue.first_key_value() {
            if deadline > now {
                break;
            }
            if let Some(task) = self.queue.remove(&(deadline, id)) {
                self.deadlines.remove(&id);
                due.push((TaskHandle(id), task));
            }
        }
        due
    }
}
