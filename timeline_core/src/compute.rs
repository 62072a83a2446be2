//! Background computation for flow and union jobs.
//!
//! Callers submit a job, get a correlation id back, and later drain
//! responses. Whether the work ran on a worker thread or inline is invisible
//! to them; inline execution is also the fallback when the workers are gone.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ahash::AHashMap;
use bitflags::bitflags;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use frame_schema::FramePayload;
use serde::{Deserialize, Serialize};

use crate::config::ComputeConfig;
use crate::flow::{aggregate_flow, FlowAggregate, FlowParams, FlowWindowFrame};
use crate::projection::PlaneProjection;
use crate::severity::{bucket_zones, SeverityBuckets, SeverityThresholds};
use crate::union::{UnionAggregator, UnionReport};

bitflags! {
    /// Job kinds allowed to leave the calling thread.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ComputeCapabilities: u8 {
        const FLOW = 1 << 0;
        const UNION = 1 << 1;
    }
}

#[derive(Debug, Clone)]
pub enum ComputeJob {
    Flow {
        frames: Vec<FlowWindowFrame>,
        params: FlowParams,
        projection: PlaneProjection,
    },
    Union {
        base: Arc<FramePayload>,
        frames: Vec<Arc<FramePayload>>,
        wanted: usize,
        aggregator: UnionAggregator,
        thresholds: SeverityThresholds,
        projection: PlaneProjection,
    },
}

impl ComputeJob {
    fn capability(&self) -> ComputeCapabilities {
        match self {
            ComputeJob::Flow { .. } => ComputeCapabilities::FLOW,
            ComputeJob::Union { .. } => ComputeCapabilities::UNION,
        }
    }

    pub fn run(self) -> ComputeOutput {
        match self {
            ComputeJob::Flow {
                frames,
                params,
                projection,
            } => ComputeOutput::Flow(aggregate_flow(&frames, params, &projection)),
            ComputeJob::Union {
                base,
                frames,
                wanted,
                aggregator,
                thresholds,
                projection,
            } => {
                let (frame, report) = aggregator.merge(&base, &frames, wanted);
                let buckets = bucket_zones(&frame.hotspots, thresholds, &projection);
                ComputeOutput::Union(UnionOutcome {
                    frame,
                    report,
                    buckets,
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnionOutcome {
    pub frame: FramePayload,
    pub report: UnionReport,
    pub buckets: SeverityBuckets,
}

#[derive(Debug, Clone)]
pub enum ComputeOutput {
    Flow(FlowAggregate),
    Union(UnionOutcome),
}

#[derive(Debug, Clone)]
pub struct ComputeResponse {
    pub correlation_id: u64,
    pub output: ComputeOutput,
    pub offloaded: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComputeDiagnostics {
    pub workers: usize,
    pub submitted: u64,
    pub offloaded: u64,
    pub inline: u64,
    pub outstanding: usize,
    pub fallbacks: u64,
}

struct Envelope {
    correlation_id: u64,
    job: ComputeJob,
}

struct WorkerSet {
    jobs: Sender<Envelope>,
    results: Receiver<ComputeResponse>,
    handles: Vec<JoinHandle<()>>,
    /// Copies of offloaded jobs, replayed inline if the workers disappear.
    pending: AHashMap<u64, ComputeJob>,
}

pub struct ComputePool {
    capabilities: ComputeCapabilities,
    workers: Option<WorkerSet>,
    ready: VecDeque<ComputeResponse>,
    next_id: u64,
    diag: ComputeDiagnostics,
}

impl std::fmt::Debug for ComputePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePool")
            .field("capabilities", &self.capabilities)
            .field("diag", &self.diag)
            .finish()
    }
}

impl ComputePool {
    pub fn in_process() -> Self {
        Self {
            capabilities: ComputeCapabilities::empty(),
            workers: None,
            ready: VecDeque::new(),
            next_id: 0,
            diag: ComputeDiagnostics::default(),
        }
    }

    /// Starts `max_jobs` worker threads for the given job kinds. Falls back
    /// to inline execution if no worker can be spawned.
    pub fn offloaded(capabilities: ComputeCapabilities, max_jobs: usize) -> Self {
        let (job_tx, job_rx) = unbounded::<Envelope>();
        let (result_tx, result_rx) = unbounded::<ComputeResponse>();
        let mut handles = Vec::new();
        for slot in 0..max_jobs.max(1) {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            match thread::Builder::new()
                .name(format!("timeline-compute-{slot}"))
                .spawn(move || worker_loop(jobs, results))
            {
                Ok(handle) => handles.push(handle),
                Err(err) => log::warn!("Failed to spawn compute worker {}: {}", slot, err),
            }
        }

        let mut pool = Self::in_process();
        if handles.is_empty() {
            return pool;
        }
        pool.capabilities = capabilities;
        pool.diag.workers = handles.len();
        pool.workers = Some(WorkerSet {
            jobs: job_tx,
            results: result_rx,
            handles,
            pending: AHashMap::new(),
        });
        pool
    }

    pub fn from_config(config: &ComputeConfig) -> Self {
        if config.offload() {
            Self::offloaded(ComputeCapabilities::all(), config.max_jobs())
        } else {
            Self::in_process()
        }
    }

    pub fn capabilities(&self) -> ComputeCapabilities {
        self.capabilities
    }

    pub fn diagnostics(&self) -> &ComputeDiagnostics {
        &self.diag
    }

    pub fn outstanding(&self) -> usize {
        self.diag.outstanding
    }

    pub fn submit(&mut self, job: ComputeJob) -> u64 {
        self.next_id += 1;
        let correlation_id = self.next_id;
        self.diag.submitted += 1;
        self.diag.outstanding += 1;

        if self.capabilities.contains(job.capability()) {
            if let Some(workers) = self.workers.as_mut() {
                workers.pending.insert(correlation_id, job.clone());
                match workers.jobs.send(Envelope {
                    correlation_id,
                    job,
                }) {
                    Ok(()) => {
                        self.diag.offloaded += 1;
                        return correlation_id;
                    }
                    Err(err) => {
                        let job = err.into_inner().job;
                        workers.pending.remove(&correlation_id);
                        self.abandon_workers("send_failed");
                        self.run_inline(correlation_id, job);
                        return correlation_id;
                    }
                }
            }
        }
        self.run_inline(correlation_id, job);
        correlation_id
    }

    /// Every response available without blocking.
    pub fn drain(&mut self) -> Vec<ComputeResponse> {
        self.collect_worker_results();
        self.take_ready()
    }

    /// Like [`Self::drain`], but waits up to `timeout` for the first response
    /// when work is outstanding and nothing is ready yet.
    pub fn drain_timeout(&mut self, timeout: Duration) -> Vec<ComputeResponse> {
        if self.ready.is_empty() && self.diag.outstanding > 0 {
            if let Some(workers) = self.workers.as_mut() {
                match workers.results.recv_timeout(timeout) {
                    Ok(response) => {
                        workers.pending.remove(&response.correlation_id);
                        self.ready.push_back(response);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => self.abandon_workers("disconnected"),
                }
            }
        }
        self.drain()
    }

    fn collect_worker_results(&mut self) {
        let mut disconnected = false;
        if let Some(workers) = self.workers.as_mut() {
            loop {
                match workers.results.try_recv() {
                    Ok(response) => {
                        workers.pending.remove(&response.correlation_id);
                        self.ready.push_back(response);
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }
        }
        if disconnected {
            self.abandon_workers("disconnected");
        }
    }

    fn take_ready(&mut self) -> Vec<ComputeResponse> {
        let drained: Vec<ComputeResponse> = self.ready.drain(..).collect();
        self.diag.outstanding = self.diag.outstanding.saturating_sub(drained.len());
        drained
    }

    /// Drops the worker set and replays its unfinished jobs inline.
    fn abandon_workers(&mut self, reason: &'static str) {
        let Some(workers) = self.workers.take() else {
            return;
        };
        self.capabilities = ComputeCapabilities::empty();
        self.diag.workers = 0;
        self.diag.fallbacks += 1;
        tracing::warn!(
            target: "frame_timeline::compute",
            reason,
            replayed = workers.pending.len(),
            "compute.fallback=inline"
        );
        let mut pending: Vec<(u64, ComputeJob)> = workers.pending.into_iter().collect();
        pending.sort_by_key(|(id, _)| *id);
        for (correlation_id, job) in pending {
            self.run_inline(correlation_id, job);
        }
    }

    fn run_inline(&mut self, correlation_id: u64, job: ComputeJob) {
        self.diag.inline += 1;
        self.ready.push_back(ComputeResponse {
            correlation_id,
            output: job.run(),
            offloaded: false,
        });
    }
}

impl Drop for ComputePool {
    fn drop(&mut self) {
        if let Some(workers) = self.workers.take() {
            drop(workers.jobs);
            for handle in workers.handles {
                if handle.join().is_err() {
                    log::warn!("Compute worker panicked during shutdown");
                }
            }
        }
    }
}

fn worker_loop(jobs: Receiver<Envelope>, results: Sender<ComputeResponse>) {
    for envelope in jobs.iter() {
        let response = ComputeResponse {
            correlation_id: envelope.correlation_id,
            output: envelope.job.run(),
            offloaded: true,
        };
        if results.send(response).is_err() {
            break;
        }
    }
}
