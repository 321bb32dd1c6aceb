use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::AppError;
use crate::job::{Artifact, JobInputs};

/// The terminal outcome a submitted job's future settles with.
#[derive(Debug)]
pub enum JobOutcome {
    Completed {
        artifacts: Vec<Artifact>,
        worker_id: Option<u32>,
    },
    Failed {
        error: AppError,
        worker_id: Option<u32>,
    },
    TimedOut,
    ShuttingDown,
}

struct PendingEntry {
    id: String,
    inputs: JobInputs,
    deadline: Instant,
    tx: oneshot::Sender<JobOutcome>,
}

struct ProcessingEntry {
    deadline: Instant,
    tx: oneshot::Sender<JobOutcome>,
}

struct State {
    pending: VecDeque<PendingEntry>,
    processing: HashMap<String, ProcessingEntry>,
}

/// A popped unit of work, handed to the worker pool. Carries only the
/// immutable inputs a worker needs — it never sees the settlement channel.
pub struct TakenJob {
    pub id: String,
    pub inputs: JobInputs,
    pub deadline: Instant,
}

/// Bounded FIFO queue with per-job deadlines, exclusively owned by its
/// operations: callers never reach into `pending`/`processing` directly.
pub struct JobQueue {
    state: Mutex<State>,
    max_len: usize,
    next_id: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub max: usize,
}

impl JobQueue {
    pub fn new(max_len: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                pending: VecDeque::new(),
                processing: HashMap::new(),
            }),
            max_len,
            next_id: AtomicU64::new(1),
        })
    }

    fn generate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("job-{n:016x}")
    }

    /// Enqueues a job; fails immediately with `Busy` if the queue is full.
    /// Arms a deadline timer so the returned receiver is guaranteed to
    /// settle even if no worker ever picks the job up.
    pub fn enqueue(
        self: &Arc<Self>,
        inputs: JobInputs,
        timeout: Duration,
    ) -> Result<(String, oneshot::Receiver<JobOutcome>), AppError> {
        let (tx, rx) = oneshot::channel();
        let id = self.generate_id();
        let deadline = Instant::now() + timeout;

        {
            let mut state = self.state.lock().unwrap();
            if state.pending.len() >= self.max_len {
                return Err(AppError::Busy);
            }
            state.pending.push_back(PendingEntry {
                id: id.clone(),
                inputs,
                deadline,
                tx,
            });
        }

        let queue = Arc::clone(self);
        let job_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            queue.fail_on_deadline(&job_id);
        });

        Ok((id, rx))
    }

    /// Pops the oldest pending job and moves it into the processing set.
    pub fn take(&self) -> Option<TakenJob> {
        let mut state = self.state.lock().unwrap();
        let entry = state.pending.pop_front()?;
        state.processing.insert(
            entry.id.clone(),
            ProcessingEntry {
                deadline: entry.deadline,
                tx: entry.tx,
            },
        );
        Some(TakenJob {
            id: entry.id,
            inputs: entry.inputs,
            deadline: entry.deadline,
        })
    }

    /// Settles a job as completed, tagged with the worker that ran it.
    /// A no-op (first writer wins) if the job already settled via timeout
    /// or a prior call.
    pub fn complete(&self, id: &str, artifacts: Vec<Artifact>, worker_id: u32) {
        self.settle(
            id,
            JobOutcome::Completed {
                artifacts,
                worker_id: Some(worker_id),
            },
        );
    }

    /// Settles a job as failed, tagged with the worker that ran it, if any
    /// (a job can fail before any worker ever picked it up).
    pub fn fail(&self, id: &str, error: AppError, worker_id: Option<u32>) {
        self.settle(id, JobOutcome::Failed { error, worker_id });
    }

    fn fail_on_deadline(&self, id: &str) {
        self.settle(id, JobOutcome::TimedOut);
    }

    fn settle(&self, id: &str, outcome: JobOutcome) {
        let entry = {
            let mut state = self.state.lock().unwrap();
            if let Some(entry) = state.processing.remove(id) {
                Some(entry)
            } else if let Some(pos) = state.pending.iter().position(|e| e.id == id) {
                // Deadline fired before a worker ever took the job.
                Some(convert_pending(state.pending.remove(pos).unwrap()))
            } else {
                None
            }
        };
        if let Some(entry) = entry {
            // Ignore send errors: the caller may have dropped its receiver
            // (e.g. client disconnected); the result is simply discarded.
            let _ = entry.tx.send(outcome);
        }
    }

    /// Settles every pending and in-flight job with `ShuttingDown`, used by
    /// the graceful-shutdown sequence.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        for entry in state.pending.drain(..) {
            let _ = entry.tx.send(JobOutcome::ShuttingDown);
        }
        for (_, entry) in state.processing.drain() {
            let _ = entry.tx.send(JobOutcome::ShuttingDown);
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock().unwrap();
        QueueStats {
            pending: state.pending.len(),
            processing: state.processing.len(),
            max: self.max_len,
        }
    }
}

fn convert_pending(entry: PendingEntry) -> ProcessingEntry {
    ProcessingEntry {
        deadline: entry.deadline,
        tx: entry.tx,
    }
}
