use std::collections::VecDeque;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender};
use tokio::sync::oneshot;

use crate::error::AppError;
use crate::image::pipeline;
use crate::job::JobInputs;
use crate::queue::{JobOutcome, JobQueue};

const MAX_BACKOFF: Duration = Duration::from_secs(5);
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(200);

enum DispatcherMsg {
    Job { id: String, inputs: Box<JobInputs> },
    Shutdown,
}

enum WorkerMsg {
    Ready {
        worker_id: u32,
    },
    Result {
        worker_id: u32,
        job_id: String,
        outcome: Result<Vec<crate::job::Artifact>, AppError>,
    },
    Log {
        level: log::Level,
        text: String,
        job_id: Option<String>,
    },
}

struct WorkerHandle {
    id: u32,
    to_worker: Sender<DispatcherMsg>,
    join: Option<thread::JoinHandle<()>>,
    busy: bool,
    current_job: Option<String>,
}

/// Fans jobs out to `P` isolated OS threads, one job per worker at a time,
/// restarting any worker whose thread exits unexpectedly.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    notify_tx: Sender<()>,
    shutdown: Arc<AtomicBool>,
    supervisor: Mutex<Option<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn start(queue: Arc<JobQueue>, worker_count: usize) -> Arc<Self> {
        let worker_count = worker_count.max(1);
        let (notify_tx, notify_rx) = crossbeam_channel::unbounded::<()>();
        let (from_workers_tx, from_workers_rx) = crossbeam_channel::unbounded::<WorkerMsg>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let pool = Arc::new(Self {
            queue: Arc::clone(&queue),
            notify_tx,
            shutdown: Arc::clone(&shutdown),
            supervisor: Mutex::new(None),
        });

        let mut workers: Vec<WorkerHandle> = (0..worker_count)
            .map(|id| spawn_worker(id as u32, from_workers_tx.clone()))
            .collect();

        let supervisor_queue = Arc::clone(&queue);
        let supervisor_shutdown = Arc::clone(&shutdown);
        let next_worker_id = Arc::new(AtomicU32::new(worker_count as u32));
        let handle = thread::spawn(move || {
            let mut idle: VecDeque<usize> = (0..workers.len()).collect();
            let mut crash_counts: Vec<u32> = vec![0; workers.len()];

            loop {
                if supervisor_shutdown.load(Ordering::Relaxed) {
                    for w in &mut workers {
                        let _ = w.to_worker.send(DispatcherMsg::Shutdown);
                    }
                    for w in &mut workers {
                        if let Some(join) = w.join.take() {
                            let _ = join.join();
                        }
                    }
                    return;
                }

                select! {
                    recv(notify_rx) -> _ => {}
                    recv(from_workers_rx) -> msg => {
                        if let Ok(msg) = msg {
                            handle_worker_msg(&mut workers, &supervisor_queue, msg, &mut idle);
                        }
                    }
                    default(HEALTH_CHECK_INTERVAL) => {}
                }

                reap_and_respawn(
                    &mut workers,
                    &mut idle,
                    &mut crash_counts,
                    &supervisor_queue,
                    &from_workers_tx,
                    &next_worker_id,
                );

                dispatch_pending(&supervisor_queue, &mut workers, &mut idle);
            }
        });

        *pool.supervisor.lock().unwrap() = Some(handle);
        pool
    }

    /// Wakes the dispatcher so it re-checks the queue; called after enqueue.
    pub fn notify(&self) {
        let _ = self.notify_tx.send(());
    }

    pub fn shutdown(&self, grace: Duration) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.queue.shutdown();
        let _ = self.notify_tx.send(());
        if let Some(handle) = self.supervisor.lock().unwrap().take() {
            let start = Instant::now();
            // Best-effort: the supervisor itself waits up to 5s per worker
            // (see spawn_worker's Shutdown handling); this just bounds how
            // long the caller blocks joining the supervisor thread.
            while !handle.is_finished() && start.elapsed() < grace {
                thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

/// Submits a job to the queue and wakes the pool; combines C3's `enqueue`
/// with C4's dispatch notification, matching the control flow in the spec
/// (HTTP submits to the queue *via* the worker pool).
pub fn submit(
    pool: &Arc<WorkerPool>,
    inputs: JobInputs,
    timeout: Duration,
) -> Result<(String, oneshot::Receiver<JobOutcome>), AppError> {
    let result = pool.queue.enqueue(inputs, timeout)?;
    pool.notify();
    Ok(result)
}

fn dispatch_pending(queue: &Arc<JobQueue>, workers: &mut [WorkerHandle], idle: &mut VecDeque<usize>) {
    while let Some(&idx) = idle.front() {
        let Some(taken) = queue.take() else { break };
        idle.pop_front();
        let worker = &mut workers[idx];
        worker.busy = true;
        worker.current_job = Some(taken.id.clone());
        let _ = worker.to_worker.send(DispatcherMsg::Job {
            id: taken.id,
            inputs: Box::new(taken.inputs),
        });
    }
}

fn handle_worker_msg(
    workers: &mut [WorkerHandle],
    queue: &Arc<JobQueue>,
    msg: WorkerMsg,
    idle: &mut VecDeque<usize>,
) {
    match msg {
        WorkerMsg::Ready { worker_id } => {
            if let Some(idx) = workers.iter().position(|w| w.id == worker_id) {
                if !idle.contains(&idx) {
                    idle.push_back(idx);
                }
            }
        }
        WorkerMsg::Result {
            worker_id,
            job_id,
            outcome,
        } => {
            match outcome {
                Ok(artifacts) => queue.complete(&job_id, artifacts, worker_id),
                Err(err) => queue.fail(&job_id, err, Some(worker_id)),
            }
            if let Some(idx) = workers.iter_mut().position(|w| w.id == worker_id) {
                workers[idx].busy = false;
                workers[idx].current_job = None;
                idle.push_back(idx);
            }
        }
        WorkerMsg::Log { level, text, job_id } => {
            log::log!(level, "worker: {text} (job={job_id:?})");
        }
    }
}

fn reap_and_respawn(
    workers: &mut Vec<WorkerHandle>,
    idle: &mut VecDeque<usize>,
    crash_counts: &mut Vec<u32>,
    queue: &Arc<JobQueue>,
    from_workers_tx: &Sender<WorkerMsg>,
    next_worker_id: &Arc<AtomicU32>,
) {
    for idx in 0..workers.len() {
        let dead = workers[idx]
            .join
            .as_ref()
            .map(|j| j.is_finished())
            .unwrap_or(false);
        if !dead {
            continue;
        }
        let crashed_job = workers[idx].current_job.take();
        if let Some(join) = workers[idx].join.take() {
            let _ = join.join();
        }
        if let Some(job_id) = crashed_job {
            queue.fail(&job_id, AppError::WorkerCrashed, Some(workers[idx].id));
        }
        idle.retain(|&i| i != idx);

        crash_counts[idx] += 1;
        let backoff = Duration::from_millis(100 * (1u64 << crash_counts[idx].min(6)))
            .min(MAX_BACKOFF);
        thread::sleep(backoff);

        let new_id = next_worker_id.fetch_add(1, Ordering::Relaxed);
        workers[idx] = spawn_worker(new_id, from_workers_tx.clone());
        idle.push_back(idx);
    }
}

fn spawn_worker(id: u32, to_dispatcher: Sender<WorkerMsg>) -> WorkerHandle {
    let (to_worker, from_dispatcher) = crossbeam_channel::unbounded::<DispatcherMsg>();
    let reply = to_dispatcher.clone();

    let join = thread::Builder::new()
        .name(format!("icon-forge-worker-{id}"))
        .spawn(move || worker_loop(id, from_dispatcher, reply))
        .expect("failed to spawn worker thread");

    let _ = to_dispatcher.send(WorkerMsg::Ready { worker_id: id });

    WorkerHandle {
        id,
        to_worker,
        join: Some(join),
        busy: false,
        current_job: None,
    }
}

fn worker_loop(id: u32, from_dispatcher: Receiver<DispatcherMsg>, to_dispatcher: Sender<WorkerMsg>) {
    for msg in from_dispatcher.iter() {
        match msg {
            DispatcherMsg::Shutdown => break,
            DispatcherMsg::Job { id: job_id, inputs } => {
                let _ = to_dispatcher.send(WorkerMsg::Log {
                    level: log::Level::Debug,
                    text: format!("worker {id} starting job"),
                    job_id: Some(job_id.clone()),
                });
                let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                    pipeline::convert(&inputs)
                }));
                let outcome = match result {
                    Ok(Ok(artifacts)) => Ok(artifacts),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(AppError::WorkerCrashed),
                };
                let _ = to_dispatcher.send(WorkerMsg::Result {
                    worker_id: id,
                    job_id,
                    outcome,
                });
            }
        }
    }
}
