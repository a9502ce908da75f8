//! Background thread that fires due tasks into the scheduler.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use enrolsync_state::StoreResult;

use super::scheduler::{EnrolmentJobScheduler, SchedulerError};

/// Handle to control a running worker.
#[derive(Debug)]
pub struct TaskWorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl TaskWorkerHandle {
    /// Request graceful shutdown and wait for the thread to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        lock_stats(&self.stats).clone()
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub tasks_dispatched: u64,
    pub jobs_completed: u64,
    pub jobs_rescheduled: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub uptime_secs: u64,
}

/// Polls the scheduler's queue and dispatches due tasks.
///
/// Stands in for the host's cron: one named thread, one task at a time.
#[derive(Clone)]
pub struct TaskWorker {
    scheduler: Arc<EnrolmentJobScheduler>,
}

impl TaskWorker {
    pub fn new(scheduler: Arc<EnrolmentJobScheduler>) -> Self {
        Self { scheduler }
    }

    /// Spawn the worker in a background thread.
    pub fn spawn(self) -> TaskWorkerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let stats_clone = stats.clone();

        let name = self.scheduler.config().name.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(self, shutdown_rx, stats_clone))
            .expect("failed to spawn task worker thread");

        TaskWorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }

    /// Dispatch up to `limit` due tasks on the calling thread. Returns how
    /// many were dispatched.
    pub fn run_pending(&self, limit: usize) -> StoreResult<usize> {
        let stats = Mutex::new(WorkerStats::default());
        let mut dispatched = 0;
        while dispatched < limit && self.process_next(&stats)? {
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Claim and dispatch one task. `false` when nothing was due.
    ///
    /// A task whose job is already running goes back for the next poll. A
    /// task that failed is retried with backoff until `max_attempts`, unless
    /// the error is permanent.
    fn process_next(&self, stats: &Mutex<WorkerStats>) -> StoreResult<bool> {
        let Some(task) = self.scheduler.queue().claim_next()? else {
            return Ok(false);
        };
        let worker = self.scheduler.config().name.as_str();
        debug!(worker, task_id = %task.id, job = %task.name, "claimed task");

        let result = self.scheduler.dispatch(&task);
        let config = self.scheduler.config();

        let mut s = lock_stats(stats);
        s.tasks_dispatched += 1;
        match result {
            Ok(outcome) if outcome.completed => s.jobs_completed += 1,
            Ok(_) => s.jobs_rescheduled += 1,
            Err(SchedulerError::AlreadyRunning(job)) => {
                s.tasks_failed += 1;
                warn!(worker, job = %job, "job already running, requeueing task");
                self.scheduler.queue().requeue(task, config.poll_interval)?;
            }
            Err(e) if e.is_retryable() && config.should_retry(task.attempt + 1) => {
                s.tasks_failed += 1;
                s.tasks_retried += 1;
                let mut task = task;
                task.attempt += 1;
                let delay = config.retry_delay(task.attempt);
                warn!(
                    worker,
                    task_id = %task.id,
                    job = %task.name,
                    attempt = task.attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "task failed, retrying"
                );
                self.scheduler.queue().requeue(task, delay)?;
            }
            Err(e) => {
                s.tasks_failed += 1;
                error!(
                    worker,
                    task_id = %task.id,
                    job = %task.name,
                    attempts = task.attempt + 1,
                    error = %e,
                    "task failed, dropping"
                );
            }
        }
        Ok(true)
    }
}

fn lock_stats(stats: &Mutex<WorkerStats>) -> MutexGuard<'_, WorkerStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

fn worker_loop(
    worker: TaskWorker,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<WorkerStats>>,
) {
    let config = worker.scheduler.config().clone();
    info!(worker = %config.name, "task worker started");
    let start_time = Instant::now();

    loop {
        match shutdown_rx.try_recv() {
            Err(mpsc::TryRecvError::Empty) => {}
            _ => break,
        }

        lock_stats(&stats).uptime_secs = start_time.elapsed().as_secs();

        let idle = match worker.process_next(&stats) {
            Ok(found) => !found,
            Err(e) => {
                error!(worker = %config.name, error = %e, "failed to claim task");
                true
            }
        };

        if idle {
            match shutdown_rx.recv_timeout(config.poll_interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                _ => break,
            }
        }
    }

    info!(worker = %config.name, "task worker stopped");
}
