//! Enrolment job scheduler: submits, runs and re-queues calculation jobs.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use enrolsync_core::CourseId;
use enrolsync_enrolment::{EnrolmentCalculator, EnrolmentError, LearnerDirectory};
use enrolsync_state::{OptionStore, StoreError};

use crate::config::WorkerConfig;
use crate::version_gate::VersionGate;

use super::context::JobContext;
use super::course_calculation::{CourseCalculationArgs, CourseCalculationJob};
use super::learner_calculation::LearnerCalculationJob;
use super::queue::{ScheduledTask, TaskId, TaskQueue};
use super::types::{
    BackgroundJob, BatchStats, COURSE_CALCULATION_JOB, JOB_NAMES, JobArgs, JobError,
    LEARNER_CALCULATION_JOB,
};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {0} is already running")]
    AlreadyRunning(String),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Enrolment(#[from] EnrolmentError),
}

impl SchedulerError {
    /// Whether running the same task again may succeed. Unknown jobs and
    /// malformed args fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SchedulerError::UnknownJob(_) | SchedulerError::Job(JobError::InvalidArgs { .. })
        )
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// What a single scheduled run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job: &'static str,
    pub stats: BatchStats,
    pub completed: bool,
    /// Follow-up task when the job still has work left
    pub rescheduled: Option<TaskId>,
}

/// Run lease for one job name, released on drop.
struct RunLease<'a> {
    queue: &'a dyn TaskQueue,
    name: &'static str,
}

impl<'a> RunLease<'a> {
    fn acquire(queue: &'a dyn TaskQueue, name: &'static str) -> SchedulerResult<Self> {
        if !queue.try_acquire_lease(name)? {
            return Err(SchedulerError::AlreadyRunning(name.to_string()));
        }
        Ok(Self { queue, name })
    }
}

impl Drop for RunLease<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.queue.release_lease(self.name) {
            error!(job = self.name, error = %e, "failed to release run lease");
        }
    }
}

/// Schedules and runs the enrolment calculation jobs.
///
/// Built once at bootstrap from explicit handles. Every run processes one
/// batch; unfinished jobs are re-queued with their current args so the host
/// queue fires the next batch.
pub struct EnrolmentJobScheduler {
    queue: Arc<dyn TaskQueue>,
    gate: VersionGate,
    context: JobContext,
    config: WorkerConfig,
}

impl EnrolmentJobScheduler {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        options: Arc<dyn OptionStore>,
        calculator: Arc<dyn EnrolmentCalculator>,
        directory: Arc<dyn LearnerDirectory>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            gate: VersionGate::new(options),
            context: JobContext::new(calculator, directory),
            config,
        }
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn gate(&self) -> &VersionGate {
        &self.gate
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Queue a course calculation. The returned job has not run yet.
    pub fn start_course_calculation_job(
        &self,
        course_id: CourseId,
        invalidated_only: bool,
        batch_size: Option<usize>,
    ) -> SchedulerResult<CourseCalculationJob> {
        let job = CourseCalculationJob::new(
            CourseCalculationArgs::new(course_id, invalidated_only).with_batch_size(batch_size),
        );
        let task = self.queue.schedule(job.name(), job.args(), Duration::ZERO)?;

        info!(
            job = job.name(),
            %course_id,
            invalidated_only,
            task_id = %task,
            "course calculation scheduled"
        );
        Ok(job)
    }

    /// Queue a learner sweep unless the gate already holds the current
    /// calculation version. Returns whether a sweep is queued.
    ///
    /// A sweep already pending (fresh or part way through) absorbs the
    /// trigger; it restarts itself if the version moved on.
    pub fn maybe_start_learner_calculation(&self) -> SchedulerResult<bool> {
        let current = self.context.calculator.calculation_version()?;
        if self.gate.is_current(&current)? {
            debug!(version = %current, "learner calculations are current");
            return Ok(false);
        }

        if let Some(pending) = self.queue.pending(LEARNER_CALCULATION_JOB)?.first() {
            debug!(task_id = %pending.id, "learner calculation already queued");
            return Ok(true);
        }

        let job = LearnerCalculationJob::new(self.config.learner_batch_size);
        let task = self.queue.schedule(job.name(), job.args(), Duration::ZERO)?;

        info!(
            job = job.name(),
            version = %current,
            task_id = %task,
            "learner calculation scheduled"
        );
        Ok(true)
    }

    /// Run the first batch of a fresh learner sweep. Advances the gate on
    /// completion.
    pub fn run_learner_calculation(&self) -> SchedulerResult<JobOutcome> {
        self.resume_learner_calculation(&JobArgs::new())
    }

    /// Rebuild a learner sweep from its re-queued args and run one batch.
    pub fn resume_learner_calculation(&self, args: &JobArgs) -> SchedulerResult<JobOutcome> {
        let mut job = BackgroundJob::from(LearnerCalculationJob::from_args(
            self.config.learner_batch_size,
            args,
        )?);
        self.run(&mut job, |job| self.finish_learner_sweep(job))
    }

    /// Rebuild a course calculation from its args and run one batch.
    pub fn run_course_calculation(&self, args: &JobArgs) -> SchedulerResult<JobOutcome> {
        let mut job = BackgroundJob::from(CourseCalculationJob::from_args(args)?);
        self.run(&mut job, |_| Ok(()))
    }

    /// Route a fired task to its job.
    pub fn dispatch(&self, task: &ScheduledTask) -> SchedulerResult<JobOutcome> {
        match task.name.as_str() {
            LEARNER_CALCULATION_JOB => self.resume_learner_calculation(&task.args),
            COURSE_CALCULATION_JOB => self.run_course_calculation(&task.args),
            other => Err(SchedulerError::UnknownJob(other.to_string())),
        }
    }

    /// Add this scheduler's job names to `jobs`, keeping existing entries.
    pub fn get_background_jobs(&self, mut jobs: Vec<String>) -> Vec<String> {
        for name in JOB_NAMES {
            if !jobs.iter().any(|existing| existing == name) {
                jobs.push(name.to_string());
            }
        }
        jobs
    }

    /// Drop every pending enrolment job. Work already done is kept.
    pub fn cancel_background_jobs(&self) -> SchedulerResult<usize> {
        let names = self.get_background_jobs(Vec::new());
        let cancelled = self.queue.cancel_all(&names)?;
        info!(cancelled, "enrolment background jobs cancelled");
        Ok(cancelled)
    }

    /// Run one batch of `job` under its name's lease.
    ///
    /// An incomplete job is re-queued with its current args; a complete one
    /// triggers `on_complete` exactly once. Errors leave nothing queued;
    /// retrying the fired task is up to the caller.
    pub fn run<F>(&self, job: &mut BackgroundJob, on_complete: F) -> SchedulerResult<JobOutcome>
    where
        F: FnOnce(&BackgroundJob) -> SchedulerResult<()>,
    {
        let name = job.name();
        let _lease = RunLease::acquire(self.queue.as_ref(), name)?;

        let stats = job.run(&self.context)?;

        if !job.is_complete() {
            let task = self
                .queue
                .schedule(name, job.args(), self.config.reschedule_delay)?;
            debug!(job = name, task_id = %task, processed = stats.processed, "job rescheduled");
            return Ok(JobOutcome {
                job: name,
                stats,
                completed: false,
                rescheduled: Some(task),
            });
        }

        on_complete(job)?;
        info!(job = name, "background job complete");
        Ok(JobOutcome {
            job: name,
            stats,
            completed: true,
            rescheduled: None,
        })
    }

    fn finish_learner_sweep(&self, job: &BackgroundJob) -> SchedulerResult<()> {
        let BackgroundJob::LearnerCalculation(job) = job else {
            return Ok(());
        };
        let Some(swept) = job.swept_version() else {
            return Ok(());
        };
        if job.failed() > 0 {
            // the next trigger sweeps the failed learners again
            warn!(
                job = job.name(),
                failed = job.failed(),
                "learner sweep finished with failures, calculation version not recorded"
            );
            return Ok(());
        }

        let current = self.context.calculator.calculation_version()?;
        self.gate.advance(swept, &current)?;
        Ok(())
    }
}
