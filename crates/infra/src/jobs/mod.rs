//! Batched enrolment recalculation jobs.
//!
//! ## Design
//!
//! - Each job run processes one bounded batch and reports completion
//! - Unfinished jobs are re-queued with args that rebuild them
//! - One run per job name at a time, enforced by a queue lease
//! - A learner sweep that finishes without failures advances the
//!   calculation version gate
//! - A task whose run errored is retried with backoff by the worker
//!
//! ## Components
//!
//! - `BackgroundJob`: the learner and course calculation jobs
//! - `TaskQueue`: pending tasks and run leases (in-memory or host backed)
//! - `EnrolmentJobScheduler`: submits, runs and re-queues jobs
//! - `TaskWorker`: background thread firing due tasks

pub mod context;
pub mod course_calculation;
pub mod learner_calculation;
pub mod queue;
pub mod scheduler;
pub mod types;
pub mod worker;

pub use context::JobContext;
pub use course_calculation::{CourseCalculationArgs, CourseCalculationJob, DEFAULT_BATCH_SIZE};
pub use learner_calculation::{LearnerCalculationJob, LearnerSweepArgs};
pub use queue::{InMemoryTaskQueue, ScheduledTask, TaskId, TaskQueue};
pub use scheduler::{EnrolmentJobScheduler, JobOutcome, SchedulerError, SchedulerResult};
pub use types::{
    BackgroundJob, BatchStats, COURSE_CALCULATION_JOB, JOB_NAMES, JobArgs, JobError, JobResult,
    LEARNER_CALCULATION_JOB,
};
pub use worker::{TaskWorker, TaskWorkerHandle, WorkerStats};
