//! Job names, arguments, errors and the closed set of background jobs.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use enrolsync_core::UserId;
use enrolsync_enrolment::{EnrolmentError, EnrolmentResult};

use super::context::JobContext;
use super::course_calculation::CourseCalculationJob;
use super::learner_calculation::LearnerCalculationJob;

/// Flat job arguments: a JSON object holding only scalar values.
pub type JobArgs = Map<String, Value>;

pub const LEARNER_CALCULATION_JOB: &str = "calculate_learner_enrolments";
pub const COURSE_CALCULATION_JOB: &str = "calculate_course_enrolments";

/// Every job name owned by the enrolment scheduler.
pub const JOB_NAMES: [&str; 2] = [LEARNER_CALCULATION_JOB, COURSE_CALCULATION_JOB];

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("invalid arguments for {job}: {reason}")]
    InvalidArgs { job: &'static str, reason: String },

    #[error(transparent)]
    Enrolment(#[from] EnrolmentError),
}

impl JobError {
    pub fn invalid_args(job: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgs {
            job,
            reason: reason.into(),
        }
    }
}

/// Counters for one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub selected: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Recalculate each learner of a batch, logging and skipping failures.
pub(crate) fn run_batch<F>(job: &'static str, learners: &[UserId], mut recalculate: F) -> BatchStats
where
    F: FnMut(UserId) -> EnrolmentResult<()>,
{
    let mut stats = BatchStats {
        selected: learners.len(),
        ..BatchStats::default()
    };

    for &user_id in learners {
        match recalculate(user_id) {
            Ok(()) => stats.processed += 1,
            Err(error) => {
                stats.failed += 1;
                warn!(job, %user_id, %error, "learner recalculation failed, skipping");
            }
        }
    }

    stats
}

/// A background job the scheduler knows how to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackgroundJob {
    LearnerCalculation(LearnerCalculationJob),
    CourseCalculation(CourseCalculationJob),
}

impl BackgroundJob {
    pub fn name(&self) -> &'static str {
        match self {
            BackgroundJob::LearnerCalculation(_) => LEARNER_CALCULATION_JOB,
            BackgroundJob::CourseCalculation(_) => COURSE_CALCULATION_JOB,
        }
    }

    /// Arguments that rebuild this job in its current state.
    pub fn args(&self) -> JobArgs {
        match self {
            BackgroundJob::LearnerCalculation(job) => job.args(),
            BackgroundJob::CourseCalculation(job) => job.args(),
        }
    }

    /// Process one batch.
    pub fn run(&mut self, ctx: &JobContext) -> JobResult<BatchStats> {
        match self {
            BackgroundJob::LearnerCalculation(job) => job.run(ctx),
            BackgroundJob::CourseCalculation(job) => job.run(ctx),
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            BackgroundJob::LearnerCalculation(job) => job.is_complete(),
            BackgroundJob::CourseCalculation(job) => job.is_complete(),
        }
    }
}

impl From<LearnerCalculationJob> for BackgroundJob {
    fn from(job: LearnerCalculationJob) -> Self {
        BackgroundJob::LearnerCalculation(job)
    }
}

impl From<CourseCalculationJob> for BackgroundJob {
    fn from(job: CourseCalculationJob) -> Self {
        BackgroundJob::CourseCalculation(job)
    }
}
