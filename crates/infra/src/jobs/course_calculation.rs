//! Batched recalculation of one course's enrolment results.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use enrolsync_core::{CourseId, UserId};

use super::context::JobContext;
use super::types::{BatchStats, COURSE_CALCULATION_JOB, JobArgs, JobError, JobResult, run_batch};

pub const DEFAULT_BATCH_SIZE: usize = 40;

/// Arguments of a course calculation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseCalculationArgs {
    pub course_id: CourseId,
    /// Only recalculate results that were invalidated
    #[serde(default)]
    pub invalidated_only: bool,
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Paging cursor, unused with `invalidated_only`
    #[serde(default)]
    pub offset: usize,
    /// Last learner selected with `invalidated_only`, failed ones included
    #[serde(default)]
    pub after_user_id: Option<UserId>,
}

impl CourseCalculationArgs {
    pub fn new(course_id: CourseId, invalidated_only: bool) -> Self {
        Self {
            course_id,
            invalidated_only,
            batch_size: None,
            offset: 0,
            after_user_id: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1)
    }

    pub fn to_args(&self) -> JobArgs {
        let mut args = JobArgs::new();
        args.insert("course_id".into(), Value::from(self.course_id.get()));
        args.insert("invalidated_only".into(), Value::from(self.invalidated_only));
        if let Some(batch_size) = self.batch_size {
            args.insert("batch_size".into(), Value::from(batch_size));
        }
        args.insert("offset".into(), Value::from(self.offset));
        if let Some(after) = self.after_user_id {
            args.insert("after_user_id".into(), Value::from(after.get()));
        }
        args
    }

    pub fn from_args(args: &JobArgs) -> JobResult<Self> {
        serde_json::from_value(Value::Object(args.clone()))
            .map_err(|e| JobError::invalid_args(COURSE_CALCULATION_JOB, e.to_string()))
    }
}

/// Recalculates the learners of one course, one batch per run.
///
/// With `invalidated_only` the job walks invalidated results by user id and
/// carries the last id selected in its args, so learners that keep failing
/// are passed over. Otherwise it pages through every learner with a stored
/// result and carries the offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseCalculationJob {
    args: CourseCalculationArgs,
    is_complete: bool,
    last_run: BatchStats,
}

impl CourseCalculationJob {
    pub const NAME: &'static str = COURSE_CALCULATION_JOB;

    pub fn new(args: CourseCalculationArgs) -> Self {
        Self {
            args,
            is_complete: false,
            last_run: BatchStats::default(),
        }
    }

    pub fn from_args(args: &JobArgs) -> JobResult<Self> {
        Ok(Self::new(CourseCalculationArgs::from_args(args)?))
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn args(&self) -> JobArgs {
        self.args.to_args()
    }

    pub fn course_args(&self) -> &CourseCalculationArgs {
        &self.args
    }

    pub fn course_id(&self) -> CourseId {
        self.args.course_id
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn last_run(&self) -> BatchStats {
        self.last_run
    }

    pub fn run(&mut self, ctx: &JobContext) -> JobResult<BatchStats> {
        let course_id = self.args.course_id;
        let batch_size = self.args.effective_batch_size();
        let learners = if self.args.invalidated_only {
            ctx.directory.invalidated_learners(course_id, self.args.after_user_id, batch_size)?
        } else {
            ctx.directory.course_learners(course_id, self.args.offset, batch_size)?
        };

        if learners.is_empty() {
            self.is_complete = true;
            self.last_run = BatchStats::default();
            debug!(job = Self::NAME, %course_id, "no course learners left");
            return Ok(self.last_run);
        }

        let stats = run_batch(Self::NAME, &learners, |user_id| {
            ctx.calculator
                .recalculate_course_enrolment(user_id, course_id)
                .map(|_| ())
        });
        self.last_run = stats;

        if self.args.invalidated_only {
            self.args.after_user_id = learners.last().copied();
        } else {
            self.args.offset += batch_size;
        }

        info!(
            job = Self::NAME,
            %course_id,
            batch_size,
            offset = self.args.offset,
            processed = stats.processed,
            failed = stats.failed,
            "course calculation batch finished"
        );
        Ok(stats)
    }
}
