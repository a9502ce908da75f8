//! Sweep that brings every learner up to the current calculation version.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use enrolsync_core::UserId;

use super::context::JobContext;
use super::types::{BatchStats, JobArgs, JobError, JobResult, LEARNER_CALCULATION_JOB, run_batch};

/// Progress of a learner sweep, carried in the re-queued task args.
///
/// A fresh sweep has no progress and maps to empty args.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerSweepArgs {
    /// Calculation version the sweep selects against
    #[serde(default)]
    pub version: Option<String>,
    /// Last learner selected, failed ones included
    #[serde(default)]
    pub after_user_id: Option<UserId>,
    /// Learners that failed earlier in this sweep
    #[serde(default)]
    pub failed: usize,
}

impl LearnerSweepArgs {
    pub fn to_args(&self) -> JobArgs {
        let mut args = JobArgs::new();
        if let Some(version) = &self.version {
            args.insert("version".into(), Value::from(version.as_str()));
        }
        if let Some(after) = self.after_user_id {
            args.insert("after_user_id".into(), Value::from(after.get()));
        }
        if self.failed > 0 {
            args.insert("failed".into(), Value::from(self.failed));
        }
        args
    }

    pub fn from_args(args: &JobArgs) -> JobResult<Self> {
        serde_json::from_value(Value::Object(args.clone()))
            .map_err(|e| JobError::invalid_args(LEARNER_CALCULATION_JOB, e.to_string()))
    }
}

/// Recalculates learners whose version stamp is stale, one batch per run.
///
/// Each run selects stale learners above the cursor and moves the cursor to
/// the last one selected, so a learner that keeps failing is passed over
/// instead of being selected again. The job is complete on the first run
/// that selects nobody; `failed()` then tells whether the sweep was clean.
/// A run that finds the calculation version changed restarts the sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LearnerCalculationJob {
    batch_size: usize,
    sweep: LearnerSweepArgs,
    is_complete: bool,
    last_run: BatchStats,
}

impl LearnerCalculationJob {
    pub const NAME: &'static str = LEARNER_CALCULATION_JOB;

    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            sweep: LearnerSweepArgs::default(),
            is_complete: false,
            last_run: BatchStats::default(),
        }
    }

    /// Rebuild a sweep from re-queued args. The batch size comes from config.
    pub fn from_args(batch_size: usize, args: &JobArgs) -> JobResult<Self> {
        let mut job = Self::new(batch_size);
        job.sweep = LearnerSweepArgs::from_args(args)?;
        Ok(job)
    }

    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    pub fn args(&self) -> JobArgs {
        self.sweep.to_args()
    }

    pub fn sweep(&self) -> &LearnerSweepArgs {
        &self.sweep
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    /// Version the sweep selected against.
    pub fn swept_version(&self) -> Option<&str> {
        self.sweep.version.as_deref()
    }

    /// Learners that failed during the sweep so far.
    pub fn failed(&self) -> usize {
        self.sweep.failed
    }

    pub fn last_run(&self) -> BatchStats {
        self.last_run
    }

    pub fn run(&mut self, ctx: &JobContext) -> JobResult<BatchStats> {
        let version = ctx.calculator.calculation_version()?;
        if self.sweep.version.as_deref() != Some(version.as_str()) {
            if let Some(previous) = &self.sweep.version {
                info!(
                    job = Self::NAME,
                    %previous,
                    %version,
                    "calculation version changed, restarting sweep"
                );
            }
            self.sweep = LearnerSweepArgs {
                version: Some(version.clone()),
                ..LearnerSweepArgs::default()
            };
        }

        let learners = ctx
            .directory
            .stale_learners(&version, self.sweep.after_user_id, self.batch_size)?;

        if learners.is_empty() {
            self.is_complete = true;
            self.last_run = BatchStats::default();
            debug!(job = Self::NAME, failed = self.sweep.failed, "no stale learners left");
            return Ok(self.last_run);
        }

        let stats = run_batch(Self::NAME, &learners, |user_id| {
            ctx.calculator.recalculate_enrolments(user_id)
        });
        self.sweep.after_user_id = learners.last().copied();
        self.sweep.failed += stats.failed;
        self.last_run = stats;

        info!(
            job = Self::NAME,
            batch_size = self.batch_size,
            processed = stats.processed,
            failed = stats.failed,
            "learner calculation batch finished"
        );
        Ok(stats)
    }
}
