//! Worker configuration, read from the environment.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Scheduler and worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Thread name and log label
    pub name: String,
    /// Learners recalculated per learner-sweep batch
    pub learner_batch_size: usize,
    /// How long the worker idles when no task is due
    pub poll_interval: Duration,
    /// Delay before a rescheduled batch becomes due
    pub reschedule_delay: Duration,
    /// Runs a failing task gets before it is dropped
    pub max_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "enrolsync-worker".to_string(),
            learner_batch_size: Self::DEFAULT_LEARNER_BATCH_SIZE,
            poll_interval: Duration::from_millis(250),
            reschedule_delay: Duration::ZERO,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl WorkerConfig {
    pub const DEFAULT_LEARNER_BATCH_SIZE: usize = 20;
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
    /// Cap on the backoff between retries of a failed task.
    pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

    /// Build from `ENROLSYNC_*` environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            name: lookup("ENROLSYNC_WORKER_NAME").unwrap_or(defaults.name),
            learner_batch_size: parse_var(
                &lookup,
                "ENROLSYNC_LEARNER_BATCH_SIZE",
                defaults.learner_batch_size,
            )
            .max(1),
            poll_interval: Duration::from_millis(parse_var(
                &lookup,
                "ENROLSYNC_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            reschedule_delay: Duration::from_millis(parse_var(
                &lookup,
                "ENROLSYNC_RESCHEDULE_DELAY_MS",
                defaults.reschedule_delay.as_millis() as u64,
            )),
            max_attempts: parse_var(
                &lookup,
                "ENROLSYNC_MAX_ATTEMPTS",
                defaults.max_attempts,
            )
            .max(1),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_learner_batch_size(mut self, batch_size: usize) -> Self {
        self.learner_batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reschedule_delay(mut self, delay: Duration) -> Self {
        self.reschedule_delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether a task that has failed `attempt` times gets another run.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff before retry number `attempt` (1-indexed): the poll interval,
    /// doubled per attempt and capped at `MAX_RETRY_DELAY`.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.poll_interval.saturating_mul(factor).min(Self::MAX_RETRY_DELAY)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "ignoring unparsable config value");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = WorkerConfig::from_lookup(lookup(&[]));
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.learner_batch_size, 20);
    }

    #[test]
    fn reads_overrides() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("ENROLSYNC_WORKER_NAME", "sweeper"),
            ("ENROLSYNC_LEARNER_BATCH_SIZE", "50"),
            ("ENROLSYNC_POLL_INTERVAL_MS", "10"),
            ("ENROLSYNC_RESCHEDULE_DELAY_MS", "1500"),
            ("ENROLSYNC_MAX_ATTEMPTS", "3"),
        ]));

        assert_eq!(config.name, "sweeper");
        assert_eq!(config.learner_batch_size, 50);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.reschedule_delay, Duration::from_millis(1500));
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn bad_values_fall_back() {
        let config = WorkerConfig::from_lookup(lookup(&[
            ("ENROLSYNC_LEARNER_BATCH_SIZE", "lots"),
            ("ENROLSYNC_POLL_INTERVAL_MS", "-4"),
        ]));

        assert_eq!(config.learner_batch_size, 20);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn retry_delay_doubles_up_to_cap() {
        let config = WorkerConfig::default()
            .with_poll_interval(Duration::from_millis(100))
            .with_max_attempts(3);

        assert_eq!(config.retry_delay(1), Duration::from_millis(100));
        assert_eq!(config.retry_delay(3), Duration::from_millis(400));
        assert_eq!(config.retry_delay(40), WorkerConfig::MAX_RETRY_DELAY);
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
    }

    #[test]
    fn batch_size_is_at_least_one() {
        let config = WorkerConfig::from_lookup(lookup(&[("ENROLSYNC_LEARNER_BATCH_SIZE", "0")]));
        assert_eq!(config.learner_batch_size, 1);
    }
}
