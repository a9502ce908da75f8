//! Task queue that fires scheduled jobs and holds per-name run leases.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use enrolsync_state::{StoreError, StoreResult};

use super::types::JobArgs;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job invocation waiting to fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub name: String,
    pub args: JobArgs,
    pub created_at: DateTime<Utc>,
    pub run_at: DateTime<Utc>,
    /// Failed runs so far
    #[serde(default)]
    pub attempt: u32,
}

/// `from + delay`, clamped to the latest representable instant.
fn delayed(from: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| from.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl ScheduledTask {
    pub fn new(name: impl Into<String>, args: JobArgs, delay: Duration) -> Self {
        let created_at = Utc::now();
        Self {
            id: TaskId::new(),
            name: name.into(),
            args,
            created_at,
            run_at: delayed(created_at, delay),
            attempt: 0,
        }
    }

    /// Move the firing time to `delay` from now.
    pub fn postpone(&mut self, delay: Duration) {
        self.run_at = delayed(Utc::now(), delay);
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.run_at <= now
    }
}

/// Host task queue abstraction.
///
/// Delivery is at least once. Tasks are identified by name and args; a
/// pending task with the same pair absorbs a new submission.
pub trait TaskQueue: Send + Sync {
    /// Queue a task to fire after `delay`. Returns the pending task's id.
    fn schedule(&self, name: &str, args: JobArgs, delay: Duration) -> StoreResult<TaskId>;

    /// Put a claimed task back to fire after `delay`, keeping its id and
    /// attempt count. A pending task with the same name and args absorbs it.
    fn requeue(&self, task: ScheduledTask, delay: Duration) -> StoreResult<TaskId>;

    /// Remove and return the earliest due task whose name is not leased.
    fn claim_next(&self) -> StoreResult<Option<ScheduledTask>>;

    /// Pending tasks with the given name, in firing order.
    fn pending(&self, name: &str) -> StoreResult<Vec<ScheduledTask>>;

    /// Drop every pending task with one of `names`. Returns how many went.
    fn cancel_all(&self, names: &[String]) -> StoreResult<usize>;

    /// Take the run lease for `name`. `false` when someone else holds it.
    fn try_acquire_lease(&self, name: &str) -> StoreResult<bool>;

    fn release_lease(&self, name: &str) -> StoreResult<()>;
}

impl<Q> TaskQueue for Arc<Q>
where
    Q: TaskQueue + ?Sized,
{
    fn schedule(&self, name: &str, args: JobArgs, delay: Duration) -> StoreResult<TaskId> {
        (**self).schedule(name, args, delay)
    }

    fn requeue(&self, task: ScheduledTask, delay: Duration) -> StoreResult<TaskId> {
        (**self).requeue(task, delay)
    }

    fn claim_next(&self) -> StoreResult<Option<ScheduledTask>> {
        (**self).claim_next()
    }

    fn pending(&self, name: &str) -> StoreResult<Vec<ScheduledTask>> {
        (**self).pending(name)
    }

    fn cancel_all(&self, names: &[String]) -> StoreResult<usize> {
        (**self).cancel_all(names)
    }

    fn try_acquire_lease(&self, name: &str) -> StoreResult<bool> {
        (**self).try_acquire_lease(name)
    }

    fn release_lease(&self, name: &str) -> StoreResult<()> {
        (**self).release_lease(name)
    }
}

/// In-memory task queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    tasks: Mutex<Vec<ScheduledTask>>,
    leases: Mutex<HashSet<String>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of pending tasks across all names.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.lock_tasks()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock_tasks(&self) -> StoreResult<std::sync::MutexGuard<'_, Vec<ScheduledTask>>> {
        self.tasks.lock().map_err(|_| StoreError::Poisoned("tasks"))
    }

    fn lock_leases(&self) -> StoreResult<std::sync::MutexGuard<'_, HashSet<String>>> {
        self.leases.lock().map_err(|_| StoreError::Poisoned("leases"))
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn schedule(&self, name: &str, args: JobArgs, delay: Duration) -> StoreResult<TaskId> {
        let mut tasks = self.lock_tasks()?;
        if let Some(existing) = tasks.iter().find(|t| t.name == name && t.args == args) {
            return Ok(existing.id);
        }

        let task = ScheduledTask::new(name, args, delay);
        let id = task.id;
        tasks.push(task);
        Ok(id)
    }

    fn requeue(&self, mut task: ScheduledTask, delay: Duration) -> StoreResult<TaskId> {
        let mut tasks = self.lock_tasks()?;
        if let Some(existing) = tasks
            .iter()
            .find(|t| t.name == task.name && t.args == task.args)
        {
            return Ok(existing.id);
        }

        task.postpone(delay);
        let id = task.id;
        tasks.push(task);
        Ok(id)
    }

    fn claim_next(&self) -> StoreResult<Option<ScheduledTask>> {
        let mut tasks = self.lock_tasks()?;
        let leases = self.lock_leases()?;
        let now = Utc::now();

        let next = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_due(now) && !leases.contains(&t.name))
            .min_by_key(|(_, t)| t.run_at)
            .map(|(idx, _)| idx);

        Ok(next.map(|idx| tasks.remove(idx)))
    }

    fn pending(&self, name: &str) -> StoreResult<Vec<ScheduledTask>> {
        let tasks = self.lock_tasks()?;
        let mut pending: Vec<ScheduledTask> =
            tasks.iter().filter(|t| t.name == name).cloned().collect();
        pending.sort_by_key(|t| t.run_at);
        Ok(pending)
    }

    fn cancel_all(&self, names: &[String]) -> StoreResult<usize> {
        let mut tasks = self.lock_tasks()?;
        let before = tasks.len();
        tasks.retain(|t| !names.contains(&t.name));
        Ok(before - tasks.len())
    }

    fn try_acquire_lease(&self, name: &str) -> StoreResult<bool> {
        Ok(self.lock_leases()?.insert(name.to_string()))
    }

    fn release_lease(&self, name: &str) -> StoreResult<()> {
        self.lock_leases()?.remove(name);
        Ok(())
    }
}
