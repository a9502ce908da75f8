use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use tracing::info;

use enrolsync_core::{CourseId, UserId};
use enrolsync_enrolment::{EnrolmentManager, InMemoryLearnerDirectory, ManualEnrolmentProvider};
use enrolsync_infra::WorkerConfig;
use enrolsync_infra::jobs::{EnrolmentJobScheduler, InMemoryTaskQueue, TaskWorker, TaskWorkerHandle};
use enrolsync_state::{InMemoryOptionStore, InMemoryUserMetaStore};

const DEMO_LEARNERS: u64 = 60;
const DEMO_COURSES: [CourseId; 3] = [CourseId::new(1), CourseId::new(2), CourseId::new(3)];
const WAIT_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> Result<()> {
    enrolsync_observability::init();

    let config = WorkerConfig::from_env();
    info!(
        worker = %config.name,
        learner_batch_size = config.learner_batch_size,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "starting enrolsync worker"
    );

    let meta = InMemoryUserMetaStore::arc();
    let options = InMemoryOptionStore::arc();
    let manager = Arc::new(
        EnrolmentManager::new(meta.clone(), options.clone())
            .with_provider(Arc::new(ManualEnrolmentProvider)),
    );
    seed(&meta, &manager)?;

    let scheduler = Arc::new(EnrolmentJobScheduler::new(
        InMemoryTaskQueue::arc(),
        options,
        manager.clone(),
        Arc::new(InMemoryLearnerDirectory::new(meta)),
        config,
    ));
    info!(jobs = ?scheduler.get_background_jobs(Vec::new()), "background jobs registered");

    let handle = TaskWorker::new(scheduler.clone()).spawn();

    let mut expected = 0;
    if scheduler.maybe_start_learner_calculation()? {
        expected += 1;
    }
    wait_for_completed(&handle, expected)?;

    let course = DEMO_COURSES[0];
    let invalidated = manager.invalidate_course_results(course)?;
    scheduler.start_course_calculation_job(course, true, None)?;
    expected += 1;
    wait_for_completed(&handle, expected)?;
    info!(%course, invalidated, "course results recalculated");

    let stats = handle.stats();
    handle.shutdown();
    info!(
        dispatched = stats.tasks_dispatched,
        completed = stats.jobs_completed,
        failed = stats.tasks_failed,
        retried = stats.tasks_retried,
        "enrolsync worker finished"
    );
    Ok(())
}

/// Register demo learners and courses; every third learner is manually
/// enrolled in the first course.
fn seed(meta: &InMemoryUserMetaStore, manager: &EnrolmentManager) -> Result<()> {
    for course in DEMO_COURSES {
        manager.register_course(course)?;
    }

    for id in 1..=DEMO_LEARNERS {
        let user_id = UserId::new(id);
        meta.add_user(user_id)?;

        if id % 3 == 0 {
            let mut store = manager.state_store(user_id, DEMO_COURSES[0])?;
            ManualEnrolmentProvider::grant(&mut store);
            manager.save_state_store(&mut store)?;
        }
    }

    info!(learners = DEMO_LEARNERS, courses = DEMO_COURSES.len(), "demo data seeded");
    Ok(())
}

fn wait_for_completed(handle: &TaskWorkerHandle, expected: u64) -> Result<()> {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        let stats = handle.stats();
        if stats.jobs_completed >= expected {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!(
                "timed out waiting for {expected} completed jobs ({} so far, {} failed)",
                stats.jobs_completed,
                stats.tasks_failed
            );
        }
        thread::sleep(Duration::from_millis(20));
    }
}
