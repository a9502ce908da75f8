//! Shared fixtures for job and scheduler tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use enrolsync_core::{CourseId, UserId};
use enrolsync_enrolment::{
    EnrolmentCalculator, EnrolmentError, EnrolmentManager, EnrolmentResult,
    InMemoryLearnerDirectory, LEARNER_CALCULATION_META, LearnerDirectory, ManualEnrolmentProvider,
};
use enrolsync_state::{InMemoryOptionStore, InMemoryUserMetaStore, StoreError, UserMetaStore};

use crate::config::WorkerConfig;
use crate::jobs::{EnrolmentJobScheduler, InMemoryTaskQueue, JobContext};

pub(crate) const COURSE: CourseId = CourseId::new(1);

/// Calculator that fails for chosen learners and delegates the rest.
pub(crate) struct FlakyCalculator {
    inner: Arc<EnrolmentManager>,
    failing: RwLock<HashSet<UserId>>,
}

impl FlakyCalculator {
    pub fn fail_for(&self, user_id: UserId) {
        self.failing.write().unwrap().insert(user_id);
    }

    pub fn heal(&self, user_id: UserId) {
        self.failing.write().unwrap().remove(&user_id);
    }

    pub fn heal_all(&self) {
        self.failing.write().unwrap().clear();
    }

    fn check(&self, user_id: UserId) -> EnrolmentResult<()> {
        if self.failing.read().unwrap().contains(&user_id) {
            return Err(EnrolmentError::Recalculation {
                user_id,
                reason: "provider unavailable".to_string(),
            });
        }
        Ok(())
    }
}

impl EnrolmentCalculator for FlakyCalculator {
    fn calculation_version(&self) -> EnrolmentResult<String> {
        self.inner.calculation_version()
    }

    fn recalculate_enrolments(&self, user_id: UserId) -> EnrolmentResult<()> {
        self.check(user_id)?;
        self.inner.recalculate_enrolments(user_id)
    }

    fn recalculate_course_enrolment(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> EnrolmentResult<bool> {
        self.check(user_id)?;
        self.inner.recalculate_course_enrolment(user_id, course_id)
    }
}

/// Directory whose next queries fail, as if the backing store were down.
pub(crate) struct FlakyDirectory {
    inner: InMemoryLearnerDirectory,
    failures: AtomicUsize,
}

impl FlakyDirectory {
    pub fn fail_next(&self, queries: usize) {
        self.failures.store(queries, Ordering::SeqCst);
    }

    fn check(&self) -> EnrolmentResult<()> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::storage("directory unavailable").into());
        }
        Ok(())
    }
}

impl LearnerDirectory for FlakyDirectory {
    fn stale_learners(
        &self,
        version: &str,
        after: Option<UserId>,
        limit: usize,
    ) -> EnrolmentResult<Vec<UserId>> {
        self.check()?;
        self.inner.stale_learners(version, after, limit)
    }

    fn course_learners(
        &self,
        course_id: CourseId,
        offset: usize,
        limit: usize,
    ) -> EnrolmentResult<Vec<UserId>> {
        self.check()?;
        self.inner.course_learners(course_id, offset, limit)
    }

    fn invalidated_learners(
        &self,
        course_id: CourseId,
        after: Option<UserId>,
        limit: usize,
    ) -> EnrolmentResult<Vec<UserId>> {
        self.check()?;
        self.inner.invalidated_learners(course_id, after, limit)
    }
}

pub(crate) struct Fixture {
    pub meta: Arc<InMemoryUserMetaStore>,
    pub options: Arc<InMemoryOptionStore>,
    pub manager: Arc<EnrolmentManager>,
    pub calculator: Arc<FlakyCalculator>,
    pub directory: Arc<FlakyDirectory>,
}

impl Fixture {
    /// Learners `1..=count`, one registered course, manual enrolment only.
    pub fn with_learners(count: u64) -> Self {
        let meta = InMemoryUserMetaStore::arc();
        let options = InMemoryOptionStore::arc();
        for id in 1..=count {
            meta.add_user(UserId::new(id)).unwrap();
        }

        let manager = Arc::new(
            EnrolmentManager::new(meta.clone(), options.clone())
                .with_provider(Arc::new(ManualEnrolmentProvider)),
        );
        manager.register_course(COURSE).unwrap();

        Self {
            calculator: Arc::new(FlakyCalculator {
                inner: manager.clone(),
                failing: RwLock::new(HashSet::new()),
            }),
            directory: Arc::new(FlakyDirectory {
                inner: InMemoryLearnerDirectory::new(meta.clone()),
                failures: AtomicUsize::new(0),
            }),
            meta,
            options,
            manager,
        }
    }

    pub fn context(&self) -> JobContext {
        JobContext::new(self.calculator.clone(), self.directory.clone())
    }

    pub fn scheduler(
        &self,
        queue: Arc<InMemoryTaskQueue>,
        config: WorkerConfig,
    ) -> EnrolmentJobScheduler {
        EnrolmentJobScheduler::new(
            queue,
            self.options.clone(),
            self.calculator.clone(),
            self.directory.clone(),
            config,
        )
    }

    pub fn current_version(&self) -> String {
        self.manager.calculation_version().unwrap()
    }

    /// Learners whose stamp differs from the current version.
    pub fn stale_count(&self) -> usize {
        let version = self.current_version();
        self.meta
            .user_ids()
            .unwrap()
            .into_iter()
            .filter(|&user_id| {
                self.meta
                    .get_meta(user_id, LEARNER_CALCULATION_META)
                    .unwrap()
                    .as_deref()
                    != Some(version.as_str())
            })
            .count()
    }
}
