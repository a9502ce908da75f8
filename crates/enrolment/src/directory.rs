//! Bounded learner queries used by the calculation jobs.

use std::sync::Arc;

use enrolsync_core::{CourseId, UserId};
use enrolsync_state::{InMemoryUserMetaStore, UserMetaStore};

use crate::error::EnrolmentResult;
use crate::manager::{EnrolmentManager, LEARNER_CALCULATION_META};

/// Entity queries over the learner population.
///
/// Results are bounded by `limit` and ordered by ascending user id. An
/// `after` cursor restricts a query to ids strictly greater than it.
pub trait LearnerDirectory: Send + Sync {
    /// Learners whose calculation stamp differs from `version` or is missing.
    fn stale_learners(
        &self,
        version: &str,
        after: Option<UserId>,
        limit: usize,
    ) -> EnrolmentResult<Vec<UserId>>;

    /// Learners holding any result for `course_id`, paged by `offset`.
    fn course_learners(
        &self,
        course_id: CourseId,
        offset: usize,
        limit: usize,
    ) -> EnrolmentResult<Vec<UserId>>;

    /// Learners whose result for `course_id` was invalidated.
    fn invalidated_learners(
        &self,
        course_id: CourseId,
        after: Option<UserId>,
        limit: usize,
    ) -> EnrolmentResult<Vec<UserId>>;
}

fn past(cursor: Option<UserId>, user_id: UserId) -> bool {
    cursor.is_none_or(|after| user_id > after)
}

/// Learner directory over the in-memory user registry.
#[derive(Debug, Clone)]
pub struct InMemoryLearnerDirectory {
    meta: Arc<InMemoryUserMetaStore>,
}

impl InMemoryLearnerDirectory {
    pub fn new(meta: Arc<InMemoryUserMetaStore>) -> Self {
        Self { meta }
    }
}

impl LearnerDirectory for InMemoryLearnerDirectory {
    fn stale_learners(
        &self,
        version: &str,
        after: Option<UserId>,
        limit: usize,
    ) -> EnrolmentResult<Vec<UserId>> {
        Ok(self.meta.select_users(limit, |user_id, meta| {
            past(after, user_id)
                && meta
                    .get(LEARNER_CALCULATION_META)
                    .is_none_or(|stamp| stamp != version)
        })?)
    }

    fn course_learners(
        &self,
        course_id: CourseId,
        offset: usize,
        limit: usize,
    ) -> EnrolmentResult<Vec<UserId>> {
        let key = EnrolmentManager::course_meta_key(course_id);
        Ok(self
            .meta
            .users_with_meta(&key)?
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(user_id, _)| user_id)
            .collect())
    }

    fn invalidated_learners(
        &self,
        course_id: CourseId,
        after: Option<UserId>,
        limit: usize,
    ) -> EnrolmentResult<Vec<UserId>> {
        let key = EnrolmentManager::course_meta_key(course_id);
        Ok(self.meta.select_users(limit, |user_id, meta| {
            past(after, user_id) && meta.get(&key).is_some_and(|result| result.is_empty())
        })?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> (InMemoryLearnerDirectory, Arc<InMemoryUserMetaStore>) {
        let meta = InMemoryUserMetaStore::arc();
        for id in 1..=6 {
            meta.add_user(UserId::new(id)).unwrap();
        }
        (InMemoryLearnerDirectory::new(meta.clone()), meta)
    }

    #[test]
    fn stale_learners_include_missing_and_mismatched_stamps() {
        let (directory, meta) = directory();
        meta.set_meta(UserId::new(1), LEARNER_CALCULATION_META, "v2").unwrap();
        meta.set_meta(UserId::new(2), LEARNER_CALCULATION_META, "v1").unwrap();
        meta.set_meta(UserId::new(3), LEARNER_CALCULATION_META, "v2").unwrap();

        let stale = directory.stale_learners("v2", None, 10).unwrap();
        assert_eq!(stale, [2, 4, 5, 6].map(UserId::new).to_vec());

        let bounded = directory.stale_learners("v2", None, 2).unwrap();
        assert_eq!(bounded, vec![UserId::new(2), UserId::new(4)]);
    }

    #[test]
    fn stale_learners_resume_after_cursor() {
        let (directory, _meta) = directory();

        // learners 1 and 2 stay stale, the cursor still moves past them
        let page = directory.stale_learners("v1", Some(UserId::new(2)), 2).unwrap();
        assert_eq!(page, vec![UserId::new(3), UserId::new(4)]);
        assert!(directory.stale_learners("v1", Some(UserId::new(6)), 2).unwrap().is_empty());
    }

    #[test]
    fn course_learners_page_by_offset() {
        let (directory, meta) = directory();
        let course = CourseId::new(9);
        let key = EnrolmentManager::course_meta_key(course);
        for id in [1, 3, 4, 6] {
            meta.set_meta(UserId::new(id), &key, "1").unwrap();
        }

        assert_eq!(
            directory.course_learners(course, 0, 3).unwrap(),
            vec![UserId::new(1), UserId::new(3), UserId::new(4)]
        );
        assert_eq!(directory.course_learners(course, 3, 3).unwrap(), vec![UserId::new(6)]);
        assert!(directory.course_learners(course, 6, 3).unwrap().is_empty());
    }

    #[test]
    fn invalidated_learners_only() {
        let (directory, meta) = directory();
        let course = CourseId::new(9);
        let key = EnrolmentManager::course_meta_key(course);
        meta.set_meta(UserId::new(2), &key, "").unwrap();
        meta.set_meta(UserId::new(3), &key, "1").unwrap();
        meta.set_meta(UserId::new(5), &key, "").unwrap();

        assert_eq!(
            directory.invalidated_learners(course, None, 10).unwrap(),
            vec![UserId::new(2), UserId::new(5)]
        );
        assert_eq!(
            directory.invalidated_learners(course, Some(UserId::new(2)), 10).unwrap(),
            vec![UserId::new(5)]
        );
    }
}
