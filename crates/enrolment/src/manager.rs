//! Enrolment recalculation service.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};
use uuid::Uuid;

use enrolsync_core::{CourseId, UserId};
use enrolsync_state::{OptionStore, ProviderStateStore, StoreError, UserMetaStore};

use crate::error::EnrolmentResult;
use crate::provider::EnrolmentProvider;

/// User meta holding the calculation version a learner was last computed with.
pub const LEARNER_CALCULATION_META: &str = "learner_calculation_version";

/// User meta prefix for cached course results (`"1"`, `"0"`, or `""` when invalidated).
pub const COURSE_ENROLMENT_META_PREFIX: &str = "course_enrolment_";

/// Option holding the site salt mixed into the calculation version.
pub const SITE_SALT_OPTION_NAME: &str = "enrolsync_enrolment_site_salt";

/// Per-entity recalculation, as consumed by the background jobs.
pub trait EnrolmentCalculator: Send + Sync {
    /// Current computation-rule version.
    fn calculation_version(&self) -> EnrolmentResult<String>;

    /// Recompute and persist every course result for a user and stamp the
    /// user with the current calculation version.
    fn recalculate_enrolments(&self, user_id: UserId) -> EnrolmentResult<()>;

    /// Recompute and persist one course result. Returns the new decision.
    fn recalculate_course_enrolment(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> EnrolmentResult<bool>;
}

/// Provider-backed enrolment calculator.
///
/// Constructed once at bootstrap and shared by handle.
pub struct EnrolmentManager {
    meta: Arc<dyn UserMetaStore>,
    options: Arc<dyn OptionStore>,
    providers: Vec<Arc<dyn EnrolmentProvider>>,
    courses: RwLock<BTreeSet<CourseId>>,
}

impl EnrolmentManager {
    pub fn new(meta: Arc<dyn UserMetaStore>, options: Arc<dyn OptionStore>) -> Self {
        Self {
            meta,
            options,
            providers: Vec::new(),
            courses: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn EnrolmentProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn course_meta_key(course_id: CourseId) -> String {
        format!("{COURSE_ENROLMENT_META_PREFIX}{course_id}")
    }

    /// Make a course part of every learner recalculation.
    pub fn register_course(&self, course_id: CourseId) -> EnrolmentResult<()> {
        let mut courses = self
            .courses
            .write()
            .map_err(|_| StoreError::Poisoned("courses"))?;
        courses.insert(course_id);
        Ok(())
    }

    pub fn courses(&self) -> EnrolmentResult<Vec<CourseId>> {
        let courses = self
            .courses
            .read()
            .map_err(|_| StoreError::Poisoned("courses"))?;
        Ok(courses.iter().copied().collect())
    }

    /// Site salt, generated and stored on first use.
    pub fn site_salt(&self) -> EnrolmentResult<String> {
        if let Some(salt) = self.options.get_option(SITE_SALT_OPTION_NAME)? {
            return Ok(salt);
        }
        self.reset_site_salt()
    }

    /// Replace the site salt, which changes the calculation version.
    pub fn reset_site_salt(&self) -> EnrolmentResult<String> {
        let salt = Uuid::now_v7().simple().to_string();
        self.options.update_option(SITE_SALT_OPTION_NAME, &salt)?;
        info!("enrolment site salt reset");
        Ok(salt)
    }

    /// Cached result for a pair; `None` when never calculated or invalidated.
    pub fn enrolment_result(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> EnrolmentResult<Option<bool>> {
        let value = self
            .meta
            .get_meta(user_id, &Self::course_meta_key(course_id))?;
        Ok(match value.as_deref() {
            Some("1") => Some(true),
            Some("0") => Some(false),
            _ => None,
        })
    }

    /// Mark one cached result for recalculation.
    pub fn invalidate_course_enrolment(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> EnrolmentResult<()> {
        self.meta
            .set_meta(user_id, &Self::course_meta_key(course_id), "")?;
        Ok(())
    }

    /// Mark every cached result of a course for recalculation. Returns how
    /// many learners were touched.
    pub fn invalidate_course_results(&self, course_id: CourseId) -> EnrolmentResult<usize> {
        let key = Self::course_meta_key(course_id);
        let learners = self.meta.users_with_meta(&key)?;
        for (user_id, _) in &learners {
            self.meta.set_meta(*user_id, &key, "")?;
        }
        debug!(%course_id, learners = learners.len(), "invalidated course results");
        Ok(learners.len())
    }

    /// Load the provider state store for a pair.
    pub fn state_store(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> EnrolmentResult<ProviderStateStore> {
        Ok(ProviderStateStore::load(
            self.meta.as_ref(),
            user_id,
            course_id,
        )?)
    }

    pub fn save_state_store(&self, store: &mut ProviderStateStore) -> EnrolmentResult<bool> {
        Ok(store.save(self.meta.as_ref())?)
    }
}

impl EnrolmentCalculator for EnrolmentManager {
    fn calculation_version(&self) -> EnrolmentResult<String> {
        let mut parts: Vec<String> = self
            .providers
            .iter()
            .map(|p| format!("{}:{}", p.id(), p.version()))
            .collect();
        parts.sort();

        let seed = format!("{}|{}", self.site_salt()?, parts.join(","));
        Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes())
            .simple()
            .to_string())
    }

    fn recalculate_enrolments(&self, user_id: UserId) -> EnrolmentResult<()> {
        for course_id in self.courses()? {
            self.recalculate_course_enrolment(user_id, course_id)?;
        }

        let version = self.calculation_version()?;
        self.meta
            .set_meta(user_id, LEARNER_CALCULATION_META, &version)?;
        Ok(())
    }

    fn recalculate_course_enrolment(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> EnrolmentResult<bool> {
        let mut store = self.state_store(user_id, course_id)?;

        let mut enrolled = false;
        for provider in self
            .providers
            .iter()
            .filter(|p| p.handles_enrolment(course_id))
        {
            let state = store.provider_state_mut(provider.id());
            if provider.is_enrolled(user_id, course_id, state) {
                enrolled = true;
            }
        }

        store.save(self.meta.as_ref())?;
        self.meta.set_meta(
            user_id,
            &Self::course_meta_key(course_id),
            if enrolled { "1" } else { "0" },
        )?;

        debug!(%user_id, %course_id, enrolled, "recalculated course enrolment");
        Ok(enrolled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ManualEnrolmentProvider;
    use enrolsync_state::{InMemoryOptionStore, InMemoryUserMetaStore, ProviderState};

    /// Denies enrolment to a fixed set of users, allows everyone else.
    struct DeniesBlocked {
        blocked: Vec<UserId>,
        version: u32,
    }

    impl EnrolmentProvider for DeniesBlocked {
        fn id(&self) -> &'static str {
            "denies-blocked"
        }

        fn version(&self) -> u32 {
            self.version
        }

        fn handles_enrolment(&self, _course_id: CourseId) -> bool {
            true
        }

        fn is_enrolled(
            &self,
            user_id: UserId,
            _course_id: CourseId,
            _state: &mut ProviderState,
        ) -> bool {
            !self.blocked.contains(&user_id)
        }
    }

    fn manager(
        provider_version: u32,
    ) -> (
        EnrolmentManager,
        Arc<InMemoryUserMetaStore>,
        Arc<InMemoryOptionStore>,
    ) {
        let meta = InMemoryUserMetaStore::arc();
        let options = InMemoryOptionStore::arc();
        let manager = EnrolmentManager::new(meta.clone(), options.clone()).with_provider(Arc::new(
            DeniesBlocked {
                blocked: vec![UserId::new(2)],
                version: provider_version,
            },
        ));
        (manager, meta, options)
    }

    #[test]
    fn version_is_stable_until_inputs_change() {
        let meta = InMemoryUserMetaStore::arc();
        let options = InMemoryOptionStore::arc();
        let v1 = EnrolmentManager::new(meta.clone(), options.clone())
            .with_provider(Arc::new(DeniesBlocked { blocked: vec![], version: 1 }));
        let v2 = EnrolmentManager::new(meta, options)
            .with_provider(Arc::new(DeniesBlocked { blocked: vec![], version: 2 }));

        let first = v1.calculation_version().unwrap();
        assert_eq!(first, v1.calculation_version().unwrap());
        assert_ne!(first, v2.calculation_version().unwrap());

        v1.reset_site_salt().unwrap();
        assert_ne!(first, v1.calculation_version().unwrap());
    }

    #[test]
    fn recalculate_course_enrolment_stores_result() {
        let (manager, _meta, _options) = manager(1);
        let course = CourseId::new(10);

        assert!(manager.recalculate_course_enrolment(UserId::new(1), course).unwrap());
        assert!(!manager.recalculate_course_enrolment(UserId::new(2), course).unwrap());

        assert_eq!(manager.enrolment_result(UserId::new(1), course).unwrap(), Some(true));
        assert_eq!(manager.enrolment_result(UserId::new(2), course).unwrap(), Some(false));
        assert_eq!(manager.enrolment_result(UserId::new(3), course).unwrap(), None);
    }

    #[test]
    fn recalculate_enrolments_stamps_version() {
        let (manager, meta, _options) = manager(1);
        manager.register_course(CourseId::new(10)).unwrap();
        manager.register_course(CourseId::new(11)).unwrap();

        manager.recalculate_enrolments(UserId::new(1)).unwrap();

        assert_eq!(
            meta.get_meta(UserId::new(1), LEARNER_CALCULATION_META).unwrap(),
            Some(manager.calculation_version().unwrap())
        );
        assert_eq!(
            manager.enrolment_result(UserId::new(1), CourseId::new(11)).unwrap(),
            Some(true)
        );
    }

    #[test]
    fn invalidation_clears_cached_results() {
        let (manager, _meta, _options) = manager(1);
        let course = CourseId::new(10);
        for id in 1..=3 {
            manager.recalculate_course_enrolment(UserId::new(id), course).unwrap();
        }

        assert_eq!(manager.invalidate_course_results(course).unwrap(), 3);
        assert_eq!(manager.enrolment_result(UserId::new(1), course).unwrap(), None);
    }

    #[test]
    fn manual_provider_decision_survives_recalculation() {
        let meta = InMemoryUserMetaStore::arc();
        let manager = EnrolmentManager::new(meta, InMemoryOptionStore::arc())
            .with_provider(Arc::new(ManualEnrolmentProvider));
        let (user, course) = (UserId::new(5), CourseId::new(7));

        assert!(!manager.recalculate_course_enrolment(user, course).unwrap());

        let mut store = manager.state_store(user, course).unwrap();
        ManualEnrolmentProvider::grant(&mut store);
        manager.save_state_store(&mut store).unwrap();

        assert!(manager.recalculate_course_enrolment(user, course).unwrap());
        let store = manager.state_store(user, course).unwrap();
        let logs = store.provider_state(ManualEnrolmentProvider::ID).unwrap().get_logs();
        assert_eq!(logs.len(), 1);
    }
}
