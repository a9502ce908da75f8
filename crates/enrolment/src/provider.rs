//! Enrolment providers.

use serde_json::Value;

use enrolsync_core::{CourseId, UserId};
use enrolsync_state::{ProviderState, ProviderStateStore};

/// A source of enrolment decisions.
///
/// Bumping `version` changes the site's calculation version, which makes
/// every cached result stale and triggers a learner sweep.
pub trait EnrolmentProvider: Send + Sync {
    /// Stable identifier; also the key of this provider's state record.
    fn id(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Whether this provider has a say in enrolment for `course_id`.
    fn handles_enrolment(&self, course_id: CourseId) -> bool;

    /// Decide enrolment. May read and update the provider's state record.
    fn is_enrolled(&self, user_id: UserId, course_id: CourseId, state: &mut ProviderState) -> bool;
}

/// Enrolment granted or withdrawn by hand (e.g. by a site admin).
///
/// The decision lives in the provider's own state record under
/// `enrolment_status`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualEnrolmentProvider;

impl ManualEnrolmentProvider {
    pub const ID: &'static str = "manual";

    const STATUS_KEY: &'static str = "enrolment_status";

    pub fn grant(store: &mut ProviderStateStore) {
        let state = store.provider_state_mut(Self::ID);
        state.set_stored_value(Self::STATUS_KEY, true);
        state.add_log_message("Enrolment manually provided");
    }

    pub fn withdraw(store: &mut ProviderStateStore) {
        let state = store.provider_state_mut(Self::ID);
        state.set_stored_value(Self::STATUS_KEY, false);
        state.add_log_message("Enrolment manually withdrawn");
    }
}

impl EnrolmentProvider for ManualEnrolmentProvider {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn version(&self) -> u32 {
        1
    }

    fn handles_enrolment(&self, _course_id: CourseId) -> bool {
        true
    }

    fn is_enrolled(
        &self,
        _user_id: UserId,
        _course_id: CourseId,
        state: &mut ProviderState,
    ) -> bool {
        matches!(state.get_stored_value(Self::STATUS_KEY), Some(Value::Bool(true)))
    }
}
