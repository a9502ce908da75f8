//! Provider state persistence for one user/course pair.
//!
//! All providers' records for a pair live in a single user-meta entry,
//! `{"<provider id>": {"d": ..., "l": ...}, ...}`. The store is the only
//! write path for that entry during a batch run.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use enrolsync_core::{CourseId, UserId};

use crate::error::{StoreError, StoreResult};
use crate::meta::UserMetaStore;
use crate::provider_state::ProviderState;

/// User-meta key prefix; the course id is appended.
pub const PROVIDER_STATE_META_PREFIX: &str = "enrolment_provider_state_";

#[derive(Debug, Clone)]
pub struct ProviderStateStore {
    user_id: UserId,
    course_id: CourseId,
    states: BTreeMap<String, ProviderState>,
    has_changed: bool,
}

impl ProviderStateStore {
    /// Empty store for a pair, without touching storage.
    pub fn new(user_id: UserId, course_id: CourseId) -> Self {
        Self {
            user_id,
            course_id,
            states: BTreeMap::new(),
            has_changed: false,
        }
    }

    pub fn meta_key(course_id: CourseId) -> String {
        format!("{PROVIDER_STATE_META_PREFIX}{course_id}")
    }

    /// Load the stored records for a pair.
    ///
    /// A missing entry yields an empty store. Entries that fail to decode are
    /// logged and dropped rather than failing the load.
    pub fn load(
        meta: &dyn UserMetaStore,
        user_id: UserId,
        course_id: CourseId,
    ) -> StoreResult<Self> {
        let mut store = Self::new(user_id, course_id);

        let Some(raw) = meta.get_meta(user_id, &Self::meta_key(course_id))? else {
            return Ok(store);
        };

        let providers = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(providers)) => providers,
            _ => {
                warn!(%user_id, %course_id, "discarding undecodable provider state entry");
                return Ok(store);
            }
        };

        for (provider_id, raw_state) in providers {
            match ProviderState::from_serialized(&raw_state) {
                Ok(state) => {
                    store.states.insert(provider_id, state);
                }
                Err(e) => {
                    warn!(
                        %user_id,
                        %course_id,
                        provider = %provider_id,
                        error = %e,
                        "dropping provider state"
                    );
                }
            }
        }

        Ok(store)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    pub fn has_changed(&self) -> bool {
        self.has_changed
    }

    /// Record for a provider, if one is stored.
    pub fn provider_state(&self, provider_id: &str) -> Option<&ProviderState> {
        self.states.get(provider_id)
    }

    /// Mutable record for a provider, created empty on first access.
    ///
    /// Marks the store as changed so the next `save` persists it.
    pub fn provider_state_mut(&mut self, provider_id: &str) -> &mut ProviderState {
        self.has_changed = true;
        self.states
            .entry(provider_id.to_string())
            .or_insert_with(ProviderState::create)
    }

    pub fn remove_provider_state(&mut self, provider_id: &str) -> Option<ProviderState> {
        let removed = self.states.remove(provider_id);
        if removed.is_some() {
            self.has_changed = true;
        }
        removed
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    /// Serialized form of every record, keyed by provider id.
    pub fn to_json_string(&self) -> StoreResult<String> {
        let mut providers = Map::new();
        for (provider_id, state) in &self.states {
            let value = state
                .to_value()
                .map_err(|e| StoreError::storage(e.to_string()))?;
            providers.insert(provider_id.clone(), value);
        }
        serde_json::to_string(&providers).map_err(|e| StoreError::storage(e.to_string()))
    }

    /// Persist pending changes. Returns whether anything was written.
    pub fn save(&mut self, meta: &dyn UserMetaStore) -> StoreResult<bool> {
        if !self.has_changed {
            return Ok(false);
        }

        let key = Self::meta_key(self.course_id);
        if self.states.is_empty() {
            meta.delete_meta(self.user_id, &key)?;
        } else {
            meta.set_meta(self.user_id, &key, &self.to_json_string()?)?;
        }

        debug!(
            user_id = %self.user_id,
            course_id = %self.course_id,
            providers = self.states.len(),
            "saved provider state"
        );
        self.has_changed = false;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::InMemoryUserMetaStore;
    use serde_json::json;

    fn pair() -> (UserId, CourseId) {
        (UserId::new(1), CourseId::new(10))
    }

    #[test]
    fn load_missing_entry_is_empty() {
        let meta = InMemoryUserMetaStore::new();
        let (user, course) = pair();

        let store = ProviderStateStore::load(&meta, user, course).unwrap();
        assert!(store.provider_state("manual").is_none());
        assert!(!store.has_changed());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let meta = InMemoryUserMetaStore::new();
        let (user, course) = pair();

        let mut store = ProviderStateStore::load(&meta, user, course).unwrap();
        let state = store.provider_state_mut("manual");
        state.set_stored_value("enrolled", true);
        state.add_log_message("granted by admin");
        assert!(store.save(&meta).unwrap());
        assert!(!store.has_changed());

        let reloaded = ProviderStateStore::load(&meta, user, course).unwrap();
        let state = reloaded.provider_state("manual").unwrap();
        assert_eq!(state.get_stored_value("enrolled"), Some(&json!(true)));
        assert_eq!(state.get_logs()[0].message(), "granted by admin");
        assert_eq!(
            reloaded.to_json_string().unwrap(),
            store.to_json_string().unwrap()
        );
    }

    #[test]
    fn save_without_changes_writes_nothing() {
        let meta = InMemoryUserMetaStore::new();
        let (user, course) = pair();

        let mut store = ProviderStateStore::new(user, course);
        assert!(!store.save(&meta).unwrap());
        assert_eq!(meta.get_meta(user, &ProviderStateStore::meta_key(course)).unwrap(), None);
    }

    #[test]
    fn removing_last_provider_deletes_entry() {
        let meta = InMemoryUserMetaStore::new();
        let (user, course) = pair();
        let key = ProviderStateStore::meta_key(course);

        let mut store = ProviderStateStore::new(user, course);
        store.provider_state_mut("manual").set_stored_value("x", 1);
        store.save(&meta).unwrap();
        assert!(meta.get_meta(user, &key).unwrap().is_some());

        store.remove_provider_state("manual");
        assert!(store.save(&meta).unwrap());
        assert_eq!(meta.get_meta(user, &key).unwrap(), None);
    }

    #[test]
    fn undecodable_entries_are_dropped() {
        let meta = InMemoryUserMetaStore::new();
        let (user, course) = pair();
        let key = ProviderStateStore::meta_key(course);

        meta.set_meta(user, &key, r#"{"good":{"d":{"a":1}},"bad":[]}"#).unwrap();
        let store = ProviderStateStore::load(&meta, user, course).unwrap();
        assert!(store.provider_state("good").is_some());
        assert!(store.provider_state("bad").is_none());

        meta.set_meta(user, &key, "garbage").unwrap();
        let store = ProviderStateStore::load(&meta, user, course).unwrap();
        assert_eq!(store.provider_ids().count(), 0);
    }
}
