use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use enrolsync_core::UserId;

use crate::error::{StoreError, StoreResult};

/// Per-user string metadata (the host's user-meta table).
pub trait UserMetaStore: Send + Sync {
    fn get_meta(&self, user_id: UserId, key: &str) -> StoreResult<Option<String>>;
    fn set_meta(&self, user_id: UserId, key: &str, value: &str) -> StoreResult<()>;
    fn delete_meta(&self, user_id: UserId, key: &str) -> StoreResult<()>;
    /// Every user holding `key`, ascending by id, with the stored value.
    fn users_with_meta(&self, key: &str) -> StoreResult<Vec<(UserId, String)>>;
}

impl<S> UserMetaStore for Arc<S>
where
    S: UserMetaStore + ?Sized,
{
    fn get_meta(&self, user_id: UserId, key: &str) -> StoreResult<Option<String>> {
        (**self).get_meta(user_id, key)
    }

    fn set_meta(&self, user_id: UserId, key: &str, value: &str) -> StoreResult<()> {
        (**self).set_meta(user_id, key, value)
    }

    fn delete_meta(&self, user_id: UserId, key: &str) -> StoreResult<()> {
        (**self).delete_meta(user_id, key)
    }

    fn users_with_meta(&self, key: &str) -> StoreResult<Vec<(UserId, String)>> {
        (**self).users_with_meta(key)
    }
}

/// In-memory user registry with metadata, for tests/dev.
///
/// Users are kept in id order, matching the default ordering of the host's
/// user queries.
#[derive(Debug, Default)]
pub struct InMemoryUserMetaStore {
    users: RwLock<BTreeMap<UserId, HashMap<String, String>>>,
}

impl InMemoryUserMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a user with no metadata. Existing users are left untouched.
    pub fn add_user(&self, user_id: UserId) -> StoreResult<()> {
        let mut users = self.users.write().map_err(|_| StoreError::Poisoned("user meta"))?;
        users.entry(user_id).or_default();
        Ok(())
    }

    /// All registered user ids, ascending.
    pub fn user_ids(&self) -> StoreResult<Vec<UserId>> {
        let users = self.users.read().map_err(|_| StoreError::Poisoned("user meta"))?;
        Ok(users.keys().copied().collect())
    }

    /// Visit users in id order, collecting up to `limit` ids accepted by `filter`.
    ///
    /// `filter` sees the user's full metadata map.
    pub fn select_users<F>(&self, limit: usize, mut filter: F) -> StoreResult<Vec<UserId>>
    where
        F: FnMut(UserId, &HashMap<String, String>) -> bool,
    {
        let users = self.users.read().map_err(|_| StoreError::Poisoned("user meta"))?;
        Ok(users
            .iter()
            .filter(|(id, meta)| filter(**id, meta))
            .map(|(id, _)| *id)
            .take(limit)
            .collect())
    }
}

impl UserMetaStore for InMemoryUserMetaStore {
    fn get_meta(&self, user_id: UserId, key: &str) -> StoreResult<Option<String>> {
        let users = self.users.read().map_err(|_| StoreError::Poisoned("user meta"))?;
        Ok(users.get(&user_id).and_then(|meta| meta.get(key).cloned()))
    }

    fn set_meta(&self, user_id: UserId, key: &str, value: &str) -> StoreResult<()> {
        let mut users = self.users.write().map_err(|_| StoreError::Poisoned("user meta"))?;
        users
            .entry(user_id)
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_meta(&self, user_id: UserId, key: &str) -> StoreResult<()> {
        let mut users = self.users.write().map_err(|_| StoreError::Poisoned("user meta"))?;
        if let Some(meta) = users.get_mut(&user_id) {
            meta.remove(key);
        }
        Ok(())
    }

    fn users_with_meta(&self, key: &str) -> StoreResult<Vec<(UserId, String)>> {
        let users = self.users.read().map_err(|_| StoreError::Poisoned("user meta"))?;
        Ok(users
            .iter()
            .filter_map(|(id, meta)| meta.get(key).map(|v| (*id, v.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let store = InMemoryUserMetaStore::new();
        let user = UserId::new(3);

        assert_eq!(store.get_meta(user, "k").unwrap(), None);
        store.set_meta(user, "k", "v").unwrap();
        assert_eq!(store.get_meta(user, "k").unwrap().as_deref(), Some("v"));

        store.delete_meta(user, "k").unwrap();
        assert_eq!(store.get_meta(user, "k").unwrap(), None);
        // The user stays registered after losing its meta.
        assert_eq!(store.user_ids().unwrap(), vec![user]);
    }

    #[test]
    fn users_are_listed_in_id_order() {
        let store = InMemoryUserMetaStore::new();
        for id in [9, 2, 5] {
            store.add_user(UserId::new(id)).unwrap();
        }
        store.set_meta(UserId::new(5), "flag", "x").unwrap();
        store.set_meta(UserId::new(2), "flag", "y").unwrap();

        assert_eq!(
            store.user_ids().unwrap(),
            vec![UserId::new(2), UserId::new(5), UserId::new(9)]
        );
        assert_eq!(
            store.users_with_meta("flag").unwrap(),
            vec![(UserId::new(2), "y".to_string()), (UserId::new(5), "x".to_string())]
        );
    }

    #[test]
    fn select_users_respects_limit_and_filter() {
        let store = InMemoryUserMetaStore::new();
        for id in 1..=10 {
            store.add_user(UserId::new(id)).unwrap();
        }

        let even = store.select_users(3, |id, _| id.get() % 2 == 0).unwrap();
        assert_eq!(even, vec![UserId::new(2), UserId::new(4), UserId::new(6)]);
    }
}
