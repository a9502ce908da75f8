use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{StoreError, StoreResult};

/// Site-wide named scalar settings (the host's options table).
pub trait OptionStore: Send + Sync {
    fn get_option(&self, name: &str) -> StoreResult<Option<String>>;
    fn update_option(&self, name: &str, value: &str) -> StoreResult<()>;
}

impl<S> OptionStore for Arc<S>
where
    S: OptionStore + ?Sized,
{
    fn get_option(&self, name: &str) -> StoreResult<Option<String>> {
        (**self).get_option(name)
    }

    fn update_option(&self, name: &str, value: &str) -> StoreResult<()> {
        (**self).update_option(name, value)
    }
}

/// In-memory option store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOptionStore {
    inner: RwLock<HashMap<String, String>>,
}

impl InMemoryOptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl OptionStore for InMemoryOptionStore {
    fn get_option(&self, name: &str) -> StoreResult<Option<String>> {
        let map = self.inner.read().map_err(|_| StoreError::Poisoned("options"))?;
        Ok(map.get(name).cloned())
    }

    fn update_option(&self, name: &str, value: &str) -> StoreResult<()> {
        let mut map = self.inner.write().map_err(|_| StoreError::Poisoned("options"))?;
        map.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
