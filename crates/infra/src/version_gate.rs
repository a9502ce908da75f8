//! Persisted marker of the last fully applied calculation version.

use std::sync::Arc;

use tracing::{info, warn};

use enrolsync_state::{OptionStore, StoreResult};

/// Option key of the version gate.
pub const CALCULATION_VERSION_OPTION_NAME: &str = "enrolsync-scheduler-calculation-version";

/// Version gate over the site option store.
///
/// Compared on every trigger, advanced only when a full learner sweep
/// completes.
#[derive(Clone)]
pub struct VersionGate {
    options: Arc<dyn OptionStore>,
}

impl VersionGate {
    pub fn new(options: Arc<dyn OptionStore>) -> Self {
        Self { options }
    }

    pub fn applied_version(&self) -> StoreResult<Option<String>> {
        self.options.get_option(CALCULATION_VERSION_OPTION_NAME)
    }

    /// Whether `current` has already been applied to every learner.
    pub fn is_current(&self, current: &str) -> StoreResult<bool> {
        Ok(self.applied_version()?.as_deref() == Some(current))
    }

    /// Record that a sweep against `swept` finished.
    ///
    /// Writes only when `swept` is still the `current` version and differs
    /// from the stored value. A rule change during the sweep leaves the gate
    /// stale so the next trigger starts a new sweep. Returns whether the gate
    /// moved.
    pub fn advance(&self, swept: &str, current: &str) -> StoreResult<bool> {
        if swept != current {
            warn!(swept, current, "calculation version changed during sweep; gate left stale");
            return Ok(false);
        }
        if self.is_current(current)? {
            return Ok(false);
        }

        self.options
            .update_option(CALCULATION_VERSION_OPTION_NAME, current)?;
        info!(version = current, "calculation version gate advanced");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrolsync_state::InMemoryOptionStore;

    #[test]
    fn fresh_gate_is_never_current() {
        let gate = VersionGate::new(InMemoryOptionStore::arc());
        assert_eq!(gate.applied_version().unwrap(), None);
        assert!(!gate.is_current("v1").unwrap());
    }

    #[test]
    fn advance_records_version_once() {
        let gate = VersionGate::new(InMemoryOptionStore::arc());

        assert!(gate.advance("v1", "v1").unwrap());
        assert!(gate.is_current("v1").unwrap());
        assert!(!gate.advance("v1", "v1").unwrap());
    }

    #[test]
    fn advance_refuses_outdated_sweep() {
        let gate = VersionGate::new(InMemoryOptionStore::arc());
        gate.advance("v1", "v1").unwrap();

        assert!(!gate.advance("v1", "v2").unwrap());
        assert_eq!(gate.applied_version().unwrap().as_deref(), Some("v1"));
    }
}
