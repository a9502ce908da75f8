//! Per-entity provider state: bounded logs and key/value data kept for each
//! enrolment provider, plus the storage collaborators they are persisted into.
//!
//! ## Components
//!
//! - `ProviderState`: one provider's record (data map + ring-buffer log)
//! - `ProviderStateStore`: all provider records for one user/course pair
//! - `UserMetaStore`: per-user string metadata (in-memory or host backed)
//! - `OptionStore`: site-wide named settings

pub mod error;
pub mod meta;
pub mod options;
pub mod provider_state;
pub mod store;

pub use error::{StateError, StateResult, StoreError, StoreResult};
pub use meta::{InMemoryUserMetaStore, UserMetaStore};
pub use options::{InMemoryOptionStore, OptionStore};
pub use provider_state::{LogEntry, MAX_LOG_ENTRIES, ProviderState};
pub use store::{PROVIDER_STATE_META_PREFIX, ProviderStateStore};
