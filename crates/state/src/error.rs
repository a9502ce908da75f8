//! Error types for provider state and the storage collaborators behind it.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure to decode or encode a provider state record.
///
/// Decoding failures are the normal "not a record" outcome of
/// `ProviderState::from_serialized`; callers check and fall back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Input was empty (empty string, empty array/object, or null).
    #[error("serialized provider state is empty")]
    Empty,

    /// Input could not be read as a `{"d": ..., "l": ...}` mapping.
    #[error("malformed provider state: {0}")]
    Malformed(String),

    #[error("failed to encode provider state: {0}")]
    Encode(String),
}

impl StateError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

/// Storage collaborator error (meta, options, task queue).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}
