use thiserror::Error;

use enrolsync_core::UserId;
use enrolsync_state::StoreError;

pub type EnrolmentResult<T> = Result<T, EnrolmentError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnrolmentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("recalculation failed for user {user_id}: {reason}")]
    Recalculation { user_id: UserId, reason: String },
}
