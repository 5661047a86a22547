//! Error taxonomy for the knock/invite/auto-accept pipeline

use crate::core_room::{RoomId, StoreError, UserId};

/// Pipeline errors surfaced to callers.
///
/// Authorization failures (`InvalidCode`, `NotEligible`, `InsufficientPower`)
/// are never retried automatically; only transient store failures inside the
/// auto-accept machine are, and those surface as `RetryExhausted` once the
/// retry budget is spent.
#[derive(Debug, thiserror::Error)]
pub enum RejoinError {
    #[error("Unknown or expired access code")]
    InvalidCode,

    #[error("User {user} has no membership history for room {room}")]
    NotEligible { user: UserId, room: RoomId },

    #[error("User {user} lacks invite authority in room {room}")]
    InsufficientPower { user: UserId, room: RoomId },

    /// Reported to callers as a successful no-op, not a failure
    #[error("User {user} is already a member of room {room}")]
    AlreadyMember { user: UserId, room: RoomId },

    #[error("Rate limited")]
    RateLimited,

    #[error("Join for {user} in {room} failed after {attempts} attempts")]
    RetryExhausted {
        user: UserId,
        room: RoomId,
        attempts: u32,
    },

    #[error("Join cannot proceed: {reason}")]
    NonRetryable { reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl RejoinError {
    /// Whether this error represents an authorization failure the caller
    /// must resolve before re-invoking the pipeline
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            RejoinError::InvalidCode
                | RejoinError::NotEligible { .. }
                | RejoinError::InsufficientPower { .. }
        )
    }
}

pub type RejoinResult<T> = Result<T, RejoinError>;
