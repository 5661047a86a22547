//! Knock admission: code validation or membership-history eligibility

use super::record::{KnockRecord, KnockTable};
use crate::core_access::CodeRegistry;
use crate::core_room::{MembershipState, RoomId, RoomStore, UserId};
use crate::error::{RejoinError, RejoinResult};
use crate::ratelimit::{Endpoint, RateLimiter};
use std::sync::Arc;

/// Admits knock attempts.
///
/// A knock passes either with a valid access code or, without one, on proof
/// of a prior relationship with the room (a `Leave` or `Knock` entry in the
/// membership history). The history requirement is what keeps strangers from
/// reaching the escalation path.
pub struct KnockValidator {
    store: Arc<dyn RoomStore>,
    registry: Arc<CodeRegistry>,
    limiter: Arc<RateLimiter>,
    pub(crate) knocks: Arc<KnockTable>,
}

impl KnockValidator {
    pub fn new(
        store: Arc<dyn RoomStore>,
        registry: Arc<CodeRegistry>,
        limiter: Arc<RateLimiter>,
        knocks: Arc<KnockTable>,
    ) -> Self {
        KnockValidator {
            store,
            registry,
            limiter,
            knocks,
        }
    }

    /// Validate a knock and create a `Pending` record.
    ///
    /// The rate-limit gate runs before any other check. Validation failures
    /// abort with no side effect: no record is created and nothing is
    /// consumed from the registry.
    pub async fn knock(
        &self,
        room_id: &RoomId,
        user: &UserId,
        code: Option<&str>,
        endpoint: Endpoint,
    ) -> RejoinResult<KnockRecord> {
        self.limiter.check(user, endpoint).await?;

        match code {
            Some(code) => {
                let owning_room = self.registry.validate(code).await?;
                if &owning_room != room_id {
                    return Err(RejoinError::InvalidCode);
                }
            }
            None => {
                if !self.has_prior_relationship(room_id, user).await? {
                    return Err(RejoinError::NotEligible {
                        user: user.clone(),
                        room: room_id.clone(),
                    });
                }
            }
        }

        let room = self.store.room(room_id).await?;
        if room.is_joined(user) {
            return Err(RejoinError::AlreadyMember {
                user: user.clone(),
                room: room_id.clone(),
            });
        }

        let record = self
            .knocks
            .insert_pending(user, room_id, code.map(str::to_owned))
            .await;
        tracing::info!(user = %user, room = %room_id, with_code = code.is_some(), "knock admitted");
        Ok(record)
    }

    /// Knock using only an access code; the owning room comes from the code.
    /// Used by the `knock_with_code` endpoint, where the caller does not
    /// name a room.
    pub async fn knock_with_code(&self, user: &UserId, code: &str) -> RejoinResult<KnockRecord> {
        self.limiter.check(user, Endpoint::Knock).await?;

        let room_id = self.registry.validate(code).await?;
        let room = self.store.room(&room_id).await?;
        if room.is_joined(user) {
            return Err(RejoinError::AlreadyMember {
                user: user.clone(),
                room: room_id,
            });
        }

        let record = self
            .knocks
            .insert_pending(user, &room_id, Some(code.to_owned()))
            .await;
        tracing::info!(user = %user, room = %room_id, "knock with code admitted");
        Ok(record)
    }

    /// Whether the membership history shows a prior `Leave` or `Knock` entry
    async fn has_prior_relationship(&self, room_id: &RoomId, user: &UserId) -> RejoinResult<bool> {
        let history = self.store.membership_history(room_id, user).await?;
        Ok(history.iter().any(|entry| {
            matches!(
                entry.state,
                MembershipState::Leave | MembershipState::Knock
            )
        }))
    }
}
