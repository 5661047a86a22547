//! Invite issuance on behalf of a resolved inviter

use crate::core_knock::{KnockStatus, KnockTable};
use crate::core_room::{MembershipChange, RoomId, RoomStore, Timestamp, UserId};
use crate::error::{RejoinError, RejoinResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// An open invite awaiting acceptance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteRecord {
    pub room: RoomId,
    pub inviter: UserId,
    pub invitee: UserId,
    pub at: Timestamp,
}

/// Open invites, at most one per (room, invitee). Created here, closed by
/// the auto-accept machine when it reaches a terminal state.
pub struct OpenInvites {
    invites: RwLock<HashMap<(RoomId, UserId), InviteRecord>>,
}

impl OpenInvites {
    pub fn new() -> Self {
        OpenInvites {
            invites: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, room: &RoomId, invitee: &UserId) -> Option<InviteRecord> {
        let invites = self.invites.read().await;
        invites.get(&(room.clone(), invitee.clone())).cloned()
    }

    pub async fn insert(&self, record: InviteRecord) {
        let mut invites = self.invites.write().await;
        invites.insert((record.room.clone(), record.invitee.clone()), record);
    }

    /// Consume the invite once the accept machine terminates
    pub async fn close(&self, room: &RoomId, invitee: &UserId) -> Option<InviteRecord> {
        let mut invites = self.invites.write().await;
        invites.remove(&(room.clone(), invitee.clone()))
    }
}

impl Default for OpenInvites {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of an issuance attempt
#[derive(Debug, Clone)]
pub enum IssueOutcome {
    /// A fresh invite was written to the store
    Issued(InviteRecord),
    /// An open invite for this (room, invitee) already existed; it is
    /// returned instead of duplicating the write
    Existing(InviteRecord),
}

impl IssueOutcome {
    pub fn record(&self) -> &InviteRecord {
        match self {
            IssueOutcome::Issued(r) | IssueOutcome::Existing(r) => r,
        }
    }
}

/// Emits the invite membership change on behalf of the resolved inviter
pub struct InviteIssuer {
    store: Arc<dyn RoomStore>,
    invites: Arc<OpenInvites>,
    knocks: Arc<KnockTable>,
}

impl InviteIssuer {
    pub fn new(
        store: Arc<dyn RoomStore>,
        invites: Arc<OpenInvites>,
        knocks: Arc<KnockTable>,
    ) -> Self {
        InviteIssuer {
            store,
            invites,
            knocks,
        }
    }

    /// Issue an invite. The inviter's authority is re-validated against the
    /// current room state, not whatever it was when resolution ran.
    pub async fn issue(
        &self,
        room_id: &RoomId,
        inviter: &UserId,
        invitee: &UserId,
    ) -> RejoinResult<IssueOutcome> {
        let room = self.store.room(room_id).await?;

        if room.is_joined(invitee) {
            return Err(RejoinError::AlreadyMember {
                user: invitee.clone(),
                room: room_id.clone(),
            });
        }

        // Tier check against the authority map only: an escalated fallback
        // inviter holds the tier without being joined yet.
        if room.tier_of(inviter) < room.invite_tier {
            return Err(RejoinError::InsufficientPower {
                user: inviter.clone(),
                room: room_id.clone(),
            });
        }

        if let Some(existing) = self.invites.get(room_id, invitee).await {
            tracing::debug!(room = %room_id, invitee = %invitee, "open invite already exists");
            return Ok(IssueOutcome::Existing(existing));
        }

        self.store
            .apply(MembershipChange::Invite {
                room: room_id.clone(),
                inviter: inviter.clone(),
                invitee: invitee.clone(),
            })
            .await?;

        let record = InviteRecord {
            room: room_id.clone(),
            inviter: inviter.clone(),
            invitee: invitee.clone(),
            at: Timestamp::now(),
        };
        self.invites.insert(record.clone()).await;

        // A knock that led here moves forward; issuance without a knock
        // (externally-originated invites) leaves the table untouched.
        if let Err(e) = self
            .knocks
            .advance(invitee, room_id, KnockStatus::Invited)
            .await
        {
            tracing::warn!(error = %e, "knock record out of step with invite");
        }

        tracing::info!(room = %room_id, inviter = %inviter, invitee = %invitee, "invite issued");
        Ok(IssueOutcome::Issued(record))
    }
}
