//! Room data structures and authority queries

use super::types::{PowerTier, RoomId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Membership state of a user in a room, as recorded by the event store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipState {
    Join,
    Leave,
    Invite,
    Knock,
    Ban,
}

/// Join policy controlling how users may enter a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinPolicy {
    /// Anyone can join
    Open,
    /// Joins require a knock approved by a member with invite authority
    Knock,
    /// Knock, but members of an allowed parent room may join directly
    KnockRestricted { allowed_parents: BTreeSet<RoomId> },
    /// Entry only via explicit invite
    InviteOnly,
}

impl JoinPolicy {
    /// Whether joins into this room require a member to authorize them
    pub fn requires_authorization(&self) -> bool {
        !matches!(self, JoinPolicy::Open)
    }

    /// Whether this is one of the restricted policies where an authority gap
    /// blocks every join
    pub fn is_restricted(&self) -> bool {
        matches!(
            self,
            JoinPolicy::Knock | JoinPolicy::KnockRestricted { .. } | JoinPolicy::InviteOnly
        )
    }
}

/// A room as read from the event store: current memberships plus the
/// authority map used to decide who may invite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    /// Unique identifier
    pub id: RoomId,

    /// Join policy
    pub policy: JoinPolicy,

    /// Current membership state per user
    pub members: HashMap<UserId, MembershipState>,

    /// Explicit power tiers; users absent from this map hold `default_tier`
    pub authority: HashMap<UserId, PowerTier>,

    /// Tier held by members with no explicit authority entry
    pub default_tier: PowerTier,

    /// Tier required to send an invite
    pub invite_tier: PowerTier,

    /// When the room was created
    pub created_at: Timestamp,
}

impl Room {
    /// Create a new room with a single creator holding invite authority
    pub fn new(id: RoomId, creator: UserId, policy: JoinPolicy) -> Self {
        let mut members = HashMap::new();
        members.insert(creator.clone(), MembershipState::Join);

        let mut authority = HashMap::new();
        authority.insert(creator, PowerTier::new(100));

        Room {
            id,
            policy,
            members,
            authority,
            default_tier: PowerTier::USER_DEFAULT,
            invite_tier: PowerTier::INVITE_DEFAULT,
            created_at: Timestamp::now(),
        }
    }

    /// Current membership state of a user, if any
    pub fn membership(&self, user: &UserId) -> Option<MembershipState> {
        self.members.get(user).copied()
    }

    /// Whether the user is currently joined
    pub fn is_joined(&self, user: &UserId) -> bool {
        self.membership(user) == Some(MembershipState::Join)
    }

    /// Whether the user is currently banned
    pub fn is_banned(&self, user: &UserId) -> bool {
        self.membership(user) == Some(MembershipState::Ban)
    }

    /// Power tier held by a user (explicit entry or the room default)
    pub fn tier_of(&self, user: &UserId) -> PowerTier {
        self.authority.get(user).copied().unwrap_or(self.default_tier)
    }

    /// Whether a user currently holds invite-capable authority.
    /// Only joined members can exercise it.
    pub fn can_invite(&self, user: &UserId) -> bool {
        self.is_joined(user) && self.tier_of(user) >= self.invite_tier
    }

    /// All currently joined members
    pub fn joined_members(&self) -> impl Iterator<Item = &UserId> {
        self.members
            .iter()
            .filter(|(_, state)| **state == MembershipState::Join)
            .map(|(user, _)| user)
    }
}
