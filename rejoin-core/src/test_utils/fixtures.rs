//! Test fixtures for creating common test objects
//!
//! Provides builder patterns and factory functions for creating test data.

use crate::core_room::{JoinPolicy, MembershipState, MemoryRoomStore, PowerTier, Room, RoomId, UserId};
use std::sync::Arc;

/// Builder for rooms with pre-seeded members and authority
pub struct TestRoomBuilder {
    id: RoomId,
    creator: UserId,
    policy: JoinPolicy,
    members: Vec<(UserId, MembershipState)>,
    tiers: Vec<(UserId, PowerTier)>,
}

impl TestRoomBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: RoomId::new(id),
            creator: UserId::new("admin"),
            policy: JoinPolicy::Knock,
            members: Vec::new(),
            tiers: Vec::new(),
        }
    }

    pub fn creator(mut self, user: impl Into<String>) -> Self {
        self.creator = UserId::new(user);
        self
    }

    pub fn policy(mut self, policy: JoinPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn joined(mut self, user: impl Into<String>) -> Self {
        self.members
            .push((UserId::new(user), MembershipState::Join));
        self
    }

    pub fn departed(mut self, user: impl Into<String>) -> Self {
        let user = UserId::new(user);
        self.members.push((user.clone(), MembershipState::Join));
        self.members.push((user, MembershipState::Leave));
        self
    }

    pub fn banned(mut self, user: impl Into<String>) -> Self {
        self.members.push((UserId::new(user), MembershipState::Ban));
        self
    }

    pub fn tier(mut self, user: impl Into<String>, tier: i64) -> Self {
        self.tiers.push((UserId::new(user), PowerTier::new(tier)));
        self
    }

    pub fn build(self) -> Room {
        let mut room = Room::new(self.id, self.creator, self.policy);
        for (user, state) in &self.members {
            room.members.insert(user.clone(), *state);
        }
        for (user, tier) in &self.tiers {
            room.authority.insert(user.clone(), *tier);
        }
        room
    }

    /// Build the room and seed it into a fresh in-memory store, replaying
    /// the member list through the store so history entries exist.
    pub async fn build_in_store(self) -> (Arc<MemoryRoomStore>, RoomId) {
        let store = Arc::new(MemoryRoomStore::new());
        let room_id = self.id.clone();
        let members = self.members.clone();

        let mut room = Room::new(self.id, self.creator, self.policy);
        for (user, tier) in &self.tiers {
            room.authority.insert(user.clone(), *tier);
        }
        store.insert_room(room).await;

        for (user, state) in members {
            store.set_membership(&room_id, &user, state).await;
        }
        (store, room_id)
    }
}
