//! Event store seam
//!
//! The room/membership data is owned by an external, replicated event store.
//! This module defines the read/write interface the pipeline depends on and
//! an in-memory implementation used by tests and the demo API binary.

use super::room::{MembershipState, Room};
use super::types::{PowerTier, RoomId, Timestamp, UserId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::RwLock;

/// One entry in a user's append-only membership history for a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub user: UserId,
    pub room: RoomId,
    pub state: MembershipState,
    pub at: Timestamp,
}

/// A membership change submitted to the event store
#[derive(Debug, Clone)]
pub enum MembershipChange {
    /// Invite `invitee` on behalf of `inviter`
    Invite {
        room: RoomId,
        inviter: UserId,
        invitee: UserId,
    },
    /// Commit a join for `user`
    Join { room: RoomId, user: UserId },
    /// Grant `user` an explicit power tier
    GrantPower {
        room: RoomId,
        user: UserId,
        tier: PowerTier,
    },
}

impl MembershipChange {
    pub fn room(&self) -> &RoomId {
        match self {
            MembershipChange::Invite { room, .. } => room,
            MembershipChange::Join { room, .. } => room,
            MembershipChange::GrantPower { room, .. } => room,
        }
    }
}

/// Event store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("Room has been deleted: {0}")]
    RoomDeleted(RoomId),

    /// Transient backend condition; the write may be retried
    #[error("Store temporarily unavailable: {0}")]
    Unavailable(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether a write that failed with this error is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Read/write interface onto the external event store.
///
/// Reads return the current replicated state; `apply` blocks until the store
/// acknowledges the write. No caching happens at this layer, so callers see
/// fresh authority data on every read.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Load the current state of a room
    async fn room(&self, room: &RoomId) -> Result<Room, StoreError>;

    /// Full membership history for a (user, room) pair, oldest first
    async fn membership_history(
        &self,
        room: &RoomId,
        user: &UserId,
    ) -> Result<Vec<HistoryEntry>, StoreError>;

    /// Submit a membership change and wait for acknowledgement
    async fn apply(&self, change: MembershipChange) -> Result<(), StoreError>;
}

struct MemoryInner {
    rooms: HashMap<RoomId, Room>,
    history: HashMap<(RoomId, UserId), Vec<HistoryEntry>>,
    deleted: Vec<RoomId>,
}

/// In-memory `RoomStore` for tests and local runs
pub struct MemoryRoomStore {
    inner: RwLock<MemoryInner>,
    /// Number of upcoming join applies to fail with a transient error
    join_failures: AtomicU32,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        MemoryRoomStore {
            inner: RwLock::new(MemoryInner {
                rooms: HashMap::new(),
                history: HashMap::new(),
                deleted: Vec::new(),
            }),
            join_failures: AtomicU32::new(0),
        }
    }

    /// Seed a room
    pub async fn insert_room(&self, room: Room) {
        let mut inner = self.inner.write().await;
        let room_id = room.id.clone();
        let members: Vec<_> = room
            .members
            .iter()
            .map(|(user, state)| (user.clone(), *state))
            .collect();
        inner.rooms.insert(room_id.clone(), room);
        for (user, state) in members {
            Self::record(&mut inner, &room_id, &user, state);
        }
    }

    /// Record a membership state directly, bypassing `apply` (test seeding)
    pub async fn set_membership(&self, room: &RoomId, user: &UserId, state: MembershipState) {
        let mut inner = self.inner.write().await;
        Self::record(&mut inner, room, user, state);
    }

    /// Mark a room deleted; subsequent reads fail with `RoomDeleted`
    pub async fn delete_room(&self, room: &RoomId) {
        let mut inner = self.inner.write().await;
        inner.rooms.remove(room);
        inner.deleted.push(room.clone());
    }

    /// Make the next `n` join applies fail with a transient error
    pub fn fail_next_joins(&self, n: u32) {
        self.join_failures.store(n, Ordering::SeqCst);
    }

    fn record(inner: &mut MemoryInner, room: &RoomId, user: &UserId, state: MembershipState) {
        if let Some(r) = inner.rooms.get_mut(room) {
            r.members.insert(user.clone(), state);
        }
        inner
            .history
            .entry((room.clone(), user.clone()))
            .or_default()
            .push(HistoryEntry {
                user: user.clone(),
                room: room.clone(),
                state,
                at: Timestamp::now(),
            });
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn room(&self, room: &RoomId) -> Result<Room, StoreError> {
        let inner = self.inner.read().await;
        if inner.deleted.contains(room) {
            return Err(StoreError::RoomDeleted(room.clone()));
        }
        inner
            .rooms
            .get(room)
            .cloned()
            .ok_or_else(|| StoreError::RoomNotFound(room.clone()))
    }

    async fn membership_history(
        &self,
        room: &RoomId,
        user: &UserId,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let inner = self.inner.read().await;
        if inner.deleted.contains(room) {
            return Err(StoreError::RoomDeleted(room.clone()));
        }
        if !inner.rooms.contains_key(room) {
            return Err(StoreError::RoomNotFound(room.clone()));
        }
        Ok(inner
            .history
            .get(&(room.clone(), user.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn apply(&self, change: MembershipChange) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let room_id = change.room().clone();
        if inner.deleted.contains(&room_id) {
            return Err(StoreError::RoomDeleted(room_id));
        }
        if !inner.rooms.contains_key(&room_id) {
            return Err(StoreError::RoomNotFound(room_id));
        }

        match change {
            MembershipChange::Invite { room, invitee, .. } => {
                Self::record(&mut inner, &room, &invitee, MembershipState::Invite);
            }
            MembershipChange::Join { room, user } => {
                let remaining = self.join_failures.load(Ordering::SeqCst);
                if remaining > 0 {
                    self.join_failures.store(remaining - 1, Ordering::SeqCst);
                    return Err(StoreError::Unavailable("simulated replication lag".into()));
                }
                Self::record(&mut inner, &room, &user, MembershipState::Join);
            }
            MembershipChange::GrantPower { room, user, tier } => {
                if let Some(r) = inner.rooms.get_mut(&room) {
                    r.authority.insert(user, tier);
                }
            }
        }
        Ok(())
    }
}
