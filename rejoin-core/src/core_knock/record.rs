//! Knock records and their forward-only status machine

use crate::core_room::{RoomId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Status of a knock attempt.
///
/// Transitions only move forward: `Pending → Invited → Joined` is the
/// success path; `Rejected` and `Expired` are terminal failures reachable
/// from the non-terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnockStatus {
    Pending,
    Invited,
    Joined,
    Expired,
    Rejected,
}

impl KnockStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            KnockStatus::Joined | KnockStatus::Expired | KnockStatus::Rejected
        )
    }

    /// Whether `self → next` is a legal forward transition
    pub fn can_advance_to(&self, next: KnockStatus) -> bool {
        use KnockStatus::*;
        match (self, next) {
            (Pending, Invited) => true,
            (Invited, Joined) => true,
            (Pending | Invited, Rejected) => true,
            (Pending | Invited, Expired) => true,
            _ => false,
        }
    }
}

/// A pending knock attempt by one user on one room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnockRecord {
    pub user: UserId,
    pub room: RoomId,
    pub at: Timestamp,
    /// Access code used, if the knock was code-based
    pub code: Option<String>,
    pub status: KnockStatus,
}

#[derive(Debug, thiserror::Error)]
#[error("Illegal knock transition {from:?} -> {to:?} for {user} in {room}")]
pub struct IllegalTransition {
    pub user: UserId,
    pub room: RoomId,
    pub from: KnockStatus,
    pub to: KnockStatus,
}

/// In-process table of knock records, keyed per (user, room).
///
/// Status updates validate the forward-only invariant; an illegal backward
/// move is rejected rather than silently applied.
pub struct KnockTable {
    records: RwLock<HashMap<(UserId, RoomId), KnockRecord>>,
}

impl KnockTable {
    pub fn new() -> Self {
        KnockTable {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a fresh `Pending` record, replacing any terminal leftover for
    /// the same pair
    pub async fn insert_pending(
        &self,
        user: &UserId,
        room: &RoomId,
        code: Option<String>,
    ) -> KnockRecord {
        let record = KnockRecord {
            user: user.clone(),
            room: room.clone(),
            at: Timestamp::now(),
            code,
            status: KnockStatus::Pending,
        };
        let mut records = self.records.write().await;
        records.insert((user.clone(), room.clone()), record.clone());
        record
    }

    /// Advance the record for a pair to `next`, enforcing forward-only moves.
    /// Missing records are a no-op: passive accepts can complete joins that
    /// never knocked through this process.
    pub async fn advance(
        &self,
        user: &UserId,
        room: &RoomId,
        next: KnockStatus,
    ) -> Result<(), IllegalTransition> {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&(user.clone(), room.clone())) {
            if !record.status.can_advance_to(next) {
                return Err(IllegalTransition {
                    user: user.clone(),
                    room: room.clone(),
                    from: record.status,
                    to: next,
                });
            }
            record.status = next;
        }
        Ok(())
    }

    pub async fn get(&self, user: &UserId, room: &RoomId) -> Option<KnockRecord> {
        let records = self.records.read().await;
        records.get(&(user.clone(), room.clone())).cloned()
    }
}

impl Default for KnockTable {
    fn default() -> Self {
        Self::new()
    }
}
