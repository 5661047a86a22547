//! Access code registry: issuance and validation

use super::code::{generate_code, AccessCode};
use crate::core_room::{RoomId, RoomStore, Timestamp, UserId};
use crate::error::{RejoinError, RejoinResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Attempts to find a collision-free code before giving up
const MAX_GENERATE_ATTEMPTS: usize = 16;

struct RegistryInner {
    /// Active codes, keyed by the code string
    codes: HashMap<String, AccessCode>,
    /// Active code per room; issuing a new one supersedes the entry here
    by_room: HashMap<RoomId, String>,
}

/// Issues and validates room access codes.
///
/// At most one code is active per room at a time; generating a new code
/// invalidates the previous one.
pub struct CodeRegistry {
    store: Arc<dyn RoomStore>,
    ttl: Option<Duration>,
    inner: RwLock<RegistryInner>,
}

impl CodeRegistry {
    pub fn new(store: Arc<dyn RoomStore>, ttl: Option<Duration>) -> Self {
        CodeRegistry {
            store,
            ttl,
            inner: RwLock::new(RegistryInner {
                codes: HashMap::new(),
                by_room: HashMap::new(),
            }),
        }
    }

    /// Issue a fresh code for a room. The requester must currently hold
    /// invite-capable authority there.
    pub async fn generate(&self, room_id: &RoomId, requester: &UserId) -> RejoinResult<AccessCode> {
        let room = self.store.room(room_id).await?;
        if !room.can_invite(requester) {
            return Err(RejoinError::InsufficientPower {
                user: requester.clone(),
                room: room_id.clone(),
            });
        }

        let mut inner = self.inner.write().await;

        let mut code_str = None;
        for _ in 0..MAX_GENERATE_ATTEMPTS {
            let candidate = generate_code();
            if !inner.codes.contains_key(&candidate) {
                code_str = Some(candidate);
                break;
            }
        }
        let code_str = code_str.ok_or_else(|| RejoinError::NonRetryable {
            reason: "could not allocate a unique access code".into(),
        })?;

        let expires_at = self
            .ttl
            .map(|ttl| Timestamp::from_millis(Timestamp::now().as_millis() + ttl.as_millis() as u64));
        let code = AccessCode::new(code_str.clone(), room_id.clone(), expires_at);

        // Supersede any previous code for this room.
        if let Some(old) = inner.by_room.insert(room_id.clone(), code_str.clone()) {
            inner.codes.remove(&old);
            tracing::info!(room = %room_id, "superseded previous access code");
        }
        inner.codes.insert(code_str, code.clone());

        tracing::info!(room = %room_id, requester = %requester, "issued access code");
        Ok(code)
    }

    /// Resolve a code to its owning room. Read-only: failure leaves the
    /// registry untouched, and expired codes are not pruned here.
    pub async fn validate(&self, code: &str) -> RejoinResult<RoomId> {
        let inner = self.inner.read().await;
        match inner.codes.get(code) {
            Some(entry) if !entry.is_expired(Timestamp::now()) => Ok(entry.room.clone()),
            _ => Err(RejoinError::InvalidCode),
        }
    }

    /// Test seeding: install a known code for a room
    #[doc(hidden)]
    pub async fn insert_raw(&self, code: AccessCode) {
        let mut inner = self.inner.write().await;
        if let Some(old) = inner.by_room.insert(code.room.clone(), code.code.clone()) {
            inner.codes.remove(&old);
        }
        inner.codes.insert(code.code.clone(), code);
    }
}
