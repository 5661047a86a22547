//! Auto-accept state machine
//!
//! Drives an invited user to `Joined` with bounded, backed-off retries:
//! `Invited → Accepting → {Joined | Failed}`, with `Accepting` self-loops
//! while transient store failures persist. At most one machine instance runs
//! per (user, room); concurrent triggers coalesce into the running one.

use crate::core_invite::OpenInvites;
use crate::core_knock::{KnockStatus, KnockTable};
use crate::core_room::{MembershipChange, MembershipState, RoomId, RoomStore, UserId};
use crate::error::{RejoinError, RejoinResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// States of one accept sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptState {
    Invited,
    Accepting { attempt: u32 },
    Joined,
    Failed { reason: String },
}

impl AcceptState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AcceptState::Joined | AcceptState::Failed { .. })
    }
}

/// Bounded exponential backoff policy.
///
/// The first attempt runs immediately; attempt `n` (n ≥ 2) waits
/// `base_delay * 2^(n-2)` first. With the defaults that is
/// 0, 250ms, 500ms, 1s, 2s across the five permitted attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(250),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before the given 1-based attempt number
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.base_delay * 2u32.saturating_pow(attempt - 2)
        }
    }

    /// The full delay sequence, for inspection
    pub fn delays(&self) -> Vec<Duration> {
        (1..=self.max_attempts)
            .map(|n| self.delay_before(n))
            .collect()
    }
}

/// Outcome of one attempt inside a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    Transient,
    Fatal,
}

/// Audit entry for one join attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// Identifies the accept sequence this attempt belongs to
    pub sequence: Uuid,
    /// 1-based attempt number, never above the policy maximum
    pub attempt: u32,
    #[serde(with = "humantime_serde")]
    pub delay: Duration,
    pub outcome: AttemptOutcome,
}

/// Result of triggering the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// The join commit was observed to succeed
    Joined,
    /// The user was already joined when the machine looked
    AlreadyJoined,
    /// Another instance was already `Accepting` for this (user, room);
    /// this trigger folded into it
    Coalesced,
}

struct ActiveGuard {
    active: Arc<StdMutex<HashSet<(UserId, RoomId)>>>,
    key: (UserId, RoomId),
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().expect("active set poisoned");
        active.remove(&self.key);
    }
}

/// The auto-accept machine. Holds only accept capability: it can read rooms
/// and commit joins, never grant power.
pub struct AutoAccept {
    store: Arc<dyn RoomStore>,
    invites: Arc<OpenInvites>,
    knocks: Arc<KnockTable>,
    policy: RetryPolicy,
    active: Arc<StdMutex<HashSet<(UserId, RoomId)>>>,
    attempts: RwLock<Vec<RetryAttempt>>,
    states: RwLock<HashMap<(UserId, RoomId), AcceptState>>,
}

impl AutoAccept {
    pub fn new(
        store: Arc<dyn RoomStore>,
        invites: Arc<OpenInvites>,
        knocks: Arc<KnockTable>,
        policy: RetryPolicy,
    ) -> Self {
        AutoAccept {
            store,
            invites,
            knocks,
            policy,
            active: Arc::new(StdMutex::new(HashSet::new())),
            attempts: RwLock::new(Vec::new()),
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Attempt history, for operators and tests
    pub async fn attempts(&self) -> Vec<RetryAttempt> {
        self.attempts.read().await.clone()
    }

    /// Current machine state for a pair; terminal states persist after the
    /// sequence ends
    pub async fn state_of(&self, user: &UserId, room: &RoomId) -> Option<AcceptState> {
        let states = self.states.read().await;
        states.get(&(user.clone(), room.clone())).cloned()
    }

    async fn set_state(&self, user: &UserId, room: &RoomId, state: AcceptState) {
        let mut states = self.states.write().await;
        states.insert((user.clone(), room.clone()), state);
    }

    /// Drive an invited user towards `Joined`.
    ///
    /// Safe to call from both the request path and the passive watcher; the
    /// only writes it performs are join commits.
    pub async fn accept(&self, room_id: &RoomId, user: &UserId) -> RejoinResult<AcceptOutcome> {
        let key = (user.clone(), room_id.clone());
        let guard = {
            let mut active = self.active.lock().expect("active set poisoned");
            if !active.insert(key.clone()) {
                tracing::debug!(user = %user, room = %room_id, "accept already running, coalescing");
                return Ok(AcceptOutcome::Coalesced);
            }
            ActiveGuard {
                active: self.active.clone(),
                key,
            }
        };
        self.set_state(user, room_id, AcceptState::Invited).await;
        let result = self.run_sequence(room_id, user).await;
        drop(guard);
        result
    }

    async fn run_sequence(&self, room_id: &RoomId, user: &UserId) -> RejoinResult<AcceptOutcome> {
        let sequence = Uuid::new_v4();

        for attempt in 1..=self.policy.max_attempts {
            self.set_state(user, room_id, AcceptState::Accepting { attempt })
                .await;
            let delay = self.policy.delay_before(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            // The authority landscape may have moved since the last attempt;
            // always act on a fresh read.
            let room = match self.store.room(room_id).await {
                Ok(room) => room,
                Err(e) if e.is_transient() => {
                    self.record(sequence, attempt, delay, AttemptOutcome::Transient)
                        .await;
                    continue;
                }
                Err(e) => {
                    return self
                        .fail_fatal(sequence, attempt, delay, room_id, user, e.to_string())
                        .await;
                }
            };

            if room.is_joined(user) {
                self.record(sequence, attempt, delay, AttemptOutcome::Success)
                    .await;
                self.set_state(user, room_id, AcceptState::Joined).await;
                self.invites.close(room_id, user).await;
                let _ = self.knocks.advance(user, room_id, KnockStatus::Joined).await;
                return Ok(AcceptOutcome::AlreadyJoined);
            }
            if room.is_banned(user) {
                return self
                    .fail_fatal(sequence, attempt, delay, room_id, user, "user is banned".into())
                    .await;
            }
            if room.membership(user) != Some(MembershipState::Invite) {
                return self
                    .fail_fatal(
                        sequence,
                        attempt,
                        delay,
                        room_id,
                        user,
                        "invite revoked".into(),
                    )
                    .await;
            }

            let join = MembershipChange::Join {
                room: room_id.clone(),
                user: user.clone(),
            };
            match self.store.apply(join).await {
                Ok(()) => {
                    return self.succeed(sequence, attempt, delay, room_id, user).await;
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        user = %user,
                        room = %room_id,
                        attempt,
                        error = %e,
                        "join attempt failed transiently"
                    );
                    metrics::counter!("rejoin_accept_retries_total").increment(1);
                    self.record(sequence, attempt, delay, AttemptOutcome::Transient)
                        .await;
                }
                // RoomDeleted, RoomNotFound, and backend errors all end the
                // sequence; the invite cannot be honored.
                Err(e) => {
                    return self
                        .fail_fatal(sequence, attempt, delay, room_id, user, e.to_string())
                        .await;
                }
            }
        }

        // Retries exhausted: terminal Failed, invite consumed, knock expired.
        self.set_state(
            user,
            room_id,
            AcceptState::Failed {
                reason: "retries exhausted".into(),
            },
        )
        .await;
        self.invites.close(room_id, user).await;
        let _ = self
            .knocks
            .advance(user, room_id, KnockStatus::Expired)
            .await;
        tracing::warn!(
            user = %user,
            room = %room_id,
            attempts = self.policy.max_attempts,
            "auto-accept retries exhausted"
        );
        Err(RejoinError::RetryExhausted {
            user: user.clone(),
            room: room_id.clone(),
            attempts: self.policy.max_attempts,
        })
    }

    async fn succeed(
        &self,
        sequence: Uuid,
        attempt: u32,
        delay: Duration,
        room_id: &RoomId,
        user: &UserId,
    ) -> RejoinResult<AcceptOutcome> {
        self.record(sequence, attempt, delay, AttemptOutcome::Success)
            .await;
        self.set_state(user, room_id, AcceptState::Joined).await;
        self.invites.close(room_id, user).await;
        let _ = self.knocks.advance(user, room_id, KnockStatus::Joined).await;
        metrics::counter!("rejoin_joins_total").increment(1);
        tracing::info!(user = %user, room = %room_id, attempt, "auto-accept joined");
        Ok(AcceptOutcome::Joined)
    }

    async fn fail_fatal(
        &self,
        sequence: Uuid,
        attempt: u32,
        delay: Duration,
        room_id: &RoomId,
        user: &UserId,
        reason: String,
    ) -> RejoinResult<AcceptOutcome> {
        self.record(sequence, attempt, delay, AttemptOutcome::Fatal)
            .await;
        self.set_state(
            user,
            room_id,
            AcceptState::Failed {
                reason: reason.clone(),
            },
        )
        .await;
        self.invites.close(room_id, user).await;
        let _ = self
            .knocks
            .advance(user, room_id, KnockStatus::Rejected)
            .await;
        tracing::warn!(user = %user, room = %room_id, %reason, "auto-accept failed");
        Err(RejoinError::NonRetryable { reason })
    }

    async fn record(&self, sequence: Uuid, attempt: u32, delay: Duration, outcome: AttemptOutcome) {
        debug_assert!(attempt <= self.policy.max_attempts);
        let mut attempts = self.attempts.write().await;
        attempts.push(RetryAttempt {
            sequence,
            attempt,
            delay,
            outcome,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_room::{JoinPolicy, MemoryRoomStore, Room};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_attempts: 5,
        }
    }

    struct Setup {
        store: Arc<MemoryRoomStore>,
        invites: Arc<OpenInvites>,
        knocks: Arc<KnockTable>,
        accept: Arc<AutoAccept>,
        room_id: RoomId,
    }

    async fn setup() -> Setup {
        let store = Arc::new(MemoryRoomStore::new());
        let room_id = RoomId::new("!course:test");
        store
            .insert_room(Room::new(
                room_id.clone(),
                UserId::new("admin"),
                JoinPolicy::Knock,
            ))
            .await;
        let invites = Arc::new(OpenInvites::new());
        let knocks = Arc::new(KnockTable::new());
        let accept = Arc::new(AutoAccept::new(
            store.clone(),
            invites.clone(),
            knocks.clone(),
            fast_policy(),
        ));
        Setup {
            store,
            invites,
            knocks,
            accept,
            room_id,
        }
    }

    async fn invite(s: &Setup, user: &UserId) {
        s.store
            .set_membership(&s.room_id, user, MembershipState::Invite)
            .await;
        s.invites
            .insert(crate::core_invite::InviteRecord {
                room: s.room_id.clone(),
                inviter: UserId::new("admin"),
                invitee: user.clone(),
                at: crate::core_room::Timestamp::now(),
            })
            .await;
    }

    #[test]
    fn test_delay_sequence() {
        let policy = RetryPolicy::default();
        let delays = policy.delays();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
            ]
        );
    }

    #[tokio::test]
    async fn test_first_attempt_joins() {
        let s = setup().await;
        let bob = UserId::new("bob");
        invite(&s, &bob).await;

        let outcome = s.accept.accept(&s.room_id, &bob).await.unwrap();
        assert_eq!(outcome, AcceptOutcome::Joined);
        assert!(s.store.room(&s.room_id).await.unwrap().is_joined(&bob));
        // Invite consumed.
        assert!(s.invites.get(&s.room_id, &bob).await.is_none());

        let state = s.accept.state_of(&bob, &s.room_id).await.unwrap();
        assert_eq!(state, AcceptState::Joined);
        assert!(state.is_terminal());
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let s = setup().await;
        let bob = UserId::new("bob");
        invite(&s, &bob).await;
        s.store.fail_next_joins(3);

        let outcome = s.accept.accept(&s.room_id, &bob).await.unwrap();
        assert_eq!(outcome, AcceptOutcome::Joined);

        let attempts = s.accept.attempts().await;
        assert_eq!(attempts.len(), 4);
        assert_eq!(attempts[3].outcome, AttemptOutcome::Success);
    }

    #[tokio::test]
    async fn test_exhaustion_after_exactly_five_attempts() {
        let s = setup().await;
        let bob = UserId::new("bob");
        invite(&s, &bob).await;
        s.knocks.insert_pending(&bob, &s.room_id, None).await;
        let _ = s
            .knocks
            .advance(&bob, &s.room_id, KnockStatus::Invited)
            .await;
        // Six consecutive failures queued; only five attempts may run.
        s.store.fail_next_joins(6);

        let err = s.accept.accept(&s.room_id, &bob).await.unwrap_err();
        assert!(matches!(err, RejoinError::RetryExhausted { attempts: 5, .. }));

        let attempts = s.accept.attempts().await;
        assert_eq!(attempts.len(), 5, "a sixth attempt must never occur");
        assert!(attempts.iter().all(|a| a.outcome == AttemptOutcome::Transient));

        // Delay sequence is monotonically non-decreasing.
        for pair in attempts.windows(2) {
            assert!(pair[1].delay >= pair[0].delay);
        }

        // Knock terminated, invite consumed, machine in terminal Failed.
        let knock = s.knocks.get(&bob, &s.room_id).await.unwrap();
        assert_eq!(knock.status, KnockStatus::Expired);
        assert!(s.invites.get(&s.room_id, &bob).await.is_none());
        let state = s.accept.state_of(&bob, &s.room_id).await.unwrap();
        assert!(matches!(state, AcceptState::Failed { .. }));
        assert!(state.is_terminal());
    }

    #[tokio::test]
    async fn test_ban_is_non_retryable() {
        let s = setup().await;
        let bob = UserId::new("bob");
        invite(&s, &bob).await;
        s.store
            .set_membership(&s.room_id, &bob, MembershipState::Ban)
            .await;

        let err = s.accept.accept(&s.room_id, &bob).await.unwrap_err();
        assert!(matches!(err, RejoinError::NonRetryable { .. }));
        // Failure was immediate, not retried.
        assert_eq!(s.accept.attempts().await.len(), 1);
        assert!(matches!(
            s.accept.state_of(&bob, &s.room_id).await,
            Some(AcceptState::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_revoked_invite_is_non_retryable() {
        let s = setup().await;
        let bob = UserId::new("bob");
        // No invite membership in the store at all.
        let err = s.accept.accept(&s.room_id, &bob).await.unwrap_err();
        assert!(matches!(err, RejoinError::NonRetryable { .. }));
    }

    #[tokio::test]
    async fn test_deleted_room_is_non_retryable() {
        let s = setup().await;
        let bob = UserId::new("bob");
        invite(&s, &bob).await;
        s.store.delete_room(&s.room_id).await;

        let err = s.accept.accept(&s.room_id, &bob).await.unwrap_err();
        assert!(matches!(err, RejoinError::NonRetryable { .. }));
    }

    #[tokio::test]
    async fn test_already_running_sequences_coalesce() {
        let s = setup().await;
        let bob = UserId::new("bob");
        invite(&s, &bob).await;
        // Force retries so the first sequence stays in `Accepting` while the
        // concurrent triggers arrive.
        s.store.fail_next_joins(2);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let accept = s.accept.clone();
            let room = s.room_id.clone();
            let user = bob.clone();
            handles.push(tokio::spawn(async move { accept.accept(&room, &user).await }));
        }
        let results = futures::future::join_all(handles).await;

        let mut joined = 0;
        let mut folded = 0;
        for result in results {
            match result.unwrap().unwrap() {
                AcceptOutcome::Joined => joined += 1,
                AcceptOutcome::Coalesced | AcceptOutcome::AlreadyJoined => folded += 1,
            }
        }
        assert_eq!(joined, 1, "exactly one sequence may drive the join");
        assert_eq!(folded, 7);
    }
}
