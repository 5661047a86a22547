//! Passive membership-event watcher
//!
//! Reacts to replicated membership events with pure accept logic only. It
//! holds no [`crate::core_power::RequestToken`] and no resolver, so it is
//! incapable of the escalation write; reacting to its own side effects can
//! therefore never grow into an escalate → invite → accept cascade.

use super::machine::{AcceptOutcome, AutoAccept};
use crate::core_room::{MembershipState, RoomId, RoomStore, UserId};
use crate::error::RejoinResult;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A membership change observed on the replication stream
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    pub room: RoomId,
    pub user: UserId,
    pub state: MembershipState,
}

/// Accept-only observer of membership events
pub struct InviteWatcher {
    store: Arc<dyn RoomStore>,
    accept: Arc<AutoAccept>,
}

impl InviteWatcher {
    pub fn new(store: Arc<dyn RoomStore>, accept: Arc<AutoAccept>) -> Self {
        InviteWatcher { store, accept }
    }

    /// Handle one event. Invites trigger the accept machine; departures from
    /// restricted rooms are checked for an authority gap, which is logged but
    /// never repaired from here.
    pub async fn on_event(&self, event: &MembershipEvent) -> RejoinResult<Option<AcceptOutcome>> {
        match event.state {
            MembershipState::Invite => {
                let outcome = self.accept.accept(&event.room, &event.user).await?;
                Ok(Some(outcome))
            }
            MembershipState::Leave | MembershipState::Ban => {
                self.check_authority_gap(&event.room).await;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Consume events from a channel until it closes
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<MembershipEvent>) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.on_event(&event).await {
                tracing::warn!(
                    room = %event.room,
                    user = %event.user,
                    error = %e,
                    "watcher failed to handle membership event"
                );
            }
        }
    }

    /// After a departure, surface rooms left without any invite-capable
    /// member. Recovery happens on the next request-path knock; this side
    /// only observes.
    async fn check_authority_gap(&self, room_id: &RoomId) {
        let room = match self.store.room(room_id).await {
            Ok(room) => room,
            Err(e) => {
                tracing::debug!(room = %room_id, error = %e, "skipping departure check");
                return;
            }
        };
        if !room.policy.is_restricted() {
            return;
        }
        let has_inviter = room.joined_members().any(|user| room.can_invite(user));
        if !has_inviter {
            tracing::warn!(
                room = %room_id,
                "departure left room with no member holding invite authority"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_accept::machine::RetryPolicy;
    use crate::core_invite::OpenInvites;
    use crate::core_knock::KnockTable;
    use crate::core_room::{JoinPolicy, MemoryRoomStore, Room};
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryRoomStore>, InviteWatcher, RoomId) {
        let store = Arc::new(MemoryRoomStore::new());
        let room_id = RoomId::new("!course:test");
        store
            .insert_room(Room::new(
                room_id.clone(),
                UserId::new("admin"),
                JoinPolicy::Knock,
            ))
            .await;
        let accept = Arc::new(AutoAccept::new(
            store.clone(),
            Arc::new(OpenInvites::new()),
            Arc::new(KnockTable::new()),
            RetryPolicy {
                base_delay: Duration::from_millis(1),
                max_attempts: 5,
            },
        ));
        let watcher = InviteWatcher::new(store.clone(), accept);
        (store, watcher, room_id)
    }

    #[tokio::test]
    async fn test_external_invite_is_accepted() {
        let (store, watcher, room_id) = setup().await;
        let bob = UserId::new("bob");
        // Invite originated outside this process: only store state, no
        // open-invite record and no knock record.
        store
            .set_membership(&room_id, &bob, MembershipState::Invite)
            .await;

        let outcome = watcher
            .on_event(&MembershipEvent {
                room: room_id.clone(),
                user: bob.clone(),
                state: MembershipState::Invite,
            })
            .await
            .unwrap();
        assert_eq!(outcome, Some(AcceptOutcome::Joined));
        assert!(store.room(&room_id).await.unwrap().is_joined(&bob));
    }

    #[tokio::test]
    async fn test_join_events_are_ignored() {
        let (_store, watcher, room_id) = setup().await;
        let outcome = watcher
            .on_event(&MembershipEvent {
                room: room_id,
                user: UserId::new("bob"),
                state: MembershipState::Join,
            })
            .await
            .unwrap();
        assert_eq!(outcome, None);
    }

    #[tokio::test]
    async fn test_departure_check_never_writes() {
        let (store, watcher, room_id) = setup().await;
        // Sole admin leaves; the room now has an authority gap.
        store
            .set_membership(&room_id, &UserId::new("admin"), MembershipState::Leave)
            .await;

        watcher
            .on_event(&MembershipEvent {
                room: room_id.clone(),
                user: UserId::new("admin"),
                state: MembershipState::Leave,
            })
            .await
            .unwrap();

        // The gap is only observed: nobody was granted authority.
        let room = store.room(&room_id).await.unwrap();
        assert!(!room.joined_members().any(|u| room.can_invite(u)));
    }

    #[tokio::test]
    async fn test_run_consumes_channel() {
        let (store, watcher, room_id) = setup().await;
        let bob = UserId::new("bob");
        store
            .set_membership(&room_id, &bob, MembershipState::Invite)
            .await;

        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(Arc::new(watcher).run(rx));
        tx.send(MembershipEvent {
            room: room_id.clone(),
            user: bob.clone(),
            state: MembershipState::Invite,
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(store.room(&room_id).await.unwrap().is_joined(&bob));
    }
}
