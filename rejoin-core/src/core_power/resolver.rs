//! Inviter resolution and the confined escalation path

use super::escalation::{EscalationLog, EscalationRecord, RequestToken};
use crate::core_room::{
    MembershipChange, Room, RoomId, RoomStore, Timestamp, UserId,
};
use crate::error::{RejoinError, RejoinResult};
use std::sync::Arc;

/// Finds a member authorized to invite; escalates when none exists.
///
/// Escalation writes a power grant outside the normal authorization path and
/// is therefore only reachable with a [`RequestToken`]. It never runs from
/// event-reactive code.
pub struct PowerResolver {
    store: Arc<dyn RoomStore>,
    log: Arc<EscalationLog>,
}

impl PowerResolver {
    pub fn new(store: Arc<dyn RoomStore>, log: Arc<EscalationLog>) -> Self {
        PowerResolver { store, log }
    }

    pub fn audit_log(&self) -> Arc<EscalationLog> {
        self.log.clone()
    }

    /// Pick the member to send the invite, if any member currently can.
    ///
    /// Among invite-capable joined members the highest tier wins; ties break
    /// to the lowest user id so the choice is reproducible across workers.
    pub fn resolve_inviter(&self, room: &Room) -> Option<UserId> {
        room.joined_members()
            .filter(|user| room.can_invite(user))
            .max_by(|a, b| {
                room.tier_of(a)
                    .cmp(&room.tier_of(b))
                    // reversed id ordering: max_by then prefers the lowest id
                    .then_with(|| b.cmp(a))
            })
            .cloned()
    }

    /// Resolve an inviter, escalating `fallback` to invite-capable authority
    /// when the room has none.
    ///
    /// Idempotent: when a qualified inviter exists this is a pure read and no
    /// `EscalationRecord` is written, however many times it runs.
    pub async fn resolve_or_escalate(
        &self,
        _token: &RequestToken,
        room_id: &RoomId,
        fallback: &UserId,
    ) -> RejoinResult<UserId> {
        let room = self.store.room(room_id).await?;

        if let Some(inviter) = self.resolve_inviter(&room) {
            return Ok(inviter);
        }

        if room.is_banned(fallback) {
            return Err(RejoinError::NonRetryable {
                reason: format!("fallback inviter {fallback} is banned from {room_id}"),
            });
        }

        // A grant from an earlier pass through this gap survives in the
        // authority map even if the join never committed. Reuse it; one gap
        // produces at most one record.
        if room.tier_of(fallback) >= room.invite_tier {
            tracing::debug!(
                room = %room_id,
                user = %fallback,
                "fallback already holds an escalated grant, reusing it"
            );
            return Ok(fallback.clone());
        }

        let tier = room.invite_tier;
        self.store
            .apply(MembershipChange::GrantPower {
                room: room_id.clone(),
                user: fallback.clone(),
                tier,
            })
            .await?;

        let record = EscalationRecord {
            room: room_id.clone(),
            user: fallback.clone(),
            tier,
            at: Timestamp::now(),
        };
        tracing::warn!(
            room = %room_id,
            user = %fallback,
            tier = %tier,
            "no member holds invite authority; escalated fallback user"
        );
        metrics::counter!("rejoin_escalations_total").increment(1);
        self.log.append(record).await;

        Ok(fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_room::{JoinPolicy, MembershipState, MemoryRoomStore, PowerTier, Room};

    fn resolver(store: Arc<MemoryRoomStore>) -> PowerResolver {
        PowerResolver::new(store, Arc::new(EscalationLog::new()))
    }

    async fn empty_authority_room(store: &MemoryRoomStore) -> RoomId {
        let room_id = RoomId::new("!course:test");
        let mut room = Room::new(room_id.clone(), UserId::new("admin"), JoinPolicy::Knock);
        // Sole admin has departed.
        room.members
            .insert(UserId::new("admin"), MembershipState::Leave);
        store.insert_room(room).await;
        room_id
    }

    #[test]
    fn test_resolve_prefers_highest_tier() {
        let mut room = Room::new(
            RoomId::new("!r:test"),
            UserId::new("owner"),
            JoinPolicy::Knock,
        );
        room.members
            .insert(UserId::new("mod"), MembershipState::Join);
        room.authority
            .insert(UserId::new("mod"), PowerTier::new(50));

        let store = Arc::new(MemoryRoomStore::new());
        let resolver = resolver(store);
        assert_eq!(
            resolver.resolve_inviter(&room),
            Some(UserId::new("owner")),
            "owner at tier 100 outranks mod at 50"
        );
    }

    #[test]
    fn test_resolve_tie_breaks_to_lowest_id() {
        let mut room = Room::new(
            RoomId::new("!r:test"),
            UserId::new("zed"),
            JoinPolicy::Knock,
        );
        room.members
            .insert(UserId::new("anna"), MembershipState::Join);
        room.authority
            .insert(UserId::new("anna"), PowerTier::new(100));

        let store = Arc::new(MemoryRoomStore::new());
        let resolver = resolver(store);
        assert_eq!(resolver.resolve_inviter(&room), Some(UserId::new("anna")));
    }

    #[tokio::test]
    async fn test_escalates_when_no_inviter() {
        let store = Arc::new(MemoryRoomStore::new());
        let room_id = empty_authority_room(&store).await;
        let resolver = resolver(store.clone());
        let token = RequestToken::new();
        let rejoiner = UserId::new("rejoiner");

        let inviter = resolver
            .resolve_or_escalate(&token, &room_id, &rejoiner)
            .await
            .unwrap();
        assert_eq!(inviter, rejoiner);

        let records = resolver.audit_log().records_for(&room_id).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].user, rejoiner);

        // Grant is visible in the store.
        let room = store.room(&room_id).await.unwrap();
        assert_eq!(room.tier_of(&rejoiner), room.invite_tier);
    }

    #[tokio::test]
    async fn test_escalation_is_idempotent() {
        let store = Arc::new(MemoryRoomStore::new());
        let room_id = empty_authority_room(&store).await;
        let resolver = resolver(store.clone());
        let token = RequestToken::new();
        let rejoiner = UserId::new("rejoiner");

        resolver
            .resolve_or_escalate(&token, &room_id, &rejoiner)
            .await
            .unwrap();
        // The grantee must be joined before they count as an inviter.
        store
            .set_membership(&room_id, &rejoiner, MembershipState::Join)
            .await;

        // Re-resolving finds the now-qualified inviter; no second record.
        for _ in 0..3 {
            let inviter = resolver
                .resolve_or_escalate(&token, &room_id, &rejoiner)
                .await
                .unwrap();
            assert_eq!(inviter, rejoiner);
        }
        assert_eq!(resolver.audit_log().records_for(&room_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_gap_yields_one_record_even_without_join() {
        let store = Arc::new(MemoryRoomStore::new());
        let room_id = empty_authority_room(&store).await;
        let resolver = resolver(store.clone());
        let token = RequestToken::new();
        let rejoiner = UserId::new("rejoiner");

        // The grantee never joins (e.g. the accept sequence exhausted its
        // retries) and the user knocks again.
        for _ in 0..3 {
            let inviter = resolver
                .resolve_or_escalate(&token, &room_id, &rejoiner)
                .await
                .unwrap();
            assert_eq!(inviter, rejoiner);
        }
        assert_eq!(
            resolver.audit_log().records_for(&room_id).await.len(),
            1,
            "one authority gap must produce at most one record"
        );
    }

    #[tokio::test]
    async fn test_no_record_when_inviter_exists() {
        let store = Arc::new(MemoryRoomStore::new());
        let room_id = RoomId::new("!r:test");
        store
            .insert_room(Room::new(
                room_id.clone(),
                UserId::new("admin"),
                JoinPolicy::Knock,
            ))
            .await;
        let resolver = resolver(store);
        let token = RequestToken::new();

        let inviter = resolver
            .resolve_or_escalate(&token, &room_id, &UserId::new("bob"))
            .await
            .unwrap();
        assert_eq!(inviter, UserId::new("admin"));
        assert!(resolver.audit_log().records().await.is_empty());
    }

    #[tokio::test]
    async fn test_banned_fallback_is_rejected() {
        let store = Arc::new(MemoryRoomStore::new());
        let room_id = empty_authority_room(&store).await;
        store
            .set_membership(&room_id, &UserId::new("banned"), MembershipState::Ban)
            .await;
        let resolver = resolver(store);
        let token = RequestToken::new();

        let err = resolver
            .resolve_or_escalate(&token, &room_id, &UserId::new("banned"))
            .await
            .unwrap_err();
        assert!(matches!(err, RejoinError::NonRetryable { .. }));
        assert!(resolver.audit_log().records().await.is_empty());
    }
}
