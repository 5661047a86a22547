//! Pipeline facade
//!
//! `RejoinService` wires the registry, validator, resolver, issuer, and
//! accept machine together and exposes the three request-path operations.
//! These are the only entry points that mint a [`RequestToken`], so
//! escalation stays confined to the synchronous request call chain.

use crate::config::Config;
use crate::core_accept::{AcceptOutcome, AutoAccept, InviteWatcher};
use crate::core_access::{AccessCode, CodeRegistry};
use crate::core_invite::{InviteIssuer, OpenInvites};
use crate::core_knock::{KnockTable, KnockValidator};
use crate::core_power::{EscalationLog, PowerResolver, RequestToken};
use crate::core_room::{RoomId, RoomStore, UserId};
use crate::error::{RejoinError, RejoinResult};
use crate::ratelimit::{Endpoint, RateLimiter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Aggregate response for `knock_with_code`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnockWithCodeResponse {
    pub message: String,
    /// Rooms the user was invited into and joined
    pub rooms: Vec<RoomId>,
    /// Rooms the user already belonged to; membership there is a no-op
    pub already_joined: Vec<RoomId>,
}

/// Response for `request_auto_join`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoJoinResponse {
    pub message: String,
    pub room_id: RoomId,
}

/// The assembled knock → resolve → invite → accept pipeline
pub struct RejoinService {
    store: Arc<dyn RoomStore>,
    registry: Arc<CodeRegistry>,
    limiter: Arc<RateLimiter>,
    validator: KnockValidator,
    resolver: PowerResolver,
    issuer: InviteIssuer,
    accept: Arc<AutoAccept>,
}

impl RejoinService {
    pub fn new(store: Arc<dyn RoomStore>, config: &Config) -> Self {
        let registry = Arc::new(CodeRegistry::new(store.clone(), config.codes.ttl));
        let limiter = Arc::new(RateLimiter::new(config.ratelimit.budgets()));
        let knocks = Arc::new(KnockTable::new());
        let invites = Arc::new(OpenInvites::new());

        let validator = KnockValidator::new(
            store.clone(),
            registry.clone(),
            limiter.clone(),
            knocks.clone(),
        );
        let resolver = PowerResolver::new(store.clone(), Arc::new(EscalationLog::new()));
        let issuer = InviteIssuer::new(store.clone(), invites.clone(), knocks.clone());
        let accept = Arc::new(AutoAccept::new(
            store.clone(),
            invites,
            knocks,
            config.retry.clone(),
        ));

        RejoinService {
            store,
            registry,
            limiter,
            validator,
            resolver,
            issuer,
            accept,
        }
    }

    /// Passive watcher sharing this service's accept machine. It cannot
    /// reach the resolver or mint a token.
    pub fn watcher(&self) -> InviteWatcher {
        InviteWatcher::new(self.store.clone(), self.accept.clone())
    }

    /// Escalation audit trail, read-only for operators
    pub fn escalation_log(&self) -> Arc<EscalationLog> {
        self.resolver.audit_log()
    }

    /// Knock records, for introspection and tests
    pub fn knock_table(&self) -> Arc<KnockTable> {
        self.validator.knocks.clone()
    }

    /// Issue an access code for a room. Requires invite-capable authority.
    pub async fn request_room_code(
        &self,
        requester: &UserId,
        room_id: &RoomId,
    ) -> RejoinResult<AccessCode> {
        self.limiter
            .check(requester, Endpoint::RequestRoomCode)
            .await?;
        self.registry.generate(room_id, requester).await
    }

    /// Knock with an access code and ride the pipeline to a committed join
    pub async fn knock_with_code(
        &self,
        user: &UserId,
        code: &str,
    ) -> RejoinResult<KnockWithCodeResponse> {
        let record = match self.validator.knock_with_code(user, code).await {
            Ok(record) => record,
            Err(RejoinError::AlreadyMember { room, .. }) => {
                return Ok(KnockWithCodeResponse {
                    message: "Already joined".to_string(),
                    rooms: Vec::new(),
                    already_joined: vec![room],
                });
            }
            Err(e) => return Err(e),
        };
        let room_id = record.room.clone();

        match self.run_pipeline(&room_id, user).await? {
            AcceptOutcome::AlreadyJoined => Ok(KnockWithCodeResponse {
                message: "Already joined".to_string(),
                rooms: Vec::new(),
                already_joined: vec![room_id],
            }),
            _ => Ok(KnockWithCodeResponse {
                message: "Invited user".to_string(),
                rooms: vec![room_id],
                already_joined: Vec::new(),
            }),
        }
    }

    /// Re-admit a previous member of a room without a code
    pub async fn request_auto_join(
        &self,
        user: &UserId,
        room_id: &RoomId,
    ) -> RejoinResult<AutoJoinResponse> {
        match self
            .validator
            .knock(room_id, user, None, Endpoint::AutoJoin)
            .await
        {
            Ok(_) => {}
            Err(RejoinError::AlreadyMember { room, .. }) => {
                return Ok(AutoJoinResponse {
                    message: "Already a member".to_string(),
                    room_id: room,
                });
            }
            Err(e) => return Err(e),
        }

        self.run_pipeline(room_id, user).await?;
        Ok(AutoJoinResponse {
            message: "Invited user".to_string(),
            room_id: room_id.clone(),
        })
    }

    /// Resolve (escalating if needed), issue, accept. Request path only:
    /// this is where the token is minted.
    async fn run_pipeline(&self, room_id: &RoomId, user: &UserId) -> RejoinResult<AcceptOutcome> {
        let token = RequestToken::new();
        let inviter = self
            .resolver
            .resolve_or_escalate(&token, room_id, user)
            .await?;

        match self.issuer.issue(room_id, &inviter, user).await {
            Ok(_) => {}
            // Raced with another writer; fold into the no-op success.
            Err(RejoinError::AlreadyMember { .. }) => return Ok(AcceptOutcome::AlreadyJoined),
            Err(e) => return Err(e),
        }

        self.accept.accept(room_id, user).await
    }
}
