//! HTTP handlers for the recovery pipeline endpoints

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use rejoin_core::core_accept::MembershipEvent;
use rejoin_core::core_room::{MembershipState, RoomId, UserId};
use rejoin_core::{AutoJoinResponse, KnockWithCodeResponse};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Resolve the caller from `Authorization: Bearer <user id>`.
/// Token verification belongs to the homeserver in front of us; here the
/// bearer value is the already-authenticated user id.
fn authenticated_user(headers: &HeaderMap) -> ApiResult<UserId> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthenticated)?;
    let token = value
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthenticated)?;
    Ok(UserId::new(token))
}

#[derive(Debug, Deserialize)]
pub struct RoomCodeQuery {
    pub room_id: RoomId,
}

#[derive(Debug, Serialize)]
pub struct RoomCodeResponse {
    pub access_code: String,
    pub room_id: RoomId,
}

/// GET /request_room_code?room_id= - mint an access code for a room
pub async fn request_room_code(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RoomCodeQuery>,
    headers: HeaderMap,
) -> ApiResult<Json<RoomCodeResponse>> {
    let requester = authenticated_user(&headers)?;
    let code = state
        .service
        .request_room_code(&requester, &query.room_id)
        .await?;
    Ok(Json(RoomCodeResponse {
        access_code: code.code,
        room_id: query.room_id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct KnockRequest {
    pub access_code: String,
}

/// POST /knock_with_code - knock with an access code and ride the pipeline
pub async fn knock_with_code(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<KnockRequest>,
) -> ApiResult<Json<KnockWithCodeResponse>> {
    let user = authenticated_user(&headers)?;
    let response = state
        .service
        .knock_with_code(&user, &req.access_code)
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct AutoJoinRequest {
    pub room_id: RoomId,
}

/// POST /request_auto_join - re-admit a former member without a code
pub async fn request_auto_join(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AutoJoinRequest>,
) -> ApiResult<Json<AutoJoinResponse>> {
    let user = authenticated_user(&headers)?;
    let response = state.service.request_auto_join(&user, &req.room_id).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub state: MembershipState,
}

#[derive(Debug, Serialize)]
pub struct EventAck {
    pub accepted: bool,
}

/// POST /events - feed an externally observed membership event to the
/// invite watcher
pub async fn membership_event(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EventRequest>,
) -> ApiResult<Json<EventAck>> {
    let event = MembershipEvent {
        room: req.room_id,
        user: req.user_id,
        state: req.state,
    };
    state
        .events
        .send(event)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("event channel closed: {}", e)))?;
    Ok(Json(EventAck { accepted: true }))
}
