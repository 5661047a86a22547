//! Shared server state and router assembly

use crate::handlers;
use axum::routing::{get, post};
use axum::Router;
use rejoin_core::core_accept::MembershipEvent;
use rejoin_core::RejoinService;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct AppState {
    pub service: RejoinService,
    /// Feed for externally observed membership events; the invite watcher
    /// consumes the other end.
    pub events: mpsc::Sender<MembershipEvent>,
}

impl AppState {
    pub fn new(service: RejoinService, events: mpsc::Sender<MembershipEvent>) -> Self {
        AppState { service, events }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/request_room_code", get(handlers::request_room_code))
        .route("/knock_with_code", post(handlers::knock_with_code))
        .route("/request_auto_join", post(handlers::request_auto_join))
        .route("/events", post(handlers::membership_event))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use rejoin_core::config::Config;
    use rejoin_core::core_room::{JoinPolicy, MemoryRoomStore, Room, RoomId, UserId};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_router() -> Router {
        let store = Arc::new(MemoryRoomStore::new());
        store
            .insert_room(Room::new(
                RoomId::new("!course:test"),
                UserId::new("admin"),
                JoinPolicy::Knock,
            ))
            .await;
        let mut config = Config::default();
        config.retry.base_delay = Duration::from_millis(1);
        let service = RejoinService::new(store, &config);
        let (tx, _rx) = mpsc::channel(4);
        build_router(Arc::new(AppState::new(service, tx)))
    }

    #[tokio::test]
    async fn test_room_code_requires_auth() {
        let router = test_router().await;
        let response = router
            .oneshot(
                Request::get("/request_room_code?room_id=!course:test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_code_roundtrip_over_http() {
        let router = test_router().await;

        let response = router
            .clone()
            .oneshot(
                Request::get("/request_room_code?room_id=!course:test")
                    .header("Authorization", "Bearer admin")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let minted: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let code = minted["access_code"].as_str().unwrap().to_owned();

        let response = router
            .oneshot(
                Request::post("/knock_with_code")
                    .header("Authorization", "Bearer bob")
                    .header("Content-Type", "application/json")
                    .body(Body::from(format!("{{\"access_code\":\"{code}\"}}")))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let joined: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(joined["rooms"][0], "!course:test");
    }

    #[tokio::test]
    async fn test_bad_code_is_rejected() {
        let router = test_router().await;
        let response = router
            .oneshot(
                Request::post("/knock_with_code")
                    .header("Authorization", "Bearer bob")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"access_code":"WRONG11"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stranger_auto_join_is_forbidden() {
        let router = test_router().await;
        let response = router
            .oneshot(
                Request::post("/request_auto_join")
                    .header("Authorization", "Bearer stranger")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"room_id":"!course:test"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
