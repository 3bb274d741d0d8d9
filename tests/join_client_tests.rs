#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! HTTP join client tests against a local mock server.

use std::time::Duration;

use aeroduel_mobile_sim::api::{HttpMatchServer, MatchServerApi, JOIN_PATH};
use aeroduel_mobile_sim::protocol::JoinRequest;
use aeroduel_mobile_sim::JoinError;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn foxtrot() -> JoinRequest {
    JoinRequest {
        plane_id: "sim-plane-001".into(),
        user_id: "sim-user-001".into(),
        player_name: "Foxtrot-4".into(),
    }
}

async fn client_for(server: &MockServer) -> HttpMatchServer {
    HttpMatchServer::new(&server.uri(), Some(Duration::from_secs(2))).unwrap()
}

#[tokio::test]
async fn successful_join_posts_camel_case_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(JOIN_PATH))
        .and(body_json(json!({
            "planeId": "sim-plane-001",
            "userId": "sim-user-001",
            "playerName": "Foxtrot-4",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authToken": "abc123def456",
            "matchId": "m-1",
            "wsUrl": "ws://10.0.0.2:45046/ws",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server).await.join(&foxtrot()).await.unwrap();
    assert_eq!(response.auth_token, "abc123def456");
    assert_eq!(response.match_id.as_deref(), Some("m-1"));
    assert_eq!(response.ws_url.as_deref(), Some("ws://10.0.0.2:45046/ws"));
}

#[tokio::test]
async fn relative_ws_url_is_resolved_against_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(JOIN_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "authToken": "t", "wsUrl": "/ws" })),
        )
        .mount(&server)
        .await;

    let response = client_for(&server).await.join(&foxtrot()).await.unwrap();
    let expected = format!("{}/ws", server.uri().replacen("http://", "ws://", 1));
    assert_eq!(response.ws_url.as_deref(), Some(expected.as_str()));
}

#[tokio::test]
async fn rejection_carries_server_reason_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(JOIN_PATH))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({ "error": "Match full" })))
        .mount(&server)
        .await;

    let err = client_for(&server).await.join(&foxtrot()).await.unwrap_err();
    assert_eq!(err, JoinError::Rejected("Match full".into()));
    assert_eq!(err.to_string(), "Match full");
}

#[tokio::test]
async fn rejection_without_reason_uses_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(JOIN_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "status": 403 })))
        .mount(&server)
        .await;

    let err = client_for(&server).await.join(&foxtrot()).await.unwrap_err();
    assert_eq!(err, JoinError::Rejected("Join failed".into()));
}

#[tokio::test]
async fn rejection_with_empty_body_uses_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(JOIN_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client_for(&server).await.join(&foxtrot()).await.unwrap_err();
    assert_eq!(err, JoinError::Rejected("Join failed".into()));
}

#[tokio::test]
async fn unreadable_rejection_body_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(JOIN_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let err = client_for(&server).await.join(&foxtrot()).await.unwrap_err();
    assert!(matches!(err, JoinError::Transport(_)), "{err:?}");
    assert!(err.reason().contains("500"));
}

#[tokio::test]
async fn unreadable_success_body_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(JOIN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client_for(&server).await.join(&foxtrot()).await.unwrap_err();
    assert!(matches!(err, JoinError::Transport(_)));
}

#[tokio::test]
async fn empty_token_is_a_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(JOIN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "authToken": "" })))
        .mount(&server)
        .await;

    let err = client_for(&server).await.join(&foxtrot()).await.unwrap_err();
    assert!(matches!(err, JoinError::Transport(_)));
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(JOIN_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "authToken": "t" }))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let api = HttpMatchServer::new(&server.uri(), Some(Duration::from_millis(50))).unwrap();
    let err = api.join(&foxtrot()).await.unwrap_err();
    assert!(matches!(err, JoinError::Transport(_)));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let api = HttpMatchServer::new("http://127.0.0.1:1", None).unwrap();
    let err = api.join(&foxtrot()).await.unwrap_err();
    assert!(matches!(err, JoinError::Transport(_)));
}

#[tokio::test]
async fn debug_queries_return_opaque_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/match"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "active" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/planes"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let api = client_for(&server).await;
    assert_eq!(
        api.match_snapshot().await.unwrap(),
        json!({ "status": "active" })
    );
    let err = api.planes().await.unwrap_err();
    assert_eq!(err.endpoint, "/api/planes");
    assert!(err.detail.contains("503"));
}
