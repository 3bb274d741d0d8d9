#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests for the Aeroduel mobile endpoints.
//!
//! Checks the join bodies and channel frames against JSON fixtures shaped
//! like real server traffic.

use aeroduel_mobile_sim::protocol::{
    tags, ClientMessage, InboundEvent, JoinErrorBody, JoinRequest, JoinResponse, PlaneNotice,
    DEFAULT_REASON,
};
use serde_json::{json, Value};

// ════════════════════════════════════════════════════════════════════
// Join handshake
// ════════════════════════════════════════════════════════════════════

#[test]
fn join_request_uses_server_field_names() {
    let request = JoinRequest {
        plane_id: "sim-plane-001".into(),
        user_id: "sim-user-001".into(),
        player_name: "Foxtrot-4".into(),
    };
    assert_eq!(
        serde_json::to_value(&request).unwrap(),
        json!({
            "planeId": "sim-plane-001",
            "userId": "sim-user-001",
            "playerName": "Foxtrot-4",
        })
    );
}

#[test]
fn join_response_with_all_fields() {
    let response: JoinResponse = serde_json::from_str(
        r#"{"authToken":"abc123def456","matchId":"m-42","wsUrl":"ws://aeroduel.local:45045/ws"}"#,
    )
    .unwrap();
    assert_eq!(response.auth_token, "abc123def456");
    assert_eq!(response.match_id.as_deref(), Some("m-42"));
    assert_eq!(
        response.ws_url.as_deref(),
        Some("ws://aeroduel.local:45045/ws")
    );
}

#[test]
fn join_response_with_token_only() {
    let response: JoinResponse = serde_json::from_str(r#"{"authToken":"t"}"#).unwrap();
    assert_eq!(response.match_id, None);
    assert_eq!(response.ws_url, None);
}

#[test]
fn join_response_ignores_extra_fields() {
    let response: JoinResponse =
        serde_json::from_str(r#"{"authToken":"t","planeColor":"red","ttl":30}"#).unwrap();
    assert_eq!(response.auth_token, "t");
}

#[test]
fn join_response_without_token_is_rejected() {
    assert!(serde_json::from_str::<JoinResponse>(r#"{"matchId":"m"}"#).is_err());
}

#[test]
fn join_error_body_with_and_without_reason() {
    let body: JoinErrorBody = serde_json::from_str(r#"{"error":"Match full"}"#).unwrap();
    assert_eq!(body.error.as_deref(), Some("Match full"));
    let body: JoinErrorBody = serde_json::from_str("{}").unwrap();
    assert_eq!(body.error, None);
}

// ════════════════════════════════════════════════════════════════════
// Outbound frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn hello_frame_fixture() {
    let hello = ClientMessage::hello(Some("m-42".into()), "sim-user-002", "tok");
    let value: Value = serde_json::from_str(&hello.to_json().unwrap()).unwrap();
    assert_eq!(value["tag"], tags::HELLO);
    assert_eq!(value["role"], "client");
    assert_eq!(value["matchId"], "m-42");
    assert_eq!(value["clientId"], "sim-user-002");
    assert_eq!(value["authToken"], "tok");
    assert_eq!(value.as_object().unwrap().len(), 5);
}

// ════════════════════════════════════════════════════════════════════
// Inbound frames
// ════════════════════════════════════════════════════════════════════

#[test]
fn every_known_tag_parses() {
    let fixtures = [
        (r#"{"tag":"system:ack"}"#, tags::SYSTEM_ACK),
        (r#"{"tag":"match:update","data":{"timeLeft":90}}"#, tags::MATCH_UPDATE),
        (r#"{"tag":"match:created","data":{"matchId":"m2"}}"#, tags::MATCH_CREATED),
        (r#"{"tag":"plane:hit","data":{"planeId":"p1","by":"p2"}}"#, tags::PLANE_HIT),
        (r#"{"tag":"plane:kicked","data":{"planeId":"p1","reason":"x"}}"#, tags::PLANE_KICKED),
        (r#"{"tag":"plane:disqualified","data":{"planeId":"p1"}}"#, tags::PLANE_DISQUALIFIED),
        (r#"{"tag":"plane:poweron","data":{"planeId":"p1"}}"#, tags::PLANE_POWERON),
        (r#"{"tag":"match:end","data":{"winner":"p1"}}"#, tags::MATCH_END),
    ];
    for (raw, tag) in fixtures {
        let event = InboundEvent::parse(raw).unwrap_or_else(|e| panic!("{raw}: {e}"));
        assert_eq!(event.tag(), tag);
        assert!(!matches!(event, InboundEvent::Unknown { .. }));
    }
}

#[test]
fn unknown_tag_keeps_payload() {
    let event = InboundEvent::parse(r#"{"tag":"match:paused","data":{"by":"admin"}}"#).unwrap();
    assert_eq!(
        event,
        InboundEvent::Unknown {
            tag: "match:paused".into(),
            data: json!({ "by": "admin" }),
        }
    );
}

#[test]
fn opaque_payloads_are_kept_verbatim() {
    let event =
        InboundEvent::parse(r#"{"tag":"plane:hit","data":{"planeId":"p1","damage":[1,2]}}"#)
            .unwrap();
    assert_eq!(
        event,
        InboundEvent::PlaneHit(json!({ "planeId": "p1", "damage": [1, 2] }))
    );
}

#[test]
fn plane_notice_reason_is_optional() {
    let event =
        InboundEvent::parse(r#"{"tag":"plane:kicked","data":{"planeId":"sim-plane-001"}}"#)
            .unwrap();
    assert_eq!(
        event,
        InboundEvent::PlaneKicked(PlaneNotice::new("sim-plane-001", None))
    );
    let InboundEvent::PlaneKicked(notice) = event else {
        unreachable!()
    };
    assert_eq!(notice.reason_or_default(), DEFAULT_REASON);
}

#[test]
fn malformed_frames_are_reported() {
    for raw in [
        "",
        "not json",
        "[]",
        r#"{"data":{}}"#,
        r#"{"tag":42}"#,
        r#"{"tag":"plane:poweron"}"#,
        r#"{"tag":"plane:kicked","data":{"planeId":7}}"#,
    ] {
        let err = InboundEvent::parse(raw).unwrap_err();
        assert_eq!(err.raw, raw);
        assert!(!err.detail.is_empty());
    }
}

#[test]
fn only_poweron_and_match_created_are_broadcast() {
    let broadcast: Vec<_> = [
        r#"{"tag":"system:ack"}"#,
        r#"{"tag":"match:update"}"#,
        r#"{"tag":"match:created"}"#,
        r#"{"tag":"plane:hit"}"#,
        r#"{"tag":"plane:kicked","data":{"planeId":"p"}}"#,
        r#"{"tag":"plane:disqualified","data":{"planeId":"p"}}"#,
        r#"{"tag":"plane:poweron","data":{"planeId":"p"}}"#,
        r#"{"tag":"match:end"}"#,
        r#"{"tag":"other"}"#,
    ]
    .iter()
    .map(|raw| InboundEvent::parse(raw).unwrap())
    .filter(InboundEvent::is_broadcast)
    .map(|event| event.tag().to_string())
    .collect();
    assert_eq!(broadcast, [tags::MATCH_CREATED, tags::PLANE_POWERON]);
}
