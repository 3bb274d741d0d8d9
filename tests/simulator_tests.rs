#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end tests for the simulator driver.
//!
//! Two default mobiles run against a scripted join endpoint and mock event
//! channels that the tests drive from the server side.

mod common;

use std::sync::Arc;

use aeroduel_mobile_sim::{
    ChannelState, MembershipState, MobileSimulator, SessionEvent, SimulatorConfig,
    SimulatorError, SimulatorEvent,
};
use serde_json::{json, Value};

use common::{
    ack, disqualified, kicked, match_created, match_end, poweron, Bench, MockConnector,
    MockServerApi, WAIT,
};

// ════════════════════════════════════════════════════════════════════
// Join and handshake
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn join_open_hello_ack_authenticates() {
    let mut bench = Bench::start(MockServerApi::new());
    bench.simulator.join(0).unwrap();

    let link = bench.links.next().await;
    assert_eq!(link.target, "ws://mock/sim-plane-001");

    let sent = link.wait_for_sent(1).await;
    let hello: Value = serde_json::from_str(&sent[0]).unwrap();
    assert_eq!(
        hello,
        json!({
            "tag": "hello",
            "role": "client",
            "matchId": "match-1",
            "clientId": "sim-user-001",
            "authToken": "token-sim-plane-001-0001",
        })
    );
    assert_eq!(bench.status(0).await, "Channel Live");

    link.push(ack());
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::Authenticated))
        .await;

    let snapshot = bench.simulator.snapshot(0).await.unwrap();
    assert_eq!(snapshot.membership, MembershipState::ChannelAuthenticated);
    assert_eq!(snapshot.channel, ChannelState::Authenticated);
    assert_eq!(
        snapshot.auth_token.as_deref(),
        Some("token-sim-plane-001-0001")
    );

    let request = bench.api.requests.lock().unwrap()[0].clone();
    assert_eq!(request.plane_id, "sim-plane-001");
    assert_eq!(request.user_id, "sim-user-001");
    assert_eq!(request.player_name, "Foxtrot-4");
}

#[tokio::test]
async fn rejected_join_reports_server_reason() {
    let mut bench = Bench::start(MockServerApi::new().reject("sim-plane-002", "Match full"));
    bench.simulator.join(1).unwrap();

    let event = bench
        .wait_for(1, |e| matches!(e, SessionEvent::JoinFailed { .. }))
        .await;
    assert_eq!(
        event,
        SessionEvent::JoinFailed {
            reason: "Match full".into()
        }
    );

    let snapshot = bench.simulator.snapshot(1).await.unwrap();
    assert_eq!(snapshot.membership, MembershipState::NotJoined);
    assert_eq!(snapshot.auth_token, None);
    assert!(!bench.links.has_pending());

    let activity = bench.simulator.activity().await;
    assert_eq!(activity[0].source, "Mobile 2");
    assert_eq!(activity[0].message, "Join failed: Match full");
}

#[tokio::test]
async fn repeated_join_sends_one_request() {
    let mut bench = Bench::start(MockServerApi::new());
    bench.simulator.join(0).unwrap();
    bench.simulator.join(0).unwrap();

    let _link = bench.complete_handshake(0).await;
    bench.simulator.join(0).unwrap();

    // Round-trip a command so the last join has been processed.
    bench.simulator.set_display_name(1, "Echo-5").await.unwrap();
    assert_eq!(bench.api.request_count(), 1);
    assert!(!bench.links.has_pending());
}

#[tokio::test]
async fn join_without_channel_target_stays_joined() {
    let mut bench = Bench::start(MockServerApi::new().without_channel());
    bench.simulator.join(0).unwrap();
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::Joined { .. }))
        .await;

    let snapshot = bench.simulator.snapshot(0).await.unwrap();
    assert_eq!(snapshot.membership, MembershipState::Joined);
    assert_eq!(snapshot.channel, ChannelState::Disconnected);
    assert!(!bench.links.has_pending());
}

#[tokio::test]
async fn connect_failure_rolls_join_back() {
    let (mut simulator, mut events) = MobileSimulator::start(
        SimulatorConfig::default(),
        Arc::new(MockServerApi::new()),
        Arc::new(MockConnector::refusing()),
    );
    simulator.join(0).unwrap();

    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .unwrap()
            .unwrap();
        if let SimulatorEvent::Session {
            slot: 0,
            event: SessionEvent::ChannelFailed { .. },
        } = event
        {
            break;
        }
    }

    let snapshot = simulator.snapshot(0).await.unwrap();
    assert_eq!(snapshot.membership, MembershipState::NotJoined);
    assert_eq!(snapshot.channel, ChannelState::Closed);
    assert_eq!(snapshot.auth_token, None);
    simulator.shutdown().await;
}

#[tokio::test]
async fn display_name_locked_while_joined() {
    let mut bench = Bench::start(MockServerApi::new());
    bench.simulator.set_display_name(0, "Echo-5").await.unwrap();
    let _link = bench.authenticate(0).await;

    assert!(matches!(
        bench.simulator.set_display_name(0, "Other").await,
        Err(SimulatorError::NameLocked(0))
    ));
    assert_eq!(bench.api.requests.lock().unwrap()[0].player_name, "Echo-5");
}

// ════════════════════════════════════════════════════════════════════
// Plane-scoped events
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn kick_with_reason_clears_credentials() {
    let mut bench = Bench::start(MockServerApi::new());
    let link = bench.authenticate(0).await;

    link.push(kicked("sim-plane-001", Some("collision")));
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::Kicked { .. }))
        .await;

    let snapshot = bench.simulator.snapshot(0).await.unwrap();
    assert_eq!(
        snapshot.membership,
        MembershipState::Kicked {
            reason: "collision".into()
        }
    );
    assert_eq!(snapshot.auth_token, None);
    assert_eq!(snapshot.match_context, None);
    assert_eq!(snapshot.last_reason.as_deref(), Some("collision"));
    assert_eq!(snapshot.channel, ChannelState::Closed);
}

#[tokio::test]
async fn other_planes_kick_leaves_mobile_two_untouched() {
    let mut bench = Bench::start(MockServerApi::new());
    let link_one = bench.authenticate(0).await;
    let link_two = bench.authenticate(1).await;

    // The server tells everyone.
    link_one.push(kicked("sim-plane-001", Some("collision")));
    link_two.push(kicked("sim-plane-001", Some("collision")));

    bench.wait_for_status(0, "Kicked").await;
    // Frames on one link are handled in order, so this lands after the kick.
    link_two.push(ack());
    bench
        .wait_for(1, |e| matches!(e, SessionEvent::Diagnostic { .. }))
        .await;

    let two = bench.simulator.snapshot(1).await.unwrap();
    assert_eq!(two.membership, MembershipState::ChannelAuthenticated);
    assert_eq!(two.auth_token.as_deref(), Some("token-sim-plane-002-0002"));
}

#[tokio::test]
async fn missing_disqualify_reason_uses_placeholder() {
    let mut bench = Bench::start(MockServerApi::new());
    let link = bench.authenticate(1).await;

    link.push(disqualified("sim-plane-002", None));
    let event = bench
        .wait_for(1, |e| matches!(e, SessionEvent::Disqualified { .. }))
        .await;
    assert_eq!(
        event,
        SessionEvent::Disqualified {
            reason: "No reason provided".into()
        }
    );
}

// ════════════════════════════════════════════════════════════════════
// Broadcasts
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn poweron_on_another_channel_rearms_join() {
    let mut bench = Bench::start(MockServerApi::new());
    let link_one = bench.authenticate(0).await;
    let link_two = bench.authenticate(1).await;

    link_one.push(kicked("sim-plane-001", Some("collision")));
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::Kicked { .. }))
        .await;

    // Mobile 1's own link may be gone; the poweron arrives through Mobile 2's.
    link_two.push(poweron("sim-plane-001"));
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::PoweredOn))
        .await;

    assert_eq!(bench.status(0).await, "Not Joined");
    assert_eq!(bench.status(1).await, "Authenticated");

    // A fresh join replaces the old link.
    let relinked = bench.authenticate(0).await;
    assert_eq!(bench.api.request_count(), 3);
    link_one.wait_until_closed().await;
    assert!(!relinked.is_closed());
}

#[tokio::test]
async fn broadcast_copies_from_every_link_apply_once() {
    let mut bench = Bench::start(MockServerApi::new());
    let link_one = bench.authenticate(0).await;
    let link_two = bench.authenticate(1).await;

    link_one.push(poweron("sim-plane-002"));
    bench
        .wait_for(1, |e| matches!(e, SessionEvent::PoweredOn))
        .await;

    // The same frame on Mobile 2's link, then an ack queued behind it.
    link_two.push(poweron("sim-plane-002"));
    link_two.push(ack());

    let mut repeated = 0;
    loop {
        let event = tokio::time::timeout(WAIT, bench.events.recv())
            .await
            .expect("timed out waiting for the trailing ack")
            .expect("event channel closed");
        match event {
            SimulatorEvent::Session {
                event: SessionEvent::PoweredOn,
                ..
            } => repeated += 1,
            SimulatorEvent::Session {
                slot: 1,
                event: SessionEvent::Diagnostic { .. },
            } => break,
            _ => {}
        }
    }
    assert_eq!(repeated, 0);

    let powered_on = bench
        .simulator
        .activity()
        .await
        .iter()
        .filter(|entry| entry.message.contains("powered on"))
        .count();
    assert_eq!(powered_on, 1);
}

#[tokio::test]
async fn match_created_resets_both_mobiles() {
    let mut bench = Bench::start(MockServerApi::new());
    let link_one = bench.authenticate(0).await;
    let _link_two = bench.authenticate(1).await;

    link_one.push(match_created());
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::MatchReset))
        .await;
    bench
        .wait_for(1, |e| matches!(e, SessionEvent::MatchReset))
        .await;

    for snapshot in bench.simulator.snapshots().await {
        assert_eq!(snapshot.membership, MembershipState::NotJoined);
        assert_eq!(snapshot.auth_token, None);
    }
}

// ════════════════════════════════════════════════════════════════════
// Channel lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn match_end_keeps_credentials_until_next_join() {
    let mut bench = Bench::start(MockServerApi::new());
    let link = bench.authenticate(0).await;

    link.push(match_end());
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::MatchEnded))
        .await;

    let snapshot = bench.simulator.snapshot(0).await.unwrap();
    assert_eq!(snapshot.membership, MembershipState::MatchEnded);
    assert_eq!(snapshot.channel, ChannelState::Closed);
    assert!(snapshot.auth_token.is_some());

    bench.simulator.join(0).unwrap();
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::JoinStarted { .. }))
        .await;
    assert_eq!(bench.simulator.snapshot(0).await.unwrap().auth_token, None);
}

#[tokio::test]
async fn rejoin_without_channel_ignores_previous_link() {
    let mut bench = Bench::start(MockServerApi::new());
    let old_link = bench.authenticate(0).await;

    old_link.push(match_end());
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::MatchEnded))
        .await;

    bench.api.set_offers_channel(false);
    bench.simulator.join(0).unwrap();
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::Joined { .. }))
        .await;
    old_link.wait_until_closed().await;

    // Late frames from the previous match must not reach the new membership.
    old_link.push(match_end());
    old_link.push(kicked("sim-plane-001", Some("late")));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let snapshot = bench.simulator.snapshot(0).await.unwrap();
    assert_eq!(snapshot.membership, MembershipState::Joined);
    assert_eq!(
        snapshot.auth_token.as_deref(),
        Some("token-sim-plane-001-0002")
    );
    assert!(!bench.links.has_pending());
}

#[tokio::test]
async fn server_close_falls_back_to_joined() {
    let mut bench = Bench::start(MockServerApi::new());
    let link = bench.authenticate(0).await;

    link.hang_up();
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::ChannelClosed { .. }))
        .await;

    let snapshot = bench.simulator.snapshot(0).await.unwrap();
    assert_eq!(snapshot.membership, MembershipState::Joined);
    assert_eq!(snapshot.channel, ChannelState::Closed);
    assert!(snapshot.auth_token.is_some());
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_ignored() {
    let mut bench = Bench::start(MockServerApi::new());
    let link = bench.authenticate(0).await;

    link.push("{not json");
    link.push(r#"{"tag":"plane:kicked","data":{}}"#);
    link.push(r#"{"tag":"match:paused"}"#);

    bench
        .wait_for(0, |e| matches!(e, SessionEvent::Malformed { .. }))
        .await;
    bench
        .wait_for(0, |e| matches!(e, SessionEvent::Malformed { .. }))
        .await;
    let event = bench
        .wait_for(0, |e| matches!(e, SessionEvent::UnknownTag { .. }))
        .await;
    assert_eq!(
        event,
        SessionEvent::UnknownTag {
            tag: "match:paused".into()
        }
    );
    assert_eq!(bench.status(0).await, "Authenticated");
}

#[tokio::test]
async fn match_updates_are_forwarded() {
    let mut bench = Bench::start(MockServerApi::new());
    let link = bench.authenticate(0).await;

    link.push(r#"{"tag":"match:update","data":{"timeLeft":42}}"#);
    let event = bench
        .wait_for(0, |e| matches!(e, SessionEvent::MatchUpdate(_)))
        .await;
    assert_eq!(event, SessionEvent::MatchUpdate(json!({ "timeLeft": 42 })));
}

#[tokio::test]
async fn shutdown_closes_links_and_stops() {
    let mut bench = Bench::start(MockServerApi::new());
    let link = bench.authenticate(0).await;

    bench.simulator.shutdown().await;
    assert!(link.is_closed());
    assert!(!bench.simulator.is_running());

    let mut stopped = false;
    while let Some(event) = bench.events.recv().await {
        if matches!(event, SimulatorEvent::Stopped { .. }) {
            stopped = true;
        }
    }
    assert!(stopped, "Stopped must be the last event delivered");
}

#[tokio::test]
async fn debug_queries_return_server_json() {
    let bench = Bench::start(MockServerApi::new());
    let state = bench.simulator.fetch_match_state().await.unwrap();
    assert_eq!(state["status"], "waiting");
    let planes = bench.simulator.fetch_planes().await.unwrap();
    assert_eq!(planes[0]["planeId"], "sim-plane-001");

    let activity = bench.simulator.activity().await;
    assert_eq!(activity[0].message, "Fetched planes and scores");
    assert_eq!(activity[1].message, "Fetched match state");
}
