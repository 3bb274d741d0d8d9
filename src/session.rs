//! Per-client match session state machine.
//!
//! A [`Session`] folds the join handshake and the server's event stream into
//! one coherent client state. It performs no I/O: every input method updates
//! the state, appends [`SessionEvent`]s to an internal feed and returns the
//! [`SessionAction`]s the caller must carry out. The only actions it ever
//! asks for are starting a join, opening a channel after a successful join,
//! and sending the handshake once that channel is open.
//!
//! ```text
//!  NotJoined ──start_join──▶ Joining ──join ok──▶ Joined ──opened──▶ ChannelLive ──ack──▶ ChannelAuthenticated
//!      ▲                        │                   │                    │                      │
//!      │                    join failed             └──── kicked / disqualified / match:end ────┘
//!      └────────────────────────┘                                        │
//!      ▲                                                                 ▼
//!      └──── poweron (own plane) / match:created ──── Kicked │ Disqualified │ MatchEnded
//! ```
//!
//! Plane-scoped events are matched against the session's `entity_id` only,
//! never against its client id or token.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::SlotConfig;
use crate::error::{ChannelError, JoinError, MalformedMessage};
use crate::protocol::{tags, ClientMessage, InboundEvent, JoinRequest, JoinResponse, PlaneNotice};

/// Counter distinguishing successive join attempts of one session.
pub type JoinAttempt = u64;

/// Match membership of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MembershipState {
    NotJoined,
    Joining,
    /// Admitted to the match; the channel may be connecting, closed or absent.
    Joined,
    /// Channel open, handshake sent.
    ChannelLive,
    /// Handshake acknowledged by the server.
    ChannelAuthenticated,
    Kicked {
        reason: String,
    },
    Disqualified {
        reason: String,
    },
    /// Credentials are kept for display until the next join.
    MatchEnded,
}

impl MembershipState {
    /// `Joined`, `ChannelLive` or `ChannelAuthenticated`.
    pub fn is_joined(&self) -> bool {
        matches!(
            self,
            Self::Joined | Self::ChannelLive | Self::ChannelAuthenticated
        )
    }

    /// Whether `start_join` would start a new join from this state.
    pub fn accepts_join(&self) -> bool {
        matches!(
            self,
            Self::NotJoined | Self::Kicked { .. } | Self::Disqualified { .. } | Self::MatchEnded
        )
    }

    /// Short status text for observers.
    pub fn status_label(&self) -> &'static str {
        match self {
            Self::NotJoined => "Not Joined",
            Self::Joining => "Joining...",
            Self::Joined => "Joined Match",
            Self::ChannelLive => "Channel Live",
            Self::ChannelAuthenticated => "Authenticated",
            Self::Kicked { .. } => "Kicked",
            Self::Disqualified { .. } => "Disqualified",
            Self::MatchEnded => "Match Ended",
        }
    }
}

/// State of the session's event channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// No channel was ever opened for the current membership.
    #[default]
    Disconnected,
    Connecting,
    Open,
    Authenticated,
    Closed,
}

impl ChannelState {
    /// `Connecting`, `Open` or `Authenticated`.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open | Self::Authenticated)
    }
}

/// Where the session was admitted and how to reach its event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchContext {
    pub match_id: Option<String>,
    pub channel_target: Option<String>,
}

/// Token and context are one value so they can only be set or cleared together.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Credentials {
    auth_token: String,
    match_context: MatchContext,
}

/// Work the caller must perform on behalf of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Issue the join request; report the outcome with the same `attempt`.
    StartJoin {
        attempt: JoinAttempt,
        request: JoinRequest,
    },
    /// Open (or replace) the session's event channel.
    OpenChannel { target: String },
    /// Send a message over the open channel.
    Send(ClientMessage),
}

/// Observer-facing record of what happened to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    JoinStarted {
        display_name: String,
    },
    Joined {
        match_id: Option<String>,
        token_preview: String,
    },
    JoinFailed {
        reason: String,
    },
    ChannelConnecting {
        target: String,
    },
    ChannelOpened,
    HandshakeSent,
    Authenticated,
    ChannelClosed {
        reason: Option<String>,
    },
    ChannelFailed {
        reason: String,
    },
    Kicked {
        reason: String,
    },
    Disqualified {
        reason: String,
    },
    PoweredOn,
    MatchEnded,
    /// A new match lobby superseded the current one.
    MatchReset,
    MatchUpdate(Value),
    PlaneHit(Value),
    /// A plane-scoped event that did not change this session.
    EntityNotice {
        tag: String,
        plane_id: String,
        reason: Option<String>,
    },
    Malformed {
        detail: String,
    },
    /// Tag outside the known set.
    UnknownTag {
        tag: String,
    },
    Diagnostic {
        message: String,
    },
}

/// Read-only copy of a session, published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub label: String,
    pub client_id: String,
    pub entity_id: String,
    pub display_name: String,
    pub membership: MembershipState,
    pub status: String,
    pub channel: ChannelState,
    pub auth_token: Option<String>,
    pub match_context: Option<MatchContext>,
    pub last_reason: Option<String>,
}

/// One simulated client's match session.
#[derive(Debug, Clone)]
pub struct Session {
    label: String,
    client_id: String,
    entity_id: String,
    display_name: String,
    credentials: Option<Credentials>,
    membership: MembershipState,
    channel: ChannelState,
    join_attempt: JoinAttempt,
    last_reason: Option<String>,
    feed: Vec<SessionEvent>,
}

impl Session {
    pub fn new(slot: &SlotConfig) -> Self {
        Self {
            label: slot.label.clone(),
            client_id: slot.client_id.clone(),
            entity_id: slot.entity_id.clone(),
            display_name: slot.display_name.clone(),
            credentials: None,
            membership: MembershipState::NotJoined,
            channel: ChannelState::Disconnected,
            join_attempt: 0,
            last_reason: None,
            feed: Vec::new(),
        }
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn membership(&self) -> &MembershipState {
        &self.membership
    }

    pub fn channel(&self) -> ChannelState {
        self.channel
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.auth_token.as_str())
    }

    pub fn match_context(&self) -> Option<&MatchContext> {
        self.credentials.as_ref().map(|c| &c.match_context)
    }

    /// Most recent join failure, kick or disqualification reason.
    pub fn last_reason(&self) -> Option<&str> {
        self.last_reason.as_deref()
    }

    /// Events recorded since the last [`drain_events`](Self::drain_events).
    pub fn pending_events(&self) -> &[SessionEvent] {
        &self.feed
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.feed)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            label: self.label.clone(),
            client_id: self.client_id.clone(),
            entity_id: self.entity_id.clone(),
            display_name: self.display_name.clone(),
            membership: self.membership.clone(),
            status: self.membership.status_label().to_string(),
            channel: self.channel,
            auth_token: self.auth_token().map(str::to_string),
            match_context: self.match_context().cloned(),
            last_reason: self.last_reason.clone(),
        }
    }

    /// Checks the membership/channel/credential invariants.
    ///
    /// - token and match context are present together, exactly while the
    ///   session is joined or showing a finished match;
    /// - a live channel implies a joined membership;
    /// - `ChannelLive` and `ChannelAuthenticated` agree with the channel state.
    pub fn is_consistent(&self) -> bool {
        let credentials_ok = match self.membership {
            MembershipState::Joined
            | MembershipState::ChannelLive
            | MembershipState::ChannelAuthenticated
            | MembershipState::MatchEnded => self
                .credentials
                .as_ref()
                .is_some_and(|c| !c.auth_token.is_empty()),
            _ => self.credentials.is_none(),
        };
        let channel_ok = !self.channel.is_live() || self.membership.is_joined();
        let substate_ok = match self.membership {
            MembershipState::ChannelLive => self.channel == ChannelState::Open,
            MembershipState::ChannelAuthenticated => self.channel == ChannelState::Authenticated,
            MembershipState::Joined => !matches!(
                self.channel,
                ChannelState::Open | ChannelState::Authenticated
            ),
            _ => true,
        };
        credentials_ok && channel_ok && substate_ok
    }

    // ── Inputs ──────────────────────────────────────────────────────

    /// Change the display name. Refused (returns `false`) while joining or joined.
    pub fn set_display_name(&mut self, name: impl Into<String>) -> bool {
        if self.membership == MembershipState::Joining || self.membership.is_joined() {
            return false;
        }
        self.display_name = name.into();
        true
    }

    /// Begin a join. A no-op while already joining or joined.
    pub fn start_join(&mut self) -> Vec<SessionAction> {
        if !self.membership.accepts_join() {
            debug!(
                client_id = %self.client_id,
                state = self.membership.status_label(),
                "start_join ignored"
            );
            return Vec::new();
        }

        // A finished match keeps its credentials for display until now.
        self.credentials = None;
        self.membership = MembershipState::Joining;
        self.join_attempt += 1;
        self.emit(SessionEvent::JoinStarted {
            display_name: self.display_name.clone(),
        });

        vec![SessionAction::StartJoin {
            attempt: self.join_attempt,
            request: JoinRequest {
                plane_id: self.entity_id.clone(),
                user_id: self.client_id.clone(),
                player_name: self.display_name.clone(),
            },
        }]
    }

    /// Apply a successful join response.
    pub fn join_succeeded(
        &mut self,
        attempt: JoinAttempt,
        response: JoinResponse,
    ) -> Vec<SessionAction> {
        if !self.is_current_attempt(attempt) {
            self.diagnostic(format!("ignoring stale join result (attempt {attempt})"));
            return Vec::new();
        }

        let match_context = MatchContext {
            match_id: response.match_id,
            channel_target: response.ws_url,
        };
        let target = match_context.channel_target.clone();
        let token_preview = token_preview(&response.auth_token);
        let match_id = match_context.match_id.clone();

        self.credentials = Some(Credentials {
            auth_token: response.auth_token,
            match_context,
        });
        self.membership = MembershipState::Joined;
        self.last_reason = None;
        info!(client_id = %self.client_id, plane_id = %self.entity_id, ?match_id, "joined match");
        self.emit(SessionEvent::Joined {
            match_id,
            token_preview,
        });

        match target {
            Some(target) => {
                self.channel = ChannelState::Connecting;
                self.emit(SessionEvent::ChannelConnecting {
                    target: target.clone(),
                });
                vec![SessionAction::OpenChannel { target }]
            }
            None => {
                self.channel = ChannelState::Disconnected;
                self.diagnostic("join response carried no channel target; joined without a channel");
                Vec::new()
            }
        }
    }

    /// Apply a failed join.
    pub fn join_failed(&mut self, attempt: JoinAttempt, error: &JoinError) {
        if !self.is_current_attempt(attempt) {
            self.diagnostic(format!("ignoring stale join failure (attempt {attempt})"));
            return;
        }
        let reason = error.reason().to_string();
        info!(client_id = %self.client_id, reason = %reason, "join failed");
        self.leave_match(MembershipState::NotJoined);
        self.last_reason = Some(reason.clone());
        self.emit(SessionEvent::JoinFailed { reason });
    }

    /// The channel requested after the join is open: send the handshake.
    pub fn channel_opened(&mut self) -> Vec<SessionAction> {
        if self.membership != MembershipState::Joined || self.channel != ChannelState::Connecting {
            self.diagnostic(format!(
                "channel opened while {}; ignoring",
                self.membership.status_label()
            ));
            return Vec::new();
        }
        let Some(credentials) = &self.credentials else {
            self.diagnostic("channel opened without credentials; ignoring");
            return Vec::new();
        };

        let hello = ClientMessage::hello(
            credentials.match_context.match_id.clone(),
            self.client_id.clone(),
            credentials.auth_token.clone(),
        );
        self.membership = MembershipState::ChannelLive;
        self.channel = ChannelState::Open;
        self.emit(SessionEvent::ChannelOpened);
        self.emit(SessionEvent::HandshakeSent);
        vec![SessionAction::Send(hello)]
    }

    /// The server closed the channel.
    pub fn channel_closed(&mut self, reason: Option<String>) {
        self.drop_channel();
        self.emit(SessionEvent::ChannelClosed { reason });
    }

    /// The channel failed. A failure while still connecting undoes the join.
    pub fn channel_failed(&mut self, error: &ChannelError) {
        let reason = error.to_string();
        if self.membership == MembershipState::Joined && self.channel == ChannelState::Connecting {
            info!(client_id = %self.client_id, reason = %reason, "channel connect failed");
            self.leave_match(MembershipState::NotJoined);
            self.last_reason = Some(reason.clone());
        } else {
            self.drop_channel();
        }
        self.emit(SessionEvent::ChannelFailed { reason });
    }

    /// A frame that could not be decoded. Logged, never acted on.
    pub fn record_malformed(&mut self, malformed: &MalformedMessage) {
        self.emit(SessionEvent::Malformed {
            detail: malformed.detail.clone(),
        });
    }

    /// Fold one server event into the session.
    pub fn handle_event(&mut self, event: &InboundEvent) {
        match event {
            InboundEvent::SystemAck => {
                if self.membership == MembershipState::ChannelLive {
                    self.membership = MembershipState::ChannelAuthenticated;
                    self.channel = ChannelState::Authenticated;
                    self.emit(SessionEvent::Authenticated);
                } else {
                    self.diagnostic(format!(
                        "{} received while {}; ignoring",
                        tags::SYSTEM_ACK,
                        self.membership.status_label()
                    ));
                }
            }
            InboundEvent::MatchUpdate(data) => self.emit(SessionEvent::MatchUpdate(data.clone())),
            InboundEvent::PlaneHit(data) => self.emit(SessionEvent::PlaneHit(data.clone())),
            InboundEvent::MatchCreated(_) => {
                self.leave_match(MembershipState::NotJoined);
                self.emit(SessionEvent::MatchReset);
            }
            InboundEvent::PlaneKicked(notice) => {
                self.on_removal(tags::PLANE_KICKED, notice, |reason| {
                    (
                        MembershipState::Kicked {
                            reason: reason.clone(),
                        },
                        SessionEvent::Kicked { reason },
                    )
                });
            }
            InboundEvent::PlaneDisqualified(notice) => {
                self.on_removal(tags::PLANE_DISQUALIFIED, notice, |reason| {
                    (
                        MembershipState::Disqualified {
                            reason: reason.clone(),
                        },
                        SessionEvent::Disqualified { reason },
                    )
                });
            }
            InboundEvent::PlanePowerOn(notice) => {
                if notice.plane_id == self.entity_id {
                    // Unconditional: re-arms the join from any state.
                    self.leave_match(MembershipState::NotJoined);
                    self.emit(SessionEvent::PoweredOn);
                } else {
                    self.entity_notice(tags::PLANE_POWERON, notice);
                }
            }
            InboundEvent::MatchEnd(_) => {
                if self.membership.is_joined() {
                    self.membership = MembershipState::MatchEnded;
                    // Non-live from here on; the server closes the transport.
                    if self.channel.is_live() {
                        self.channel = ChannelState::Closed;
                    }
                    self.emit(SessionEvent::MatchEnded);
                } else {
                    self.diagnostic(format!(
                        "{} received while {}; ignoring",
                        tags::MATCH_END,
                        self.membership.status_label()
                    ));
                }
            }
            InboundEvent::Unknown { tag, .. } => {
                info!(client_id = %self.client_id, tag = %tag, "unrecognized event tag");
                self.emit(SessionEvent::UnknownTag { tag: tag.clone() });
            }
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn is_current_attempt(&self, attempt: JoinAttempt) -> bool {
        self.membership == MembershipState::Joining && attempt == self.join_attempt
    }

    fn on_removal(
        &mut self,
        tag: &str,
        notice: &PlaneNotice,
        removed: impl FnOnce(String) -> (MembershipState, SessionEvent),
    ) {
        if notice.plane_id != self.entity_id || !self.membership.is_joined() {
            self.entity_notice(tag, notice);
            return;
        }
        let reason = notice.reason_or_default().to_string();
        info!(client_id = %self.client_id, plane_id = %self.entity_id, reason = %reason, "{tag}");
        let (next, event) = removed(reason.clone());
        self.leave_match(next);
        self.last_reason = Some(reason);
        self.emit(event);
    }

    /// Clear credentials and force the channel out of any live state.
    fn leave_match(&mut self, next: MembershipState) {
        self.credentials = None;
        if self.channel != ChannelState::Disconnected {
            self.channel = ChannelState::Closed;
        }
        debug!(
            client_id = %self.client_id,
            from = self.membership.status_label(),
            to = next.status_label(),
            "membership transition"
        );
        self.membership = next;
    }

    fn drop_channel(&mut self) {
        self.channel = ChannelState::Closed;
        if matches!(
            self.membership,
            MembershipState::ChannelLive | MembershipState::ChannelAuthenticated
        ) {
            self.membership = MembershipState::Joined;
        }
    }

    fn entity_notice(&mut self, tag: &str, notice: &PlaneNotice) {
        self.emit(SessionEvent::EntityNotice {
            tag: tag.to_string(),
            plane_id: notice.plane_id.clone(),
            reason: notice.reason.clone(),
        });
    }

    fn diagnostic(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(client_id = %self.client_id, "{message}");
        self.emit(SessionEvent::Diagnostic { message });
    }

    fn emit(&mut self, event: SessionEvent) {
        self.feed.push(event);
    }
}

/// Apply a broadcast event to a session, returning the updated session.
///
/// Broadcast events never produce actions, so the fold is pure.
pub fn apply_broadcast_event(session: &Session, event: &InboundEvent) -> Session {
    let mut next = session.clone();
    next.handle_event(event);
    next
}

fn token_preview(token: &str) -> String {
    let head: String = token.chars().take(8).collect();
    format!("{head}...")
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slot(client: &str, plane: &str) -> SlotConfig {
        SlotConfig::new("Mobile", client, plane, "Foxtrot-4")
    }

    fn response(token: &str, match_id: Option<&str>, ws_url: Option<&str>) -> JoinResponse {
        JoinResponse {
            auth_token: token.into(),
            match_id: match_id.map(Into::into),
            ws_url: ws_url.map(Into::into),
        }
    }

    fn kicked(plane: &str, reason: Option<&str>) -> InboundEvent {
        InboundEvent::PlaneKicked(PlaneNotice::new(plane, reason))
    }

    fn attempt_of(actions: &[SessionAction]) -> JoinAttempt {
        match actions {
            [SessionAction::StartJoin { attempt, .. }] => *attempt,
            other => panic!("expected a single StartJoin, got {other:?}"),
        }
    }

    /// Drive a session through join, open and ack.
    fn authenticated(client: &str, plane: &str) -> Session {
        let mut session = Session::new(&slot(client, plane));
        let attempt = attempt_of(&session.start_join());
        session.join_succeeded(attempt, response("tok123456789", Some("m1"), Some("ws://x")));
        session.channel_opened();
        session.handle_event(&InboundEvent::SystemAck);
        session.drain_events();
        session
    }

    /// One session per reachable membership/channel combination.
    fn every_state() -> Vec<Session> {
        let mut states = Vec::new();

        let fresh = Session::new(&slot("u", "plane-001"));
        states.push(fresh.clone());

        let mut joining = fresh.clone();
        let attempt = attempt_of(&joining.start_join());
        states.push(joining.clone());

        let mut no_channel = joining.clone();
        no_channel.join_succeeded(attempt, response("tok", Some("m1"), None));
        states.push(no_channel);

        let mut connecting = joining.clone();
        connecting.join_succeeded(attempt, response("tok", Some("m1"), Some("ws://x")));
        states.push(connecting.clone());

        let mut live = connecting.clone();
        live.channel_opened();
        states.push(live.clone());

        let mut auth = live.clone();
        auth.handle_event(&InboundEvent::SystemAck);
        states.push(auth.clone());

        let mut dropped = auth.clone();
        dropped.channel_closed(None);
        states.push(dropped);

        let mut kicked_state = auth.clone();
        kicked_state.handle_event(&kicked("plane-001", Some("collision")));
        states.push(kicked_state);

        let mut dq = live.clone();
        dq.handle_event(&InboundEvent::PlaneDisqualified(PlaneNotice::new(
            "plane-001", None,
        )));
        states.push(dq);

        let mut ended = auth;
        ended.handle_event(&InboundEvent::MatchEnd(Value::Null));
        states.push(ended);

        joining.join_failed(attempt, &JoinError::Rejected("Match full".into()));
        states.push(joining);

        states
    }

    fn every_event() -> Vec<InboundEvent> {
        vec![
            InboundEvent::SystemAck,
            InboundEvent::MatchUpdate(json!({"timeLeft": 30})),
            InboundEvent::MatchCreated(json!({"matchId": "m2"})),
            InboundEvent::PlaneHit(json!({"planeId": "plane-002"})),
            kicked("plane-001", Some("collision")),
            kicked("plane-002", None),
            InboundEvent::PlaneDisqualified(PlaneNotice::new("plane-001", None)),
            InboundEvent::PlanePowerOn(PlaneNotice::new("plane-001", None)),
            InboundEvent::PlanePowerOn(PlaneNotice::new("plane-002", None)),
            InboundEvent::MatchEnd(Value::Null),
            InboundEvent::Unknown {
                tag: "match:paused".into(),
                data: Value::Null,
            },
        ]
    }

    // ── Scenarios ───────────────────────────────────────────────────

    #[test]
    fn join_open_ack_reaches_authenticated() {
        let mut session = Session::new(&slot("sim-user-001", "plane-001"));
        let attempt = attempt_of(&session.start_join());
        assert_eq!(session.membership(), &MembershipState::Joining);

        let actions = session.join_succeeded(
            attempt,
            response("tok123456789", Some("m1"), Some("ws://x")),
        );
        assert_eq!(
            actions,
            vec![SessionAction::OpenChannel {
                target: "ws://x".into()
            }]
        );
        assert_eq!(session.channel(), ChannelState::Connecting);

        let actions = session.channel_opened();
        let [SessionAction::Send(hello)] = actions.as_slice() else {
            panic!("expected hello, got {actions:?}");
        };
        assert_eq!(
            serde_json::to_value(hello).unwrap(),
            json!({
                "tag": "hello",
                "role": "client",
                "matchId": "m1",
                "clientId": "sim-user-001",
                "authToken": "tok123456789",
            })
        );

        session.handle_event(&InboundEvent::SystemAck);
        assert_eq!(session.membership(), &MembershipState::ChannelAuthenticated);
        assert_eq!(session.channel(), ChannelState::Authenticated);
        assert!(session.is_consistent());
    }

    #[test]
    fn own_kick_clears_credentials_and_records_reason() {
        let mut session = authenticated("sim-user-001", "plane-001");
        session.handle_event(&kicked("plane-001", Some("collision")));

        assert_eq!(
            session.membership(),
            &MembershipState::Kicked {
                reason: "collision".into()
            }
        );
        assert_eq!(session.auth_token(), None);
        assert_eq!(session.match_context(), None);
        assert_eq!(session.last_reason(), Some("collision"));
        assert_eq!(session.channel(), ChannelState::Closed);
        assert_eq!(
            session.drain_events(),
            vec![SessionEvent::Kicked {
                reason: "collision".into()
            }]
        );
    }

    #[test]
    fn other_planes_kick_leaves_session_untouched() {
        let mut session = authenticated("sim-user-002", "plane-002");
        let before = session.snapshot();
        session.handle_event(&kicked("plane-001", Some("collision")));
        assert_eq!(session.snapshot(), before);
        assert!(matches!(
            session.drain_events().as_slice(),
            [SessionEvent::EntityNotice { plane_id, .. }] if plane_id == "plane-001"
        ));
    }

    #[test]
    fn kick_matches_entity_not_client_id() {
        // A client id that happens to equal the kicked plane id must not match.
        let mut session = authenticated("plane-001", "plane-009");
        session.handle_event(&kicked("plane-001", None));
        assert_eq!(session.membership(), &MembershipState::ChannelAuthenticated);
    }

    #[test]
    fn join_rejection_is_recorded_verbatim() {
        let mut session = Session::new(&slot("u", "plane-001"));
        let attempt = attempt_of(&session.start_join());
        session.join_failed(attempt, &JoinError::Rejected("Match full".into()));

        assert_eq!(session.membership(), &MembershipState::NotJoined);
        assert_eq!(session.auth_token(), None);
        assert_eq!(session.last_reason(), Some("Match full"));
        assert!(session
            .drain_events()
            .contains(&SessionEvent::JoinFailed {
                reason: "Match full".into()
            }));
    }

    #[test]
    fn missing_kick_reason_uses_placeholder() {
        let mut session = authenticated("u", "plane-001");
        session.handle_event(&kicked("plane-001", None));
        assert_eq!(session.last_reason(), Some(crate::protocol::DEFAULT_REASON));
    }

    // ── Join edge cases ─────────────────────────────────────────────

    #[test]
    fn start_join_is_idempotent_while_joining_or_joined() {
        let mut session = Session::new(&slot("u", "p"));
        assert_eq!(session.start_join().len(), 1);
        assert!(session.start_join().is_empty());

        let mut joined = authenticated("u", "p");
        assert!(joined.start_join().is_empty());
        assert_eq!(joined.membership(), &MembershipState::ChannelAuthenticated);
    }

    #[test]
    fn join_without_channel_target_stays_joined() {
        let mut session = Session::new(&slot("u", "p"));
        let attempt = attempt_of(&session.start_join());
        let actions = session.join_succeeded(attempt, response("tok", None, None));

        assert!(actions.is_empty());
        assert_eq!(session.membership(), &MembershipState::Joined);
        assert_eq!(session.channel(), ChannelState::Disconnected);
        assert_eq!(session.auth_token(), Some("tok"));
        assert!(session
            .drain_events()
            .iter()
            .any(|e| matches!(e, SessionEvent::Diagnostic { .. })));
    }

    #[test]
    fn stale_join_result_is_ignored() {
        let mut session = Session::new(&slot("u", "plane-001"));
        let first = attempt_of(&session.start_join());
        session.handle_event(&InboundEvent::PlanePowerOn(PlaneNotice::new(
            "plane-001", None,
        )));
        let second = attempt_of(&session.start_join());
        assert_ne!(first, second);

        assert!(session
            .join_succeeded(first, response("old", None, Some("ws://old")))
            .is_empty());
        assert_eq!(session.membership(), &MembershipState::Joining);

        session.join_succeeded(second, response("new", None, Some("ws://new")));
        assert_eq!(session.auth_token(), Some("new"));
    }

    #[test]
    fn rejoin_after_match_end_clears_retained_credentials() {
        let mut session = authenticated("u", "p");
        session.handle_event(&InboundEvent::MatchEnd(Value::Null));
        assert_eq!(session.membership(), &MembershipState::MatchEnded);
        assert_eq!(session.auth_token(), Some("tok123456789"));
        assert_eq!(session.channel(), ChannelState::Closed);

        assert_eq!(session.start_join().len(), 1);
        assert_eq!(session.auth_token(), None);
        assert!(session.is_consistent());
    }

    #[test]
    fn display_name_locked_while_joined() {
        let mut session = authenticated("u", "p");
        assert!(!session.set_display_name("Echo-1"));
        session.handle_event(&kicked("p", None));
        assert!(session.set_display_name("Echo-1"));
        assert_eq!(session.display_name(), "Echo-1");
    }

    // ── Channel lifecycle ───────────────────────────────────────────

    #[test]
    fn channel_close_falls_back_to_joined() {
        let mut session = authenticated("u", "p");
        session.channel_closed(Some("going away".into()));
        assert_eq!(session.membership(), &MembershipState::Joined);
        assert_eq!(session.channel(), ChannelState::Closed);
        assert!(session.auth_token().is_some());
        assert!(session.is_consistent());
    }

    #[test]
    fn connect_failure_rolls_back_join() {
        let mut session = Session::new(&slot("u", "p"));
        let attempt = attempt_of(&session.start_join());
        session.join_succeeded(attempt, response("tok", Some("m1"), Some("ws://x")));
        session.channel_failed(&ChannelError::Connect("refused".into()));

        assert_eq!(session.membership(), &MembershipState::NotJoined);
        assert_eq!(session.channel(), ChannelState::Closed);
        assert_eq!(session.auth_token(), None);
        assert_eq!(session.start_join().len(), 1);
    }

    #[test]
    fn late_open_after_reset_is_ignored() {
        let mut session = Session::new(&slot("u", "p"));
        let attempt = attempt_of(&session.start_join());
        session.join_succeeded(attempt, response("tok", Some("m1"), Some("ws://x")));
        session.handle_event(&InboundEvent::MatchCreated(Value::Null));
        assert_eq!(session.channel(), ChannelState::Closed);

        assert!(session.channel_opened().is_empty());
        assert_eq!(session.membership(), &MembershipState::NotJoined);
    }

    #[test]
    fn ack_outside_channel_live_is_ignored() {
        let mut session = Session::new(&slot("u", "p"));
        session.handle_event(&InboundEvent::SystemAck);
        assert_eq!(session.membership(), &MembershipState::NotJoined);
    }

    // ── Properties over every reachable state ───────────────────────

    #[test]
    fn every_transition_keeps_invariants() {
        for start in every_state() {
            assert!(start.is_consistent(), "inconsistent start {start:?}");
            for event in every_event() {
                let mut session = start.clone();
                session.handle_event(&event);
                assert!(
                    session.is_consistent(),
                    "{event:?} from {:?} left {session:?}",
                    start.membership()
                );
                assert_eq!(
                    session.auth_token().is_some(),
                    session.match_context().is_some()
                );
            }
            let mut closed = start.clone();
            closed.channel_closed(None);
            assert!(closed.is_consistent());
            let mut failed = start.clone();
            failed.channel_failed(&ChannelError::Receive("reset".into()));
            assert!(failed.is_consistent());
        }
    }

    #[test]
    fn own_poweron_resets_from_every_state() {
        let event = InboundEvent::PlanePowerOn(PlaneNotice::new("plane-001", None));
        for start in every_state() {
            let next = apply_broadcast_event(&start, &event);
            assert_eq!(next.membership(), &MembershipState::NotJoined);
            assert_eq!(next.auth_token(), None);
            assert!(!next.channel().is_live());
        }
    }

    #[test]
    fn match_created_resets_from_every_state() {
        let event = InboundEvent::MatchCreated(json!({}));
        for start in every_state() {
            let next = apply_broadcast_event(&start, &event);
            assert_eq!(next.membership(), &MembershipState::NotJoined);
            assert_eq!(next.match_context(), None);
        }
    }

    #[test]
    fn foreign_plane_events_never_change_state() {
        for start in every_state() {
            for event in [
                kicked("plane-002", Some("x")),
                InboundEvent::PlaneDisqualified(PlaneNotice::new("plane-002", None)),
                InboundEvent::PlanePowerOn(PlaneNotice::new("plane-002", None)),
            ] {
                let next = apply_broadcast_event(&start, &event);
                assert_eq!(next.membership(), start.membership());
                assert_eq!(next.channel(), start.channel());
                assert_eq!(next.auth_token(), start.auth_token());
            }
        }
    }

    #[test]
    fn unknown_tag_is_informational() {
        let mut session = authenticated("u", "p");
        session.handle_event(&InboundEvent::Unknown {
            tag: "match:paused".into(),
            data: Value::Null,
        });
        assert_eq!(session.membership(), &MembershipState::ChannelAuthenticated);
        assert_eq!(
            session.drain_events(),
            vec![SessionEvent::UnknownTag {
                tag: "match:paused".into()
            }]
        );
    }
}
