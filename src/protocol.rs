//! Wire types for the Aeroduel mobile endpoints.
//!
//! Two surfaces are covered:
//!
//! - the HTTP join handshake (`POST /api/join-match`), whose bodies use the
//!   server's camelCase field names (`planeId`, `userId`, `playerName`);
//! - the match event channel, which carries JSON text frames of the form
//!   `{"tag": "<tag>", "data": <payload>}` from the server and a single
//!   `hello` frame from the client.
//!
//! Inbound frames are decoded in two steps. The envelope is parsed first, then
//! the tag is matched against the closed set in [`tags`]; anything outside the
//! set becomes [`InboundEvent::Unknown`] instead of an error, so new server
//! tags never break an older client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MalformedMessage;

/// Reason recorded when a kick or disqualification frame omits `reason`.
pub const DEFAULT_REASON: &str = "No reason provided";

/// Inbound frame tags understood by the session state machine.
pub mod tags {
    /// Server acknowledged the `hello` handshake.
    pub const SYSTEM_ACK: &str = "system:ack";
    /// Periodic match state update (scores, timers).
    pub const MATCH_UPDATE: &str = "match:update";
    /// A new match lobby replaced the current one.
    pub const MATCH_CREATED: &str = "match:created";
    /// A plane registered a hit.
    pub const PLANE_HIT: &str = "plane:hit";
    /// A plane was removed from the match.
    pub const PLANE_KICKED: &str = "plane:kicked";
    /// A plane was disqualified.
    pub const PLANE_DISQUALIFIED: &str = "plane:disqualified";
    /// A plane was powered on and is ready to join again.
    pub const PLANE_POWERON: &str = "plane:poweron";
    /// The match finished.
    pub const MATCH_END: &str = "match:end";
    /// Outbound handshake tag.
    pub const HELLO: &str = "hello";
}

// ── Join handshake ──────────────────────────────────────────────────

/// Body of `POST /api/join-match`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Entity (plane) the client controls.
    pub plane_id: String,
    /// Client slot identifier.
    pub user_id: String,
    /// Display name shown by the server.
    pub player_name: String,
}

/// Successful join response.
///
/// `match_id` and `ws_url` are optional on the wire. A response without a
/// channel target is still a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    /// Opaque credential presented in the channel handshake.
    pub auth_token: String,
    /// Match the client was admitted to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    /// Event channel URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
}

/// Body of a non-success join response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ── Outbound channel messages ───────────────────────────────────────

/// Role announced in the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    #[default]
    Client,
}

/// Messages the client sends over the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tag")]
pub enum ClientMessage {
    /// Handshake sent once, right after the channel opens.
    #[serde(rename = "hello", rename_all = "camelCase")]
    Hello {
        role: ClientRole,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        match_id: Option<String>,
        client_id: String,
        auth_token: String,
    },
}

impl ClientMessage {
    /// Build the `hello` handshake for a client.
    pub fn hello(
        match_id: Option<String>,
        client_id: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self::Hello {
            role: ClientRole::Client,
            match_id,
            client_id: client_id.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Serialize to the JSON text frame sent on the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ── Inbound channel events ──────────────────────────────────────────

/// Payload of the plane-scoped events (`plane:kicked`, `plane:disqualified`,
/// `plane:poweron`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneNotice {
    pub plane_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PlaneNotice {
    pub fn new(plane_id: impl Into<String>, reason: Option<&str>) -> Self {
        Self {
            plane_id: plane_id.into(),
            reason: reason.map(Into::into),
        }
    }

    /// The reason, or [`DEFAULT_REASON`] when the server sent none.
    pub fn reason_or_default(&self) -> &str {
        self.reason.as_deref().unwrap_or(DEFAULT_REASON)
    }
}

/// A decoded server frame.
///
/// Payloads the client never interprets (`match:update`, `plane:hit`, ...)
/// are kept as raw JSON so observers can display them unmodified.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    SystemAck,
    MatchUpdate(Value),
    MatchCreated(Value),
    PlaneHit(Value),
    PlaneKicked(PlaneNotice),
    PlaneDisqualified(PlaneNotice),
    PlanePowerOn(PlaneNotice),
    MatchEnd(Value),
    /// A tag outside the known set.
    Unknown {
        tag: String,
        data: Value,
    },
}

#[derive(Deserialize)]
struct RawFrame {
    tag: String,
    #[serde(default)]
    data: Value,
}

impl InboundEvent {
    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedMessage`] when the frame is not a JSON object with a
    /// string `tag`, or when a plane-scoped event lacks a valid `planeId`.
    pub fn parse(raw: &str) -> Result<Self, MalformedMessage> {
        let frame: RawFrame =
            serde_json::from_str(raw).map_err(|e| MalformedMessage::new(raw, e.to_string()))?;
        Self::from_parts(frame.tag, frame.data)
            .map_err(|e| MalformedMessage::new(raw, e.to_string()))
    }

    fn from_parts(tag: String, data: Value) -> Result<Self, serde_json::Error> {
        let event = match tag.as_str() {
            tags::SYSTEM_ACK => Self::SystemAck,
            tags::MATCH_UPDATE => Self::MatchUpdate(data),
            tags::MATCH_CREATED => Self::MatchCreated(data),
            tags::PLANE_HIT => Self::PlaneHit(data),
            tags::PLANE_KICKED => Self::PlaneKicked(serde_json::from_value(data)?),
            tags::PLANE_DISQUALIFIED => Self::PlaneDisqualified(serde_json::from_value(data)?),
            tags::PLANE_POWERON => Self::PlanePowerOn(serde_json::from_value(data)?),
            tags::MATCH_END => Self::MatchEnd(data),
            _ => Self::Unknown { tag, data },
        };
        Ok(event)
    }

    /// The wire tag of this event.
    pub fn tag(&self) -> &str {
        match self {
            Self::SystemAck => tags::SYSTEM_ACK,
            Self::MatchUpdate(_) => tags::MATCH_UPDATE,
            Self::MatchCreated(_) => tags::MATCH_CREATED,
            Self::PlaneHit(_) => tags::PLANE_HIT,
            Self::PlaneKicked(_) => tags::PLANE_KICKED,
            Self::PlaneDisqualified(_) => tags::PLANE_DISQUALIFIED,
            Self::PlanePowerOn(_) => tags::PLANE_POWERON,
            Self::MatchEnd(_) => tags::MATCH_END,
            Self::Unknown { tag, .. } => tag,
        }
    }

    /// Whether the event concerns every session rather than the one whose
    /// channel delivered it.
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::PlanePowerOn(_) | Self::MatchCreated(_))
    }

    /// Encode back into a wire frame. Used by scripted servers and tests.
    pub fn to_frame(&self) -> Value {
        let data = match self {
            Self::SystemAck => Value::Null,
            Self::MatchUpdate(data)
            | Self::MatchCreated(data)
            | Self::PlaneHit(data)
            | Self::MatchEnd(data)
            | Self::Unknown { data, .. } => data.clone(),
            Self::PlaneKicked(notice)
            | Self::PlaneDisqualified(notice)
            | Self::PlanePowerOn(notice) => serde_json::to_value(notice).unwrap_or(Value::Null),
        };
        if data.is_null() {
            serde_json::json!({ "tag": self.tag() })
        } else {
            serde_json::json!({ "tag": self.tag(), "data": data })
        }
    }
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

    #[test]
    fn hello_matches_wire_shape() {
        let hello = ClientMessage::hello(Some("m1".into()), "sim-user-001", "tok123");
        let value: Value = serde_json::from_str(&hello.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "tag": "hello",
                "role": "client",
                "matchId": "m1",
                "clientId": "sim-user-001",
                "authToken": "tok123",
            })
        );
    }

    #[test]
    fn hello_omits_missing_match_id() {
        let hello = ClientMessage::hello(None, "u", "t");
        let value = serde_json::to_value(&hello).unwrap();
        assert!(value.get("matchId").is_none());
    }

    #[test]
    fn ack_without_data_parses() {
        let event = InboundEvent::parse(r#"{"tag":"system:ack"}"#).unwrap();
        assert_eq!(event, InboundEvent::SystemAck);
    }

    #[test]
    fn kicked_reason_defaults() {
        let event =
            InboundEvent::parse(r#"{"tag":"plane:kicked","data":{"planeId":"p"}}"#).unwrap();
        let InboundEvent::PlaneKicked(notice) = event else {
            panic!("expected PlaneKicked, got {event:?}");
        };
        assert_eq!(notice.reason_or_default(), DEFAULT_REASON);
    }

    #[test]
    fn kicked_without_plane_id_is_malformed() {
        let err = InboundEvent::parse(r#"{"tag":"plane:kicked","data":{}}"#).unwrap_err();
        assert!(err.raw.contains("plane:kicked"));
    }

    #[test]
    fn frame_round_trips_through_parse() {
        let event = InboundEvent::PlaneDisqualified(PlaneNotice::new("p2", Some("cheating")));
        let reparsed = InboundEvent::parse(&event.to_frame().to_string()).unwrap();
        assert_eq!(reparsed, event);
    }

    #[test]
    fn broadcast_classification() {
        assert!(InboundEvent::PlanePowerOn(PlaneNotice::new("p", None)).is_broadcast());
        assert!(InboundEvent::MatchCreated(Value::Null).is_broadcast());
        assert!(!InboundEvent::PlaneKicked(PlaneNotice::new("p", None)).is_broadcast());
        assert!(!InboundEvent::SystemAck.is_broadcast());
    }
}
