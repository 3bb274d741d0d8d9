//! Ordered collection of sessions and event routing between them.
//!
//! Sessions never reference each other. The only cross-session step is
//! [`SessionRegistry::dispatch`] applying a broadcast event (`plane:poweron`,
//! `match:created`) to every session in registration order.
//!
//! The server sends a broadcast down every live link, so the same frame
//! usually arrives once per session. [`BroadcastFilter`] lets the first copy
//! through and drops the rest.

use std::collections::BTreeSet;

use tracing::debug;

use crate::channel::Generation;
use crate::config::SlotConfig;
use crate::protocol::InboundEvent;
use crate::session::{apply_broadcast_event, Session};

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Vec<Session>,
}

impl SessionRegistry {
    /// One session per slot, in slot order.
    pub fn from_slots(slots: &[SlotConfig]) -> Self {
        Self {
            sessions: slots.iter().map(Session::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&Session> {
        self.sessions.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Session> {
        self.sessions.get_mut(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.iter_mut()
    }

    pub fn slot_of_client(&self, client_id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.client_id() == client_id)
    }

    /// Route an event that arrived on `from_slot`'s channel.
    ///
    /// Broadcast events are applied to every session in registration order;
    /// everything else goes to the receiving session only. Returns the slots
    /// whose sessions were touched.
    pub fn dispatch(&mut self, from_slot: usize, event: &InboundEvent) -> Vec<usize> {
        if event.is_broadcast() {
            debug!(from_slot, tag = event.tag(), "broadcasting to all sessions");
            for session in &mut self.sessions {
                *session = apply_broadcast_event(session, event);
            }
            return (0..self.sessions.len()).collect();
        }

        match self.sessions.get_mut(from_slot) {
            Some(session) => {
                session.handle_event(event);
                vec![from_slot]
            }
            None => {
                debug!(from_slot, tag = event.tag(), "event for unknown slot dropped");
                Vec::new()
            }
        }
    }
}

/// Identifies one link: the slot and the channel generation.
pub type LinkId = (usize, Generation);

/// Collapses the per-link copies of one broadcast frame.
///
/// When a broadcast is admitted, every other link that was open at that
/// moment owes one copy. A frame equal to the admitted one that arrives on a
/// link still owing it is a copy; anything else is a new broadcast.
#[derive(Debug, Default)]
pub struct BroadcastFilter {
    last: Option<(InboundEvent, BTreeSet<LinkId>)>,
}

impl BroadcastFilter {
    /// Whether the broadcast `event` received on `link` should be applied.
    /// `live` lists the links that are open.
    pub fn admit(&mut self, link: LinkId, event: &InboundEvent, live: &[LinkId]) -> bool {
        let copy = match self.last.as_mut() {
            Some((last, owing)) if *last == *event => owing.remove(&link),
            _ => false,
        };
        if !copy {
            let owing: BTreeSet<LinkId> = live.iter().copied().filter(|l| *l != link).collect();
            self.last = Some((event.clone(), owing));
        }
        if self.last.as_ref().is_some_and(|(_, owing)| owing.is_empty()) {
            self.last = None;
        }
        !copy
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
    use crate::protocol::{JoinResponse, PlaneNotice};
    use crate::session::{MembershipState, SessionAction, SessionEvent};
    use serde_json::json;

    fn two_mobiles() -> SessionRegistry {
        SessionRegistry::from_slots(&crate::config::default_slots())
    }

    fn authenticate(registry: &mut SessionRegistry, slot: usize) {
        let session = registry.get_mut(slot).unwrap();
        let actions = session.start_join();
        let [SessionAction::StartJoin { attempt, .. }] = actions.as_slice() else {
            panic!("join did not start");
        };
        let attempt = *attempt;
        session.join_succeeded(
            attempt,
            JoinResponse {
                auth_token: format!("token-{slot}"),
                match_id: Some("m1".into()),
                ws_url: Some("ws://x".into()),
            },
        );
        session.channel_opened();
        session.handle_event(&InboundEvent::SystemAck);
        session.drain_events();
    }

    #[test]
    fn lookup_by_slot_and_client() {
        let registry = two_mobiles();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.slot_of_client("sim-user-002"), Some(1));
        assert_eq!(registry.slot_of_client("nobody"), None);
        assert_eq!(registry.get(0).unwrap().entity_id(), "sim-plane-001");
        assert!(registry.get(2).is_none());
    }

    #[test]
    fn kick_goes_to_receiving_session_only() {
        let mut registry = two_mobiles();
        authenticate(&mut registry, 0);
        authenticate(&mut registry, 1);

        let touched = registry.dispatch(
            1,
            &InboundEvent::PlaneKicked(PlaneNotice::new("sim-plane-002", Some("collision"))),
        );
        assert_eq!(touched, vec![1]);
        assert_eq!(
            registry.get(0).unwrap().membership(),
            &MembershipState::ChannelAuthenticated
        );
        assert!(registry.get(0).unwrap().pending_events().is_empty());
        assert_eq!(
            registry.get(1).unwrap().membership(),
            &MembershipState::Kicked {
                reason: "collision".into()
            }
        );
    }

    #[test]
    fn match_created_resets_every_session() {
        let mut registry = two_mobiles();
        authenticate(&mut registry, 0);
        authenticate(&mut registry, 1);

        let touched = registry.dispatch(0, &InboundEvent::MatchCreated(json!({"matchId": "m2"})));
        assert_eq!(touched, vec![0, 1]);
        for session in registry.iter() {
            assert_eq!(session.membership(), &MembershipState::NotJoined);
            assert_eq!(session.auth_token(), None);
            assert!(session.is_consistent());
        }
    }

    #[test]
    fn poweron_reaches_owner_through_another_channel() {
        let mut registry = two_mobiles();
        authenticate(&mut registry, 0);
        authenticate(&mut registry, 1);

        // Delivered on Mobile 1's channel, addressed to Mobile 2's plane.
        registry.dispatch(
            0,
            &InboundEvent::PlanePowerOn(PlaneNotice::new("sim-plane-002", None)),
        );

        assert_eq!(
            registry.get(0).unwrap().membership(),
            &MembershipState::ChannelAuthenticated
        );
        assert_eq!(
            registry.get(1).unwrap().membership(),
            &MembershipState::NotJoined
        );
        assert_eq!(
            registry.get_mut(1).unwrap().drain_events(),
            vec![SessionEvent::PoweredOn]
        );
    }

    #[test]
    fn unknown_slot_is_ignored() {
        let mut registry = two_mobiles();
        assert!(registry.dispatch(9, &InboundEvent::SystemAck).is_empty());
    }

    fn poweron(plane_id: &str) -> InboundEvent {
        InboundEvent::PlanePowerOn(PlaneNotice::new(plane_id, None))
    }

    const LIVE: [LinkId; 2] = [(0, 1), (1, 2)];

    #[test]
    fn broadcast_copies_on_other_links_are_dropped() {
        let mut filter = BroadcastFilter::default();

        assert!(filter.admit((0, 1), &poweron("sim-plane-001"), &LIVE));
        assert!(!filter.admit((1, 2), &poweron("sim-plane-001"), &LIVE));

        // Both links delivered it, so the same frame later is a new power-on.
        assert!(filter.admit((1, 2), &poweron("sim-plane-001"), &LIVE));
    }

    #[test]
    fn repeat_on_the_same_link_is_a_new_broadcast() {
        let mut filter = BroadcastFilter::default();

        assert!(filter.admit((0, 1), &poweron("sim-plane-001"), &LIVE));
        assert!(filter.admit((0, 1), &poweron("sim-plane-001"), &LIVE));
        assert!(!filter.admit((1, 2), &poweron("sim-plane-001"), &LIVE));
    }

    #[test]
    fn different_broadcasts_are_all_admitted() {
        let mut filter = BroadcastFilter::default();

        assert!(filter.admit((0, 1), &poweron("sim-plane-001"), &LIVE));
        assert!(filter.admit((1, 2), &poweron("sim-plane-002"), &LIVE));
        assert!(filter.admit(
            (0, 1),
            &InboundEvent::MatchCreated(json!({ "matchId": "m2" })),
            &LIVE
        ));
    }

    #[test]
    fn link_opened_later_owes_no_copy() {
        let mut filter = BroadcastFilter::default();

        assert!(filter.admit((0, 1), &poweron("sim-plane-002"), &LIVE));
        // Slot 1 rejoined on a new channel before its copy arrived.
        assert!(filter.admit((1, 3), &poweron("sim-plane-002"), &[(0, 1), (1, 3)]));
    }

    #[test]
    fn single_live_link_never_filters() {
        let mut filter = BroadcastFilter::default();

        assert!(filter.admit((0, 1), &poweron("sim-plane-002"), &[(0, 1)]));
        assert!(filter.admit((0, 1), &poweron("sim-plane-002"), &[(0, 1)]));
    }
}
