//! Events delivered to the observer of a [`MobileSimulator`](crate::simulator::MobileSimulator).

use crate::session::SessionEvent;

/// What the observer receives on the channel returned by
/// [`MobileSimulator::start`](crate::simulator::MobileSimulator::start).
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatorEvent {
    /// Something happened to the session at `slot`.
    Session { slot: usize, event: SessionEvent },

    /// The simulator loop exited. Always the last event on the channel, and
    /// never dropped because of backpressure.
    Stopped { reason: Option<String> },
}

impl SimulatorEvent {
    /// The slot this event concerns, if any.
    pub fn slot(&self) -> Option<usize> {
        match self {
            Self::Session { slot, .. } => Some(*slot),
            Self::Stopped { .. } => None,
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

    #[test]
    fn slot_of_session_event() {
        let event = SimulatorEvent::Session {
            slot: 1,
            event: SessionEvent::ChannelOpened,
        };
        assert_eq!(event.slot(), Some(1));
        assert_eq!(SimulatorEvent::Stopped { reason: None }.slot(), None);
    }
}
