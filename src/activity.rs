//! Bounded, newest-first activity log shown to the observer.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::session::SessionEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    /// Slot label (`"Mobile 1"`) or `"Debug"`.
    pub source: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

/// Keeps the most recent `capacity` entries, newest first.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl ActivityLog {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(
        &mut self,
        source: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) {
        self.entries.push_front(ActivityEntry {
            source: source.into(),
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        });
        self.entries.truncate(self.capacity);
    }

    /// Log a session event, if it is one the observer cares about.
    pub fn record(&mut self, source: &str, display_name: &str, event: &SessionEvent) {
        if let Some((message, severity)) = describe(display_name, event) {
            self.push(source, message, severity);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<ActivityEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Human-readable line for a session event. `None` for events that are only
/// traced.
fn describe(name: &str, event: &SessionEvent) -> Option<(String, Severity)> {
    use Severity::{Error, Info, Success};

    let line = match event {
        SessionEvent::JoinStarted { display_name } => {
            (format!("{display_name} requesting to join..."), Info)
        }
        SessionEvent::Joined { token_preview, .. } => (
            format!("{name} joined match successfully! Token: {token_preview}"),
            Success,
        ),
        SessionEvent::JoinFailed { reason } => (format!("Join failed: {reason}"), Error),
        SessionEvent::ChannelConnecting { target } => {
            (format!("Connecting to event channel at {target}"), Info)
        }
        SessionEvent::ChannelOpened => ("Event channel open".to_string(), Info),
        SessionEvent::HandshakeSent => ("Hello sent".to_string(), Info),
        SessionEvent::Authenticated => ("Authenticated on event channel".to_string(), Success),
        SessionEvent::ChannelClosed { reason } => match reason {
            Some(reason) => (format!("Event channel closed: {reason}"), Info),
            None => ("Event channel closed".to_string(), Info),
        },
        SessionEvent::ChannelFailed { reason } => {
            (format!("Event channel error: {reason}"), Error)
        }
        SessionEvent::Kicked { reason } => (format!("{name} was kicked: {reason}"), Error),
        SessionEvent::Disqualified { reason } => {
            (format!("{name} was disqualified: {reason}"), Error)
        }
        SessionEvent::PoweredOn => (format!("{name} powered on, ready to join again"), Success),
        SessionEvent::MatchEnded => ("Match ended".to_string(), Info),
        SessionEvent::MatchReset => ("New match created, session reset".to_string(), Info),
        SessionEvent::MatchUpdate(data) => (format!("Match update: {data}"), Info),
        SessionEvent::PlaneHit(data) => (format!("Plane hit: {data}"), Info),
        SessionEvent::Malformed { detail } => {
            (format!("Ignored malformed message: {detail}"), Error)
        }
        SessionEvent::UnknownTag { tag } => (format!("Unknown event: {tag}"), Info),
        SessionEvent::EntityNotice { .. } | SessionEvent::Diagnostic { .. } => return None,
    };
    Some(line)
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
    fn keeps_most_recent_newest_first() {
        let mut log = ActivityLog::new(3);
        for i in 0..5 {
            log.push("Mobile 1", format!("entry {i}"), Severity::Info);
        }
        let messages: Vec<_> = log.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["entry 4", "entry 3", "entry 2"]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut log = ActivityLog::new(0);
        log.push("a", "one", Severity::Info);
        log.push("a", "two", Severity::Info);
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.to_vec()[0].message, "two");
    }

    #[test]
    fn join_outcomes_are_described() {
        let mut log = ActivityLog::new(20);
        log.record(
            "Mobile 1",
            "Foxtrot-4",
            &SessionEvent::Joined {
                match_id: Some("m1".into()),
                token_preview: "tok12345...".into(),
            },
        );
        log.record(
            "Mobile 2",
            "Delta-7",
            &SessionEvent::JoinFailed {
                reason: "Match full".into(),
            },
        );

        let entries = log.to_vec();
        assert_eq!(entries[0].message, "Join failed: Match full");
        assert_eq!(entries[0].severity, Severity::Error);
        assert_eq!(
            entries[1].message,
            "Foxtrot-4 joined match successfully! Token: tok12345..."
        );
        assert_eq!(entries[1].source, "Mobile 1");
    }

    #[test]
    fn diagnostics_are_not_logged() {
        let mut log = ActivityLog::new(20);
        log.record(
            "Mobile 1",
            "Foxtrot-4",
            &SessionEvent::Diagnostic {
                message: "noise".into(),
            },
        );
        assert!(log.is_empty());
    }
}
