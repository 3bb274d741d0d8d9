//! Simulator configuration.
//!
//! # Example
//!
//! ```
//! use aeroduel_mobile_sim::config::{SimulatorConfig, SlotConfig};
//! use std::time::Duration;
//!
//! let config = SimulatorConfig::new("http://127.0.0.1:45045")
//!     .with_slots(vec![SlotConfig::new("Mobile 1", "sim-user-001", "sim-plane-001", "Foxtrot-4")])
//!     .with_request_timeout(Duration::from_secs(5));
//! assert_eq!(config.slots.len(), 1);
//! assert_eq!(config.request_timeout, Some(Duration::from_secs(5)));
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Default game server address on the local network.
pub const DEFAULT_SERVER_URL: &str = "http://aeroduel.local:45045";

/// Default capacity of the bounded observer event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default number of activity entries kept.
const DEFAULT_ACTIVITY_LOG_CAPACITY: usize = 20;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// One simulated client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotConfig {
    /// Label used in the activity log, e.g. `"Mobile 1"`.
    pub label: String,
    /// Sent as `userId` when joining and as `clientId` in the handshake.
    pub client_id: String,
    /// The plane this client controls. Plane-scoped events match on it.
    pub entity_id: String,
    pub display_name: String,
}

impl SlotConfig {
    pub fn new(
        label: impl Into<String>,
        client_id: impl Into<String>,
        entity_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            client_id: client_id.into(),
            entity_id: entity_id.into(),
            display_name: display_name.into(),
        }
    }

    /// A slot with a freshly generated client id.
    pub fn generated(
        label: impl Into<String>,
        entity_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self::new(
            label,
            format!("sim-user-{}", uuid::Uuid::new_v4()),
            entity_id,
            display_name,
        )
    }
}

/// The two mobiles of the original test bench.
pub fn default_slots() -> Vec<SlotConfig> {
    vec![
        SlotConfig::new("Mobile 1", "sim-user-001", "sim-plane-001", "Foxtrot-4"),
        SlotConfig::new("Mobile 2", "sim-user-002", "sim-plane-002", "Delta-7"),
    ]
}

/// Configuration for a [`MobileSimulator`](crate::simulator::MobileSimulator).
///
/// Every field has a default, so a partial file (JSON or any other serde
/// format) is enough:
///
/// ```
/// use aeroduel_mobile_sim::config::SimulatorConfig;
///
/// let config: SimulatorConfig =
///     serde_json::from_str(r#"{ "serverUrl": "http://10.0.0.5:45045" }"#).unwrap();
/// assert_eq!(config.server_url, "http://10.0.0.5:45045");
/// assert_eq!(config.slots.len(), 2);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulatorConfig {
    /// Base URL of the game server's HTTP API.
    pub server_url: String,
    /// Simulated clients, in registration order.
    pub slots: Vec<SlotConfig>,
    /// Capacity of the bounded event channel.
    ///
    /// When the observer falls behind, session events are dropped (with a
    /// warning logged) rather than blocking the simulator loop. The final
    /// `Stopped` event is always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Number of activity entries kept, newest first.
    ///
    /// Defaults to **20**. Values below 1 are clamped to 1.
    pub activity_log_capacity: usize,
    /// Time the simulator loop gets to close its channels on shutdown before
    /// it is aborted. Defaults to **1 second**.
    #[serde(skip)]
    pub shutdown_timeout: Duration,
    /// Per-request timeout of the HTTP client. `None` (the default) leaves
    /// requests unbounded.
    #[serde(skip)]
    pub request_timeout: Option<Duration>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            slots: default_slots(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            activity_log_capacity: DEFAULT_ACTIVITY_LOG_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            request_timeout: None,
        }
    }
}

impl SimulatorConfig {
    /// Default configuration pointed at `server_url`.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_slots(mut self, slots: Vec<SlotConfig>) -> Self {
        self.slots = slots;
        self
    }

    /// Append one slot after the existing ones.
    #[must_use]
    pub fn with_slot(mut self, slot: SlotConfig) -> Self {
        self.slots.push(slot);
        self
    }

    /// Defaults to **256**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Defaults to **20**. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_activity_log_capacity(mut self, capacity: usize) -> Self {
        self.activity_log_capacity = capacity.max(1);
        self
    }

    /// A zero timeout aborts the simulator loop without waiting.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
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
    fn defaults_describe_two_mobiles() {
        let config = SimulatorConfig::default();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.slots.len(), 2);
        assert_eq!(config.slots[0].entity_id, "sim-plane-001");
        assert_eq!(config.slots[1].display_name, "Delta-7");
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.activity_log_capacity, 20);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.request_timeout, None);
    }

    #[test]
    fn capacities_are_clamped_to_one() {
        let config = SimulatorConfig::default()
            .with_event_channel_capacity(0)
            .with_activity_log_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.activity_log_capacity, 1);
    }

    #[test]
    fn with_slot_appends() {
        let config = SimulatorConfig::default().with_slot(SlotConfig::generated(
            "Mobile 3",
            "sim-plane-003",
            "Echo-2",
        ));
        assert_eq!(config.slots.len(), 3);
        assert!(config.slots[2].client_id.starts_with("sim-user-"));
    }

    #[test]
    fn generated_client_ids_are_unique() {
        let a = SlotConfig::generated("a", "p", "n");
        let b = SlotConfig::generated("b", "p", "n");
        assert_ne!(a.client_id, b.client_id);
    }

    #[test]
    fn deserializes_slots_in_camel_case() {
        let config: SimulatorConfig = serde_json::from_str(
            r#"{
                "slots": [
                    { "label": "A", "clientId": "u1", "entityId": "p1", "displayName": "Ace" }
                ],
                "activityLogCapacity": 5
            }"#,
        )
        .unwrap();
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(
            config.slots,
            vec![SlotConfig::new("A", "u1", "p1", "Ace")]
        );
        assert_eq!(config.activity_log_capacity, 5);
    }
}
