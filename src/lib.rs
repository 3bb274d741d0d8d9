//! # Aeroduel Mobile Simulator
//!
//! Simulated mobile clients for exercising an Aeroduel game server's join
//! endpoint and match event stream without real phones.
//!
//! Each simulated client joins over HTTP (`POST /api/join-match`), opens the
//! event channel it was handed, introduces itself with a `hello` frame and
//! then follows the server's events (acknowledgement, kicks,
//! disqualifications, power-on, match end) through a per-client session
//! state machine.
//!
//! ## Features
//!
//! - **Sans-io sessions**: [`Session`] is a pure state machine; all I/O lives
//!   in the [`MobileSimulator`] driver
//! - **Transport-agnostic**: implement [`Transport`] and [`Connector`] for any
//!   backend
//! - **WebSocket built-in**: the default `transport-websocket` feature
//!   provides [`WebSocketConnector`]
//! - **Observable**: typed [`SimulatorEvent`]s, session snapshots and a
//!   bounded activity log
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use aeroduel_mobile_sim::{MobileSimulator, SimulatorConfig, SimulatorEvent};
//!
//! let (simulator, mut events) = MobileSimulator::start_default(SimulatorConfig::default())?;
//! simulator.join(0)?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

pub mod activity;
pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod simulator;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use activity::{ActivityEntry, ActivityLog, Severity};
pub use api::{HttpMatchServer, MatchServerApi};
pub use config::{SimulatorConfig, SlotConfig};
pub use error::{ChannelError, JoinError, MalformedMessage, QueryError, SimulatorError};
pub use event::SimulatorEvent;
pub use protocol::{ClientMessage, InboundEvent, JoinRequest, JoinResponse, PlaneNotice};
pub use registry::SessionRegistry;
pub use session::{
    apply_broadcast_event, ChannelState, MatchContext, MembershipState, Session, SessionAction,
    SessionEvent, SessionSnapshot,
};
pub use simulator::MobileSimulator;
pub use transport::{Connector, Transport};

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
