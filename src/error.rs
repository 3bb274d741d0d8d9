//! Error types for the mobile simulator.
//!
//! Each concern has its own enum so that the session state machine can match
//! on exactly the failures it is expected to roll back from. [`SimulatorError`]
//! wraps them for the public handle API.

use thiserror::Error;

/// Failure of the one-shot join request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// The server answered with a non-success status. The reason is the
    /// server's `error` string, verbatim.
    #[error("{0}")]
    Rejected(String),

    /// The request never produced a usable answer (timeout, refused
    /// connection, unreadable response body).
    #[error("transport failure: {0}")]
    Transport(String),
}

impl JoinError {
    /// The text shown to the observer.
    pub fn reason(&self) -> &str {
        match self {
            Self::Rejected(reason) | Self::Transport(reason) => reason,
        }
    }
}

/// Errors raised by the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// A message was sent before the channel opened or after it closed.
    #[error("channel is not open")]
    NotOpen,

    /// The connection could not be established.
    #[error("channel connect error: {0}")]
    Connect(String),

    /// Failed to send a message through the transport.
    #[error("channel send error: {0}")]
    Send(String),

    /// Failed to receive a message from the transport.
    #[error("channel receive error: {0}")]
    Receive(String),

    /// The connection attempt did not finish in time.
    #[error("channel connect timed out")]
    Timeout,

    /// The transport has been closed.
    #[error("channel closed")]
    Closed,
}

/// An inbound frame that could not be decoded.
///
/// Always recovered locally: the frame is logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed message: {detail}")]
pub struct MalformedMessage {
    /// The frame as received.
    pub raw: String,
    /// Parser diagnostic.
    pub detail: String,
}

impl MalformedMessage {
    pub fn new(raw: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            detail: detail.into(),
        }
    }
}

/// Failure of one of the read-only debug queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("query {endpoint} failed: {detail}")]
pub struct QueryError {
    pub endpoint: String,
    pub detail: String,
}

/// Errors returned by the [`MobileSimulator`](crate::simulator::MobileSimulator) handle.
#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error(transparent)]
    Query(#[from] QueryError),

    /// No session is registered at this slot.
    #[error("no session at slot {0}")]
    UnknownSlot(usize),

    /// The display name can only change while the session is not joined.
    #[error("display name of slot {0} is locked while joined")]
    NameLocked(usize),

    /// The simulator loop has stopped.
    #[error("simulator is not running")]
    NotRunning,

    /// The configuration could not be turned into a working client.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A specialized [`Result`] type for simulator operations.
pub type Result<T> = std::result::Result<T, SimulatorError>;
