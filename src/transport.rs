//! Transport abstraction for the match event channel.
//!
//! The [`Transport`] trait is a bidirectional text message channel between one
//! simulated client and the game server. The server speaks JSON text frames,
//! so every implementation must handle framing internally (WebSocket frames,
//! length-prefixed TCP, in-process queues for tests).
//!
//! Connection setup lives in the separate [`Connector`] trait because the
//! session only learns its channel target from the join response. The
//! simulator asks the connector for a fresh transport each time a join
//! succeeds.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use aeroduel_mobile_sim::error::ChannelError;
//! use aeroduel_mobile_sim::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), ChannelError> {
//!         // Send the JSON text frame
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
//!         // Receive the next JSON text frame, `None` on clean close
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), ChannelError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::ChannelError;

/// A bidirectional text message transport for the match event channel.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because the channel pump
/// polls it inside `tokio::select!` alongside outbound commands. Channel-based
/// implementations (e.g. wrapping `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Send`] if the frame could not be written, or
    /// [`ChannelError::Closed`] after [`close`](Transport::close).
    async fn send(&mut self, message: String) -> Result<(), ChannelError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the server closed the connection cleanly
    async fn recv(&mut self) -> Option<Result<String, ChannelError>>;

    /// Close the connection. Must be idempotent.
    async fn close(&mut self) -> Result<(), ChannelError>;
}

/// Opens event channel transports for a given target.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a connection to `target` (usually a `ws://` URL).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Connect`] or [`ChannelError::Timeout`] when no
    /// connection could be established.
    async fn connect(&self, target: &str) -> Result<Box<dyn Transport>, ChannelError>;
}
