//! Transport implementations for the match event channel.
//!
//! | Feature                | Transport              | Connector              |
//! |------------------------|------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] | [`WebSocketConnector`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), aeroduel_mobile_sim::error::ChannelError> {
//! use aeroduel_mobile_sim::{Transport, WebSocketTransport};
//!
//! let mut ws = WebSocketTransport::connect("ws://aeroduel.local:45045/ws").await?;
//! ws.send(r#"{"tag":"hello","role":"client","clientId":"u","authToken":"t"}"#.to_string())
//!     .await?;
//!
//! if let Some(Ok(frame)) = ws.recv().await {
//!     println!("server said: {frame}");
//! }
//!
//! ws.close().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
