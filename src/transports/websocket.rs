//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries the match event channel over a WebSocket
//! connection, and [`WebSocketConnector`] is the [`Connector`] the simulator
//! uses by default to open one per successful join.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), aeroduel_mobile_sim::error::ChannelError> {
//! use aeroduel_mobile_sim::{Transport, WebSocketTransport};
//!
//! let mut transport = WebSocketTransport::connect("ws://aeroduel.local:45045/ws").await?;
//! if let Some(Ok(frame)) = transport.recv().await {
//!     println!("received: {frame}");
//! }
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::ChannelError;
use crate::transport::{Connector, Transport};

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before it
/// completes does not lose frames.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Connect`] if the URL is invalid or the
    /// connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self, ChannelError> {
        tracing::debug!(url = %url, "connecting to match channel");

        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        tracing::info!(url = %url, "match channel connected");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Like [`connect`](Self::connect), but fails with
    /// [`ChannelError::Timeout`] if the connection is not up within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Timeout`] if the deadline elapses, or any
    /// error that [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, ChannelError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| ChannelError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Some(Err(ChannelError::Receive(e.to_string()))),
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                // tungstenite queues the pong itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("received unexpected binary frame on match channel, skipping");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }
}

/// Opens a [`WebSocketTransport`] per connect request.
///
/// No timeout is applied unless one is configured with
/// [`with_timeout`](Self::with_timeout).
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    timeout: Option<Duration>,
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound every connection attempt by `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, target: &str) -> Result<Box<dyn Transport>, ChannelError> {
        let transport = match self.timeout {
            Some(timeout) => WebSocketTransport::connect_with_timeout(target, timeout).await?,
            None => WebSocketTransport::connect(target).await?,
        };
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
#[cfg(feature = "transport-websocket")]
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
    use tokio::net::TcpListener;

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_invalid_url() {
        let err = WebSocketTransport::connect("not-a-valid-url")
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Connect(_)));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Connect(_)));
    }

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn recv_receives_event_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Text(r#"{"tag":"system:ack"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let frame = transport.recv().await.unwrap().unwrap();
        assert_eq!(frame, r#"{"tag":"system:ack"}"#);
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_skips_binary_frames() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into()))
                .await
                .unwrap();
            ws.send(Message::Text("after_binary".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        let frame = transport.recv().await.unwrap().unwrap();
        assert_eq!(frame, "after_binary");
    }

    #[tokio::test]
    async fn send_after_close_returns_closed() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
    }

    #[tokio::test]
    async fn connector_delivers_hello_to_server() {
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<String>();
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = seen_tx.send(text.to_string());
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketConnector::new().connect(&url).await.unwrap();
        transport
            .send(r#"{"tag":"hello","role":"client","clientId":"u","authToken":"t"}"#.into())
            .await
            .unwrap();

        let seen = seen_rx.await.unwrap();
        assert!(seen.contains(r#""tag":"hello""#));
    }

    #[tokio::test]
    async fn connector_times_out() {
        // Non-routable address.
        let connector = WebSocketConnector::new().with_timeout(Duration::from_millis(50));
        let err = connector.connect("ws://192.0.2.1:1").await.err().unwrap();
        assert!(matches!(err, ChannelError::Timeout | ChannelError::Connect(_)));
    }
}
