//! Owned per-session event channel.
//!
//! A [`ChannelHandle`] is the single transport resource a session holds. It
//! spawns a pump task that connects through a [`Connector`], then shuttles
//! frames between the transport and the simulator loop:
//!
//! ```text
//!   simulator loop ── send/close ──▶ pump task ──▶ Transport
//!        ▲                              │
//!        └──── ChannelEnvelope ─────────┘  (opened / message / closed / failed)
//! ```
//!
//! Every envelope carries the slot and the handle's generation. When a session
//! replaces its channel, the old handle is closed first and any envelope it
//! still produces carries a stale generation, which the loop drops.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ChannelError, MalformedMessage};
use crate::protocol::{ClientMessage, InboundEvent};
use crate::transport::{Connector, Transport};

/// Monotonic identifier distinguishing successive channels of one slot.
pub type Generation = u64;

/// Lifecycle notifications produced by a channel pump.
#[derive(Debug)]
pub enum ChannelSignal {
    /// The transport connected.
    Opened,
    /// A frame arrived. Undecodable frames are reported, never dropped silently.
    Message(Result<InboundEvent, MalformedMessage>),
    /// The server closed the connection.
    Closed { reason: Option<String> },
    /// Connecting, sending or receiving failed.
    Failed { error: ChannelError },
}

/// A [`ChannelSignal`] addressed to its owner.
#[derive(Debug)]
pub struct ChannelEnvelope {
    pub slot: usize,
    pub generation: Generation,
    pub signal: ChannelSignal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug)]
enum PumpCommand {
    Send(String),
    Close,
}

/// Handle to one event channel.
///
/// The handle's view of the link only changes when its owner calls
/// [`mark_open`](Self::mark_open), [`mark_closed`](Self::mark_closed) or
/// [`close`](Self::close), so it always agrees with the signals the owner has
/// processed so far.
#[derive(Debug)]
pub struct ChannelHandle {
    slot: usize,
    generation: Generation,
    state: LinkState,
    commands: mpsc::UnboundedSender<PumpCommand>,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    /// Start connecting to `target`. Signals are delivered on `signals`.
    pub fn connect(
        connector: Arc<dyn Connector>,
        target: impl Into<String>,
        slot: usize,
        generation: Generation,
        signals: mpsc::UnboundedSender<ChannelEnvelope>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(pump(
            connector,
            target.into(),
            slot,
            generation,
            command_rx,
            signals,
        ));

        Self {
            slot,
            generation,
            state: LinkState::Connecting,
            commands,
            task: Some(task),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn is_connecting(&self) -> bool {
        self.state == LinkState::Connecting
    }

    pub fn is_open(&self) -> bool {
        self.state == LinkState::Open
    }

    /// Record that the owner processed [`ChannelSignal::Opened`].
    pub fn mark_open(&mut self) {
        if self.state == LinkState::Connecting {
            self.state = LinkState::Open;
        }
    }

    /// Record that the owner processed a `Closed` or `Failed` signal.
    pub fn mark_closed(&mut self) {
        self.state = LinkState::Closed;
    }

    /// Queue a message for the server.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotOpen`] unless the channel is open, and
    /// [`ChannelError::Closed`] if the pump has already exited.
    pub fn send(&self, message: &ClientMessage) -> Result<(), ChannelError> {
        if self.state != LinkState::Open {
            return Err(ChannelError::NotOpen);
        }
        let json = message
            .to_json()
            .map_err(|e| ChannelError::Send(e.to_string()))?;
        self.commands
            .send(PumpCommand::Send(json))
            .map_err(|_| ChannelError::Closed)
    }

    /// Close the channel. Safe to call repeatedly and on a channel that never
    /// opened; a pending connect is abandoned.
    pub fn close(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        debug!(
            slot = self.slot,
            generation = self.generation,
            "closing match channel"
        );
        self.state = LinkState::Closed;
        // The pump may already be gone; nothing left to close then.
        let _ = self.commands.send(PumpCommand::Close);
    }

    /// Close the channel and wait for the pump to finish, aborting it once
    /// `deadline` passes.
    pub async fn close_by(mut self, deadline: Instant) {
        self.close();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!(
                    slot = self.slot,
                    generation = self.generation,
                    "channel pump did not exit within timeout; aborting"
                );
                task.abort();
            }
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        // Dropping `commands` already ends the pump; the explicit close keeps
        // the transport close graceful when the pump is mid-loop.
        self.close();
    }
}

/// Connects, then multiplexes outbound commands and inbound frames until
/// either side closes.
async fn pump(
    connector: Arc<dyn Connector>,
    target: String,
    slot: usize,
    generation: Generation,
    mut commands: mpsc::UnboundedReceiver<PumpCommand>,
    signals: mpsc::UnboundedSender<ChannelEnvelope>,
) {
    let emit = |signal: ChannelSignal| {
        if signals
            .send(ChannelEnvelope {
                slot,
                generation,
                signal,
            })
            .is_err()
        {
            debug!(slot, generation, "channel owner gone, dropping signal");
        }
    };

    let mut transport: Box<dyn Transport> = tokio::select! {
        connected = connector.connect(&target) => match connected {
            Ok(transport) => transport,
            Err(error) => {
                warn!(slot, generation, target = %target, "match channel connect failed: {error}");
                emit(ChannelSignal::Failed { error });
                return;
            }
        },
        // Anything arriving before the connection is up means the owner
        // closed or dropped the handle.
        _ = commands.recv() => {
            debug!(slot, generation, "connect abandoned by owner");
            return;
        }
    };

    emit(ChannelSignal::Opened);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(PumpCommand::Send(text)) => {
                    if let Err(error) = transport.send(text).await {
                        warn!(slot, generation, "match channel send failed: {error}");
                        let _ = transport.close().await;
                        emit(ChannelSignal::Failed { error });
                        break;
                    }
                }
                Some(PumpCommand::Close) | None => {
                    if let Err(error) = transport.close().await {
                        debug!(slot, generation, "match channel close error: {error}");
                    }
                    break;
                }
            },

            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => emit(ChannelSignal::Message(InboundEvent::parse(&text))),
                Some(Err(error)) => {
                    warn!(slot, generation, "match channel receive failed: {error}");
                    emit(ChannelSignal::Failed { error });
                    break;
                }
                None => {
                    debug!(slot, generation, "match channel closed by server");
                    emit(ChannelSignal::Closed { reason: None });
                    break;
                }
            },
        }
    }

    debug!(slot, generation, "channel pump exited");
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
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn in_one_second() -> Instant {
        Instant::now() + Duration::from_secs(1)
    }

    struct QueueTransport {
        incoming: mpsc::UnboundedReceiver<String>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for QueueTransport {
        async fn send(&mut self, message: String) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
            self.incoming.recv().await.map(Ok)
        }

        async fn close(&mut self) -> Result<(), ChannelError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Hands out one pre-built transport, then refuses.
    struct OneShotConnector {
        transport: StdMutex<Option<QueueTransport>>,
    }

    #[async_trait]
    impl Connector for OneShotConnector {
        async fn connect(&self, _target: &str) -> Result<Box<dyn Transport>, ChannelError> {
            match self.transport.lock().unwrap().take() {
                Some(t) => Ok(Box::new(t)),
                None => Err(ChannelError::Connect("refused".into())),
            }
        }
    }

    /// Connects at once, but its transport never finishes closing.
    struct StuckCloseConnector;

    struct StuckCloseTransport;

    #[async_trait]
    impl Transport for StuckCloseTransport {
        async fn send(&mut self, _message: String) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> Result<(), ChannelError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl Connector for StuckCloseConnector {
        async fn connect(&self, _target: &str) -> Result<Box<dyn Transport>, ChannelError> {
            Ok(Box::new(StuckCloseTransport))
        }
    }

    /// Never finishes connecting.
    struct HangingConnector;

    #[async_trait]
    impl Connector for HangingConnector {
        async fn connect(&self, _target: &str) -> Result<Box<dyn Transport>, ChannelError> {
            std::future::pending().await
        }
    }

    #[allow(clippy::type_complexity)]
    fn queue_connector() -> (
        Arc<dyn Connector>,
        mpsc::UnboundedSender<String>,
        Arc<StdMutex<Vec<String>>>,
        Arc<AtomicBool>,
    ) {
        let (push, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = QueueTransport {
            incoming,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        let connector = Arc::new(OneShotConnector {
            transport: StdMutex::new(Some(transport)),
        });
        (connector, push, sent, closed)
    }

    async fn next_signal(rx: &mut mpsc::UnboundedReceiver<ChannelEnvelope>) -> ChannelEnvelope {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for channel signal")
            .expect("signal channel closed")
    }

    #[tokio::test]
    async fn send_before_open_is_rejected() {
        let (signals, _rx) = mpsc::unbounded_channel();
        let handle = ChannelHandle::connect(Arc::new(HangingConnector), "ws://x", 0, 1, signals);
        let err = handle
            .send(&ClientMessage::hello(None, "u", "t"))
            .unwrap_err();
        assert_eq!(err, ChannelError::NotOpen);
    }

    #[tokio::test]
    async fn opened_then_messages_in_order() {
        let (connector, push, sent, _closed) = queue_connector();
        let (signals, mut rx) = mpsc::unbounded_channel();
        let mut handle = ChannelHandle::connect(connector, "ws://x", 1, 7, signals);

        let envelope = next_signal(&mut rx).await;
        assert_eq!((envelope.slot, envelope.generation), (1, 7));
        assert!(matches!(envelope.signal, ChannelSignal::Opened));
        assert!(!handle.is_open());
        handle.mark_open();
        assert!(handle.is_open());

        tokio_test::assert_ok!(handle.send(&ClientMessage::hello(Some("m1".into()), "u", "t")));

        push.send(r#"{"tag":"system:ack"}"#.into()).unwrap();
        push.send("not json".into()).unwrap();

        let envelope = next_signal(&mut rx).await;
        assert!(matches!(
            envelope.signal,
            ChannelSignal::Message(Ok(InboundEvent::SystemAck))
        ));
        let envelope = next_signal(&mut rx).await;
        assert!(matches!(envelope.signal, ChannelSignal::Message(Err(_))));

        // The pump interleaves commands and frames, so the send may land later.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while sent.lock().unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "hello never sent");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(sent.lock().unwrap()[0].contains(r#""matchId":"m1""#));
    }

    #[tokio::test]
    async fn server_close_is_reported() {
        let (connector, push, _sent, _closed) = queue_connector();
        let (signals, mut rx) = mpsc::unbounded_channel();
        let _handle = ChannelHandle::connect(connector, "ws://x", 0, 1, signals);

        assert!(matches!(next_signal(&mut rx).await.signal, ChannelSignal::Opened));
        drop(push);
        assert!(matches!(
            next_signal(&mut rx).await.signal,
            ChannelSignal::Closed { reason: None }
        ));
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let (connector, _push, _sent, _closed) = queue_connector();
        // Drain the single transport so the next connect is refused.
        let _ = connector.connect("ws://x").await;

        let (signals, mut rx) = mpsc::unbounded_channel();
        let _handle = ChannelHandle::connect(connector, "ws://x", 0, 1, signals);
        let envelope = next_signal(&mut rx).await;
        assert!(matches!(
            envelope.signal,
            ChannelSignal::Failed {
                error: ChannelError::Connect(_)
            }
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_closes_transport() {
        let (connector, _push, _sent, closed) = queue_connector();
        let (signals, mut rx) = mpsc::unbounded_channel();
        let mut handle = ChannelHandle::connect(connector, "ws://x", 0, 1, signals);

        assert!(matches!(next_signal(&mut rx).await.signal, ChannelSignal::Opened));
        handle.mark_open();
        handle.close();
        handle.close();
        assert_eq!(
            handle.send(&ClientMessage::hello(None, "u", "t")),
            Err(ChannelError::NotOpen)
        );

        handle.close_by(in_one_second()).await;
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn close_while_connecting_emits_nothing() {
        let (signals, mut rx) = mpsc::unbounded_channel();
        let handle = ChannelHandle::connect(Arc::new(HangingConnector), "ws://x", 0, 1, signals);
        assert!(handle.is_connecting());

        handle.close_by(in_one_second()).await;

        // The pump exited without an Opened or Failed signal and dropped its sender.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_by_gives_up_at_deadline() {
        let (signals, mut rx) = mpsc::unbounded_channel();
        let handle = ChannelHandle::connect(Arc::new(StuckCloseConnector), "ws://x", 0, 1, signals);
        assert!(matches!(next_signal(&mut rx).await.signal, ChannelSignal::Opened));

        let started = Instant::now();
        handle
            .close_by(Instant::now() + Duration::from_millis(50))
            .await;
        assert!(started.elapsed() < Duration::from_secs(1));

        // The aborted pump dropped its sender.
        assert!(next_or_none(&mut rx).await.is_none());
    }

    async fn next_or_none(
        rx: &mut mpsc::UnboundedReceiver<ChannelEnvelope>,
    ) -> Option<ChannelEnvelope> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("pump still holds the signal sender")
    }
}
