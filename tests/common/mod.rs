#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for the mobile simulator integration tests.
//!
//! Provides a scripted [`MockServerApi`], a [`MockConnector`] whose links the
//! test drives from the server side, and helpers for building inbound frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use aeroduel_mobile_sim::error::{ChannelError, JoinError, QueryError};
use aeroduel_mobile_sim::protocol::{InboundEvent, JoinRequest, JoinResponse, PlaneNotice};
use aeroduel_mobile_sim::{
    Connector, MatchServerApi, MobileSimulator, SessionEvent, SimulatorConfig, SimulatorEvent,
    Transport,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// How long any single wait in a test may take.
pub const WAIT: Duration = Duration::from_secs(2);

// ── MockServerApi ───────────────────────────────────────────────────

/// Join endpoint double. Admits every plane unless a rejection was scripted
/// for it, and records every request.
pub struct MockServerApi {
    rejections: StdMutex<HashMap<String, JoinError>>,
    omit_channel: AtomicBool,
    pub requests: Arc<StdMutex<Vec<JoinRequest>>>,
}

impl MockServerApi {
    pub fn new() -> Self {
        Self {
            rejections: StdMutex::new(HashMap::new()),
            omit_channel: AtomicBool::new(false),
            requests: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Reject joins for `plane_id` with `reason`.
    pub fn reject(self, plane_id: &str, reason: &str) -> Self {
        self.rejections
            .lock()
            .unwrap()
            .insert(plane_id.into(), JoinError::Rejected(reason.into()));
        self
    }

    /// Admit without a `wsUrl`.
    pub fn without_channel(self) -> Self {
        self.set_offers_channel(false);
        self
    }

    /// Whether later joins are answered with a `wsUrl`.
    pub fn set_offers_channel(&self, offers: bool) {
        self.omit_channel.store(!offers, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl MatchServerApi for MockServerApi {
    async fn join(&self, request: &JoinRequest) -> Result<JoinResponse, JoinError> {
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        if let Some(error) = self.rejections.lock().unwrap().get(&request.plane_id) {
            return Err(error.clone());
        }
        Ok(JoinResponse {
            auth_token: format!("token-{}-{count:04}", request.plane_id),
            match_id: Some("match-1".into()),
            ws_url: (!self.omit_channel.load(Ordering::Relaxed))
                .then(|| format!("ws://mock/{}", request.plane_id)),
        })
    }

    async fn match_snapshot(&self) -> Result<Value, QueryError> {
        Ok(json!({ "matchId": "match-1", "status": "waiting" }))
    }

    async fn planes(&self) -> Result<Value, QueryError> {
        Ok(json!([{ "planeId": "sim-plane-001", "score": 0 }]))
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Server side of one mock channel.
pub struct MockLink {
    pub target: String,
    frames: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockLink {
    /// Deliver a frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        if let Some(frames) = self.frames.lock().unwrap().as_ref() {
            let _ = frames.send(frame.into());
        }
    }

    /// Close the link from the server side.
    pub fn hang_up(&self) {
        self.frames.lock().unwrap().take();
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Whether the client closed the transport.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Wait until the client has sent at least `count` frames.
    pub async fn wait_for_sent(&self, count: usize) -> Vec<String> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let sent = self.sent();
            if sent.len() >= count {
                return sent;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "client sent {} frames, expected {count}",
                sent.len()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn wait_until_closed(&self) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !self.is_closed() {
            assert!(tokio::time::Instant::now() < deadline, "link never closed");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

struct MockTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), ChannelError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(ChannelError::Closed);
        }
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

/// Connector handing every new link to the test through [`LinkProbe`].
pub struct MockConnector {
    links: mpsc::UnboundedSender<Arc<MockLink>>,
    refuse: bool,
}

/// Test side of a [`MockConnector`].
pub struct LinkProbe {
    links: mpsc::UnboundedReceiver<Arc<MockLink>>,
}

impl MockConnector {
    pub fn new() -> (Self, LinkProbe) {
        let (links, rx) = mpsc::unbounded_channel();
        (
            Self {
                links,
                refuse: false,
            },
            LinkProbe { links: rx },
        )
    }

    /// A connector that refuses every connection.
    pub fn refusing() -> Self {
        let (links, _rx) = mpsc::unbounded_channel();
        Self {
            links,
            refuse: true,
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &str) -> Result<Box<dyn Transport>, ChannelError> {
        if self.refuse {
            return Err(ChannelError::Connect("connection refused".into()));
        }
        let (frames, incoming) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let link = Arc::new(MockLink {
            target: target.to_string(),
            frames: StdMutex::new(Some(frames)),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });
        let _ = self.links.send(link);
        Ok(Box::new(MockTransport {
            incoming,
            sent,
            closed,
        }))
    }
}

impl LinkProbe {
    /// The next link the simulator opened.
    pub async fn next(&mut self) -> Arc<MockLink> {
        tokio::time::timeout(WAIT, self.links.recv())
            .await
            .expect("timed out waiting for a channel to open")
            .expect("connector dropped")
    }

    /// Whether a link was opened that the test has not taken yet.
    pub fn has_pending(&mut self) -> bool {
        !self.links.is_empty()
    }
}

// ── Simulator helpers ───────────────────────────────────────────────

/// A running simulator with the default two mobiles.
pub struct Bench {
    pub simulator: MobileSimulator,
    pub events: mpsc::Receiver<SimulatorEvent>,
    pub api: Arc<MockServerApi>,
    pub links: LinkProbe,
}

impl Bench {
    pub fn start(api: MockServerApi) -> Self {
        let api = Arc::new(api);
        let (connector, links) = MockConnector::new();
        let (simulator, events) = MobileSimulator::start(
            SimulatorConfig::default(),
            Arc::clone(&api) as Arc<dyn MatchServerApi>,
            Arc::new(connector),
        );
        Self {
            simulator,
            events,
            api,
            links,
        }
    }

    /// Consume events until one for `slot` matches `want`.
    pub async fn wait_for(
        &mut self,
        slot: usize,
        want: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = tokio::time::timeout(remaining, self.events.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for slot {slot} event"))
                .expect("event channel closed");
            if let SimulatorEvent::Session { slot: s, event } = event {
                if s == slot && want(&event) {
                    return event;
                }
            }
        }
    }

    /// Join `slot`, complete the handshake and return its link.
    pub async fn authenticate(&mut self, slot: usize) -> Arc<MockLink> {
        self.simulator.join(slot).unwrap();
        self.complete_handshake(slot).await
    }

    /// Acknowledge the hello of a join already in flight.
    pub async fn complete_handshake(&mut self, slot: usize) -> Arc<MockLink> {
        let link = self.links.next().await;
        link.wait_for_sent(1).await;
        link.push(frame(&InboundEvent::SystemAck));
        self.wait_for(slot, |e| matches!(e, SessionEvent::Authenticated))
            .await;
        link
    }

    pub async fn status(&self, slot: usize) -> String {
        self.simulator.snapshot(slot).await.unwrap().status
    }

    /// Poll snapshots until `slot` shows `status`.
    pub async fn wait_for_status(&self, slot: usize, status: &str) {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let current = self.status(slot).await;
            if current == status {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "slot {slot} stuck at {current:?}, expected {status:?}"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// ── Frame helpers ───────────────────────────────────────────────────

pub fn frame(event: &InboundEvent) -> String {
    event.to_frame().to_string()
}

pub fn ack() -> String {
    frame(&InboundEvent::SystemAck)
}

pub fn kicked(plane_id: &str, reason: Option<&str>) -> String {
    frame(&InboundEvent::PlaneKicked(PlaneNotice::new(plane_id, reason)))
}

pub fn disqualified(plane_id: &str, reason: Option<&str>) -> String {
    frame(&InboundEvent::PlaneDisqualified(PlaneNotice::new(
        plane_id, reason,
    )))
}

pub fn poweron(plane_id: &str) -> String {
    frame(&InboundEvent::PlanePowerOn(PlaneNotice::new(plane_id, None)))
}

pub fn match_created() -> String {
    frame(&InboundEvent::MatchCreated(json!({ "matchId": "match-2" })))
}

pub fn match_end() -> String {
    frame(&InboundEvent::MatchEnd(json!({ "winner": "sim-plane-001" })))
}
