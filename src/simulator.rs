//! Driver running every simulated client of one test bench.
//!
//! [`MobileSimulator`] is a thin handle that talks to a background loop over
//! an unbounded MPSC channel. The loop owns the [`SessionRegistry`] and every
//! [`ChannelHandle`], and processes one input at a time:
//!
//! ```text
//!  handle ── commands ──┐
//!  join tasks ─ results ┼──▶ event loop ──▶ Session (pure) ──▶ actions ──▶ spawn join / open channel / send
//!  channel pumps ───────┘         │
//!                                 └──▶ snapshots + activity log + SimulatorEvent channel
//! ```
//!
//! Join requests and channel pumps run as their own tasks and only post
//! results back, so the two mobiles wait independently while all state
//! changes stay run-to-completion.
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SimulatorConfig::default();
//! let (simulator, mut events) = MobileSimulator::start_default(config)?;
//!
//! simulator.join(0)?;
//! simulator.join(1)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SimulatorEvent::Session { slot, event: SessionEvent::Kicked { reason } } => { /* … */ }
//!         SimulatorEvent::Stopped { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::activity::{ActivityEntry, ActivityLog, Severity};
use crate::api::MatchServerApi;
use crate::channel::{ChannelEnvelope, ChannelHandle, ChannelSignal, Generation};
use crate::config::SimulatorConfig;
use crate::error::{JoinError, Result, SimulatorError};
use crate::event::SimulatorEvent;
use crate::protocol::{ClientMessage, JoinResponse};
use crate::registry::{BroadcastFilter, LinkId, SessionRegistry};
use crate::session::{ChannelState, JoinAttempt, Session, SessionAction, SessionSnapshot};
use crate::transport::Connector;

/// Activity log source for the debug queries.
const DEBUG_SOURCE: &str = "Debug";

// ── Shared state ────────────────────────────────────────────────────

/// Published by the loop after every input; read by the handle.
struct SharedState {
    running: AtomicBool,
    snapshots: Mutex<Vec<SessionSnapshot>>,
    activity: Mutex<ActivityLog>,
}

// ── Loop inputs ─────────────────────────────────────────────────────

enum Command {
    Join {
        slot: usize,
    },
    Rename {
        slot: usize,
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
}

struct JoinOutcome {
    slot: usize,
    attempt: JoinAttempt,
    result: std::result::Result<JoinResponse, JoinError>,
}

// ── Simulator handle ────────────────────────────────────────────────

/// Handle to a running simulator.
///
/// Created via [`MobileSimulator::start`], which spawns the event loop and
/// returns this handle together with the observer's event receiver. Commands
/// return once queued; their effects show up as events and in
/// [`snapshots`](Self::snapshots).
pub struct MobileSimulator {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<SharedState>,
    api: Arc<dyn MatchServerApi>,
    slot_count: usize,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl MobileSimulator {
    /// Start the event loop with one session per configured slot.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        config: SimulatorConfig,
        api: Arc<dyn MatchServerApi>,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::Receiver<SimulatorEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (join_tx, join_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        // tokio panics on a zero capacity.
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let registry = SessionRegistry::from_slots(&config.slots);
        let slot_count = registry.len();
        let state = Arc::new(SharedState {
            running: AtomicBool::new(true),
            snapshots: Mutex::new(registry.iter().map(Session::snapshot).collect()),
            activity: Mutex::new(ActivityLog::new(config.activity_log_capacity)),
        });

        let driver = Driver {
            registry,
            broadcasts: BroadcastFilter::default(),
            channels: HashMap::new(),
            next_generation: 0,
            api: Arc::clone(&api),
            connector,
            join_tx,
            signal_tx,
            event_tx,
            state: Arc::clone(&state),
            close_timeout: config.shutdown_timeout,
        };
        info!(slots = slot_count, server = %config.server_url, "mobile simulator started");
        let task = tokio::spawn(event_loop(driver, cmd_rx, join_rx, signal_rx, shutdown_rx));

        let simulator = Self {
            cmd_tx,
            state,
            api,
            slot_count,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (simulator, event_rx)
    }

    /// Start against a real server: HTTP join client from the config and a
    /// WebSocket connector for the event channels.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Config`] if the server URL is invalid.
    #[cfg(feature = "transport-websocket")]
    pub fn start_default(
        config: SimulatorConfig,
    ) -> Result<(Self, mpsc::Receiver<SimulatorEvent>)> {
        let api = crate::api::HttpMatchServer::from_config(&config)?;
        let mut connector = crate::transports::WebSocketConnector::new();
        if let Some(timeout) = config.request_timeout {
            connector = connector.with_timeout(timeout);
        }
        Ok(Self::start(config, Arc::new(api), Arc::new(connector)))
    }

    // ── Commands ────────────────────────────────────────────────────

    /// Ask the session at `slot` to join the match. Ignored by the session
    /// while it is already joining or joined.
    ///
    /// # Errors
    ///
    /// [`SimulatorError::UnknownSlot`] or [`SimulatorError::NotRunning`].
    pub fn join(&self, slot: usize) -> Result<()> {
        self.check_slot(slot)?;
        self.send(Command::Join { slot })
    }

    /// Change the display name used by the next join.
    ///
    /// # Errors
    ///
    /// [`SimulatorError::NameLocked`] while the session is joining or joined,
    /// plus the errors of [`join`](Self::join).
    pub async fn set_display_name(&self, slot: usize, name: impl Into<String>) -> Result<()> {
        self.check_slot(slot)?;
        let (reply, response) = oneshot::channel();
        self.send(Command::Rename {
            slot,
            name: name.into(),
            reply,
        })?;
        response.await.map_err(|_| SimulatorError::NotRunning)?
    }

    /// Fetch the server's match state and record the outcome in the
    /// activity log.
    ///
    /// # Errors
    ///
    /// [`SimulatorError::Query`] when the request fails.
    pub async fn fetch_match_state(&self) -> Result<Value> {
        let result = self.api.match_snapshot().await;
        self.log_query(&result, "Fetched match state", "Failed to fetch match state")
            .await;
        Ok(result?)
    }

    /// Fetch the registered planes and scores and record the outcome in the
    /// activity log.
    ///
    /// # Errors
    ///
    /// [`SimulatorError::Query`] when the request fails.
    pub async fn fetch_planes(&self) -> Result<Value> {
        let result = self.api.planes().await;
        self.log_query(&result, "Fetched planes and scores", "Failed to fetch planes")
            .await;
        Ok(result?)
    }

    /// Gracefully shut down: close every channel, emit
    /// [`SimulatorEvent::Stopped`] and wait for the loop to exit. The loop is
    /// aborted if it takes longer than the configured shutdown timeout.
    pub async fn shutdown(&mut self) {
        debug!("MobileSimulator: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("simulator loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("simulator loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("simulator loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.running.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Latest snapshot of every session, in slot order.
    pub async fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.state.snapshots.lock().await.clone()
    }

    pub async fn snapshot(&self, slot: usize) -> Option<SessionSnapshot> {
        self.state.snapshots.lock().await.get(slot).cloned()
    }

    /// Activity log, newest first.
    pub async fn activity(&self) -> Vec<ActivityEntry> {
        self.state.activity.lock().await.to_vec()
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.slot_count {
            return Err(SimulatorError::UnknownSlot(slot));
        }
        Ok(())
    }

    fn send(&self, command: Command) -> Result<()> {
        if !self.is_running() {
            return Err(SimulatorError::NotRunning);
        }
        self.cmd_tx
            .send(command)
            .map_err(|_| SimulatorError::NotRunning)
    }

    async fn log_query<T, E: std::fmt::Display>(
        &self,
        result: &std::result::Result<T, E>,
        success: &str,
        failure: &str,
    ) {
        let mut activity = self.state.activity.lock().await;
        match result {
            Ok(_) => activity.push(DEBUG_SOURCE, success, Severity::Info),
            Err(e) => activity.push(DEBUG_SOURCE, format!("{failure}: {e}"), Severity::Error),
        }
    }
}

impl std::fmt::Debug for MobileSimulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MobileSimulator")
            .field("slots", &self.slot_count)
            .field("running", &self.is_running())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for MobileSimulator {
    fn drop(&mut self) {
        // Nothing can be awaited here. Aborting drops the loop, and with it
        // every channel handle, which closes the transports.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Event loop ──────────────────────────────────────────────────────

/// State owned by the event loop.
struct Driver {
    registry: SessionRegistry,
    broadcasts: BroadcastFilter,
    channels: HashMap<usize, ChannelHandle>,
    next_generation: Generation,
    api: Arc<dyn MatchServerApi>,
    connector: Arc<dyn Connector>,
    join_tx: mpsc::UnboundedSender<JoinOutcome>,
    signal_tx: mpsc::UnboundedSender<ChannelEnvelope>,
    event_tx: mpsc::Sender<SimulatorEvent>,
    state: Arc<SharedState>,
    close_timeout: Duration,
}

/// Processes commands, join results and channel signals one at a time.
///
/// Exits when the handle requests shutdown or is dropped.
async fn event_loop(
    mut driver: Driver,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut join_rx: mpsc::UnboundedReceiver<JoinOutcome>,
    mut signal_rx: mpsc::UnboundedReceiver<ChannelEnvelope>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("simulator loop started");

    let reason = loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(command) => driver.on_command(command),
                None => {
                    debug!("command channel closed, shutting down simulator loop");
                    break "simulator handle dropped";
                }
            },

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                break "simulator shut down";
            }

            // The driver holds both senders, so these never yield `None`.
            Some(outcome) = join_rx.recv() => driver.on_join_outcome(outcome),

            Some(envelope) = signal_rx.recv() => driver.on_channel_signal(envelope),
        }
        driver.publish().await;
    };

    driver.close_all().await;
    driver.publish().await;
    driver.state.running.store(false, Ordering::Release);
    emit_stopped(&driver.event_tx, Some(reason.to_string())).await;

    debug!("simulator loop exited");
}

impl Driver {
    fn on_command(&mut self, command: Command) {
        match command {
            Command::Join { slot } => {
                let Some(session) = self.registry.get_mut(slot) else {
                    return;
                };
                let actions = session.start_join();
                if !actions.is_empty() {
                    // A new membership never inherits the previous match's link.
                    self.drop_channel(slot);
                }
                self.perform(slot, actions);
            }
            Command::Rename { slot, name, reply } => {
                let result = match self.registry.get_mut(slot) {
                    Some(session) => {
                        if session.set_display_name(name) {
                            Ok(())
                        } else {
                            Err(SimulatorError::NameLocked(slot))
                        }
                    }
                    None => Err(SimulatorError::UnknownSlot(slot)),
                };
                let _ = reply.send(result);
            }
        }
    }

    fn on_join_outcome(&mut self, outcome: JoinOutcome) {
        let JoinOutcome {
            slot,
            attempt,
            result,
        } = outcome;
        let Some(session) = self.registry.get_mut(slot) else {
            return;
        };
        match result {
            Ok(response) => {
                let actions = session.join_succeeded(attempt, response);
                self.perform(slot, actions);
            }
            Err(error) => session.join_failed(attempt, &error),
        }
        self.reconcile_channels();
    }

    fn on_channel_signal(&mut self, envelope: ChannelEnvelope) {
        let ChannelEnvelope {
            slot,
            generation,
            signal,
        } = envelope;

        let current = self.channels.get(&slot).map(ChannelHandle::generation);
        if current != Some(generation) {
            debug!(slot, generation, ?current, "dropping signal from superseded channel");
            return;
        }

        match signal {
            ChannelSignal::Opened => {
                if let Some(handle) = self.channels.get_mut(&slot) {
                    handle.mark_open();
                }
                let actions = match self.registry.get_mut(slot) {
                    Some(session) => session.channel_opened(),
                    None => Vec::new(),
                };
                if actions.is_empty() {
                    // The session moved on while connecting.
                    self.drop_channel(slot);
                } else {
                    self.perform(slot, actions);
                }
            }
            ChannelSignal::Message(Ok(event)) => {
                debug!(slot, tag = event.tag(), "event received");
                if event.is_broadcast() {
                    let live: Vec<LinkId> = self
                        .channels
                        .iter()
                        .filter(|(_, handle)| handle.is_open())
                        .map(|(slot, handle)| (*slot, handle.generation()))
                        .collect();
                    if !self.broadcasts.admit((slot, generation), &event, &live) {
                        debug!(slot, tag = event.tag(), "dropping copy of broadcast");
                        return;
                    }
                }
                self.registry.dispatch(slot, &event);
            }
            ChannelSignal::Message(Err(malformed)) => {
                warn!(slot, raw = %malformed.raw, "discarding malformed frame: {}", malformed.detail);
                if let Some(session) = self.registry.get_mut(slot) {
                    session.record_malformed(&malformed);
                }
            }
            ChannelSignal::Closed { reason } => {
                self.forget_channel(slot);
                if let Some(session) = self.registry.get_mut(slot) {
                    session.channel_closed(reason);
                }
            }
            ChannelSignal::Failed { error } => {
                self.forget_channel(slot);
                if let Some(session) = self.registry.get_mut(slot) {
                    session.channel_failed(&error);
                }
            }
        }
        self.reconcile_channels();
    }

    fn perform(&mut self, slot: usize, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::StartJoin { attempt, request } => {
                    let api = Arc::clone(&self.api);
                    let join_tx = self.join_tx.clone();
                    tokio::spawn(async move {
                        let result = api.join(&request).await;
                        if join_tx
                            .send(JoinOutcome {
                                slot,
                                attempt,
                                result,
                            })
                            .is_err()
                        {
                            debug!(slot, "simulator loop gone, dropping join result");
                        }
                    });
                }
                SessionAction::OpenChannel { target } => self.open_channel(slot, target),
                SessionAction::Send(message) => self.send_message(slot, &message),
            }
        }
    }

    /// Replace the slot's channel. The previous one is closed first.
    fn open_channel(&mut self, slot: usize, target: String) {
        self.next_generation += 1;
        let generation = self.next_generation;
        debug!(slot, generation, target = %target, "opening match channel");
        let handle = ChannelHandle::connect(
            Arc::clone(&self.connector),
            target,
            slot,
            generation,
            self.signal_tx.clone(),
        );
        if let Some(mut previous) = self.channels.insert(slot, handle) {
            previous.close();
        }
    }

    fn send_message(&mut self, slot: usize, message: &ClientMessage) {
        let sent = match self.channels.get(&slot) {
            Some(handle) => handle.send(message),
            None => Err(crate::error::ChannelError::NotOpen),
        };
        if let Err(error) = sent {
            warn!(slot, "failed to queue message: {error}");
            self.drop_channel(slot);
            if let Some(session) = self.registry.get_mut(slot) {
                session.channel_failed(&error);
            }
        }
    }

    /// Close and forget the slot's channel.
    fn drop_channel(&mut self, slot: usize) {
        if let Some(mut handle) = self.channels.remove(&slot) {
            handle.close();
        }
    }

    /// Forget a channel whose pump already ended.
    fn forget_channel(&mut self, slot: usize) {
        if let Some(mut handle) = self.channels.remove(&slot) {
            handle.mark_closed();
        }
    }

    /// Abandon pending connects the session no longer wants.
    ///
    /// Established links stay up even when the session left the match, so
    /// broadcasts still reach it until the server closes the link or a new
    /// join replaces it.
    fn reconcile_channels(&mut self) {
        let abandoned: Vec<usize> = self
            .channels
            .iter()
            .filter(|(slot, handle)| {
                handle.is_connecting()
                    && self
                        .registry
                        .get(**slot)
                        .is_none_or(|s| s.channel() != ChannelState::Connecting)
            })
            .map(|(slot, _)| *slot)
            .collect();
        for slot in abandoned {
            debug!(slot, "abandoning pending channel connect");
            self.drop_channel(slot);
        }
    }

    /// Publish snapshots, then move fresh session events into the activity
    /// log and out to the observer.
    async fn publish(&mut self) {
        *self.state.snapshots.lock().await = self.registry.iter().map(Session::snapshot).collect();

        let mut drained = Vec::new();
        for (slot, session) in self.registry.iter_mut().enumerate() {
            let events = session.drain_events();
            if !events.is_empty() {
                drained.push((
                    slot,
                    session.label().to_string(),
                    session.display_name().to_string(),
                    events,
                ));
            }
        }
        if drained.is_empty() {
            return;
        }

        {
            let mut activity = self.state.activity.lock().await;
            for (_, label, name, events) in &drained {
                for event in events {
                    activity.record(label, name, event);
                }
            }
        }

        for (slot, _, _, events) in drained {
            for event in events {
                emit_event(&self.event_tx, SimulatorEvent::Session { slot, event });
            }
        }
    }

    /// Close every channel, then wait for the pumps. All of them share one
    /// deadline at half the shutdown timeout, which leaves the loop time to
    /// emit [`SimulatorEvent::Stopped`] before the handle gives up on it.
    async fn close_all(&mut self) {
        let deadline = tokio::time::Instant::now() + self.close_timeout / 2;
        let mut handles: Vec<(usize, ChannelHandle)> = self.channels.drain().collect();
        for (slot, handle) in &mut handles {
            debug!(slot = *slot, "closing channel on shutdown");
            handle.close();
        }
        for (_, handle) in handles {
            handle.close_by(deadline).await;
        }
    }
}

/// Emit an event to the observer. If the channel is full, log a warning and
/// drop the event rather than stall the loop.
fn emit_event(event_tx: &mpsc::Sender<SimulatorEvent>, event: SimulatorEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(slot = ?dropped.slot(), "event channel full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit the final [`Stopped`](SimulatorEvent::Stopped) event.
///
/// Uses `send().await` because it is the last event on the channel and must
/// not be dropped.
async fn emit_stopped(event_tx: &mpsc::Sender<SimulatorEvent>, reason: Option<String>) {
    if event_tx
        .send(SimulatorEvent::Stopped { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
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
    use crate::error::{ChannelError, QueryError};
    use crate::protocol::{InboundEvent, JoinRequest};
    use crate::session::SessionEvent;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use serde_json::json;

    /// Rejects every join; answers queries with fixed JSON.
    struct RejectingApi;

    #[async_trait]
    impl MatchServerApi for RejectingApi {
        async fn join(
            &self,
            _request: &JoinRequest,
        ) -> std::result::Result<JoinResponse, JoinError> {
            Err(JoinError::Rejected("Match full".into()))
        }

        async fn match_snapshot(&self) -> std::result::Result<Value, QueryError> {
            Ok(json!({ "status": "waiting" }))
        }

        async fn planes(&self) -> std::result::Result<Value, QueryError> {
            Err(QueryError {
                endpoint: crate::api::PLANES_PATH.into(),
                detail: "HTTP 500".into(),
            })
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(
            &self,
            _target: &str,
        ) -> std::result::Result<Box<dyn Transport>, ChannelError> {
            Err(ChannelError::Connect("refused".into()))
        }
    }

    /// Admits every plane with a channel target.
    struct AdmittingApi;

    #[async_trait]
    impl MatchServerApi for AdmittingApi {
        async fn join(
            &self,
            request: &JoinRequest,
        ) -> std::result::Result<JoinResponse, JoinError> {
            Ok(JoinResponse {
                auth_token: format!("token-{}", request.plane_id),
                match_id: Some("m1".into()),
                ws_url: Some(format!("ws://test/{}", request.plane_id)),
            })
        }

        async fn match_snapshot(&self) -> std::result::Result<Value, QueryError> {
            Ok(Value::Null)
        }

        async fn planes(&self) -> std::result::Result<Value, QueryError> {
            Ok(Value::Null)
        }
    }

    /// Opens links whose transport never finishes closing.
    struct StuckCloseConnector;

    struct StuckCloseTransport;

    #[async_trait]
    impl Transport for StuckCloseTransport {
        async fn send(&mut self, _message: String) -> std::result::Result<(), ChannelError> {
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, ChannelError>> {
            std::future::pending().await
        }

        async fn close(&mut self) -> std::result::Result<(), ChannelError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl Connector for StuckCloseConnector {
        async fn connect(
            &self,
            _target: &str,
        ) -> std::result::Result<Box<dyn Transport>, ChannelError> {
            Ok(Box::new(StuckCloseTransport))
        }
    }

    /// A driver that is not running its loop, for feeding inputs by hand.
    fn idle_driver() -> (
        Driver,
        mpsc::UnboundedReceiver<ChannelEnvelope>,
        mpsc::Receiver<SimulatorEvent>,
    ) {
        let config = SimulatorConfig::default();
        let (join_tx, _join_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(16);
        let driver = Driver {
            registry: SessionRegistry::from_slots(&config.slots),
            broadcasts: BroadcastFilter::default(),
            channels: HashMap::new(),
            next_generation: 0,
            api: Arc::new(RejectingApi),
            connector: Arc::new(RefusingConnector),
            join_tx,
            signal_tx,
            event_tx,
            state: Arc::new(SharedState {
                running: AtomicBool::new(true),
                snapshots: Mutex::new(Vec::new()),
                activity: Mutex::new(ActivityLog::new(config.activity_log_capacity)),
            }),
            close_timeout: config.shutdown_timeout,
        };
        (driver, signal_rx, event_rx)
    }

    fn start(config: SimulatorConfig) -> (MobileSimulator, mpsc::Receiver<SimulatorEvent>) {
        MobileSimulator::start(config, Arc::new(RejectingApi), Arc::new(RefusingConnector))
    }

    async fn next_event(events: &mut mpsc::Receiver<SimulatorEvent>) -> SimulatorEvent {
        tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn initial_snapshots_match_slots() {
        let (simulator, _events) = start(SimulatorConfig::default());
        let snapshots = simulator.snapshots().await;
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].label, "Mobile 1");
        assert_eq!(snapshots[1].status, "Not Joined");
        assert!(simulator.is_running());
    }

    #[tokio::test]
    async fn join_unknown_slot_is_rejected() {
        let (simulator, _events) = start(SimulatorConfig::default());
        assert!(matches!(
            simulator.join(5),
            Err(SimulatorError::UnknownSlot(5))
        ));
    }

    #[tokio::test]
    async fn rejected_join_is_reported_and_logged() {
        let (simulator, mut events) = start(SimulatorConfig::default());
        simulator.join(1).unwrap();

        assert_eq!(
            next_event(&mut events).await,
            SimulatorEvent::Session {
                slot: 1,
                event: SessionEvent::JoinStarted {
                    display_name: "Delta-7".into()
                }
            }
        );
        assert_eq!(
            next_event(&mut events).await,
            SimulatorEvent::Session {
                slot: 1,
                event: SessionEvent::JoinFailed {
                    reason: "Match full".into()
                }
            }
        );

        let snapshot = simulator.snapshot(1).await.unwrap();
        assert_eq!(snapshot.status, "Not Joined");
        assert_eq!(snapshot.last_reason.as_deref(), Some("Match full"));
        assert_eq!(simulator.activity().await[0].message, "Join failed: Match full");
    }

    #[tokio::test]
    async fn rename_while_not_joined() {
        let (simulator, _events) = start(SimulatorConfig::default());
        simulator.set_display_name(0, "Echo-9").await.unwrap();
        assert_eq!(simulator.snapshot(0).await.unwrap().display_name, "Echo-9");
    }

    #[tokio::test]
    async fn debug_queries_are_logged() {
        let (simulator, _events) = start(SimulatorConfig::default());
        assert_eq!(
            simulator.fetch_match_state().await.unwrap(),
            json!({ "status": "waiting" })
        );
        assert!(matches!(
            simulator.fetch_planes().await,
            Err(SimulatorError::Query(_))
        ));

        let activity = simulator.activity().await;
        assert_eq!(activity[0].source, "Debug");
        assert!(activity[0].message.starts_with("Failed to fetch planes:"));
        assert_eq!(activity[1].message, "Fetched match state");
    }

    #[tokio::test]
    async fn shutdown_emits_stopped_and_refuses_commands() {
        let (mut simulator, mut events) = start(SimulatorConfig::default());
        simulator.shutdown().await;

        assert!(matches!(
            next_event(&mut events).await,
            SimulatorEvent::Stopped { .. }
        ));
        assert!(!simulator.is_running());
        assert!(matches!(simulator.join(0), Err(SimulatorError::NotRunning)));

        // A second shutdown is a no-op.
        simulator.shutdown().await;
    }

    #[tokio::test]
    async fn drop_without_shutdown_does_not_panic() {
        let (simulator, _events) = start(SimulatorConfig::default());
        drop(simulator);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn zero_event_channel_capacity_does_not_panic() {
        let mut config = SimulatorConfig::default();
        config.event_channel_capacity = 0;
        let (mut simulator, _events) = start(config);
        simulator.shutdown().await;
    }

    #[tokio::test]
    async fn stuck_transport_close_still_emits_stopped() {
        let config = SimulatorConfig::default().with_shutdown_timeout(Duration::from_millis(200));
        let (mut simulator, mut events) =
            MobileSimulator::start(config, Arc::new(AdmittingApi), Arc::new(StuckCloseConnector));

        simulator.join(0).unwrap();
        loop {
            if let SimulatorEvent::Session {
                slot: 0,
                event: SessionEvent::HandshakeSent,
            } = next_event(&mut events).await
            {
                break;
            }
        }

        simulator.shutdown().await;

        let mut stopped = false;
        while let Some(event) = events.recv().await {
            if matches!(event, SimulatorEvent::Stopped { .. }) {
                stopped = true;
            }
        }
        assert!(stopped, "Stopped must arrive even when a transport hangs on close");
    }

    #[tokio::test]
    async fn signals_from_a_replaced_channel_are_ignored() {
        let (mut driver, _signals, _events) = idle_driver();
        driver.open_channel(0, "ws://first".into());
        let first = driver.channels[&0].generation();
        driver.open_channel(0, "ws://second".into());
        let second = driver.channels[&0].generation();
        assert_ne!(first, second);

        for signal in [
            ChannelSignal::Opened,
            ChannelSignal::Message(Ok(InboundEvent::MatchCreated(json!({ "matchId": "m2" })))),
            ChannelSignal::Failed {
                error: ChannelError::Closed,
            },
        ] {
            driver.on_channel_signal(ChannelEnvelope {
                slot: 0,
                generation: first,
                signal,
            });
        }

        let current = &driver.channels[&0];
        assert_eq!(current.generation(), second);
        assert!(current.is_connecting());
        assert!(driver
            .registry
            .iter()
            .all(|session| session.pending_events().is_empty()));
    }
}
