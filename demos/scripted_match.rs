//! # Scripted Match Example
//!
//! Runs the simulator against an in-process match server. The join endpoint
//! and the event channel are both implemented in this file, so no network or
//! real server is needed:
//!
//! - **Join**: a [`MatchServerApi`] that admits every plane
//! - **Channel**: a [`Connector`] handing out loopback [`Transport`]s whose
//!   server halves the script drives by hand
//!
//! ## Running
//!
//! ```sh
//! cargo run --example scripted_match
//! ```

use std::sync::Arc;

use aeroduel_mobile_sim::error::{ChannelError, JoinError, QueryError};
use aeroduel_mobile_sim::protocol::{JoinRequest, JoinResponse};
use aeroduel_mobile_sim::{
    Connector, InboundEvent, MatchServerApi, MobileSimulator, PlaneNotice, SessionEvent,
    SimulatorConfig, SimulatorEvent, Transport,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

// ─────────────────────────────────────────────────────────────────────
// Step 1: A join endpoint that admits everyone
// ─────────────────────────────────────────────────────────────────────

struct ScriptedServer;

#[async_trait]
impl MatchServerApi for ScriptedServer {
    async fn join(&self, request: &JoinRequest) -> Result<JoinResponse, JoinError> {
        Ok(JoinResponse {
            auth_token: format!("demo-token-{}", request.plane_id),
            match_id: Some("demo-match".into()),
            ws_url: Some(format!("loopback://{}", request.plane_id)),
        })
    }

    async fn match_snapshot(&self) -> Result<Value, QueryError> {
        Ok(json!({ "matchId": "demo-match", "status": "active" }))
    }

    async fn planes(&self) -> Result<Value, QueryError> {
        Ok(json!([]))
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: A loopback channel and a connector that hands out its halves
// ─────────────────────────────────────────────────────────────────────

/// Client half of one channel.
struct LoopbackTransport {
    /// Frames the client sends (the script reads them).
    tx: mpsc::UnboundedSender<String>,
    /// Frames the script pushes to the client.
    rx: mpsc::UnboundedReceiver<String>,
}

/// Server half of one channel, driven by the script.
struct LoopbackServer {
    target: String,
    rx: mpsc::UnboundedReceiver<String>,
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&mut self, message: String) -> Result<(), ChannelError> {
        self.tx
            .send(message)
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), ChannelError> {
        self.rx.close();
        Ok(())
    }
}

struct LoopbackConnector {
    servers: mpsc::UnboundedSender<LoopbackServer>,
}

#[async_trait]
impl Connector for LoopbackConnector {
    async fn connect(&self, target: &str) -> Result<Box<dyn Transport>, ChannelError> {
        // Client → Server
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        // Server → Client
        let (server_tx, client_rx) = mpsc::unbounded_channel();

        self.servers
            .send(LoopbackServer {
                target: target.to_string(),
                rx: server_rx,
                tx: server_tx,
            })
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        Ok(Box::new(LoopbackTransport {
            tx: client_tx,
            rx: client_rx,
        }))
    }
}

fn push(server: &LoopbackServer, event: &InboundEvent) {
    let _ = server.tx.send(event.to_frame().to_string());
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Drive a short match
// ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (servers_tx, mut servers) = mpsc::unbounded_channel();
    let (mut simulator, mut events) = MobileSimulator::start(
        SimulatorConfig::default(),
        Arc::new(ScriptedServer),
        Arc::new(LoopbackConnector { servers: servers_tx }),
    );

    // Both mobiles join and say hello.
    let mut links = Vec::new();
    for slot in 0..simulator.slot_count() {
        simulator.join(slot)?;
        let Some(mut server) = servers.recv().await else {
            return Err("connector dropped".into());
        };
        if let Some(hello) = server.rx.recv().await {
            println!("[server] {} says {hello}", server.target);
        }
        push(&server, &InboundEvent::SystemAck);
        links.push(server);
    }

    let Some(first) = links.first() else {
        return Err("no mobiles configured".into());
    };

    // Kick the first plane, then let it power back on.
    push(
        first,
        &InboundEvent::PlaneKicked(PlaneNotice::new("sim-plane-001", Some("left the arena"))),
    );
    push(
        first,
        &InboundEvent::PlanePowerOn(PlaneNotice::new("sim-plane-001", None)),
    );

    while let Some(event) = events.recv().await {
        match event {
            SimulatorEvent::Session {
                slot,
                event: SessionEvent::PoweredOn,
            } => {
                println!("[mobile {}] powered on", slot + 1);
                break;
            }
            SimulatorEvent::Session { slot, event } => {
                println!("[mobile {}] {event:?}", slot + 1);
            }
            SimulatorEvent::Stopped { reason } => {
                println!("stopped: {reason:?}");
                break;
            }
        }
    }

    for snapshot in simulator.snapshots().await {
        println!("{}: {}", snapshot.label, snapshot.status);
    }
    simulator.shutdown().await;
    Ok(())
}
