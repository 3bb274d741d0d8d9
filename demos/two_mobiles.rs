//! # Two Mobiles Demo
//!
//! Runs the two default simulated phones against a real Aeroduel server:
//!
//! 1. Join both mobiles over HTTP
//! 2. Open their event channels and send the `hello` handshake
//! 3. Log every session event (acks, kicks, power-on, match end)
//! 4. Shut down gracefully on Ctrl+C
//!
//! ## Running
//!
//! ```sh
//! # Start an Aeroduel server on aeroduel.local:45045, then:
//! cargo run --example two_mobiles
//!
//! # Override the server URL:
//! AERODUEL_SERVER_URL=http://192.168.1.20:45045 cargo run --example two_mobiles
//! ```

use aeroduel_mobile_sim::config::DEFAULT_SERVER_URL;
use aeroduel_mobile_sim::{
    MobileSimulator, SessionEvent, Severity, SimulatorConfig, SimulatorEvent,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let url =
        std::env::var("AERODUEL_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
    tracing::info!("Using server {url}");
    let config = SimulatorConfig::new(url);

    // ── Start ───────────────────────────────────────────────────────
    let (mut simulator, mut events) = MobileSimulator::start_default(config)?;
    for slot in 0..simulator.slot_count() {
        simulator.join(slot)?;
    }

    // ── Event loop ──────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!("Event channel closed, exiting");
                    break;
                };

                match event {
                    SimulatorEvent::Session { slot, event: SessionEvent::Authenticated } => {
                        tracing::info!("Mobile {} authenticated", slot + 1);
                        match simulator.fetch_planes().await {
                            Ok(planes) => tracing::info!("Planes: {planes}"),
                            Err(e) => tracing::warn!("{e}"),
                        }
                    }

                    SimulatorEvent::Session { slot, event: SessionEvent::Kicked { reason } } => {
                        tracing::warn!("Mobile {} kicked: {reason}", slot + 1);
                    }

                    SimulatorEvent::Session { slot, event: SessionEvent::PoweredOn } => {
                        tracing::info!("Mobile {} powered on, joining again", slot + 1);
                        simulator.join(slot)?;
                    }

                    SimulatorEvent::Session { slot, event } => {
                        tracing::debug!("Mobile {}: {event:?}", slot + 1);
                    }

                    SimulatorEvent::Stopped { reason } => {
                        tracing::warn!("Simulator stopped: {}", reason.as_deref().unwrap_or("unknown"));
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    for entry in simulator.activity().await.iter().rev() {
        let marker = match entry.severity {
            Severity::Success => "+",
            Severity::Error => "!",
            Severity::Info => " ",
        };
        println!(
            "{} {marker} [{}] {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.source,
            entry.message
        );
    }
    simulator.shutdown().await;
    Ok(())
}
