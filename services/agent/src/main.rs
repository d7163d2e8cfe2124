//! Main entrypoint for the Aram voice agent.
//!
//! Loads configuration, joins each requested LiveKit room as an agent
//! participant and runs one Gemini Live voice session per room until the room
//! or the model connection closes, or the process is interrupted.

mod room;
mod voice;

use anyhow::Context;
use aram_core::config::Config;
use aram_core::events::{LoggingObserver, RoomObserver};
use aram_core::session::run_session;
use clap::Parser;
use futures::future::join_all;
use room::LiveKitJob;
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};
use tracing_subscriber::EnvFilter;
use voice::GeminiPlatform;

#[derive(Parser, Debug)]
#[command(version, about = "Runs the Aram voice agent in LiveKit rooms")]
struct Cli {
    /// Rooms to join. When none are given a new room is created from ROOM_PREFIX.
    rooms: Vec<String>,
}

/// Waits for Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal. Shutting down...");
}

async fn serve_room(config: Arc<Config>, platform: Arc<GeminiPlatform>, room: String) {
    let job = LiveKitJob::new(&config, room);
    let observers: Vec<Arc<dyn RoomObserver>> = vec![Arc::new(LoggingObserver)];

    let mut running = match run_session(&config, platform.as_ref(), job, observers).await {
        Ok(running) => running,
        Err(_) => return,
    };

    tokio::select! {
        _ = running.room.disconnected() => {},
        _ = running.session.finished() => {},
    }
    running.stop_avatar().await;
    if let Err(e) = running.room.close().await {
        error!(error = %e, "Failed to leave room");
    }
    info!("Session ended");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!(
        agent = %config.agent.name,
        model = %config.model.model,
        server = %config.livekit.url,
        "Configuration loaded"
    );

    // --- 3. Resolve Rooms ---
    let rooms = if cli.rooms.is_empty() {
        let room = config.agent.new_room_name();
        info!(%room, "No room given, created a new one. Join it with: generate-token {}", room);
        vec![room]
    } else {
        cli.rooms
    };

    // --- 4. Run One Session Per Room ---
    let platform = Arc::new(GeminiPlatform::new(config.livekit.clone()));
    let sessions = rooms.into_iter().map(|room| {
        let span = info_span!("agent_session", room = %room, agent = %config.agent.name);
        tokio::spawn(serve_room(config.clone(), platform.clone(), room).instrument(span))
    });
    let sessions = join_all(sessions);

    tokio::select! {
        _ = shutdown_signal() => {},
        results = sessions => {
            for result in results {
                if let Err(e) = result {
                    error!(error = %e, "Session task failed");
                }
            }
            info!("All sessions have ended");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_accepts_several_rooms() {
        let cli = Cli::try_parse_from(["aram-agent", "call-one", "call-two"]).unwrap();
        assert_eq!(cli.rooms, vec!["call-one", "call-two"]);
    }

    #[test]
    fn test_cli_rooms_are_optional() {
        let cli = Cli::try_parse_from(["aram-agent"]).unwrap();
        assert!(cli.rooms.is_empty());
    }
}
