//! Mints a LiveKit join token for a browser test client.
//!
//! Prints the token together with the steps to connect with the LiveKit
//! Agents Playground.

use anyhow::Context;
use aram_core::config::Config;
use aram_core::token::{ConnectionInstructions, DEFAULT_PARTICIPANT, DEFAULT_ROOM, TokenMinter};
use clap::Parser;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Generates a LiveKit access token for testing")]
struct Cli {
    /// Room to join.
    #[arg(default_value = DEFAULT_ROOM)]
    room: String,
    /// Participant identity and display name.
    #[arg(default_value = DEFAULT_PARTICIPANT)]
    participant: String,
    /// Token lifetime in seconds. Defaults to the LiveKit server default.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    ttl: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    debug!(room = %cli.room, participant = %cli.participant, "Minting token");

    let token = TokenMinter::new(&config.livekit)
        .join_token(
            &cli.room,
            &cli.participant,
            &cli.participant,
            cli.ttl.map(Duration::from_secs),
        )
        .context("Failed to generate token")?;

    println!(
        "{}",
        ConnectionInstructions {
            room: &cli.room,
            participant: &cli.participant,
            server: config.livekit.display_url(),
            token: &token,
        }
    );
    Ok(())
}
