//! Core logic for the Aram voice agent.
//!
//! This crate holds everything that does not depend on a particular room
//! transport or model vendor: environment configuration, LiveKit token
//! minting, the hosted avatar clients, room event observers, voice activity
//! detection and the per-job session entry point. The `aram-agent` service
//! plugs LiveKit and Gemini Live into the traits in [`platform`].

pub mod avatar;
pub mod config;
pub mod events;
pub mod platform;
pub mod session;
pub mod token;
pub mod vad;

pub use avatar::{AvatarBinding, AvatarError, AvatarOverlay, HostedAvatar};
pub use config::{AvatarProvider, Config, ConfigError};
pub use events::{LoggingObserver, RoomEvent, RoomObserver};
pub use session::{AvatarOutcome, RunningSession, SessionError, run_session};
pub use token::{ConnectionInstructions, TokenError, TokenMinter};
