//! A small client for the Gemini Live bidirectional streaming API.
//!
//! [`LiveClient::connect`] performs the setup handshake and hands back a
//! cloneable [`LiveSender`] for microphone audio and a [`LiveReceiver`] that
//! yields [`ServerEvent`]s.

pub mod audio;
pub mod client;
pub mod types;

pub use audio::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
pub use client::{
    DEFAULT_ENDPOINT, LiveClient, LiveConfig, LiveReceiver, LiveSender, ServerEvent,
    parse_server_message,
};
pub use types::ResponseModality;
