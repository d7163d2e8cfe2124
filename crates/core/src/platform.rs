//! The seams between the agent and the services it runs on.
//!
//! The room transport, the realtime model, the voice session and the avatar
//! provider all live outside this crate. The entry point in
//! [`crate::session`] only sees them through these traits, so the same setup
//! routine drives LiveKit and Gemini in production and recording fakes in
//! tests.

use crate::avatar::{AvatarError, AvatarOverlay};
use crate::config::{AvatarCredentials, AvatarProvider, ModelSettings};
use crate::events::RoomObserver;
use crate::session::SessionError;
use crate::vad::VadOptions;
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::{Arc, Mutex, PoisonError};

/// Output modalities a realtime model can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modality {
    Text,
    Audio,
}

/// Everything needed to open a realtime model connection.
#[derive(Clone, Debug)]
pub struct RealtimeModelOptions {
    pub api_key: SecretString,
    pub model: String,
    pub voice: String,
    pub instructions: String,
    pub temperature: f32,
    pub modalities: Vec<Modality>,
    /// `Some(0)` turns model "thinking" off for the lowest latency.
    pub thinking_budget: Option<u32>,
}

impl RealtimeModelOptions {
    /// Audio-only options with thinking disabled.
    pub fn from_settings(settings: &ModelSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            voice: settings.voice.clone(),
            instructions: settings.instructions.clone(),
            temperature: settings.temperature,
            modalities: vec![Modality::Audio],
            thinking_budget: Some(0),
        }
    }
}

/// Where a session plays the model's speech.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum AudioRoute {
    /// Publish the agent's own audio track in the room.
    #[default]
    RoomTrack,
    /// Stream audio to another participant, which publishes it on the
    /// agent's behalf.
    Participant { identity: String },
}

/// Shared handle to a session's audio output.
///
/// An avatar overlay redirects it to the avatar participant before the
/// session starts; the session reads the route once, when it starts.
#[derive(Clone, Debug, Default)]
pub struct AudioOutput {
    route: Arc<Mutex<AudioRoute>>,
}

impl AudioOutput {
    pub fn route(&self) -> AudioRoute {
        self.route
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn route_to_participant(&self, identity: impl Into<String>) {
        *self.route.lock().unwrap_or_else(PoisonError::into_inner) = AudioRoute::Participant {
            identity: identity.into(),
        };
    }
}

/// A room the agent is connected to.
pub trait Room: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Identity the agent holds in this room.
    fn local_identity(&self) -> &str;

    /// Registers an observer for participant and track events.
    fn add_observer(&self, observer: Arc<dyn RoomObserver>);
}

/// One inbound job: a room the agent has been asked to serve.
#[async_trait]
pub trait JobContext: Send {
    type Room: Room;

    fn room_name(&self) -> &str;

    /// Connects to the room, suspending until the server confirms or refuses.
    async fn connect(self) -> Result<Arc<Self::Room>, SessionError>;
}

/// A voice session binding a detector and a realtime model to a room.
#[async_trait]
pub trait AgentSession<R: Room>: Send + Sync {
    /// Output that an avatar overlay binds to.
    fn audio_output(&self) -> AudioOutput;

    async fn start(&self, room: &R) -> Result<(), SessionError>;
}

/// Factories for the per-session collaborators.
pub trait VoicePlatform: Send + Sync {
    type Room: Room;
    type Model: Send;
    type Vad: Send;
    type Session: AgentSession<Self::Room>;
    type Avatar: AvatarOverlay;

    fn realtime_model(&self, options: RealtimeModelOptions) -> Result<Self::Model, SessionError>;

    fn vad(&self, options: VadOptions) -> Result<Self::Vad, SessionError>;

    fn session(&self, vad: Self::Vad, model: Self::Model) -> Result<Self::Session, SessionError>;

    fn avatar(
        &self,
        provider: AvatarProvider,
        credentials: &AvatarCredentials,
    ) -> Result<Self::Avatar, AvatarError>;
}
