//! The agent entry point.
//!
//! [`run_session`] is invoked once per inbound job. It connects to the room,
//! builds the realtime model, the voice-activity detector and the session that
//! binds them, optionally starts an avatar overlay, registers the room
//! observers and finally starts the session. Only the avatar is allowed to
//! fail without ending the job.

use crate::avatar::{AvatarBinding, AvatarError, AvatarOverlay};
use crate::config::{AvatarProvider, Config};
use crate::events::RoomObserver;
use crate::platform::{AgentSession, JobContext, RealtimeModelOptions, Room, VoicePlatform};
use crate::vad::VadOptions;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to connect to room '{room}': {reason}")]
    Connection { room: String, reason: String },
    #[error("Realtime model error: {0}")]
    Model(String),
    #[error("Session setup failed: {0}")]
    Setup(String),
}

/// How the avatar step of a session turned out.
#[derive(Debug)]
pub enum AvatarOutcome {
    /// No provider selected, or the selected provider has no credentials.
    NotConfigured,
    Started(AvatarProvider),
    /// Construction or start failed; the session runs audio-only.
    Degraded {
        provider: AvatarProvider,
        error: AvatarError,
    },
}

impl AvatarOutcome {
    pub fn is_active(&self) -> bool {
        matches!(self, AvatarOutcome::Started(_))
    }
}

/// A started session. Dropping it does not stop anything; the platform owns
/// the session's lifetime. Call [`RunningSession::stop_avatar`] when the job
/// ends.
pub struct RunningSession<P: VoicePlatform> {
    pub room: Arc<P::Room>,
    pub session: P::Session,
    pub avatar: AvatarOutcome,
    /// The overlay, kept only while it is running.
    pub overlay: Option<P::Avatar>,
}

impl<P: VoicePlatform> RunningSession<P> {
    /// Ends the avatar provider's session, if one was started. Failures are
    /// logged, not returned.
    pub async fn stop_avatar(&mut self) {
        let Some(overlay) = self.overlay.take() else {
            return;
        };
        let provider = overlay.provider();
        match overlay.stop().await {
            Ok(()) => info!(%provider, "Avatar stopped"),
            Err(error) => warn!(%provider, %error, "Failed to stop avatar"),
        }
    }
}

enum AvatarPlan<A> {
    Ready(A),
    Skip(AvatarOutcome),
}

/// Runs the setup routine for one job.
///
/// Connection, model, detector and session failures are logged and returned.
/// Avatar failures are logged as warnings and recorded in
/// [`RunningSession::avatar`].
pub async fn run_session<P, J>(
    config: &Config,
    platform: &P,
    job: J,
    observers: Vec<Arc<dyn RoomObserver>>,
) -> Result<RunningSession<P>, SessionError>
where
    P: VoicePlatform,
    J: JobContext<Room = P::Room>,
{
    info!(agent = %config.agent.name, room = %job.room_name(), "Agent starting");

    let room = job.connect().await.inspect_err(|e| {
        error!(error = %e, "Error in agent entrypoint");
    })?;
    info!(room = %room.name(), "Connected to room");

    match start_in_room(config, platform, room, observers).await {
        Ok(running) => {
            info!(
                agent = %config.agent.name,
                avatar = running.avatar.is_active(),
                "Agent started successfully"
            );
            Ok(running)
        }
        Err(e) => {
            error!(error = %e, "Error in agent entrypoint");
            Err(e)
        }
    }
}

async fn start_in_room<P: VoicePlatform>(
    config: &Config,
    platform: &P,
    room: Arc<P::Room>,
    observers: Vec<Arc<dyn RoomObserver>>,
) -> Result<RunningSession<P>, SessionError> {
    let model = platform.realtime_model(RealtimeModelOptions::from_settings(&config.model))?;
    let vad = platform.vad(VadOptions::default())?;
    let session = platform.session(vad, model)?;

    let plan = match config.avatar.selected() {
        None => {
            info!("Avatar not configured, continuing with audio-only mode");
            AvatarPlan::Skip(AvatarOutcome::NotConfigured)
        }
        Some((provider, credentials)) => match platform.avatar(provider, credentials) {
            Ok(avatar) => AvatarPlan::Ready(avatar),
            Err(error) => {
                warn!(%provider, %error, "Failed to create avatar session, continuing without avatar");
                AvatarPlan::Skip(AvatarOutcome::Degraded { provider, error })
            }
        },
    };

    for observer in observers {
        room.add_observer(observer);
    }

    let (avatar, overlay) = match plan {
        AvatarPlan::Skip(outcome) => (outcome, None),
        AvatarPlan::Ready(avatar) => {
            let provider = avatar.provider();
            let binding = AvatarBinding {
                room: room.name().to_string(),
                agent_identity: room.local_identity().to_string(),
                audio: session.audio_output(),
            };
            match avatar.start(binding).await {
                Ok(()) => {
                    info!(%provider, "Avatar started");
                    (AvatarOutcome::Started(provider), Some(avatar))
                }
                Err(error) => {
                    warn!(%provider, %error, "Failed to start avatar, continuing in audio-only mode");
                    (AvatarOutcome::Degraded { provider, error }, None)
                }
            }
        }
    };

    session.start(&room).await?;
    if avatar.is_active() {
        info!("Agent started with avatar");
    } else {
        info!("Agent started in audio-only mode");
    }

    Ok(RunningSession {
        room,
        session,
        avatar,
        overlay,
    })
}
