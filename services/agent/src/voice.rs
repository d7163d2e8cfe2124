//! Gemini Live voice sessions over LiveKit audio.
//!
//! Participant audio is pulled from every subscribed track at 16 kHz and
//! streamed to the model. Model audio is played into a published 24 kHz
//! track, or sent to the avatar participant as a byte stream when an avatar
//! overlay has claimed the session's audio. The voice-activity detector
//! watches participant audio and drops queued agent speech as soon as the
//! user talks over it.

use crate::room::LiveKitRoom;
use aram_core::avatar::{AvatarError, HostedAvatar};
use aram_core::config::{AvatarCredentials, AvatarProvider, LiveKitSettings};
use aram_core::platform::{
    AgentSession, AudioOutput, AudioRoute, Modality, RealtimeModelOptions, Room, VoicePlatform,
};
use aram_core::session::SessionError;
use aram_core::vad::{VadEvent, VadOptions, VoiceActivityDetector};
use async_trait::async_trait;
use futures::StreamExt;
use gemini_realtime::{
    INPUT_SAMPLE_RATE, LiveClient, LiveConfig, LiveReceiver, LiveSender, OUTPUT_SAMPLE_RATE,
    ResponseModality, ServerEvent,
};
use livekit::prelude::{LocalParticipant, ParticipantIdentity, PerformRpcData};
use livekit::track::{LocalAudioTrack, RemoteAudioTrack};
use livekit::webrtc::audio_frame::AudioFrame;
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::audio_source::{AudioSourceOptions, RtcAudioSource};
use livekit::webrtc::audio_stream::native::NativeAudioStream;
use livekit::{ByteStreamWriter, StreamByteOptions, StreamWriter};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

const PLAYBACK_QUEUE_MS: u32 = 1000;

/// Byte stream topic an avatar worker reads agent audio from.
pub const AUDIO_STREAM_TOPIC: &str = "lk.audio_stream";
/// RPC method that makes an avatar worker drop the audio it has queued.
pub const CLEAR_BUFFER_RPC: &str = "lk.clear_buffer";

/// Builds LiveKit/Gemini sessions and hosted avatars.
pub struct GeminiPlatform {
    livekit: LiveKitSettings,
}

impl GeminiPlatform {
    pub fn new(livekit: LiveKitSettings) -> Self {
        Self { livekit }
    }
}

impl VoicePlatform for GeminiPlatform {
    type Room = LiveKitRoom;
    type Model = LiveConfig;
    type Vad = VadOptions;
    type Session = VoiceSession;
    type Avatar = HostedAvatar;

    fn realtime_model(&self, options: RealtimeModelOptions) -> Result<LiveConfig, SessionError> {
        live_config(options)
    }

    fn vad(&self, options: VadOptions) -> Result<VadOptions, SessionError> {
        if !(options.activation_threshold > 0.0 && options.activation_threshold < 1.0) {
            return Err(SessionError::Setup(format!(
                "VAD activation threshold {} is outside (0, 1)",
                options.activation_threshold
            )));
        }
        Ok(options)
    }

    fn session(&self, vad: VadOptions, model: LiveConfig) -> Result<VoiceSession, SessionError> {
        Ok(VoiceSession::new(model, vad))
    }

    fn avatar(
        &self,
        provider: AvatarProvider,
        credentials: &AvatarCredentials,
    ) -> Result<HostedAvatar, AvatarError> {
        HostedAvatar::new(provider, credentials, &self.livekit)
    }
}

fn live_config(options: RealtimeModelOptions) -> Result<LiveConfig, SessionError> {
    if options.modalities.is_empty() {
        return Err(SessionError::Model("no response modality requested".to_string()));
    }
    let response_modalities = options
        .modalities
        .iter()
        .map(|modality| match modality {
            Modality::Text => ResponseModality::Text,
            Modality::Audio => ResponseModality::Audio,
        })
        .collect();

    Ok(LiveConfig {
        voice: Some(options.voice),
        instructions: Some(options.instructions),
        temperature: Some(options.temperature),
        response_modalities,
        thinking_budget: options.thinking_budget,
        ..LiveConfig::new(options.api_key, options.model)
    })
}

/// One model conversation bound to one room.
pub struct VoiceSession {
    config: LiveConfig,
    vad: VadOptions,
    audio: AudioOutput,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    finished_tx: watch::Sender<bool>,
    finished: watch::Receiver<bool>,
}

impl VoiceSession {
    fn new(config: LiveConfig, vad: VadOptions) -> Self {
        let (finished_tx, finished) = watch::channel(false);
        Self {
            config,
            vad,
            audio: AudioOutput::default(),
            tasks: Mutex::new(Vec::new()),
            finished_tx,
            finished,
        }
    }

    /// Resolves once the model connection has closed.
    pub async fn finished(&self) {
        let mut finished = self.finished.clone();
        let _ = finished.wait_for(|done| *done).await;
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl AgentSession<LiveKitRoom> for VoiceSession {
    fn audio_output(&self) -> AudioOutput {
        self.audio.clone()
    }

    async fn start(&self, room: &LiveKitRoom) -> Result<(), SessionError> {
        let tracks = room
            .take_audio_tracks()
            .ok_or_else(|| SessionError::Setup("room audio is already bound to a session".to_string()))?;

        let (sender, receiver) = LiveClient::connect(&self.config)
            .await
            .map_err(|e| SessionError::Model(format!("{e:#}")))?;

        let playback = match self.audio.route() {
            AudioRoute::RoomTrack => {
                let source = NativeAudioSource::new(
                    AudioSourceOptions::default(),
                    OUTPUT_SAMPLE_RATE,
                    1,
                    PLAYBACK_QUEUE_MS,
                );
                let track = LocalAudioTrack::create_audio_track(
                    "agent-voice",
                    RtcAudioSource::Native(source.clone()),
                );
                room.publish_audio(track)
                    .await
                    .map_err(|e| SessionError::Setup(format!("Failed to publish agent audio: {e}")))?;
                info!(room = %room.name(), "Published agent audio track");
                Playback::Track(source)
            }
            AudioRoute::Participant { identity } => {
                info!(avatar = %identity, "Sending agent audio to the avatar");
                Playback::Avatar(AvatarStream::new(room.local_participant(), identity))
            }
        };

        let agent_speaking = Arc::new(AtomicBool::new(false));
        let interrupt = Arc::new(Notify::new());
        self.track(tokio::spawn(
            play_model_output(
                receiver,
                playback,
                agent_speaking.clone(),
                interrupt.clone(),
                self.finished_tx.clone(),
            )
            .in_current_span(),
        ));
        self.track(tokio::spawn(
            forward_participant_audio(tracks, sender, self.vad.clone(), agent_speaking, interrupt)
                .in_current_span(),
        ));
        Ok(())
    }
}

/// Where model audio goes.
enum Playback {
    Track(NativeAudioSource),
    Avatar(AvatarStream),
}

impl Playback {
    async fn play(&mut self, samples: Vec<i16>) {
        match self {
            Playback::Track(source) => {
                let frame = AudioFrame {
                    samples_per_channel: samples.len() as u32,
                    data: Cow::Owned(samples),
                    sample_rate: OUTPUT_SAMPLE_RATE,
                    num_channels: 1,
                };
                if let Err(e) = source.capture_frame(&frame).await {
                    warn!(error = %e, "Failed to play model audio");
                }
            }
            Playback::Avatar(avatar) => avatar.write(&samples).await,
        }
    }

    /// Ends the current segment.
    async fn flush(&mut self) {
        if let Playback::Avatar(avatar) = self {
            avatar.close_segment().await;
        }
    }

    /// Drops audio that has not been played yet.
    async fn clear(&mut self) {
        match self {
            Playback::Track(source) => source.clear_buffer(),
            Playback::Avatar(avatar) => avatar.clear().await,
        }
    }
}

/// Agent audio for an avatar participant, one byte stream per model turn.
struct AvatarStream {
    participant: LocalParticipant,
    destination: String,
    segment: Option<ByteStreamWriter>,
}

impl AvatarStream {
    fn new(participant: LocalParticipant, destination: String) -> Self {
        Self {
            participant,
            destination,
            segment: None,
        }
    }

    async fn write(&mut self, samples: &[i16]) {
        if self.segment.is_none() {
            let options = StreamByteOptions {
                topic: AUDIO_STREAM_TOPIC.to_string(),
                attributes: stream_attributes(),
                destination_identities: vec![ParticipantIdentity::from(self.destination.clone())],
                ..Default::default()
            };
            match self.participant.stream_bytes(options).await {
                Ok(writer) => self.segment = Some(writer),
                Err(e) => {
                    warn!(error = %e, avatar = %self.destination, "Failed to open avatar audio stream");
                    return;
                }
            }
        }
        let bytes = pcm_bytes(samples);
        if let Some(writer) = &self.segment {
            if let Err(e) = writer.write(bytes.as_slice()).await {
                warn!(error = %e, avatar = %self.destination, "Failed to send audio to the avatar");
                self.segment = None;
            }
        }
    }

    async fn close_segment(&mut self) {
        if let Some(writer) = self.segment.take() {
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Failed to close avatar audio stream");
            }
        }
    }

    async fn clear(&mut self) {
        self.close_segment().await;
        let request = PerformRpcData {
            destination_identity: self.destination.clone(),
            method: CLEAR_BUFFER_RPC.to_string(),
            ..Default::default()
        };
        if let Err(e) = self.participant.perform_rpc(request).await {
            warn!(error = %e, avatar = %self.destination, "Failed to clear avatar audio");
        }
    }
}

/// Stream attributes describing the PCM format of agent audio.
fn stream_attributes() -> HashMap<String, String> {
    HashMap::from([
        ("sample_rate".to_string(), OUTPUT_SAMPLE_RATE.to_string()),
        ("num_channels".to_string(), "1".to_string()),
    ])
}

/// Little-endian 16-bit PCM.
fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|sample| sample.to_le_bytes()).collect()
}

async fn play_model_output(
    mut receiver: LiveReceiver,
    mut playback: Playback,
    agent_speaking: Arc<AtomicBool>,
    interrupt: Arc<Notify>,
    finished: watch::Sender<bool>,
) {
    loop {
        let event = tokio::select! {
            event = receiver.next_event() => match event {
                Some(event) => event,
                None => break,
            },
            _ = interrupt.notified() => {
                info!("User interrupted the agent, dropping queued audio");
                playback.clear().await;
                continue;
            }
        };
        match event {
            Ok(ServerEvent::Audio(samples)) => {
                if samples.is_empty() {
                    continue;
                }
                agent_speaking.store(true, Ordering::SeqCst);
                playback.play(samples).await;
            }
            Ok(ServerEvent::Interrupted) => {
                debug!("Model output interrupted");
                agent_speaking.store(false, Ordering::SeqCst);
                playback.clear().await;
            }
            Ok(ServerEvent::TurnComplete) => {
                agent_speaking.store(false, Ordering::SeqCst);
                playback.flush().await;
            }
            Ok(ServerEvent::InputTranscript(text)) => info!(%text, "User"),
            Ok(ServerEvent::OutputTranscript(text)) | Ok(ServerEvent::Text(text)) => {
                info!(%text, "Agent")
            }
            Ok(ServerEvent::GoAway { time_left }) => {
                warn!(?time_left, "Gemini is closing the session soon");
            }
            Err(e) => {
                error!(error = %e, "Error reading from Gemini");
                break;
            }
        }
    }
    playback.flush().await;
    info!("Gemini session closed");
    finished.send_replace(true);
}

/// Runs one forwarder per subscribed track. Forwarders live in a [`JoinSet`],
/// so they are aborted when this task ends or is aborted.
async fn forward_participant_audio(
    mut tracks: mpsc::UnboundedReceiver<RemoteAudioTrack>,
    sender: LiveSender,
    vad: VadOptions,
    agent_speaking: Arc<AtomicBool>,
    interrupt: Arc<Notify>,
) {
    let mut forwarders = JoinSet::new();
    loop {
        tokio::select! {
            track = tracks.recv() => {
                let Some(track) = track else { break };
                let span = info_span!("participant_audio", track = %track.sid());
                forwarders.spawn(
                    forward_track(
                        track,
                        sender.clone(),
                        VoiceActivityDetector::new(vad.clone()),
                        agent_speaking.clone(),
                        interrupt.clone(),
                    )
                    .instrument(span),
                );
            }
            Some(finished) = forwarders.join_next() => {
                if let Err(e) = finished {
                    warn!(error = %e, "Participant audio forwarder failed");
                }
            }
        }
    }
    forwarders.shutdown().await;
}

async fn forward_track(
    track: RemoteAudioTrack,
    sender: LiveSender,
    mut vad: VoiceActivityDetector,
    agent_speaking: Arc<AtomicBool>,
    interrupt: Arc<Notify>,
) {
    let mut stream = NativeAudioStream::new(track.rtc_track(), INPUT_SAMPLE_RATE as i32, 1);
    while let Some(frame) = stream.next().await {
        match vad.process(&frame.data, frame.sample_rate) {
            Some(VadEvent::SpeechStarted) => {
                debug!("User started speaking");
                if agent_speaking.swap(false, Ordering::SeqCst) {
                    interrupt.notify_one();
                }
            }
            Some(VadEvent::SpeechEnded { speech_duration }) => {
                debug!(?speech_duration, "User stopped speaking");
            }
            None => {}
        }
        if let Err(e) = sender.send_audio(&frame.data).await {
            warn!(error = %e, "Stopped streaming participant audio");
            break;
        }
    }
}
