//! Connection handling for a Gemini Live session.

use crate::audio::{self, INPUT_MIME_TYPE};
use crate::types::{
    AudioTranscriptionConfig, BidiGenerateContentClientContent, BidiGenerateContentRealtimeInput,
    BidiGenerateContentSetup, Blob, ClientMessage, Content, GenerationConfig, Part,
    PrebuiltVoiceConfig, ResponseModality, ServerMessage, SpeechConfig, ThinkingConfig,
    VoiceConfig,
};
use anyhow::{Context, Result, anyhow, bail};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Parameters of a Live session. Sent once in the setup message.
#[derive(Clone, Debug)]
pub struct LiveConfig {
    pub api_key: SecretString,
    pub model: String,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub temperature: Option<f32>,
    pub response_modalities: Vec<ResponseModality>,
    pub thinking_budget: Option<u32>,
    pub input_transcription: bool,
    pub output_transcription: bool,
    pub endpoint: String,
}

impl LiveConfig {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            voice: None,
            instructions: None,
            temperature: None,
            response_modalities: vec![ResponseModality::Audio],
            thinking_budget: None,
            input_transcription: true,
            output_transcription: true,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// The endpoint with the API key appended to its query.
    pub(crate) fn live_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .with_context(|| format!("Invalid Gemini Live endpoint {}", self.endpoint))?;
        url.query_pairs_mut()
            .append_pair("key", self.api_key.expose_secret());
        Ok(url)
    }

    pub(crate) fn setup_message(&self) -> ClientMessage {
        let model = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        ClientMessage::Setup(BidiGenerateContentSetup {
            model,
            generation_config: GenerationConfig {
                response_modalities: self.response_modalities.clone(),
                temperature: self.temperature,
                speech_config: self.voice.as_ref().map(|voice| SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.clone(),
                        },
                    },
                }),
                thinking_config: self
                    .thinking_budget
                    .map(|thinking_budget| ThinkingConfig { thinking_budget }),
            },
            system_instruction: self.instructions.as_ref().map(|text| Content {
                role: None,
                parts: vec![Part { text: text.clone() }],
            }),
            input_audio_transcription: self
                .input_transcription
                .then(AudioTranscriptionConfig::default),
            output_audio_transcription: self
                .output_transcription
                .then(AudioTranscriptionConfig::default),
        })
    }
}

/// Something the model sent back.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerEvent {
    /// 24 kHz mono PCM16.
    Audio(Vec<i16>),
    Text(String),
    InputTranscript(String),
    OutputTranscript(String),
    /// The user spoke over the model; queued output should be dropped.
    Interrupted,
    TurnComplete,
    /// The server will close the connection soon.
    GoAway { time_left: Option<String> },
}

/// Flattens one server message into events, in wire order.
pub fn parse_server_message(text: &str) -> Result<Vec<ServerEvent>> {
    let message: ServerMessage =
        serde_json::from_str(text).context("Failed to parse Gemini server message")?;
    let mut events = Vec::new();

    if let Some(content) = message.server_content {
        if let Some(transcription) = content.input_transcription {
            events.push(ServerEvent::InputTranscript(transcription.text));
        }
        if content.interrupted == Some(true) {
            events.push(ServerEvent::Interrupted);
        }
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(blob) = part.inline_data {
                    let samples = audio::decode_pcm16(&blob.data)
                        .context("Model audio was not valid base64")?;
                    events.push(ServerEvent::Audio(samples));
                }
                if let Some(text) = part.text {
                    events.push(ServerEvent::Text(text));
                }
            }
        }
        if let Some(transcription) = content.output_transcription {
            events.push(ServerEvent::OutputTranscript(transcription.text));
        }
        if content.turn_complete == Some(true) {
            events.push(ServerEvent::TurnComplete);
        }
    }
    if let Some(go_away) = message.go_away {
        events.push(ServerEvent::GoAway {
            time_left: go_away.time_left,
        });
    }
    Ok(events)
}

pub struct LiveClient;

impl LiveClient {
    /// Opens the socket, sends setup and waits for `setupComplete`.
    pub async fn connect(config: &LiveConfig) -> Result<(LiveSender, LiveReceiver)> {
        let url = config.live_url()?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to connect to Gemini Live at {}", config.endpoint))?;
        info!(model = %config.model, "Connected to Gemini Live WebSocket.");
        let (mut tx, mut rx) = ws_stream.split();

        let setup = serde_json::to_string(&config.setup_message())?;
        tx.send(WsMessage::Text(setup.into())).await?;

        loop {
            let frame = rx
                .next()
                .await
                .ok_or_else(|| anyhow!("Gemini closed the connection during setup"))?
                .context("Error reading from Gemini WebSocket during setup")?;
            let text = match frame {
                WsMessage::Text(text) => text.to_string(),
                WsMessage::Binary(bytes) => String::from_utf8(bytes.to_vec())
                    .context("Gemini sent a non-UTF-8 frame during setup")?,
                WsMessage::Close(close_frame) => {
                    bail!("Gemini rejected the session setup: {:?}", close_frame)
                }
                _ => continue,
            };
            match serde_json::from_str::<ServerMessage>(&text) {
                Ok(message) if message.setup_complete.is_some() => {
                    info!("Gemini session setup is complete. Ready for bidirectional streaming.");
                    break;
                }
                Ok(message) => warn!(?message, "Unexpected message during Gemini setup"),
                Err(_) => error!("Failed to parse Gemini message during setup. Raw text: {}", text),
            }
        }

        Ok((
            LiveSender {
                sink: Arc::new(Mutex::new(tx)),
            },
            LiveReceiver {
                stream: rx,
                pending: VecDeque::new(),
            },
        ))
    }
}

/// Write half of a Live session. Cheap to clone.
#[derive(Clone)]
pub struct LiveSender {
    sink: Arc<Mutex<SplitSink<WsStream, WsMessage>>>,
}

impl LiveSender {
    /// Streams 16 kHz mono PCM16 to the model.
    pub async fn send_audio(&self, samples: &[i16]) -> Result<()> {
        self.send(&ClientMessage::RealtimeInput(BidiGenerateContentRealtimeInput {
            audio: Some(Blob {
                mime_type: INPUT_MIME_TYPE.to_string(),
                data: audio::encode_pcm16(samples),
            }),
            audio_stream_end: None,
        }))
        .await
    }

    /// Tells the model the microphone went quiet, flushing any buffered audio.
    pub async fn end_audio_stream(&self) -> Result<()> {
        self.send(&ClientMessage::RealtimeInput(BidiGenerateContentRealtimeInput {
            audio: None,
            audio_stream_end: Some(true),
        }))
        .await
    }

    /// Adds a user text turn and asks the model to respond.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.send(&ClientMessage::ClientContent(BidiGenerateContentClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: text.to_string(),
                }],
            }],
            turn_complete: true,
        }))
        .await
    }

    pub async fn close(&self) -> Result<()> {
        self.sink.lock().await.close().await?;
        Ok(())
    }

    async fn send(&self, message: &ClientMessage) -> Result<()> {
        let payload = serde_json::to_string(message)?;
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(payload.into()))
            .await
            .context("Failed to send to Gemini")?;
        Ok(())
    }
}

/// Read half of a Live session.
pub struct LiveReceiver {
    stream: SplitStream<WsStream>,
    pending: VecDeque<ServerEvent>,
}

impl LiveReceiver {
    /// Next event from the model, or `None` once the socket has closed.
    pub async fn next_event(&mut self) -> Option<Result<ServerEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(e.into())),
            };
            let parsed = match frame {
                WsMessage::Text(text) => parse_server_message(&text),
                WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) => parse_server_message(text),
                    Err(e) => Err(e.into()),
                },
                WsMessage::Close(close_frame) => {
                    info!(?close_frame, "Gemini WebSocket connection closed by server.");
                    return None;
                }
                _ => continue,
            };
            match parsed {
                Ok(events) => self.pending.extend(events),
                Err(e) => debug!(error = %e, "Skipping unparseable Gemini message"),
            }
        }
    }
}
