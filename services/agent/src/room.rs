//! LiveKit rooms as seen by the session entry point.

use aram_core::config::Config;
use aram_core::events::{ParticipantInfo, RoomEvent, RoomObserver, TrackInfo, TrackKind};
use aram_core::platform::{JobContext, Room};
use aram_core::session::SessionError;
use aram_core::token::TokenMinter;
use async_trait::async_trait;
use livekit::options::TrackPublishOptions;
use livekit::participant::{LocalParticipant, RemoteParticipant};
use livekit::publication::RemoteTrackPublication;
use livekit::track::{LocalAudioTrack, LocalTrack, RemoteAudioTrack, RemoteTrack};
use livekit::{RoomOptions, RoomResult};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

type Observers = Arc<Mutex<Vec<Arc<dyn RoomObserver>>>>;

/// A request to serve one room, joining as a freshly named agent participant.
pub struct LiveKitJob {
    room: String,
    url: String,
    identity: String,
    display_name: String,
    minter: TokenMinter,
}

impl LiveKitJob {
    pub fn new(config: &Config, room: String) -> Self {
        Self {
            room,
            url: config.livekit.url.clone(),
            identity: config.agent.new_participant_identity(),
            display_name: config.agent.name.clone(),
            minter: TokenMinter::new(&config.livekit),
        }
    }
}

#[async_trait]
impl JobContext for LiveKitJob {
    type Room = LiveKitRoom;

    fn room_name(&self) -> &str {
        &self.room
    }

    async fn connect(self) -> Result<Arc<LiveKitRoom>, SessionError> {
        let failed = |reason: String| SessionError::Connection {
            room: self.room.clone(),
            reason,
        };
        let token = self
            .minter
            .join_token(&self.room, &self.identity, &self.display_name, None)
            .map_err(|e| failed(e.to_string()))?;
        let (room, events) = livekit::Room::connect(&self.url, &token, RoomOptions::default())
            .await
            .map_err(|e| failed(e.to_string()))?;

        Ok(Arc::new(LiveKitRoom::new(room, events, self.identity)))
    }
}

/// A connected room. Room events are pumped to the registered observers for
/// as long as the connection lasts.
pub struct LiveKitRoom {
    inner: livekit::Room,
    name: String,
    identity: String,
    observers: Observers,
    audio_tracks: Mutex<Option<mpsc::UnboundedReceiver<RemoteAudioTrack>>>,
    disconnected: watch::Receiver<bool>,
}

impl LiveKitRoom {
    fn new(
        inner: livekit::Room,
        events: mpsc::UnboundedReceiver<livekit::RoomEvent>,
        identity: String,
    ) -> Self {
        let name = inner.name();
        let observers: Observers = Arc::default();
        let (tracks_tx, tracks_rx) = mpsc::unbounded_channel();
        let (disconnected_tx, disconnected) = watch::channel(false);
        let present = inner
            .remote_participants()
            .keys()
            .map(|identity| identity.0.clone())
            .collect();

        tokio::spawn(pump_events(
            EventPump {
                room: name.clone(),
                observers: observers.clone(),
                present,
                audio_tracks: tracks_tx,
                disconnected: disconnected_tx,
            },
            events,
        ));

        Self {
            inner,
            name,
            identity,
            observers,
            audio_tracks: Mutex::new(Some(tracks_rx)),
            disconnected,
        }
    }

    /// Hands over every subscribed remote audio track, including ones that
    /// arrived before the call. Only the first caller gets the stream.
    pub fn take_audio_tracks(&self) -> Option<mpsc::UnboundedReceiver<RemoteAudioTrack>> {
        self.audio_tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub async fn publish_audio(&self, track: LocalAudioTrack) -> RoomResult<()> {
        self.inner
            .local_participant()
            .publish_track(LocalTrack::Audio(track), TrackPublishOptions::default())
            .await?;
        Ok(())
    }

    pub fn local_participant(&self) -> LocalParticipant {
        self.inner.local_participant()
    }

    /// Resolves once the server ends the connection.
    pub async fn disconnected(&self) {
        let mut disconnected = self.disconnected.clone();
        let _ = disconnected.wait_for(|gone| *gone).await;
    }

    pub async fn close(&self) -> RoomResult<()> {
        self.inner.close().await
    }
}

impl Room for LiveKitRoom {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_identity(&self) -> &str {
        &self.identity
    }

    fn add_observer(&self, observer: Arc<dyn RoomObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }
}

struct EventPump {
    room: String,
    observers: Observers,
    present: HashSet<String>,
    audio_tracks: mpsc::UnboundedSender<RemoteAudioTrack>,
    disconnected: watch::Sender<bool>,
}

impl EventPump {
    fn notify(&self, event: RoomEvent) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_event(&self.room, &event);
        }
    }

    fn handle(&mut self, event: livekit::RoomEvent) {
        match event {
            livekit::RoomEvent::ParticipantConnected(participant) => {
                let participant = participant_info(&participant);
                self.present.insert(participant.identity.clone());
                self.notify(RoomEvent::ParticipantConnected {
                    participant,
                    remote_participants: self.present.len(),
                });
            }
            livekit::RoomEvent::ParticipantDisconnected(participant) => {
                let participant = participant_info(&participant);
                self.present.remove(&participant.identity);
                self.notify(RoomEvent::ParticipantDisconnected { participant });
            }
            livekit::RoomEvent::TrackPublished {
                publication,
                participant,
            } => self.notify(RoomEvent::TrackPublished {
                track: track_info(&publication),
                participant: participant_info(&participant),
            }),
            livekit::RoomEvent::TrackUnpublished {
                publication,
                participant,
            } => self.notify(RoomEvent::TrackUnpublished {
                track: track_info(&publication),
                participant: participant_info(&participant),
            }),
            livekit::RoomEvent::TrackSubscribed {
                track: RemoteTrack::Audio(track),
                participant,
                ..
            } => {
                debug!(participant = %participant.identity().0, "Subscribed to audio track");
                if self.audio_tracks.send(track).is_err() {
                    debug!("Audio track receiver dropped");
                }
            }
            livekit::RoomEvent::Disconnected { reason } => {
                info!(room = %self.room, ?reason, "Disconnected from room");
                self.disconnected.send_replace(true);
            }
            _ => {}
        }
    }
}

async fn pump_events(mut pump: EventPump, mut events: mpsc::UnboundedReceiver<livekit::RoomEvent>) {
    while let Some(event) = events.recv().await {
        pump.handle(event);
    }
    if !*pump.disconnected.borrow() {
        warn!(room = %pump.room, "Room event stream ended");
        pump.disconnected.send_replace(true);
    }
}

fn participant_info(participant: &RemoteParticipant) -> ParticipantInfo {
    ParticipantInfo {
        identity: participant.identity().0,
        sid: participant.sid().to_string(),
        name: participant.name(),
    }
}

fn track_info(publication: &RemoteTrackPublication) -> TrackInfo {
    TrackInfo {
        sid: publication.sid().to_string(),
        kind: match publication.kind() {
            livekit::track::TrackKind::Audio => TrackKind::Audio,
            livekit::track::TrackKind::Video => TrackKind::Video,
        },
        name: publication.name(),
    }
}
