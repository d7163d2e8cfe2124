//! Room lifecycle events and the observers that receive them.
//!
//! The platform adapter translates its own room callbacks into [`RoomEvent`]
//! records and hands each one to every registered [`RoomObserver`]. Observers
//! only watch; they never touch session state.

use tracing::info;

/// What kind of media a track carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A snapshot of a remote participant at the time of the event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub identity: String,
    pub sid: String,
    pub name: String,
}

/// A snapshot of a remote track publication at the time of the event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackInfo {
    pub sid: String,
    pub kind: TrackKind,
    pub name: String,
}

/// The room events the agent observes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomEvent {
    ParticipantConnected {
        participant: ParticipantInfo,
        /// Remote participants in the room after this one joined.
        remote_participants: usize,
    },
    ParticipantDisconnected {
        participant: ParticipantInfo,
    },
    TrackPublished {
        track: TrackInfo,
        participant: ParticipantInfo,
    },
    TrackUnpublished {
        track: TrackInfo,
        participant: ParticipantInfo,
    },
}

/// Receives room events. Implementations must not block.
pub trait RoomObserver: Send + Sync {
    fn on_event(&self, room: &str, event: &RoomEvent);
}

/// Records every room event in the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingObserver;

impl RoomObserver for LoggingObserver {
    fn on_event(&self, room: &str, event: &RoomEvent) {
        match event {
            RoomEvent::ParticipantConnected {
                participant,
                remote_participants,
            } => {
                info!(
                    %room,
                    identity = %participant.identity,
                    sid = %participant.sid,
                    "Participant connected"
                );
                info!(%room, participants = remote_participants, "Room participant count changed");
            }
            RoomEvent::ParticipantDisconnected { participant } => {
                info!(
                    %room,
                    identity = %participant.identity,
                    sid = %participant.sid,
                    "Participant disconnected"
                );
            }
            RoomEvent::TrackPublished { track, participant } => {
                info!(
                    %room,
                    identity = %participant.identity,
                    kind = ?track.kind,
                    track_sid = %track.sid,
                    "Track published"
                );
            }
            RoomEvent::TrackUnpublished { track, participant } => {
                info!(
                    %room,
                    identity = %participant.identity,
                    kind = ?track.kind,
                    track_sid = %track.sid,
                    "Track unpublished"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> ParticipantInfo {
        ParticipantInfo {
            identity: "alice".to_string(),
            sid: "PA_alice".to_string(),
            name: "Alice".to_string(),
        }
    }

    #[test]
    fn test_logging_observer_handles_every_event() {
        let track = TrackInfo {
            sid: "TR_mic".to_string(),
            kind: TrackKind::Audio,
            name: "microphone".to_string(),
        };
        let events = [
            RoomEvent::ParticipantConnected {
                participant: alice(),
                remote_participants: 1,
            },
            RoomEvent::TrackPublished {
                track: track.clone(),
                participant: alice(),
            },
            RoomEvent::TrackUnpublished {
                track,
                participant: alice(),
            },
            RoomEvent::ParticipantDisconnected { participant: alice() },
        ];
        for event in &events {
            LoggingObserver.on_event("call-test", event);
        }
    }

    #[test]
    fn test_events_are_comparable_snapshots() {
        let joined = RoomEvent::ParticipantConnected {
            participant: alice(),
            remote_participants: 2,
        };
        assert_eq!(joined.clone(), joined);
        assert_ne!(
            joined,
            RoomEvent::ParticipantDisconnected { participant: alice() }
        );
    }
}
