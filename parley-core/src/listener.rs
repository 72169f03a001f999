//! Outbound collaborator contracts and engine events

use crate::notification::{Message, RoleChangeRequest, Speaker};
use crate::peer::Peer;
use crate::track::{RemoteTrack, TrackError};
use crate::types::{MediaKind, PeerId, TrackSource};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Peer-level update kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerUpdate {
    /// Peer joined
    PeerJoined,
    /// Peer left
    PeerLeft,
    /// Peer is now the loudest speaker
    BecameDominantSpeaker,
    /// Nobody is speaking
    ResignedDominantSpeaker,
}

impl fmt::Display for PeerUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PeerJoined => "PEER_JOINED",
            Self::PeerLeft => "PEER_LEFT",
            Self::BecameDominantSpeaker => "BECAME_DOMINANT_SPEAKER",
            Self::ResignedDominantSpeaker => "RESIGNED_DOMINANT_SPEAKER",
        })
    }
}

/// Track-level update kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackUpdate {
    /// Track attached to its peer
    TrackAdded,
    /// Track detached from its peer
    TrackRemoved,
    /// Remote side muted
    TrackMuted,
    /// Remote side unmuted
    TrackUnmuted,
    /// Description changed with mute unchanged
    TrackDescriptionChanged,
}

impl fmt::Display for TrackUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TrackAdded => "TRACK_ADDED",
            Self::TrackRemoved => "TRACK_REMOVED",
            Self::TrackMuted => "TRACK_MUTED",
            Self::TrackUnmuted => "TRACK_UNMUTED",
            Self::TrackDescriptionChanged => "TRACK_DESCRIPTION_CHANGED",
        })
    }
}

/// Receiver of reconciled peer and track updates
///
/// Callbacks run synchronously inside the engine; implementations must not
/// block.
///
/// When the engine is owned by a [`crate::session::SessionClient`], callbacks
/// run while the session holds its engine lock. That lock is not reentrant:
/// a callback must not call back into the session (`handle_notification`,
/// `with_engine` and the like) or it deadlocks. Queue the follow-up instead
/// and apply it once the dispatching call has returned.
pub trait UpdateListener: Send + Sync {
    /// Peer update; `peer` is `None` only for `ResignedDominantSpeaker`
    fn on_peer_update(&self, update: PeerUpdate, peer: Option<&Peer>);

    /// Track update for `track` owned by `peer`
    fn on_track_update(&self, update: TrackUpdate, track: &RemoteTrack, peer: &Peer);

    /// Broadcast message
    fn on_message_received(&self, message: &Message);
}

/// Receiver of audio level updates
pub trait AudioListener: Send + Sync {
    /// Ranked speaker list, loudest first
    fn on_audio_level_update(&self, speakers: &[Speaker]);
}

/// Receiver of non-fatal local media failures
pub trait TransportObserver: Send + Sync {
    /// A local track could not be acquired as requested
    fn on_failure(&self, error: &TrackError);
}

/// Typed events the engine publishes to in-process consumers
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Role change requested by the server
    RoleChange(RoleChangeRequest),
    /// Remote audio track attached
    AudioTrackAdded {
        /// Owner
        peer_id: PeerId,
        /// Track
        track: RemoteTrack,
    },
    /// Remote audio track detached
    AudioTrackRemoved {
        /// Owner
        peer_id: PeerId,
        /// Track
        track: RemoteTrack,
    },
}

/// Owned snapshot of a listener callback, for recording and printing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ListenerEvent {
    /// `on_peer_update`
    Peer {
        /// Update kind
        update: PeerUpdate,
        /// Peer, absent for a resigned dominant speaker
        peer_id: Option<PeerId>,
    },
    /// `on_track_update`
    Track {
        /// Update kind
        update: TrackUpdate,
        /// Owner
        peer_id: PeerId,
        /// Native track id
        track_id: String,
        /// Stream id
        stream_id: String,
        /// Kind
        kind: MediaKind,
        /// Source at the time of the event
        source: TrackSource,
        /// Enabled flag at the time of the event
        enabled: bool,
    },
    /// `on_message_received`
    Message {
        /// Sender
        sender: Option<PeerId>,
        /// Body
        message: String,
    },
    /// `on_audio_level_update`
    AudioLevel {
        /// Speakers, loudest first
        speakers: Vec<Speaker>,
    },
}

impl ListenerEvent {
    /// Snapshot of a peer update
    #[must_use]
    pub fn peer(update: PeerUpdate, peer: Option<&Peer>) -> Self {
        Self::Peer {
            update,
            peer_id: peer.map(|p| p.peer_id.clone()),
        }
    }

    /// Snapshot of a track update
    #[must_use]
    pub fn track(update: TrackUpdate, track: &RemoteTrack, peer: &Peer) -> Self {
        Self::Track {
            update,
            peer_id: peer.peer_id.clone(),
            track_id: track.track_id().to_string(),
            stream_id: track.stream_id().to_string(),
            kind: track.kind(),
            source: track.source().clone(),
            enabled: track.is_enabled(),
        }
    }

    /// Snapshot of a message
    #[must_use]
    pub fn message(message: &Message) -> Self {
        Self::Message {
            sender: message.sender.clone(),
            message: message.message.clone(),
        }
    }

    /// Track update kind, if this is a track event
    #[must_use]
    pub fn track_update(&self) -> Option<TrackUpdate> {
        match self {
            Self::Track { update, .. } => Some(*update),
            _ => None,
        }
    }

    /// Peer update kind, if this is a peer event
    #[must_use]
    pub fn peer_update(&self) -> Option<PeerUpdate> {
        match self {
            Self::Peer { update, .. } => Some(*update),
            _ => None,
        }
    }
}
