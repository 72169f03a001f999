//! Decoded signaling notifications
//!
//! The transport hands the engine fully decoded values. Serde derives exist
//! so recorded sessions can be replayed; they do not define a wire format.

use crate::types::{CompositeTrackId, MediaKind, PeerId, TrackSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Track metadata as carried by a notification
///
/// Only the composite identity is mandatory; omitted fields leave the
/// previously known value untouched when merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Stream the track belongs to
    pub stream_id: String,
    /// Media kind
    #[serde(rename = "type")]
    pub kind: MediaKind,
    /// Server-side track id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    /// Source tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<TrackSource>,
    /// Remote mute state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mute: Option<bool>,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl TrackInfo {
    /// Metadata for a track with every field set
    pub fn new(stream_id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            stream_id: stream_id.into(),
            kind,
            track_id: None,
            source: Some(TrackSource::Regular),
            mute: Some(false),
            description: None,
        }
    }

    /// Set the source tag
    #[must_use]
    pub fn with_source(mut self, source: TrackSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the mute flag
    #[must_use]
    pub fn with_mute(mut self, mute: bool) -> Self {
        self.mute = Some(mute);
        self
    }

    /// Set the description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Composite identity
    #[must_use]
    pub fn composite_id(&self) -> CompositeTrackId {
        CompositeTrackId::new(self.stream_id.clone(), self.kind)
    }
}

/// Last known metadata for a track, with every field resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackState {
    /// Stream id
    pub stream_id: String,
    /// Media kind
    pub kind: MediaKind,
    /// Server-side track id
    pub track_id: Option<String>,
    /// Source tag
    pub source: TrackSource,
    /// Remote mute state
    pub mute: bool,
    /// Description
    pub description: Option<String>,
}

impl TrackState {
    /// Resolve `info`, defaulting omitted fields
    #[must_use]
    pub fn from_info(info: &TrackInfo) -> Self {
        Self {
            stream_id: info.stream_id.clone(),
            kind: info.kind,
            track_id: info.track_id.clone(),
            source: info.source.clone().unwrap_or_default(),
            mute: info.mute.unwrap_or(false),
            description: info.description.clone(),
        }
    }

    /// New state with the fields present in `info` applied
    #[must_use]
    pub fn merged(&self, info: &TrackInfo) -> Self {
        Self {
            stream_id: self.stream_id.clone(),
            kind: self.kind,
            track_id: info.track_id.clone().or_else(|| self.track_id.clone()),
            source: info.source.clone().unwrap_or_else(|| self.source.clone()),
            mute: info.mute.unwrap_or(self.mute),
            description: info
                .description
                .clone()
                .or_else(|| self.description.clone()),
        }
    }
}

/// Peer-supplied profile fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Customer description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Customer user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Peer join/leave payload and peer list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerNotification {
    /// Peer id
    pub peer_id: PeerId,
    /// Role name
    #[serde(default)]
    pub role: String,
    /// Profile
    #[serde(default)]
    pub info: PeerInfo,
    /// Tracks the peer publishes
    #[serde(default)]
    pub tracks: Vec<TrackInfo>,
}

impl PeerNotification {
    /// Payload with only a peer id and display name
    pub fn new(peer_id: impl Into<PeerId>, name: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            role: String::new(),
            info: PeerInfo {
                name: name.into(),
                ..Default::default()
            },
            tracks: Vec::new(),
        }
    }

    /// Add a published track
    #[must_use]
    pub fn with_track(mut self, track: TrackInfo) -> Self {
        self.tracks.push(track);
        self
    }

    /// Set the role
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }
}

/// Full list of peers in the room
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerListNotification {
    /// Peers, in server order
    #[serde(default)]
    pub peers: Vec<PeerNotification>,
}

/// Reference to the peer a track notification concerns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRef {
    /// Peer id
    pub peer_id: PeerId,
}

/// Track metadata add/update payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackStateNotification {
    /// Owning peer
    pub peer: PeerRef,
    /// Track metadata entries
    #[serde(default)]
    pub tracks: Vec<TrackInfo>,
}

impl TrackStateNotification {
    /// Payload for `peer_id`
    pub fn new(peer_id: impl Into<PeerId>, tracks: Vec<TrackInfo>) -> Self {
        Self {
            peer: PeerRef {
                peer_id: peer_id.into(),
            },
            tracks,
        }
    }
}

/// Request to change a peer's role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChangeRequest {
    /// Requesting peer
    #[serde(default)]
    pub requested_by: Option<PeerId>,
    /// Target role
    pub role: String,
    /// Whether the change is applied without consent
    #[serde(default)]
    pub force: bool,
}

/// Entry of the ranked active speaker list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    /// Speaking peer
    pub peer_id: PeerId,
    /// Track carrying the speech
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    /// Audio level
    pub level: u32,
}

/// Ranked active speakers, loudest first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerList {
    /// Speakers in descending level order
    #[serde(default)]
    pub speakers: Vec<Speaker>,
}

/// Broadcast chat/application message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sending peer
    #[serde(default)]
    pub sender: Option<PeerId>,
    /// Body
    pub message: String,
    /// Application-defined type
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    /// Server timestamp
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
}

/// A decoded signaling notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "kebab-case")]
pub enum Notification {
    /// A peer joined
    PeerJoin(PeerNotification),
    /// A peer left
    PeerLeave(PeerNotification),
    /// Full peer list (initial join or reconnect)
    PeerList(PeerListNotification),
    /// Track metadata registered
    TrackMetadataAdd(TrackStateNotification),
    /// Track metadata changed
    TrackUpdate(TrackStateNotification),
    /// Role change request
    RoleChange(RoleChangeRequest),
    /// Ranked active speakers
    ActiveSpeakers(SpeakerList),
    /// Broadcast message
    Broadcast(Message),
}

impl Notification {
    /// Method name used in logs
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::PeerJoin(_) => "peer-join",
            Self::PeerLeave(_) => "peer-leave",
            Self::PeerList(_) => "peer-list",
            Self::TrackMetadataAdd(_) => "track-metadata-add",
            Self::TrackUpdate(_) => "track-update",
            Self::RoleChange(_) => "role-change",
            Self::ActiveSpeakers(_) => "active-speakers",
            Self::Broadcast(_) => "broadcast",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_track_update() {
        let json = r#"{
            "method": "track-update",
            "params": {
                "peer": {"peer_id": "p1"},
                "tracks": [{"stream_id": "s1", "type": "audio", "mute": true}]
            }
        }"#;
        let notification: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(notification.method(), "track-update");
        let Notification::TrackUpdate(update) = notification else {
            panic!("wrong variant");
        };
        assert_eq!(update.peer.peer_id, PeerId::new("p1"));
        assert_eq!(update.tracks[0].mute, Some(true));
        assert_eq!(update.tracks[0].source, None);
    }

    #[test]
    fn test_merge_keeps_omitted_fields() {
        let full = TrackState::from_info(
            &TrackInfo::new("s1", MediaKind::Video)
                .with_source(TrackSource::Screen)
                .with_description("slides"),
        );
        let patch = TrackInfo {
            stream_id: "s1".to_string(),
            kind: MediaKind::Video,
            track_id: None,
            source: None,
            mute: Some(true),
            description: None,
        };
        let merged = full.merged(&patch);
        assert!(merged.mute);
        assert_eq!(merged.source, TrackSource::Screen);
        assert_eq!(merged.description.as_deref(), Some("slides"));
    }

    #[test]
    fn test_unknown_method_fails_to_decode() {
        let json = r#"{"method": "policy-change", "params": {}}"#;
        assert!(serde_json::from_str::<Notification>(json).is_err());
    }
}
