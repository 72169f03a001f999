//! Peer records and the peer registry

use crate::notification::{PeerInfo, PeerNotification};
use crate::track::{NativeTrack, RemoteTrack};
use crate::types::{CompositeTrackId, MediaKind, PeerId};
use indexmap::IndexMap;

/// Slot a track was attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSlot {
    /// Regular audio
    Audio,
    /// Regular video
    Video,
    /// Screen share, plugin output or any extra track
    Auxiliary,
}

/// A session participant
///
/// The regular slots hold at most one audio and one video track. The video
/// slot is reserved for the `regular` source, while the audio slot takes the
/// first audio track of any source; every other track is auxiliary. Tracks of the local peer
/// are local tracks owned by the local peer store, so its slots stay empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    /// Peer id
    pub peer_id: PeerId,
    /// Display name
    pub name: String,
    /// Role name
    pub role: String,
    /// Customer user id
    pub customer_user_id: Option<String>,
    /// Customer description
    pub customer_description: Option<String>,
    /// Whether this is the local participant
    pub is_local: bool,
    audio_track: Option<RemoteTrack>,
    video_track: Option<RemoteTrack>,
    auxiliary_tracks: Vec<RemoteTrack>,
}

impl Peer {
    /// Create a peer with no tracks
    pub fn new(peer_id: impl Into<PeerId>, name: impl Into<String>, is_local: bool) -> Self {
        Self {
            peer_id: peer_id.into(),
            name: name.into(),
            role: String::new(),
            customer_user_id: None,
            customer_description: None,
            is_local,
            audio_track: None,
            video_track: None,
            auxiliary_tracks: Vec::new(),
        }
    }

    /// Remote peer described by a join notification
    #[must_use]
    pub fn from_notification(notification: &PeerNotification) -> Self {
        let mut peer = Self::new(notification.peer_id.clone(), String::new(), false);
        peer.update_info(notification);
        peer
    }

    /// Apply profile fields from `notification`
    pub fn update_info(&mut self, notification: &PeerNotification) {
        self.name = notification.info.name.clone();
        self.role = notification.role.clone();
        self.customer_user_id = notification.info.user_id.clone();
        self.customer_description = notification.info.data.clone();
    }

    /// Leave payload preserving the last known profile
    #[must_use]
    pub fn to_notification(&self) -> PeerNotification {
        PeerNotification {
            peer_id: self.peer_id.clone(),
            role: self.role.clone(),
            info: PeerInfo {
                name: self.name.clone(),
                data: self.customer_description.clone(),
                user_id: self.customer_user_id.clone(),
            },
            tracks: Vec::new(),
        }
    }

    /// Regular audio track
    #[must_use]
    pub fn audio_track(&self) -> Option<&RemoteTrack> {
        self.audio_track.as_ref()
    }

    /// Regular video track
    #[must_use]
    pub fn video_track(&self) -> Option<&RemoteTrack> {
        self.video_track.as_ref()
    }

    /// Auxiliary tracks in arrival order
    #[must_use]
    pub fn auxiliary_tracks(&self) -> &[RemoteTrack] {
        &self.auxiliary_tracks
    }

    /// All attached tracks: audio, video, then auxiliary
    pub fn tracks(&self) -> impl Iterator<Item = &RemoteTrack> {
        self.audio_track
            .iter()
            .chain(self.video_track.iter())
            .chain(self.auxiliary_tracks.iter())
    }

    /// Attach a track, returning the slot it landed in
    ///
    /// The first audio track takes the audio slot whatever its source; the
    /// video slot only takes a `regular` track.
    pub fn attach(&mut self, track: RemoteTrack) -> TrackSlot {
        match track.kind() {
            MediaKind::Audio if self.audio_track.is_none() => {
                self.audio_track = Some(track);
                TrackSlot::Audio
            }
            MediaKind::Video if track.source().is_regular() && self.video_track.is_none() => {
                self.video_track = Some(track);
                TrackSlot::Video
            }
            _ => {
                self.auxiliary_tracks.push(track);
                TrackSlot::Auxiliary
            }
        }
    }

    /// Attached track with the given composite identity
    #[must_use]
    pub fn find_track(&self, id: &CompositeTrackId) -> Option<&RemoteTrack> {
        self.tracks().find(|t| &t.composite_id() == id)
    }

    /// Whether `native` is attached
    #[must_use]
    pub fn holds(&self, native: &NativeTrack) -> bool {
        self.tracks().any(|t| t.native() == native)
    }

    /// Detach the track wrapping `native`
    ///
    /// Matches by identity: the audio slot, then the video slot, then exactly
    /// one auxiliary entry.
    pub fn detach(&mut self, native: &NativeTrack) -> Option<RemoteTrack> {
        if self.audio_track.as_ref().is_some_and(|t| t.native() == native) {
            return self.audio_track.take();
        }
        if self.video_track.as_ref().is_some_and(|t| t.native() == native) {
            return self.video_track.take();
        }
        let index = self
            .auxiliary_tracks
            .iter()
            .position(|t| t.native() == native)?;
        Some(self.auxiliary_tracks.remove(index))
    }
}

/// Authoritative peer id to peer mapping
#[derive(Debug, Default)]
pub struct PeerRegistry {
    local: Option<Peer>,
    remote: IndexMap<PeerId, Peer>,
}

impl PeerRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local peer
    pub fn set_local(&mut self, peer: Peer) {
        self.local = Some(peer);
    }

    /// The local peer
    #[must_use]
    pub fn local(&self) -> Option<&Peer> {
        self.local.as_ref()
    }

    /// Whether `peer_id` is the local peer
    #[must_use]
    pub fn is_local(&self, peer_id: &PeerId) -> bool {
        self.local.as_ref().is_some_and(|p| &p.peer_id == peer_id)
    }

    /// Insert a remote peer; returns `false` if the id was already present,
    /// in which case the existing record is left untouched
    pub fn insert(&mut self, peer: Peer) -> bool {
        if self.remote.contains_key(&peer.peer_id) {
            return false;
        }
        self.remote.insert(peer.peer_id.clone(), peer);
        true
    }

    /// Remote peer by id
    #[must_use]
    pub fn get(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.remote.get(peer_id)
    }

    /// Mutable remote peer by id
    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut Peer> {
        self.remote.get_mut(peer_id)
    }

    /// Remove a remote peer
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<Peer> {
        self.remote.shift_remove(peer_id)
    }

    /// Local peer first, then remote peers
    #[must_use]
    pub fn find(&self, peer_id: &PeerId) -> Option<&Peer> {
        match &self.local {
            Some(local) if &local.peer_id == peer_id => Some(local),
            _ => self.remote.get(peer_id),
        }
    }

    /// Remote peers in join order
    pub fn remote_peers(&self) -> impl Iterator<Item = &Peer> {
        self.remote.values()
    }

    /// Snapshot of the remote peer ids
    #[must_use]
    pub fn remote_ids(&self) -> Vec<PeerId> {
        self.remote.keys().cloned().collect()
    }

    /// Local peer (if any) followed by remote peers
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.local.iter().chain(self.remote.values())
    }

    /// Number of remote peers
    #[must_use]
    pub fn remote_len(&self) -> usize {
        self.remote.len()
    }

    /// Drop every peer
    pub fn clear(&mut self) {
        self.local = None;
        self.remote.clear();
    }
}
