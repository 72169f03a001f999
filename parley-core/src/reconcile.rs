//! Peer/track state reconciliation
//!
//! # Architecture
//!
//! Three independent signals describe the remote side of a session:
//!
//! 1. Peer lifecycle notifications (join, leave, full peer lists)
//! 2. Track metadata notifications (source, mute, description)
//! 3. Native track add/remove callbacks from the transport
//!
//! They race each other, and after a reconnect the peer list is replayed
//! wholesale. [`ReconciliationEngine`] merges them into one [`PeerRegistry`]:
//!
//! - Metadata lands in the [`TrackStateIndex`] keyed by composite track id,
//!   whether or not the native track exists yet
//! - Native tracks wait in the [`PendingTrackBuffer`] until their metadata and
//!   owning peer are both known
//! - [`ReconciliationEngine::process_pending_tracks`] joins the two sides and
//!   is run after every mutation; it only emits for tracks it actually attaches,
//!   so running it again with no new input is a no-op
//!
//! Lookups that miss (unknown peer, unknown track) abort that one update and
//! are logged; nothing in this module returns an error.

use crate::listener::{AudioListener, EngineEvent, PeerUpdate, TrackUpdate, UpdateListener};
use crate::notification::{
    Notification, PeerListNotification, PeerNotification, SpeakerList, TrackInfo, TrackState,
    TrackStateNotification,
};
use crate::peer::{Peer, PeerRegistry};
use crate::track::{NativeTrack, RemoteTrack};
use crate::types::{CompositeTrackId, MediaKind, PeerId};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Latest metadata for one composite track id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackStateEntry {
    /// Owning peer
    pub peer_id: PeerId,
    /// Merged metadata
    pub state: TrackState,
}

/// Composite track id to last known metadata
#[derive(Debug, Default)]
pub struct TrackStateIndex {
    entries: HashMap<CompositeTrackId, TrackStateEntry>,
}

impl TrackStateIndex {
    /// Empty index
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry for `id`
    #[must_use]
    pub fn get(&self, id: &CompositeTrackId) -> Option<&TrackStateEntry> {
        self.entries.get(id)
    }

    /// Register metadata, replacing any previous entry wholesale
    pub fn register(&mut self, peer_id: &PeerId, info: &TrackInfo) {
        self.entries.insert(
            info.composite_id(),
            TrackStateEntry {
                peer_id: peer_id.clone(),
                state: TrackState::from_info(info),
            },
        );
    }

    /// Merge `info` onto the existing entry, returning the previous state
    pub fn merge(&mut self, peer_id: &PeerId, info: &TrackInfo) -> Option<TrackState> {
        let id = info.composite_id();
        let previous = self.entries.get(&id).map(|e| e.state.clone());
        let state = match &previous {
            Some(prev) => prev.merged(info),
            None => TrackState::from_info(info),
        };
        self.entries.insert(
            id,
            TrackStateEntry {
                peer_id: peer_id.clone(),
                state,
            },
        );
        previous
    }

    /// Remove the entry for `id`
    pub fn remove(&mut self, id: &CompositeTrackId) -> Option<TrackStateEntry> {
        self.entries.remove(id)
    }

    /// Composite ids owned by `peer_id`
    #[must_use]
    pub fn ids_of(&self, peer_id: &PeerId) -> Vec<CompositeTrackId> {
        self.entries
            .iter()
            .filter(|(_, e)| &e.peer_id == peer_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Native tracks waiting for metadata or their peer, in arrival order
#[derive(Debug, Default)]
pub struct PendingTrackBuffer {
    tracks: IndexMap<CompositeTrackId, NativeTrack>,
}

impl PendingTrackBuffer {
    /// Empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `track`, returning any track it displaced for the same id
    pub fn insert(&mut self, track: NativeTrack) -> Option<NativeTrack> {
        self.tracks.insert(track.composite_id(), track)
    }

    /// Whether a track is waiting under `id`
    #[must_use]
    pub fn contains(&self, id: &CompositeTrackId) -> bool {
        self.tracks.contains_key(id)
    }

    /// Take the track waiting under `id`
    pub fn remove(&mut self, id: &CompositeTrackId) -> Option<NativeTrack> {
        self.tracks.shift_remove(id)
    }

    /// Drop `native` if it is the track waiting under its id
    pub fn remove_native(&mut self, native: &NativeTrack) -> bool {
        let id = native.composite_id();
        if self.tracks.get(&id) == Some(native) {
            self.tracks.shift_remove(&id);
            return true;
        }
        false
    }

    /// Snapshot of waiting ids
    #[must_use]
    pub fn ids(&self) -> Vec<CompositeTrackId> {
        self.tracks.keys().cloned().collect()
    }

    /// Number of waiting tracks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Drop every waiting track
    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

/// Notification-driven peer/track state machine
///
/// One instance per session. All methods are synchronous; callers serialize
/// access (the session client holds the engine behind a mutex).
pub struct ReconciliationEngine {
    registry: PeerRegistry,
    pending: PendingTrackBuffer,
    track_states: TrackStateIndex,
    listener: Arc<dyn UpdateListener>,
    audio_listener: Option<Arc<dyn AudioListener>>,
    events: broadcast::Sender<EngineEvent>,
}

impl ReconciliationEngine {
    /// Create an engine reporting to `listener`
    pub fn new(listener: Arc<dyn UpdateListener>, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            registry: PeerRegistry::new(),
            pending: PendingTrackBuffer::new(),
            track_states: TrackStateIndex::new(),
            listener,
            audio_listener: None,
            events,
        }
    }

    /// Attach an audio level listener
    #[must_use]
    pub fn with_audio_listener(mut self, audio_listener: Arc<dyn AudioListener>) -> Self {
        self.audio_listener = Some(audio_listener);
        self
    }

    /// Replace the audio level listener
    pub fn set_audio_listener(&mut self, audio_listener: Option<Arc<dyn AudioListener>>) {
        self.audio_listener = audio_listener;
    }

    /// Subscribe to typed engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Register the local peer
    pub fn set_local_peer(&mut self, peer: Peer) {
        tracing::debug!(peer_id = %peer.peer_id, "Local peer set");
        self.registry.set_local(peer);
    }

    /// The local peer
    #[must_use]
    pub fn local_peer(&self) -> Option<&Peer> {
        self.registry.local()
    }

    /// Peer by id, local peer first
    #[must_use]
    pub fn find_peer(&self, peer_id: &PeerId) -> Option<&Peer> {
        self.registry.find(peer_id)
    }

    /// Local peer followed by remote peers in join order
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.registry.peers()
    }

    /// Remote peers in join order
    pub fn remote_peers(&self) -> impl Iterator<Item = &Peer> {
        self.registry.remote_peers()
    }

    /// Native tracks still waiting for metadata or their peer
    #[must_use]
    pub fn pending_track_count(&self) -> usize {
        self.pending.len()
    }

    /// Last known metadata for `id`
    #[must_use]
    pub fn track_state(&self, id: &CompositeTrackId) -> Option<&TrackStateEntry> {
        self.track_states.get(id)
    }

    /// Apply a signaling notification
    pub fn handle_notification(&mut self, notification: Notification, is_reconnecting: bool) {
        tracing::debug!(
            method = notification.method(),
            is_reconnecting,
            "Handling notification"
        );
        match notification {
            Notification::PeerJoin(peer) => self.handle_peer_join(&peer),
            Notification::PeerLeave(peer) => self.handle_peer_leave(&peer),
            Notification::PeerList(list) if is_reconnecting => {
                self.handle_reconnect_peer_list(&list)
            }
            Notification::PeerList(list) => {
                for peer in &list.peers {
                    self.handle_peer_join(peer);
                }
            }
            Notification::TrackMetadataAdd(update) | Notification::TrackUpdate(update) => {
                self.handle_track_metadata(&update)
            }
            Notification::RoleChange(request) => {
                tracing::info!(role = %request.role, force = request.force, "Role change requested");
                let _ = self.events.send(EngineEvent::RoleChange(request));
            }
            Notification::ActiveSpeakers(list) => self.handle_active_speakers(&list),
            Notification::Broadcast(message) => self.listener.on_message_received(&message),
        }
    }

    /// A native track arrived from the transport
    pub fn handle_native_track_add(&mut self, track: NativeTrack) {
        tracing::debug!(
            track_id = %track.id(),
            stream_id = %track.stream_id(),
            kind = %track.kind(),
            "Native track added"
        );
        if let Some(displaced) = self.pending.insert(track) {
            tracing::debug!(track_id = %displaced.id(), "Pending track displaced by newer arrival");
        }
        self.process_pending_tracks();
    }

    /// A native track was removed by the transport
    pub fn handle_native_track_remove(&mut self, track: &NativeTrack) {
        tracing::debug!(track_id = %track.id(), kind = %track.kind(), "Native track removed");
        if self.pending.remove_native(track) {
            tracing::debug!(track_id = %track.id(), "Dropped track that was still pending");
            return;
        }

        let owner = self
            .track_states
            .get(&track.composite_id())
            .map(|entry| entry.peer_id.clone())
            .filter(|peer_id| self.registry.get(peer_id).is_some_and(|p| p.holds(track)))
            .or_else(|| {
                self.registry
                    .remote_peers()
                    .find(|p| p.holds(track))
                    .map(|p| p.peer_id.clone())
            });
        let Some(peer_id) = owner else {
            tracing::debug!(track_id = %track.id(), "Removed track has no owner");
            return;
        };
        let Some(removed) = self
            .registry
            .get_mut(&peer_id)
            .and_then(|peer| peer.detach(track))
        else {
            return;
        };
        if let Some(peer) = self.registry.get(&peer_id) {
            self.emit_track_removed(&removed, peer);
        }
    }

    /// Attach every pending track whose metadata and peer are known
    ///
    /// Returns the number of tracks attached.
    pub fn process_pending_tracks(&mut self) -> usize {
        let mut attached = 0;
        for id in self.pending.ids() {
            let Some(entry) = self.track_states.get(&id) else {
                continue;
            };
            let peer_id = entry.peer_id.clone();
            let state = entry.state.clone();
            if self.registry.get(&peer_id).is_none() {
                continue;
            }
            let (Some(native), Some(peer)) =
                (self.pending.remove(&id), self.registry.get_mut(&peer_id))
            else {
                continue;
            };
            if peer.holds(&native) {
                tracing::debug!(track_id = %native.id(), "Track already attached");
                continue;
            }

            native.set_enabled(!state.mute);
            let track = RemoteTrack::new(native, state.source);
            let slot = peer.attach(track.clone());
            tracing::debug!(
                peer_id = %peer_id,
                track_id = %track.track_id(),
                source = %track.source(),
                ?slot,
                "Attached pending track"
            );

            if track.kind() == MediaKind::Audio {
                let _ = self.events.send(EngineEvent::AudioTrackAdded {
                    peer_id: peer_id.clone(),
                    track: track.clone(),
                });
            }
            if let Some(peer) = self.registry.get(&peer_id) {
                self.listener
                    .on_track_update(TrackUpdate::TrackAdded, &track, peer);
            }
            attached += 1;
        }
        attached
    }

    /// Drop all peers, pending tracks and metadata
    pub fn clean_up(&mut self) {
        tracing::debug!(
            peers = self.registry.remote_len(),
            pending = self.pending.len(),
            "Cleaning up reconciliation state"
        );
        self.registry.clear();
        self.pending.clear();
        self.track_states.clear();
    }

    fn handle_peer_join(&mut self, notification: &PeerNotification) {
        let peer_id = &notification.peer_id;
        if self.registry.is_local(peer_id) {
            tracing::debug!(peer_id = %peer_id, "Ignoring join for the local peer");
            return;
        }
        for info in &notification.tracks {
            self.track_states.register(peer_id, info);
        }

        if self.registry.insert(Peer::from_notification(notification)) {
            tracing::info!(
                peer_id = %peer_id,
                name = %notification.info.name,
                role = %notification.role,
                "Peer joined"
            );
            self.listener
                .on_peer_update(PeerUpdate::PeerJoined, self.registry.get(peer_id));
        } else if let Some(existing) = self.registry.get_mut(peer_id) {
            tracing::debug!(peer_id = %peer_id, "Duplicate join, refreshing profile");
            existing.update_info(notification);
        }
        self.process_pending_tracks();
    }

    fn handle_peer_leave(&mut self, notification: &PeerNotification) {
        let Some(peer) = self.registry.remove(&notification.peer_id) else {
            tracing::debug!(peer_id = %notification.peer_id, "Leave for unknown peer");
            return;
        };
        for id in self.track_states.ids_of(&peer.peer_id) {
            self.pending.remove(&id);
            self.track_states.remove(&id);
        }
        for track in peer.tracks() {
            self.emit_track_removed(track, &peer);
        }
        tracing::info!(peer_id = %peer.peer_id, role = %peer.role, "Peer left");
        self.listener.on_peer_update(PeerUpdate::PeerLeft, Some(&peer));
    }

    /// Diff the full list against a snapshot of the registry
    fn handle_reconnect_peer_list(&mut self, list: &PeerListNotification) {
        let listed: HashSet<&PeerId> = list.peers.iter().map(|p| &p.peer_id).collect();
        let departed: Vec<PeerNotification> = self
            .registry
            .remote_peers()
            .filter(|p| !listed.contains(&p.peer_id))
            .map(Peer::to_notification)
            .collect();
        tracing::info!(
            listed = list.peers.len(),
            departed = departed.len(),
            "Reconciling peer list after reconnect"
        );

        for leave in &departed {
            self.handle_peer_leave(leave);
        }
        for notification in &list.peers {
            if self.registry.is_local(&notification.peer_id) {
                continue;
            }
            if self.registry.get(&notification.peer_id).is_some() {
                self.reconcile_known_peer(notification);
            } else {
                self.handle_peer_join(notification);
            }
        }
    }

    fn reconcile_known_peer(&mut self, notification: &PeerNotification) {
        let peer_id = &notification.peer_id;
        let listed: HashSet<CompositeTrackId> = notification
            .tracks
            .iter()
            .map(TrackInfo::composite_id)
            .collect();

        let mut removed = Vec::new();
        if let Some(peer) = self.registry.get_mut(peer_id) {
            peer.update_info(notification);
            let stale: Vec<NativeTrack> = peer
                .tracks()
                .filter(|t| !listed.contains(&t.composite_id()))
                .map(|t| t.native().clone())
                .collect();
            removed.extend(stale.iter().filter_map(|native| peer.detach(native)));
        }
        for track in &removed {
            tracing::debug!(peer_id = %peer_id, track_id = %track.track_id(), "Track gone after reconnect");
            self.track_states.remove(&track.composite_id());
            if let Some(peer) = self.registry.get(peer_id) {
                self.emit_track_removed(track, peer);
            }
        }

        for info in &notification.tracks {
            let id = info.composite_id();
            let attached = self
                .registry
                .get(peer_id)
                .is_some_and(|p| p.find_track(&id).is_some());
            if attached {
                self.apply_track_metadata(peer_id, info);
            } else {
                // The transport re-delivers the native track once media resumes.
                self.track_states.register(peer_id, info);
            }
        }
        self.process_pending_tracks();
    }

    fn handle_track_metadata(&mut self, update: &TrackStateNotification) {
        for info in &update.tracks {
            self.apply_track_metadata(&update.peer.peer_id, info);
        }
    }

    fn apply_track_metadata(&mut self, peer_id: &PeerId, info: &TrackInfo) {
        let id = info.composite_id();
        let previous = self.track_states.merge(peer_id, info);

        let attached = !self.pending.contains(&id)
            && self
                .registry
                .get(peer_id)
                .is_some_and(|p| p.find_track(&id).is_some());
        if !attached {
            self.process_pending_tracks();
            return;
        }

        let (Some(entry), Some(peer)) = (self.track_states.get(&id), self.registry.get(peer_id))
        else {
            return;
        };
        let Some(track) = peer.find_track(&id) else {
            return;
        };
        let current = &entry.state;
        let was_muted = previous
            .as_ref()
            .map_or(!track.is_enabled(), |prev| prev.mute);
        track.set_enabled(!current.mute);

        let update = if was_muted != current.mute {
            if current.mute {
                TrackUpdate::TrackMuted
            } else {
                TrackUpdate::TrackUnmuted
            }
        } else if previous.as_ref().and_then(|p| p.description.as_ref())
            != current.description.as_ref()
        {
            TrackUpdate::TrackDescriptionChanged
        } else {
            return;
        };
        tracing::debug!(peer_id = %peer_id, track_id = %track.track_id(), %update, "Track metadata applied");
        self.listener.on_track_update(update, track, peer);
    }

    fn handle_active_speakers(&self, list: &SpeakerList) {
        if let Some(audio_listener) = &self.audio_listener {
            audio_listener.on_audio_level_update(&list.speakers);
        }
        match list.speakers.first() {
            Some(dominant) => match self.registry.find(&dominant.peer_id) {
                Some(peer) => self
                    .listener
                    .on_peer_update(PeerUpdate::BecameDominantSpeaker, Some(peer)),
                None => tracing::warn!(
                    peer_id = %dominant.peer_id,
                    "Dominant speaker is not a known peer"
                ),
            },
            None => self
                .listener
                .on_peer_update(PeerUpdate::ResignedDominantSpeaker, None),
        }
    }

    fn emit_track_removed(&self, track: &RemoteTrack, peer: &Peer) {
        if track.kind() == MediaKind::Audio {
            let _ = self.events.send(EngineEvent::AudioTrackRemoved {
                peer_id: peer.peer_id.clone(),
                track: track.clone(),
            });
        }
        self.listener
            .on_track_update(TrackUpdate::TrackRemoved, track, peer);
    }
}
