//! Local peer store: publish permissions, local tracks and device selection

use crate::local_track::{LocalAudioTrack, LocalMediaTrack, LocalVideoTrack};
use crate::settings::{AudioCodec, VideoCodec};
use crate::types::{MediaKind, TrackSource};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Server-supplied audio publish defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioPublishParams {
    /// Codec
    pub codec: AudioCodec,
    /// Bitrate in kbps
    pub bit_rate: u32,
}

impl Default for AudioPublishParams {
    fn default() -> Self {
        Self {
            codec: AudioCodec::Opus,
            bit_rate: 32,
        }
    }
}

/// Server-supplied video publish defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoPublishParams {
    /// Codec
    pub codec: VideoCodec,
    /// Bitrate in kbps
    pub bit_rate: u32,
    /// Frame rate
    pub frame_rate: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Default for VideoPublishParams {
    fn default() -> Self {
        Self {
            codec: VideoCodec::Vp8,
            bit_rate: 300,
            frame_rate: 30,
            width: 640,
            height: 360,
        }
    }
}

/// What the local peer's role may publish, and how
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishParams {
    /// Kinds the role may publish
    pub allowed: Vec<MediaKind>,
    /// Audio defaults
    pub audio: AudioPublishParams,
    /// Video defaults
    pub video: VideoPublishParams,
    /// Whether video is published with simulcast layers
    pub simulcast: bool,
}

impl Default for PublishParams {
    fn default() -> Self {
        Self {
            allowed: vec![MediaKind::Audio, MediaKind::Video],
            audio: AudioPublishParams::default(),
            video: VideoPublishParams::default(),
            simulcast: false,
        }
    }
}

impl PublishParams {
    /// Whether `kind` may be published
    #[must_use]
    pub fn can_publish(&self, kind: MediaKind) -> bool {
        self.allowed.contains(&kind)
    }
}

/// Dimensions of the top simulcast layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulcastDimensions {
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

/// A remembered device choice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedDevice {
    /// Device id
    pub device_id: String,
    /// Device group
    pub group_id: Option<String>,
}

/// Devices the user picked, per media kind
#[derive(Debug, Default)]
pub struct DeviceSelection {
    selected: RwLock<HashMap<MediaKind, SelectedDevice>>,
}

impl DeviceSelection {
    /// Empty selection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `device_id` for `kind`
    pub fn update_selection(&self, kind: MediaKind, device_id: &str, group_id: Option<String>) {
        tracing::debug!(%kind, device_id, "Device selection updated");
        self.selected.write().insert(
            kind,
            SelectedDevice {
                device_id: device_id.to_string(),
                group_id,
            },
        );
    }

    /// Remembered device for `kind`
    #[must_use]
    pub fn selected(&self, kind: MediaKind) -> Option<SelectedDevice> {
        self.selected.read().get(&kind).cloned()
    }
}

/// State of the local peer shared by the acquisition pipeline and the session
#[derive(Default)]
pub struct LocalPeerStore {
    publish_params: RwLock<Option<PublishParams>>,
    simulcast: RwLock<HashMap<TrackSource, SimulcastDimensions>>,
    tracks: RwLock<Vec<LocalMediaTrack>>,
    published: RwLock<HashSet<String>>,
}

impl LocalPeerStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set publish params for the current role
    pub fn set_publish_params(&self, params: Option<PublishParams>) {
        *self.publish_params.write() = params;
    }

    /// Publish params for the current role
    #[must_use]
    pub fn publish_params(&self) -> Option<PublishParams> {
        self.publish_params.read().clone()
    }

    /// Set simulcast dimensions for `source`
    pub fn set_simulcast_dimensions(&self, source: TrackSource, dimensions: SimulcastDimensions) {
        self.simulcast.write().insert(source, dimensions);
    }

    /// Simulcast dimensions for `source`
    #[must_use]
    pub fn simulcast_dimensions(&self, source: &TrackSource) -> Option<SimulcastDimensions> {
        self.simulcast.read().get(source).copied()
    }

    /// Add a local track
    pub fn add_local_track(&self, track: LocalMediaTrack) {
        let mut tracks = self.tracks.write();
        if !tracks.iter().any(|t| t.id() == track.id()) {
            tracks.push(track);
        }
    }

    /// Remove a local track by id
    pub fn remove_local_track(&self, track_id: &str) -> Option<LocalMediaTrack> {
        let mut tracks = self.tracks.write();
        let index = tracks.iter().position(|t| t.id() == track_id)?;
        self.published.write().remove(track_id);
        Some(tracks.remove(index))
    }

    /// All local tracks
    #[must_use]
    pub fn local_tracks(&self) -> Vec<LocalMediaTrack> {
        self.tracks.read().clone()
    }

    /// The regular-source local audio track
    #[must_use]
    pub fn regular_audio_track(&self) -> Option<Arc<LocalAudioTrack>> {
        self.tracks.read().iter().find_map(|t| match t {
            LocalMediaTrack::Audio(track) if track.source().is_regular() => Some(Arc::clone(track)),
            _ => None,
        })
    }

    /// The regular-source local video track
    #[must_use]
    pub fn regular_video_track(&self) -> Option<Arc<LocalVideoTrack>> {
        self.tracks.read().iter().find_map(|t| match t {
            LocalMediaTrack::Video(track) if track.source().is_regular() => Some(Arc::clone(track)),
            _ => None,
        })
    }

    /// Record that the track with `track_id` was handed to the transport
    pub fn mark_published(&self, track_id: &str) {
        self.published.write().insert(track_id.to_string());
    }

    /// Whether the track with `track_id` was handed to the transport
    #[must_use]
    pub fn is_published(&self, track_id: &str) -> bool {
        self.published.read().contains(track_id)
    }

    /// Forget every track
    pub fn clear(&self) {
        self.tracks.write().clear();
        self.published.write().clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_params_from_partial_json() {
        let params: PublishParams =
            serde_json::from_str(r#"{"allowed": ["audio"], "simulcast": true}"#).unwrap();
        assert!(params.can_publish(MediaKind::Audio));
        assert!(!params.can_publish(MediaKind::Video));
        assert_eq!(params.video.width, 640);
    }

    #[test]
    fn test_device_selection_remembers_latest() {
        let selection = DeviceSelection::new();
        assert!(selection.selected(MediaKind::Audio).is_none());
        selection.update_selection(MediaKind::Audio, "mic-1", None);
        selection.update_selection(MediaKind::Audio, "mic-2", Some("g1".to_string()));
        let selected = selection.selected(MediaKind::Audio).unwrap();
        assert_eq!(selected.device_id, "mic-2");
        assert_eq!(selected.group_id.as_deref(), Some("g1"));
    }

    #[test]
    fn test_simulcast_dimensions_by_source() {
        let store = LocalPeerStore::new();
        store.set_simulcast_dimensions(
            TrackSource::Regular,
            SimulcastDimensions {
                width: 1280,
                height: 720,
            },
        );
        assert_eq!(
            store.simulcast_dimensions(&TrackSource::Regular).unwrap().width,
            1280
        );
        assert!(store.simulcast_dimensions(&TrackSource::Screen).is_none());
    }
}
