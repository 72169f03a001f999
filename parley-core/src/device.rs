//! Device layer and media engine collaborator contracts
//!
//! The acquisition pipeline is the only consumer of [`DeviceLayer`]. Local
//! tracks use [`MediaEngine`] to swap the track carried by their senders.

use crate::track::NativeTrack;
use crate::types::MediaKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device layer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// User or platform denied access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Requested device does not exist
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Device is held by another application
    #[error("Device in use: {0}")]
    InUse(String),

    /// Constraints cannot be satisfied by any device
    #[error("Overconstrained: {0}")]
    OverConstrained(String),

    /// Anything else
    #[error("Device error: {0}")]
    Other(String),
}

impl DeviceError {
    /// Whether the failure is a permission/device problem attributable to a
    /// media kind
    #[must_use]
    pub fn is_classifiable(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// Media engine errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaEngineError {
    /// No sender carries the given track
    #[error("No sender for track: {0}")]
    SenderNotFound(String),

    /// Track replacement was rejected
    #[error("Replace track failed: {0}")]
    ReplaceFailed(String),

    /// Encoding parameters could not be applied
    #[error("Encoding parameters rejected: {0}")]
    EncodingRejected(String),
}

/// Live settings a native track reports
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaTrackSettings {
    /// Device the track captures from
    pub device_id: Option<String>,
    /// Device group
    pub group_id: Option<String>,
    /// Frame width
    pub width: Option<u32>,
    /// Frame height
    pub height: Option<u32>,
    /// Frame rate
    pub frame_rate: Option<u32>,
}

/// Kind of media device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Microphone
    AudioInput,
    /// Speaker
    AudioOutput,
    /// Camera
    VideoInput,
}

/// Enumerated media device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device identifier
    pub device_id: String,
    /// Device group
    pub group_id: Option<String>,
    /// Device kind
    pub kind: DeviceKind,
    /// Human-readable label
    pub label: String,
}

/// Permission state reported by the device layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePermissions {
    /// Camera access granted
    pub webcam: bool,
    /// Microphone access granted
    pub microphone: bool,
}

impl Default for DevicePermissions {
    fn default() -> Self {
        Self {
            webcam: true,
            microphone: true,
        }
    }
}

/// Audio processing flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraintSet {
    /// Echo cancellation
    pub echo_cancellation: Option<bool>,
    /// Noise suppression
    pub noise_suppression: Option<bool>,
    /// Automatic gain control
    pub auto_gain_control: Option<bool>,
}

/// Audio capture constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioConstraints {
    /// Exact device to capture from
    pub device_id: Option<String>,
    /// Ordered advanced constraint sets
    pub advanced: Vec<AudioConstraintSet>,
}

/// Video capture constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoConstraints {
    /// Exact device to capture from
    pub device_id: Option<String>,
    /// Ideal width
    pub width: Option<u32>,
    /// Ideal height
    pub height: Option<u32>,
    /// Maximum frame rate
    pub frame_rate: Option<u32>,
}

/// Constraints for a single acquisition request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaStreamConstraints {
    /// Audio constraints, `None` to skip audio
    pub audio: Option<AudioConstraints>,
    /// Video constraints, `None` to skip video
    pub video: Option<VideoConstraints>,
}

impl MediaStreamConstraints {
    /// Whether `kind` is requested
    #[must_use]
    pub fn requests(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio.is_some(),
            MediaKind::Video => self.video.is_some(),
        }
    }

    /// Whether nothing is requested
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// Device layer collaborator
///
/// Implementations wrap the platform's capture APIs. A single call acquires
/// all requested kinds at once and fails as a whole.
#[async_trait]
pub trait DeviceLayer: Send + Sync {
    /// List available devices
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Acquire native tracks satisfying `constraints`
    async fn get_user_media(
        &self,
        constraints: &MediaStreamConstraints,
    ) -> Result<Vec<NativeTrack>, DeviceError>;

    /// Current camera/microphone permission state
    async fn permissions(&self) -> DevicePermissions;
}

/// Media engine collaborator
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Swap `previous` for `next` on every sender currently carrying `previous`
    async fn replace_sender_track(
        &self,
        previous: &NativeTrack,
        next: &NativeTrack,
    ) -> Result<(), MediaEngineError>;

    /// Swap `previous` for `next` inside the local stream `stream_id`
    async fn replace_stream_track(
        &self,
        stream_id: &str,
        previous: &NativeTrack,
        next: &NativeTrack,
    ) -> Result<(), MediaEngineError>;

    /// Apply a new maximum bitrate to the senders carrying `track`
    async fn set_max_bitrate(
        &self,
        track: &NativeTrack,
        max_bitrate_kbps: u32,
    ) -> Result<(), MediaEngineError>;

    /// Live settings of `track`
    fn track_settings(&self, track: &NativeTrack) -> MediaTrackSettings {
        track.settings().clone()
    }
}
