//! Local track settings
//!
//! Settings are immutable values: a change builds a new value merged over the
//! old one (see [`AudioTrackSettings::merged`]) and replaces it whole, so a
//! reader never observes a half-applied set of constraints.

use crate::device::{AudioConstraintSet, AudioConstraints, MediaStreamConstraints, VideoConstraints};
use crate::track::TrackError;
use crate::types::MediaKind;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Audio codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// Opus
    #[default]
    Opus,
}

/// Video codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// VP8
    #[default]
    Vp8,
    /// VP9
    Vp9,
    /// H.264
    H264,
}

/// Per-kind settings a local track carries
pub trait KindSettings: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Partial update merged over a value
    type Update: Clone + Debug + Default + Send + Sync + 'static;

    /// Media kind these settings describe
    const KIND: MediaKind;

    /// Requested capture device
    fn device_id(&self) -> Option<&str>;

    /// Encoder bitrate cap in kbps
    fn max_bitrate(&self) -> Option<u32>;

    /// New value with `update` applied
    fn merged(&self, update: &Self::Update) -> Self;

    /// New value with the capture device replaced
    fn with_device_id(&self, device_id: &str) -> Self;

    /// Whether moving from `previous` to `self` needs a fresh capture
    /// (beyond a device change)
    fn requires_reacquire(&self, previous: &Self) -> bool;

    /// Device-layer constraints requesting only this kind
    fn to_constraints(&self) -> MediaStreamConstraints;

    /// Update that sets every field to this value
    fn as_update(&self) -> Self::Update;
}

/// Audio track settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioTrackSettings {
    volume: f32,
    codec: AudioCodec,
    max_bitrate: Option<u32>,
    device_id: Option<String>,
    advanced: Vec<AudioConstraintSet>,
}

impl Default for AudioTrackSettings {
    fn default() -> Self {
        Self {
            volume: 1.0,
            codec: AudioCodec::Opus,
            max_bitrate: Some(100),
            device_id: None,
            advanced: vec![AudioConstraintSet {
                echo_cancellation: Some(true),
                noise_suppression: Some(true),
                auto_gain_control: Some(true),
            }],
        }
    }
}

impl AudioTrackSettings {
    /// Start a builder
    #[must_use]
    pub fn builder() -> AudioTrackSettingsBuilder {
        AudioTrackSettingsBuilder::new()
    }

    /// Playback/capture volume in `0.0..=1.0`
    #[must_use]
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Codec
    #[must_use]
    pub fn codec(&self) -> AudioCodec {
        self.codec
    }

    /// Advanced constraint sets
    #[must_use]
    pub fn advanced(&self) -> &[AudioConstraintSet] {
        &self.advanced
    }
}

/// Partial audio settings update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioSettingsUpdate {
    /// Volume
    pub volume: Option<f32>,
    /// Codec
    pub codec: Option<AudioCodec>,
    /// Bitrate cap
    pub max_bitrate: Option<u32>,
    /// Capture device
    pub device_id: Option<String>,
    /// Advanced constraint sets
    pub advanced: Option<Vec<AudioConstraintSet>>,
}

impl KindSettings for AudioTrackSettings {
    type Update = AudioSettingsUpdate;
    const KIND: MediaKind = MediaKind::Audio;

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn max_bitrate(&self) -> Option<u32> {
        self.max_bitrate
    }

    fn merged(&self, update: &AudioSettingsUpdate) -> Self {
        Self {
            volume: update.volume.unwrap_or(self.volume),
            codec: update.codec.unwrap_or(self.codec),
            max_bitrate: update.max_bitrate.or(self.max_bitrate),
            device_id: update.device_id.clone().or_else(|| self.device_id.clone()),
            advanced: update
                .advanced
                .clone()
                .unwrap_or_else(|| self.advanced.clone()),
        }
    }

    fn with_device_id(&self, device_id: &str) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            ..self.clone()
        }
    }

    fn requires_reacquire(&self, previous: &Self) -> bool {
        self.advanced != previous.advanced
    }

    fn to_constraints(&self) -> MediaStreamConstraints {
        MediaStreamConstraints {
            audio: Some(AudioConstraints {
                device_id: self.device_id.clone(),
                advanced: self.advanced.clone(),
            }),
            video: None,
        }
    }

    fn as_update(&self) -> AudioSettingsUpdate {
        AudioSettingsUpdate {
            volume: Some(self.volume),
            codec: Some(self.codec),
            max_bitrate: self.max_bitrate,
            device_id: self.device_id.clone(),
            advanced: Some(self.advanced.clone()),
        }
    }
}

/// Builder for [`AudioTrackSettings`]
#[derive(Debug, Clone, Default)]
pub struct AudioTrackSettingsBuilder {
    settings: AudioTrackSettings,
}

impl AudioTrackSettingsBuilder {
    /// Builder starting from defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set volume
    #[must_use]
    pub fn volume(mut self, volume: f32) -> Self {
        self.settings.volume = volume;
        self
    }

    /// Set codec
    #[must_use]
    pub fn codec(mut self, codec: AudioCodec) -> Self {
        self.settings.codec = codec;
        self
    }

    /// Set bitrate cap in kbps
    #[must_use]
    pub fn max_bitrate(mut self, max_bitrate: Option<u32>) -> Self {
        self.settings.max_bitrate = max_bitrate;
        self
    }

    /// Set capture device
    #[must_use]
    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.settings.device_id = Some(device_id.into());
        self
    }

    /// Set advanced constraint sets
    #[must_use]
    pub fn advanced(mut self, advanced: Vec<AudioConstraintSet>) -> Self {
        self.settings.advanced = advanced;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` for out-of-range volume or a zero bitrate
    pub fn build(self) -> Result<AudioTrackSettings, TrackError> {
        let volume = self.settings.volume;
        if !(0.0..=1.0).contains(&volume) {
            return Err(TrackError::InvalidSettings(format!(
                "volume must be within 0.0..=1.0, got {volume}"
            )));
        }
        if self.settings.max_bitrate == Some(0) {
            return Err(TrackError::InvalidSettings(
                "audio max bitrate must be positive".to_string(),
            ));
        }
        Ok(self.settings)
    }
}

/// Video track settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoTrackSettings {
    codec: VideoCodec,
    max_bitrate: Option<u32>,
    max_framerate: u32,
    width: u32,
    height: u32,
    device_id: Option<String>,
}

impl Default for VideoTrackSettings {
    fn default() -> Self {
        Self {
            codec: VideoCodec::Vp8,
            max_bitrate: Some(150),
            max_framerate: 30,
            width: 320,
            height: 180,
            device_id: None,
        }
    }
}

impl VideoTrackSettings {
    /// Start a builder
    #[must_use]
    pub fn builder() -> VideoTrackSettingsBuilder {
        VideoTrackSettingsBuilder::new()
    }

    /// Codec
    #[must_use]
    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// Frame rate cap
    #[must_use]
    pub fn max_framerate(&self) -> u32 {
        self.max_framerate
    }

    /// Capture width
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Capture height
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Partial video settings update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSettingsUpdate {
    /// Codec
    pub codec: Option<VideoCodec>,
    /// Bitrate cap
    pub max_bitrate: Option<u32>,
    /// Frame rate cap
    pub max_framerate: Option<u32>,
    /// Capture width
    pub width: Option<u32>,
    /// Capture height
    pub height: Option<u32>,
    /// Capture device
    pub device_id: Option<String>,
}

impl KindSettings for VideoTrackSettings {
    type Update = VideoSettingsUpdate;
    const KIND: MediaKind = MediaKind::Video;

    fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    fn max_bitrate(&self) -> Option<u32> {
        self.max_bitrate
    }

    fn merged(&self, update: &VideoSettingsUpdate) -> Self {
        Self {
            codec: update.codec.unwrap_or(self.codec),
            max_bitrate: update.max_bitrate.or(self.max_bitrate),
            max_framerate: update.max_framerate.unwrap_or(self.max_framerate),
            width: update.width.unwrap_or(self.width),
            height: update.height.unwrap_or(self.height),
            device_id: update.device_id.clone().or_else(|| self.device_id.clone()),
        }
    }

    fn with_device_id(&self, device_id: &str) -> Self {
        Self {
            device_id: Some(device_id.to_string()),
            ..self.clone()
        }
    }

    fn requires_reacquire(&self, previous: &Self) -> bool {
        self.width != previous.width
            || self.height != previous.height
            || self.max_framerate != previous.max_framerate
    }

    fn to_constraints(&self) -> MediaStreamConstraints {
        MediaStreamConstraints {
            audio: None,
            video: Some(VideoConstraints {
                device_id: self.device_id.clone(),
                width: Some(self.width),
                height: Some(self.height),
                frame_rate: Some(self.max_framerate),
            }),
        }
    }

    fn as_update(&self) -> VideoSettingsUpdate {
        VideoSettingsUpdate {
            codec: Some(self.codec),
            max_bitrate: self.max_bitrate,
            max_framerate: Some(self.max_framerate),
            width: Some(self.width),
            height: Some(self.height),
            device_id: self.device_id.clone(),
        }
    }
}

/// Builder for [`VideoTrackSettings`]
#[derive(Debug, Clone, Default)]
pub struct VideoTrackSettingsBuilder {
    settings: VideoTrackSettings,
}

impl VideoTrackSettingsBuilder {
    /// Builder starting from defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set codec
    #[must_use]
    pub fn codec(mut self, codec: VideoCodec) -> Self {
        self.settings.codec = codec;
        self
    }

    /// Set bitrate cap in kbps
    #[must_use]
    pub fn max_bitrate(mut self, max_bitrate: Option<u32>) -> Self {
        self.settings.max_bitrate = max_bitrate;
        self
    }

    /// Set frame rate cap
    #[must_use]
    pub fn max_framerate(mut self, max_framerate: u32) -> Self {
        self.settings.max_framerate = max_framerate;
        self
    }

    /// Set capture width
    #[must_use]
    pub fn width(mut self, width: u32) -> Self {
        self.settings.width = width;
        self
    }

    /// Set capture height
    #[must_use]
    pub fn height(mut self, height: u32) -> Self {
        self.settings.height = height;
        self
    }

    /// Set capture device
    #[must_use]
    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.settings.device_id = Some(device_id.into());
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` for zero dimensions, frame rate or bitrate
    pub fn build(self) -> Result<VideoTrackSettings, TrackError> {
        let s = &self.settings;
        if s.width == 0 || s.height == 0 {
            return Err(TrackError::InvalidSettings(format!(
                "video dimensions must be non-zero, got {}x{}",
                s.width, s.height
            )));
        }
        if s.max_framerate == 0 {
            return Err(TrackError::InvalidSettings(
                "video frame rate must be positive".to_string(),
            ));
        }
        if s.max_bitrate == Some(0) {
            return Err(TrackError::InvalidSettings(
                "video max bitrate must be positive".to_string(),
            ));
        }
        Ok(self.settings)
    }
}

/// Combined settings for one acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSettings {
    video: Option<VideoTrackSettings>,
    audio: Option<AudioTrackSettings>,
    simulcast: bool,
}

impl TrackSettings {
    /// Start a builder
    #[must_use]
    pub fn builder() -> TrackSettingsBuilder {
        TrackSettingsBuilder::new()
    }

    /// Video settings
    #[must_use]
    pub fn video(&self) -> Option<&VideoTrackSettings> {
        self.video.as_ref()
    }

    /// Audio settings
    #[must_use]
    pub fn audio(&self) -> Option<&AudioTrackSettings> {
        self.audio.as_ref()
    }

    /// Whether video is published with simulcast layers
    #[must_use]
    pub fn simulcast(&self) -> bool {
        self.simulcast
    }
}

/// Builder for [`TrackSettings`]; both kinds default to their default settings
#[derive(Debug, Clone)]
pub struct TrackSettingsBuilder {
    video: Option<VideoTrackSettings>,
    audio: Option<AudioTrackSettings>,
    simulcast: bool,
}

impl Default for TrackSettingsBuilder {
    fn default() -> Self {
        Self {
            video: Some(VideoTrackSettings::default()),
            audio: Some(AudioTrackSettings::default()),
            simulcast: false,
        }
    }
}

impl TrackSettingsBuilder {
    /// Builder with default audio and video
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear video settings
    #[must_use]
    pub fn video(mut self, video: Option<VideoTrackSettings>) -> Self {
        self.video = video;
        self
    }

    /// Set or clear audio settings
    #[must_use]
    pub fn audio(mut self, audio: Option<AudioTrackSettings>) -> Self {
        self.audio = audio;
        self
    }

    /// Enable simulcast
    #[must_use]
    pub fn simulcast(mut self, enabled: bool) -> Self {
        self.simulcast = enabled;
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// Returns `NothingToBuild` when both kinds are cleared and
    /// `InvalidSettings` when simulcast is requested without video
    pub fn build(self) -> Result<TrackSettings, TrackError> {
        if self.audio.is_none() && self.video.is_none() {
            return Err(TrackError::NothingToBuild);
        }
        if self.video.is_none() && self.simulcast {
            return Err(TrackError::InvalidSettings(
                "Cannot enable simulcast when no video settings are provided".to_string(),
            ));
        }
        Ok(TrackSettings {
            video: self.video,
            audio: self.audio,
            simulcast: self.simulcast,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_simulcast_without_video_is_rejected() {
        let err = TrackSettingsBuilder::new()
            .simulcast(true)
            .video(None)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, TrackError::InvalidSettings(_)));
    }

    #[test]
    fn test_nothing_to_build() {
        let err = TrackSettingsBuilder::new()
            .audio(None)
            .video(None)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, TrackError::NothingToBuild));
    }

    #[test]
    fn test_defaults_build() {
        let settings = TrackSettings::builder().build().unwrap();
        assert!(settings.audio().is_some());
        assert!(settings.video().is_some());
        assert!(!settings.simulcast());
    }

    #[test]
    fn test_merge_keeps_fields_omitted_from_update() {
        let base = VideoTrackSettings::builder()
            .width(640)
            .height(360)
            .device_id("cam-1")
            .build()
            .unwrap();
        let merged = base.merged(&VideoSettingsUpdate {
            max_bitrate: Some(400),
            ..Default::default()
        });
        assert_eq!(merged.width(), 640);
        assert_eq!(merged.device_id(), Some("cam-1"));
        assert_eq!(merged.max_bitrate(), Some(400));
        assert!(!merged.requires_reacquire(&base));
        // original value untouched
        assert_eq!(base.max_bitrate(), Some(150));
    }

    #[test]
    fn test_resolution_change_requires_reacquire() {
        let base = VideoTrackSettings::default();
        let merged = base.merged(&VideoSettingsUpdate {
            width: Some(1280),
            height: Some(720),
            ..Default::default()
        });
        assert!(merged.requires_reacquire(&base));
    }

    #[test]
    fn test_audio_volume_validation() {
        assert!(AudioTrackSettings::builder().volume(1.5).build().is_err());
        assert!(AudioTrackSettings::builder().volume(0.5).build().is_ok());
    }

    #[test]
    fn test_audio_constraints_only_request_audio() {
        let settings = AudioTrackSettings::builder()
            .device_id("mic-2")
            .build()
            .unwrap();
        let constraints = settings.to_constraints();
        assert!(constraints.requests(MediaKind::Audio));
        assert!(!constraints.requests(MediaKind::Video));
        assert_eq!(
            constraints.audio.unwrap().device_id.as_deref(),
            Some("mic-2")
        );
    }

    #[test]
    fn test_as_update_round_trips_through_merge() {
        let settings = AudioTrackSettings::builder()
            .volume(0.3)
            .device_id("mic-9")
            .build()
            .unwrap();
        let merged = AudioTrackSettings::default().merged(&settings.as_update());
        assert_eq!(merged, settings);
    }
}
