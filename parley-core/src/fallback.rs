//! Device fallback policy
//!
//! Pure decisions taken when device acquisition fails: which kinds to degrade
//! to placeholders and whether to retry at all. The retry budget is one
//! degraded retry followed by a full degrade, never a loop.

use crate::device::DevicePermissions;
use crate::track::TrackError;
use crate::types::MediaKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which media kinds an acquisition failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionFailureKind {
    /// Microphone failed
    #[serde(rename = "AUDIO")]
    Audio,
    /// Camera failed
    #[serde(rename = "VIDEO")]
    Video,
    /// Both failed
    #[serde(rename = "AV")]
    AudioVideo,
}

impl AcquisitionFailureKind {
    /// Whether the failure covers `kind`
    #[must_use]
    pub fn covers(self, kind: MediaKind) -> bool {
        match self {
            Self::Audio => kind == MediaKind::Audio,
            Self::Video => kind == MediaKind::Video,
            Self::AudioVideo => true,
        }
    }

    /// Failure for the given flags, `None` if neither is set
    #[must_use]
    pub fn from_flags(audio: bool, video: bool) -> Option<Self> {
        match (audio, video) {
            (true, true) => Some(Self::AudioVideo),
            (true, false) => Some(Self::Audio),
            (false, true) => Some(Self::Video),
            (false, false) => None,
        }
    }
}

impl From<MediaKind> for AcquisitionFailureKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => Self::Audio,
            MediaKind::Video => Self::Video,
        }
    }
}

impl fmt::Display for AcquisitionFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Audio => "AUDIO",
            Self::Video => "VIDEO",
            Self::AudioVideo => "AV",
        })
    }
}

/// How a single kind should be fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Not fetched
    Skip,
    /// Acquired from the device layer
    Device,
    /// Synthetic placeholder
    Placeholder,
}

impl FetchMode {
    /// Mode for a kind that is wanted, optionally muted from the start
    #[must_use]
    pub fn wanted(wanted: bool, muted: bool) -> Self {
        match (wanted, muted) {
            (false, _) => Self::Skip,
            (true, true) => Self::Placeholder,
            (true, false) => Self::Device,
        }
    }

    /// Whether anything is fetched
    #[must_use]
    pub fn is_requested(self) -> bool {
        self != Self::Skip
    }
}

/// Per-kind fetch modes for one acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Audio mode
    pub audio: FetchMode,
    /// Video mode
    pub video: FetchMode,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            audio: FetchMode::Device,
            video: FetchMode::Device,
        }
    }
}

impl FetchOptions {
    /// Mode for `kind`
    #[must_use]
    pub fn mode(&self, kind: MediaKind) -> FetchMode {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }

    /// Whether any kind goes to the device layer
    #[must_use]
    pub fn needs_device(&self) -> bool {
        self.audio == FetchMode::Device || self.video == FetchMode::Device
    }
}

/// What to do after a failed acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDecision {
    /// Retry once with these degraded options
    RetryDegraded(FetchOptions),
    /// Give up and surface the error
    Propagate,
}

/// Attribute a device failure to media kinds using permission state
///
/// A denied permission for a requested kind pins the failure to that kind.
/// With no denied permission the failure is attributed to everything that
/// was requested.
#[must_use]
pub fn classify(
    permissions: DevicePermissions,
    requested_audio: bool,
    requested_video: bool,
) -> AcquisitionFailureKind {
    let video_denied = requested_video && !permissions.webcam;
    let audio_denied = requested_audio && !permissions.microphone;
    AcquisitionFailureKind::from_flags(audio_denied, video_denied)
        .or_else(|| AcquisitionFailureKind::from_flags(requested_audio, requested_video))
        .unwrap_or(AcquisitionFailureKind::AudioVideo)
}

/// Degrade the device-fetched kinds covered by `failed` to placeholders
#[must_use]
pub fn degrade_failed(options: FetchOptions, failed: AcquisitionFailureKind) -> FetchOptions {
    let degrade = |kind: MediaKind, mode: FetchMode| {
        if mode == FetchMode::Device && failed.covers(kind) {
            FetchMode::Placeholder
        } else {
            mode
        }
    };
    FetchOptions {
        audio: degrade(MediaKind::Audio, options.audio),
        video: degrade(MediaKind::Video, options.video),
    }
}

/// Degrade every requested kind to a placeholder
#[must_use]
pub fn degrade_all(options: FetchOptions) -> FetchOptions {
    let degrade = |mode: FetchMode| {
        if mode.is_requested() {
            FetchMode::Placeholder
        } else {
            FetchMode::Skip
        }
    };
    FetchOptions {
        audio: degrade(options.audio),
        video: degrade(options.video),
    }
}

/// Decide how to react to `error` raised while fetching with `options`
#[must_use]
pub fn decide(error: &TrackError, options: FetchOptions) -> FallbackDecision {
    match error.failure_kind() {
        Some(failed) => FallbackDecision::RetryDegraded(degrade_failed(options, failed)),
        None => FallbackDecision::Propagate,
    }
}
