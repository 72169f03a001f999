//! Track handles and track-related errors
//!
//! # Architecture
//!
//! A [`NativeTrack`] is a cheap, cloneable handle to a track owned by the
//! media engine: clones share enabled/ended state, and equality is by native
//! track id. Higher layers wrap it:
//!
//! - [`RemoteTrack`] - a remote peer's track, owned by exactly one peer record
//!   (or by the pending buffer until its metadata arrives)
//! - [`crate::local_track::LocalTrack`] - a locally acquired track with its
//!   settings, plugins and device lifecycle
//!
//! Track subtypes form a closed set ([`TrackVariant`]) with capability flags
//! rather than being inspected at runtime.

use crate::device::{DeviceError, MediaEngineError, MediaTrackSettings};
use crate::fallback::AcquisitionFailureKind;
use crate::placeholder::PlaceholderKind;
use crate::plugin::PluginError;
use crate::types::{CompositeTrackId, MediaKind, TrackSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Track-related errors
#[derive(Error, Debug, Clone)]
pub enum TrackError {
    /// Devices or permissions failed for the given kinds
    #[error("Track acquisition failed ({kind}): {message}")]
    Acquisition {
        /// Which kinds failed
        kind: AcquisitionFailureKind,
        /// Underlying failure description
        message: String,
    },

    /// Acquisition failed for a reason that cannot be pinned to a media kind
    #[error("Track error: {0}")]
    Generic(String),

    /// Settings rejected at build time
    #[error("Invalid track settings: {0}")]
    InvalidSettings(String),

    /// Neither audio nor video settings were provided
    #[error("Nothing to build: neither audio nor video settings were provided")]
    NothingToBuild,

    /// Media engine failure while swapping tracks
    #[error("Media engine error: {0}")]
    MediaEngine(#[from] MediaEngineError),

    /// Plugin failure
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Operation on a track that was already cleaned up
    #[error("Track {0} is stopped")]
    Stopped(String),
}

impl TrackError {
    /// Convert a device failure for `requested` kinds into a track error
    ///
    /// Permission and device failures are classified; anything else is a
    /// generic error.
    #[must_use]
    pub fn from_device(error: &DeviceError, kind: AcquisitionFailureKind) -> Self {
        if error.is_classifiable() {
            Self::Acquisition {
                kind,
                message: error.to_string(),
            }
        } else {
            Self::Generic(error.to_string())
        }
    }

    /// Failure classification, if this is an acquisition error
    #[must_use]
    pub fn failure_kind(&self) -> Option<AcquisitionFailureKind> {
        match self {
            Self::Acquisition { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Where a native track came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOrigin {
    /// Delivered by the transport for a remote peer
    Remote,
    /// Captured from a local device
    Device,
    /// Synthetic placeholder
    Placeholder(PlaceholderKind),
    /// Output of a content plugin
    Processed,
}

struct NativeTrackInner {
    id: String,
    kind: MediaKind,
    stream_id: String,
    origin: NativeOrigin,
    settings: MediaTrackSettings,
    enabled: AtomicBool,
    ended: AtomicBool,
}

/// Handle to a media-engine track
#[derive(Clone)]
pub struct NativeTrack {
    inner: Arc<NativeTrackInner>,
}

impl NativeTrack {
    fn build(
        id: String,
        stream_id: String,
        kind: MediaKind,
        origin: NativeOrigin,
        settings: MediaTrackSettings,
        enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(NativeTrackInner {
                id,
                kind,
                stream_id,
                origin,
                settings,
                enabled: AtomicBool::new(enabled),
                ended: AtomicBool::new(false),
            }),
        }
    }

    /// Track delivered by the transport for a remote stream
    pub fn remote(id: impl Into<String>, stream_id: impl Into<String>, kind: MediaKind) -> Self {
        Self::build(
            id.into(),
            stream_id.into(),
            kind,
            NativeOrigin::Remote,
            MediaTrackSettings::default(),
            true,
        )
    }

    /// Track captured from a local device
    pub fn device(
        id: impl Into<String>,
        stream_id: impl Into<String>,
        kind: MediaKind,
        settings: MediaTrackSettings,
    ) -> Self {
        Self::build(
            id.into(),
            stream_id.into(),
            kind,
            NativeOrigin::Device,
            settings,
            true,
        )
    }

    /// Track produced by a content plugin from `input`
    pub fn processed(id: impl Into<String>, input: &NativeTrack) -> Self {
        Self::build(
            id.into(),
            input.stream_id().to_string(),
            input.kind(),
            NativeOrigin::Processed,
            input.settings().clone(),
            input.is_enabled(),
        )
    }

    /// Synthetic placeholder; created disabled
    pub(crate) fn placeholder(
        id: String,
        stream_id: String,
        placeholder: PlaceholderKind,
        settings: MediaTrackSettings,
    ) -> Self {
        Self::build(
            id,
            stream_id,
            placeholder.media_kind(),
            NativeOrigin::Placeholder(placeholder),
            settings,
            false,
        )
    }

    /// Native track id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Media kind
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// Stream the track belongs to
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.inner.stream_id
    }

    /// Composite identity used for metadata correlation
    #[must_use]
    pub fn composite_id(&self) -> CompositeTrackId {
        CompositeTrackId::new(self.inner.stream_id.clone(), self.inner.kind)
    }

    /// Origin of the track
    #[must_use]
    pub fn origin(&self) -> NativeOrigin {
        self.inner.origin
    }

    /// Live settings as reported by the media engine
    #[must_use]
    pub fn settings(&self) -> &MediaTrackSettings {
        &self.inner.settings
    }

    /// Whether the track is a synthetic placeholder
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        matches!(self.inner.origin, NativeOrigin::Placeholder(_))
    }

    /// Placeholder flavour, if any
    #[must_use]
    pub fn placeholder_kind(&self) -> Option<PlaceholderKind> {
        match self.inner.origin {
            NativeOrigin::Placeholder(kind) => Some(kind),
            _ => None,
        }
    }

    /// Whether media flows
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Enable or disable media flow
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Stop the track, releasing its device
    pub fn stop(&self) {
        if !self.inner.ended.swap(true, Ordering::AcqRel) {
            tracing::debug!(track_id = %self.inner.id, kind = %self.inner.kind, "Native track stopped");
        }
    }

    /// Whether the track has been stopped
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.inner.ended.load(Ordering::Acquire)
    }
}

impl PartialEq for NativeTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for NativeTrack {}

impl std::fmt::Debug for NativeTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("stream_id", &self.inner.stream_id)
            .field("origin", &self.inner.origin)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish()
    }
}

/// Closed set of track subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackVariant {
    /// Remote peer's audio
    RemoteAudio,
    /// Remote peer's video
    RemoteVideo,
    /// Locally captured audio
    LocalAudio,
    /// Locally captured video
    LocalVideo,
}

/// Capability flags of a track variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackCapabilities {
    /// Simulcast layers can be published or selected
    pub supports_simulcast: bool,
    /// Playback or capture volume can be adjusted
    pub supports_volume: bool,
    /// Track belongs to the local peer
    pub is_local: bool,
}

impl TrackVariant {
    /// Variant for a track of `kind` on the given side
    #[must_use]
    pub fn of(kind: MediaKind, is_local: bool) -> Self {
        match (kind, is_local) {
            (MediaKind::Audio, false) => Self::RemoteAudio,
            (MediaKind::Video, false) => Self::RemoteVideo,
            (MediaKind::Audio, true) => Self::LocalAudio,
            (MediaKind::Video, true) => Self::LocalVideo,
        }
    }

    /// Capability flags
    #[must_use]
    pub fn capabilities(&self) -> TrackCapabilities {
        match self {
            Self::RemoteAudio => TrackCapabilities {
                supports_simulcast: false,
                supports_volume: true,
                is_local: false,
            },
            Self::RemoteVideo => TrackCapabilities {
                supports_simulcast: true,
                supports_volume: false,
                is_local: false,
            },
            Self::LocalAudio => TrackCapabilities {
                supports_simulcast: false,
                supports_volume: true,
                is_local: true,
            },
            Self::LocalVideo => TrackCapabilities {
                supports_simulcast: true,
                supports_volume: false,
                is_local: true,
            },
        }
    }

    /// Media kind of the variant
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::RemoteAudio | Self::LocalAudio => MediaKind::Audio,
            Self::RemoteVideo | Self::LocalVideo => MediaKind::Video,
        }
    }
}

/// A remote peer's track
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTrack {
    native: NativeTrack,
    source: TrackSource,
}

impl RemoteTrack {
    /// Wrap a native track with its source tag
    #[must_use]
    pub fn new(native: NativeTrack, source: TrackSource) -> Self {
        Self { native, source }
    }

    /// Native track id
    #[must_use]
    pub fn track_id(&self) -> &str {
        self.native.id()
    }

    /// Stream id
    #[must_use]
    pub fn stream_id(&self) -> &str {
        self.native.stream_id()
    }

    /// Media kind
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.native.kind()
    }

    /// Composite identity
    #[must_use]
    pub fn composite_id(&self) -> CompositeTrackId {
        self.native.composite_id()
    }

    /// Source tag
    #[must_use]
    pub fn source(&self) -> &TrackSource {
        &self.source
    }

    /// Replace the source tag
    pub fn set_source(&mut self, source: TrackSource) {
        self.source = source;
    }

    /// Whether the remote side is sending (not muted)
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.native.is_enabled()
    }

    /// Apply the remote mute state
    pub fn set_enabled(&self, enabled: bool) {
        self.native.set_enabled(enabled);
    }

    /// Underlying native track
    #[must_use]
    pub fn native(&self) -> &NativeTrack {
        &self.native
    }

    /// Track subtype
    #[must_use]
    pub fn variant(&self) -> TrackVariant {
        TrackVariant::of(self.kind(), false)
    }
}
