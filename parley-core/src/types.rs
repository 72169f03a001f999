//! Session types and data structures

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a session participant
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Create a new peer identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

impl MediaKind {
    /// Lowercase wire name of the kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source tag of a track
///
/// Only `regular` tracks are eligible for a peer's primary audio/video slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TrackSource {
    /// Camera or microphone
    #[default]
    Regular,
    /// Screen share
    Screen,
    /// Produced by a content plugin
    Plugin,
    /// Any other source tag the server sends
    Other(String),
}

impl TrackSource {
    /// Wire name of the source
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Regular => "regular",
            Self::Screen => "screen",
            Self::Plugin => "plugin",
            Self::Other(other) => other,
        }
    }

    /// Whether this is the regular source
    #[must_use]
    pub fn is_regular(&self) -> bool {
        matches!(self, Self::Regular)
    }
}

impl From<String> for TrackSource {
    fn from(s: String) -> Self {
        match s.as_str() {
            "regular" => Self::Regular,
            "screen" => Self::Screen,
            "plugin" => Self::Plugin,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for TrackSource {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<TrackSource> for String {
    fn from(source: TrackSource) -> Self {
        source.as_str().to_string()
    }
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite track identity used to correlate metadata with native tracks
///
/// Signaling metadata and transport callbacks agree on the stream id and the
/// media kind long before a stable track id is known to both sides.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompositeTrackId {
    /// Stream identifier
    pub stream_id: String,
    /// Media kind
    pub kind: MediaKind,
}

impl CompositeTrackId {
    /// Create a new composite id
    pub fn new(stream_id: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            stream_id: stream_id.into(),
            kind,
        }
    }
}

impl fmt::Display for CompositeTrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.stream_id, self.kind)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_track_source_round_trips_unknown_tags() {
        let source: TrackSource = serde_json::from_str("\"whiteboard\"").unwrap();
        assert_eq!(source, TrackSource::Other("whiteboard".to_string()));
        assert_eq!(serde_json::to_string(&source).unwrap(), "\"whiteboard\"");

        let regular: TrackSource = serde_json::from_str("\"regular\"").unwrap();
        assert!(regular.is_regular());
    }

    #[test]
    fn test_composite_id_display() {
        let id = CompositeTrackId::new("stream-1", MediaKind::Video);
        assert_eq!(id.to_string(), "stream-1video");
    }

    #[test]
    fn test_media_kind_serialization() {
        assert_eq!(serde_json::to_string(&MediaKind::Audio).unwrap(), "\"audio\"");
        let kind: MediaKind = serde_json::from_str("\"video\"").unwrap();
        assert_eq!(kind, MediaKind::Video);
    }
}
