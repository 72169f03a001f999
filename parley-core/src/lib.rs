//! Parley - peer/track reconciliation and local media for multi-party sessions
//!
//! This library keeps a client's view of a real-time media session consistent
//! and acquires the local user's media. It features:
//!
//! - **Reconciliation Engine**: merges peer notifications, track metadata and
//!   native track callbacks into one peer registry, whatever order they arrive in
//! - **Reconnect Diffing**: replays a full peer list after a reconnect and emits
//!   only the joins, leaves and track removals that actually happened
//! - **Local Track Acquisition**: builds publishable audio/video tracks from
//!   role publish params, degrading to placeholder tracks when devices fail
//! - **Local Track Lifecycle**: device switching, settings changes, plugins and
//!   foreground reacquisition per track
//!
//! # Examples
//!
//! ```rust,no_run
//! use parley_core::prelude::*;
//! use parley_core::sim::{RecordingListener, RecordingMediaEngine, RecordingObserver, SimulatedDeviceLayer};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let session = SessionClient::builder()
//!     .with_listener(Arc::new(RecordingListener::new()))
//!     .with_observer(Arc::new(RecordingObserver::new()))
//!     .with_device_layer(Arc::new(SimulatedDeviceLayer::new()))
//!     .with_media_engine(Arc::new(RecordingMediaEngine::new()))
//!     .build()?;
//!
//! session.store().set_publish_params(Some(PublishParams::default()));
//! let tracks = session.tracks_to_publish(&InitialSettings::default()).await?;
//!
//! session.handle_notification(
//!     Notification::PeerJoin(PeerNotification::new("peer-1", "Alice")),
//!     false,
//! );
//! # let _ = tracks;
//! session.leave().await;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::pedantic)]
#![allow(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

/// Identifiers and media kinds
pub mod types;

/// Native and remote track handles
pub mod track;

/// Peer records and the peer registry
pub mod peer;

/// Decoded signaling notifications
pub mod notification;

/// Listener contracts and engine events
pub mod listener;

/// Peer/track state reconciliation
pub mod reconcile;

/// Local track settings
pub mod settings;

/// Device layer and media engine contracts
pub mod device;

/// Device fallback policy
pub mod fallback;

/// Placeholder tracks
pub mod placeholder;

/// Track content plugins
pub mod plugin;

/// Local track lifecycle
pub mod local_track;

/// Local peer store
pub mod store;

/// Local track acquisition pipeline
pub mod acquisition;

/// Session configuration
pub mod config;

/// Session orchestration
pub mod session;

/// Simulated collaborators
pub mod sim;

// Re-export main types at crate root
pub use acquisition::LocalTrackManager;
pub use config::{ConfigError, InitialSettings, PlaceholderConfig, SessionConfig};
pub use device::{
    DeviceError, DeviceInfo, DeviceKind, DeviceLayer, DevicePermissions, MediaEngine,
    MediaEngineError, MediaStreamConstraints, MediaTrackSettings,
};
pub use fallback::{AcquisitionFailureKind, FallbackDecision, FetchMode, FetchOptions};
pub use listener::{
    AudioListener, EngineEvent, ListenerEvent, PeerUpdate, TrackUpdate, TransportObserver,
    UpdateListener,
};
pub use local_track::{
    LocalAudioTrack, LocalMediaTrack, LocalTrack, LocalTrackEvent, LocalTrackState,
    LocalVideoTrack, TrackContext,
};
pub use notification::{
    Message, Notification, PeerInfo, PeerListNotification, PeerNotification, RoleChangeRequest,
    Speaker, SpeakerList, TrackInfo, TrackStateNotification,
};
pub use peer::{Peer, PeerRegistry, TrackSlot};
pub use placeholder::{PlaceholderKind, PlaceholderSurface};
pub use plugin::{PluginError, PluginSupport, PluginsManager, TrackPlugin};
pub use reconcile::{PendingTrackBuffer, ReconciliationEngine, TrackStateIndex};
pub use session::{SessionClient, SessionClientBuilder, SessionError};
pub use settings::{
    AudioCodec, AudioSettingsUpdate, AudioTrackSettings, KindSettings, TrackSettings,
    VideoCodec, VideoSettingsUpdate, VideoTrackSettings,
};
pub use store::{DeviceSelection, LocalPeerStore, PublishParams, SimulcastDimensions};
pub use track::{NativeTrack, RemoteTrack, TrackError, TrackVariant};
pub use types::{CompositeTrackId, MediaKind, PeerId, TrackSource};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{InitialSettings, SessionConfig};
    pub use crate::listener::{PeerUpdate, TrackUpdate, TransportObserver, UpdateListener};
    pub use crate::local_track::{LocalMediaTrack, LocalTrackState};
    pub use crate::notification::{Notification, PeerNotification, TrackInfo};
    pub use crate::reconcile::ReconciliationEngine;
    pub use crate::session::{SessionClient, SessionClientBuilder, SessionError};
    pub use crate::store::PublishParams;
    pub use crate::track::{NativeTrack, TrackError};
    pub use crate::types::{MediaKind, PeerId, TrackSource};
}
