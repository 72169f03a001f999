//! Local audio/video tracks
//!
//! # Lifecycle
//!
//! ```text
//! Empty ──enable──▶ Acquiring ──▶ Live ◀──▶ Replacing (device/settings change)
//!   │                               │
//!   └──────disable──▶ Disabled ◀────┘
//!
//! any ──cleanup──▶ Stopped
//! ```
//!
//! `Empty` means the track is backed by a placeholder. Enabling such a track
//! acquires a real device track instead of just flipping the enabled flag.
//!
//! Each track serializes its own operations behind an async mutex, so a
//! settings change never starts before a running replacement (plugin
//! reprocessing included) has finished.

use crate::device::{DeviceLayer, MediaEngine, MediaTrackSettings};
use crate::fallback::AcquisitionFailureKind;
use crate::placeholder::PlaceholderSurface;
use crate::plugin::{PluginError, PluginSupport, PluginsManager, TrackPlugin};
use crate::settings::{AudioTrackSettings, KindSettings, VideoTrackSettings};
use crate::store::DeviceSelection;
use crate::track::{NativeTrack, TrackError, TrackVariant};
use crate::types::{MediaKind, TrackSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use uuid::Uuid;

/// Lifecycle state of a local track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalTrackState {
    /// Backed by a placeholder
    Empty,
    /// Acquiring a device track to replace a placeholder
    Acquiring,
    /// Device track, media flowing
    Live,
    /// Swapping the device track
    Replacing,
    /// Media flow disabled
    Disabled,
    /// Cleaned up
    Stopped,
}

impl fmt::Display for LocalTrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "empty",
            Self::Acquiring => "acquiring",
            Self::Live => "live",
            Self::Replacing => "replacing",
            Self::Disabled => "disabled",
            Self::Stopped => "stopped",
        })
    }
}

/// Events published by local tracks
#[derive(Debug, Clone)]
pub enum LocalTrackEvent {
    /// Lifecycle state changed
    StateChanged {
        /// Local track id
        track_id: String,
        /// Kind
        kind: MediaKind,
        /// New state
        state: LocalTrackState,
    },
    /// Enabled flag changed
    EnabledChanged {
        /// Local track id
        track_id: String,
        /// Kind
        kind: MediaKind,
        /// New value
        enabled: bool,
    },
    /// Native track swapped
    NativeReplaced {
        /// Local track id
        track_id: String,
        /// Kind
        kind: MediaKind,
        /// Previous native id
        previous: String,
        /// New native id
        next: String,
    },
    /// Plugin reprocessing failed; the track keeps sending unprocessed media
    PluginFailed {
        /// Local track id
        track_id: String,
        /// Kind
        kind: MediaKind,
        /// Failure
        error: PluginError,
    },
}

/// Collaborators shared by every local track of a session
#[derive(Clone)]
pub struct TrackContext {
    /// Device layer
    pub device_layer: Arc<dyn DeviceLayer>,
    /// Media engine
    pub media_engine: Arc<dyn MediaEngine>,
    /// Placeholder owner
    pub placeholders: Arc<PlaceholderSurface>,
    /// Remembered device choices
    pub device_selection: Arc<DeviceSelection>,
    /// Event channel
    pub events: broadcast::Sender<LocalTrackEvent>,
    /// Reacquire the device track when the app returns to the foreground
    pub reacquire_on_foreground: bool,
}

struct LocalTrackInner<S> {
    native: NativeTrack,
    processed: Option<NativeTrack>,
    settings: S,
    state: LocalTrackState,
    plugins: PluginsManager,
    published_track_id: Option<String>,
    is_published: bool,
}

/// A locally acquired track
pub struct LocalTrack<S: KindSettings> {
    id: String,
    stream_id: String,
    source: TrackSource,
    context: TrackContext,
    inner: Mutex<LocalTrackInner<S>>,
}

/// Local microphone track
pub type LocalAudioTrack = LocalTrack<AudioTrackSettings>;

/// Local camera track
pub type LocalVideoTrack = LocalTrack<VideoTrackSettings>;

impl<S: KindSettings> LocalTrack<S> {
    /// Wrap `native` with its requested settings
    ///
    /// When the device reports a different device id than requested (for
    /// example `"default"`), the settings are rebuilt with the real id.
    pub fn new(native: NativeTrack, source: TrackSource, settings: S, context: TrackContext) -> Arc<Self> {
        let live = context.media_engine.track_settings(&native);
        let settings = match live.device_id.as_deref() {
            Some(real) if !native.is_placeholder() && settings.device_id() != Some(real) => {
                settings.with_device_id(real)
            }
            _ => settings,
        };
        let state = if native.is_placeholder() {
            LocalTrackState::Empty
        } else if native.is_enabled() {
            LocalTrackState::Live
        } else {
            LocalTrackState::Disabled
        };
        let track = Self {
            id: Uuid::new_v4().to_string(),
            stream_id: native.stream_id().to_string(),
            source,
            context,
            inner: Mutex::new(LocalTrackInner {
                native,
                processed: None,
                settings,
                state,
                plugins: PluginsManager::new(S::KIND),
                published_track_id: None,
                is_published: false,
            }),
        };
        tracing::debug!(track_id = %track.id, kind = %S::KIND, %state, "Local track created");
        Arc::new(track)
    }

    /// Stable local id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Local stream id
    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Source tag
    #[must_use]
    pub fn source(&self) -> &TrackSource {
        &self.source
    }

    /// Media kind
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        S::KIND
    }

    /// Track subtype
    #[must_use]
    pub fn variant(&self) -> TrackVariant {
        TrackVariant::of(S::KIND, true)
    }

    /// Current native track
    pub async fn native(&self) -> NativeTrack {
        self.inner.lock().await.native.clone()
    }

    /// Track the sender carries: plugin output if any, else the native track
    pub async fn track_being_sent(&self) -> NativeTrack {
        let inner = self.inner.lock().await;
        inner.processed.clone().unwrap_or_else(|| inner.native.clone())
    }

    /// Current settings
    pub async fn settings(&self) -> S {
        self.inner.lock().await.settings.clone()
    }

    /// Live settings reported by the media engine
    pub async fn media_settings(&self) -> MediaTrackSettings {
        let native = self.native().await;
        self.context.media_engine.track_settings(&native)
    }

    /// Lifecycle state
    pub async fn state(&self) -> LocalTrackState {
        self.inner.lock().await.state
    }

    /// Whether media flows
    pub async fn is_enabled(&self) -> bool {
        self.inner.lock().await.native.is_enabled()
    }

    /// Whether the track is currently a placeholder
    pub async fn is_placeholder(&self) -> bool {
        self.inner.lock().await.native.is_placeholder()
    }

    /// Id the transport published the track under
    pub async fn published_track_id(&self) -> Option<String> {
        self.inner.lock().await.published_track_id.clone()
    }

    /// Whether the track was handed to the transport
    pub async fn is_published(&self) -> bool {
        self.inner.lock().await.is_published
    }

    /// Whether `track_id` is the id this track was published under
    pub async fn is_published_track_id(&self, track_id: &str) -> bool {
        self.inner.lock().await.published_track_id.as_deref() == Some(track_id)
    }

    /// Record that the transport publishes the track under `published_track_id`
    pub async fn mark_published(&self, published_track_id: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.published_track_id = Some(published_track_id.into());
        inner.is_published = true;
    }

    /// Enable or disable media flow
    ///
    /// Enabling a placeholder-backed track acquires a device track first.
    ///
    /// # Errors
    ///
    /// Returns error if the track is stopped or the device cannot be acquired
    #[tracing::instrument(skip(self), fields(track_id = %self.id, kind = %S::KIND))]
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), TrackError> {
        let mut inner = self.inner.lock().await;
        self.ensure_active(&inner)?;
        if enabled == inner.native.is_enabled() {
            // A placeholder is already disabled but still leaves Empty
            if !enabled && inner.state == LocalTrackState::Empty {
                self.set_state(&mut inner, LocalTrackState::Disabled);
            }
            return Ok(());
        }

        if enabled && inner.native.is_placeholder() {
            let settings = inner.settings.clone();
            self.replace_native(&mut inner, &settings, true).await?;
        }
        inner.native.set_enabled(enabled);
        if let Some(processed) = &inner.processed {
            processed.set_enabled(enabled);
        }
        if enabled {
            let live = self.context.media_engine.track_settings(&inner.native);
            if let Some(real) = live.device_id.as_deref() {
                if inner.settings.device_id() != Some(real) {
                    inner.settings = inner.settings.with_device_id(real);
                }
            }
        }

        let state = if enabled {
            LocalTrackState::Live
        } else {
            LocalTrackState::Disabled
        };
        self.set_state(&mut inner, state);
        let _ = self.context.events.send(LocalTrackEvent::EnabledChanged {
            track_id: self.id.clone(),
            kind: S::KIND,
            enabled,
        });
        Ok(())
    }

    /// Apply a settings change requested by the application
    ///
    /// # Errors
    ///
    /// Returns error if the track is stopped, reacquisition fails or the
    /// media engine rejects the change
    pub async fn set_settings(&self, update: S::Update) -> Result<(), TrackError> {
        self.set_settings_internal(update, false).await
    }

    /// Apply a settings change; `internal` changes do not update the
    /// remembered device selection
    ///
    /// On a placeholder the new settings are only cached and take effect on
    /// the next enable.
    ///
    /// # Errors
    ///
    /// Returns error if the track is stopped, reacquisition fails or the
    /// media engine rejects the change
    #[tracing::instrument(skip(self, update), fields(track_id = %self.id, kind = %S::KIND))]
    pub async fn set_settings_internal(&self, update: S::Update, internal: bool) -> Result<(), TrackError> {
        let mut inner = self.inner.lock().await;
        self.ensure_active(&inner)?;
        let next = inner.settings.merged(&update);
        if next == inner.settings {
            return Ok(());
        }
        if inner.native.is_placeholder() {
            tracing::debug!("Caching settings until the track is enabled");
            inner.settings = next;
            return Ok(());
        }

        let previous = inner.settings.clone();
        let device_changed = next.device_id() != previous.device_id();
        if device_changed {
            let enabled = inner.native.is_enabled();
            self.replace_native(&mut inner, &next, enabled).await?;
            // The new device is live even if a later step fails
            inner.settings = next.clone();
            if !internal {
                if let Some(device_id) = next.device_id() {
                    let group_id = inner.native.settings().group_id.clone();
                    self.context
                        .device_selection
                        .update_selection(S::KIND, device_id, group_id);
                }
            }
        }

        if next.max_bitrate() != previous.max_bitrate() && inner.is_published {
            if let Some(kbps) = next.max_bitrate() {
                let sent = inner.processed.clone().unwrap_or_else(|| inner.native.clone());
                self.context.media_engine.set_max_bitrate(&sent, kbps).await?;
            }
        }

        if !device_changed && next.requires_reacquire(&previous) {
            let enabled = inner.native.is_enabled();
            self.replace_native(&mut inner, &next, enabled).await?;
        }
        inner.settings = next;
        Ok(())
    }

    /// React to the app moving between background and foreground
    ///
    /// # Errors
    ///
    /// Returns error if reacquiring the device track fails
    pub async fn handle_visibility_change(&self, visible: bool) -> Result<(), TrackError> {
        if !visible || !self.context.reacquire_on_foreground {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        if inner.state == LocalTrackState::Stopped || inner.native.is_placeholder() {
            return Ok(());
        }
        tracing::info!(track_id = %self.id, kind = %S::KIND, "Reacquiring track after returning to foreground");
        let settings = inner.settings.clone();
        let enabled = inner.native.is_enabled();
        self.replace_native(&mut inner, &settings, enabled).await
    }

    /// Add a content-processing plugin
    ///
    /// # Errors
    ///
    /// Returns error if the plugin is rejected or the sender cannot switch to
    /// the processed track
    pub async fn add_plugin(&self, plugin: Arc<dyn TrackPlugin>) -> Result<(), TrackError> {
        let mut inner = self.inner.lock().await;
        self.ensure_active(&inner)?;
        let native = inner.native.clone();
        let processed = inner.plugins.add(plugin, &native).await?;
        self.set_processed(&mut inner, processed).await
    }

    /// Remove the plugin called `name`
    ///
    /// # Errors
    ///
    /// Returns error if no such plugin exists or the sender cannot switch back
    pub async fn remove_plugin(&self, name: &str) -> Result<(), TrackError> {
        let mut inner = self.inner.lock().await;
        self.ensure_active(&inner)?;
        let native = inner.native.clone();
        let processed = inner.plugins.remove(name, &native).await?;
        self.set_processed(&mut inner, processed).await
    }

    /// Plugin names in chain order
    pub async fn plugins(&self) -> Vec<String> {
        self.inner.lock().await.plugins.names()
    }

    /// Whether `plugin` could be added to this track
    pub async fn validate_plugin(&self, plugin: &dyn TrackPlugin) -> PluginSupport {
        self.inner.lock().await.plugins.validate(plugin)
    }

    /// Re-run the plugin chain against the current native track
    pub async fn reprocess_plugins(&self) {
        let mut inner = self.inner.lock().await;
        self.run_plugins(&mut inner).await;
    }

    /// Stop the native track, tear down plugins and mark the track stopped
    #[tracing::instrument(skip(self), fields(track_id = %self.id, kind = %S::KIND))]
    pub async fn cleanup(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == LocalTrackState::Stopped {
            return;
        }
        inner.native.stop();
        inner.plugins.cleanup().await;
        if let Some(processed) = inner.processed.take() {
            processed.stop();
        }
        inner.is_published = false;
        self.set_state(&mut inner, LocalTrackState::Stopped);
        self.context.placeholders.release_ended();
    }

    fn ensure_active(&self, inner: &LocalTrackInner<S>) -> Result<(), TrackError> {
        if inner.state == LocalTrackState::Stopped {
            return Err(TrackError::Stopped(self.id.clone()));
        }
        Ok(())
    }

    fn set_state(&self, inner: &mut LocalTrackInner<S>, state: LocalTrackState) {
        if inner.state == state {
            return;
        }
        tracing::debug!(track_id = %self.id, from = %inner.state, to = %state, "Local track state changed");
        inner.state = state;
        let _ = self.context.events.send(LocalTrackEvent::StateChanged {
            track_id: self.id.clone(),
            kind: S::KIND,
            state,
        });
    }

    /// Swap the native track for a freshly acquired one, enabled as given
    ///
    /// The previous track is stopped before acquiring so two device locks are
    /// never held at once. If acquisition fails the track falls back to a
    /// placeholder and the error is returned.
    async fn replace_native(
        &self,
        inner: &mut MutexGuard<'_, LocalTrackInner<S>>,
        settings: &S,
        enabled: bool,
    ) -> Result<(), TrackError> {
        let previous = inner.native.clone();
        previous.stop();
        self.context.placeholders.release_ended();
        let transitional = if previous.is_placeholder() {
            LocalTrackState::Acquiring
        } else {
            LocalTrackState::Replacing
        };
        self.set_state(inner, transitional);

        let next = match self.acquire(settings).await {
            Ok(next) => next,
            Err(error) => {
                tracing::warn!(track_id = %self.id, kind = %S::KIND, %error, "Reacquiring track failed, falling back to placeholder");
                let placeholder = self.placeholder_for(&previous);
                if let Err(swap_error) = self.swap_native(inner, &previous, placeholder).await {
                    tracing::warn!(track_id = %self.id, error = %swap_error, "Could not install placeholder");
                }
                self.set_state(inner, LocalTrackState::Empty);
                return Err(error);
            }
        };
        next.set_enabled(enabled);
        self.swap_native(inner, &previous, next).await?;

        let state = if inner.native.is_enabled() {
            LocalTrackState::Live
        } else {
            LocalTrackState::Disabled
        };
        self.set_state(inner, state);
        self.run_plugins(inner).await;
        Ok(())
    }

    async fn swap_native(
        &self,
        inner: &mut MutexGuard<'_, LocalTrackInner<S>>,
        previous: &NativeTrack,
        next: NativeTrack,
    ) -> Result<(), TrackError> {
        inner.native = next.clone();
        if inner.is_published && inner.processed.is_none() {
            self.context
                .media_engine
                .replace_sender_track(previous, &next)
                .await?;
        }
        self.context
            .media_engine
            .replace_stream_track(&self.stream_id, previous, &next)
            .await?;
        tracing::info!(
            track_id = %self.id,
            kind = %S::KIND,
            previous = %previous.id(),
            next = %next.id(),
            "Native track replaced"
        );
        let _ = self.context.events.send(LocalTrackEvent::NativeReplaced {
            track_id: self.id.clone(),
            kind: S::KIND,
            previous: previous.id().to_string(),
            next: next.id().to_string(),
        });
        Ok(())
    }

    async fn run_plugins(&self, inner: &mut MutexGuard<'_, LocalTrackInner<S>>) {
        if inner.plugins.is_empty() {
            return;
        }
        let result = inner.plugins.reprocess(&inner.native).await;
        let processed = match result {
            Ok(processed) => processed,
            Err(error) => {
                tracing::warn!(track_id = %self.id, %error, "Plugin reprocessing failed");
                let _ = self.context.events.send(LocalTrackEvent::PluginFailed {
                    track_id: self.id.clone(),
                    kind: S::KIND,
                    error,
                });
                None
            }
        };
        if let Err(error) = self.set_processed(inner, processed).await {
            tracing::warn!(track_id = %self.id, %error, "Could not switch sender to processed track");
        }
    }

    /// Point the sender at `processed`, or back at the native track
    async fn set_processed(
        &self,
        inner: &mut LocalTrackInner<S>,
        processed: Option<NativeTrack>,
    ) -> Result<(), TrackError> {
        let current = inner
            .processed
            .clone()
            .unwrap_or_else(|| inner.native.clone());
        let target = processed.clone().unwrap_or_else(|| inner.native.clone());
        if current != target && inner.is_published {
            self.context
                .media_engine
                .replace_sender_track(&current, &target)
                .await?;
        }
        if let Some(old) = inner.processed.take() {
            if old != target {
                old.stop();
            }
        }
        inner.processed = processed;
        Ok(())
    }

    async fn acquire(&self, settings: &S) -> Result<NativeTrack, TrackError> {
        let constraints = settings.to_constraints();
        let tracks = self
            .context
            .device_layer
            .get_user_media(&constraints)
            .await
            .map_err(|e| TrackError::from_device(&e, AcquisitionFailureKind::from(S::KIND)))?;
        tracks
            .into_iter()
            .find(|t| t.kind() == S::KIND)
            .ok_or_else(|| TrackError::Generic(format!("device layer returned no {} track", S::KIND)))
    }

    fn placeholder_for(&self, previous: &NativeTrack) -> NativeTrack {
        match S::KIND {
            MediaKind::Audio => self.context.placeholders.silent_audio_track(&self.stream_id),
            MediaKind::Video => self
                .context
                .placeholders
                .blank_video_track(&self.stream_id, Some(previous.settings())),
        }
    }
}

impl<S: KindSettings> fmt::Debug for LocalTrack<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &S::KIND)
            .field("stream_id", &self.stream_id)
            .field("source", &self.source)
            .finish()
    }
}

/// A local track of either kind
#[derive(Debug, Clone)]
pub enum LocalMediaTrack {
    /// Microphone
    Audio(Arc<LocalAudioTrack>),
    /// Camera
    Video(Arc<LocalVideoTrack>),
}

impl LocalMediaTrack {
    /// Stable local id
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Audio(t) => t.id(),
            Self::Video(t) => t.id(),
        }
    }

    /// Media kind
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Audio(_) => MediaKind::Audio,
            Self::Video(_) => MediaKind::Video,
        }
    }

    /// Source tag
    #[must_use]
    pub fn source(&self) -> &TrackSource {
        match self {
            Self::Audio(t) => t.source(),
            Self::Video(t) => t.source(),
        }
    }

    /// Current native track
    pub async fn native(&self) -> NativeTrack {
        match self {
            Self::Audio(t) => t.native().await,
            Self::Video(t) => t.native().await,
        }
    }

    /// Track the sender carries
    pub async fn track_being_sent(&self) -> NativeTrack {
        match self {
            Self::Audio(t) => t.track_being_sent().await,
            Self::Video(t) => t.track_being_sent().await,
        }
    }

    /// Whether media flows
    pub async fn is_enabled(&self) -> bool {
        match self {
            Self::Audio(t) => t.is_enabled().await,
            Self::Video(t) => t.is_enabled().await,
        }
    }

    /// Whether the track is a placeholder
    pub async fn is_placeholder(&self) -> bool {
        match self {
            Self::Audio(t) => t.is_placeholder().await,
            Self::Video(t) => t.is_placeholder().await,
        }
    }

    /// Lifecycle state
    pub async fn state(&self) -> LocalTrackState {
        match self {
            Self::Audio(t) => t.state().await,
            Self::Video(t) => t.state().await,
        }
    }

    /// Record the id the transport publishes the track under
    pub async fn mark_published(&self, published_track_id: impl Into<String>) {
        match self {
            Self::Audio(t) => t.mark_published(published_track_id).await,
            Self::Video(t) => t.mark_published(published_track_id).await,
        }
    }

    /// React to foreground/background changes
    ///
    /// # Errors
    ///
    /// Returns error if reacquiring the device track fails
    pub async fn handle_visibility_change(&self, visible: bool) -> Result<(), TrackError> {
        match self {
            Self::Audio(t) => t.handle_visibility_change(visible).await,
            Self::Video(t) => t.handle_visibility_change(visible).await,
        }
    }

    /// Stop and tear down
    pub async fn cleanup(&self) {
        match self {
            Self::Audio(t) => t.cleanup().await,
            Self::Video(t) => t.cleanup().await,
        }
    }
}
