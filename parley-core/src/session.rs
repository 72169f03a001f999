//! Session orchestration
//!
//! [`SessionClient`] owns one reconciliation engine and one acquisition
//! pipeline for the lifetime of a session and tears both down on
//! [`SessionClient::leave`].

use crate::acquisition::LocalTrackManager;
use crate::config::{ConfigError, InitialSettings, SessionConfig};
use crate::device::{DeviceLayer, MediaEngine};
use crate::listener::{AudioListener, EngineEvent, TransportObserver, UpdateListener};
use crate::local_track::{LocalMediaTrack, LocalTrackEvent, TrackContext};
use crate::notification::Notification;
use crate::peer::Peer;
use crate::placeholder::PlaceholderSurface;
use crate::reconcile::ReconciliationEngine;
use crate::store::{DeviceSelection, LocalPeerStore};
use crate::track::{NativeTrack, TrackError};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Local track failure
    #[error("Track error: {0}")]
    Track(#[from] TrackError),

    /// Configuration failure
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Builder was not given a required collaborator
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),
}

/// A joined session
pub struct SessionClient {
    config: SessionConfig,
    engine: Mutex<ReconciliationEngine>,
    tracks: LocalTrackManager,
    store: Arc<LocalPeerStore>,
}

impl SessionClient {
    /// Create a builder
    #[must_use]
    pub fn builder() -> SessionClientBuilder {
        SessionClientBuilder::new()
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handle a decoded signaling notification
    ///
    /// # Transport contract
    ///
    /// A reconnect peer list (`is_reconnecting = true`) only registers
    /// metadata for tracks the engine has not seen. The transport must deliver
    /// a native track-add through [`Self::handle_native_track_add`] for every
    /// track it re-establishes after a reconnect; until it does, those tracks
    /// stay invisible to the listener.
    ///
    /// Listener callbacks run while the engine lock is held; see
    /// [`UpdateListener`] for what they may not do.
    pub fn handle_notification(&self, notification: Notification, is_reconnecting: bool) {
        self.engine
            .lock()
            .handle_notification(notification, is_reconnecting);
    }

    /// Handle a native track delivered by the transport
    pub fn handle_native_track_add(&self, track: NativeTrack) {
        self.engine.lock().handle_native_track_add(track);
    }

    /// Handle a native track removed by the transport
    pub fn handle_native_track_remove(&self, track: &NativeTrack) {
        self.engine.lock().handle_native_track_remove(track);
    }

    /// Set the local peer record
    pub fn set_local_peer(&self, peer: Peer) {
        self.engine.lock().set_local_peer(peer);
    }

    /// Run `f` against the engine state
    ///
    /// Must not be called from a listener callback.
    pub fn with_engine<R>(&self, f: impl FnOnce(&ReconciliationEngine) -> R) -> R {
        f(&self.engine.lock())
    }

    /// Subscribe to role changes and audio track events
    #[must_use]
    pub fn subscribe_engine_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.lock().subscribe()
    }

    /// Subscribe to local track lifecycle events
    #[must_use]
    pub fn subscribe_local_track_events(&self) -> broadcast::Receiver<LocalTrackEvent> {
        self.tracks.context().events.subscribe()
    }

    /// Local peer store
    #[must_use]
    pub fn store(&self) -> &Arc<LocalPeerStore> {
        &self.store
    }

    /// Acquisition pipeline
    #[must_use]
    pub fn track_manager(&self) -> &LocalTrackManager {
        &self.tracks
    }

    /// Local tracks to publish on join or after a role change
    ///
    /// # Errors
    ///
    /// Returns error if acquisition fails in a way placeholders cannot cover
    #[tracing::instrument(skip(self))]
    pub async fn tracks_to_publish(
        &self,
        initial: &InitialSettings,
    ) -> Result<Vec<LocalMediaTrack>, SessionError> {
        Ok(self.tracks.get_tracks_to_publish(initial).await?)
    }

    /// Record that the transport published `track` under `published_track_id`
    pub async fn mark_published(&self, track: &LocalMediaTrack, published_track_id: &str) {
        track.mark_published(published_track_id).await;
        self.store.mark_published(track.id());
        tracing::info!(track_id = %track.id(), published_track_id, "Local track published");
    }

    /// Forward an app visibility change to every local track
    ///
    /// # Errors
    ///
    /// Returns the first reacquisition failure; every track is still visited
    pub async fn handle_visibility_change(&self, visible: bool) -> Result<(), SessionError> {
        let tracks = self.store.local_tracks();
        let results = join_all(tracks.iter().map(|t| t.handle_visibility_change(visible))).await;
        let mut first = None;
        for (track, result) in tracks.iter().zip(results) {
            if let Err(error) = result {
                tracing::warn!(track_id = %track.id(), %error, "Visibility change failed");
                first.get_or_insert(error);
            }
        }
        match first {
            Some(error) => Err(error.into()),
            None => Ok(()),
        }
    }

    /// Leave the session
    ///
    /// Stops every local track, clears the engine and disposes placeholder
    /// resources.
    #[tracing::instrument(skip(self))]
    pub async fn leave(&self) {
        let tracks = self.store.local_tracks();
        join_all(tracks.iter().map(|t| t.cleanup())).await;
        self.store.clear();
        self.engine.lock().clean_up();
        self.tracks.context().placeholders.dispose();
        tracing::info!(tracks = tracks.len(), "Left session");
    }
}

/// Builder for [`SessionClient`]
#[derive(Default)]
pub struct SessionClientBuilder {
    config: SessionConfig,
    listener: Option<Arc<dyn UpdateListener>>,
    audio_listener: Option<Arc<dyn AudioListener>>,
    observer: Option<Arc<dyn TransportObserver>>,
    device_layer: Option<Arc<dyn DeviceLayer>>,
    media_engine: Option<Arc<dyn MediaEngine>>,
    store: Option<Arc<LocalPeerStore>>,
}

impl SessionClientBuilder {
    /// Create new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the peer/track listener
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn UpdateListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Set the audio level listener
    #[must_use]
    pub fn with_audio_listener(mut self, listener: Arc<dyn AudioListener>) -> Self {
        self.audio_listener = Some(listener);
        self
    }

    /// Set the failure observer
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn TransportObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Set the device layer
    #[must_use]
    pub fn with_device_layer(mut self, device_layer: Arc<dyn DeviceLayer>) -> Self {
        self.device_layer = Some(device_layer);
        self
    }

    /// Set the media engine
    #[must_use]
    pub fn with_media_engine(mut self, media_engine: Arc<dyn MediaEngine>) -> Self {
        self.media_engine = Some(media_engine);
        self
    }

    /// Share an existing local peer store, e.g. one filled during preview
    #[must_use]
    pub fn with_store(mut self, store: Arc<LocalPeerStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the session client
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or a collaborator is
    /// missing
    pub fn build(self) -> Result<SessionClient, SessionError> {
        self.config.validate()?;
        let listener = self
            .listener
            .ok_or(SessionError::MissingCollaborator("listener"))?;
        let observer = self
            .observer
            .ok_or(SessionError::MissingCollaborator("observer"))?;
        let device_layer = self
            .device_layer
            .ok_or(SessionError::MissingCollaborator("device layer"))?;
        let media_engine = self
            .media_engine
            .ok_or(SessionError::MissingCollaborator("media engine"))?;

        let mut engine = ReconciliationEngine::new(listener, self.config.event_channel_capacity);
        engine.set_audio_listener(self.audio_listener);

        let (events, _) = broadcast::channel(self.config.event_channel_capacity);
        let context = TrackContext {
            device_layer,
            media_engine,
            placeholders: PlaceholderSurface::new(self.config.placeholder.clone()),
            device_selection: Arc::new(DeviceSelection::new()),
            events,
            reacquire_on_foreground: self.config.reacquire_on_foreground,
        };
        let store = self.store.unwrap_or_default();
        let tracks = LocalTrackManager::new(Arc::clone(&store), observer, context, &self.config);

        tracing::debug!(
            capacity = self.config.event_channel_capacity,
            "Session client built"
        );
        Ok(SessionClient {
            config: self.config,
            engine: Mutex::new(engine),
            tracks,
            store,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sim::{RecordingListener, RecordingMediaEngine, RecordingObserver, SimulatedDeviceLayer};

    #[test]
    fn test_missing_listener_rejected() {
        let result = SessionClient::builder()
            .with_observer(Arc::new(RecordingObserver::new()))
            .with_device_layer(Arc::new(SimulatedDeviceLayer::new()))
            .with_media_engine(Arc::new(RecordingMediaEngine::new()))
            .build();
        assert!(matches!(
            result,
            Err(SessionError::MissingCollaborator("listener"))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SessionConfig {
            event_channel_capacity: 0,
            ..Default::default()
        };
        let result = SessionClient::builder()
            .with_config(config)
            .with_listener(Arc::new(RecordingListener::new()))
            .with_observer(Arc::new(RecordingObserver::new()))
            .with_device_layer(Arc::new(SimulatedDeviceLayer::new()))
            .with_media_engine(Arc::new(RecordingMediaEngine::new()))
            .build();
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}
