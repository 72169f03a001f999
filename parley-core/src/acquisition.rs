//! Local track acquisition pipeline
//!
//! Turns the caller's join intents and the role's publish params into the list
//! of local tracks to hand to the transport. Device failures are degraded to
//! placeholder tracks following [`crate::fallback`]: one degraded retry, then
//! everything requested becomes a placeholder.

use crate::config::{InitialSettings, SessionConfig};
use crate::device::MediaStreamConstraints;
use crate::fallback::{self, FallbackDecision, FetchMode, FetchOptions};
use crate::listener::TransportObserver;
use crate::local_track::{LocalAudioTrack, LocalMediaTrack, LocalVideoTrack, TrackContext};
use crate::settings::{
    AudioTrackSettings, KindSettings, TrackSettings, VideoTrackSettings,
};
use crate::store::{LocalPeerStore, PublishParams};
use crate::track::{NativeTrack, TrackError};
use crate::types::{MediaKind, TrackSource};
use std::sync::Arc;
use uuid::Uuid;

/// Acquires and tracks the local peer's regular audio/video tracks
pub struct LocalTrackManager {
    store: Arc<LocalPeerStore>,
    observer: Arc<dyn TransportObserver>,
    context: TrackContext,
    default_audio_input_device_id: String,
    default_video_device_id: String,
}

impl LocalTrackManager {
    /// Create a manager
    pub fn new(
        store: Arc<LocalPeerStore>,
        observer: Arc<dyn TransportObserver>,
        context: TrackContext,
        config: &SessionConfig,
    ) -> Self {
        Self {
            store,
            observer,
            context,
            default_audio_input_device_id: config.default_audio_input_device_id.clone(),
            default_video_device_id: config.default_video_device_id.clone(),
        }
    }

    /// Shared track collaborators
    #[must_use]
    pub fn context(&self) -> &TrackContext {
        &self.context
    }

    /// Settings for the kinds `params` allows, `None` if it allows neither
    ///
    /// Simulcast layer dimensions for the regular source, when known, take
    /// precedence over the role's video width and height.
    ///
    /// # Errors
    ///
    /// Returns error if the server-supplied values fail settings validation
    pub fn build_track_settings(
        &self,
        initial: &InitialSettings,
        params: &PublishParams,
    ) -> Result<Option<TrackSettings>, TrackError> {
        let can_audio = params.can_publish(MediaKind::Audio);
        let can_video = params.can_publish(MediaKind::Video);
        if !can_audio && !can_video {
            return Ok(None);
        }

        let audio = if can_audio {
            Some(
                AudioTrackSettings::builder()
                    .codec(params.audio.codec)
                    .max_bitrate(Some(params.audio.bit_rate))
                    .device_id(
                        initial
                            .audio_input_device_id
                            .clone()
                            .unwrap_or_else(|| self.default_audio_input_device_id.clone()),
                    )
                    .build()?,
            )
        } else {
            None
        };

        let video = if can_video {
            let dimensions = self.store.simulcast_dimensions(&TrackSource::Regular);
            Some(
                VideoTrackSettings::builder()
                    .codec(params.video.codec)
                    .max_bitrate(Some(params.video.bit_rate))
                    .max_framerate(params.video.frame_rate)
                    .width(dimensions.map_or(params.video.width, |d| d.width))
                    .height(dimensions.map_or(params.video.height, |d| d.height))
                    .device_id(
                        initial
                            .video_device_id
                            .clone()
                            .unwrap_or_else(|| self.default_video_device_id.clone()),
                    )
                    .build()?,
            )
        } else {
            None
        };

        let simulcast = params.simulcast && video.is_some();
        TrackSettings::builder()
            .audio(audio)
            .video(video)
            .simulcast(simulcast)
            .build()
            .map(Some)
    }

    /// Local tracks that still need publishing for the current role
    ///
    /// Existing regular tracks (from a preview) are reused with updated
    /// settings instead of being reacquired. Classified device failures
    /// degrade to placeholders and are reported to the observer; when the
    /// degraded retry fails too, the exhaustion is reported again as a
    /// generic failure. The session can still proceed muted.
    ///
    /// # Errors
    ///
    /// Returns error for invalid publish params, for failures updating a
    /// reused track, and for device failures that cannot be attributed to a
    /// media kind
    #[tracing::instrument(skip(self))]
    pub async fn get_tracks_to_publish(
        &self,
        initial: &InitialSettings,
    ) -> Result<Vec<LocalMediaTrack>, TrackError> {
        let Some(params) = self.store.publish_params() else {
            tracing::debug!("No publish params, nothing to publish");
            return Ok(Vec::new());
        };
        let can_audio = params.can_publish(MediaKind::Audio);
        let can_video = params.can_publish(MediaKind::Video);
        let Some(settings) = self.build_track_settings(initial, &params)? else {
            return Ok(Vec::new());
        };

        let audio_track = self.store.regular_audio_track();
        let video_track = self.store.regular_video_track();
        let audio_published = audio_track
            .as_ref()
            .is_some_and(|t| self.store.is_published(t.id()));
        let video_published = video_track
            .as_ref()
            .is_some_and(|t| self.store.is_published(t.id()));

        // A reused track keeps its device unless the caller picked one
        if let (Some(track), Some(video)) = (&video_track, settings.video()) {
            let mut update = video.as_update();
            if initial.video_device_id.is_none() {
                update.device_id = None;
            }
            track.set_settings(update).await?;
        }
        if let (Some(track), Some(audio)) = (&audio_track, settings.audio()) {
            let mut update = audio.as_update();
            if initial.audio_input_device_id.is_none() {
                update.device_id = None;
            }
            track.set_settings(update).await?;
        }

        if audio_published && video_published {
            tracing::debug!("Regular tracks already published");
            return Ok(Vec::new());
        }

        let options = FetchOptions {
            audio: FetchMode::wanted(can_audio && audio_track.is_none(), initial.is_audio_muted),
            video: FetchMode::wanted(can_video && video_track.is_none(), initial.is_video_muted),
        };
        let mut tracks = self.fetch_with_fallback(options, &settings).await?;

        if let Some(track) = video_track {
            if can_video && !video_published {
                tracks.push(LocalMediaTrack::Video(track));
            }
        }
        if let Some(track) = audio_track {
            if can_audio && !audio_published {
                tracks.push(LocalMediaTrack::Audio(track));
            }
        }
        tracing::info!(count = tracks.len(), "Local tracks ready to publish");
        Ok(tracks)
    }

    async fn fetch_with_fallback(
        &self,
        options: FetchOptions,
        settings: &TrackSettings,
    ) -> Result<Vec<LocalMediaTrack>, TrackError> {
        if !options.audio.is_requested() && !options.video.is_requested() {
            return Ok(Vec::new());
        }
        let error = match self.get_local_tracks(options, settings).await {
            Ok(tracks) => return Ok(tracks),
            Err(error) => error,
        };

        let degraded = match fallback::decide(&error, options) {
            FallbackDecision::RetryDegraded(degraded) => degraded,
            FallbackDecision::Propagate => {
                tracing::warn!(%error, "Fetching local tracks failed with an unclassified error");
                let generic = match error {
                    TrackError::Generic(_) => error,
                    other => TrackError::Generic(other.to_string()),
                };
                self.observer.on_failure(&generic);
                return Err(generic);
            }
        };

        self.observer.on_failure(&error);
        tracing::warn!(%error, ?degraded, "Fetching local tracks failed, retrying with placeholders");
        match self.get_local_tracks(degraded, settings).await {
            Ok(tracks) => Ok(tracks),
            Err(retry_error) => {
                let placeholders = fallback::degrade_all(degraded);
                tracing::warn!(error = %retry_error, ?placeholders, "Degraded retry failed, publishing placeholders only");
                let tracks = self.get_local_tracks(placeholders, settings).await?;
                self.observer
                    .on_failure(&TrackError::Generic(retry_error.to_string()));
                Ok(tracks)
            }
        }
    }

    /// Acquire tracks per `options` and wrap them as local tracks
    ///
    /// Device-mode kinds are acquired in one device-layer call; placeholder
    /// kinds are synthesized. A kind is only materialized when `settings`
    /// carries settings for it. New tracks are added to the store.
    ///
    /// # Errors
    ///
    /// Returns the classified device failure
    #[tracing::instrument(skip(self, settings))]
    pub async fn get_local_tracks(
        &self,
        options: FetchOptions,
        settings: &TrackSettings,
    ) -> Result<Vec<LocalMediaTrack>, TrackError> {
        let constraints = MediaStreamConstraints {
            audio: settings
                .audio()
                .filter(|_| options.audio == FetchMode::Device)
                .and_then(|s| s.to_constraints().audio),
            video: settings
                .video()
                .filter(|_| options.video == FetchMode::Device)
                .and_then(|s| s.to_constraints().video),
        };

        let mut natives: Vec<NativeTrack> = Vec::new();
        if !constraints.is_empty() {
            natives = self.get_av_tracks(&constraints).await?;
        }

        let stream_id = natives
            .first()
            .map_or_else(|| Uuid::new_v4().to_string(), |t| t.stream_id().to_string());
        if options.audio == FetchMode::Placeholder {
            natives.push(self.context.placeholders.silent_audio_track(&stream_id));
        }
        if options.video == FetchMode::Placeholder {
            natives.push(self.context.placeholders.blank_video_track(&stream_id, None));
        }

        let mut tracks = Vec::new();
        let mut audio_native = None;
        let mut video_native = None;
        for native in natives {
            let slot = match native.kind() {
                MediaKind::Audio => &mut audio_native,
                MediaKind::Video => &mut video_native,
            };
            if slot.is_none() {
                *slot = Some(native);
            } else {
                native.stop();
            }
        }

        match (audio_native, settings.audio()) {
            (Some(native), Some(audio)) => {
                let track = LocalAudioTrack::new(
                    native,
                    TrackSource::Regular,
                    audio.clone(),
                    self.context.clone(),
                );
                tracks.push(LocalMediaTrack::Audio(track));
            }
            (Some(native), None) => native.stop(),
            _ => {}
        }
        match (video_native, settings.video()) {
            (Some(native), Some(video)) => {
                let track = LocalVideoTrack::new(
                    native,
                    TrackSource::Regular,
                    video.clone(),
                    self.context.clone(),
                );
                tracks.push(LocalMediaTrack::Video(track));
            }
            (Some(native), None) => native.stop(),
            _ => {}
        }
        self.context.placeholders.release_ended();

        for track in &tracks {
            self.store.add_local_track(track.clone());
        }
        Ok(tracks)
    }

    async fn get_av_tracks(
        &self,
        constraints: &MediaStreamConstraints,
    ) -> Result<Vec<NativeTrack>, TrackError> {
        let device_error = match self.context.device_layer.get_user_media(constraints).await {
            Ok(tracks) => {
                tracing::info!(count = tracks.len(), "Acquired device tracks");
                return Ok(tracks);
            }
            Err(error) => error,
        };

        match self.context.device_layer.enumerate_devices().await {
            Ok(devices) => tracing::debug!(devices = devices.len(), "Devices at acquisition failure"),
            Err(error) => tracing::debug!(%error, "Device enumeration failed"),
        }
        let permissions = self.context.device_layer.permissions().await;
        let kind = fallback::classify(
            permissions,
            constraints.requests(MediaKind::Audio),
            constraints.requests(MediaKind::Video),
        );
        tracing::warn!(error = %device_error, %kind, "Device acquisition failed");
        Err(TrackError::from_device(&device_error, kind))
    }
}
