//! Simulated collaborators
//!
//! In-process stand-ins for the device layer, media engine, listeners and
//! failure observer. They record what they were asked to do, which makes them
//! useful for tests and for scripted CLI runs.

use crate::device::{
    DeviceError, DeviceInfo, DeviceKind, DeviceLayer, DevicePermissions, MediaEngine,
    MediaEngineError, MediaStreamConstraints, MediaTrackSettings,
};
use crate::fallback::AcquisitionFailureKind;
use crate::listener::{
    AudioListener, ListenerEvent, PeerUpdate, TrackUpdate, TransportObserver, UpdateListener,
};
use crate::notification::{Message, Speaker};
use crate::peer::Peer;
use crate::plugin::{PluginError, TrackPlugin};
use crate::track::{NativeTrack, RemoteTrack, TrackError};
use crate::types::MediaKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const BUILTIN_MICROPHONE: &str = "builtin-microphone";
const BUILTIN_CAMERA: &str = "builtin-camera";

/// Device layer backed by two built-in devices
///
/// Kinds can be made to fail; failing a kind also revokes its permission so
/// the pipeline classifies the failure to that kind. Like a real capture
/// device, each kind is exclusive: the layer counts acquisitions made while
/// the last track it handed out for that kind was still running.
pub struct SimulatedDeviceLayer {
    failing: Mutex<HashSet<MediaKind>>,
    permissions: Mutex<DevicePermissions>,
    unclassified: AtomicBool,
    calls: AtomicUsize,
    issued: AtomicUsize,
    holders: Mutex<HashMap<MediaKind, NativeTrack>>,
    contended: AtomicUsize,
}

impl Default for SimulatedDeviceLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDeviceLayer {
    /// All devices available, all permissions granted
    #[must_use]
    pub fn new() -> Self {
        Self {
            failing: Mutex::new(HashSet::new()),
            permissions: Mutex::new(DevicePermissions::default()),
            unclassified: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            issued: AtomicUsize::new(0),
            holders: Mutex::new(HashMap::new()),
            contended: AtomicUsize::new(0),
        }
    }

    /// Make acquisition fail whenever `kind` is requested
    #[must_use]
    pub fn with_failing(self, kind: MediaKind) -> Self {
        self.set_failing(kind, true);
        self
    }

    /// Fail every acquisition with an error that names no media kind
    #[must_use]
    pub fn with_unclassified_failure(self) -> Self {
        self.unclassified.store(true, Ordering::Release);
        self
    }

    /// Toggle failure for `kind`, revoking or restoring its permission
    pub fn set_failing(&self, kind: MediaKind, failing: bool) {
        let mut permissions = self.permissions.lock();
        match kind {
            MediaKind::Audio => permissions.microphone = !failing,
            MediaKind::Video => permissions.webcam = !failing,
        }
        let mut set = self.failing.lock();
        if failing {
            set.insert(kind);
        } else {
            set.remove(&kind);
        }
    }

    /// Override the reported permission state
    pub fn set_permissions(&self, permissions: DevicePermissions) {
        *self.permissions.lock() = permissions;
    }

    /// Number of `get_user_media` calls so far
    #[must_use]
    pub fn acquisition_calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    /// Treat `track` as holding its kind's device, as if this layer issued it
    pub fn hold(&self, track: &NativeTrack) {
        self.holders.lock().insert(track.kind(), track.clone());
    }

    /// Acquisitions that requested a kind whose device was still held
    #[must_use]
    pub fn contended_acquisitions(&self) -> usize {
        self.contended.load(Ordering::Acquire)
    }

    fn device_settings(constraints: &MediaStreamConstraints, kind: MediaKind) -> MediaTrackSettings {
        let (requested, fallback) = match kind {
            MediaKind::Audio => (
                constraints.audio.as_ref().and_then(|a| a.device_id.clone()),
                BUILTIN_MICROPHONE,
            ),
            MediaKind::Video => (
                constraints.video.as_ref().and_then(|v| v.device_id.clone()),
                BUILTIN_CAMERA,
            ),
        };
        let device_id = requested
            .filter(|id| id != "default")
            .unwrap_or_else(|| fallback.to_string());
        let video = constraints.video.as_ref().filter(|_| kind == MediaKind::Video);
        MediaTrackSettings {
            device_id: Some(device_id),
            group_id: Some("builtin".to_string()),
            width: video.and_then(|v| v.width),
            height: video.and_then(|v| v.height),
            frame_rate: video.and_then(|v| v.frame_rate),
        }
    }
}

#[async_trait]
impl DeviceLayer for SimulatedDeviceLayer {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(vec![
            DeviceInfo {
                device_id: BUILTIN_MICROPHONE.to_string(),
                group_id: Some("builtin".to_string()),
                kind: DeviceKind::AudioInput,
                label: "Built-in Microphone".to_string(),
            },
            DeviceInfo {
                device_id: BUILTIN_CAMERA.to_string(),
                group_id: Some("builtin".to_string()),
                kind: DeviceKind::VideoInput,
                label: "Built-in Camera".to_string(),
            },
        ])
    }

    async fn get_user_media(
        &self,
        constraints: &MediaStreamConstraints,
    ) -> Result<Vec<NativeTrack>, DeviceError> {
        let call = self.calls.fetch_add(1, Ordering::AcqRel) + 1;
        let contended = {
            let holders = self.holders.lock();
            [MediaKind::Audio, MediaKind::Video].into_iter().any(|kind| {
                constraints.requests(kind) && holders.get(&kind).is_some_and(|t| !t.is_ended())
            })
        };
        if contended {
            tracing::debug!(call, "Device acquired while a previous track still holds it");
            self.contended.fetch_add(1, Ordering::AcqRel);
        }
        if self.unclassified.load(Ordering::Acquire) {
            return Err(DeviceError::Other("capture pipeline crashed".to_string()));
        }
        {
            let failing = self.failing.lock();
            for kind in [MediaKind::Audio, MediaKind::Video] {
                if constraints.requests(kind) && failing.contains(&kind) {
                    return Err(DeviceError::PermissionDenied(format!("{kind} access denied")));
                }
            }
        }

        let stream_id = format!("sim-stream-{call}");
        let mut tracks = Vec::new();
        for kind in [MediaKind::Audio, MediaKind::Video] {
            if constraints.requests(kind) {
                let n = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
                let track = NativeTrack::device(
                    format!("sim-{kind}-{n}"),
                    stream_id.clone(),
                    kind,
                    Self::device_settings(constraints, kind),
                );
                self.hold(&track);
                tracks.push(track);
            }
        }
        Ok(tracks)
    }

    async fn permissions(&self) -> DevicePermissions {
        *self.permissions.lock()
    }
}

/// A call made to [`RecordingMediaEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEngineCall {
    /// `replace_sender_track`
    ReplaceSender {
        /// Previous native id
        previous: String,
        /// Next native id
        next: String,
    },
    /// `replace_stream_track`
    ReplaceStream {
        /// Stream id
        stream_id: String,
        /// Previous native id
        previous: String,
        /// Next native id
        next: String,
    },
    /// `set_max_bitrate`
    SetMaxBitrate {
        /// Native id
        track: String,
        /// New bitrate
        kbps: u32,
    },
}

/// Media engine that records every call
#[derive(Debug, Default)]
pub struct RecordingMediaEngine {
    calls: Mutex<Vec<MediaEngineCall>>,
    reject_replace: AtomicBool,
    reject_bitrate: AtomicBool,
}

impl RecordingMediaEngine {
    /// Engine accepting every call
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sender replacement fail
    pub fn set_reject_replace(&self, reject: bool) {
        self.reject_replace.store(reject, Ordering::Release);
    }

    /// Make bitrate changes fail
    pub fn set_reject_bitrate(&self, reject: bool) {
        self.reject_bitrate.store(reject, Ordering::Release);
    }

    /// Calls so far
    #[must_use]
    pub fn calls(&self) -> Vec<MediaEngineCall> {
        self.calls.lock().clone()
    }

    /// Sender replacements so far
    #[must_use]
    pub fn sender_replacements(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MediaEngineCall::ReplaceSender { previous, next } => {
                    Some((previous.clone(), next.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MediaEngine for RecordingMediaEngine {
    async fn replace_sender_track(
        &self,
        previous: &NativeTrack,
        next: &NativeTrack,
    ) -> Result<(), MediaEngineError> {
        if self.reject_replace.load(Ordering::Acquire) {
            return Err(MediaEngineError::ReplaceFailed(previous.id().to_string()));
        }
        self.calls.lock().push(MediaEngineCall::ReplaceSender {
            previous: previous.id().to_string(),
            next: next.id().to_string(),
        });
        Ok(())
    }

    async fn replace_stream_track(
        &self,
        stream_id: &str,
        previous: &NativeTrack,
        next: &NativeTrack,
    ) -> Result<(), MediaEngineError> {
        self.calls.lock().push(MediaEngineCall::ReplaceStream {
            stream_id: stream_id.to_string(),
            previous: previous.id().to_string(),
            next: next.id().to_string(),
        });
        Ok(())
    }

    async fn set_max_bitrate(
        &self,
        track: &NativeTrack,
        max_bitrate_kbps: u32,
    ) -> Result<(), MediaEngineError> {
        if self.reject_bitrate.load(Ordering::Acquire) {
            return Err(MediaEngineError::EncodingRejected(track.id().to_string()));
        }
        self.calls.lock().push(MediaEngineCall::SetMaxBitrate {
            track: track.id().to_string(),
            kbps: max_bitrate_kbps,
        });
        Ok(())
    }
}

/// Listener that snapshots every callback
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
}

impl RecordingListener {
    /// Empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events so far
    #[must_use]
    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().clone()
    }

    /// Drain recorded events
    pub fn take(&self) -> Vec<ListenerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Track update kinds in order
    #[must_use]
    pub fn track_updates(&self) -> Vec<TrackUpdate> {
        self.events
            .lock()
            .iter()
            .filter_map(ListenerEvent::track_update)
            .collect()
    }

    /// Peer update kinds in order
    #[must_use]
    pub fn peer_updates(&self) -> Vec<PeerUpdate> {
        self.events
            .lock()
            .iter()
            .filter_map(ListenerEvent::peer_update)
            .collect()
    }
}

impl UpdateListener for RecordingListener {
    fn on_peer_update(&self, update: PeerUpdate, peer: Option<&Peer>) {
        self.events.lock().push(ListenerEvent::peer(update, peer));
    }

    fn on_track_update(&self, update: TrackUpdate, track: &RemoteTrack, peer: &Peer) {
        self.events
            .lock()
            .push(ListenerEvent::track(update, track, peer));
    }

    fn on_message_received(&self, message: &Message) {
        self.events.lock().push(ListenerEvent::message(message));
    }
}

impl AudioListener for RecordingListener {
    fn on_audio_level_update(&self, speakers: &[Speaker]) {
        self.events.lock().push(ListenerEvent::AudioLevel {
            speakers: speakers.to_vec(),
        });
    }
}

/// Observer that records every reported failure
#[derive(Debug, Default)]
pub struct RecordingObserver {
    failures: Mutex<Vec<TrackError>>,
}

impl RecordingObserver {
    /// Empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures so far
    #[must_use]
    pub fn failures(&self) -> Vec<TrackError> {
        self.failures.lock().clone()
    }

    /// Classification of each failure, `None` for unclassified ones
    #[must_use]
    pub fn failure_kinds(&self) -> Vec<Option<AcquisitionFailureKind>> {
        self.failures
            .lock()
            .iter()
            .map(TrackError::failure_kind)
            .collect()
    }
}

impl TransportObserver for RecordingObserver {
    fn on_failure(&self, error: &TrackError) {
        self.failures.lock().push(error.clone());
    }
}

/// Plugin whose processed track id is the input id tagged with its name
#[derive(Debug)]
pub struct TaggingPlugin {
    name: String,
    kind: MediaKind,
    failing: AtomicBool,
    stopped: AtomicBool,
}

impl TaggingPlugin {
    /// Plugin called `name` for `kind` tracks
    pub fn new(name: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            name: name.into(),
            kind,
            failing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Make `process` fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Whether `stop` was called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TrackPlugin for TaggingPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn process(&self, input: &NativeTrack) -> Result<NativeTrack, PluginError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(PluginError::ProcessingFailed {
                name: self.name.clone(),
                message: "simulated failure".to_string(),
            });
        }
        Ok(NativeTrack::processed(
            format!("{}+{}", input.id(), self.name),
            input,
        ))
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}
