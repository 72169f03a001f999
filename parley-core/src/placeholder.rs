//! Placeholder tracks for degraded or muted publishing
//!
//! A blank video placeholder draws on a shared [`BlankCanvas`] whose single
//! top-left pixel toggles between two almost-black colors at a low frame rate,
//! so the transport's encoder keeps producing frames without real content. A
//! silent audio placeholder stands for a zero-amplitude oscillator routed into
//! a stream destination. Both are created disabled.
//!
//! The canvas is owned by a [`PlaceholderSurface`]: created lazily with the
//! first blank video track and disposed once the last one has ended.

use crate::config::PlaceholderConfig;
use crate::device::MediaTrackSettings;
use crate::track::NativeTrack;
use crate::types::MediaKind;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Flavour of a placeholder track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderKind {
    /// Zero-amplitude oscillator
    SilentAudio,
    /// Blank canvas capture
    BlankVideo,
}

impl PlaceholderKind {
    /// Media kind produced by the placeholder
    #[must_use]
    pub fn media_kind(self) -> MediaKind {
        match self {
            Self::SilentAudio => MediaKind::Audio,
            Self::BlankVideo => MediaKind::Video,
        }
    }
}

/// Drawing surface shared by all blank video placeholders
#[derive(Debug)]
pub struct BlankCanvas {
    width: u32,
    height: u32,
    red: AtomicU8,
    frames: AtomicU64,
}

impl BlankCanvas {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            red: AtomicU8::new(0),
            frames: AtomicU64::new(0),
        }
    }

    /// Canvas width
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Canvas height
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Current RGB value of the toggled pixel
    #[must_use]
    pub fn pixel(&self) -> [u8; 3] {
        [self.red.load(Ordering::Acquire), 0, 0]
    }

    /// Frames drawn so far
    #[must_use]
    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    fn render_frame(&self) {
        self.red.fetch_xor(1, Ordering::AcqRel);
        self.frames.fetch_add(1, Ordering::AcqRel);
    }
}

struct CanvasState {
    canvas: Arc<BlankCanvas>,
    tracks: Vec<NativeTrack>,
    pump: Option<JoinHandle<()>>,
}

/// Owner of placeholder resources for one acquisition pipeline
pub struct PlaceholderSurface {
    config: PlaceholderConfig,
    state: Mutex<Option<CanvasState>>,
}

impl PlaceholderSurface {
    /// Create a surface; the canvas itself is created on first use
    #[must_use]
    pub fn new(config: PlaceholderConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(None),
        })
    }

    /// Create a disabled blank video track
    ///
    /// The canvas takes its dimensions from `previous` (the track being
    /// replaced) when it is first created, falling back to the configured size.
    pub fn blank_video_track(
        self: &Arc<Self>,
        stream_id: &str,
        previous: Option<&MediaTrackSettings>,
    ) -> NativeTrack {
        let mut state = self.state.lock();
        let canvas_state = state.get_or_insert_with(|| {
            let width = previous
                .and_then(|s| s.width)
                .unwrap_or(self.config.width);
            let height = previous
                .and_then(|s| s.height)
                .unwrap_or(self.config.height);
            tracing::debug!(width, height, "Creating placeholder canvas");
            CanvasState {
                canvas: Arc::new(BlankCanvas::new(width, height)),
                tracks: Vec::new(),
                pump: None,
            }
        });

        let settings = MediaTrackSettings {
            device_id: None,
            group_id: None,
            width: Some(canvas_state.canvas.width()),
            height: Some(canvas_state.canvas.height()),
            frame_rate: Some(self.config.frame_rate),
        };
        let track = NativeTrack::placeholder(
            Uuid::new_v4().to_string(),
            stream_id.to_string(),
            PlaceholderKind::BlankVideo,
            settings,
        );
        canvas_state.tracks.push(track.clone());
        if canvas_state.pump.is_none() {
            canvas_state.pump = self.spawn_pump();
        }
        track
    }

    /// Create a disabled silent audio track
    pub fn silent_audio_track(&self, stream_id: &str) -> NativeTrack {
        NativeTrack::placeholder(
            Uuid::new_v4().to_string(),
            stream_id.to_string(),
            PlaceholderKind::SilentAudio,
            MediaTrackSettings::default(),
        )
    }

    /// The canvas, while any blank video track is alive
    #[must_use]
    pub fn canvas(&self) -> Option<Arc<BlankCanvas>> {
        self.state.lock().as_ref().map(|s| Arc::clone(&s.canvas))
    }

    /// Whether the canvas currently exists
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.lock().is_some()
    }

    /// Drop ended placeholder tracks, disposing the canvas after the last one
    pub fn release_ended(&self) {
        let mut state = self.state.lock();
        let empty = match state.as_mut() {
            Some(canvas_state) => {
                canvas_state.tracks.retain(|t| !t.is_ended());
                canvas_state.tracks.is_empty()
            }
            None => false,
        };
        if empty {
            if let Some(pump) = state.take().and_then(|s| s.pump) {
                pump.abort();
            }
            tracing::debug!("Placeholder canvas disposed");
        }
    }

    /// Stop every blank video track and dispose the canvas
    pub fn dispose(&self) {
        if let Some(canvas_state) = self.state.lock().take() {
            for track in &canvas_state.tracks {
                track.stop();
            }
            if let Some(pump) = canvas_state.pump {
                pump.abort();
            }
            tracing::debug!("Placeholder surface disposed");
        }
    }

    fn spawn_pump(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; placeholder canvas will not animate");
            return None;
        };
        let surface: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_millis(1000 / u64::from(self.config.frame_rate.max(1)));
        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(surface) = surface.upgrade() else {
                    break;
                };
                if !surface.render_tick() {
                    break;
                }
            }
        }))
    }

    /// Draw one frame; returns `false` once the canvas has been disposed
    fn render_tick(&self) -> bool {
        let mut state = self.state.lock();
        let Some(canvas_state) = state.as_mut() else {
            return false;
        };
        canvas_state.tracks.retain(|t| !t.is_ended());
        if canvas_state.tracks.is_empty() {
            // The pump is the running task; dropping its handle detaches it.
            *state = None;
            tracing::debug!("Placeholder canvas disposed");
            return false;
        }
        canvas_state.canvas.render_frame();
        true
    }
}
