//! Session scripts: recorded transport input replayed against the engine

use anyhow::{Context, Result};
use parley_core::prelude::*;
use serde::Deserialize;
use std::path::Path;

/// One recorded transport input
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Decoded signaling notification
    Notification {
        notification: Notification,
        #[serde(default)]
        reconnecting: bool,
    },
    /// Native track delivered by the transport
    TrackAdd {
        track_id: String,
        stream_id: String,
        kind: MediaKind,
    },
    /// Native track removed by the transport
    TrackRemove {
        track_id: String,
        stream_id: String,
        kind: MediaKind,
    },
}

impl Step {
    /// Feed this step to `session`
    pub fn apply(self, session: &SessionClient) {
        match self {
            Step::Notification {
                notification,
                reconnecting,
            } => {
                tracing::debug!(method = notification.method(), reconnecting, "Replaying notification");
                session.handle_notification(notification, reconnecting);
            }
            Step::TrackAdd {
                track_id,
                stream_id,
                kind,
            } => session.handle_native_track_add(NativeTrack::remote(track_id, stream_id, kind)),
            Step::TrackRemove {
                track_id,
                stream_id,
                kind,
            } => session.handle_native_track_remove(&NativeTrack::remote(track_id, stream_id, kind)),
        }
    }
}

/// Parse a script: a JSON array of steps
///
/// Steps that fail to decode are logged and skipped, mirroring how the
/// transport drops malformed notifications.
pub fn parse(json: &str) -> Result<Vec<Step>> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(json).context("script must be a JSON array of steps")?;
    let mut steps = Vec::with_capacity(raw.len());
    for (index, value) in raw.into_iter().enumerate() {
        match serde_json::from_value::<Step>(value) {
            Ok(step) => steps.push(step),
            Err(e) => tracing::warn!(index, error = %e, "Skipping undecodable step"),
        }
    }
    Ok(steps)
}

/// Read and parse a script file
pub fn load(path: &Path) -> Result<Vec<Step>> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script {}", path.display()))?;
    parse(&json)
}
