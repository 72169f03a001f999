//! Listener and observer that print engine output as JSON lines

use parley_core::listener::{
    AudioListener, ListenerEvent, PeerUpdate, TrackUpdate, TransportObserver, UpdateListener,
};
use parley_core::notification::{Message, Speaker};
use parley_core::peer::Peer;
use parley_core::track::{RemoteTrack, TrackError};

/// Prints every callback to stdout, one JSON object per line
#[derive(Debug, Default)]
pub struct JsonLinePrinter;

impl JsonLinePrinter {
    fn print(&self, event: &ListenerEvent) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!(error = %e, "Failed to encode listener event"),
        }
    }
}

impl UpdateListener for JsonLinePrinter {
    fn on_peer_update(&self, update: PeerUpdate, peer: Option<&Peer>) {
        self.print(&ListenerEvent::peer(update, peer));
    }

    fn on_track_update(&self, update: TrackUpdate, track: &RemoteTrack, peer: &Peer) {
        self.print(&ListenerEvent::track(update, track, peer));
    }

    fn on_message_received(&self, message: &Message) {
        self.print(&ListenerEvent::message(message));
    }
}

impl AudioListener for JsonLinePrinter {
    fn on_audio_level_update(&self, speakers: &[Speaker]) {
        self.print(&ListenerEvent::AudioLevel {
            speakers: speakers.to_vec(),
        });
    }
}

impl TransportObserver for JsonLinePrinter {
    fn on_failure(&self, error: &TrackError) {
        let kind = error
            .failure_kind()
            .map_or_else(|| "GENERIC".to_string(), |k| k.to_string());
        println!("⚠️  Local media failure ({kind}): {error}");
    }
}
