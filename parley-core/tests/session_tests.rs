//! Session lifecycle: building, publishing, routing notifications and leaving.

use parley_core::config::{InitialSettings, SessionConfig};
use parley_core::listener::{EngineEvent, PeerUpdate, TrackUpdate, UpdateListener};
use parley_core::local_track::{LocalTrackEvent, LocalTrackState};
use parley_core::notification::{
    Message, Notification, PeerNotification, RoleChangeRequest, TrackInfo,
};
use parley_core::peer::Peer;
use parley_core::session::{SessionClient, SessionError};
use parley_core::sim::{RecordingListener, RecordingMediaEngine, RecordingObserver, SimulatedDeviceLayer};
use parley_core::store::PublishParams;
use parley_core::track::{NativeTrack, RemoteTrack};
use parley_core::types::{MediaKind, PeerId};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio::sync::mpsc;

struct Fixture {
    session: SessionClient,
    listener: Arc<RecordingListener>,
    devices: Arc<SimulatedDeviceLayer>,
    engine: Arc<RecordingMediaEngine>,
}

fn fixture(config: SessionConfig) -> Fixture {
    let listener = Arc::new(RecordingListener::new());
    let devices = Arc::new(SimulatedDeviceLayer::new());
    let engine = Arc::new(RecordingMediaEngine::new());
    let session = SessionClient::builder()
        .with_config(config)
        .with_listener(listener.clone())
        .with_audio_listener(listener.clone())
        .with_observer(Arc::new(RecordingObserver::new()))
        .with_device_layer(devices.clone())
        .with_media_engine(engine.clone())
        .build()
        .unwrap();
    session
        .store()
        .set_publish_params(Some(PublishParams::default()));
    Fixture {
        session,
        listener,
        devices,
        engine,
    }
}

#[test]
fn missing_device_layer_is_reported() {
    let result = SessionClient::builder()
        .with_listener(Arc::new(RecordingListener::new()))
        .with_observer(Arc::new(RecordingObserver::new()))
        .with_media_engine(Arc::new(RecordingMediaEngine::new()))
        .build();
    assert!(matches!(
        result,
        Err(SessionError::MissingCollaborator("device layer"))
    ));
}

#[tokio::test]
async fn publish_then_mark_published() {
    let f = fixture(SessionConfig::default());
    let tracks = f
        .session
        .tracks_to_publish(&InitialSettings::default())
        .await
        .unwrap();
    assert_eq!(tracks.len(), 2);

    for (n, track) in tracks.iter().enumerate() {
        f.session.mark_published(track, &format!("server-{n}")).await;
        assert!(f.session.store().is_published(track.id()));
    }
    let again = f
        .session
        .tracks_to_publish(&InitialSettings::default())
        .await
        .unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn notifications_reach_the_listener() {
    let f = fixture(SessionConfig::default());
    let mut events = f.session.subscribe_engine_events();

    f.session.handle_notification(
        Notification::PeerJoin(
            PeerNotification::new("p1", "Alice").with_track(TrackInfo::new("s1", MediaKind::Audio)),
        ),
        false,
    );
    f.session
        .handle_native_track_add(NativeTrack::remote("t1", "s1", MediaKind::Audio));

    assert_eq!(f.listener.peer_updates(), vec![PeerUpdate::PeerJoined]);
    assert_eq!(f.listener.track_updates(), vec![TrackUpdate::TrackAdded]);
    let peer_id = PeerId::from("p1");
    assert!(f.session.with_engine(|e| e.find_peer(&peer_id).is_some()));
    assert!(matches!(
        events.try_recv(),
        Ok(EngineEvent::AudioTrackAdded { .. })
    ));

    f.session.handle_notification(
        Notification::RoleChange(RoleChangeRequest {
            requested_by: Some(peer_id),
            role: "viewer".to_string(),
            force: true,
        }),
        false,
    );
    assert!(matches!(
        events.try_recv(),
        Ok(EngineEvent::RoleChange(request)) if request.role == "viewer"
    ));
}

#[tokio::test]
async fn leave_releases_everything() {
    let f = fixture(SessionConfig::default());
    let mut local_events = f.session.subscribe_local_track_events();
    let initial = InitialSettings {
        is_video_muted: true,
        ..Default::default()
    };
    let tracks = f.session.tracks_to_publish(&initial).await.unwrap();
    assert!(f.session.track_manager().context().placeholders.is_active());
    f.session.handle_notification(
        Notification::PeerJoin(PeerNotification::new("p1", "Alice")),
        false,
    );

    f.session.leave().await;

    for track in &tracks {
        assert_eq!(track.state().await, LocalTrackState::Stopped);
        assert!(track.native().await.is_ended());
    }
    assert!(f.session.store().local_tracks().is_empty());
    assert_eq!(f.session.with_engine(|e| e.remote_peers().count()), 0);
    assert!(!f.session.track_manager().context().placeholders.is_active());

    let mut stopped = 0;
    while let Ok(event) = local_events.try_recv() {
        if let LocalTrackEvent::StateChanged {
            state: LocalTrackState::Stopped,
            ..
        } = event
        {
            stopped += 1;
        }
    }
    assert_eq!(stopped, 2);
}

#[tokio::test]
async fn visibility_change_reacquires_when_enabled() {
    let f = fixture(SessionConfig {
        reacquire_on_foreground: true,
        ..Default::default()
    });
    let tracks = f
        .session
        .tracks_to_publish(&InitialSettings::default())
        .await
        .unwrap();
    assert_eq!(f.devices.acquisition_calls(), 1);

    f.session.handle_visibility_change(false).await.unwrap();
    assert_eq!(f.devices.acquisition_calls(), 1);
    f.session.handle_visibility_change(true).await.unwrap();
    assert_eq!(f.devices.acquisition_calls(), 1 + tracks.len());
    // Nothing was published, so senders are untouched
    assert!(f.engine.sender_replacements().is_empty());
}

/// Queues joined peers so they can be evicted once dispatch returns
struct EvictingListener {
    joined: mpsc::UnboundedSender<PeerId>,
}

impl UpdateListener for EvictingListener {
    fn on_peer_update(&self, update: PeerUpdate, peer: Option<&Peer>) {
        if let (PeerUpdate::PeerJoined, Some(peer)) = (update, peer) {
            let _ = self.joined.send(peer.peer_id.clone());
        }
    }

    fn on_track_update(&self, _update: TrackUpdate, _track: &RemoteTrack, _peer: &Peer) {}

    fn on_message_received(&self, _message: &Message) {}
}

#[test]
fn listener_follow_up_runs_after_dispatch() {
    let (joined, mut queue) = mpsc::unbounded_channel();
    let session = SessionClient::builder()
        .with_listener(Arc::new(EvictingListener { joined }))
        .with_observer(Arc::new(RecordingObserver::new()))
        .with_device_layer(Arc::new(SimulatedDeviceLayer::new()))
        .with_media_engine(Arc::new(RecordingMediaEngine::new()))
        .build()
        .unwrap();

    session.handle_notification(
        Notification::PeerJoin(PeerNotification::new("p1", "Alice")),
        false,
    );
    while let Ok(peer_id) = queue.try_recv() {
        let name = session.with_engine(|e| e.find_peer(&peer_id).map(|p| p.name.clone()));
        assert_eq!(name.as_deref(), Some("Alice"));
        session.handle_notification(
            Notification::PeerLeave(PeerNotification::new(peer_id.clone(), "Alice")),
            false,
        );
    }

    let peer_id = PeerId::from("p1");
    assert!(session.with_engine(|e| e.find_peer(&peer_id).is_none()));
}
