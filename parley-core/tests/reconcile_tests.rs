//! Reconciliation engine behaviour across notification orderings, reconnects
//! and metadata updates.

use parley_core::listener::{EngineEvent, ListenerEvent, PeerUpdate, TrackUpdate};
use parley_core::notification::{
    Message, Notification, PeerListNotification, PeerNotification, Speaker, SpeakerList,
    TrackInfo, TrackStateNotification,
};
use parley_core::peer::Peer;
use parley_core::reconcile::ReconciliationEngine;
use parley_core::sim::RecordingListener;
use parley_core::track::NativeTrack;
use parley_core::types::{CompositeTrackId, MediaKind, PeerId, TrackSource};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

fn engine() -> (ReconciliationEngine, Arc<RecordingListener>) {
    let listener = Arc::new(RecordingListener::new());
    let engine = ReconciliationEngine::new(listener.clone(), 64).with_audio_listener(listener.clone());
    (engine, listener)
}

fn join(peer_id: &str, name: &str, tracks: Vec<TrackInfo>) -> Notification {
    let mut peer = PeerNotification::new(peer_id, name).with_role("guest");
    peer.tracks = tracks;
    Notification::PeerJoin(peer)
}

fn metadata_add(peer_id: &str, info: TrackInfo) -> Notification {
    Notification::TrackMetadataAdd(TrackStateNotification::new(peer_id, vec![info]))
}

fn track_update(peer_id: &str, info: TrackInfo) -> Notification {
    Notification::TrackUpdate(TrackStateNotification::new(peer_id, vec![info]))
}

fn peer_list(peers: Vec<PeerNotification>) -> Notification {
    Notification::PeerList(PeerListNotification { peers })
}

/// Join `peer_id` with one regular audio and one regular video track attached
fn joined_with_av(engine: &mut ReconciliationEngine, peer_id: &str, stream: &str) -> (NativeTrack, NativeTrack) {
    engine.handle_notification(
        join(
            peer_id,
            peer_id,
            vec![
                TrackInfo::new(stream, MediaKind::Audio),
                TrackInfo::new(stream, MediaKind::Video),
            ],
        ),
        false,
    );
    let audio = NativeTrack::remote(format!("{stream}-a"), stream, MediaKind::Audio);
    let video = NativeTrack::remote(format!("{stream}-v"), stream, MediaKind::Video);
    engine.handle_native_track_add(audio.clone());
    engine.handle_native_track_add(video.clone());
    (audio, video)
}

#[derive(Debug, Clone, Copy)]
enum Arrival {
    Join,
    Metadata,
    Native,
}

fn arrival_orders() -> impl Strategy<Value = Vec<Arrival>> {
    Just(vec![Arrival::Join, Arrival::Metadata, Arrival::Native]).prop_shuffle()
}

proptest! {
    #[test]
    fn exactly_one_track_added_for_any_arrival_order(
        order in arrival_orders(),
        mute in any::<bool>(),
        screen in any::<bool>(),
        kind in prop_oneof![Just(MediaKind::Audio), Just(MediaKind::Video)],
    ) {
        let (mut engine, listener) = engine();
        let source = if screen { TrackSource::Screen } else { TrackSource::Regular };
        let info = TrackInfo::new("s1", kind).with_mute(mute).with_source(source.clone());

        for step in &order {
            match step {
                Arrival::Join => engine.handle_notification(join("p1", "Alice", Vec::new()), false),
                Arrival::Metadata => engine.handle_notification(metadata_add("p1", info.clone()), false),
                Arrival::Native => engine.handle_native_track_add(NativeTrack::remote("t1", "s1", kind)),
            }
        }
        // A second flush with no new input must be silent
        prop_assert_eq!(engine.process_pending_tracks(), 0);

        let added: Vec<ListenerEvent> = listener
            .events()
            .into_iter()
            .filter(|e| e.track_update() == Some(TrackUpdate::TrackAdded))
            .collect();
        prop_assert_eq!(added.len(), 1);
        match &added[0] {
            ListenerEvent::Track { source: got, enabled, track_id, .. } => {
                prop_assert_eq!(got, &source);
                prop_assert_eq!(*enabled, !mute);
                prop_assert_eq!(track_id.as_str(), "t1");
            }
            other => prop_assert!(false, "unexpected event {:?}", other),
        }
        prop_assert_eq!(engine.pending_track_count(), 0);
    }
}

#[test]
fn join_emits_joined_then_track_added() {
    let (mut engine, listener) = engine();
    joined_with_av(&mut engine, "p1", "s1");

    assert_eq!(listener.peer_updates(), vec![PeerUpdate::PeerJoined]);
    assert_eq!(
        listener.track_updates(),
        vec![TrackUpdate::TrackAdded, TrackUpdate::TrackAdded]
    );
    let peer = engine.find_peer(&PeerId::new("p1")).unwrap();
    assert_eq!(peer.role, "guest");
    assert_eq!(peer.audio_track().unwrap().track_id(), "s1-a");
    assert_eq!(peer.video_track().unwrap().track_id(), "s1-v");
}

#[test]
fn flush_is_idempotent() {
    let (mut engine, listener) = engine();
    joined_with_av(&mut engine, "p1", "s1");
    let before = listener.events().len();

    assert_eq!(engine.process_pending_tracks(), 0);
    assert_eq!(engine.process_pending_tracks(), 0);
    assert_eq!(listener.events().len(), before);
}

#[test]
fn native_without_metadata_stays_pending() {
    let (mut engine, listener) = engine();
    engine.handle_notification(join("p1", "Alice", Vec::new()), false);
    engine.handle_native_track_add(NativeTrack::remote("t1", "s1", MediaKind::Video));

    assert_eq!(engine.pending_track_count(), 1);
    assert!(listener.track_updates().is_empty());
}

#[test]
fn screen_audio_fills_empty_audio_slot() {
    let (mut engine, _listener) = engine();
    engine.handle_notification(
        join(
            "p1",
            "Alice",
            vec![TrackInfo::new("s1", MediaKind::Audio).with_source(TrackSource::Screen)],
        ),
        false,
    );
    engine.handle_native_track_add(NativeTrack::remote("t1", "s1", MediaKind::Audio));

    let peer = engine.find_peer(&PeerId::new("p1")).unwrap();
    assert_eq!(peer.audio_track().unwrap().track_id(), "t1");
    assert!(peer.auxiliary_tracks().is_empty());
}

#[test]
fn leave_removes_every_track_then_peer() {
    let (mut engine, listener) = engine();
    joined_with_av(&mut engine, "p1", "s1");
    engine.handle_notification(
        metadata_add("p1", TrackInfo::new("screen-1", MediaKind::Video).with_source(TrackSource::Screen)),
        false,
    );
    engine.handle_native_track_add(NativeTrack::remote("scr", "screen-1", MediaKind::Video));
    let mut audio_events = engine.subscribe();
    listener.take();

    engine.handle_notification(
        Notification::PeerLeave(PeerNotification::new("p1", "Alice")),
        false,
    );

    assert_eq!(
        listener.track_updates(),
        vec![
            TrackUpdate::TrackRemoved,
            TrackUpdate::TrackRemoved,
            TrackUpdate::TrackRemoved
        ]
    );
    assert_eq!(listener.peer_updates(), vec![PeerUpdate::PeerLeft]);
    assert!(engine.find_peer(&PeerId::new("p1")).is_none());
    assert!(engine
        .track_state(&CompositeTrackId::new("s1", MediaKind::Audio))
        .is_none());
    assert!(matches!(
        audio_events.try_recv().unwrap(),
        EngineEvent::AudioTrackRemoved { .. }
    ));
}

#[test]
fn initial_peer_list_joins_everyone() {
    let (mut engine, listener) = engine();
    engine.handle_notification(
        peer_list(vec![
            PeerNotification::new("p1", "Alice"),
            PeerNotification::new("p2", "Bob"),
        ]),
        false,
    );
    assert_eq!(
        listener.peer_updates(),
        vec![PeerUpdate::PeerJoined, PeerUpdate::PeerJoined]
    );
    assert_eq!(engine.remote_peers().count(), 2);
}

#[test]
fn duplicate_join_refreshes_without_event() {
    let (mut engine, listener) = engine();
    engine.handle_notification(join("p1", "Alice", Vec::new()), false);
    engine.handle_notification(join("p1", "Alice B.", Vec::new()), false);

    assert_eq!(listener.peer_updates(), vec![PeerUpdate::PeerJoined]);
    assert_eq!(engine.find_peer(&PeerId::new("p1")).unwrap().name, "Alice B.");
}

#[test]
fn join_for_local_peer_is_ignored() {
    let (mut engine, listener) = engine();
    engine.set_local_peer(Peer::new("me", "Me", true));
    engine.handle_notification(join("me", "Me", Vec::new()), false);

    assert!(listener.events().is_empty());
    assert_eq!(engine.remote_peers().count(), 0);
}

#[test]
fn reconnect_diff_emits_left_only_for_missing_peer() {
    let (mut engine, listener) = engine();
    joined_with_av(&mut engine, "p1", "s1");
    joined_with_av(&mut engine, "p2", "s2");
    listener.take();

    let survivor = PeerNotification::new("p1", "p1")
        .with_role("guest")
        .with_track(TrackInfo::new("s1", MediaKind::Audio))
        .with_track(TrackInfo::new("s1", MediaKind::Video));
    engine.handle_notification(peer_list(vec![survivor]), true);

    let events = listener.events();
    let left: Vec<&ListenerEvent> = events
        .iter()
        .filter(|e| e.peer_update() == Some(PeerUpdate::PeerLeft))
        .collect();
    assert_eq!(left.len(), 1);
    assert_eq!(
        left[0],
        &ListenerEvent::Peer {
            update: PeerUpdate::PeerLeft,
            peer_id: Some(PeerId::new("p2")),
        }
    );
    // Everything else concerns p2's tracks
    for event in &events {
        if let ListenerEvent::Track { peer_id, update, .. } = event {
            assert_eq!(peer_id, &PeerId::new("p2"));
            assert_eq!(*update, TrackUpdate::TrackRemoved);
        }
    }
    assert_eq!(events.len(), 3);
}

#[test]
fn reconnect_diff_force_removes_vanished_track() {
    let (mut engine, listener) = engine();
    joined_with_av(&mut engine, "p1", "s1");
    listener.take();

    let without_video = PeerNotification::new("p1", "p1")
        .with_role("guest")
        .with_track(TrackInfo::new("s1", MediaKind::Audio));
    engine.handle_notification(peer_list(vec![without_video]), true);

    let events = listener.events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ListenerEvent::Track { update, kind, .. } => {
            assert_eq!(*update, TrackUpdate::TrackRemoved);
            assert_eq!(*kind, MediaKind::Video);
        }
        other => panic!("unexpected event {other:?}"),
    }
    let peer = engine.find_peer(&PeerId::new("p1")).unwrap();
    assert!(peer.video_track().is_none());
    assert!(peer.audio_track().is_some());
}

#[test]
fn reconnect_registers_new_tracks_and_waits_for_native() {
    let (mut engine, listener) = engine();
    joined_with_av(&mut engine, "p1", "s1");
    listener.take();

    let with_screen = PeerNotification::new("p1", "p1")
        .with_role("guest")
        .with_track(TrackInfo::new("s1", MediaKind::Audio))
        .with_track(TrackInfo::new("s1", MediaKind::Video))
        .with_track(TrackInfo::new("scr", MediaKind::Video).with_source(TrackSource::Screen));
    let newcomer = PeerNotification::new("p3", "Carol").with_track(TrackInfo::new("s3", MediaKind::Audio));
    engine.handle_notification(peer_list(vec![with_screen, newcomer]), true);

    assert_eq!(listener.peer_updates(), vec![PeerUpdate::PeerJoined]);
    assert!(listener.track_updates().is_empty());
    assert!(engine
        .track_state(&CompositeTrackId::new("scr", MediaKind::Video))
        .is_some());

    // The transport re-delivers native tracks after the reconnect
    engine.handle_native_track_add(NativeTrack::remote("scr-v", "scr", MediaKind::Video));
    engine.handle_native_track_add(NativeTrack::remote("s3-a", "s3", MediaKind::Audio));
    assert_eq!(
        listener.track_updates(),
        vec![TrackUpdate::TrackAdded, TrackUpdate::TrackAdded]
    );
    let peer = engine.find_peer(&PeerId::new("p1")).unwrap();
    assert_eq!(peer.auxiliary_tracks().len(), 1);
}

#[test]
fn leave_payload_from_reconnect_keeps_role() {
    let (mut engine, listener) = engine();
    engine.handle_notification(
        Notification::PeerJoin(PeerNotification::new("p2", "Bob").with_role("host")),
        false,
    );
    listener.take();
    engine.handle_notification(peer_list(Vec::new()), true);
    assert_eq!(listener.peer_updates(), vec![PeerUpdate::PeerLeft]);
    assert_eq!(engine.remote_peers().count(), 0);
}

#[test]
fn mute_toggle_then_description_change() {
    let (mut engine, listener) = engine();
    joined_with_av(&mut engine, "p1", "s1");
    listener.take();

    engine.handle_notification(
        track_update("p1", TrackInfo::new("s1", MediaKind::Audio).with_mute(true)),
        false,
    );
    engine.handle_notification(
        track_update("p1", TrackInfo::new("s1", MediaKind::Audio).with_mute(false)),
        false,
    );
    engine.handle_notification(
        track_update(
            "p1",
            TrackInfo::new("s1", MediaKind::Audio)
                .with_mute(false)
                .with_description("speaking from the car"),
        ),
        false,
    );
    // Same state again: no event
    engine.handle_notification(
        track_update(
            "p1",
            TrackInfo::new("s1", MediaKind::Audio)
                .with_mute(false)
                .with_description("speaking from the car"),
        ),
        false,
    );

    assert_eq!(
        listener.track_updates(),
        vec![
            TrackUpdate::TrackMuted,
            TrackUpdate::TrackUnmuted,
            TrackUpdate::TrackDescriptionChanged,
        ]
    );
    let peer = engine.find_peer(&PeerId::new("p1")).unwrap();
    assert!(peer.audio_track().unwrap().is_enabled());
}

#[test]
fn partial_update_keeps_omitted_fields() {
    let (mut engine, _listener) = engine();
    engine.handle_notification(
        join(
            "p1",
            "Alice",
            vec![TrackInfo::new("scr", MediaKind::Video)
                .with_source(TrackSource::Screen)
                .with_description("slides")],
        ),
        false,
    );
    let partial = TrackInfo {
        stream_id: "scr".to_string(),
        kind: MediaKind::Video,
        track_id: None,
        source: None,
        mute: Some(true),
        description: None,
    };
    engine.handle_notification(track_update("p1", partial), false);

    let entry = engine
        .track_state(&CompositeTrackId::new("scr", MediaKind::Video))
        .unwrap();
    assert!(entry.state.mute);
    assert_eq!(entry.state.source, TrackSource::Screen);
    assert_eq!(entry.state.description.as_deref(), Some("slides"));
}

#[test]
fn native_remove_detaches_exactly_one_auxiliary() {
    let (mut engine, listener) = engine();
    engine.handle_notification(
        join(
            "p1",
            "Alice",
            vec![
                TrackInfo::new("scr-1", MediaKind::Video).with_source(TrackSource::Screen),
                TrackInfo::new("scr-2", MediaKind::Video).with_source(TrackSource::Screen),
            ],
        ),
        false,
    );
    let first = NativeTrack::remote("a", "scr-1", MediaKind::Video);
    let second = NativeTrack::remote("b", "scr-2", MediaKind::Video);
    engine.handle_native_track_add(first.clone());
    engine.handle_native_track_add(second);
    listener.take();

    engine.handle_native_track_remove(&first);
    assert_eq!(listener.track_updates(), vec![TrackUpdate::TrackRemoved]);
    let peer = engine.find_peer(&PeerId::new("p1")).unwrap();
    assert_eq!(peer.auxiliary_tracks().len(), 1);
    assert_eq!(peer.auxiliary_tracks()[0].track_id(), "b");

    // Removing it again is a no-op
    engine.handle_native_track_remove(&first);
    assert_eq!(listener.track_updates().len(), 1);
}

#[test]
fn removing_pending_track_is_silent() {
    let (mut engine, listener) = engine();
    let orphan = NativeTrack::remote("t1", "s1", MediaKind::Audio);
    engine.handle_native_track_add(orphan.clone());
    engine.handle_native_track_remove(&orphan);

    assert_eq!(engine.pending_track_count(), 0);
    assert!(listener.events().is_empty());
}

#[test]
fn active_speakers_pick_dominant_then_resign() {
    let (mut engine, listener) = engine();
    engine.handle_notification(join("A", "Ann", Vec::new()), false);
    engine.handle_notification(join("B", "Ben", Vec::new()), false);
    listener.take();

    engine.handle_notification(
        Notification::ActiveSpeakers(SpeakerList {
            speakers: vec![
                Speaker {
                    peer_id: PeerId::new("A"),
                    track_id: None,
                    level: 10,
                },
                Speaker {
                    peer_id: PeerId::new("B"),
                    track_id: None,
                    level: 3,
                },
            ],
        }),
        false,
    );
    engine.handle_notification(Notification::ActiveSpeakers(SpeakerList::default()), false);

    let events = listener.events();
    assert!(matches!(&events[0], ListenerEvent::AudioLevel { speakers } if speakers.len() == 2));
    assert_eq!(
        events[1],
        ListenerEvent::Peer {
            update: PeerUpdate::BecameDominantSpeaker,
            peer_id: Some(PeerId::new("A")),
        }
    );
    assert!(matches!(&events[2], ListenerEvent::AudioLevel { speakers } if speakers.is_empty()));
    assert_eq!(
        events[3],
        ListenerEvent::Peer {
            update: PeerUpdate::ResignedDominantSpeaker,
            peer_id: None,
        }
    );
    assert_eq!(events.len(), 4);
}

#[test]
fn unknown_dominant_speaker_emits_no_peer_event() {
    let (mut engine, listener) = engine();
    engine.handle_notification(
        Notification::ActiveSpeakers(SpeakerList {
            speakers: vec![Speaker {
                peer_id: PeerId::new("ghost"),
                track_id: None,
                level: 7,
            }],
        }),
        false,
    );
    assert!(listener.peer_updates().is_empty());
}

#[test]
fn local_peer_can_be_dominant_speaker() {
    let (mut engine, listener) = engine();
    engine.set_local_peer(Peer::new("me", "Me", true));
    engine.handle_notification(
        Notification::ActiveSpeakers(SpeakerList {
            speakers: vec![Speaker {
                peer_id: PeerId::new("me"),
                track_id: None,
                level: 40,
            }],
        }),
        false,
    );
    assert_eq!(
        listener.peer_updates(),
        vec![PeerUpdate::BecameDominantSpeaker]
    );
}

#[test]
fn broadcast_is_forwarded_without_state_change() {
    let (mut engine, listener) = engine();
    engine.handle_notification(
        Notification::Broadcast(Message {
            sender: Some(PeerId::new("p1")),
            message: "hello".to_string(),
            message_type: Some("chat".to_string()),
            time: None,
        }),
        false,
    );
    assert_eq!(
        listener.events(),
        vec![ListenerEvent::Message {
            sender: Some(PeerId::new("p1")),
            message: "hello".to_string(),
        }]
    );
    assert_eq!(engine.peers().count(), 0);
}

#[test]
fn audio_track_added_goes_to_engine_channel() {
    let (mut engine, _listener) = engine();
    let mut events = engine.subscribe();
    joined_with_av(&mut engine, "p1", "s1");
    match events.try_recv().unwrap() {
        EngineEvent::AudioTrackAdded { peer_id, track } => {
            assert_eq!(peer_id, PeerId::new("p1"));
            assert_eq!(track.track_id(), "s1-a");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(events.try_recv().is_err());
}

#[test]
fn notifications_decode_from_recorded_json() {
    let json = r#"{
        "method": "peer-join",
        "params": {
            "peer_id": "p9",
            "role": "host",
            "info": {"name": "Zoe"},
            "tracks": [{"stream_id": "s9", "type": "audio", "mute": true}]
        }
    }"#;
    let notification: Notification = serde_json::from_str(json).unwrap();
    let (mut engine, listener) = engine();
    engine.handle_notification(notification, false);
    engine.handle_native_track_add(NativeTrack::remote("t9", "s9", MediaKind::Audio));

    match listener.events().last().unwrap() {
        ListenerEvent::Track { enabled, source, .. } => {
            assert!(!enabled);
            assert_eq!(source, &TrackSource::Regular);
        }
        other => panic!("unexpected event {other:?}"),
    }
}
