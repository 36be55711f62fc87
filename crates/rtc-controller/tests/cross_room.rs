//! Cross-room links between anchors, and publisher arbitration.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rtc_controller::actors::{RtcControllerHandle, SessionHandle};
use rtc_controller::device::DeviceProvider;
use rtc_controller::engine::MediaEngine;
use rtc_controller::errors::{RtcError, StateConflict};
use rtc_controller::events::RtcEvent;
use rtc_controller::loopback::{LoopbackEngine, VirtualDeviceProvider, ERR_CROSS_ROOM_TARGET};
use rtc_controller::params::{
    AppScene, AudioQuality, CameraFacing, CrossRoomDescriptor, RoomIdentifier, RoomRef,
    StreamType, SwitchRoomConfig,
};
use rtc_test_utils::{loopback_controller, test_controller, EventCollector, TestUser};
use std::sync::Arc;

async fn joined(
    controller: &RtcControllerHandle,
    user: TestUser,
) -> (SessionHandle, Arc<EventCollector>) {
    let session = controller.create_session().await.unwrap();
    let events = EventCollector::attach(&session);
    session
        .enter_room(user.params(), AppScene::Live)
        .await
        .unwrap();
    events.wait_for_name("room_entered").await;
    (session, events)
}

fn bob_in_102() -> CrossRoomDescriptor {
    CrossRoomDescriptor::new(RoomRef::Numeric(102), "bob")
}

#[tokio::test]
async fn test_connect_and_disconnect() {
    let (controller, _engine) = loopback_controller();
    let (alice, alice_events) = joined(&controller, TestUser::anchor("alice").room(101)).await;
    let (bob, bob_events) = joined(&controller, TestUser::anchor("bob").room(102)).await;

    alice.connect_other_room(bob_in_102()).await.unwrap();

    let event = alice_events.wait_for_name("cross_room_connected").await;
    assert_eq!(
        event,
        RtcEvent::CrossRoomConnected {
            user_id: "bob".to_string(),
            room: RoomRef::Numeric(102),
            code: 0,
            message: String::new(),
        }
    );
    let event = bob_events.wait_for_name("cross_room_connected").await;
    assert!(matches!(
        event,
        RtcEvent::CrossRoomConnected { ref user_id, room: RoomRef::Numeric(101), code: 0, .. }
            if user_id == "alice"
    ));
    alice_events
        .wait_for(|e| matches!(e, RtcEvent::RemoteUserEntered { user_id } if user_id == "bob"))
        .await;

    // Media started after the link is relayed to the other room.
    bob.start_local_preview(CameraFacing::Front, None)
        .await
        .unwrap();
    alice_events
        .wait_for(|e| {
            matches!(
                e,
                RtcEvent::StreamAvailabilityChanged {
                    user_id,
                    stream_type: StreamType::Big,
                    available: true,
                    ..
                } if user_id == "bob"
            )
        })
        .await;

    let snapshot = alice.snapshot().await.unwrap();
    assert_eq!(snapshot.cross_room_peer, Some(bob_in_102()));
    assert!(snapshot.remote_users.contains(&"bob".to_string()));

    let err = alice.connect_other_room(bob_in_102()).await.unwrap_err();
    assert_eq!(
        err,
        RtcError::State(StateConflict::AlreadyConnectedToOtherRoom)
    );

    alice.disconnect_other_room().await.unwrap();
    let event = alice_events.wait_for_name("cross_room_disconnected").await;
    assert_eq!(
        event,
        RtcEvent::CrossRoomDisconnected {
            user_id: Some("bob".to_string()),
            code: 0,
            message: String::new(),
        }
    );
    bob_events
        .wait_for(|e| {
            matches!(e, RtcEvent::CrossRoomDisconnected { user_id: Some(u), .. } if u == "alice")
        })
        .await;
    bob_events
        .wait_for(|e| matches!(e, RtcEvent::RemoteUserLeft { user_id, .. } if user_id == "alice"))
        .await;

    assert!(alice.snapshot().await.unwrap().cross_room_peer.is_none());
    assert!(bob.snapshot().await.unwrap().cross_room_peer.is_none());
    controller.cancel();
}

#[tokio::test]
async fn test_connect_preconditions() {
    let (controller, _engine) = loopback_controller();

    let idle = controller.create_session().await.unwrap();
    let err = idle.connect_other_room(bob_in_102()).await.unwrap_err();
    assert_eq!(err, RtcError::State(StateConflict::NotInRoom));

    let (carol, _carol_events) =
        joined(&controller, TestUser::audience("carol").room(101)).await;
    let err = carol.connect_other_room(bob_in_102()).await.unwrap_err();
    assert_eq!(err, RtcError::State(StateConflict::NotAnchor));

    let (alice, alice_events) = joined(&controller, TestUser::anchor("alice").room(101)).await;
    let err = alice.disconnect_other_room().await.unwrap_err();
    assert_eq!(err, RtcError::State(StateConflict::NoCrossRoomConnection));

    // Nobody named bob is anchoring room 102.
    alice.connect_other_room(bob_in_102()).await.unwrap();
    let event = alice_events.wait_for_name("cross_room_connected").await;
    assert!(matches!(
        event,
        RtcEvent::CrossRoomConnected { code, .. } if code == ERR_CROSS_ROOM_TARGET
    ));
    assert!(alice.snapshot().await.unwrap().cross_room_peer.is_none());

    // A failed attempt leaves the session free to try again.
    let (_bob, _bob_events) = joined(&controller, TestUser::anchor("bob").room(102)).await;
    alice_events.clear();
    alice.connect_other_room(bob_in_102()).await.unwrap();
    alice_events
        .wait_for(|e| matches!(e, RtcEvent::CrossRoomConnected { code: 0, .. }))
        .await;
    controller.cancel();
}

#[tokio::test]
async fn test_switch_room_drops_link() {
    let (controller, engine) = loopback_controller();
    let (alice, alice_events) = joined(&controller, TestUser::anchor("alice").room(101)).await;
    let (_bob, bob_events) = joined(&controller, TestUser::anchor("bob").room(102)).await;

    alice.connect_other_room(bob_in_102()).await.unwrap();
    bob_events.wait_for_name("cross_room_connected").await;

    alice
        .switch_room(SwitchRoomConfig {
            room: RoomIdentifier::numeric(103),
            ..SwitchRoomConfig::default()
        })
        .await
        .unwrap();

    let event = alice_events.wait_for_name("room_switched").await;
    assert_eq!(
        event,
        RtcEvent::RoomSwitched {
            room: RoomRef::Numeric(103),
            code: 0,
            message: String::new(),
        }
    );
    let event = alice_events.wait_for_name("cross_room_disconnected").await;
    assert!(matches!(
        event,
        RtcEvent::CrossRoomDisconnected { user_id: Some(ref u), code: 0, .. } if u == "bob"
    ));
    bob_events
        .wait_for(|e| {
            matches!(e, RtcEvent::CrossRoomDisconnected { user_id: Some(u), .. } if u == "alice")
        })
        .await;

    let snapshot = alice.snapshot().await.unwrap();
    assert_eq!(snapshot.room, Some(RoomRef::Numeric(103)));
    assert!(snapshot.cross_room_peer.is_none());
    assert!(snapshot.remote_users.is_empty());
    assert_eq!(engine.room_members(&RoomRef::Numeric(103)), vec!["alice"]);
    controller.cancel();
}

// ============================================================================
// Publisher Arbitration
// ============================================================================

#[tokio::test]
async fn test_second_publisher_in_controller_is_refused() {
    let (controller, _engine) = loopback_controller();
    let (alice, _alice_events) = joined(&controller, TestUser::anchor("alice").room(101)).await;
    let (bob, _bob_events) = joined(&controller, TestUser::anchor("bob").room(102)).await;

    alice
        .start_local_audio(AudioQuality::Speech)
        .await
        .unwrap();
    let err = bob
        .start_local_audio(AudioQuality::Speech)
        .await
        .unwrap_err();
    assert_eq!(err, RtcError::State(StateConflict::PublisherBusy));

    let status = controller.get_status().await.unwrap();
    assert_eq!(status.publisher, Some(alice.session_id()));

    // Ownership is released once alice stops sending.
    alice.stop_local_audio().await.unwrap();
    bob.start_local_audio(AudioQuality::Speech).await.unwrap();
    let status = controller.get_status().await.unwrap();
    assert_eq!(status.publisher, Some(bob.session_id()));
    controller.cancel();
}

#[tokio::test]
async fn test_publishing_anchors_link_across_controllers() {
    let engine = LoopbackEngine::new();
    let controller_for = || {
        test_controller(
            Arc::clone(&engine) as Arc<dyn MediaEngine>,
            Arc::new(VirtualDeviceProvider::default()) as Arc<dyn DeviceProvider>,
        )
    };
    let controller_a = controller_for();
    let controller_b = controller_for();

    let (alice, alice_events) =
        joined(&controller_a, TestUser::anchor("alice").room(101)).await;
    let (bob, bob_events) = joined(&controller_b, TestUser::anchor("bob").room(102)).await;
    alice.start_local_audio(AudioQuality::Music).await.unwrap();
    bob.start_local_audio(AudioQuality::Music).await.unwrap();

    alice.connect_other_room(bob_in_102()).await.unwrap();

    alice_events
        .wait_for(|e| {
            matches!(e, RtcEvent::RemoteAudioAvailable { user_id, available: true } if user_id == "bob")
        })
        .await;
    bob_events
        .wait_for(|e| {
            matches!(e, RtcEvent::RemoteAudioAvailable { user_id, available: true } if user_id == "alice")
        })
        .await;

    assert!(alice.snapshot().await.unwrap().is_publisher);
    assert!(bob.snapshot().await.unwrap().is_publisher);
    controller_a.cancel();
    controller_b.cancel();
}
