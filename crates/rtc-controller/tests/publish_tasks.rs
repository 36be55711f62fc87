//! Publish task lifecycle against the loopback engine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use common::types::TaskId;
use rtc_controller::actors::{RtcControllerHandle, SessionHandle};
use rtc_controller::errors::{RtcError, StateConflict, ValidationError};
use rtc_controller::events::RtcEvent;
use rtc_controller::loopback::ERR_PUBLISH_DUPLICATE;
use rtc_controller::params::{
    AppScene, AudioEncodeSpec, PublishMode, PublishTarget, StreamEncoderParams,
    StreamMixingConfig, VideoEncodeSpec,
};
use rtc_controller::publish::PublishTaskState;
use rtc_test_utils::{loopback_controller, settle, EventCollector, TestUser};
use std::sync::Arc;
use std::time::Duration;

const CDN_A: &str = "rtmp://cdn.example.net/live/a";
const CDN_B: &str = "rtmp://cdn.example.net/live/b";

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

fn relay(url: &str) -> PublishTarget {
    PublishTarget::cdn(PublishMode::BigStreamToCdn, [url])
}

fn av_encoder() -> StreamEncoderParams {
    StreamEncoderParams {
        video: Some(VideoEncodeSpec {
            width: 1280,
            height: 720,
            fps: 15,
            bitrate_kbps: 1500,
        }),
        audio: Some(AudioEncodeSpec {
            sample_rate: 48000,
            channels: 2,
            bitrate_kbps: 64,
        }),
    }
}

/// Wait for the task of `state` and return its id.
async fn task_in_state(events: &EventCollector, wanted: PublishTaskState) -> Option<TaskId> {
    let event = events
        .wait_for(|e| matches!(e, RtcEvent::PublishTaskUpdated { state, .. } if *state == wanted))
        .await;
    match event {
        RtcEvent::PublishTaskUpdated { task_id, .. } => task_id,
        _ => None,
    }
}

#[tokio::test]
async fn test_start_update_and_stop() {
    let (controller, engine) = loopback_controller();
    let (alice, events) = joined(&controller, TestUser::anchor("alice")).await;

    let request_id = alice
        .start_publish_media_stream(relay(CDN_A), None, None)
        .await
        .unwrap();
    let task_id = task_in_state(&events, PublishTaskState::Active)
        .await
        .expect("active task carries an id");
    assert_eq!(engine.active_tasks(), 1);

    let tasks = alice.publish_tasks().await.unwrap();
    assert_eq!(tasks.len(), 1);
    let view = tasks.first().unwrap();
    assert_eq!(view.request_id, request_id);
    assert_eq!(view.task_id.as_ref(), Some(&task_id));
    assert_eq!(view.state, PublishTaskState::Active);

    events.clear();
    alice
        .update_publish_media_stream(task_id.clone(), relay(CDN_B), None, None)
        .await
        .unwrap();
    let event = events.wait_for_name("publish_task_updated").await;
    assert!(matches!(
        event,
        RtcEvent::PublishTaskUpdated { state: PublishTaskState::Active, code: 0, .. }
    ));
    let tasks = alice.publish_tasks().await.unwrap();
    assert_eq!(tasks.first().unwrap().cdn_urls, vec![CDN_B.to_string()]);

    // Switching between CDN modes keeps the same task.
    events.clear();
    alice
        .update_publish_media_stream(
            task_id.clone(),
            PublishTarget::cdn(PublishMode::SubStreamToCdn, [CDN_B]),
            None,
            None,
        )
        .await
        .unwrap();
    let event = events.wait_for_name("publish_task_updated").await;
    assert!(matches!(
        event,
        RtcEvent::PublishTaskUpdated { state: PublishTaskState::Active, code: 0, .. }
    ));
    let tasks = alice.publish_tasks().await.unwrap();
    assert_eq!(tasks.first().unwrap().mode, PublishMode::SubStreamToCdn);

    alice
        .stop_publish_media_stream(Some(task_id.clone()))
        .await
        .unwrap();
    let stopped = task_in_state(&events, PublishTaskState::Stopped).await;
    assert_eq!(stopped, Some(task_id.clone()));
    assert!(alice.publish_tasks().await.unwrap().is_empty());
    assert_eq!(engine.active_tasks(), 0);

    let err = alice
        .stop_publish_media_stream(Some(task_id))
        .await
        .unwrap_err();
    assert_eq!(err, RtcError::State(StateConflict::UnknownTask));
    controller.cancel();
}

#[tokio::test]
async fn test_relay_becomes_mix_with_same_output() {
    let (controller, _engine) = loopback_controller();
    let (alice, events) = joined(&controller, TestUser::anchor("alice")).await;

    alice
        .start_publish_media_stream(relay(CDN_A), Some(av_encoder()), None)
        .await
        .unwrap();
    let task_id = task_in_state(&events, PublishTaskState::Active)
        .await
        .unwrap();

    events.clear();
    let mixing = StreamMixingConfig {
        audio_mix_users: vec!["alice".to_string()],
        ..StreamMixingConfig::default()
    };
    alice
        .update_publish_media_stream(
            task_id.clone(),
            PublishTarget::cdn(PublishMode::MixStreamToCdn, [CDN_A]),
            Some(av_encoder()),
            Some(mixing.clone()),
        )
        .await
        .unwrap();
    let event = events.wait_for_name("publish_task_updated").await;
    assert!(matches!(
        event,
        RtcEvent::PublishTaskUpdated { state: PublishTaskState::Active, code: 0, .. }
    ));
    let tasks = alice.publish_tasks().await.unwrap();
    assert_eq!(tasks.first().unwrap().mode, PublishMode::MixStreamToCdn);

    // Dropping the video track changes what the task outputs.
    let audio_only = StreamEncoderParams {
        video: None,
        ..av_encoder()
    };
    let err = alice
        .update_publish_media_stream(
            task_id,
            PublishTarget::cdn(PublishMode::MixStreamToCdn, [CDN_A]),
            Some(audio_only),
            Some(mixing),
        )
        .await
        .unwrap_err();
    assert_eq!(err, RtcError::State(StateConflict::IncompatibleModeSwitch));
    controller.cancel();
}

#[tokio::test]
async fn test_local_duplicate_and_validation() {
    let (controller, engine) = loopback_controller();

    let idle = controller.create_session().await.unwrap();
    let err = idle
        .start_publish_media_stream(relay(CDN_A), None, None)
        .await
        .unwrap_err();
    assert_eq!(err, RtcError::State(StateConflict::NotInRoom));

    let (alice, events) = joined(&controller, TestUser::anchor("alice")).await;
    alice
        .start_publish_media_stream(relay(CDN_A), None, None)
        .await
        .unwrap();

    // Same destination from the same session.
    let err = alice
        .start_publish_media_stream(relay(CDN_A), None, None)
        .await
        .unwrap_err();
    assert_eq!(err, RtcError::State(StateConflict::DuplicatePublishTarget));

    let err = alice
        .start_publish_media_stream(
            PublishTarget::cdn(PublishMode::BigStreamToCdn, Vec::<String>::new()),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err, RtcError::Validation(ValidationError::EmptyPublishTarget));

    let err = alice
        .start_publish_media_stream(
            PublishTarget::cdn(PublishMode::MixStreamToCdn, [CDN_B]),
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err, RtcError::Validation(ValidationError::MissingEncoderParams));

    task_in_state(&events, PublishTaskState::Active).await;
    assert_eq!(engine.active_tasks(), 1);
    assert_eq!(
        engine.intents(alice.session_id()),
        vec!["enter_room", "start_publish_media_stream"]
    );
    controller.cancel();
}

#[tokio::test]
async fn test_cross_session_duplicate_returns_existing_task() {
    let (controller, engine) = loopback_controller();
    let (alice, alice_events) = joined(&controller, TestUser::anchor("alice").room(101)).await;
    let (bob, bob_events) = joined(&controller, TestUser::anchor("bob").room(102)).await;

    alice
        .start_publish_media_stream(relay(CDN_A), None, None)
        .await
        .unwrap();
    let alice_task = task_in_state(&alice_events, PublishTaskState::Active)
        .await
        .unwrap();

    bob.start_publish_media_stream(relay(CDN_A), None, None)
        .await
        .unwrap();
    let event = bob_events.wait_for_name("publish_task_updated").await;
    assert!(matches!(
        event,
        RtcEvent::PublishTaskUpdated {
            task_id: Some(ref id),
            state: PublishTaskState::Rejected,
            code,
            ..
        } if *id == alice_task && code == ERR_PUBLISH_DUPLICATE
    ));

    // The rejected record is kept and can be stopped but not updated.
    let tasks = bob.publish_tasks().await.unwrap();
    assert_eq!(tasks.first().unwrap().state, PublishTaskState::Rejected);
    let err = bob
        .update_publish_media_stream(alice_task.clone(), relay(CDN_B), None, None)
        .await
        .unwrap_err();
    assert_eq!(err, RtcError::State(StateConflict::TaskNotUpdatable));

    bob_events.clear();
    bob.stop_publish_media_stream(None).await.unwrap();
    task_in_state(&bob_events, PublishTaskState::Stopped).await;
    assert!(bob.publish_tasks().await.unwrap().is_empty());

    // Alice's relay is untouched.
    assert_eq!(engine.active_tasks(), 1);
    let tasks = alice.publish_tasks().await.unwrap();
    assert_eq!(tasks.first().unwrap().state, PublishTaskState::Active);
    controller.cancel();
}

#[tokio::test]
async fn test_exit_abandons_tasks() {
    let (controller, engine) = loopback_controller();
    let (alice, events) = joined(&controller, TestUser::anchor("alice")).await;

    alice
        .start_publish_media_stream(relay(CDN_A), None, None)
        .await
        .unwrap();
    alice
        .start_publish_media_stream(relay(CDN_B), None, None)
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let tasks = alice.publish_tasks().await.unwrap();
            if tasks.iter().all(|t| t.state == PublishTaskState::Active) {
                break;
            }
            settle().await;
        }
    })
    .await
    .expect("both relays should become active");

    events.clear();
    alice.exit_room().await.unwrap();
    events.wait_for_name("room_exited").await;

    let stopped = events
        .events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                RtcEvent::PublishTaskUpdated { state: PublishTaskState::Stopped, .. }
            )
        })
        .count();
    assert_eq!(stopped, 2);
    assert!(alice.publish_tasks().await.unwrap().is_empty());
    assert_eq!(engine.active_tasks(), 0);
    controller.cancel();
}
