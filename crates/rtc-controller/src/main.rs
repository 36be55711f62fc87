//! RTC Loopback
//!
//! Runs the controller against the in-process loopback engine and drives a
//! scripted two-room scenario. Useful as a smoke test of the whole stack and
//! as a worked example of the public API.
//!
//! # Scenario
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Start two controllers sharing one loopback engine (one publisher each)
//! 4. Host `alice` enters room 101 with a viewer `carol`, host `bob` enters room 102
//! 5. `alice` links to `bob` across rooms, messages her room and relays to a CDN
//! 6. Everything is torn down and both controllers drain

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // the scenario is one linear script

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use bytes::Bytes;
use common::secret::SecretString;
use rtc_controller::actors::{ActorMetrics, RtcControllerHandle, SessionHandle};
use rtc_controller::config::Config;
use rtc_controller::device::DeviceProvider;
use rtc_controller::engine::MediaEngine;
use rtc_controller::events::{ObserverRef, RtcEvent};
use rtc_controller::loopback::{LoopbackEngine, VirtualDeviceProvider};
use rtc_controller::observability::init_metrics_recorder;
use rtc_controller::params::{
    AppScene, AudioQuality, CameraFacing, CrossRoomDescriptor, EnterRoomParams, PublishMode,
    PublishTarget, Role, RoomIdentifier, RoomRef, StreamType,
};
use rtc_controller::publish::PublishTaskState;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long a step may wait for its confirming event.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Custom command id used for the room broadcast.
const GREETING_CMD_ID: u32 = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    let json_logs = config.logging.json_logs;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.log_filter.clone().into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    info!(
        controller_id = %config.controller_id,
        sdk_app_id = config.sdk_app_id,
        max_sessions = config.max_sessions,
        session_mailbox = config.session_mailbox,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow!(e)
    })?;
    info!("Prometheus metrics recorder initialized");

    let engine = LoopbackEngine::new();
    let devices: Arc<dyn DeviceProvider> = Arc::new(VirtualDeviceProvider::default());
    let actor_metrics = ActorMetrics::new();

    // Each controller stands for one application instance with its own publisher.
    let mut config_b = config.clone();
    config_b.controller_id = format!("{}-b", config.controller_id);
    let controller_a = RtcControllerHandle::new(
        &config,
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        Arc::clone(&devices),
        Arc::clone(&actor_metrics),
    );
    let controller_b = RtcControllerHandle::new(
        &config_b,
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        Arc::clone(&devices),
        Arc::clone(&actor_metrics),
    );

    let alice = controller_a.create_session().await?;
    let carol = controller_a.create_session().await?;
    let bob = controller_b.create_session().await?;

    let mut alice_events = watch(&alice, "alice");
    let mut carol_events = watch(&carol, "carol");
    let mut bob_events = watch(&bob, "bob");

    // --- Enter rooms ------------------------------------------------------

    alice
        .enter_room(
            enter_params(&config, "alice", 101, Role::Anchor),
            AppScene::Live,
        )
        .await?;
    wait_for(&mut alice_events, "alice entered", |e| {
        matches!(e, RtcEvent::RoomEntered { result, .. } if *result >= 0)
    })
    .await?;
    alice.start_local_audio(AudioQuality::Default).await?;
    alice.start_local_preview(CameraFacing::Front, None).await?;

    carol
        .enter_room(
            enter_params(&config, "carol", 101, Role::Audience),
            AppScene::Live,
        )
        .await?;
    wait_for(&mut carol_events, "carol sees alice's camera", |e| {
        matches!(
            e,
            RtcEvent::StreamAvailabilityChanged { user_id, stream_type: StreamType::Big, available: true, .. }
                if user_id == "alice"
        )
    })
    .await?;
    carol
        .start_remote_view("alice", StreamType::Big, None)
        .await?;
    let state = carol.query_stream("alice", StreamType::Big).await?;
    info!(?state, "carol subscribed to alice");

    bob.enter_room(
        enter_params(&config, "bob", 102, Role::Anchor),
        AppScene::Live,
    )
    .await?;
    wait_for(&mut bob_events, "bob entered", |e| {
        matches!(e, RtcEvent::RoomEntered { result, .. } if *result >= 0)
    })
    .await?;
    bob.start_local_preview(CameraFacing::Front, None).await?;

    // --- Cross-room link --------------------------------------------------

    alice
        .connect_other_room(CrossRoomDescriptor::new(RoomRef::Numeric(102), "bob"))
        .await?;
    wait_for(&mut alice_events, "cross-room link", |e| {
        matches!(e, RtcEvent::CrossRoomConnected { code: 0, .. })
    })
    .await?;
    wait_for(&mut alice_events, "alice sees bob", |e| {
        matches!(e, RtcEvent::RemoteUserEntered { user_id } if user_id == "bob")
    })
    .await?;

    // --- Messaging --------------------------------------------------------

    alice
        .send_custom_cmd_msg(
            GREETING_CMD_ID,
            Bytes::from_static(b"welcome to room 101"),
            true,
            true,
        )
        .await?;
    wait_for(&mut carol_events, "greeting delivered", |e| {
        matches!(e, RtcEvent::CustomCmdMsgReceived { cmd_id: GREETING_CMD_ID, .. })
    })
    .await?;

    // --- CDN relay --------------------------------------------------------

    let request_id = alice
        .start_publish_media_stream(
            PublishTarget::cdn(
                PublishMode::BigStreamToCdn,
                ["rtmp://cdn.example.net/live/alice"],
            ),
            None,
            None,
        )
        .await?;
    let started = wait_for(&mut alice_events, "relay active", |e| {
        matches!(
            e,
            RtcEvent::PublishTaskUpdated { request_id: id, state: PublishTaskState::Active, .. }
                if *id == request_id
        )
    })
    .await?;
    if let RtcEvent::PublishTaskUpdated {
        task_id: Some(task_id),
        ..
    } = started
    {
        info!(task_id = %task_id, active_tasks = engine.active_tasks(), "CDN relay running");
        alice.stop_publish_media_stream(Some(task_id)).await?;
        wait_for(&mut alice_events, "relay stopped", |e| {
            matches!(
                e,
                RtcEvent::PublishTaskUpdated {
                    state: PublishTaskState::Stopped,
                    ..
                }
            )
        })
        .await?;
    }

    // --- Teardown ---------------------------------------------------------

    alice.disconnect_other_room().await?;
    wait_for(&mut alice_events, "cross-room unlink", |e| {
        matches!(e, RtcEvent::CrossRoomDisconnected { code: 0, .. })
    })
    .await?;

    for (name, session) in [("alice", &alice), ("carol", &carol), ("bob", &bob)] {
        let snapshot = session.snapshot().await?;
        info!(
            user = name,
            phase = ?snapshot.phase,
            room = ?snapshot.room,
            remote_users = ?snapshot.remote_users,
            is_publisher = snapshot.is_publisher,
            "Session snapshot"
        );
        session.exit_room().await?;
    }

    for controller in [&controller_a, &controller_b] {
        let status = controller.get_status().await?;
        info!(
            controller_id = %status.controller_id,
            session_count = status.session_count,
            publisher = ?status.publisher,
            "Controller status"
        );
        if let Err(e) = controller.shutdown(config.session_shutdown_timeout).await {
            warn!(error = %e, "Controller shutdown error");
        }
    }

    info!(
        metrics = %prometheus_handle.render(),
        "RTC loopback scenario complete"
    );
    Ok(())
}

fn enter_params(config: &Config, user_id: &str, room_id: u32, role: Role) -> EnterRoomParams {
    EnterRoomParams {
        sdk_app_id: config.sdk_app_id,
        user_id: user_id.to_string(),
        user_sig: SecretString::from(format!("loopback-sig-{user_id}")),
        room: RoomIdentifier::numeric(room_id),
        role: Some(role),
        private_map_key: None,
        stream_id: None,
    }
}

/// Log every event of `session` and forward it to the returned receiver.
fn watch(session: &SessionHandle, name: &'static str) -> mpsc::UnboundedReceiver<RtcEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let observer: ObserverRef = Arc::new(move |event: &RtcEvent| {
        info!(target: "rtc.loopback.events", user = name, kind = event.name(), ?event);
        let _ = tx.send(event.clone());
    });
    session.add_callback(observer);
    rx
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<RtcEvent>,
    step: &str,
    mut predicate: impl FnMut(&RtcEvent) -> bool,
) -> anyhow::Result<RtcEvent> {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if predicate(&event) {
                return Ok(event);
            }
        }
        Err(anyhow!("event stream closed before {step}"))
    })
    .await
    .with_context(|| format!("timed out waiting for {step}"))?
}
