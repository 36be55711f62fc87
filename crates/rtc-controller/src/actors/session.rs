//! `SessionActor` - one per controller session.
//!
//! The actor owns every piece of session state: the room state machine,
//! the stream registry, publish tasks and local media. Two inputs feed its
//! loop:
//!
//! - caller commands from [`SessionHandle`] (bounded mailbox)
//! - engine events from the session's [`EngineEventSink`] (unbounded)
//!
//! Commands are validated and applied locally, then forwarded to the
//! [`MediaEngine`]; the caller gets `Ok` once that happens, never after a
//! network round trip. Engine events are reconciled against current state
//! and fanned out through the session's [`EventDispatcher`]. Events that no
//! longer match the state (a late enter result after `exit_room`, say) are
//! dropped with a debug log.

use super::messages::{SessionCommand, SessionMessage, SessionSnapshot};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::arbiter::PublishArbiter;
use crate::device::{DeviceKind, DeviceProvider, RenderTarget};
use crate::engine::{EngineEvent, EngineEventSink, EngineIntent, ExitReason, MediaEngine};
use crate::errors::{RtcError, StateConflict, ValidationError};
use crate::events::{EventDispatcher, ObserverRef, RtcEvent};
use crate::local::{
    clamp_evaluation_interval, CameraPreview, LocalMedia, ScreenCapture, VolumeEvaluation,
};
use crate::messaging::{self, CustomMessageLimiter};
use crate::observability::metrics;
use crate::params::{
    AppScene, AudioFrame, AudioQuality, AudioRecordingParams, CameraFacing, CrossRoomDescriptor,
    EnterRoomParams, PublishTarget, RecvMode, Role, ScreenCaptureSource, ScreenCaptureState,
    SpeedTestParams, StreamEncoderParams, StreamMixingConfig, StreamType, SwitchRoomConfig,
    VideoEncParam, VideoFrame,
};
use crate::publish::{PublishEffect, PublishTaskManager, PublishTaskView};
use crate::registry::{
    RegistryEffect, RemoteStreamView, StreamRegistry, SubscriptionState, UserScope,
};
use crate::room::{RoleSwitch, RoomStateMachine};
use crate::validator;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::types::{PublishRequestId, SessionId, TaskId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Collaborators shared by every session of a controller.
#[derive(Clone)]
pub struct SessionContext {
    pub engine: Arc<dyn MediaEngine>,
    pub devices: Arc<dyn DeviceProvider>,
    pub arbiter: Arc<PublishArbiter>,
    pub metrics: Arc<ActorMetrics>,
}

/// Handle to a `SessionActor`.
///
/// Cheap to clone. Every command is serialized through the actor's mailbox,
/// so commands from one caller apply in issue order.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    session_id: SessionId,
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    dispatcher: Arc<EventDispatcher>,
}

impl SessionHandle {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, RtcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| RtcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RtcError::Internal(format!("response receive failed: {e}")))
    }

    async fn command(&self, command: SessionCommand) -> Result<(), RtcError> {
        self.request(|respond_to| SessionMessage::Command {
            command,
            respond_to,
        })
        .await?
    }

    // --- Observers --------------------------------------------------------

    /// Register an observer. Adding the same observer twice has no effect.
    pub fn add_callback(&self, observer: ObserverRef) -> bool {
        self.dispatcher.add(observer)
    }

    /// Unregister an observer. Unknown observers are ignored.
    pub fn remove_callback(&self, observer: &ObserverRef) -> bool {
        self.dispatcher.remove(observer)
    }

    // --- Room -------------------------------------------------------------

    /// Enter a room. The outcome arrives as [`RtcEvent::RoomEntered`].
    pub async fn enter_room(
        &self,
        params: EnterRoomParams,
        scene: AppScene,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::EnterRoom { params, scene })
            .await
    }

    /// Leave the current room. A no-op when idle or already exiting.
    pub async fn exit_room(&self) -> Result<(), RtcError> {
        self.command(SessionCommand::ExitRoom).await
    }

    pub async fn switch_role(
        &self,
        role: Role,
        private_map_key: Option<SecretString>,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::SwitchRole {
            role,
            private_map_key,
        })
        .await
    }

    pub async fn switch_room(&self, config: SwitchRoomConfig) -> Result<(), RtcError> {
        self.command(SessionCommand::SwitchRoom(config)).await
    }

    pub async fn connect_other_room(&self, target: CrossRoomDescriptor) -> Result<(), RtcError> {
        self.command(SessionCommand::ConnectOtherRoom(target)).await
    }

    pub async fn disconnect_other_room(&self) -> Result<(), RtcError> {
        self.command(SessionCommand::DisconnectOtherRoom).await
    }

    /// Applies at the next room entry.
    pub async fn set_default_stream_recv_mode(
        &self,
        auto_audio: bool,
        auto_video: bool,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::SetDefaultStreamRecvMode {
            auto_audio,
            auto_video,
        })
        .await
    }

    // --- Remote streams ---------------------------------------------------

    pub async fn start_remote_view(
        &self,
        user_id: impl Into<String>,
        stream_type: StreamType,
        target: Option<RenderTarget>,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::StartRemoteView {
            user_id: user_id.into(),
            stream_type,
            target,
        })
        .await
    }

    pub async fn update_remote_view(
        &self,
        user_id: impl Into<String>,
        stream_type: StreamType,
        target: Option<RenderTarget>,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::UpdateRemoteView {
            user_id: user_id.into(),
            stream_type,
            target,
        })
        .await
    }

    pub async fn stop_remote_view(
        &self,
        user_id: impl Into<String>,
        stream_type: StreamType,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::StopRemoteView {
            user_id: user_id.into(),
            stream_type,
        })
        .await
    }

    pub async fn stop_all_remote_view(&self) -> Result<(), RtcError> {
        self.command(SessionCommand::StopAllRemoteView).await
    }

    pub async fn mute_remote_video_stream(
        &self,
        user_id: impl Into<String>,
        stream_type: StreamType,
        mute: bool,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::MuteRemoteVideo {
            user_id: user_id.into(),
            stream_type,
            mute,
        })
        .await
    }

    pub async fn mute_all_remote_video_streams(&self, mute: bool) -> Result<(), RtcError> {
        self.command(SessionCommand::MuteAllRemoteVideo(mute)).await
    }

    pub async fn mute_remote_audio(
        &self,
        user_id: impl Into<String>,
        mute: bool,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::MuteRemoteAudio {
            user_id: user_id.into(),
            mute,
        })
        .await
    }

    pub async fn mute_all_remote_audio(&self, mute: bool) -> Result<(), RtcError> {
        self.command(SessionCommand::MuteAllRemoteAudio(mute)).await
    }

    /// Switch a subscribed camera stream between Big and Small.
    pub async fn set_remote_video_stream_type(
        &self,
        user_id: impl Into<String>,
        stream_type: StreamType,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::SetRemoteVideoStreamType {
            user_id: user_id.into(),
            stream_type,
        })
        .await
    }

    pub async fn set_remote_audio_volume(
        &self,
        user_id: impl Into<String>,
        volume: u32,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::SetRemoteAudioVolume {
            user_id: user_id.into(),
            volume,
        })
        .await
    }

    /// Subscription state of a remote stream.
    pub async fn query_stream(
        &self,
        user_id: impl Into<String>,
        stream_type: StreamType,
    ) -> Result<SubscriptionState, RtcError> {
        Ok(self.remote_stream(user_id, stream_type).await?.0)
    }

    /// Subscription state plus the registry entry, if any.
    pub async fn remote_stream(
        &self,
        user_id: impl Into<String>,
        stream_type: StreamType,
    ) -> Result<(SubscriptionState, Option<RemoteStreamView>), RtcError> {
        let user_id = user_id.into();
        self.request(|respond_to| SessionMessage::QueryStream {
            user_id,
            stream_type,
            respond_to,
        })
        .await
    }

    // --- Local media ------------------------------------------------------

    pub async fn start_local_audio(&self, quality: AudioQuality) -> Result<(), RtcError> {
        self.command(SessionCommand::StartLocalAudio(quality)).await
    }

    pub async fn stop_local_audio(&self) -> Result<(), RtcError> {
        self.command(SessionCommand::StopLocalAudio).await
    }

    pub async fn mute_local_audio(&self, mute: bool) -> Result<(), RtcError> {
        self.command(SessionCommand::MuteLocalAudio(mute)).await
    }

    pub async fn start_local_preview(
        &self,
        facing: CameraFacing,
        target: Option<RenderTarget>,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::StartLocalPreview { facing, target })
            .await
    }

    pub async fn update_local_view(&self, target: Option<RenderTarget>) -> Result<(), RtcError> {
        self.command(SessionCommand::UpdateLocalView(target)).await
    }

    pub async fn stop_local_preview(&self) -> Result<(), RtcError> {
        self.command(SessionCommand::StopLocalPreview).await
    }

    pub async fn mute_local_video(&self, stream_type: StreamType, mute: bool) -> Result<(), RtcError> {
        self.command(SessionCommand::MuteLocalVideo { stream_type, mute })
            .await
    }

    pub async fn set_video_encoder_param(&self, param: VideoEncParam) -> Result<(), RtcError> {
        self.command(SessionCommand::SetVideoEncoderParam(param))
            .await
    }

    pub async fn enable_small_video_stream(
        &self,
        enable: bool,
        param: VideoEncParam,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::EnableSmallVideoStream { enable, param })
            .await
    }

    pub async fn set_audio_capture_volume(&self, volume: u32) -> Result<(), RtcError> {
        self.command(SessionCommand::SetAudioCaptureVolume(volume))
            .await
    }

    pub async fn audio_capture_volume(&self) -> Result<u32, RtcError> {
        Ok(self.snapshot().await?.local.capture_volume)
    }

    pub async fn set_audio_playout_volume(&self, volume: u32) -> Result<(), RtcError> {
        self.command(SessionCommand::SetAudioPlayoutVolume(volume))
            .await
    }

    pub async fn audio_playout_volume(&self) -> Result<u32, RtcError> {
        Ok(self.snapshot().await?.local.playout_volume)
    }

    /// `interval_ms` of zero disables evaluation; shorter intervals clamp to 100 ms.
    pub async fn enable_audio_volume_evaluation(
        &self,
        interval_ms: u32,
        enable_vad: bool,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::EnableAudioVolumeEvaluation {
            interval_ms,
            enable_vad,
        })
        .await
    }

    pub async fn start_audio_recording(&self, params: AudioRecordingParams) -> Result<(), RtcError> {
        self.command(SessionCommand::StartAudioRecording(params))
            .await
    }

    pub async fn stop_audio_recording(&self) -> Result<(), RtcError> {
        self.command(SessionCommand::StopAudioRecording).await
    }

    // --- Screen capture ---------------------------------------------------

    pub async fn screen_capture_sources(&self) -> Result<Vec<ScreenCaptureSource>, RtcError> {
        self.request(|respond_to| SessionMessage::ScreenCaptureSources { respond_to })
            .await?
    }

    pub async fn select_screen_capture_target(
        &self,
        source_id: impl Into<String>,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::SelectScreenCaptureTarget(source_id.into()))
            .await
    }

    pub async fn start_screen_capture(
        &self,
        target: Option<RenderTarget>,
        stream_type: StreamType,
        param: VideoEncParam,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::StartScreenCapture {
            target,
            stream_type,
            param,
        })
        .await
    }

    pub async fn pause_screen_capture(&self) -> Result<(), RtcError> {
        self.command(SessionCommand::PauseScreenCapture).await
    }

    pub async fn resume_screen_capture(&self) -> Result<(), RtcError> {
        self.command(SessionCommand::ResumeScreenCapture).await
    }

    pub async fn stop_screen_capture(&self) -> Result<(), RtcError> {
        self.command(SessionCommand::StopScreenCapture).await
    }

    // --- Custom capture ---------------------------------------------------

    pub async fn enable_custom_video_capture(
        &self,
        stream_type: StreamType,
        enable: bool,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::EnableCustomVideoCapture {
            stream_type,
            enable,
        })
        .await
    }

    pub async fn send_custom_video_frame(
        &self,
        stream_type: StreamType,
        frame: VideoFrame,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::SendCustomVideoFrame { stream_type, frame })
            .await
    }

    pub async fn enable_custom_audio_capture(&self, enable: bool) -> Result<(), RtcError> {
        self.command(SessionCommand::EnableCustomAudioCapture(enable))
            .await
    }

    pub async fn send_custom_audio_frame(&self, frame: AudioFrame) -> Result<(), RtcError> {
        self.command(SessionCommand::SendCustomAudioFrame(frame))
            .await
    }

    // --- Publishing -------------------------------------------------------

    /// Start a CDN relay or cloud mix task.
    ///
    /// Returns the local request id. The engine-assigned task id arrives in
    /// [`RtcEvent::PublishTaskUpdated`].
    pub async fn start_publish_media_stream(
        &self,
        target: PublishTarget,
        encoder: Option<StreamEncoderParams>,
        mixing: Option<StreamMixingConfig>,
    ) -> Result<PublishRequestId, RtcError> {
        self.request(|respond_to| SessionMessage::StartPublish {
            target,
            encoder,
            mixing,
            respond_to,
        })
        .await?
    }

    pub async fn update_publish_media_stream(
        &self,
        task_id: TaskId,
        target: PublishTarget,
        encoder: Option<StreamEncoderParams>,
        mixing: Option<StreamMixingConfig>,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::UpdatePublishMediaStream {
            task_id,
            target,
            encoder,
            mixing,
        })
        .await
    }

    /// Stop one task, or every task of this session with `None`.
    pub async fn stop_publish_media_stream(&self, task_id: Option<TaskId>) -> Result<(), RtcError> {
        self.command(SessionCommand::StopPublishMediaStream(task_id))
            .await
    }

    pub async fn publish_tasks(&self) -> Result<Vec<PublishTaskView>, RtcError> {
        self.request(|respond_to| SessionMessage::PublishTasks { respond_to })
            .await
    }

    // --- Messaging --------------------------------------------------------

    pub async fn send_custom_cmd_msg(
        &self,
        cmd_id: u32,
        data: Bytes,
        reliable: bool,
        ordered: bool,
    ) -> Result<(), RtcError> {
        self.command(SessionCommand::SendCustomCmdMsg {
            cmd_id,
            data,
            reliable,
            ordered,
        })
        .await
    }

    pub async fn send_sei_msg(&self, data: Bytes, repeat_count: u32) -> Result<(), RtcError> {
        self.command(SessionCommand::SendSeiMsg { data, repeat_count })
            .await
    }

    // --- Diagnostics ------------------------------------------------------

    pub async fn start_speed_test(&self, params: SpeedTestParams) -> Result<(), RtcError> {
        self.command(SessionCommand::StartSpeedTest(params)).await
    }

    pub async fn stop_speed_test(&self) -> Result<(), RtcError> {
        self.command(SessionCommand::StopSpeedTest).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, RtcError> {
        self.request(|respond_to| SessionMessage::Snapshot { respond_to })
            .await
    }

    /// Cancel the actor. The room is left and devices released.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_id: SessionId,
    receiver: mpsc::Receiver<SessionMessage>,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    cancel_token: CancellationToken,
    ctx: SessionContext,
    dispatcher: Arc<EventDispatcher>,
    mailbox: MailboxMonitor,

    room: RoomStateMachine,
    registry: StreamRegistry,
    publish: PublishTaskManager,
    local: LocalMedia,
    limiter: CustomMessageLimiter,

    user_id: Option<String>,
    enter_started: Option<Instant>,
    speed_test_running: bool,
    created_at: DateTime<Utc>,
}

impl SessionActor {
    /// Spawn a session actor and attach it to the engine.
    pub fn spawn(
        session_id: SessionId,
        ctx: SessionContext,
        mailbox_capacity: usize,
        cancel_token: CancellationToken,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(mailbox_capacity.max(1));
        let (sink, engine_events) = EngineEventSink::channel();
        let dispatcher = Arc::new(EventDispatcher::new());

        ctx.engine.attach(session_id, sink);

        let actor = Self {
            session_id,
            receiver,
            engine_events,
            cancel_token: cancel_token.clone(),
            ctx,
            dispatcher: Arc::clone(&dispatcher),
            mailbox: MailboxMonitor::new(
                ActorType::Session,
                session_id.to_string(),
                mailbox_capacity,
            ),
            room: RoomStateMachine::new(),
            registry: StreamRegistry::new(),
            publish: PublishTaskManager::new(),
            local: LocalMedia::default(),
            limiter: CustomMessageLimiter::new(),
            user_id: None,
            enter_started: None,
            speed_test_running: false,
            created_at: Utc::now(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionHandle {
            session_id,
            sender,
            cancel_token,
            dispatcher,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rtc.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        debug!(
            target: "rtc.actor.session",
            session_id = %self.session_id,
            "SessionActor started"
        );

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "rtc.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    break;
                }

                Some(event) = self.engine_events.recv() => {
                    self.ctx.metrics.record_engine_event();
                    self.handle_engine_event(event);
                    self.reconcile_publisher();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.ctx.metrics.record_message_processed();
                        }
                        None => {
                            debug!(
                                target: "rtc.actor.session",
                                session_id = %self.session_id,
                                "SessionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }

            }
        }

        self.teardown();

        info!(
            target: "rtc.actor.session",
            session_id = %self.session_id,
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    /// Leave the room without waiting for the engine and detach.
    fn teardown(&mut self) {
        self.exit_room();
        if let Some(event) = self.room.complete_exit(ExitReason::Voluntary) {
            self.emit(event);
        }
        if self.speed_test_running {
            self.speed_test_running = false;
            self.submit(EngineIntent::StopSpeedTest);
        }
        self.release_local_capture();
        self.ctx.devices.release_all(self.session_id);
        self.ctx.arbiter.release(self.session_id);
        self.ctx.engine.detach(self.session_id);
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Command {
                command,
                respond_to,
            } => {
                let name = command.name();
                let result = self.handle_command(command);
                self.record_outcome(name, result.as_ref().err());
                self.reconcile_publisher();
                let _ = respond_to.send(result);
            }

            SessionMessage::StartPublish {
                target,
                encoder,
                mixing,
                respond_to,
            } => {
                let result = self.start_publish(target, encoder, mixing);
                self.record_outcome("start_publish_media_stream", result.as_ref().err());
                let _ = respond_to.send(result);
            }

            SessionMessage::QueryStream {
                user_id,
                stream_type,
                respond_to,
            } => {
                let _ = respond_to.send((
                    self.registry.query(&user_id, stream_type),
                    self.registry.stream(&user_id, stream_type),
                ));
            }

            SessionMessage::PublishTasks { respond_to } => {
                let _ = respond_to.send(self.publish.tasks());
            }

            SessionMessage::ScreenCaptureSources { respond_to } => {
                let _ = respond_to.send(self.screen_capture_sources());
            }

            SessionMessage::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    fn record_outcome(&self, command: &'static str, error: Option<&RtcError>) {
        let outcome = match error {
            None => "accepted",
            Some(RtcError::Validation(_)) => "invalid",
            Some(RtcError::State(conflict)) => {
                metrics::record_state_conflict(conflict.kind());
                "conflict"
            }
            Some(RtcError::Unsupported(_)) => "unsupported",
            Some(RtcError::Device(_)) => "device_error",
            Some(RtcError::Internal(_)) => "internal",
        };
        metrics::record_command(command, outcome);
        if let Some(error) = error {
            debug!(
                target: "rtc.actor.session",
                session_id = %self.session_id,
                command,
                error = %error,
                "Command rejected"
            );
        }
    }

    #[allow(clippy::too_many_lines)]
    fn handle_command(&mut self, command: SessionCommand) -> Result<(), RtcError> {
        match command {
            SessionCommand::EnterRoom { params, scene } => self.enter_room(params, scene),
            SessionCommand::ExitRoom => {
                self.exit_room();
                Ok(())
            }
            SessionCommand::SwitchRole {
                role,
                private_map_key,
            } => self.switch_role(role, private_map_key),
            SessionCommand::SwitchRoom(config) => self.switch_room(config),
            SessionCommand::ConnectOtherRoom(target) => {
                validator::validate_user_id(&target.user_id)?;
                validator::validate_room_ref(&target.room)?;
                self.room.connect_other_room(target.clone())?;
                self.submit(EngineIntent::ConnectOtherRoom(target));
                Ok(())
            }
            SessionCommand::DisconnectOtherRoom => {
                self.room.disconnect_other_room()?;
                self.submit(EngineIntent::DisconnectOtherRoom);
                Ok(())
            }
            SessionCommand::SetDefaultStreamRecvMode {
                auto_audio,
                auto_video,
            } => {
                self.local.recv_mode = RecvMode {
                    auto_audio,
                    auto_video,
                };
                Ok(())
            }

            SessionCommand::StartRemoteView {
                user_id,
                stream_type,
                target,
            } => {
                self.require_joined()?;
                validator::validate_user_id(&user_id)?;
                let effects = self.registry.subscribe(&user_id, stream_type, target);
                self.apply_registry(effects);
                Ok(())
            }
            SessionCommand::UpdateRemoteView {
                user_id,
                stream_type,
                target,
            } => {
                self.require_joined()?;
                let effects = self.registry.update_target(&user_id, stream_type, target)?;
                self.apply_registry(effects);
                Ok(())
            }
            SessionCommand::StopRemoteView {
                user_id,
                stream_type,
            } => {
                self.require_joined()?;
                let effects = self.registry.unsubscribe(&user_id, stream_type);
                self.apply_registry(effects);
                Ok(())
            }
            SessionCommand::StopAllRemoteView => {
                self.require_joined()?;
                let effects = self.registry.unsubscribe_all();
                self.apply_registry(effects);
                Ok(())
            }
            SessionCommand::MuteRemoteVideo {
                user_id,
                stream_type,
                mute,
            } => {
                self.require_joined()?;
                let effects =
                    self.registry
                        .set_video_mute(UserScope::User(user_id), stream_type, mute);
                self.apply_registry(effects);
                Ok(())
            }
            SessionCommand::MuteAllRemoteVideo(mute) => {
                self.require_joined()?;
                let effects = self
                    .registry
                    .set_video_mute(UserScope::All, StreamType::Big, mute);
                self.apply_registry(effects);
                Ok(())
            }
            SessionCommand::MuteRemoteAudio { user_id, mute } => {
                self.require_joined()?;
                let effects = self.registry.set_audio_mute(UserScope::User(user_id), mute);
                self.apply_registry(effects);
                Ok(())
            }
            SessionCommand::MuteAllRemoteAudio(mute) => {
                self.require_joined()?;
                let effects = self.registry.set_audio_mute(UserScope::All, mute);
                self.apply_registry(effects);
                Ok(())
            }
            SessionCommand::SetRemoteVideoStreamType {
                user_id,
                stream_type,
            } => {
                self.require_joined()?;
                if stream_type == StreamType::Sub {
                    return Err(ValidationError::InvalidStreamType.into());
                }
                let effects = self.registry.switch_camera_stream(&user_id, stream_type)?;
                self.apply_registry(effects);
                Ok(())
            }
            SessionCommand::SetRemoteAudioVolume { user_id, volume } => {
                self.require_joined()?;
                validator::validate_volume(volume)?;
                self.submit(EngineIntent::SetRemoteAudioVolume { user_id, volume });
                Ok(())
            }

            SessionCommand::StartLocalAudio(quality) => self.start_local_audio(quality),
            SessionCommand::StopLocalAudio => {
                if self.local.microphone.take().is_some() {
                    self.ctx
                        .devices
                        .close(self.session_id, DeviceKind::Microphone);
                    self.submit(EngineIntent::StopLocalAudio);
                }
                Ok(())
            }
            SessionCommand::MuteLocalAudio(mute) => {
                let mut next = self.local.clone();
                next.audio_muted = mute;
                self.claim_publisher(&next)?;
                self.local = next;
                self.submit(EngineIntent::MuteLocalAudio(mute));
                Ok(())
            }
            SessionCommand::StartLocalPreview { facing, target } => {
                self.start_local_preview(facing, target)
            }
            SessionCommand::UpdateLocalView(target) => {
                if let Some(camera) = self.local.camera.as_mut() {
                    camera.target.clone_from(&target);
                }
                self.submit(EngineIntent::UpdateLocalView(target));
                Ok(())
            }
            SessionCommand::StopLocalPreview => {
                if self.local.camera.take().is_some() {
                    self.ctx.devices.close(self.session_id, DeviceKind::Camera);
                    self.submit(EngineIntent::StopLocalPreview);
                }
                Ok(())
            }
            SessionCommand::MuteLocalVideo { stream_type, mute } => {
                let mut next = self.local.clone();
                match stream_type {
                    StreamType::Big => next.big_video_muted = mute,
                    StreamType::Sub => next.sub_video_muted = mute,
                    StreamType::Small => return Err(ValidationError::InvalidStreamType.into()),
                }
                self.claim_publisher(&next)?;
                self.local = next;
                self.submit(EngineIntent::MuteLocalVideo { stream_type, mute });
                Ok(())
            }
            SessionCommand::SetVideoEncoderParam(param) => {
                validator::validate_video_enc_param(&param)?;
                self.local.encoder = param;
                self.submit(EngineIntent::SetVideoEncoderParam(param));
                Ok(())
            }
            SessionCommand::EnableSmallVideoStream { enable, param } => {
                if !self.ctx.engine.capabilities().small_stream {
                    return Err(RtcError::Unsupported("small video stream".to_string()));
                }
                if enable {
                    validator::validate_video_enc_param(&param)?;
                }
                self.local.small_stream = enable.then_some(param);
                self.submit(EngineIntent::EnableSmallVideoStream { enable, param });
                Ok(())
            }
            SessionCommand::SetAudioCaptureVolume(volume) => {
                validator::validate_volume(volume)?;
                self.local.capture_volume = volume;
                self.submit(EngineIntent::SetAudioCaptureVolume(volume));
                Ok(())
            }
            SessionCommand::SetAudioPlayoutVolume(volume) => {
                validator::validate_volume(volume)?;
                self.local.playout_volume = volume;
                self.submit(EngineIntent::SetAudioPlayoutVolume(volume));
                Ok(())
            }
            SessionCommand::EnableAudioVolumeEvaluation {
                interval_ms,
                enable_vad,
            } => {
                let interval_ms = clamp_evaluation_interval(interval_ms);
                self.local.volume_evaluation = (interval_ms > 0).then_some(VolumeEvaluation {
                    interval_ms,
                    enable_vad,
                });
                self.submit(EngineIntent::EnableAudioVolumeEvaluation {
                    interval_ms,
                    enable_vad,
                });
                Ok(())
            }
            SessionCommand::StartAudioRecording(params) => {
                if !self.ctx.engine.capabilities().audio_recording {
                    return Err(RtcError::Unsupported("audio recording".to_string()));
                }
                params.format()?;
                if self.local.recording.is_some() {
                    return Err(StateConflict::RecordingInProgress.into());
                }
                self.local.recording = Some(params.clone());
                self.submit(EngineIntent::StartAudioRecording(params));
                Ok(())
            }
            SessionCommand::StopAudioRecording => {
                if self.local.recording.take().is_some() {
                    self.submit(EngineIntent::StopAudioRecording);
                }
                Ok(())
            }

            SessionCommand::SelectScreenCaptureTarget(source_id) => {
                let sources = self.screen_capture_sources()?;
                if !sources.iter().any(|s| s.id == source_id) {
                    return Err(ValidationError::UnknownScreenSource.into());
                }
                self.local.selected_screen_source = Some(source_id);
                Ok(())
            }
            SessionCommand::StartScreenCapture {
                target,
                stream_type,
                param,
            } => self.start_screen_capture(target, stream_type, param),
            SessionCommand::PauseScreenCapture => {
                let screen = self
                    .local
                    .screen
                    .as_mut()
                    .filter(|s| s.state == ScreenCaptureState::Active)
                    .ok_or(StateConflict::ScreenCaptureNotActive)?;
                screen.state = ScreenCaptureState::Paused;
                self.submit(EngineIntent::PauseScreenCapture);
                Ok(())
            }
            SessionCommand::ResumeScreenCapture => {
                let screen = self
                    .local
                    .screen
                    .as_mut()
                    .filter(|s| s.state == ScreenCaptureState::Paused)
                    .ok_or(StateConflict::ScreenCaptureNotActive)?;
                screen.state = ScreenCaptureState::Active;
                self.submit(EngineIntent::ResumeScreenCapture);
                Ok(())
            }
            SessionCommand::StopScreenCapture => {
                if self.local.screen.take().is_none() {
                    return Err(StateConflict::ScreenCaptureNotActive.into());
                }
                self.ctx.devices.close(self.session_id, DeviceKind::Display);
                self.submit(EngineIntent::StopScreenCapture);
                self.emit(RtcEvent::ScreenCaptureChanged {
                    state: ScreenCaptureState::Idle,
                    reason: 0,
                });
                Ok(())
            }

            SessionCommand::EnableCustomVideoCapture {
                stream_type,
                enable,
            } => {
                self.require_custom_capture()?;
                if stream_type == StreamType::Small {
                    return Err(ValidationError::InvalidStreamType.into());
                }
                let mut next = self.local.clone();
                if enable {
                    next.custom_video.insert(stream_type);
                } else {
                    next.custom_video.remove(&stream_type);
                }
                self.claim_publisher(&next)?;
                self.local = next;
                self.submit(EngineIntent::EnableCustomVideoCapture {
                    stream_type,
                    enable,
                });
                Ok(())
            }
            SessionCommand::SendCustomVideoFrame { stream_type, frame } => {
                if !self.local.custom_video.contains(&stream_type) {
                    return Err(StateConflict::CustomCaptureDisabled.into());
                }
                validator::validate_video_frame(&frame)?;
                self.submit(EngineIntent::SendCustomVideoFrame { stream_type, frame });
                Ok(())
            }
            SessionCommand::EnableCustomAudioCapture(enable) => {
                self.require_custom_capture()?;
                let mut next = self.local.clone();
                next.custom_audio = enable;
                self.claim_publisher(&next)?;
                self.local = next;
                self.submit(EngineIntent::EnableCustomAudioCapture(enable));
                Ok(())
            }
            SessionCommand::SendCustomAudioFrame(frame) => {
                if !self.local.custom_audio {
                    return Err(StateConflict::CustomCaptureDisabled.into());
                }
                validator::validate_audio_frame(&frame)?;
                self.submit(EngineIntent::SendCustomAudioFrame(frame));
                Ok(())
            }

            SessionCommand::UpdatePublishMediaStream {
                task_id,
                target,
                encoder,
                mixing,
            } => {
                self.require_joined()?;
                let effects = self.publish.update(&task_id, target, encoder, mixing)?;
                self.apply_publish(effects);
                Ok(())
            }
            SessionCommand::StopPublishMediaStream(task_id) => {
                let effects = self.publish.stop(task_id.as_ref())?;
                self.apply_publish(effects);
                Ok(())
            }

            SessionCommand::SendCustomCmdMsg {
                cmd_id,
                data,
                reliable,
                ordered,
            } => {
                self.require_joined()?;
                messaging::validate_custom_cmd(cmd_id, &data, reliable, ordered)?;
                self.require_anchor()?;
                self.limiter.try_acquire(1, data.len())?;
                self.submit(EngineIntent::SendCustomCmdMsg {
                    cmd_id,
                    data,
                    reliable,
                    ordered,
                });
                Ok(())
            }
            SessionCommand::SendSeiMsg { data, repeat_count } => {
                self.require_joined()?;
                messaging::validate_sei(&data, repeat_count)?;
                self.require_anchor()?;
                let repeats = usize::try_from(repeat_count).unwrap_or(usize::MAX);
                self.limiter.try_acquire(repeats, data.len())?;
                self.submit(EngineIntent::SendSeiMsg { data, repeat_count });
                Ok(())
            }

            SessionCommand::StartSpeedTest(params) => {
                if !self.ctx.engine.capabilities().speed_test {
                    return Err(RtcError::Unsupported("network speed test".to_string()));
                }
                validator::validate_speed_test(&params)?;
                if self.room.in_room() {
                    return Err(StateConflict::SpeedTestWhileInRoom.into());
                }
                if self.speed_test_running {
                    return Err(StateConflict::SpeedTestInProgress.into());
                }
                self.speed_test_running = true;
                self.submit(EngineIntent::StartSpeedTest(params));
                Ok(())
            }
            SessionCommand::StopSpeedTest => {
                self.stop_speed_test();
                Ok(())
            }
        }
    }

    // --- Room commands ----------------------------------------------------

    fn enter_room(&mut self, params: EnterRoomParams, scene: AppScene) -> Result<(), RtcError> {
        let entry = validator::validate_enter_room(&params, scene)?;
        self.room.require_idle()?;
        self.claim_publisher_with(&self.local, true, entry.role)?;

        // Results would be skewed by the call's own traffic.
        self.stop_speed_test();

        self.registry.reset_for_room(self.local.recv_mode);
        self.room
            .begin_enter(entry.room.clone(), scene, entry.role)?;
        self.user_id = Some(params.user_id.clone());
        self.enter_started = Some(Instant::now());

        info!(
            target: "rtc.actor.session",
            session_id = %self.session_id,
            user_id = %params.user_id,
            room = %entry.room,
            scene = scene.as_str(),
            role = entry.role.as_str(),
            "Entering room"
        );

        self.submit(EngineIntent::EnterRoom {
            sdk_app_id: params.sdk_app_id,
            user_id: params.user_id,
            user_sig: params.user_sig,
            room: entry.room,
            scene,
            role: entry.role,
            private_map_key: params.private_map_key,
            stream_id: params.stream_id,
            recv_mode: self.local.recv_mode,
        });
        Ok(())
    }

    /// Begin leaving the room. Cancels pending commands, stops publish
    /// tasks, releases devices and clears the registry before the engine
    /// is asked to exit.
    fn exit_room(&mut self) {
        let Some(cancelled) = self.room.begin_exit() else {
            debug!(
                target: "rtc.actor.session",
                session_id = %self.session_id,
                "exit_room ignored: not in a room"
            );
            return;
        };

        info!(
            target: "rtc.actor.session",
            session_id = %self.session_id,
            cancelled = cancelled.len(),
            "Exiting room"
        );

        for event in cancelled {
            self.emit(event);
        }
        self.release_room_state();
        self.release_local_capture();
        self.submit(EngineIntent::ExitRoom);
    }

    /// Drop room-scoped remote state: publish tasks and the registry.
    fn release_room_state(&mut self) {
        let effects = self.publish.abandon_all();
        self.apply_publish(effects);
        let effects = self.registry.clear();
        self.apply_registry(effects);
        self.enter_started = None;
    }

    /// Stop every local capture, close devices and reset mute flags.
    fn release_local_capture(&mut self) {
        if self.local.recording.is_some() {
            self.submit(EngineIntent::StopAudioRecording);
        }
        if self.local.screen.is_some() {
            self.submit(EngineIntent::StopScreenCapture);
            self.emit(RtcEvent::ScreenCaptureChanged {
                state: ScreenCaptureState::Idle,
                reason: 0,
            });
        }
        if self.local.microphone.is_some() {
            self.submit(EngineIntent::StopLocalAudio);
        }
        if self.local.camera.is_some() {
            self.submit(EngineIntent::StopLocalPreview);
        }
        let custom_video: Vec<StreamType> = self.local.custom_video.iter().copied().collect();
        for stream_type in custom_video {
            self.submit(EngineIntent::EnableCustomVideoCapture {
                stream_type,
                enable: false,
            });
        }
        if self.local.custom_audio {
            self.submit(EngineIntent::EnableCustomAudioCapture(false));
        }
        self.ctx.devices.release_all(self.session_id);
        self.local.reset_for_exit();
        self.ctx.arbiter.release(self.session_id);
    }

    fn switch_role(
        &mut self,
        role: Role,
        private_map_key: Option<SecretString>,
    ) -> Result<(), RtcError> {
        self.room.require_stable()?;
        self.claim_publisher_with(&self.local, true, role)?;
        match self.room.switch_role(role)? {
            RoleSwitch::Unchanged => {
                self.emit(RtcEvent::RoleSwitched {
                    role,
                    code: 0,
                    message: String::new(),
                });
            }
            RoleSwitch::Pending => {
                self.submit(EngineIntent::SwitchRole {
                    role,
                    private_map_key,
                });
            }
        }
        Ok(())
    }

    fn switch_room(&mut self, config: SwitchRoomConfig) -> Result<(), RtcError> {
        let target = config.room.resolve_prefer_numeric()?;
        validator::validate_room_ref(&target)?;
        if config
            .user_sig
            .as_ref()
            .is_some_and(|sig| sig.expose_secret().is_empty())
        {
            return Err(ValidationError::MissingCredential.into());
        }
        self.room.switch_room(target.clone())?;
        self.submit(EngineIntent::SwitchRoom {
            room: target,
            user_sig: config.user_sig,
            private_map_key: config.private_map_key,
        });
        Ok(())
    }

    // --- Local media commands ---------------------------------------------

    fn start_local_audio(&mut self, quality: AudioQuality) -> Result<(), RtcError> {
        let mut next = self.local.clone();
        next.microphone = Some(quality);
        self.claim_publisher(&next)?;
        if self.local.microphone.is_none() {
            self.ctx
                .devices
                .open(self.session_id, DeviceKind::Microphone, None)?;
        }
        self.local = next;
        self.submit(EngineIntent::StartLocalAudio(quality));
        Ok(())
    }

    fn start_local_preview(
        &mut self,
        facing: CameraFacing,
        target: Option<RenderTarget>,
    ) -> Result<(), RtcError> {
        if facing == CameraFacing::Rear && !self.ctx.devices.capabilities().camera_switch {
            return Err(RtcError::Unsupported("rear camera selection".to_string()));
        }
        let mut next = self.local.clone();
        next.camera = Some(CameraPreview {
            facing,
            target: target.clone(),
        });
        self.claim_publisher(&next)?;
        if self.local.camera.is_none() {
            self.ctx
                .devices
                .open(self.session_id, DeviceKind::Camera, None)?;
        }
        self.local = next;
        self.submit(EngineIntent::StartLocalPreview { facing, target });
        Ok(())
    }

    fn screen_capture_sources(&self) -> Result<Vec<ScreenCaptureSource>, RtcError> {
        if !self.ctx.devices.capabilities().screen_capture {
            return Err(RtcError::Unsupported("screen capture".to_string()));
        }
        Ok(self.ctx.devices.screen_capture_sources()?)
    }

    fn start_screen_capture(
        &mut self,
        target: Option<RenderTarget>,
        stream_type: StreamType,
        param: VideoEncParam,
    ) -> Result<(), RtcError> {
        if stream_type == StreamType::Small {
            return Err(ValidationError::InvalidStreamType.into());
        }
        validator::validate_video_enc_param(&param)?;
        if self.local.screen.is_some() {
            return Err(StateConflict::ScreenCaptureActive.into());
        }
        let source_id = match &self.local.selected_screen_source {
            Some(id) => id.clone(),
            None => self
                .screen_capture_sources()?
                .into_iter()
                .next()
                .map(|s| s.id)
                .ok_or(ValidationError::UnknownScreenSource)?,
        };

        let mut next = self.local.clone();
        next.screen = Some(ScreenCapture {
            source_id: source_id.clone(),
            stream_type,
            state: ScreenCaptureState::Active,
        });
        self.claim_publisher(&next)?;
        self.ctx
            .devices
            .open(self.session_id, DeviceKind::Display, Some(&source_id))?;
        self.local = next;
        self.submit(EngineIntent::StartScreenCapture {
            source_id,
            stream_type,
            param,
            target,
        });
        Ok(())
    }

    fn require_custom_capture(&self) -> Result<(), RtcError> {
        if self.ctx.engine.capabilities().custom_capture {
            Ok(())
        } else {
            Err(RtcError::Unsupported("custom capture".to_string()))
        }
    }

    fn stop_speed_test(&mut self) {
        if self.speed_test_running {
            self.speed_test_running = false;
            self.submit(EngineIntent::StopSpeedTest);
            self.emit(RtcEvent::SpeedTestCompleted);
        }
    }

    // --- Publishing -------------------------------------------------------

    fn start_publish(
        &mut self,
        target: PublishTarget,
        encoder: Option<StreamEncoderParams>,
        mixing: Option<StreamMixingConfig>,
    ) -> Result<PublishRequestId, RtcError> {
        self.require_joined()?;
        let (request_id, effects) = self.publish.start(target, encoder, mixing)?;
        self.apply_publish(effects);
        metrics::record_publish_task_transition("requested");
        Ok(request_id)
    }

    // --- Guards -----------------------------------------------------------

    fn require_joined(&self) -> Result<(), StateConflict> {
        if self.room.is_joined() {
            return Ok(());
        }
        Err(match self.room.phase() {
            crate::room::SessionPhase::Exiting => StateConflict::ExitInProgress,
            _ => StateConflict::NotInRoom,
        })
    }

    fn require_anchor(&self) -> Result<(), StateConflict> {
        if self.room.role() == Role::Anchor {
            Ok(())
        } else {
            Err(StateConflict::NotAnchor)
        }
    }

    /// Take publisher ownership if `next` would publish in the current room.
    fn claim_publisher(&self, next: &LocalMedia) -> Result<(), StateConflict> {
        self.claim_publisher_with(next, self.room.in_room(), self.room.role())
    }

    fn claim_publisher_with(
        &self,
        local: &LocalMedia,
        in_room: bool,
        role: Role,
    ) -> Result<(), StateConflict> {
        if local.would_publish(in_room, role) {
            self.ctx.arbiter.try_acquire(self.session_id)?;
        }
        Ok(())
    }

    /// Release ownership once nothing is published, or pick it up again
    /// after a rollback restored publishing state.
    fn reconcile_publisher(&self) {
        if self
            .local
            .would_publish(self.room.in_room(), self.room.role())
        {
            if self.ctx.arbiter.try_acquire(self.session_id).is_err() {
                warn!(
                    target: "rtc.actor.session",
                    session_id = %self.session_id,
                    "Publishing while another session owns local media"
                );
            }
        } else {
            self.ctx.arbiter.release(self.session_id);
        }
    }

    // --- Effects ----------------------------------------------------------

    fn submit(&self, intent: EngineIntent) {
        debug!(
            target: "rtc.actor.session",
            session_id = %self.session_id,
            intent = intent.name(),
            "Submitting engine intent"
        );
        self.ctx.engine.submit(self.session_id, intent);
    }

    fn emit(&self, event: RtcEvent) {
        self.dispatcher.dispatch(&event);
    }

    fn apply_registry(&self, effects: Vec<RegistryEffect>) {
        for effect in effects {
            match effect {
                RegistryEffect::Engine(intent) => self.submit(intent),
                RegistryEffect::Changed(change) => {
                    self.emit(RtcEvent::StreamAvailabilityChanged {
                        user_id: change.user_id,
                        stream_type: change.stream_type,
                        state: change.state,
                        available: change.available,
                    });
                }
            }
        }
    }

    fn apply_publish(&self, effects: Vec<PublishEffect>) {
        for effect in effects {
            match effect {
                PublishEffect::Engine(intent) => self.submit(intent),
                PublishEffect::Updated(update) => {
                    metrics::record_publish_task_transition(update.state.as_str());
                    self.emit(RtcEvent::PublishTaskUpdated {
                        request_id: update.request_id,
                        task_id: update.task_id,
                        state: update.state,
                        code: update.code,
                        message: update.message,
                    });
                }
            }
        }
    }

    fn stale(&self, event: &'static str) {
        debug!(
            target: "rtc.actor.session",
            session_id = %self.session_id,
            event,
            phase = self.room.phase().as_str(),
            "Dropping stale engine event"
        );
    }

    // --- Engine events ----------------------------------------------------

    #[allow(clippy::too_many_lines)]
    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::EnterRoomResult { result } => {
                let Some(event) = self.room.complete_enter(result) else {
                    return self.stale("enter_room_result");
                };
                let success = result >= 0;
                let elapsed = if success {
                    Duration::from_millis(u64::try_from(result).unwrap_or(0))
                } else {
                    self.enter_started
                        .map_or(Duration::ZERO, |started| started.elapsed())
                };
                metrics::record_room_enter(elapsed, success);
                if success {
                    info!(
                        target: "rtc.actor.session",
                        session_id = %self.session_id,
                        elapsed_ms = result,
                        "Room entered"
                    );
                } else {
                    warn!(
                        target: "rtc.actor.session",
                        session_id = %self.session_id,
                        code = result,
                        "Room entry failed"
                    );
                    self.release_room_state();
                    self.user_id = None;
                }
                self.emit(event);
            }

            EngineEvent::ExitRoomCompleted { reason } => {
                if self.room.in_room() {
                    // Kicked or dismissed: clean up as for a local exit.
                    if let Some(cancelled) = self.room.begin_exit() {
                        for event in cancelled {
                            self.emit(event);
                        }
                        self.release_room_state();
                        self.release_local_capture();
                    }
                }
                let Some(event) = self.room.complete_exit(reason) else {
                    return self.stale("exit_room_completed");
                };
                info!(
                    target: "rtc.actor.session",
                    session_id = %self.session_id,
                    reason = ?reason,
                    "Room exited"
                );
                self.user_id = None;
                self.emit(event);
            }

            EngineEvent::SwitchRoleResult { code, message } => {
                match self.room.complete_switch_role(code, &message) {
                    Some(event) => self.emit(event),
                    None => self.stale("switch_role_result"),
                }
            }

            EngineEvent::SwitchRoomResult { code, message } => {
                let Some(outcome) = self.room.complete_switch_room(code, &message) else {
                    return self.stale("switch_room_result");
                };
                if outcome.switched {
                    self.release_room_state();
                    self.registry.reset_for_room(self.local.recv_mode);
                    // Audience members leave and rejoin; anchors keep capturing.
                    if self.room.role() == Role::Audience {
                        self.release_local_capture();
                    }
                }
                self.emit(outcome.event);
                if let Some(event) = outcome.cross_room {
                    self.emit(event);
                }
            }

            EngineEvent::ConnectOtherRoomResult {
                user_id,
                room,
                code,
                message,
            } => match self.room.complete_connect(&user_id, &room, code, &message) {
                Some(event) => self.emit(event),
                None => self.stale("connect_other_room_result"),
            },

            EngineEvent::DisconnectOtherRoomResult { code, message } => {
                match self.room.complete_disconnect(code, &message) {
                    Some(event) => self.emit(event),
                    None => self.stale("disconnect_other_room_result"),
                }
            }

            EngineEvent::CrossRoomPeerConnected { user_id, room } => {
                match self.room.peer_connected(&user_id, &room) {
                    Some(event) => self.emit(event),
                    None => self.stale("cross_room_peer_connected"),
                }
            }

            EngineEvent::CrossRoomPeerDisconnected { user_id } => {
                match self.room.peer_disconnected(&user_id) {
                    Some(event) => self.emit(event),
                    None => self.stale("cross_room_peer_disconnected"),
                }
            }

            EngineEvent::RemoteUserEntered { user_id } => {
                if !self.room.is_joined() {
                    return self.stale("remote_user_entered");
                }
                self.registry.user_entered(&user_id);
                self.emit(RtcEvent::RemoteUserEntered { user_id });
            }

            EngineEvent::RemoteUserLeft { user_id, reason } => {
                if !self.room.is_joined() {
                    return self.stale("remote_user_left");
                }
                let effects = self.registry.remove_user(&user_id);
                self.apply_registry(effects);
                self.emit(RtcEvent::RemoteUserLeft { user_id, reason });
            }

            EngineEvent::RemoteVideoAvailable {
                user_id,
                stream_type,
                available,
            } => {
                if !self.room.is_joined() {
                    return self.stale("remote_video_available");
                }
                let effects = self.registry.set_available(&user_id, stream_type, available);
                self.apply_registry(effects);
            }

            EngineEvent::RemoteAudioAvailable { user_id, available } => {
                if !self.room.is_joined() {
                    return self.stale("remote_audio_available");
                }
                self.registry.set_audio_available(&user_id, available);
                self.emit(RtcEvent::RemoteAudioAvailable { user_id, available });
            }

            EngineEvent::RemoteViewStarted {
                user_id,
                stream_type,
                code,
            } => {
                if !self.room.is_joined() {
                    return self.stale("remote_view_started");
                }
                let effects = self.registry.complete_subscribe(&user_id, stream_type, code);
                self.apply_registry(effects);
            }

            EngineEvent::PublishMediaStreamStarted {
                request_id,
                task_id,
                code,
                message,
            } => {
                let effects = self
                    .publish
                    .complete_start(request_id, task_id, code, &message);
                self.apply_publish(effects);
            }

            EngineEvent::PublishMediaStreamUpdated {
                task_id,
                code,
                message,
            } => {
                let effects = self.publish.complete_update(&task_id, code, &message);
                self.apply_publish(effects);
            }

            EngineEvent::PublishMediaStreamStopped {
                task_id,
                code,
                message,
            } => {
                let effects = self.publish.complete_stop(&task_id, code, &message);
                self.apply_publish(effects);
            }

            EngineEvent::SpeedTestResult(result) => {
                if !self.speed_test_running {
                    return self.stale("speed_test_result");
                }
                self.emit(RtcEvent::SpeedTest(result));
            }

            EngineEvent::SpeedTestCompleted => {
                if !self.speed_test_running {
                    return self.stale("speed_test_completed");
                }
                self.speed_test_running = false;
                self.emit(RtcEvent::SpeedTestCompleted);
            }

            EngineEvent::CustomCmdMsgReceived {
                user_id,
                cmd_id,
                seq,
                data,
            } => {
                if !self.room.is_joined() {
                    return self.stale("custom_cmd_msg_received");
                }
                self.emit(RtcEvent::CustomCmdMsgReceived {
                    user_id,
                    cmd_id,
                    seq,
                    data,
                });
            }

            EngineEvent::SeiMsgReceived { user_id, data } => {
                if !self.room.is_joined() {
                    return self.stale("sei_msg_received");
                }
                self.emit(RtcEvent::SeiMsgReceived { user_id, data });
            }

            EngineEvent::ScreenCaptureStateChanged { state, reason } => {
                let Some(screen) = self.local.screen.as_mut() else {
                    return self.stale("screen_capture_state_changed");
                };
                if state == ScreenCaptureState::Idle {
                    self.local.screen = None;
                    self.ctx.devices.close(self.session_id, DeviceKind::Display);
                } else {
                    screen.state = state;
                }
                self.emit(RtcEvent::ScreenCaptureChanged { state, reason });
            }

            EngineEvent::ConnectionStateChanged { state } => {
                self.emit(RtcEvent::ConnectionStateChanged { state });
            }

            EngineEvent::NetworkQuality { local } => {
                self.emit(RtcEvent::NetworkQuality { local });
            }

            EngineEvent::UserVoiceVolume { volumes, total } => {
                self.emit(RtcEvent::UserVoiceVolume { volumes, total });
            }

            EngineEvent::Error { code, message } => {
                warn!(
                    target: "rtc.actor.session",
                    session_id = %self.session_id,
                    code,
                    message = %message,
                    "Engine reported error"
                );
                self.emit(RtcEvent::Error { code, message });
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            phase: self.room.phase(),
            role: self.room.role(),
            scene: self.room.scene(),
            room: self.room.room().cloned(),
            user_id: self.user_id.clone(),
            local: self.local.snapshot(),
            remote_users: self.registry.remote_users(),
            remote_streams: self.registry.len(),
            remote_mutes_set: self.registry.has_mute_state(),
            publish_tasks: self.publish.tasks(),
            cross_room_peer: self.room.cross_room_peer().cloned(),
            speed_test_running: self.speed_test_running,
            is_publisher: self.ctx.arbiter.owner() == Some(self.session_id),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::loopback::{LoopbackEngine, VirtualDeviceProvider};
    use crate::params::RoomIdentifier;
    use std::sync::Mutex;

    fn context() -> (SessionContext, Arc<LoopbackEngine>) {
        let engine = LoopbackEngine::new();
        let ctx = SessionContext {
            engine: Arc::clone(&engine) as Arc<dyn MediaEngine>,
            devices: Arc::new(VirtualDeviceProvider::default()),
            arbiter: Arc::new(PublishArbiter::new()),
            metrics: ActorMetrics::new(),
        };
        (ctx, engine)
    }

    fn collect(handle: &SessionHandle) -> (Arc<Mutex<Vec<RtcEvent>>>, ObserverRef) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let observer: ObserverRef = Arc::new(move |e: &RtcEvent| {
            sink.lock().unwrap().push(e.clone());
        });
        handle.add_callback(Arc::clone(&observer));
        (events, observer)
    }

    fn enter_params(user_id: &str, room_id: u32) -> EnterRoomParams {
        EnterRoomParams {
            sdk_app_id: 1_400_000_001,
            user_id: user_id.to_string(),
            user_sig: SecretString::from("sig"),
            room: RoomIdentifier::numeric(room_id),
            role: Some(Role::Anchor),
            private_map_key: None,
            stream_id: None,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_enter_and_exit_round_trip() {
        let (ctx, _engine) = context();
        let (handle, _task) =
            SessionActor::spawn(SessionId::new(), ctx, 16, CancellationToken::new());
        let (events, _observer) = collect(&handle);
        let fresh = handle.snapshot().await.unwrap();

        handle
            .enter_room(enter_params("alice", 101), AppScene::Live)
            .await
            .unwrap();
        settle().await;
        let joined = handle.snapshot().await.unwrap();
        assert_eq!(joined.phase, crate::room::SessionPhase::Joined);
        assert_eq!(joined.role, Role::Anchor);

        handle.exit_room().await.unwrap();
        handle.exit_room().await.unwrap();
        settle().await;

        let after = handle.snapshot().await.unwrap();
        assert_eq!(after.phase, fresh.phase);
        assert_eq!(after.role, fresh.role);
        assert_eq!(after.remote_streams, 0);
        assert!(!after.remote_mutes_set);
        assert_eq!(after.local, fresh.local);
        assert!(after.user_id.is_none());

        let names: Vec<&str> = events.lock().unwrap().iter().map(RtcEvent::name).collect();
        assert_eq!(names, vec!["room_entered", "room_exited"]);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_local_errors_do_not_reach_engine() {
        let (ctx, engine) = context();
        let session_id = SessionId::new();
        let (handle, _task) = SessionActor::spawn(session_id, ctx, 16, CancellationToken::new());

        let mut params = enter_params("alice", 101);
        params.role = None;
        let err = handle.enter_room(params, AppScene::Live).await.unwrap_err();
        assert_eq!(err, RtcError::Validation(ValidationError::InvalidScene));

        let err = handle
            .switch_role(Role::Audience, None)
            .await
            .unwrap_err();
        assert_eq!(err, RtcError::State(StateConflict::NotInRoom));

        assert_eq!(engine.submitted(session_id), 0);
        handle.cancel();
    }

    #[tokio::test]
    async fn test_exit_cancels_pending_entry() {
        let (ctx, engine) = context();
        engine.hold_responses(true);
        let (handle, _task) =
            SessionActor::spawn(SessionId::new(), ctx, 16, CancellationToken::new());
        let (events, _observer) = collect(&handle);

        handle
            .enter_room(enter_params("alice", 101), AppScene::Live)
            .await
            .unwrap();
        handle.exit_room().await.unwrap();
        engine.hold_responses(false);
        settle().await;

        let events = events.lock().unwrap().clone();
        assert_eq!(
            events.first(),
            Some(&RtcEvent::RoomEntered {
                room: crate::params::RoomRef::Numeric(101),
                result: i64::from(crate::engine::ERR_CANCELLED),
            })
        );
        handle.cancel();
    }
}
