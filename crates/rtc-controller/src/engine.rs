//! Media engine boundary.
//!
//! The controller drives a [`MediaEngine`] with [`EngineIntent`]s and learns
//! results only through [`EngineEvent`]s posted to the session's
//! [`EngineEventSink`]. `submit` never blocks on the network and never
//! fails synchronously: every network-dependent intent is answered by an
//! event, negative codes included.

use crate::device::RenderTarget;
use crate::params::{
    AppScene, AudioFrame, AudioQuality, AudioRecordingParams, CameraFacing, CrossRoomDescriptor,
    NetworkQuality, PublishTarget, RecvMode, Role, RoomRef, ScreenCaptureState, SpeedTestParams,
    SpeedTestResult, StreamEncoderParams, StreamMixingConfig, StreamType, VideoEncParam,
    VideoFrame,
};
use bytes::Bytes;
use common::secret::SecretString;
use common::types::{PublishRequestId, SessionId, TaskId};
use tokio::sync::mpsc;

/// Completion code for a pending command aborted by `exit_room`.
pub const ERR_CANCELLED: i32 = -2;

/// Optional engine features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities {
    pub custom_capture: bool,
    pub audio_recording: bool,
    pub speed_test: bool,
    pub small_stream: bool,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            custom_capture: true,
            audio_recording: true,
            speed_test: true,
            small_stream: true,
        }
    }
}

/// Capability interface of the underlying audio/video engine.
///
/// Implementations must deliver events for one session in the order they
/// are produced.
pub trait MediaEngine: Send + Sync {
    fn capabilities(&self) -> EngineCapabilities;

    /// Register the channel that receives events for `session_id`.
    fn attach(&self, session_id: SessionId, sink: EngineEventSink);

    /// Drop the session's channel. Pending work for it is discarded.
    fn detach(&self, session_id: SessionId);

    /// Queue an intent. Returns immediately.
    fn submit(&self, session_id: SessionId, intent: EngineIntent);
}

/// Commands issued to the engine after local validation.
#[derive(Debug)]
pub enum EngineIntent {
    EnterRoom {
        sdk_app_id: u32,
        user_id: String,
        user_sig: SecretString,
        room: RoomRef,
        scene: AppScene,
        role: Role,
        private_map_key: Option<SecretString>,
        stream_id: Option<String>,
        recv_mode: RecvMode,
    },
    ExitRoom,
    SwitchRole {
        role: Role,
        private_map_key: Option<SecretString>,
    },
    SwitchRoom {
        room: RoomRef,
        user_sig: Option<SecretString>,
        private_map_key: Option<SecretString>,
    },
    ConnectOtherRoom(CrossRoomDescriptor),
    DisconnectOtherRoom,

    StartRemoteView {
        user_id: String,
        stream_type: StreamType,
        target: Option<RenderTarget>,
    },
    UpdateRemoteView {
        user_id: String,
        stream_type: StreamType,
        target: Option<RenderTarget>,
    },
    StopRemoteView {
        user_id: String,
        stream_type: StreamType,
    },
    StopAllRemoteView,
    SetRemoteVideoStreamType {
        user_id: String,
        stream_type: StreamType,
    },
    MuteRemoteVideo {
        user_id: String,
        stream_type: StreamType,
        mute: bool,
    },
    MuteAllRemoteVideo {
        mute: bool,
    },
    MuteRemoteAudio {
        user_id: String,
        mute: bool,
    },
    MuteAllRemoteAudio {
        mute: bool,
    },
    SetRemoteAudioVolume {
        user_id: String,
        volume: u32,
    },

    StartLocalAudio(AudioQuality),
    StopLocalAudio,
    MuteLocalAudio(bool),
    StartLocalPreview {
        facing: CameraFacing,
        target: Option<RenderTarget>,
    },
    UpdateLocalView(Option<RenderTarget>),
    StopLocalPreview,
    MuteLocalVideo {
        stream_type: StreamType,
        mute: bool,
    },
    SetVideoEncoderParam(VideoEncParam),
    EnableSmallVideoStream {
        enable: bool,
        param: VideoEncParam,
    },
    SetAudioCaptureVolume(u32),
    SetAudioPlayoutVolume(u32),
    EnableAudioVolumeEvaluation {
        /// Zero disables evaluation.
        interval_ms: u32,
        enable_vad: bool,
    },
    StartAudioRecording(AudioRecordingParams),
    StopAudioRecording,

    StartScreenCapture {
        source_id: String,
        stream_type: StreamType,
        param: VideoEncParam,
        target: Option<RenderTarget>,
    },
    PauseScreenCapture,
    ResumeScreenCapture,
    StopScreenCapture,

    EnableCustomVideoCapture {
        stream_type: StreamType,
        enable: bool,
    },
    SendCustomVideoFrame {
        stream_type: StreamType,
        frame: VideoFrame,
    },
    EnableCustomAudioCapture(bool),
    SendCustomAudioFrame(AudioFrame),

    StartPublishMediaStream {
        request_id: PublishRequestId,
        target: PublishTarget,
        encoder: Option<StreamEncoderParams>,
        mixing: Option<StreamMixingConfig>,
    },
    UpdatePublishMediaStream {
        request_id: PublishRequestId,
        task_id: TaskId,
        target: PublishTarget,
        encoder: Option<StreamEncoderParams>,
        mixing: Option<StreamMixingConfig>,
    },
    StopPublishMediaStream {
        task_id: TaskId,
    },

    SendCustomCmdMsg {
        cmd_id: u32,
        data: Bytes,
        reliable: bool,
        ordered: bool,
    },
    SendSeiMsg {
        data: Bytes,
        repeat_count: u32,
    },

    StartSpeedTest(SpeedTestParams),
    StopSpeedTest,
}

impl EngineIntent {
    /// Variant name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            EngineIntent::EnterRoom { .. } => "enter_room",
            EngineIntent::ExitRoom => "exit_room",
            EngineIntent::SwitchRole { .. } => "switch_role",
            EngineIntent::SwitchRoom { .. } => "switch_room",
            EngineIntent::ConnectOtherRoom(_) => "connect_other_room",
            EngineIntent::DisconnectOtherRoom => "disconnect_other_room",
            EngineIntent::StartRemoteView { .. } => "start_remote_view",
            EngineIntent::UpdateRemoteView { .. } => "update_remote_view",
            EngineIntent::StopRemoteView { .. } => "stop_remote_view",
            EngineIntent::StopAllRemoteView => "stop_all_remote_view",
            EngineIntent::SetRemoteVideoStreamType { .. } => "set_remote_video_stream_type",
            EngineIntent::MuteRemoteVideo { .. } => "mute_remote_video",
            EngineIntent::MuteAllRemoteVideo { .. } => "mute_all_remote_video",
            EngineIntent::MuteRemoteAudio { .. } => "mute_remote_audio",
            EngineIntent::MuteAllRemoteAudio { .. } => "mute_all_remote_audio",
            EngineIntent::SetRemoteAudioVolume { .. } => "set_remote_audio_volume",
            EngineIntent::StartLocalAudio(_) => "start_local_audio",
            EngineIntent::StopLocalAudio => "stop_local_audio",
            EngineIntent::MuteLocalAudio(_) => "mute_local_audio",
            EngineIntent::StartLocalPreview { .. } => "start_local_preview",
            EngineIntent::UpdateLocalView(_) => "update_local_view",
            EngineIntent::StopLocalPreview => "stop_local_preview",
            EngineIntent::MuteLocalVideo { .. } => "mute_local_video",
            EngineIntent::SetVideoEncoderParam(_) => "set_video_encoder_param",
            EngineIntent::EnableSmallVideoStream { .. } => "enable_small_video_stream",
            EngineIntent::SetAudioCaptureVolume(_) => "set_audio_capture_volume",
            EngineIntent::SetAudioPlayoutVolume(_) => "set_audio_playout_volume",
            EngineIntent::EnableAudioVolumeEvaluation { .. } => "enable_audio_volume_evaluation",
            EngineIntent::StartAudioRecording(_) => "start_audio_recording",
            EngineIntent::StopAudioRecording => "stop_audio_recording",
            EngineIntent::StartScreenCapture { .. } => "start_screen_capture",
            EngineIntent::PauseScreenCapture => "pause_screen_capture",
            EngineIntent::ResumeScreenCapture => "resume_screen_capture",
            EngineIntent::StopScreenCapture => "stop_screen_capture",
            EngineIntent::EnableCustomVideoCapture { .. } => "enable_custom_video_capture",
            EngineIntent::SendCustomVideoFrame { .. } => "send_custom_video_frame",
            EngineIntent::EnableCustomAudioCapture(_) => "enable_custom_audio_capture",
            EngineIntent::SendCustomAudioFrame(_) => "send_custom_audio_frame",
            EngineIntent::StartPublishMediaStream { .. } => "start_publish_media_stream",
            EngineIntent::UpdatePublishMediaStream { .. } => "update_publish_media_stream",
            EngineIntent::StopPublishMediaStream { .. } => "stop_publish_media_stream",
            EngineIntent::SendCustomCmdMsg { .. } => "send_custom_cmd_msg",
            EngineIntent::SendSeiMsg { .. } => "send_sei_msg",
            EngineIntent::StartSpeedTest(_) => "start_speed_test",
            EngineIntent::StopSpeedTest => "stop_speed_test",
        }
    }
}

/// Why a session left its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The caller asked to leave.
    Voluntary,
    /// Removed by the server or another user.
    Kicked,
    /// The room was dissolved.
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserVolume {
    pub user_id: String,
    pub volume: u32,
}

/// Asynchronous reports from the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// `result >= 0` is the entry latency in ms, negative is an error code.
    EnterRoomResult {
        result: i64,
    },
    ExitRoomCompleted {
        reason: ExitReason,
    },
    SwitchRoleResult {
        code: i32,
        message: String,
    },
    SwitchRoomResult {
        code: i32,
        message: String,
    },
    ConnectOtherRoomResult {
        user_id: String,
        room: RoomRef,
        code: i32,
        message: String,
    },
    DisconnectOtherRoomResult {
        code: i32,
        message: String,
    },
    /// Another room's anchor connected to this one.
    CrossRoomPeerConnected {
        user_id: String,
        room: RoomRef,
    },
    CrossRoomPeerDisconnected {
        user_id: String,
    },
    RemoteUserEntered {
        user_id: String,
    },
    RemoteUserLeft {
        user_id: String,
        reason: i32,
    },
    RemoteVideoAvailable {
        user_id: String,
        stream_type: StreamType,
        available: bool,
    },
    RemoteAudioAvailable {
        user_id: String,
        available: bool,
    },
    /// First frame of a subscribed stream arrived, or the subscription failed.
    RemoteViewStarted {
        user_id: String,
        stream_type: StreamType,
        code: i32,
    },
    PublishMediaStreamStarted {
        request_id: PublishRequestId,
        /// Present on success and on the duplicate-start quirk.
        task_id: Option<TaskId>,
        code: i32,
        message: String,
    },
    PublishMediaStreamUpdated {
        task_id: TaskId,
        code: i32,
        message: String,
    },
    PublishMediaStreamStopped {
        task_id: TaskId,
        code: i32,
        message: String,
    },
    SpeedTestResult(SpeedTestResult),
    SpeedTestCompleted,
    CustomCmdMsgReceived {
        user_id: String,
        cmd_id: u32,
        seq: u32,
        data: Bytes,
    },
    SeiMsgReceived {
        user_id: String,
        data: Bytes,
    },
    ScreenCaptureStateChanged {
        state: ScreenCaptureState,
        reason: i32,
    },
    ConnectionStateChanged {
        state: ConnectionState,
    },
    NetworkQuality {
        local: NetworkQuality,
    },
    UserVoiceVolume {
        volumes: Vec<UserVolume>,
        total: u32,
    },
    Error {
        code: i32,
        message: String,
    },
}

/// Channel a session hands to the engine for its events.
#[derive(Debug, Clone)]
pub struct EngineEventSink {
    sender: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineEventSink {
    #[must_use]
    pub fn new(sender: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { sender }
    }

    /// Create a sink and the receiver that drains it.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Post an event. Returns `false` once the session is gone.
    pub fn post(&self, event: EngineEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_preserves_order() {
        let (sink, mut rx) = EngineEventSink::channel();
        assert!(sink.post(EngineEvent::EnterRoomResult { result: 120 }));
        assert!(sink.post(EngineEvent::RemoteUserEntered {
            user_id: "bob".to_string()
        }));

        assert!(matches!(
            rx.recv().await,
            Some(EngineEvent::EnterRoomResult { result: 120 })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(EngineEvent::RemoteUserEntered { .. })
        ));
    }

    #[test]
    fn test_sink_reports_closed_session() {
        let (sink, rx) = EngineEventSink::channel();
        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.post(EngineEvent::SpeedTestCompleted));
    }

    #[test]
    fn test_intent_names() {
        assert_eq!(EngineIntent::ExitRoom.name(), "exit_room");
        assert_eq!(
            EngineIntent::StopPublishMediaStream {
                task_id: TaskId::from("t")
            }
            .name(),
            "stop_publish_media_stream"
        );
    }
}
