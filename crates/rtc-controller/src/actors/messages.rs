//! Message types for actor communication.
//!
//! Callers reach actors only through `tokio::sync::mpsc` mailboxes.
//! Request-reply uses `tokio::sync::oneshot`.

use super::session::SessionHandle;
use crate::device::RenderTarget;
use crate::errors::RtcError;
use crate::local::LocalMediaSnapshot;
use crate::params::{
    AppScene, AudioFrame, AudioQuality, AudioRecordingParams, CameraFacing, CrossRoomDescriptor,
    EnterRoomParams, PublishTarget, Role, RoomRef, ScreenCaptureSource, SpeedTestParams,
    StreamEncoderParams, StreamMixingConfig, StreamType, SwitchRoomConfig, VideoEncParam,
    VideoFrame,
};
use crate::publish::PublishTaskView;
use crate::registry::{RemoteStreamView, SubscriptionState};
use crate::room::SessionPhase;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::secret::SecretString;
use common::types::{PublishRequestId, SessionId, TaskId};
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `RtcControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Spawn a new session actor.
    CreateSession {
        respond_to: oneshot::Sender<Result<SessionHandle, RtcError>>,
    },

    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<SessionHandle, RtcError>>,
    },

    /// Tear down a session. Its room is exited and devices released.
    DestroySession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<(), RtcError>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<ControllerStatus>,
    },

    /// Stop accepting sessions and cancel every running one.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), RtcError>>,
    },
}

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// A command whose only reply is acceptance or a local error.
    Command {
        command: SessionCommand,
        respond_to: oneshot::Sender<Result<(), RtcError>>,
    },

    StartPublish {
        target: PublishTarget,
        encoder: Option<StreamEncoderParams>,
        mixing: Option<StreamMixingConfig>,
        respond_to: oneshot::Sender<Result<PublishRequestId, RtcError>>,
    },

    QueryStream {
        user_id: String,
        stream_type: StreamType,
        respond_to: oneshot::Sender<(SubscriptionState, Option<RemoteStreamView>)>,
    },

    PublishTasks {
        respond_to: oneshot::Sender<Vec<PublishTaskView>>,
    },

    ScreenCaptureSources {
        respond_to: oneshot::Sender<Result<Vec<ScreenCaptureSource>, RtcError>>,
    },

    Snapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}

/// Session commands that complete locally.
///
/// Network-dependent commands report their outcome through an event.
#[derive(Debug)]
pub enum SessionCommand {
    EnterRoom {
        params: EnterRoomParams,
        scene: AppScene,
    },
    ExitRoom,
    SwitchRole {
        role: Role,
        private_map_key: Option<SecretString>,
    },
    SwitchRoom(SwitchRoomConfig),
    ConnectOtherRoom(CrossRoomDescriptor),
    DisconnectOtherRoom,
    SetDefaultStreamRecvMode {
        auto_audio: bool,
        auto_video: bool,
    },

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
    MuteRemoteVideo {
        user_id: String,
        stream_type: StreamType,
        mute: bool,
    },
    MuteAllRemoteVideo(bool),
    MuteRemoteAudio {
        user_id: String,
        mute: bool,
    },
    MuteAllRemoteAudio(bool),
    SetRemoteVideoStreamType {
        user_id: String,
        stream_type: StreamType,
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
        interval_ms: u32,
        enable_vad: bool,
    },
    StartAudioRecording(AudioRecordingParams),
    StopAudioRecording,

    SelectScreenCaptureTarget(String),
    StartScreenCapture {
        target: Option<RenderTarget>,
        stream_type: StreamType,
        param: VideoEncParam,
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

    UpdatePublishMediaStream {
        task_id: TaskId,
        target: PublishTarget,
        encoder: Option<StreamEncoderParams>,
        mixing: Option<StreamMixingConfig>,
    },
    StopPublishMediaStream(Option<TaskId>),

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

impl SessionCommand {
    /// Command name for logs and metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            SessionCommand::EnterRoom { .. } => "enter_room",
            SessionCommand::ExitRoom => "exit_room",
            SessionCommand::SwitchRole { .. } => "switch_role",
            SessionCommand::SwitchRoom(_) => "switch_room",
            SessionCommand::ConnectOtherRoom(_) => "connect_other_room",
            SessionCommand::DisconnectOtherRoom => "disconnect_other_room",
            SessionCommand::SetDefaultStreamRecvMode { .. } => "set_default_stream_recv_mode",
            SessionCommand::StartRemoteView { .. } => "start_remote_view",
            SessionCommand::UpdateRemoteView { .. } => "update_remote_view",
            SessionCommand::StopRemoteView { .. } => "stop_remote_view",
            SessionCommand::StopAllRemoteView => "stop_all_remote_view",
            SessionCommand::MuteRemoteVideo { .. } => "mute_remote_video_stream",
            SessionCommand::MuteAllRemoteVideo(_) => "mute_all_remote_video_streams",
            SessionCommand::MuteRemoteAudio { .. } => "mute_remote_audio",
            SessionCommand::MuteAllRemoteAudio(_) => "mute_all_remote_audio",
            SessionCommand::SetRemoteVideoStreamType { .. } => "set_remote_video_stream_type",
            SessionCommand::SetRemoteAudioVolume { .. } => "set_remote_audio_volume",
            SessionCommand::StartLocalAudio(_) => "start_local_audio",
            SessionCommand::StopLocalAudio => "stop_local_audio",
            SessionCommand::MuteLocalAudio(_) => "mute_local_audio",
            SessionCommand::StartLocalPreview { .. } => "start_local_preview",
            SessionCommand::UpdateLocalView(_) => "update_local_view",
            SessionCommand::StopLocalPreview => "stop_local_preview",
            SessionCommand::MuteLocalVideo { .. } => "mute_local_video",
            SessionCommand::SetVideoEncoderParam(_) => "set_video_encoder_param",
            SessionCommand::EnableSmallVideoStream { .. } => "enable_small_video_stream",
            SessionCommand::SetAudioCaptureVolume(_) => "set_audio_capture_volume",
            SessionCommand::SetAudioPlayoutVolume(_) => "set_audio_playout_volume",
            SessionCommand::EnableAudioVolumeEvaluation { .. } => "enable_audio_volume_evaluation",
            SessionCommand::StartAudioRecording(_) => "start_audio_recording",
            SessionCommand::StopAudioRecording => "stop_audio_recording",
            SessionCommand::SelectScreenCaptureTarget(_) => "select_screen_capture_target",
            SessionCommand::StartScreenCapture { .. } => "start_screen_capture",
            SessionCommand::PauseScreenCapture => "pause_screen_capture",
            SessionCommand::ResumeScreenCapture => "resume_screen_capture",
            SessionCommand::StopScreenCapture => "stop_screen_capture",
            SessionCommand::EnableCustomVideoCapture { .. } => "enable_custom_video_capture",
            SessionCommand::SendCustomVideoFrame { .. } => "send_custom_video_frame",
            SessionCommand::EnableCustomAudioCapture(_) => "enable_custom_audio_capture",
            SessionCommand::SendCustomAudioFrame(_) => "send_custom_audio_frame",
            SessionCommand::UpdatePublishMediaStream { .. } => "update_publish_media_stream",
            SessionCommand::StopPublishMediaStream(_) => "stop_publish_media_stream",
            SessionCommand::SendCustomCmdMsg { .. } => "send_custom_cmd_msg",
            SessionCommand::SendSeiMsg { .. } => "send_sei_msg",
            SessionCommand::StartSpeedTest(_) => "start_speed_test",
            SessionCommand::StopSpeedTest => "stop_speed_test",
        }
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub phase: SessionPhase,
    pub role: Role,
    pub scene: Option<AppScene>,
    pub room: Option<RoomRef>,
    pub user_id: Option<String>,
    pub local: LocalMediaSnapshot,
    pub remote_users: Vec<String>,
    pub remote_streams: usize,
    /// Any remote mute flag differs from its default.
    pub remote_mutes_set: bool,
    pub publish_tasks: Vec<PublishTaskView>,
    pub cross_room_peer: Option<CrossRoomDescriptor>,
    pub speed_test_running: bool,
    /// This session holds local publisher ownership.
    pub is_publisher: bool,
    pub created_at: DateTime<Utc>,
}

/// Controller status for health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub controller_id: String,
    pub session_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
    /// Session currently publishing local media.
    pub publisher: Option<SessionId>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        assert_eq!(SessionCommand::ExitRoom.name(), "exit_room");
        assert_eq!(
            SessionCommand::MuteAllRemoteAudio(true).name(),
            "mute_all_remote_audio"
        );
        assert_eq!(
            SessionCommand::StopPublishMediaStream(None).name(),
            "stop_publish_media_stream"
        );
    }
}
