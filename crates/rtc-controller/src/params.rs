//! Command parameter types.
//!
//! These are plain data carried from callers through the session actor to
//! the media engine. Structural checks live in [`crate::validator`].

use crate::errors::ValidationError;
use bytes::Bytes;
use common::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Application scene selected at room entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppScene {
    VideoCall,
    AudioCall,
    Live,
    VoiceChatRoom,
}

impl AppScene {
    /// Scenes that distinguish anchors from audience members.
    #[must_use]
    pub const fn has_roles(self) -> bool {
        matches!(self, AppScene::Live | AppScene::VoiceChatRoom)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AppScene::VideoCall => "video_call",
            AppScene::AudioCall => "audio_call",
            AppScene::Live => "live",
            AppScene::VoiceChatRoom => "voice_chat_room",
        }
    }
}

/// Publishing role within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    Anchor,
    #[default]
    Audience,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Anchor => "anchor",
            Role::Audience => "audience",
        }
    }
}

/// Video channel of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamType {
    /// Primary camera stream.
    Big,
    /// Low-bitrate camera stream.
    Small,
    /// Auxiliary stream, usually screen sharing.
    Sub,
}

impl StreamType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            StreamType::Big => "big",
            StreamType::Small => "small",
            StreamType::Sub => "sub",
        }
    }

    /// The camera stream this one cannot coexist with.
    #[must_use]
    pub const fn exclusive_peer(self) -> Option<StreamType> {
        match self {
            StreamType::Big => Some(StreamType::Small),
            StreamType::Small => Some(StreamType::Big),
            StreamType::Sub => None,
        }
    }
}

/// A resolved room reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomRef {
    Numeric(u32),
    Str(String),
}

impl fmt::Display for RoomRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomRef::Numeric(id) => write!(f, "{id}"),
            RoomRef::Str(id) => f.write_str(id),
        }
    }
}

/// Room reference as supplied by a caller.
///
/// `Some(0)` and empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomIdentifier {
    pub room_id: Option<u32>,
    pub str_room_id: Option<String>,
}

impl RoomIdentifier {
    #[must_use]
    pub fn numeric(room_id: u32) -> Self {
        Self {
            room_id: Some(room_id),
            str_room_id: None,
        }
    }

    #[must_use]
    pub fn string(str_room_id: impl Into<String>) -> Self {
        Self {
            room_id: None,
            str_room_id: Some(str_room_id.into()),
        }
    }

    fn numeric_part(&self) -> Option<u32> {
        self.room_id.filter(|id| *id != 0)
    }

    fn string_part(&self) -> Option<&str> {
        self.str_room_id.as_deref().filter(|s| !s.is_empty())
    }

    /// Resolve requiring exactly one of the two IDs.
    pub fn resolve_strict(&self) -> Result<RoomRef, ValidationError> {
        match (self.numeric_part(), self.string_part()) {
            (Some(id), None) => Ok(RoomRef::Numeric(id)),
            (None, Some(id)) => Ok(RoomRef::Str(id.to_string())),
            _ => Err(ValidationError::InvalidRoomReference),
        }
    }

    /// Resolve letting the numeric ID win when both are present.
    pub fn resolve_prefer_numeric(&self) -> Result<RoomRef, ValidationError> {
        match (self.numeric_part(), self.string_part()) {
            (Some(id), _) => Ok(RoomRef::Numeric(id)),
            (None, Some(id)) => Ok(RoomRef::Str(id.to_string())),
            (None, None) => Err(ValidationError::InvalidRoomReference),
        }
    }
}

/// Parameters for entering a room.
#[derive(Debug)]
pub struct EnterRoomParams {
    pub sdk_app_id: u32,
    pub user_id: String,
    pub user_sig: SecretString,
    pub room: RoomIdentifier,
    /// Required for `Live` and `VoiceChatRoom`.
    pub role: Option<Role>,
    pub private_map_key: Option<SecretString>,
    /// Custom CDN stream id for this user's bypass stream.
    pub stream_id: Option<String>,
}

/// Parameters for switching rooms while staying connected.
#[derive(Debug, Default)]
pub struct SwitchRoomConfig {
    pub room: RoomIdentifier,
    /// Replaces the signature used at entry when set.
    pub user_sig: Option<SecretString>,
    pub private_map_key: Option<SecretString>,
}

/// Target of a cross-room connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossRoomDescriptor {
    pub room: RoomRef,
    pub user_id: String,
}

#[derive(Deserialize)]
struct RawCrossRoom {
    #[serde(rename = "roomId")]
    room_id: Option<u32>,
    #[serde(rename = "strRoomId")]
    str_room_id: Option<String>,
    #[serde(rename = "userId")]
    user_id: String,
}

impl CrossRoomDescriptor {
    #[must_use]
    pub fn new(room: RoomRef, user_id: impl Into<String>) -> Self {
        Self {
            room,
            user_id: user_id.into(),
        }
    }

    /// Parse `{"roomId": 102, "userId": "b"}` or `{"strRoomId": "102", "userId": "b"}`.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        let raw: RawCrossRoom = serde_json::from_str(json)
            .map_err(|e| ValidationError::InvalidCrossRoomDescriptor(e.to_string()))?;

        let room = RoomIdentifier {
            room_id: raw.room_id,
            str_room_id: raw.str_room_id,
        }
        .resolve_prefer_numeric()?;

        Ok(Self {
            room,
            user_id: raw.user_id,
        })
    }
}

/// Default auto-receive behavior applied at the next room entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvMode {
    pub auto_audio: bool,
    pub auto_video: bool,
}

impl Default for RecvMode {
    fn default() -> Self {
        Self {
            auto_audio: true,
            auto_video: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioQuality {
    Speech,
    #[default]
    Default,
    Music,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraFacing {
    #[default]
    Front,
    Rear,
}

/// Video encoder settings for a local stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoEncParam {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
}

impl Default for VideoEncParam {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            fps: 15,
            bitrate_kbps: 550,
        }
    }
}

/// What a publish task relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PublishMode {
    /// Relay this user's camera stream to CDN.
    BigStreamToCdn,
    /// Relay this user's auxiliary stream to CDN.
    SubStreamToCdn,
    /// Mix several users on the cloud and push to CDN.
    MixStreamToCdn,
    /// Mix several users and publish the result back into the room.
    MixStreamToRoom,
}

impl PublishMode {
    #[must_use]
    pub const fn is_mix(self) -> bool {
        matches!(self, PublishMode::MixStreamToCdn | PublishMode::MixStreamToRoom)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PublishMode::BigStreamToCdn => "big_to_cdn",
            PublishMode::SubStreamToCdn => "sub_to_cdn",
            PublishMode::MixStreamToCdn => "mix_to_cdn",
            PublishMode::MixStreamToRoom => "mix_to_room",
        }
    }
}

/// Destinations for a publish task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub mode: PublishMode,
    /// Up to ten CDN push URLs.
    pub cdn_urls: Vec<String>,
    /// Robot user that publishes the mixed stream into the room.
    pub mix_stream_user: Option<String>,
}

impl PublishTarget {
    #[must_use]
    pub fn cdn(mode: PublishMode, urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mode,
            cdn_urls: urls.into_iter().map(Into::into).collect(),
            mix_stream_user: None,
        }
    }

    #[must_use]
    pub fn mix_to_room(mix_stream_user: impl Into<String>) -> Self {
        Self {
            mode: PublishMode::MixStreamToRoom,
            cdn_urls: Vec::new(),
            mix_stream_user: Some(mix_stream_user.into()),
        }
    }

    /// `(mode, destination)` pairs used for duplicate detection.
    #[must_use]
    pub fn destinations(&self) -> BTreeSet<(PublishMode, String)> {
        let mut set: BTreeSet<(PublishMode, String)> = self
            .cdn_urls
            .iter()
            .map(|url| (self.mode, url.clone()))
            .collect();
        if self.mode == PublishMode::MixStreamToRoom {
            if let Some(user) = &self.mix_stream_user {
                set.insert((self.mode, format!("room-user:{user}")));
            }
        }
        set
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoEncodeSpec {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_kbps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioEncodeSpec {
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate_kbps: u32,
}

/// Output encoding for a publish task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamEncoderParams {
    pub video: Option<VideoEncodeSpec>,
    pub audio: Option<AudioEncodeSpec>,
}

/// Media carried by a publish task's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    AudioOnly,
    VideoOnly,
    AudioAndVideo,
}

impl StreamEncoderParams {
    /// `None` when neither audio nor video is configured.
    #[must_use]
    pub fn output_kind(&self) -> Option<OutputKind> {
        match (self.audio.is_some(), self.video.is_some()) {
            (true, true) => Some(OutputKind::AudioAndVideo),
            (true, false) => Some(OutputKind::AudioOnly),
            (false, true) => Some(OutputKind::VideoOnly),
            (false, false) => None,
        }
    }
}

/// Placement of one user's video in a cloud mix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoLayout {
    pub user_id: String,
    pub room: Option<RoomRef>,
    pub stream_type: StreamType,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub z_order: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamMixingConfig {
    pub background_color: u32,
    pub video_layouts: Vec<VideoLayout>,
    pub audio_mix_users: Vec<String>,
}

impl StreamMixingConfig {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.video_layouts.is_empty() && self.audio_mix_users.is_empty()
    }
}

#[derive(Debug)]
pub struct SpeedTestParams {
    pub sdk_app_id: u32,
    pub user_id: String,
    pub user_sig: SecretString,
    pub expected_up_bandwidth_kbps: u32,
    pub expected_down_bandwidth_kbps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkQuality {
    #[default]
    Unknown,
    Excellent,
    Good,
    Poor,
    Bad,
    VeryBad,
    Down,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedTestResult {
    pub success: bool,
    pub error_message: String,
    pub ip: String,
    pub quality: NetworkQuality,
    pub up_lost_rate: f32,
    pub down_lost_rate: f32,
    pub rtt_ms: u32,
    pub available_up_bandwidth_kbps: u32,
    pub available_down_bandwidth_kbps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingContent {
    #[default]
    All,
    LocalOnly,
    RemoteOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingFormat {
    Wav,
    Aac,
    M4a,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRecordingParams {
    pub file_path: PathBuf,
    pub content: RecordingContent,
}

impl AudioRecordingParams {
    /// Container format implied by the file extension.
    pub fn format(&self) -> Result<RecordingFormat, ValidationError> {
        let ext = self
            .file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("wav") => Ok(RecordingFormat::Wav),
            Some("aac") => Ok(RecordingFormat::Aac),
            Some("m4a") => Ok(RecordingFormat::M4a),
            _ => Err(ValidationError::UnsupportedRecordingFormat),
        }
    }
}

/// An I420 frame injected through custom video capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp_ms: u64,
    pub data: Bytes,
}

/// A 16-bit PCM frame injected through custom audio capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u32,
    pub timestamp_ms: u64,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenSourceKind {
    Screen,
    Window,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenCaptureSource {
    pub id: String,
    pub name: String,
    pub kind: ScreenSourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenCaptureState {
    #[default]
    Idle,
    Active,
    Paused,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_resolution_requires_exactly_one() {
        assert_eq!(
            RoomIdentifier::numeric(101).resolve_strict(),
            Ok(RoomRef::Numeric(101))
        );
        assert_eq!(
            RoomIdentifier::string("room-a").resolve_strict(),
            Ok(RoomRef::Str("room-a".to_string()))
        );

        let both = RoomIdentifier {
            room_id: Some(101),
            str_room_id: Some("room-a".to_string()),
        };
        assert_eq!(
            both.resolve_strict(),
            Err(ValidationError::InvalidRoomReference)
        );
        assert_eq!(
            RoomIdentifier::default().resolve_strict(),
            Err(ValidationError::InvalidRoomReference)
        );
    }

    #[test]
    fn test_zero_and_empty_count_as_unset() {
        let id = RoomIdentifier {
            room_id: Some(0),
            str_room_id: Some("abc".to_string()),
        };
        assert_eq!(id.resolve_strict(), Ok(RoomRef::Str("abc".to_string())));

        let id = RoomIdentifier {
            room_id: Some(7),
            str_room_id: Some(String::new()),
        };
        assert_eq!(id.resolve_strict(), Ok(RoomRef::Numeric(7)));
    }

    #[test]
    fn test_prefer_numeric_when_both_set() {
        let both = RoomIdentifier {
            room_id: Some(102),
            str_room_id: Some("other".to_string()),
        };
        assert_eq!(both.resolve_prefer_numeric(), Ok(RoomRef::Numeric(102)));
    }

    #[test]
    fn test_cross_room_descriptor_from_json() {
        let d = CrossRoomDescriptor::from_json(r#"{"roomId": 102, "userId": "userB"}"#).unwrap();
        assert_eq!(d.room, RoomRef::Numeric(102));
        assert_eq!(d.user_id, "userB");

        let d =
            CrossRoomDescriptor::from_json(r#"{"strRoomId": "102", "userId": "userB"}"#).unwrap();
        assert_eq!(d.room, RoomRef::Str("102".to_string()));

        let d = CrossRoomDescriptor::from_json(
            r#"{"roomId": 5, "strRoomId": "x", "userId": "userB"}"#,
        )
        .unwrap();
        assert_eq!(d.room, RoomRef::Numeric(5));

        assert!(matches!(
            CrossRoomDescriptor::from_json(r#"{"userId": "userB"}"#),
            Err(ValidationError::InvalidRoomReference)
        ));
        assert!(matches!(
            CrossRoomDescriptor::from_json("not json"),
            Err(ValidationError::InvalidCrossRoomDescriptor(_))
        ));
    }

    #[test]
    fn test_output_kind() {
        let audio = Some(AudioEncodeSpec {
            sample_rate: 48000,
            channels: 2,
            bitrate_kbps: 64,
        });
        let video = Some(VideoEncodeSpec {
            width: 1280,
            height: 720,
            fps: 15,
            bitrate_kbps: 1500,
        });

        let both = StreamEncoderParams { video, audio };
        assert_eq!(both.output_kind(), Some(OutputKind::AudioAndVideo));
        let audio_only = StreamEncoderParams { video: None, audio };
        assert_eq!(audio_only.output_kind(), Some(OutputKind::AudioOnly));
        assert_eq!(StreamEncoderParams::default().output_kind(), None);
    }

    #[test]
    fn test_recording_format_from_extension() {
        let params = AudioRecordingParams {
            file_path: PathBuf::from("/tmp/call.M4A"),
            content: RecordingContent::All,
        };
        assert_eq!(params.format(), Ok(RecordingFormat::M4a));

        let params = AudioRecordingParams {
            file_path: PathBuf::from("/tmp/call.mp3"),
            content: RecordingContent::All,
        };
        assert_eq!(
            params.format(),
            Err(ValidationError::UnsupportedRecordingFormat)
        );
    }

    #[test]
    fn test_small_and_big_are_exclusive_peers() {
        assert_eq!(StreamType::Big.exclusive_peer(), Some(StreamType::Small));
        assert_eq!(StreamType::Small.exclusive_peer(), Some(StreamType::Big));
        assert_eq!(StreamType::Sub.exclusive_peer(), None);
    }
}
