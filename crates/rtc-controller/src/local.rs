//! Local capture and encoder state of a session.
//!
//! Capture state (microphone, camera, screen, custom sources, recording)
//! and mute flags are room-scoped and reset on exit. Configuration
//! (volumes, encoder parameters, receive mode, volume evaluation) persists
//! for the session's lifetime.

use crate::device::RenderTarget;
use crate::params::{
    AudioQuality, AudioRecordingParams, CameraFacing, RecvMode, Role, ScreenCaptureState,
    StreamType, VideoEncParam,
};
use std::collections::BTreeSet;

/// Default capture and playout volume.
pub const DEFAULT_VOLUME: u32 = 100;

/// Shortest volume evaluation interval.
pub const MIN_VOLUME_EVALUATION_MS: u32 = 100;

#[derive(Debug, Clone)]
pub struct CameraPreview {
    pub facing: CameraFacing,
    pub target: Option<RenderTarget>,
}

#[derive(Debug, Clone)]
pub struct ScreenCapture {
    pub source_id: String,
    pub stream_type: StreamType,
    pub state: ScreenCaptureState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeEvaluation {
    pub interval_ms: u32,
    pub enable_vad: bool,
}

#[derive(Debug, Clone)]
pub struct LocalMedia {
    pub microphone: Option<AudioQuality>,
    pub audio_muted: bool,
    pub camera: Option<CameraPreview>,
    pub big_video_muted: bool,
    pub sub_video_muted: bool,
    pub screen: Option<ScreenCapture>,
    pub selected_screen_source: Option<String>,
    pub custom_video: BTreeSet<StreamType>,
    pub custom_audio: bool,
    pub recording: Option<AudioRecordingParams>,

    pub encoder: VideoEncParam,
    pub small_stream: Option<VideoEncParam>,
    pub capture_volume: u32,
    pub playout_volume: u32,
    pub volume_evaluation: Option<VolumeEvaluation>,
    pub recv_mode: RecvMode,
}

impl Default for LocalMedia {
    fn default() -> Self {
        Self {
            microphone: None,
            audio_muted: false,
            camera: None,
            big_video_muted: false,
            sub_video_muted: false,
            screen: None,
            selected_screen_source: None,
            custom_video: BTreeSet::new(),
            custom_audio: false,
            recording: None,
            encoder: VideoEncParam::default(),
            small_stream: None,
            capture_volume: DEFAULT_VOLUME,
            playout_volume: DEFAULT_VOLUME,
            volume_evaluation: None,
            recv_mode: RecvMode::default(),
        }
    }
}

/// Clamp a volume evaluation interval. Zero disables evaluation.
#[must_use]
pub fn clamp_evaluation_interval(interval_ms: u32) -> u32 {
    if interval_ms == 0 {
        0
    } else {
        interval_ms.max(MIN_VOLUME_EVALUATION_MS)
    }
}

impl LocalMedia {
    fn sends_audio(&self) -> bool {
        (self.microphone.is_some() || self.custom_audio) && !self.audio_muted
    }

    fn sends_video(&self, stream_type: StreamType) -> bool {
        let muted = match stream_type {
            StreamType::Sub => self.sub_video_muted,
            StreamType::Big | StreamType::Small => self.big_video_muted,
        };
        let camera = stream_type == StreamType::Big && self.camera.is_some();
        let screen = self
            .screen
            .as_ref()
            .is_some_and(|s| s.stream_type == stream_type);
        (camera || screen || self.custom_video.contains(&stream_type)) && !muted
    }

    /// Whether anything local would be published upstream.
    #[must_use]
    pub fn has_outgoing_media(&self) -> bool {
        self.sends_audio() || self.sends_video(StreamType::Big) || self.sends_video(StreamType::Sub)
    }

    /// Whether this session counts as the local publisher.
    #[must_use]
    pub fn would_publish(&self, in_room: bool, role: Role) -> bool {
        in_room && role == Role::Anchor && self.has_outgoing_media()
    }

    /// Drop room-scoped capture state.
    pub fn reset_for_exit(&mut self) {
        *self = Self {
            encoder: self.encoder,
            small_stream: self.small_stream,
            capture_volume: self.capture_volume,
            playout_volume: self.playout_volume,
            volume_evaluation: self.volume_evaluation,
            recv_mode: self.recv_mode,
            ..Self::default()
        };
    }

    #[must_use]
    pub fn snapshot(&self) -> LocalMediaSnapshot {
        LocalMediaSnapshot {
            microphone: self.microphone.is_some(),
            audio_muted: self.audio_muted,
            camera: self.camera.is_some(),
            big_video_muted: self.big_video_muted,
            sub_video_muted: self.sub_video_muted,
            screen_capture: self
                .screen
                .as_ref()
                .map_or(ScreenCaptureState::Idle, |s| s.state),
            custom_video: self.custom_video.iter().copied().collect(),
            custom_audio: self.custom_audio,
            recording: self.recording.is_some(),
            small_stream: self.small_stream.is_some(),
            capture_volume: self.capture_volume,
            playout_volume: self.playout_volume,
            recv_mode: self.recv_mode,
        }
    }
}

/// Read-only view of [`LocalMedia`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMediaSnapshot {
    pub microphone: bool,
    pub audio_muted: bool,
    pub camera: bool,
    pub big_video_muted: bool,
    pub sub_video_muted: bool,
    pub screen_capture: ScreenCaptureState,
    pub custom_video: Vec<StreamType>,
    pub custom_audio: bool,
    pub recording: bool,
    pub small_stream: bool,
    pub capture_volume: u32,
    pub playout_volume: u32,
    pub recv_mode: RecvMode,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_publishing_requires_anchor_in_room_with_unmuted_capture() {
        let mut local = LocalMedia::default();
        assert!(!local.would_publish(true, Role::Anchor));

        local.microphone = Some(AudioQuality::Speech);
        assert!(local.would_publish(true, Role::Anchor));
        assert!(!local.would_publish(true, Role::Audience));
        assert!(!local.would_publish(false, Role::Anchor));

        local.audio_muted = true;
        assert!(!local.would_publish(true, Role::Anchor));

        local.custom_video.insert(StreamType::Sub);
        assert!(local.would_publish(true, Role::Anchor));
        local.sub_video_muted = true;
        assert!(!local.would_publish(true, Role::Anchor));
    }

    #[test]
    fn test_reset_keeps_configuration() {
        let mut local = LocalMedia {
            microphone: Some(AudioQuality::Music),
            audio_muted: true,
            capture_volume: 40,
            recv_mode: RecvMode {
                auto_audio: false,
                auto_video: true,
            },
            ..LocalMedia::default()
        };
        local.custom_video.insert(StreamType::Big);

        local.reset_for_exit();
        assert!(local.microphone.is_none());
        assert!(!local.audio_muted);
        assert!(local.custom_video.is_empty());
        assert_eq!(local.capture_volume, 40);
        assert!(!local.recv_mode.auto_audio);
    }

    #[test]
    fn test_evaluation_interval_clamp() {
        assert_eq!(clamp_evaluation_interval(0), 0);
        assert_eq!(clamp_evaluation_interval(20), 100);
        assert_eq!(clamp_evaluation_interval(300), 300);
    }
}
