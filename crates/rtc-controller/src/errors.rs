//! RTC controller error types.
//!
//! Local failures are synchronous and never reach the media engine:
//!
//! - [`ValidationError`]: malformed parameters
//! - [`StateConflict`]: command not valid in the session's current state
//!
//! Failures reported by the engine are not errors at this layer. They are
//! delivered as `(code, message)` pairs through the event dispatcher.

use thiserror::Error;

/// Top-level controller error returned by session and factory commands.
///
/// Maps to numeric codes for callers bridging into another surface:
/// - `Validation`: `INVALID_PARAMETER` (1)
/// - `State`: `INVALID_STATE` (2)
/// - `Unsupported`: `UNSUPPORTED` (3)
/// - `Device`: `DEVICE_ERROR` (4)
/// - `Internal`: `INTERNAL_ERROR` (5)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RtcError {
    /// Parameters rejected before dispatch.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Command conflicts with the current session state.
    #[error("State conflict: {0}")]
    State(#[from] StateConflict),

    /// Capability not offered by the device provider or media engine.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Device provider refused an open or enumerate call.
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Actor channel failure or other internal fault.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Structural problems with command parameters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("exactly one of numeric or string room id must be set")]
    InvalidRoomReference,

    #[error("role must be specified for live and voice chat room scenes")]
    InvalidScene,

    #[error("user id must be 1-32 characters of [A-Za-z0-9_-]")]
    InvalidUserId,

    #[error("sdk app id must be non-zero")]
    InvalidAppId,

    #[error("user signature must not be empty")]
    MissingCredential,

    #[error("at most 10 cdn urls per publish target, got {count}")]
    TooManyPublishUrls { count: usize },

    #[error("publish target has no destination")]
    EmptyPublishTarget,

    #[error("encoder parameters are required for mixed publishing")]
    MissingEncoderParams,

    #[error("mixing configuration is required for mixed publishing")]
    MissingMixingConfig,

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("message payload must not be empty")]
    EmptyPayload,

    #[error("custom command id must be between 1 and 10")]
    InvalidCmdId,

    #[error("reliable and ordered must be set to the same value")]
    ReliabilityMismatch,

    #[error("volume {0} outside 0..=150")]
    InvalidVolume(u32),

    #[error("invalid video encoder parameters")]
    InvalidVideoEncParam,

    #[error("invalid media frame")]
    InvalidFrame,

    #[error("audio recording supports .wav, .aac and .m4a files")]
    UnsupportedRecordingFormat,

    #[error("invalid cross-room descriptor: {0}")]
    InvalidCrossRoomDescriptor(String),

    #[error("stream type not allowed for this operation")]
    InvalidStreamType,

    #[error("unknown screen capture source")]
    UnknownScreenSource,

    #[error("repeat count must be at least 1")]
    InvalidRepeatCount,
}

/// Command is well-formed but not valid right now.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateConflict {
    #[error("session is not in a room")]
    NotInRoom,

    #[error("session is already in a room")]
    AlreadyInRoom,

    #[error("room exit in progress")]
    ExitInProgress,

    #[error("another room transition is in progress")]
    TransitionInProgress,

    #[error("a cross-room connection is already pending")]
    ConnectionInProgress,

    #[error("a cross-room connection is already established")]
    AlreadyConnectedToOtherRoom,

    #[error("no cross-room connection to disconnect")]
    NoCrossRoomConnection,

    #[error("an identical publish target is already active")]
    DuplicatePublishTarget,

    #[error("task was not started by this session")]
    UnknownTask,

    #[error("cannot change output kind or move a task between CDN and room mixing")]
    IncompatibleModeSwitch,

    #[error("task is no longer updatable")]
    TaskNotUpdatable,

    #[error("another session is publishing local media")]
    PublisherBusy,

    #[error("custom message rate limit exceeded")]
    RateLimited,

    #[error("only an anchor may send custom messages")]
    NotAnchor,

    #[error("a speed test is already running")]
    SpeedTestInProgress,

    #[error("speed test must be started before entering a room")]
    SpeedTestWhileInRoom,

    #[error("audio recording already running")]
    RecordingInProgress,

    #[error("custom capture is not enabled for this stream")]
    CustomCaptureDisabled,

    #[error("screen capture is not active")]
    ScreenCaptureNotActive,

    #[error("screen capture already running")]
    ScreenCaptureActive,

    #[error("remote stream is not subscribed")]
    StreamNotSubscribed,

    #[error("controller is draining")]
    Draining,

    #[error("session limit reached")]
    SessionLimitReached,

    #[error("session not found")]
    SessionNotFound,
}

impl StateConflict {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            StateConflict::NotInRoom => "not_in_room",
            StateConflict::AlreadyInRoom => "already_in_room",
            StateConflict::ExitInProgress => "exit_in_progress",
            StateConflict::TransitionInProgress => "transition_in_progress",
            StateConflict::ConnectionInProgress => "connection_in_progress",
            StateConflict::AlreadyConnectedToOtherRoom => "already_connected",
            StateConflict::NoCrossRoomConnection => "no_cross_room_connection",
            StateConflict::DuplicatePublishTarget => "duplicate_publish_target",
            StateConflict::UnknownTask => "unknown_task",
            StateConflict::IncompatibleModeSwitch => "incompatible_mode_switch",
            StateConflict::TaskNotUpdatable => "task_not_updatable",
            StateConflict::PublisherBusy => "publisher_busy",
            StateConflict::RateLimited => "rate_limited",
            StateConflict::NotAnchor => "not_anchor",
            StateConflict::SpeedTestInProgress => "speed_test_in_progress",
            StateConflict::SpeedTestWhileInRoom => "speed_test_in_room",
            StateConflict::RecordingInProgress => "recording_in_progress",
            StateConflict::CustomCaptureDisabled => "custom_capture_disabled",
            StateConflict::ScreenCaptureNotActive => "screen_capture_not_active",
            StateConflict::ScreenCaptureActive => "screen_capture_active",
            StateConflict::StreamNotSubscribed => "stream_not_subscribed",
            StateConflict::Draining => "draining",
            StateConflict::SessionLimitReached => "session_limit_reached",
            StateConflict::SessionNotFound => "session_not_found",
        }
    }
}

/// Failures surfaced by a `DeviceProvider`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("device busy: {0}")]
    Busy(String),

    #[error("permission denied for {0}")]
    PermissionDenied(String),

    #[error("device failure: {0}")]
    Failed(String),
}

impl RtcError {
    /// Returns the numeric code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RtcError::Validation(_) => 1, // INVALID_PARAMETER
            RtcError::State(_) => 2,      // INVALID_STATE
            RtcError::Unsupported(_) => 3,
            RtcError::Device(_) => 4,
            RtcError::Internal(_) => 5, // INTERNAL_ERROR
        }
    }

    /// Returns a caller-facing message without internal details.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RtcError::Validation(e) => e.to_string(),
            RtcError::State(e) => e.to_string(),
            RtcError::Unsupported(what) => format!("{what} is not supported on this platform"),
            RtcError::Device(e) => e.to_string(),
            RtcError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            RtcError::Validation(ValidationError::InvalidRoomReference).error_code(),
            1
        );
        assert_eq!(RtcError::State(StateConflict::NotInRoom).error_code(), 2);
        assert_eq!(RtcError::Unsupported("x".to_string()).error_code(), 3);
        assert_eq!(
            RtcError::Device(DeviceError::Busy("cam".to_string())).error_code(),
            4
        );
        assert_eq!(RtcError::Internal("x".to_string()).error_code(), 5);
    }

    #[test]
    fn test_display_formatting() {
        let err = RtcError::from(ValidationError::TooManyPublishUrls { count: 11 });
        assert_eq!(
            format!("{err}"),
            "Validation failed: at most 10 cdn urls per publish target, got 11"
        );

        let err = RtcError::from(StateConflict::DuplicatePublishTarget);
        assert_eq!(
            format!("{err}"),
            "State conflict: an identical publish target is already active"
        );
    }

    #[test]
    fn test_client_message_hides_internal_details() {
        let err = RtcError::Internal("channel send failed: closed".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_state_conflict_kind_labels() {
        assert_eq!(StateConflict::PublisherBusy.kind(), "publisher_busy");
        assert_eq!(StateConflict::RateLimited.kind(), "rate_limited");
    }
}
