//! Device and render collaborators.
//!
//! The controller never opens hardware itself. Capture devices are reached
//! through a [`DeviceProvider`]; decoded video goes to caller-owned
//! [`RenderSink`]s that the stream registry only references.

use crate::errors::DeviceError;
use crate::params::{ScreenCaptureSource, StreamType, VideoFrame};
use common::types::SessionId;
use std::fmt;
use std::sync::Arc;

/// Physical device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    Camera,
    Microphone,
    Speaker,
    /// A screen or window selected for capture.
    Display,
}

impl DeviceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Camera => "camera",
            DeviceKind::Microphone => "microphone",
            DeviceKind::Speaker => "speaker",
            DeviceKind::Display => "display",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
}

/// Platform features queried at runtime instead of compiled conditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Front/rear camera selection (mobile).
    pub camera_switch: bool,
    /// Screen and window capture (desktop).
    pub screen_capture: bool,
    /// Capturing system playback as a mic source (desktop).
    pub system_audio_loopback: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            camera_switch: false,
            screen_capture: true,
            system_audio_loopback: true,
        }
    }
}

/// Enumerates and opens capture devices on behalf of sessions.
///
/// Calls are scoped by session so that releasing one session's devices
/// never touches another's.
pub trait DeviceProvider: Send + Sync {
    fn capabilities(&self) -> DeviceCapabilities;

    fn devices(&self, kind: DeviceKind) -> Vec<DeviceInfo>;

    /// Open a device. `device_id` of `None` selects the system default.
    fn open(
        &self,
        session_id: SessionId,
        kind: DeviceKind,
        device_id: Option<&str>,
    ) -> Result<(), DeviceError>;

    fn close(&self, session_id: SessionId, kind: DeviceKind);

    fn screen_capture_sources(&self) -> Result<Vec<ScreenCaptureSource>, DeviceError>;

    /// Close every device the session holds.
    fn release_all(&self, session_id: SessionId);
}

/// Caller-owned surface that receives decoded frames.
pub trait RenderSink: Send + Sync {
    /// Name used in logs.
    fn label(&self) -> String {
        "render-sink".to_string()
    }

    fn render(&self, user_id: &str, stream_type: StreamType, frame: &VideoFrame);
}

/// Shared reference to a caller's [`RenderSink`].
///
/// Cloning never clones the sink, and dropping the last registry reference
/// never destroys what the caller still holds.
#[derive(Clone)]
pub struct RenderTarget(Arc<dyn RenderSink>);

impl RenderTarget {
    #[must_use]
    pub fn new(sink: Arc<dyn RenderSink>) -> Self {
        Self(sink)
    }

    #[must_use]
    pub fn sink(&self) -> &Arc<dyn RenderSink> {
        &self.0
    }

    /// Whether both handles point at the same sink.
    #[must_use]
    pub fn same_sink(&self, other: &RenderTarget) -> bool {
        Arc::as_ptr(&self.0).cast::<()>() == Arc::as_ptr(&other.0).cast::<()>()
    }
}

impl fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RenderTarget").field(&self.0.label()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct NullSink;

    impl RenderSink for NullSink {
        fn render(&self, _user_id: &str, _stream_type: StreamType, _frame: &VideoFrame) {}
    }

    #[test]
    fn test_render_target_identity() {
        let sink: Arc<dyn RenderSink> = Arc::new(NullSink);
        let a = RenderTarget::new(Arc::clone(&sink));
        let b = a.clone();
        let c = RenderTarget::new(Arc::new(NullSink));

        assert!(a.same_sink(&b));
        assert!(!a.same_sink(&c));
        // Registry clones do not take ownership away from the caller.
        drop(a);
        drop(b);
        assert_eq!(Arc::strong_count(&sink), 1);
    }

    #[test]
    fn test_debug_uses_label() {
        let target = RenderTarget::new(Arc::new(NullSink));
        assert_eq!(format!("{target:?}"), "RenderTarget(\"render-sink\")");
    }
}
