//! Mock device provider.
//!
//! # Example
//!
//! ```rust,ignore
//! use rtc_test_utils::MockDevices;
//!
//! let devices = MockDevices::builder()
//!     .fail_open(DeviceKind::Camera, DeviceError::PermissionDenied("camera".into()))
//!     .without_screen_capture()
//!     .build();
//! ```

use common::types::SessionId;
use rtc_controller::device::{DeviceCapabilities, DeviceInfo, DeviceKind, DeviceProvider};
use rtc_controller::errors::DeviceError;
use rtc_controller::params::{ScreenCaptureSource, ScreenSourceKind};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// Device provider whose failures are configured up front.
#[derive(Debug)]
pub struct MockDevices {
    capabilities: DeviceCapabilities,
    failures: HashMap<DeviceKind, DeviceError>,
    screen_sources: Vec<ScreenCaptureSource>,
    open: Mutex<HashMap<SessionId, BTreeSet<DeviceKind>>>,
    releases: Mutex<Vec<SessionId>>,
}

impl MockDevices {
    #[must_use]
    pub fn builder() -> MockDevicesBuilder {
        MockDevicesBuilder::default()
    }

    /// Devices the session currently holds.
    #[must_use]
    pub fn open_devices(&self, session_id: SessionId) -> Vec<DeviceKind> {
        self.open
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|kinds| kinds.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Whether `release_all` was called for the session.
    #[must_use]
    pub fn was_released(&self, session_id: SessionId) -> bool {
        self.releases.lock().unwrap().contains(&session_id)
    }
}

impl DeviceProvider for MockDevices {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn devices(&self, kind: DeviceKind) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            id: format!("mock-{}", kind.as_str()),
            name: format!("Mock {}", kind.as_str()),
            kind,
        }]
    }

    fn open(
        &self,
        session_id: SessionId,
        kind: DeviceKind,
        _device_id: Option<&str>,
    ) -> Result<(), DeviceError> {
        if let Some(err) = self.failures.get(&kind) {
            return Err(err.clone());
        }
        self.open
            .lock()
            .unwrap()
            .entry(session_id)
            .or_default()
            .insert(kind);
        Ok(())
    }

    fn close(&self, session_id: SessionId, kind: DeviceKind) {
        if let Some(kinds) = self.open.lock().unwrap().get_mut(&session_id) {
            kinds.remove(&kind);
        }
    }

    fn screen_capture_sources(&self) -> Result<Vec<ScreenCaptureSource>, DeviceError> {
        match self.failures.get(&DeviceKind::Display) {
            Some(err) => Err(err.clone()),
            None => Ok(self.screen_sources.clone()),
        }
    }

    fn release_all(&self, session_id: SessionId) {
        self.open.lock().unwrap().remove(&session_id);
        self.releases.lock().unwrap().push(session_id);
    }
}

/// Builder for [`MockDevices`].
#[derive(Debug)]
pub struct MockDevicesBuilder {
    capabilities: DeviceCapabilities,
    failures: HashMap<DeviceKind, DeviceError>,
    screen_sources: Vec<ScreenCaptureSource>,
}

impl Default for MockDevicesBuilder {
    fn default() -> Self {
        Self {
            capabilities: DeviceCapabilities::default(),
            failures: HashMap::new(),
            screen_sources: vec![ScreenCaptureSource {
                id: "mock-screen".to_string(),
                name: "Mock Screen".to_string(),
                kind: ScreenSourceKind::Screen,
            }],
        }
    }
}

impl MockDevicesBuilder {
    /// Make every `open` of `kind` fail with `err`.
    #[must_use]
    pub fn fail_open(mut self, kind: DeviceKind, err: DeviceError) -> Self {
        self.failures.insert(kind, err);
        self
    }

    #[must_use]
    pub fn without_screen_capture(mut self) -> Self {
        self.capabilities.screen_capture = false;
        self
    }

    #[must_use]
    pub fn with_camera_switch(mut self) -> Self {
        self.capabilities.camera_switch = true;
        self
    }

    #[must_use]
    pub fn build(self) -> Arc<MockDevices> {
        Arc::new(MockDevices {
            capabilities: self.capabilities,
            failures: self.failures,
            screen_sources: self.screen_sources,
            open: Mutex::new(HashMap::new()),
            releases: Mutex::new(Vec::new()),
        })
    }
}
