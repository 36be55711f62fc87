//! Pre-configured test data fixtures.

use common::secret::SecretString;
use rtc_controller::actors::{ActorMetrics, RtcControllerHandle};
use rtc_controller::config::Config;
use rtc_controller::device::DeviceProvider;
use rtc_controller::engine::MediaEngine;
use rtc_controller::loopback::{LoopbackEngine, VirtualDeviceProvider};
use rtc_controller::params::{EnterRoomParams, Role, RoomIdentifier};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Application id used by every fixture.
pub const TEST_SDK_APP_ID: u32 = 1_400_000_001;

/// Controller configuration with small, test-friendly limits.
#[must_use]
pub fn test_config() -> Config {
    let vars = HashMap::from([
        ("RTC_SDK_APP_ID".to_string(), TEST_SDK_APP_ID.to_string()),
        ("RTC_CONTROLLER_ID".to_string(), "rtc-test".to_string()),
        ("RTC_MAX_SESSIONS".to_string(), "4".to_string()),
        ("RTC_SESSION_MAILBOX".to_string(), "64".to_string()),
        (
            "RTC_SESSION_SHUTDOWN_TIMEOUT_MS".to_string(),
            "500".to_string(),
        ),
    ]);
    Config::from_vars(&vars).expect("test config should load")
}

/// Controller over the given engine and devices.
#[must_use]
pub fn test_controller(
    engine: Arc<dyn MediaEngine>,
    devices: Arc<dyn DeviceProvider>,
) -> RtcControllerHandle {
    RtcControllerHandle::new(&test_config(), engine, devices, ActorMetrics::new())
}

/// Controller over a fresh loopback engine, returned alongside it.
#[must_use]
pub fn loopback_controller() -> (RtcControllerHandle, Arc<LoopbackEngine>) {
    let engine = LoopbackEngine::new();
    let controller = test_controller(
        Arc::clone(&engine) as Arc<dyn MediaEngine>,
        Arc::new(VirtualDeviceProvider::default()),
    );
    (controller, engine)
}

/// Let spawned actors drain their queues.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Test user fixture.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user_id: String,
    pub role: Option<Role>,
    pub room: RoomIdentifier,
}

impl TestUser {
    /// A user without a role, for scenes that take none.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: None,
            room: RoomIdentifier::numeric(101),
        }
    }

    #[must_use]
    pub fn anchor(user_id: impl Into<String>) -> Self {
        Self::new(user_id).with_role(Role::Anchor)
    }

    #[must_use]
    pub fn audience(user_id: impl Into<String>) -> Self {
        Self::new(user_id).with_role(Role::Audience)
    }

    /// A user with a random id.
    #[must_use]
    pub fn random() -> Self {
        Self::anchor(format!("user-{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    /// Numeric room to enter.
    #[must_use]
    pub fn room(mut self, room_id: u32) -> Self {
        self.room = RoomIdentifier::numeric(room_id);
        self
    }

    /// String room to enter.
    #[must_use]
    pub fn str_room(mut self, str_room_id: impl Into<String>) -> Self {
        self.room = RoomIdentifier::string(str_room_id);
        self
    }

    #[must_use]
    pub fn params(&self) -> EnterRoomParams {
        EnterRoomParams {
            sdk_app_id: TEST_SDK_APP_ID,
            user_id: self.user_id.clone(),
            user_sig: SecretString::from(format!("sig-{}", self.user_id)),
            room: self.room.clone(),
            role: self.role,
            private_map_key: None,
            stream_id: None,
        }
    }
}
