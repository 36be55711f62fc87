//! # RTC Test Utilities
//!
//! Shared test utilities for the RTC controller.
//!
//! The in-crate [`rtc_controller::loopback`] engine covers multi-user
//! scenarios. This crate adds the pieces tests need around it:
//!
//! - `mock_engine` - Engine that records intents and only answers when told to
//! - `mock_devices` - Device provider with scripted failures
//! - `collector` - Observer that buffers events and waits on them
//! - `fixtures` - Users, configuration and controllers ready to use
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rtc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let engine = MockEngine::new();
//!     let controller = test_controller(engine.clone(), MockDevices::builder().build());
//!     let session = controller.create_session().await.unwrap();
//!     let events = EventCollector::attach(&session);
//!
//!     session
//!         .enter_room(TestUser::anchor("alice").room(101).params(), AppScene::Live)
//!         .await
//!         .unwrap();
//!     engine.wait_for_intent(session.session_id(), "enter_room").await;
//!     engine.emit(session.session_id(), EngineEvent::EnterRoomResult { result: 80 });
//!
//!     events.wait_for_name("room_entered").await;
//! }
//! ```

pub mod collector;
pub mod fixtures;
pub mod mock_devices;
pub mod mock_engine;

pub use collector::EventCollector;
pub use fixtures::{
    loopback_controller, settle, test_config, test_controller, TestUser, TEST_SDK_APP_ID,
};
pub use mock_devices::{MockDevices, MockDevicesBuilder};
pub use mock_engine::MockEngine;
