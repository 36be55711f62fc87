//! RTC Controller Library
//!
//! Session and stream lifecycle controller that sits between an application
//! and a real-time audio/video engine. The controller is responsible for:
//!
//! - Room lifecycle: enter, exit, role switch, room switch and cross-room links
//! - Remote stream subscriptions and their render targets
//! - Local capture state (camera, microphone, screen, custom sources)
//! - CDN relay and cloud mix publish tasks
//! - Custom command and SEI messaging with local rate limits
//! - Ordered observer fan-out of engine results
//!
//! # Architecture
//!
//! ```text
//! RtcControllerActor (session factory)
//! ├── PublishArbiter (one local publisher across sessions)
//! └── supervises N SessionActors
//!     └── SessionActor
//!         ├── RoomStateMachine
//!         ├── StreamRegistry
//!         ├── PublishTaskManager
//!         ├── LocalMediaState
//!         └── EventDispatcher ──► observers
//! ```
//!
//! Callers never reach the [`engine::MediaEngine`] directly. Every command is
//! validated against the session's state first; only accepted commands
//! become [`engine::EngineIntent`]s, and results flow back as
//! [`engine::EngineEvent`]s that the session reconciles before fanning out
//! [`events::RtcEvent`]s.
//!
//! # Modules
//!
//! - [`actors`] - Controller and session actors
//! - [`config`] - Controller configuration from environment
//! - [`errors`] - Error types returned by every command
//! - [`loopback`] - In-process engine and devices for demos and tests

pub mod actors;
pub mod arbiter;
pub mod config;
pub mod device;
pub mod engine;
pub mod errors;
pub mod events;
pub mod local;
pub mod loopback;
pub mod messaging;
pub mod observability;
pub mod params;
pub mod publish;
pub mod registry;
pub mod room;
pub mod validator;

pub use actors::{RtcControllerHandle, SessionHandle};
pub use errors::{DeviceError, RtcError, StateConflict, ValidationError};
pub use events::{ObserverRef, RtcEvent, RtcEventObserver};
