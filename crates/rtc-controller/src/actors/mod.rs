//! Actor model implementation for the RTC controller.
//!
//! ```text
//! RtcControllerActor (singleton per controller instance)
//! ├── owns the PublishArbiter shared by its sessions
//! └── supervises N SessionActors
//!     └── SessionActor (one per session)
//!         ├── owns room, registry, publish and local media state
//!         ├── drains caller commands (bounded mailbox)
//!         └── drains engine events (EngineEventSink)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: all session state lives in one task; no locks on the hot path
//! - **CancellationToken propagation**: sessions hold child tokens of the controller's root
//! - **Mailbox monitoring**: depth thresholds with metrics (Controller: 100/500, Session: 50/200)
//! - **Message passing**: callers reach actors only via `tokio::sync::mpsc` channels
//!
//! # Modules
//!
//! - [`controller`] - `RtcControllerActor`, the session factory
//! - [`session`] - `SessionActor`, one per session
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod controller;
pub mod messages;
pub mod metrics;
pub mod session;

pub use controller::{RtcControllerActor, RtcControllerHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor};
pub use session::{SessionActor, SessionContext, SessionHandle};
