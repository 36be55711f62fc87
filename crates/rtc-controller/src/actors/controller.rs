//! `RtcControllerActor` - session factory and supervisor.
//!
//! The controller actor is the top of the actor hierarchy:
//!
//! - Singleton per controller instance
//! - Creates and destroys `SessionActor`s, bounded by `max_sessions`
//! - Owns the root `CancellationToken`; sessions get child tokens
//! - Shares one `PublishArbiter` across its sessions
//! - Monitors session health (panic detection via `JoinHandle`)
//!
//! # Graceful Shutdown
//!
//! On shutdown the controller:
//! 1. Stops accepting new sessions
//! 2. Cancels every session, which leaves its room and releases devices
//! 3. Waits for session tasks up to the deadline
//! 4. Cancels the root token

use super::messages::{ControllerMessage, ControllerStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{SessionActor, SessionContext, SessionHandle};
use crate::arbiter::PublishArbiter;
use crate::config::Config;
use crate::device::DeviceProvider;
use crate::engine::MediaEngine;
use crate::errors::{RtcError, StateConflict};
use chrono::{DateTime, Utc};
use common::types::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `RtcControllerActor`.
///
/// This is the session factory callers hold. All methods are async and
/// return results via oneshot channels.
#[derive(Clone, Debug)]
pub struct RtcControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
}

impl RtcControllerHandle {
    /// Spawn the controller actor and return a handle to it.
    #[must_use]
    pub fn new(
        config: &Config,
        engine: Arc<dyn MediaEngine>,
        devices: Arc<dyn DeviceProvider>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let ctx = SessionContext {
            engine,
            devices,
            arbiter: Arc::new(PublishArbiter::new()),
            metrics,
        };
        let actor = RtcControllerActor::new(config, receiver, cancel_token.clone(), ctx);

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Create a session. Fails while draining or at the session limit.
    pub async fn create_session(&self) -> Result<SessionHandle, RtcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::CreateSession { respond_to: tx })
            .await
            .map_err(|e| RtcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RtcError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn get_session(&self, session_id: SessionId) -> Result<SessionHandle, RtcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetSession {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RtcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RtcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Destroy a session. Its room is exited and its devices released.
    pub async fn destroy_session(&self, session_id: SessionId) -> Result<(), RtcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::DestroySession {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| RtcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RtcError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn get_status(&self) -> Result<ControllerStatus, RtcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RtcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RtcError::Internal(format!("response receive failed: {e}")))
    }

    /// Drain every session within `deadline`, then stop the controller.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), RtcError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::Shutdown {
                deadline,
                respond_to: tx,
            })
            .await
            .map_err(|e| RtcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RtcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for tasks that should stop with the controller.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed session.
struct ManagedSession {
    handle: SessionHandle,
    task_handle: JoinHandle<()>,
    created_at: DateTime<Utc>,
}

/// The `RtcControllerActor` implementation.
pub struct RtcControllerActor {
    controller_id: String,
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Root token; sessions hold children of it.
    cancel_token: CancellationToken,
    sessions: HashMap<SessionId, ManagedSession>,
    accepting_new: bool,
    ctx: SessionContext,
    max_sessions: usize,
    session_mailbox: usize,
    session_shutdown_timeout: Duration,
    mailbox: MailboxMonitor,
}

impl RtcControllerActor {
    fn new(
        config: &Config,
        receiver: mpsc::Receiver<ControllerMessage>,
        cancel_token: CancellationToken,
        ctx: SessionContext,
    ) -> Self {
        let mailbox = MailboxMonitor::new(
            ActorType::Controller,
            &config.controller_id,
            CONTROLLER_CHANNEL_BUFFER,
        );

        Self {
            controller_id: config.controller_id.clone(),
            receiver,
            cancel_token,
            sessions: HashMap::new(),
            accepting_new: true,
            ctx,
            max_sessions: config.max_sessions,
            session_mailbox: config.session_mailbox,
            session_shutdown_timeout: config.session_shutdown_timeout,
            mailbox,
        }
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rtc.actor.controller", fields(controller_id = %self.controller_id))]
    async fn run(mut self) {
        info!(
            target: "rtc.actor.controller",
            controller_id = %self.controller_id,
            "RtcControllerActor started"
        );

        loop {
            self.check_session_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rtc.actor.controller",
                        controller_id = %self.controller_id,
                        "RtcControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.ctx.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "rtc.actor.controller",
                                controller_id = %self.controller_id,
                                "RtcControllerActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rtc.actor.controller",
            controller_id = %self.controller_id,
            sessions_remaining = self.sessions.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RtcControllerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::CreateSession { respond_to } => {
                let result = self.create_session();
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetSession {
                session_id,
                respond_to,
            } => {
                let result = self
                    .sessions
                    .get(&session_id)
                    .map(|managed| managed.handle.clone())
                    .ok_or(RtcError::State(StateConflict::SessionNotFound));
                let _ = respond_to.send(result);
            }

            ControllerMessage::DestroySession {
                session_id,
                respond_to,
            } => {
                let result = self.destroy_session(session_id);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ControllerMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                let result = self.initiate_shutdown(deadline).await;
                let _ = respond_to.send(result);
            }
        }
    }

    fn create_session(&mut self) -> Result<SessionHandle, RtcError> {
        if !self.accepting_new {
            return Err(StateConflict::Draining.into());
        }
        if self.sessions.len() >= self.max_sessions {
            warn!(
                target: "rtc.actor.controller",
                controller_id = %self.controller_id,
                max_sessions = self.max_sessions,
                "Session limit reached"
            );
            return Err(StateConflict::SessionLimitReached.into());
        }

        let session_id = SessionId::new();
        let (handle, task_handle) = SessionActor::spawn(
            session_id,
            self.ctx.clone(),
            self.session_mailbox,
            self.cancel_token.child_token(),
        );

        self.sessions.insert(
            session_id,
            ManagedSession {
                handle: handle.clone(),
                task_handle,
                created_at: Utc::now(),
            },
        );
        self.ctx.metrics.session_created();

        info!(
            target: "rtc.actor.controller",
            controller_id = %self.controller_id,
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            "Session created"
        );

        Ok(handle)
    }

    /// Cancel a session and wait for it in the background so the message
    /// loop is never blocked on a slow room exit.
    fn destroy_session(&mut self, session_id: SessionId) -> Result<(), RtcError> {
        let ManagedSession {
            handle,
            task_handle,
            created_at,
        } = self
            .sessions
            .remove(&session_id)
            .ok_or(StateConflict::SessionNotFound)?;

        handle.cancel();

        let controller_id = self.controller_id.clone();
        let timeout = self.session_shutdown_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rtc.actor.controller",
                        controller_id = %controller_id,
                        session_id = %session_id,
                        "Session task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rtc.actor.controller",
                        controller_id = %controller_id,
                        session_id = %session_id,
                        error = ?e,
                        "Session task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rtc.actor.controller",
                        controller_id = %controller_id,
                        session_id = %session_id,
                        "Session task cleanup timed out"
                    );
                }
            }
        });

        self.ctx.metrics.session_removed();

        info!(
            target: "rtc.actor.controller",
            controller_id = %self.controller_id,
            session_id = %session_id,
            lifetime_secs = (Utc::now() - created_at).num_seconds(),
            total_sessions = self.sessions.len(),
            "Session destroyed"
        );

        Ok(())
    }

    fn get_status(&self) -> ControllerStatus {
        ControllerStatus {
            controller_id: self.controller_id.clone(),
            session_count: self.sessions.len(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
            publisher: self.ctx.arbiter.owner(),
        }
    }

    async fn initiate_shutdown(&mut self, deadline: Duration) -> Result<(), RtcError> {
        info!(
            target: "rtc.actor.controller",
            controller_id = %self.controller_id,
            session_count = self.sessions.len(),
            deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.drain_sessions(deadline).await;
        self.cancel_token.cancel();

        Ok(())
    }

    /// Shutdown after cancellation; sessions get the configured grace period.
    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;
        let deadline = self.session_shutdown_timeout;
        self.drain_sessions(deadline).await;

        info!(
            target: "rtc.actor.controller",
            controller_id = %self.controller_id,
            "Graceful shutdown complete"
        );
    }

    /// Cancel every session and wait for their tasks until `deadline` passes.
    async fn drain_sessions(&mut self, deadline: Duration) {
        for (session_id, managed) in &self.sessions {
            debug!(
                target: "rtc.actor.controller",
                controller_id = %self.controller_id,
                session_id = %session_id,
                "Cancelling session actor"
            );
            managed.handle.cancel();
        }

        let until = Instant::now() + deadline;
        for (session_id, managed) in self.sessions.drain() {
            match tokio::time::timeout_at(until, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "rtc.actor.controller",
                        controller_id = %self.controller_id,
                        session_id = %session_id,
                        "Session actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "rtc.actor.controller",
                        controller_id = %self.controller_id,
                        session_id = %session_id,
                        error = ?e,
                        "Session actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rtc.actor.controller",
                        controller_id = %self.controller_id,
                        session_id = %session_id,
                        "Session actor shutdown timed out"
                    );
                }
            }
            self.ctx.metrics.session_removed();
        }
    }

    /// Reap session tasks that ended without being destroyed.
    async fn check_session_health(&mut self) {
        let finished: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for session_id in finished {
            let Some(managed) = self.sessions.remove(&session_id) else {
                continue;
            };
            warn!(
                target: "rtc.actor.controller",
                controller_id = %self.controller_id,
                session_id = %session_id,
                "Session actor task finished unexpectedly"
            );

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "rtc.actor.controller",
                        controller_id = %self.controller_id,
                        session_id = %session_id,
                        "Session actor exited cleanly"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "rtc.actor.controller",
                            controller_id = %self.controller_id,
                            session_id = %session_id,
                            error = ?join_error,
                            "Session actor panicked - releasing its resources"
                        );
                        self.ctx.metrics.record_panic(ActorType::Session);
                    }
                    // The actor never ran its teardown.
                    self.ctx.arbiter.release(session_id);
                    self.ctx.devices.release_all(session_id);
                    self.ctx.engine.detach(session_id);
                }
            }

            self.ctx.metrics.session_removed();
        }
    }
}
