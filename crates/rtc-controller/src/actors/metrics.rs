//! Actor metrics and mailbox monitoring.
//!
//! Mailbox pressure is judged against each actor's channel capacity, since
//! session mailboxes are sized by `RTC_SESSION_MAILBOX`:
//!
//! | Level     | Depth                  |
//! |-----------|------------------------|
//! | Normal    | up to half capacity    |
//! | Elevated  | above half capacity    |
//! | Saturated | 90% of capacity or more |
//!
//! Depth is also exported as the `rtc_actor_mailbox_depth` gauge.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Which actor a monitor or panic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `RtcControllerActor`, one per controller.
    Controller,
    /// `SessionActor`, one per session.
    Session,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Controller => "controller",
            ActorType::Session => "session",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Elevated,
    Saturated,
}

/// Tracks queue depth for one actor's mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Session id or controller id.
    actor_id: String,
    capacity: usize,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            capacity: capacity.max(1),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), depth);

        match self.level_for_depth(depth) {
            MailboxLevel::Saturated => warn!(
                target: "rtc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                capacity = self.capacity,
                "Mailbox nearly full, senders will block"
            ),
            // Log the crossing only, not every message above it.
            MailboxLevel::Elevated if self.level_for_depth(depth - 1) == MailboxLevel::Normal => {
                debug!(
                    target: "rtc.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth,
                    capacity = self.capacity,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// Record a message taken off the mailbox and handled.
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or(0);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), previous.saturating_sub(1));
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth.saturating_mul(10) >= self.capacity.saturating_mul(9) {
            MailboxLevel::Saturated
        } else if depth.saturating_mul(2) > self.capacity {
            MailboxLevel::Elevated
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Counters shared by the controller and every session it spawns.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    active_sessions: AtomicUsize,
    actor_panics: AtomicU64,
    messages_processed: AtomicU64,
    engine_events: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_created(&self) {
        let count = self.active_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_sessions_active(count);
    }

    pub fn session_removed(&self) {
        let previous = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                Some(c.saturating_sub(1))
            })
            .unwrap_or(0);
        prom::set_sessions_active(previous.saturating_sub(1));
    }

    /// A session or controller task ended in a panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "rtc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor task panicked"
        );
    }

    pub fn record_message_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// An engine event reached a session actor, stale or not.
    pub fn record_engine_event(&self) {
        self.engine_events.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn engine_events(&self) -> u64 {
        self.engine_events.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_and_peak() {
        let monitor = MailboxMonitor::new(ActorType::Session, "session-1", 64);

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_dequeue_on_empty_does_not_underflow() {
        let monitor = MailboxMonitor::new(ActorType::Controller, "ctl", 1000);
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_levels_follow_capacity() {
        let monitor = MailboxMonitor::new(ActorType::Session, "session-1", 20);
        for _ in 0..10 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.record_enqueue();
        assert_eq!(monitor.current_level(), MailboxLevel::Elevated);

        for _ in 0..7 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Saturated);
    }

    #[test]
    fn test_zero_capacity_is_treated_as_one() {
        let monitor = MailboxMonitor::new(ActorType::Session, "session-1", 0);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
        monitor.record_enqueue();
        assert_eq!(monitor.current_level(), MailboxLevel::Saturated);
    }

    #[test]
    fn test_session_counts_and_panics() {
        let metrics = ActorMetrics::new();
        metrics.session_created();
        metrics.session_created();
        metrics.session_removed();
        assert_eq!(metrics.session_count(), 1);

        metrics.session_removed();
        metrics.session_removed();
        assert_eq!(metrics.session_count(), 0);

        metrics.record_panic(ActorType::Session);
        metrics.record_engine_event();
        assert_eq!(metrics.panic_count(), 1);
        assert_eq!(metrics.engine_events(), 1);
    }
}
