//! Session events and the observer fan-out.
//!
//! Each session owns one [`EventDispatcher`]. The session actor is the only
//! producer, so observers see events in the order the engine produced
//! them. Registration uses an RCU-updated snapshot: `add` and `remove` are
//! safe from inside `on_event`, and a dispatch already in flight finishes
//! against the list it started with.

use crate::engine::{ConnectionState, ExitReason, UserVolume};
use crate::observability::metrics;
use crate::params::{
    NetworkQuality, Role, RoomRef, ScreenCaptureState, SpeedTestResult, StreamType,
};
use crate::publish::PublishTaskState;
use crate::registry::SubscriptionState;
use arc_swap::ArcSwap;
use bytes::Bytes;
use common::types::{PublishRequestId, TaskId};
use std::sync::Arc;
use tracing::trace;

/// Events delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum RtcEvent {
    /// Engine-reported error outside any command's completion.
    Error { code: i32, message: String },
    /// `result >= 0` is elapsed milliseconds, negative is an error code.
    RoomEntered { room: RoomRef, result: i64 },
    RoomExited { reason: ExitReason },
    RoleSwitched {
        role: Role,
        code: i32,
        message: String,
    },
    RoomSwitched {
        room: RoomRef,
        code: i32,
        message: String,
    },
    CrossRoomConnected {
        user_id: String,
        room: RoomRef,
        code: i32,
        message: String,
    },
    CrossRoomDisconnected {
        user_id: Option<String>,
        code: i32,
        message: String,
    },
    RemoteUserEntered { user_id: String },
    RemoteUserLeft { user_id: String, reason: i32 },
    StreamAvailabilityChanged {
        user_id: String,
        stream_type: StreamType,
        state: SubscriptionState,
        available: bool,
    },
    RemoteAudioAvailable { user_id: String, available: bool },
    PublishTaskUpdated {
        request_id: PublishRequestId,
        task_id: Option<TaskId>,
        state: PublishTaskState,
        code: i32,
        message: String,
    },
    ScreenCaptureChanged {
        state: ScreenCaptureState,
        reason: i32,
    },
    ConnectionStateChanged { state: ConnectionState },
    NetworkQuality { local: NetworkQuality },
    UserVoiceVolume {
        volumes: Vec<UserVolume>,
        total: u32,
    },
    CustomCmdMsgReceived {
        user_id: String,
        cmd_id: u32,
        seq: u32,
        data: Bytes,
    },
    SeiMsgReceived { user_id: String, data: Bytes },
    SpeedTest(SpeedTestResult),
    SpeedTestCompleted,
}

impl RtcEvent {
    /// Variant name for metric labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            RtcEvent::Error { .. } => "error",
            RtcEvent::RoomEntered { .. } => "room_entered",
            RtcEvent::RoomExited { .. } => "room_exited",
            RtcEvent::RoleSwitched { .. } => "role_switched",
            RtcEvent::RoomSwitched { .. } => "room_switched",
            RtcEvent::CrossRoomConnected { .. } => "cross_room_connected",
            RtcEvent::CrossRoomDisconnected { .. } => "cross_room_disconnected",
            RtcEvent::RemoteUserEntered { .. } => "remote_user_entered",
            RtcEvent::RemoteUserLeft { .. } => "remote_user_left",
            RtcEvent::StreamAvailabilityChanged { .. } => "stream_availability_changed",
            RtcEvent::RemoteAudioAvailable { .. } => "remote_audio_available",
            RtcEvent::PublishTaskUpdated { .. } => "publish_task_updated",
            RtcEvent::ScreenCaptureChanged { .. } => "screen_capture_changed",
            RtcEvent::ConnectionStateChanged { .. } => "connection_state_changed",
            RtcEvent::NetworkQuality { .. } => "network_quality",
            RtcEvent::UserVoiceVolume { .. } => "user_voice_volume",
            RtcEvent::CustomCmdMsgReceived { .. } => "custom_cmd_msg_received",
            RtcEvent::SeiMsgReceived { .. } => "sei_msg_received",
            RtcEvent::SpeedTest(_) => "speed_test",
            RtcEvent::SpeedTestCompleted => "speed_test_completed",
        }
    }
}

/// Receives session events.
pub trait RtcEventObserver: Send + Sync {
    fn on_event(&self, event: &RtcEvent);
}

impl<F> RtcEventObserver for F
where
    F: Fn(&RtcEvent) + Send + Sync,
{
    fn on_event(&self, event: &RtcEvent) {
        self(event);
    }
}

/// Shared observer handle. Identity is the allocation, not the value.
pub type ObserverRef = Arc<dyn RtcEventObserver>;

fn same_observer(a: &ObserverRef, b: &ObserverRef) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

/// Observer registry and fan-out for one session.
pub struct EventDispatcher {
    observers: ArcSwap<Vec<ObserverRef>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl EventDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Register an observer. Returns `false` if it was already registered.
    pub fn add(&self, observer: ObserverRef) -> bool {
        let mut added = false;
        self.observers.rcu(|current| {
            if current.iter().any(|o| same_observer(o, &observer)) {
                added = false;
                Arc::clone(current)
            } else {
                added = true;
                let mut next = Vec::clone(current);
                next.push(Arc::clone(&observer));
                Arc::new(next)
            }
        });
        added
    }

    /// Unregister an observer. Returns `false` if it was not registered.
    pub fn remove(&self, observer: &ObserverRef) -> bool {
        let mut removed = false;
        self.observers.rcu(|current| {
            if current.iter().any(|o| same_observer(o, observer)) {
                removed = true;
                Arc::new(
                    current
                        .iter()
                        .filter(|o| !same_observer(o, observer))
                        .cloned()
                        .collect(),
                )
            } else {
                removed = false;
                Arc::clone(current)
            }
        });
        removed
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.load().len()
    }

    /// Deliver `event` to every observer registered when the call began.
    pub fn dispatch(&self, event: &RtcEvent) {
        let snapshot = self.observers.load_full();
        trace!(
            target: "rtc.dispatch",
            event = event.name(),
            observers = snapshot.len(),
            "Dispatching event"
        );
        for observer in snapshot.iter() {
            observer.on_event(event);
        }
        metrics::record_event_dispatched(event.name());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counting() -> (ObserverRef, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let observer: ObserverRef = Arc::new(move |_: &RtcEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (observer, count)
    }

    #[test]
    fn test_add_is_idempotent() {
        let dispatcher = EventDispatcher::new();
        let (observer, count) = counting();

        assert!(dispatcher.add(Arc::clone(&observer)));
        assert!(!dispatcher.add(Arc::clone(&observer)));
        assert_eq!(dispatcher.observer_count(), 1);

        dispatcher.dispatch(&RtcEvent::SpeedTestCompleted);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_unregistered_is_noop() {
        let dispatcher = EventDispatcher::new();
        let (registered, count) = counting();
        let (stranger, _) = counting();
        dispatcher.add(Arc::clone(&registered));

        assert!(!dispatcher.remove(&stranger));
        assert!(dispatcher.remove(&registered));
        assert!(!dispatcher.remove(&registered));

        dispatcher.dispatch(&RtcEvent::SpeedTestCompleted);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delivery_order_per_observer() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        dispatcher.add(Arc::new(move |e: &RtcEvent| {
            s.lock().unwrap().push(e.name());
        }));

        dispatcher.dispatch(&RtcEvent::RemoteUserEntered {
            user_id: "a".to_string(),
        });
        dispatcher.dispatch(&RtcEvent::SpeedTestCompleted);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["remote_user_entered", "speed_test_completed"]
        );
    }

    #[test]
    fn test_remove_self_inside_handler() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<ObserverRef>>> = Arc::new(Mutex::new(None));

        let d = Arc::clone(&dispatcher);
        let h = Arc::clone(&hits);
        let s = Arc::clone(&slot);
        let observer: ObserverRef = Arc::new(move |_: &RtcEvent| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = s.lock().unwrap().take() {
                d.remove(&me);
            }
        });
        *slot.lock().unwrap() = Some(Arc::clone(&observer));
        dispatcher.add(observer);

        // In-flight event still reaches the observer that removes itself.
        dispatcher.dispatch(&RtcEvent::SpeedTestCompleted);
        dispatcher.dispatch(&RtcEvent::SpeedTestCompleted);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.observer_count(), 0);
    }

    #[test]
    fn test_add_inside_handler_takes_effect_next_event() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let (late, late_count) = counting();

        let d = Arc::clone(&dispatcher);
        dispatcher.add(Arc::new(move |_: &RtcEvent| {
            d.add(Arc::clone(&late));
        }));

        dispatcher.dispatch(&RtcEvent::SpeedTestCompleted);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);

        dispatcher.dispatch(&RtcEvent::SpeedTestCompleted);
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }
}
