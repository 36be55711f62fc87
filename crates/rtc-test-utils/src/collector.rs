//! Event collector for session observers.

use rtc_controller::actors::SessionHandle;
use rtc_controller::events::{ObserverRef, RtcEvent};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Buffers every event a session dispatches.
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Mutex<Vec<RtcEvent>>,
    arrived: Notify,
}

impl EventCollector {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a collector and register it on `session`.
    #[must_use]
    pub fn attach(session: &SessionHandle) -> Arc<Self> {
        let collector = Self::new();
        session.add_callback(collector.observer());
        collector
    }

    /// Observer that feeds this collector.
    #[must_use]
    pub fn observer(self: &Arc<Self>) -> ObserverRef {
        let collector = Arc::clone(self);
        Arc::new(move |event: &RtcEvent| {
            collector.events.lock().unwrap().push(event.clone());
            collector.arrived.notify_waiters();
        })
    }

    #[must_use]
    pub fn events(&self) -> Vec<RtcEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event names in arrival order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(RtcEvent::name).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Wait for the first buffered event matching `predicate`.
    ///
    /// # Panics
    ///
    /// Panics if none arrives in time.
    pub async fn wait_for(&self, predicate: impl Fn(&RtcEvent) -> bool) -> RtcEvent {
        let found = tokio::time::timeout(WAIT_TIMEOUT, async {
            loop {
                let notified = self.arrived.notified();
                if let Some(event) = self.events().into_iter().find(|e| predicate(e)) {
                    return event;
                }
                notified.await;
            }
        })
        .await;

        match found {
            Ok(event) => event,
            Err(_) => panic!("expected event not dispatched; got {:?}", self.names()),
        }
    }

    pub async fn wait_for_name(&self, name: &str) -> RtcEvent {
        self.wait_for(|e| e.name() == name).await
    }
}
