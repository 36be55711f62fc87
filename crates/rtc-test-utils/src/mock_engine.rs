//! Mock media engine.
//!
//! Records every intent and never answers on its own. Tests decide which
//! events arrive and when, which makes stale, late and out-of-band engine
//! reports easy to stage.
//!
//! # Example
//!
//! ```rust,ignore
//! use rtc_test_utils::MockEngine;
//!
//! let engine = MockEngine::with_capabilities(EngineCapabilities {
//!     speed_test: false,
//!     ..EngineCapabilities::default()
//! });
//! // hand engine.clone() to the controller ...
//! engine.emit(session_id, EngineEvent::ExitRoomCompleted { reason: ExitReason::Kicked });
//! ```

use common::types::{SessionId, TaskId};
use rtc_controller::engine::{
    EngineCapabilities, EngineEvent, EngineEventSink, EngineIntent, MediaEngine,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// How long `wait_for_intent` waits before failing the test.
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// A recorded intent, reduced to what tests assert on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedIntent {
    pub session_id: SessionId,
    pub name: &'static str,
    /// Task id carried by update and stop intents.
    pub task_id: Option<TaskId>,
}

#[derive(Debug, Default)]
struct MockState {
    sinks: HashMap<SessionId, EngineEventSink>,
    intents: Vec<RecordedIntent>,
    detached: Vec<SessionId>,
}

/// Engine double that records intents and emits only what tests tell it to.
#[derive(Debug)]
pub struct MockEngine {
    capabilities: EngineCapabilities,
    state: Mutex<MockState>,
    submitted: Notify,
}

impl MockEngine {
    /// Mock with every optional feature available.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_capabilities(EngineCapabilities::default())
    }

    #[must_use]
    pub fn with_capabilities(capabilities: EngineCapabilities) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            state: Mutex::new(MockState::default()),
            submitted: Notify::new(),
        })
    }

    /// Post an event to a session. Returns `false` if it is not attached.
    pub fn emit(&self, session_id: SessionId, event: EngineEvent) -> bool {
        let state = self.state.lock().unwrap();
        state
            .sinks
            .get(&session_id)
            .is_some_and(|sink| sink.post(event))
    }

    #[must_use]
    pub fn is_attached(&self, session_id: SessionId) -> bool {
        self.state.lock().unwrap().sinks.contains_key(&session_id)
    }

    /// Whether `detach` was called for the session.
    #[must_use]
    pub fn was_detached(&self, session_id: SessionId) -> bool {
        self.state.lock().unwrap().detached.contains(&session_id)
    }

    /// All intents in submission order.
    #[must_use]
    pub fn intents(&self) -> Vec<RecordedIntent> {
        self.state.lock().unwrap().intents.clone()
    }

    /// Intent names submitted by one session, oldest first.
    #[must_use]
    pub fn intent_names(&self, session_id: SessionId) -> Vec<&'static str> {
        self.state
            .lock()
            .unwrap()
            .intents
            .iter()
            .filter(|i| i.session_id == session_id)
            .map(|i| i.name)
            .collect()
    }

    /// Number of intents with `name` submitted by the session.
    #[must_use]
    pub fn count(&self, session_id: SessionId, name: &str) -> usize {
        self.intent_names(session_id)
            .into_iter()
            .filter(|n| *n == name)
            .count()
    }

    /// Wait until the session has submitted an intent called `name`.
    ///
    /// # Panics
    ///
    /// Panics if it does not arrive in time.
    pub async fn wait_for_intent(&self, session_id: SessionId, name: &str) -> RecordedIntent {
        let found = tokio::time::timeout(WAIT_TIMEOUT, async {
            loop {
                let notified = self.submitted.notified();
                if let Some(intent) = self
                    .intents()
                    .into_iter()
                    .find(|i| i.session_id == session_id && i.name == name)
                {
                    return intent;
                }
                notified.await;
            }
        })
        .await;

        match found {
            Ok(intent) => intent,
            Err(_) => panic!(
                "intent {name} not submitted by {session_id}; got {:?}",
                self.intent_names(session_id)
            ),
        }
    }
}

impl MediaEngine for MockEngine {
    fn capabilities(&self) -> EngineCapabilities {
        self.capabilities
    }

    fn attach(&self, session_id: SessionId, sink: EngineEventSink) {
        self.state.lock().unwrap().sinks.insert(session_id, sink);
    }

    fn detach(&self, session_id: SessionId) {
        let mut state = self.state.lock().unwrap();
        state.sinks.remove(&session_id);
        state.detached.push(session_id);
    }

    fn submit(&self, session_id: SessionId, intent: EngineIntent) {
        let task_id = match &intent {
            EngineIntent::UpdatePublishMediaStream { task_id, .. }
            | EngineIntent::StopPublishMediaStream { task_id } => Some(task_id.clone()),
            _ => None,
        };
        self.state.lock().unwrap().intents.push(RecordedIntent {
            session_id,
            name: intent.name(),
            task_id,
        });
        self.submitted.notify_waiters();
    }
}
