//! Process-wide local publisher ownership.
//!
//! Camera and microphone are exclusive. At most one session may publish
//! local media at a time; a second session is refused with
//! [`StateConflict::PublisherBusy`] until the owner mutes, stops, drops to
//! audience or exits. Handover is up to the caller.

use crate::errors::StateConflict;
use common::types::SessionId;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
pub struct PublishArbiter {
    owner: Mutex<Option<SessionId>>,
}

impl PublishArbiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership for `session_id`. Re-acquiring by the owner succeeds.
    pub fn try_acquire(&self, session_id: SessionId) -> Result<(), StateConflict> {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        match *owner {
            Some(current) if current != session_id => Err(StateConflict::PublisherBusy),
            Some(_) => Ok(()),
            None => {
                *owner = Some(session_id);
                debug!(target: "rtc.arbiter", session_id = %session_id, "Publisher acquired");
                Ok(())
            }
        }
    }

    /// Release ownership if `session_id` holds it.
    pub fn release(&self, session_id: SessionId) {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        if *owner == Some(session_id) {
            *owner = None;
            debug!(target: "rtc.arbiter", session_id = %session_id, "Publisher released");
        }
    }

    #[must_use]
    pub fn owner(&self) -> Option<SessionId> {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_single_owner() {
        let arbiter = PublishArbiter::new();
        let a = SessionId::new();
        let b = SessionId::new();

        arbiter.try_acquire(a).unwrap();
        arbiter.try_acquire(a).unwrap();
        assert_eq!(arbiter.try_acquire(b), Err(StateConflict::PublisherBusy));

        // Releasing by a non-owner changes nothing.
        arbiter.release(b);
        assert_eq!(arbiter.owner(), Some(a));

        arbiter.release(a);
        assert_eq!(arbiter.owner(), None);
        arbiter.try_acquire(b).unwrap();
        assert_eq!(arbiter.owner(), Some(b));
    }
}
