//! Room membership state machine.
//!
//! ```text
//! Idle ─enter─▶ Entering ─ok─▶ Joined ─exit─▶ Exiting ─done─▶ Idle
//!                  │ fail         │
//!                  ▼              ├─ switch_role ─▶ RoleSwitching ─▶ Joined
//!                 Idle            ├─ switch_room ─▶ RoomSwitching ─▶ Joined
//!                                 └─ connect ─────▶ CrossRoomConnecting ─▶ Joined
//! ```
//!
//! Transitions are optimistic: the in-progress sub-state is entered when
//! the command is accepted and reconciled by the engine's completion. A
//! failed completion rolls back to the pre-command state. This type holds
//! no I/O; the session actor turns its results into engine intents and
//! observer events.

use crate::engine::{ExitReason, ERR_CANCELLED};
use crate::errors::StateConflict;
use crate::events::RtcEvent;
use crate::params::{AppScene, CrossRoomDescriptor, Role, RoomRef};
use serde::Serialize;

/// Externally visible session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    Idle,
    Entering,
    Joined,
    RoleSwitching,
    RoomSwitching,
    CrossRoomConnecting,
    Exiting,
}

impl SessionPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Entering => "entering",
            SessionPhase::Joined => "joined",
            SessionPhase::RoleSwitching => "role_switching",
            SessionPhase::RoomSwitching => "room_switching",
            SessionPhase::CrossRoomConnecting => "cross_room_connecting",
            SessionPhase::Exiting => "exiting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transition {
    RoleSwitching { previous: Role },
    RoomSwitching { target: RoomRef },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Entering {
        room: RoomRef,
        scene: AppScene,
    },
    Joined {
        room: RoomRef,
        scene: AppScene,
        transition: Option<Transition>,
    },
    Exiting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CrossRoom {
    None,
    Connecting(CrossRoomDescriptor),
    Connected(CrossRoomDescriptor),
    Disconnecting(CrossRoomDescriptor),
}

/// Result of accepting a role switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleSwitch {
    /// Already in the requested role. Completes immediately with code 0.
    Unchanged,
    /// Submitted to the engine; the role is applied optimistically.
    Pending,
}

/// Result of a room switch completion.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSwitchOutcome {
    pub event: RtcEvent,
    /// Room changed. Room-scoped state must be reset.
    pub switched: bool,
    /// The cross-room link dropped by the move, if there was one.
    pub cross_room: Option<RtcEvent>,
}

/// Room membership, role and cross-room link of one session.
#[derive(Debug)]
pub struct RoomStateMachine {
    phase: Phase,
    role: Role,
    cross: CrossRoom,
}

impl Default for RoomStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            role: Role::default(),
            cross: CrossRoom::None,
        }
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        match &self.phase {
            Phase::Idle => SessionPhase::Idle,
            Phase::Entering { .. } => SessionPhase::Entering,
            Phase::Exiting => SessionPhase::Exiting,
            Phase::Joined { transition, .. } => match (transition, &self.cross) {
                (Some(Transition::RoleSwitching { .. }), _) => SessionPhase::RoleSwitching,
                (Some(Transition::RoomSwitching { .. }), _) => SessionPhase::RoomSwitching,
                (None, CrossRoom::Connecting(_)) => SessionPhase::CrossRoomConnecting,
                (None, _) => SessionPhase::Joined,
            },
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn room(&self) -> Option<&RoomRef> {
        match &self.phase {
            Phase::Entering { room, .. } | Phase::Joined { room, .. } => Some(room),
            Phase::Idle | Phase::Exiting => None,
        }
    }

    #[must_use]
    pub fn scene(&self) -> Option<AppScene> {
        match &self.phase {
            Phase::Entering { scene, .. } | Phase::Joined { scene, .. } => Some(*scene),
            Phase::Idle | Phase::Exiting => None,
        }
    }

    /// Connected cross-room peer, if any.
    #[must_use]
    pub fn cross_room_peer(&self) -> Option<&CrossRoomDescriptor> {
        match &self.cross {
            CrossRoom::Connected(peer) | CrossRoom::Disconnecting(peer) => Some(peer),
            CrossRoom::None | CrossRoom::Connecting(_) => None,
        }
    }

    /// Entering or joined.
    #[must_use]
    pub fn in_room(&self) -> bool {
        matches!(self.phase, Phase::Entering { .. } | Phase::Joined { .. })
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        matches!(self.phase, Phase::Joined { .. })
    }

    /// Require `Idle`, the only phase that accepts a room entry.
    pub fn require_idle(&self) -> Result<(), StateConflict> {
        match self.phase {
            Phase::Idle => Ok(()),
            Phase::Entering { .. } | Phase::Joined { .. } => Err(StateConflict::AlreadyInRoom),
            Phase::Exiting => Err(StateConflict::ExitInProgress),
        }
    }

    /// Require `Joined` with no role or room transition in flight.
    pub fn require_stable(&self) -> Result<(), StateConflict> {
        match &self.phase {
            Phase::Joined {
                transition: None, ..
            } => Ok(()),
            Phase::Joined { .. } | Phase::Entering { .. } => {
                Err(StateConflict::TransitionInProgress)
            }
            Phase::Exiting => Err(StateConflict::ExitInProgress),
            Phase::Idle => Err(StateConflict::NotInRoom),
        }
    }

    /// `Idle → Entering`.
    pub fn begin_enter(
        &mut self,
        room: RoomRef,
        scene: AppScene,
        role: Role,
    ) -> Result<(), StateConflict> {
        self.require_idle()?;
        self.phase = Phase::Entering { room, scene };
        self.role = role;
        Ok(())
    }

    /// Apply the entry result. `None` if no entry is pending.
    pub fn complete_enter(&mut self, result: i64) -> Option<RtcEvent> {
        let Phase::Entering { room, scene } = &self.phase else {
            return None;
        };
        let (room, scene) = (room.clone(), *scene);
        if result >= 0 {
            self.phase = Phase::Joined {
                room: room.clone(),
                scene,
                transition: None,
            };
        } else {
            self.reset();
        }
        Some(RtcEvent::RoomEntered { room, result })
    }

    /// `Entering | Joined → Exiting`.
    ///
    /// Returns `None` when already idle or exiting. Otherwise returns the
    /// completions of every pending command, each with [`ERR_CANCELLED`].
    pub fn begin_exit(&mut self) -> Option<Vec<RtcEvent>> {
        let previous = std::mem::replace(&mut self.phase, Phase::Exiting);
        let mut cancelled = Vec::new();
        match previous {
            Phase::Idle => {
                self.phase = Phase::Idle;
                return None;
            }
            Phase::Exiting => return None,
            Phase::Entering { room, .. } => cancelled.push(RtcEvent::RoomEntered {
                room,
                result: i64::from(ERR_CANCELLED),
            }),
            Phase::Joined { transition, .. } => match transition {
                Some(Transition::RoleSwitching { previous }) => {
                    self.role = previous;
                    cancelled.push(RtcEvent::RoleSwitched {
                        role: previous,
                        code: ERR_CANCELLED,
                        message: "cancelled by exit".to_string(),
                    });
                }
                Some(Transition::RoomSwitching { target }) => {
                    cancelled.push(RtcEvent::RoomSwitched {
                        room: target,
                        code: ERR_CANCELLED,
                        message: "cancelled by exit".to_string(),
                    });
                }
                None => {}
            },
        }
        cancelled.extend(self.take_cross_room(ERR_CANCELLED, "cancelled by exit"));
        Some(cancelled)
    }

    /// `Exiting → Idle`. `None` if no exit is in progress.
    pub fn complete_exit(&mut self, reason: ExitReason) -> Option<RtcEvent> {
        if self.phase != Phase::Exiting {
            return None;
        }
        self.reset();
        Some(RtcEvent::RoomExited { reason })
    }

    fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.role = Role::default();
        self.cross = CrossRoom::None;
    }

    /// Drop the cross-room link, reporting how it ended.
    fn take_cross_room(&mut self, code: i32, message: &str) -> Option<RtcEvent> {
        match std::mem::replace(&mut self.cross, CrossRoom::None) {
            CrossRoom::None => None,
            CrossRoom::Connecting(desc) => Some(RtcEvent::CrossRoomConnected {
                user_id: desc.user_id,
                room: desc.room,
                code,
                message: message.to_string(),
            }),
            CrossRoom::Connected(peer) | CrossRoom::Disconnecting(peer) => {
                Some(RtcEvent::CrossRoomDisconnected {
                    user_id: Some(peer.user_id),
                    code,
                    message: message.to_string(),
                })
            }
        }
    }

    /// Switch role. Not checked against the scene; the engine reports misuse.
    pub fn switch_role(&mut self, role: Role) -> Result<RoleSwitch, StateConflict> {
        self.require_stable()?;
        if role == self.role {
            return Ok(RoleSwitch::Unchanged);
        }
        let previous = self.role;
        if let Phase::Joined { transition, .. } = &mut self.phase {
            *transition = Some(Transition::RoleSwitching { previous });
        }
        self.role = role;
        Ok(RoleSwitch::Pending)
    }

    pub fn complete_switch_role(&mut self, code: i32, message: &str) -> Option<RtcEvent> {
        let Phase::Joined { transition, .. } = &mut self.phase else {
            return None;
        };
        let Some(Transition::RoleSwitching { previous }) = transition.as_ref() else {
            return None;
        };
        if code < 0 {
            self.role = *previous;
        }
        *transition = None;
        Some(RtcEvent::RoleSwitched {
            role: self.role,
            code,
            message: message.to_string(),
        })
    }

    /// Begin moving to `target` without leaving the service.
    pub fn switch_room(&mut self, target: RoomRef) -> Result<(), StateConflict> {
        self.require_stable()?;
        if let Phase::Joined { transition, .. } = &mut self.phase {
            *transition = Some(Transition::RoomSwitching { target });
        }
        Ok(())
    }

    pub fn complete_switch_room(&mut self, code: i32, message: &str) -> Option<RoomSwitchOutcome> {
        let Phase::Joined {
            room, transition, ..
        } = &mut self.phase
        else {
            return None;
        };
        let Some(Transition::RoomSwitching { target }) = transition.take() else {
            return None;
        };
        let switched = code >= 0;
        let mut cross_room = None;
        if switched {
            *room = target.clone();
            // A cross-room link does not survive the move.
            cross_room = self.take_cross_room(0, "room switched");
        }
        Some(RoomSwitchOutcome {
            event: RtcEvent::RoomSwitched {
                room: target,
                code,
                message: message.to_string(),
            },
            switched,
            cross_room,
        })
    }

    /// Begin a cross-room connection. Requires the anchor role.
    pub fn connect_other_room(&mut self, target: CrossRoomDescriptor) -> Result<(), StateConflict> {
        match &self.phase {
            Phase::Joined {
                transition: Some(Transition::RoomSwitching { .. }),
                ..
            } => return Err(StateConflict::TransitionInProgress),
            Phase::Joined { .. } => {}
            Phase::Entering { .. } => return Err(StateConflict::TransitionInProgress),
            Phase::Exiting => return Err(StateConflict::ExitInProgress),
            Phase::Idle => return Err(StateConflict::NotInRoom),
        }
        match self.cross {
            CrossRoom::None => {}
            CrossRoom::Connecting(_) => return Err(StateConflict::ConnectionInProgress),
            CrossRoom::Connected(_) | CrossRoom::Disconnecting(_) => {
                return Err(StateConflict::AlreadyConnectedToOtherRoom)
            }
        }
        if self.role != Role::Anchor {
            return Err(StateConflict::NotAnchor);
        }
        self.cross = CrossRoom::Connecting(target);
        Ok(())
    }

    pub fn complete_connect(
        &mut self,
        user_id: &str,
        room: &RoomRef,
        code: i32,
        message: &str,
    ) -> Option<RtcEvent> {
        let CrossRoom::Connecting(desc) = &self.cross else {
            return None;
        };
        if desc.user_id != user_id {
            return None;
        }
        self.cross = if code >= 0 {
            CrossRoom::Connected(CrossRoomDescriptor::new(room.clone(), user_id))
        } else {
            CrossRoom::None
        };
        Some(RtcEvent::CrossRoomConnected {
            user_id: user_id.to_string(),
            room: room.clone(),
            code,
            message: message.to_string(),
        })
    }

    /// Another room's anchor connected to this session.
    pub fn peer_connected(&mut self, user_id: &str, room: &RoomRef) -> Option<RtcEvent> {
        if !self.is_joined() {
            return None;
        }
        match &self.cross {
            CrossRoom::None => {}
            // Both sides dialed each other; the inbound link settles ours.
            CrossRoom::Connecting(desc) if desc.user_id == user_id => {}
            _ => return None,
        }
        self.cross = CrossRoom::Connected(CrossRoomDescriptor::new(room.clone(), user_id));
        Some(RtcEvent::CrossRoomConnected {
            user_id: user_id.to_string(),
            room: room.clone(),
            code: 0,
            message: String::new(),
        })
    }

    pub fn disconnect_other_room(&mut self) -> Result<(), StateConflict> {
        if !self.is_joined() {
            return Err(StateConflict::NotInRoom);
        }
        match std::mem::replace(&mut self.cross, CrossRoom::None) {
            CrossRoom::Connected(peer) => {
                self.cross = CrossRoom::Disconnecting(peer);
                Ok(())
            }
            CrossRoom::None => Err(StateConflict::NoCrossRoomConnection),
            other @ (CrossRoom::Connecting(_) | CrossRoom::Disconnecting(_)) => {
                self.cross = other;
                Err(StateConflict::ConnectionInProgress)
            }
        }
    }

    pub fn complete_disconnect(&mut self, code: i32, message: &str) -> Option<RtcEvent> {
        let CrossRoom::Disconnecting(peer) = &self.cross else {
            return None;
        };
        let peer = peer.clone();
        let user_id = Some(peer.user_id.clone());
        self.cross = if code >= 0 {
            CrossRoom::None
        } else {
            CrossRoom::Connected(peer)
        };
        Some(RtcEvent::CrossRoomDisconnected {
            user_id,
            code,
            message: message.to_string(),
        })
    }

    /// The peer room dropped the link.
    pub fn peer_disconnected(&mut self, user_id: &str) -> Option<RtcEvent> {
        let linked = matches!(
            &self.cross,
            CrossRoom::Connected(peer) | CrossRoom::Disconnecting(peer) if peer.user_id == user_id
        );
        if linked {
            self.take_cross_room(0, "")
        } else {
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn joined(role: Role) -> RoomStateMachine {
        let mut sm = RoomStateMachine::new();
        sm.begin_enter(RoomRef::Numeric(101), AppScene::Live, role)
            .unwrap();
        sm.complete_enter(120).unwrap();
        sm
    }

    fn peer() -> CrossRoomDescriptor {
        CrossRoomDescriptor::new(RoomRef::Numeric(102), "userB")
    }

    #[test]
    fn test_fresh_machine_defaults() {
        let sm = RoomStateMachine::new();
        assert_eq!(sm.phase(), SessionPhase::Idle);
        assert_eq!(sm.role(), Role::Audience);
        assert!(sm.room().is_none());
    }

    #[test]
    fn test_enter_success_and_failure() {
        let sm = joined(Role::Anchor);
        assert_eq!(sm.phase(), SessionPhase::Joined);
        assert_eq!(sm.room(), Some(&RoomRef::Numeric(101)));

        let mut sm = RoomStateMachine::new();
        sm.begin_enter(RoomRef::Numeric(101), AppScene::Live, Role::Anchor)
            .unwrap();
        let event = sm.complete_enter(-100).unwrap();
        assert_eq!(
            event,
            RtcEvent::RoomEntered {
                room: RoomRef::Numeric(101),
                result: -100
            }
        );
        assert_eq!(sm.phase(), SessionPhase::Idle);
        assert_eq!(sm.role(), Role::Audience);
    }

    #[test]
    fn test_enter_twice_conflicts() {
        let mut sm = joined(Role::Anchor);
        assert_eq!(
            sm.begin_enter(RoomRef::Numeric(5), AppScene::Live, Role::Anchor),
            Err(StateConflict::AlreadyInRoom)
        );
    }

    #[test]
    fn test_stale_enter_result_ignored() {
        let mut sm = RoomStateMachine::new();
        assert!(sm.complete_enter(10).is_none());
    }

    #[test]
    fn test_exit_is_idempotent() {
        let mut sm = joined(Role::Anchor);
        assert_eq!(sm.begin_exit(), Some(Vec::new()));
        assert_eq!(sm.phase(), SessionPhase::Exiting);
        assert_eq!(sm.begin_exit(), None);

        assert_eq!(
            sm.complete_exit(ExitReason::Voluntary),
            Some(RtcEvent::RoomExited {
                reason: ExitReason::Voluntary
            })
        );
        assert_eq!(sm.phase(), SessionPhase::Idle);
        assert_eq!(sm.role(), Role::Audience);
        assert_eq!(sm.begin_exit(), None);
        assert_eq!(sm.complete_exit(ExitReason::Voluntary), None);
    }

    #[test]
    fn test_exit_cancels_pending_entry() {
        let mut sm = RoomStateMachine::new();
        sm.begin_enter(RoomRef::Str("abc".into()), AppScene::VideoCall, Role::Anchor)
            .unwrap();
        let cancelled = sm.begin_exit().unwrap();
        assert_eq!(
            cancelled,
            vec![RtcEvent::RoomEntered {
                room: RoomRef::Str("abc".into()),
                result: i64::from(ERR_CANCELLED)
            }]
        );
        // The late engine answer is stale.
        assert!(sm.complete_enter(50).is_none());
    }

    #[test]
    fn test_exit_cancels_role_switch_and_cross_room() {
        let mut sm = joined(Role::Anchor);
        sm.connect_other_room(peer()).unwrap();
        sm.switch_role(Role::Audience).unwrap();

        let cancelled = sm.begin_exit().unwrap();
        assert_eq!(cancelled.len(), 2);
        assert!(cancelled.iter().all(|e| matches!(
            e,
            RtcEvent::RoleSwitched { code: ERR_CANCELLED, .. }
                | RtcEvent::CrossRoomConnected { code: ERR_CANCELLED, .. }
        )));
    }

    #[test]
    fn test_role_switch_rollback() {
        let mut sm = joined(Role::Anchor);
        assert_eq!(sm.switch_role(Role::Audience), Ok(RoleSwitch::Pending));
        assert_eq!(sm.phase(), SessionPhase::RoleSwitching);
        assert_eq!(sm.role(), Role::Audience);
        assert_eq!(
            sm.switch_role(Role::Anchor),
            Err(StateConflict::TransitionInProgress)
        );

        let event = sm.complete_switch_role(-1, "denied").unwrap();
        assert!(matches!(
            event,
            RtcEvent::RoleSwitched {
                role: Role::Anchor,
                code: -1,
                ..
            }
        ));
        assert_eq!(sm.role(), Role::Anchor);
        assert_eq!(sm.phase(), SessionPhase::Joined);
    }

    #[test]
    fn test_same_role_is_unchanged() {
        let mut sm = joined(Role::Audience);
        assert_eq!(sm.switch_role(Role::Audience), Ok(RoleSwitch::Unchanged));
        assert_eq!(sm.phase(), SessionPhase::Joined);
    }

    #[test]
    fn test_role_switch_requires_room() {
        let mut sm = RoomStateMachine::new();
        assert_eq!(
            sm.switch_role(Role::Anchor),
            Err(StateConflict::NotInRoom)
        );
    }

    #[test]
    fn test_switch_room() {
        let mut sm = joined(Role::Anchor);
        sm.switch_room(RoomRef::Numeric(202)).unwrap();
        assert_eq!(sm.phase(), SessionPhase::RoomSwitching);

        let outcome = sm.complete_switch_room(0, "").unwrap();
        assert!(outcome.switched);
        assert_eq!(sm.room(), Some(&RoomRef::Numeric(202)));
        assert_eq!(sm.role(), Role::Anchor);

        sm.switch_room(RoomRef::Numeric(303)).unwrap();
        let outcome = sm.complete_switch_room(-5, "full").unwrap();
        assert!(!outcome.switched);
        assert_eq!(sm.room(), Some(&RoomRef::Numeric(202)));
    }

    #[test]
    fn test_cross_room_connect_lifecycle() {
        let mut sm = joined(Role::Anchor);
        sm.connect_other_room(peer()).unwrap();
        assert_eq!(sm.phase(), SessionPhase::CrossRoomConnecting);
        assert_eq!(
            sm.connect_other_room(peer()),
            Err(StateConflict::ConnectionInProgress)
        );

        let event = sm
            .complete_connect("userB", &RoomRef::Numeric(102), 0, "")
            .unwrap();
        assert!(matches!(event, RtcEvent::CrossRoomConnected { code: 0, .. }));
        assert_eq!(sm.cross_room_peer(), Some(&peer()));
        assert_eq!(
            sm.connect_other_room(peer()),
            Err(StateConflict::AlreadyConnectedToOtherRoom)
        );

        sm.disconnect_other_room().unwrap();
        let event = sm.complete_disconnect(0, "").unwrap();
        assert_eq!(
            event,
            RtcEvent::CrossRoomDisconnected {
                user_id: Some("userB".to_string()),
                code: 0,
                message: String::new()
            }
        );
        assert_eq!(
            sm.disconnect_other_room(),
            Err(StateConflict::NoCrossRoomConnection)
        );
    }

    #[test]
    fn test_cross_room_failure_rolls_back() {
        let mut sm = joined(Role::Anchor);
        sm.connect_other_room(peer()).unwrap();
        sm.complete_connect("userB", &RoomRef::Numeric(102), -3, "refused")
            .unwrap();
        assert!(sm.cross_room_peer().is_none());
        assert!(sm.connect_other_room(peer()).is_ok());
    }

    #[test]
    fn test_audience_cannot_connect() {
        let mut sm = joined(Role::Audience);
        assert_eq!(
            sm.connect_other_room(peer()),
            Err(StateConflict::NotAnchor)
        );
    }

    #[test]
    fn test_inbound_peer_link() {
        let mut sm = joined(Role::Anchor);
        let event = sm.peer_connected("userA", &RoomRef::Numeric(101)).unwrap();
        assert!(matches!(event, RtcEvent::CrossRoomConnected { .. }));
        assert!(sm.peer_disconnected("someone-else").is_none());
        assert!(sm.peer_disconnected("userA").is_some());
        assert!(sm.cross_room_peer().is_none());
    }

    #[test]
    fn test_room_switch_drops_cross_room() {
        let mut sm = joined(Role::Anchor);
        sm.connect_other_room(peer()).unwrap();
        sm.complete_connect("userB", &RoomRef::Numeric(102), 0, "");
        sm.switch_room(RoomRef::Numeric(9)).unwrap();
        let outcome = sm.complete_switch_room(0, "").unwrap();
        assert!(matches!(
            outcome.cross_room,
            Some(RtcEvent::CrossRoomDisconnected { .. })
        ));
        assert!(sm.cross_room_peer().is_none());
    }
}
