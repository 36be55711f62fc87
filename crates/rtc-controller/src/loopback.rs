//! In-process loopback engine and virtual devices.
//!
//! [`LoopbackEngine`] implements [`MediaEngine`] without any media: it keeps
//! rooms, presence, publish tasks and cross-room links in memory and answers
//! every intent with the events a real cloud would send. Sessions attached
//! to the same engine see each other, which is enough to drive the
//! controller end to end in the `rtc-loopback` binary and in tests.
//!
//! Responses can be held back with [`LoopbackEngine::hold_responses`] to
//! exercise commands that are still pending when the caller moves on.

use crate::device::{DeviceCapabilities, DeviceInfo, DeviceKind, DeviceProvider};
use crate::engine::{
    EngineCapabilities, EngineEvent, EngineEventSink, EngineIntent, ExitReason, MediaEngine,
};
use crate::errors::DeviceError;
use crate::params::{
    CrossRoomDescriptor, NetworkQuality, PublishMode, PublishTarget, Role, RoomRef,
    ScreenCaptureSource, ScreenCaptureState, ScreenSourceKind, SpeedTestParams, SpeedTestResult,
    StreamType,
};
use common::types::{SessionId, TaskId};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Entry latency reported for every successful room entry.
pub const LOOPBACK_ENTER_LATENCY_MS: i64 = 42;

/// Room refused by [`LoopbackEngine::reject_room`].
pub const ERR_ROOM_REJECTED: i32 = -3301;

/// Cross-room target not present or not an anchor.
pub const ERR_CROSS_ROOM_TARGET: i32 = -3302;

/// Disconnect with no cross-room link.
pub const ERR_NO_CROSS_ROOM: i32 = -3303;

/// Subscription to a user who is not visible.
pub const ERR_REMOTE_USER_ABSENT: i32 = -3304;

/// A publish destination already used by another task.
pub const ERR_PUBLISH_DUPLICATE: i32 = -3305;

/// Update or stop for a task this session does not own.
pub const ERR_PUBLISH_UNKNOWN_TASK: i32 = -3306;

/// What a session currently sends upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Published {
    video: BTreeSet<StreamType>,
    audio: bool,
}

#[derive(Debug)]
struct SessionSlot {
    sink: EngineEventSink,
    intents: Vec<&'static str>,
    user_id: Option<String>,
    room: Option<RoomRef>,
    role: Role,
    cross_peer: Option<SessionId>,
    video: BTreeSet<StreamType>,
    video_muted: BTreeSet<StreamType>,
    small_stream: bool,
    screen: Option<StreamType>,
    audio: bool,
    audio_muted: bool,
    next_seq: u32,
}

impl SessionSlot {
    fn new(sink: EngineEventSink) -> Self {
        Self {
            sink,
            intents: Vec::new(),
            user_id: None,
            room: None,
            role: Role::default(),
            cross_peer: None,
            video: BTreeSet::new(),
            video_muted: BTreeSet::new(),
            small_stream: false,
            screen: None,
            audio: false,
            audio_muted: false,
            next_seq: 0,
        }
    }

    fn published(&self) -> Published {
        if self.room.is_none() || self.role != Role::Anchor {
            return Published::default();
        }
        let mut video: BTreeSet<StreamType> =
            self.video.difference(&self.video_muted).copied().collect();
        if self.small_stream && video.contains(&StreamType::Big) {
            video.insert(StreamType::Small);
        }
        Published {
            video,
            audio: self.audio && !self.audio_muted,
        }
    }

    fn user(&self) -> String {
        self.user_id.clone().unwrap_or_default()
    }
}

#[derive(Debug)]
struct PublishTask {
    owner: SessionId,
    destinations: BTreeSet<(PublishMode, String)>,
}

#[derive(Debug, Default)]
struct LoopbackState {
    sessions: HashMap<SessionId, SessionSlot>,
    tasks: HashMap<TaskId, PublishTask>,
    rejected_rooms: HashSet<RoomRef>,
    held: bool,
    queued: VecDeque<(SessionId, EngineEvent)>,
}

/// In-memory [`MediaEngine`] shared by any number of sessions.
#[derive(Debug)]
pub struct LoopbackEngine {
    capabilities: EngineCapabilities,
    state: Mutex<LoopbackState>,
}

impl LoopbackEngine {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_capabilities(EngineCapabilities::default())
    }

    #[must_use]
    pub fn with_capabilities(capabilities: EngineCapabilities) -> Arc<Self> {
        Arc::new(Self {
            capabilities,
            state: Mutex::new(LoopbackState::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse entry to `room` from now on.
    pub fn reject_room(&self, room: RoomRef) {
        self.lock().rejected_rooms.insert(room);
    }

    /// Queue events instead of delivering them. Releasing delivers the
    /// queue in order.
    pub fn hold_responses(&self, hold: bool) {
        let mut state = self.lock();
        state.held = hold;
        if !hold {
            while let Some((session_id, event)) = state.queued.pop_front() {
                if let Some(slot) = state.sessions.get(&session_id) {
                    slot.sink.post(event);
                }
            }
        }
    }

    #[must_use]
    pub fn is_attached(&self, session_id: SessionId) -> bool {
        self.lock().sessions.contains_key(&session_id)
    }

    /// Number of intents the session has submitted.
    #[must_use]
    pub fn submitted(&self, session_id: SessionId) -> usize {
        self.lock()
            .sessions
            .get(&session_id)
            .map_or(0, |slot| slot.intents.len())
    }

    /// Names of the intents the session has submitted, oldest first.
    #[must_use]
    pub fn intents(&self, session_id: SessionId) -> Vec<&'static str> {
        self.lock()
            .sessions
            .get(&session_id)
            .map(|slot| slot.intents.clone())
            .unwrap_or_default()
    }

    /// Users currently in `room`, sorted.
    #[must_use]
    pub fn room_members(&self, room: &RoomRef) -> Vec<String> {
        let state = self.lock();
        let mut members: Vec<String> = state
            .sessions
            .values()
            .filter(|slot| slot.room.as_ref() == Some(room))
            .filter_map(|slot| slot.user_id.clone())
            .collect();
        members.sort();
        members
    }

    /// Publish tasks running across every session.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Remove the session from its room as the server would.
    pub fn kick(&self, session_id: SessionId) {
        let mut state = self.lock();
        if state
            .sessions
            .get(&session_id)
            .is_some_and(|slot| slot.room.is_some())
        {
            state.leave_room(session_id);
            state.drop_tasks_of(session_id);
            state.post(
                session_id,
                EngineEvent::ExitRoomCompleted {
                    reason: ExitReason::Kicked,
                },
            );
        }
    }

    /// Deliver an arbitrary event, honoring held responses.
    pub fn inject(&self, session_id: SessionId, event: EngineEvent) {
        self.lock().post(session_id, event);
    }
}

impl MediaEngine for LoopbackEngine {
    fn capabilities(&self) -> EngineCapabilities {
        self.capabilities
    }

    fn attach(&self, session_id: SessionId, sink: EngineEventSink) {
        debug!(target: "rtc.loopback", session_id = %session_id, "Session attached");
        self.lock()
            .sessions
            .insert(session_id, SessionSlot::new(sink));
    }

    fn detach(&self, session_id: SessionId) {
        let mut state = self.lock();
        if state.sessions.contains_key(&session_id) {
            state.leave_room(session_id);
            state.drop_tasks_of(session_id);
            state.sessions.remove(&session_id);
            debug!(target: "rtc.loopback", session_id = %session_id, "Session detached");
        }
    }

    fn submit(&self, session_id: SessionId, intent: EngineIntent) {
        let mut state = self.lock();
        let Some(slot) = state.sessions.get_mut(&session_id) else {
            debug!(
                target: "rtc.loopback",
                session_id = %session_id,
                intent = intent.name(),
                "Intent for unknown session ignored"
            );
            return;
        };
        slot.intents.push(intent.name());
        state.apply(session_id, intent);
    }
}

impl LoopbackState {
    fn post(&mut self, session_id: SessionId, event: EngineEvent) {
        if self.held {
            self.queued.push_back((session_id, event));
        } else if let Some(slot) = self.sessions.get(&session_id) {
            slot.sink.post(event);
        }
    }

    /// Sessions that see `session_id`: its room plus a linked cross-room peer.
    fn viewers_of(&self, session_id: SessionId) -> Vec<SessionId> {
        let Some(slot) = self.sessions.get(&session_id) else {
            return Vec::new();
        };
        let Some(room) = slot.room.as_ref() else {
            return Vec::new();
        };
        let mut viewers: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(id, other)| **id != session_id && other.room.as_ref() == Some(room))
            .map(|(id, _)| *id)
            .collect();
        if let Some(peer) = slot.cross_peer {
            if !viewers.contains(&peer) {
                viewers.push(peer);
            }
        }
        viewers
    }

    fn room_peers(&self, session_id: SessionId) -> Vec<SessionId> {
        let room = self
            .sessions
            .get(&session_id)
            .and_then(|slot| slot.room.clone());
        let Some(room) = room else {
            return Vec::new();
        };
        self.sessions
            .iter()
            .filter(|(id, other)| **id != session_id && other.room.as_ref() == Some(&room))
            .map(|(id, _)| *id)
            .collect()
    }

    fn published(&self, session_id: SessionId) -> Published {
        self.sessions
            .get(&session_id)
            .map(SessionSlot::published)
            .unwrap_or_default()
    }

    fn user_of(&self, session_id: SessionId) -> String {
        self.sessions
            .get(&session_id)
            .map(SessionSlot::user)
            .unwrap_or_default()
    }

    /// Tell `viewer` about `subject` and what it publishes.
    fn introduce(&mut self, viewer: SessionId, subject: SessionId) {
        let user_id = self.user_of(subject);
        let published = self.published(subject);
        self.post(
            viewer,
            EngineEvent::RemoteUserEntered {
                user_id: user_id.clone(),
            },
        );
        for stream_type in published.video {
            self.post(
                viewer,
                EngineEvent::RemoteVideoAvailable {
                    user_id: user_id.clone(),
                    stream_type,
                    available: true,
                },
            );
        }
        if published.audio {
            self.post(
                viewer,
                EngineEvent::RemoteAudioAvailable {
                    user_id,
                    available: true,
                },
            );
        }
    }

    /// Report availability changes of `session_id` to everyone watching it.
    fn announce(&mut self, session_id: SessionId, before: &Published) {
        let after = self.published(session_id);
        if after == *before {
            return;
        }
        let user_id = self.user_of(session_id);
        let viewers = self.viewers_of(session_id);
        let changed: Vec<(StreamType, bool)> = before
            .video
            .symmetric_difference(&after.video)
            .map(|st| (*st, after.video.contains(st)))
            .collect();

        for viewer in viewers {
            for (stream_type, available) in &changed {
                self.post(
                    viewer,
                    EngineEvent::RemoteVideoAvailable {
                        user_id: user_id.clone(),
                        stream_type: *stream_type,
                        available: *available,
                    },
                );
            }
            if before.audio != after.audio {
                self.post(
                    viewer,
                    EngineEvent::RemoteAudioAvailable {
                        user_id: user_id.clone(),
                        available: after.audio,
                    },
                );
            }
        }
    }

    fn unlink_cross_room(&mut self, session_id: SessionId) -> Option<SessionId> {
        let peer = self
            .sessions
            .get_mut(&session_id)
            .and_then(|slot| slot.cross_peer.take())?;
        if let Some(peer_slot) = self.sessions.get_mut(&peer) {
            peer_slot.cross_peer = None;
        }
        Some(peer)
    }

    /// Take `session_id` out of its room, notifying everyone who saw it.
    fn leave_room(&mut self, session_id: SessionId) {
        let user_id = self.user_of(session_id);
        for peer in self.room_peers(session_id) {
            self.post(
                peer,
                EngineEvent::RemoteUserLeft {
                    user_id: user_id.clone(),
                    reason: 0,
                },
            );
        }
        if let Some(peer) = self.unlink_cross_room(session_id) {
            self.post(
                peer,
                EngineEvent::CrossRoomPeerDisconnected {
                    user_id: user_id.clone(),
                },
            );
            self.post(peer, EngineEvent::RemoteUserLeft { user_id, reason: 0 });
        }
        if let Some(slot) = self.sessions.get_mut(&session_id) {
            slot.room = None;
        }
    }

    fn join_room(&mut self, session_id: SessionId) {
        for peer in self.room_peers(session_id) {
            self.introduce(peer, session_id);
            self.introduce(session_id, peer);
        }
    }

    fn drop_tasks_of(&mut self, session_id: SessionId) {
        self.tasks.retain(|_, task| task.owner != session_id);
    }

    fn find_anchor(&self, target: &CrossRoomDescriptor) -> Option<SessionId> {
        self.sessions
            .iter()
            .find(|(_, slot)| {
                slot.room.as_ref() == Some(&target.room)
                    && slot.user_id.as_deref() == Some(target.user_id.as_str())
                    && slot.role == Role::Anchor
            })
            .map(|(id, _)| *id)
    }

    fn duplicate_of(
        &self,
        destinations: &BTreeSet<(PublishMode, String)>,
        except: Option<&TaskId>,
    ) -> Option<TaskId> {
        self.tasks
            .iter()
            .filter(|(id, _)| Some(*id) != except)
            .find(|(_, task)| !task.destinations.is_disjoint(destinations))
            .map(|(id, _)| id.clone())
    }

    fn with_slot(&mut self, session_id: SessionId, f: impl FnOnce(&mut SessionSlot)) {
        let before = self.published(session_id);
        if let Some(slot) = self.sessions.get_mut(&session_id) {
            f(slot);
        }
        self.announce(session_id, &before);
    }

    #[allow(clippy::too_many_lines)]
    fn apply(&mut self, session_id: SessionId, intent: EngineIntent) {
        match intent {
            EngineIntent::EnterRoom {
                user_id, room, role, ..
            } => {
                if self.rejected_rooms.contains(&room) {
                    self.post(
                        session_id,
                        EngineEvent::EnterRoomResult {
                            result: i64::from(ERR_ROOM_REJECTED),
                        },
                    );
                    return;
                }
                if let Some(slot) = self.sessions.get_mut(&session_id) {
                    slot.user_id = Some(user_id);
                    slot.room = Some(room);
                    slot.role = role;
                }
                self.post(
                    session_id,
                    EngineEvent::EnterRoomResult {
                        result: LOOPBACK_ENTER_LATENCY_MS,
                    },
                );
                self.join_room(session_id);
            }

            EngineIntent::ExitRoom => {
                self.leave_room(session_id);
                self.drop_tasks_of(session_id);
                self.post(
                    session_id,
                    EngineEvent::ExitRoomCompleted {
                        reason: ExitReason::Voluntary,
                    },
                );
            }

            EngineIntent::SwitchRole { role, .. } => {
                self.with_slot(session_id, |slot| slot.role = role);
                self.post(
                    session_id,
                    EngineEvent::SwitchRoleResult {
                        code: 0,
                        message: String::new(),
                    },
                );
            }

            EngineIntent::SwitchRoom { room, .. } => {
                if self.rejected_rooms.contains(&room) {
                    self.post(
                        session_id,
                        EngineEvent::SwitchRoomResult {
                            code: ERR_ROOM_REJECTED,
                            message: "room rejected".to_string(),
                        },
                    );
                    return;
                }
                self.leave_room(session_id);
                if let Some(slot) = self.sessions.get_mut(&session_id) {
                    slot.room = Some(room);
                }
                self.post(
                    session_id,
                    EngineEvent::SwitchRoomResult {
                        code: 0,
                        message: String::new(),
                    },
                );
                self.join_room(session_id);
            }

            EngineIntent::ConnectOtherRoom(target) => {
                let caller_room = self
                    .sessions
                    .get(&session_id)
                    .and_then(|slot| slot.room.clone());
                let peer = self.find_anchor(&target).filter(|peer| *peer != session_id);
                let (Some(peer), Some(caller_room)) = (peer, caller_room) else {
                    self.post(
                        session_id,
                        EngineEvent::ConnectOtherRoomResult {
                            user_id: target.user_id,
                            room: target.room,
                            code: ERR_CROSS_ROOM_TARGET,
                            message: "target anchor not found".to_string(),
                        },
                    );
                    return;
                };
                if let Some(slot) = self.sessions.get_mut(&session_id) {
                    slot.cross_peer = Some(peer);
                }
                if let Some(slot) = self.sessions.get_mut(&peer) {
                    slot.cross_peer = Some(session_id);
                }
                let caller = self.user_of(session_id);
                self.post(
                    session_id,
                    EngineEvent::ConnectOtherRoomResult {
                        user_id: target.user_id,
                        room: target.room,
                        code: 0,
                        message: String::new(),
                    },
                );
                self.post(
                    peer,
                    EngineEvent::CrossRoomPeerConnected {
                        user_id: caller,
                        room: caller_room,
                    },
                );
                self.introduce(session_id, peer);
                self.introduce(peer, session_id);
            }

            EngineIntent::DisconnectOtherRoom => match self.unlink_cross_room(session_id) {
                Some(peer) => {
                    let caller = self.user_of(session_id);
                    let peer_user = self.user_of(peer);
                    self.post(
                        session_id,
                        EngineEvent::DisconnectOtherRoomResult {
                            code: 0,
                            message: String::new(),
                        },
                    );
                    self.post(
                        session_id,
                        EngineEvent::RemoteUserLeft {
                            user_id: peer_user,
                            reason: 0,
                        },
                    );
                    self.post(
                        peer,
                        EngineEvent::CrossRoomPeerDisconnected {
                            user_id: caller.clone(),
                        },
                    );
                    self.post(
                        peer,
                        EngineEvent::RemoteUserLeft {
                            user_id: caller,
                            reason: 0,
                        },
                    );
                }
                None => self.post(
                    session_id,
                    EngineEvent::DisconnectOtherRoomResult {
                        code: ERR_NO_CROSS_ROOM,
                        message: "no cross-room link".to_string(),
                    },
                ),
            },

            EngineIntent::StartRemoteView {
                user_id,
                stream_type,
                ..
            } => {
                let visible = self
                    .viewers_of(session_id)
                    .into_iter()
                    .any(|peer| self.user_of(peer) == user_id);
                let code = if visible { 0 } else { ERR_REMOTE_USER_ABSENT };
                self.post(
                    session_id,
                    EngineEvent::RemoteViewStarted {
                        user_id,
                        stream_type,
                        code,
                    },
                );
            }

            EngineIntent::StartLocalAudio(_) | EngineIntent::EnableCustomAudioCapture(true) => {
                self.with_slot(session_id, |slot| slot.audio = true);
            }
            EngineIntent::StopLocalAudio | EngineIntent::EnableCustomAudioCapture(false) => {
                self.with_slot(session_id, |slot| slot.audio = false);
            }
            EngineIntent::MuteLocalAudio(mute) => {
                self.with_slot(session_id, |slot| slot.audio_muted = mute);
            }
            EngineIntent::StartLocalPreview { .. } => {
                self.with_slot(session_id, |slot| {
                    slot.video.insert(StreamType::Big);
                });
            }
            EngineIntent::StopLocalPreview => {
                self.with_slot(session_id, |slot| {
                    if slot.screen != Some(StreamType::Big) {
                        slot.video.remove(&StreamType::Big);
                    }
                });
            }
            EngineIntent::MuteLocalVideo { stream_type, mute } => {
                self.with_slot(session_id, |slot| {
                    if mute {
                        slot.video_muted.insert(stream_type);
                    } else {
                        slot.video_muted.remove(&stream_type);
                    }
                });
            }
            EngineIntent::EnableSmallVideoStream { enable, .. } => {
                self.with_slot(session_id, |slot| slot.small_stream = enable);
            }
            EngineIntent::EnableCustomVideoCapture {
                stream_type,
                enable,
            } => {
                self.with_slot(session_id, |slot| {
                    if enable {
                        slot.video.insert(stream_type);
                    } else {
                        slot.video.remove(&stream_type);
                    }
                });
            }

            EngineIntent::StartScreenCapture { stream_type, .. } => {
                self.with_slot(session_id, |slot| {
                    slot.screen = Some(stream_type);
                    slot.video.insert(stream_type);
                });
                self.post(
                    session_id,
                    EngineEvent::ScreenCaptureStateChanged {
                        state: ScreenCaptureState::Active,
                        reason: 0,
                    },
                );
            }
            EngineIntent::PauseScreenCapture => {
                self.post(
                    session_id,
                    EngineEvent::ScreenCaptureStateChanged {
                        state: ScreenCaptureState::Paused,
                        reason: 0,
                    },
                );
            }
            EngineIntent::ResumeScreenCapture => {
                self.post(
                    session_id,
                    EngineEvent::ScreenCaptureStateChanged {
                        state: ScreenCaptureState::Active,
                        reason: 0,
                    },
                );
            }
            EngineIntent::StopScreenCapture => {
                self.with_slot(session_id, |slot| {
                    if let Some(stream_type) = slot.screen.take() {
                        slot.video.remove(&stream_type);
                    }
                });
            }

            EngineIntent::StartPublishMediaStream {
                request_id, target, ..
            } => {
                let destinations = target.destinations();
                if let Some(existing) = self.duplicate_of(&destinations, None) {
                    self.post(
                        session_id,
                        EngineEvent::PublishMediaStreamStarted {
                            request_id,
                            task_id: Some(existing),
                            code: ERR_PUBLISH_DUPLICATE,
                            message: "publish destination already in use".to_string(),
                        },
                    );
                    return;
                }
                let task_id = TaskId(Uuid::new_v4().to_string());
                self.tasks.insert(
                    task_id.clone(),
                    PublishTask {
                        owner: session_id,
                        destinations,
                    },
                );
                self.post(
                    session_id,
                    EngineEvent::PublishMediaStreamStarted {
                        request_id,
                        task_id: Some(task_id),
                        code: 0,
                        message: String::new(),
                    },
                );
            }

            EngineIntent::UpdatePublishMediaStream {
                task_id, target, ..
            } => {
                let (code, message) = self.update_task(session_id, &task_id, &target);
                self.post(
                    session_id,
                    EngineEvent::PublishMediaStreamUpdated {
                        task_id,
                        code,
                        message,
                    },
                );
            }

            EngineIntent::StopPublishMediaStream { task_id } => {
                let owned = self
                    .tasks
                    .get(&task_id)
                    .is_some_and(|task| task.owner == session_id);
                let (code, message) = if owned {
                    self.tasks.remove(&task_id);
                    (0, String::new())
                } else {
                    (ERR_PUBLISH_UNKNOWN_TASK, "unknown task".to_string())
                };
                self.post(
                    session_id,
                    EngineEvent::PublishMediaStreamStopped {
                        task_id,
                        code,
                        message,
                    },
                );
            }

            EngineIntent::SendCustomCmdMsg { cmd_id, data, .. } => {
                let user_id = self.user_of(session_id);
                let seq = self.sessions.get_mut(&session_id).map_or(0, |slot| {
                    slot.next_seq = slot.next_seq.wrapping_add(1);
                    slot.next_seq
                });
                for peer in self.room_peers(session_id) {
                    self.post(
                        peer,
                        EngineEvent::CustomCmdMsgReceived {
                            user_id: user_id.clone(),
                            cmd_id,
                            seq,
                            data: data.clone(),
                        },
                    );
                }
            }

            EngineIntent::SendSeiMsg { data, .. } => {
                let user_id = self.user_of(session_id);
                for peer in self.room_peers(session_id) {
                    self.post(
                        peer,
                        EngineEvent::SeiMsgReceived {
                            user_id: user_id.clone(),
                            data: data.clone(),
                        },
                    );
                }
            }

            EngineIntent::StartSpeedTest(params) => {
                self.post(
                    session_id,
                    EngineEvent::SpeedTestResult(speed_test_result(&params)),
                );
                self.post(session_id, EngineEvent::SpeedTestCompleted);
            }

            // Accepted without a visible effect.
            EngineIntent::UpdateRemoteView { .. }
            | EngineIntent::StopRemoteView { .. }
            | EngineIntent::StopAllRemoteView
            | EngineIntent::SetRemoteVideoStreamType { .. }
            | EngineIntent::MuteRemoteVideo { .. }
            | EngineIntent::MuteAllRemoteVideo { .. }
            | EngineIntent::MuteRemoteAudio { .. }
            | EngineIntent::MuteAllRemoteAudio { .. }
            | EngineIntent::SetRemoteAudioVolume { .. }
            | EngineIntent::UpdateLocalView(_)
            | EngineIntent::SetVideoEncoderParam(_)
            | EngineIntent::SetAudioCaptureVolume(_)
            | EngineIntent::SetAudioPlayoutVolume(_)
            | EngineIntent::EnableAudioVolumeEvaluation { .. }
            | EngineIntent::StartAudioRecording(_)
            | EngineIntent::StopAudioRecording
            | EngineIntent::SendCustomVideoFrame { .. }
            | EngineIntent::SendCustomAudioFrame(_)
            | EngineIntent::StopSpeedTest => {}
        }
    }

    fn update_task(
        &mut self,
        session_id: SessionId,
        task_id: &TaskId,
        target: &PublishTarget,
    ) -> (i32, String) {
        let owned = self
            .tasks
            .get(task_id)
            .is_some_and(|task| task.owner == session_id);
        if !owned {
            return (ERR_PUBLISH_UNKNOWN_TASK, "unknown task".to_string());
        }
        let destinations = target.destinations();
        if self.duplicate_of(&destinations, Some(task_id)).is_some() {
            return (
                ERR_PUBLISH_DUPLICATE,
                "publish destination already in use".to_string(),
            );
        }
        if let Some(task) = self.tasks.get_mut(task_id) {
            task.destinations = destinations;
        }
        (0, String::new())
    }
}

fn speed_test_result(params: &SpeedTestParams) -> SpeedTestResult {
    SpeedTestResult {
        success: true,
        error_message: String::new(),
        ip: "127.0.0.1".to_string(),
        quality: NetworkQuality::Excellent,
        up_lost_rate: 0.0,
        down_lost_rate: 0.0,
        rtt_ms: 1,
        available_up_bandwidth_kbps: params.expected_up_bandwidth_kbps,
        available_down_bandwidth_kbps: params.expected_down_bandwidth_kbps,
    }
}

/// Device provider backed by a fixed set of virtual devices.
#[derive(Debug)]
pub struct VirtualDeviceProvider {
    capabilities: DeviceCapabilities,
    devices: Vec<DeviceInfo>,
    screen_sources: Vec<ScreenCaptureSource>,
    open: Mutex<HashMap<SessionId, BTreeSet<DeviceKind>>>,
}

impl Default for VirtualDeviceProvider {
    fn default() -> Self {
        let device = |id: &str, name: &str, kind| DeviceInfo {
            id: id.to_string(),
            name: name.to_string(),
            kind,
        };
        Self {
            capabilities: DeviceCapabilities::default(),
            devices: vec![
                device("cam-0", "Loopback Camera", DeviceKind::Camera),
                device("mic-0", "Loopback Microphone", DeviceKind::Microphone),
                device("spk-0", "Loopback Speaker", DeviceKind::Speaker),
            ],
            screen_sources: vec![
                ScreenCaptureSource {
                    id: "screen-0".to_string(),
                    name: "Primary Display".to_string(),
                    kind: ScreenSourceKind::Screen,
                },
                ScreenCaptureSource {
                    id: "window-0".to_string(),
                    name: "Presentation".to_string(),
                    kind: ScreenSourceKind::Window,
                },
            ],
            open: Mutex::new(HashMap::new()),
        }
    }
}

impl VirtualDeviceProvider {
    #[must_use]
    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    /// Devices `session_id` currently holds.
    #[must_use]
    pub fn open_devices(&self, session_id: SessionId) -> Vec<DeviceKind> {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .map(|kinds| kinds.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl DeviceProvider for VirtualDeviceProvider {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn devices(&self, kind: DeviceKind) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }

    fn open(
        &self,
        session_id: SessionId,
        kind: DeviceKind,
        device_id: Option<&str>,
    ) -> Result<(), DeviceError> {
        if let Some(id) = device_id {
            let known = if kind == DeviceKind::Display {
                self.screen_sources.iter().any(|s| s.id == id)
            } else {
                self.devices.iter().any(|d| d.kind == kind && d.id == id)
            };
            if !known {
                return Err(DeviceError::NotFound(id.to_string()));
            }
        }
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id)
            .or_default()
            .insert(kind);
        Ok(())
    }

    fn close(&self, session_id: SessionId, kind: DeviceKind) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(kinds) = open.get_mut(&session_id) {
            kinds.remove(&kind);
            if kinds.is_empty() {
                open.remove(&session_id);
            }
        }
    }

    fn screen_capture_sources(&self) -> Result<Vec<ScreenCaptureSource>, DeviceError> {
        Ok(self.screen_sources.clone())
    }

    fn release_all(&self, session_id: SessionId) {
        self.open
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::params::{AppScene, PublishMode, RecvMode};
    use common::secret::SecretString;
    use common::types::PublishRequestId;
    use tokio::sync::mpsc;

    fn attach(engine: &LoopbackEngine) -> (SessionId, mpsc::UnboundedReceiver<EngineEvent>) {
        let id = SessionId::new();
        let (sink, rx) = EngineEventSink::channel();
        engine.attach(id, sink);
        (id, rx)
    }

    fn enter(engine: &LoopbackEngine, id: SessionId, user: &str, room: u32) {
        engine.submit(
            id,
            EngineIntent::EnterRoom {
                sdk_app_id: 1,
                user_id: user.to_string(),
                user_sig: SecretString::from("sig"),
                room: RoomRef::Numeric(room),
                scene: AppScene::Live,
                role: Role::Anchor,
                private_map_key: None,
                stream_id: None,
                recv_mode: RecvMode::default(),
            },
        );
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_room_presence_and_availability() {
        let engine = LoopbackEngine::new();
        let (a, mut rx_a) = attach(&engine);
        let (b, mut rx_b) = attach(&engine);

        enter(&engine, a, "alice", 7);
        engine.submit(
            a,
            EngineIntent::StartLocalPreview {
                facing: crate::params::CameraFacing::Front,
                target: None,
            },
        );
        enter(&engine, b, "bob", 7);

        let events_b = drain(&mut rx_b);
        assert!(matches!(
            events_b.first(),
            Some(EngineEvent::EnterRoomResult {
                result: LOOPBACK_ENTER_LATENCY_MS
            })
        ));
        assert!(events_b.iter().any(|e| matches!(
            e,
            EngineEvent::RemoteVideoAvailable { user_id, stream_type: StreamType::Big, available: true }
                if user_id == "alice"
        )));

        let events_a = drain(&mut rx_a);
        assert!(events_a.iter().any(
            |e| matches!(e, EngineEvent::RemoteUserEntered { user_id } if user_id == "bob")
        ));
        assert_eq!(engine.room_members(&RoomRef::Numeric(7)), vec!["alice", "bob"]);

        engine.submit(a, EngineIntent::ExitRoom);
        let events_b = drain(&mut rx_b);
        assert!(events_b.iter().any(
            |e| matches!(e, EngineEvent::RemoteUserLeft { user_id, .. } if user_id == "alice")
        ));
    }

    #[test]
    fn test_rejected_room() {
        let engine = LoopbackEngine::new();
        engine.reject_room(RoomRef::Numeric(9));
        let (a, mut rx) = attach(&engine);

        enter(&engine, a, "alice", 9);
        assert!(matches!(
            drain(&mut rx).first(),
            Some(EngineEvent::EnterRoomResult { result }) if *result == i64::from(ERR_ROOM_REJECTED)
        ));
        assert!(engine.room_members(&RoomRef::Numeric(9)).is_empty());
    }

    #[test]
    fn test_duplicate_publish_returns_existing_task() {
        let engine = LoopbackEngine::new();
        let (a, mut rx) = attach(&engine);
        let target = PublishTarget::cdn(PublishMode::BigStreamToCdn, ["rtmp://cdn/live/a"]);

        engine.submit(
            a,
            EngineIntent::StartPublishMediaStream {
                request_id: PublishRequestId::new(),
                target: target.clone(),
                encoder: None,
                mixing: None,
            },
        );
        let first = drain(&mut rx)
            .into_iter()
            .find_map(|event| match event {
                EngineEvent::PublishMediaStreamStarted {
                    task_id, code: 0, ..
                } => task_id,
                _ => None,
            })
            .expect("first publish should start");

        engine.submit(
            a,
            EngineIntent::StartPublishMediaStream {
                request_id: PublishRequestId::new(),
                target,
                encoder: None,
                mixing: None,
            },
        );
        assert!(matches!(
            drain(&mut rx).pop(),
            Some(EngineEvent::PublishMediaStreamStarted { task_id: Some(id), code: ERR_PUBLISH_DUPLICATE, .. })
                if id == first
        ));
        assert_eq!(engine.active_tasks(), 1);
    }

    #[test]
    fn test_cross_room_link() {
        let engine = LoopbackEngine::new();
        let (a, mut rx_a) = attach(&engine);
        let (b, mut rx_b) = attach(&engine);
        enter(&engine, a, "alice", 1);
        enter(&engine, b, "bob", 2);
        drain(&mut rx_a);
        drain(&mut rx_b);

        engine.submit(
            a,
            EngineIntent::ConnectOtherRoom(CrossRoomDescriptor::new(RoomRef::Numeric(2), "bob")),
        );
        assert!(matches!(
            drain(&mut rx_a).first(),
            Some(EngineEvent::ConnectOtherRoomResult { code: 0, .. })
        ));
        assert!(matches!(
            drain(&mut rx_b).first(),
            Some(EngineEvent::CrossRoomPeerConnected { user_id, room: RoomRef::Numeric(1) })
                if user_id == "alice"
        ));

        engine.submit(a, EngineIntent::DisconnectOtherRoom);
        assert!(matches!(
            drain(&mut rx_b).first(),
            Some(EngineEvent::CrossRoomPeerDisconnected { user_id }) if user_id == "alice"
        ));

        engine.submit(a, EngineIntent::DisconnectOtherRoom);
        assert!(matches!(
            drain(&mut rx_a).pop(),
            Some(EngineEvent::DisconnectOtherRoomResult {
                code: ERR_NO_CROSS_ROOM,
                ..
            })
        ));
    }

    #[test]
    fn test_held_responses_flush_in_order() {
        let engine = LoopbackEngine::new();
        let (a, mut rx) = attach(&engine);
        engine.hold_responses(true);

        enter(&engine, a, "alice", 3);
        engine.submit(a, EngineIntent::ExitRoom);
        assert!(drain(&mut rx).is_empty());

        engine.hold_responses(false);
        let events = drain(&mut rx);
        assert!(matches!(
            events.first(),
            Some(EngineEvent::EnterRoomResult { .. })
        ));
        assert!(matches!(
            events.last(),
            Some(EngineEvent::ExitRoomCompleted {
                reason: ExitReason::Voluntary
            })
        ));
        assert_eq!(engine.intents(a), vec!["enter_room", "exit_room"]);
    }

    #[test]
    fn test_virtual_devices() {
        let devices = VirtualDeviceProvider::default();
        let id = SessionId::new();

        devices.open(id, DeviceKind::Camera, None).unwrap();
        devices
            .open(id, DeviceKind::Display, Some("window-0"))
            .unwrap();
        assert_eq!(
            devices.open(id, DeviceKind::Display, Some("nope")),
            Err(DeviceError::NotFound("nope".to_string()))
        );
        assert_eq!(
            devices.open_devices(id),
            vec![DeviceKind::Camera, DeviceKind::Display]
        );

        devices.close(id, DeviceKind::Camera);
        assert_eq!(devices.open_devices(id), vec![DeviceKind::Display]);
        devices.release_all(id);
        assert!(devices.open_devices(id).is_empty());
    }
}
