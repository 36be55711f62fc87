//! Publish task bookkeeping for CDN relay and cloud mixing.
//!
//! A task is created locally under a [`PublishRequestId`] and becomes
//! addressable by [`TaskId`] once the engine assigns one. Lifecycle:
//!
//! ```text
//! Requested ──ok──▶ Active ◀──▶ Updating
//!     │                │
//!     └─fail─▶ Rejected┴──stop──▶ Stopping ──▶ Stopped
//! ```
//!
//! A failed start that still carries a task id (the engine's answer to a
//! redundant start) is kept as `Rejected` with that id, so the caller can
//! stop it. It cannot be updated.

use crate::engine::EngineIntent;
use crate::errors::{RtcError, StateConflict, ValidationError};
use crate::params::{PublishMode, PublishTarget, StreamEncoderParams, StreamMixingConfig};
use common::types::{PublishRequestId, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Maximum number of CDN URLs per task.
pub const MAX_PUBLISH_URLS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PublishTaskState {
    Requested,
    Active,
    Updating,
    Stopping,
    Stopped,
    Rejected,
}

impl PublishTaskState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PublishTaskState::Requested => "requested",
            PublishTaskState::Active => "active",
            PublishTaskState::Updating => "updating",
            PublishTaskState::Stopping => "stopping",
            PublishTaskState::Stopped => "stopped",
            PublishTaskState::Rejected => "rejected",
        }
    }

    /// States that hold their destinations for duplicate detection.
    const fn claims_destinations(self) -> bool {
        matches!(
            self,
            PublishTaskState::Requested | PublishTaskState::Active | PublishTaskState::Updating
        )
    }
}

/// Completion or transition to report to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishUpdate {
    pub request_id: PublishRequestId,
    pub task_id: Option<TaskId>,
    pub state: PublishTaskState,
    pub code: i32,
    pub message: String,
}

#[derive(Debug)]
pub enum PublishEffect {
    Engine(EngineIntent),
    Updated(PublishUpdate),
}

/// Read-only view of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTaskView {
    pub request_id: PublishRequestId,
    pub task_id: Option<TaskId>,
    pub mode: PublishMode,
    pub cdn_urls: Vec<String>,
    pub state: PublishTaskState,
}

#[derive(Debug, Clone)]
struct PublishRequest {
    target: PublishTarget,
    encoder: Option<StreamEncoderParams>,
    mixing: Option<StreamMixingConfig>,
}

#[derive(Debug)]
struct PublishTask {
    task_id: Option<TaskId>,
    request: PublishRequest,
    state: PublishTaskState,
    /// Previous request kept while an update is in flight.
    rollback: Option<PublishRequest>,
}

/// Validate a start or update request.
pub fn validate_request(
    target: &PublishTarget,
    encoder: Option<&StreamEncoderParams>,
    mixing: Option<&StreamMixingConfig>,
) -> Result<(), ValidationError> {
    if target.cdn_urls.len() > MAX_PUBLISH_URLS {
        return Err(ValidationError::TooManyPublishUrls {
            count: target.cdn_urls.len(),
        });
    }
    if target.cdn_urls.iter().any(|u| u.trim().is_empty()) {
        return Err(ValidationError::EmptyPublishTarget);
    }
    match target.mode {
        PublishMode::MixStreamToRoom => {
            if target
                .mix_stream_user
                .as_deref()
                .map_or(true, str::is_empty)
            {
                return Err(ValidationError::EmptyPublishTarget);
            }
        }
        _ => {
            if target.cdn_urls.is_empty() {
                return Err(ValidationError::EmptyPublishTarget);
            }
        }
    }
    if let Some(enc) = encoder {
        if enc.output_kind().is_none() {
            return Err(ValidationError::MissingEncoderParams);
        }
    }
    if target.mode.is_mix() {
        if encoder.is_none() {
            return Err(ValidationError::MissingEncoderParams);
        }
        if mixing.map_or(true, StreamMixingConfig::is_empty) {
            return Err(ValidationError::MissingMixingConfig);
        }
    }
    Ok(())
}

fn output_kind_of(encoder: Option<&StreamEncoderParams>) -> Option<crate::params::OutputKind> {
    encoder.and_then(StreamEncoderParams::output_kind)
}

/// Publish tasks started by one session.
#[derive(Debug, Default)]
pub struct PublishTaskManager {
    tasks: HashMap<PublishRequestId, PublishTask>,
    /// Requests dropped before the engine answered. A late task id is stopped silently.
    abandoned: HashSet<PublishRequestId>,
}

impl PublishTaskManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn claimed_destinations(
        &self,
        exclude: Option<PublishRequestId>,
    ) -> BTreeSet<(PublishMode, String)> {
        self.tasks
            .iter()
            .filter(|(id, task)| Some(**id) != exclude && task.state.claims_destinations())
            .flat_map(|(_, task)| task.request.target.destinations())
            .collect()
    }

    fn find_by_task_id(&self, task_id: &TaskId) -> Option<PublishRequestId> {
        self.tasks
            .iter()
            .find(|(_, t)| t.task_id.as_ref() == Some(task_id))
            .map(|(id, _)| *id)
    }

    /// Request a new task. Returns the local request id.
    pub fn start(
        &mut self,
        target: PublishTarget,
        encoder: Option<StreamEncoderParams>,
        mixing: Option<StreamMixingConfig>,
    ) -> Result<(PublishRequestId, Vec<PublishEffect>), RtcError> {
        validate_request(&target, encoder.as_ref(), mixing.as_ref())?;

        let claimed = self.claimed_destinations(None);
        if target.destinations().iter().any(|d| claimed.contains(d)) {
            return Err(StateConflict::DuplicatePublishTarget.into());
        }

        let request_id = PublishRequestId::new();
        let request = PublishRequest {
            target,
            encoder,
            mixing,
        };
        let intent = EngineIntent::StartPublishMediaStream {
            request_id,
            target: request.target.clone(),
            encoder: request.encoder,
            mixing: request.mixing.clone(),
        };
        self.tasks.insert(
            request_id,
            PublishTask {
                task_id: None,
                request,
                state: PublishTaskState::Requested,
                rollback: None,
            },
        );
        Ok((request_id, vec![PublishEffect::Engine(intent)]))
    }

    /// Apply the engine's answer to a start request.
    pub fn complete_start(
        &mut self,
        request_id: PublishRequestId,
        task_id: Option<TaskId>,
        code: i32,
        message: &str,
    ) -> Vec<PublishEffect> {
        if self.abandoned.remove(&request_id) {
            return task_id
                .map(|task_id| {
                    PublishEffect::Engine(EngineIntent::StopPublishMediaStream { task_id })
                })
                .into_iter()
                .collect();
        }

        let Some(task) = self.tasks.get_mut(&request_id) else {
            return Vec::new();
        };

        match task.state {
            PublishTaskState::Requested => {
                let (state, keep) = match (code >= 0, task_id.is_some()) {
                    (true, true) => (PublishTaskState::Active, true),
                    (_, true) => (PublishTaskState::Rejected, true),
                    (_, false) => (PublishTaskState::Rejected, false),
                };
                task.state = state;
                task.task_id.clone_from(&task_id);
                if !keep {
                    self.tasks.remove(&request_id);
                }
                vec![PublishEffect::Updated(PublishUpdate {
                    request_id,
                    task_id,
                    state,
                    code,
                    message: message.to_string(),
                })]
            }
            // Stop was requested before the engine assigned an id.
            PublishTaskState::Stopping => match task_id {
                Some(task_id) => {
                    task.task_id = Some(task_id.clone());
                    vec![PublishEffect::Engine(
                        EngineIntent::StopPublishMediaStream { task_id },
                    )]
                }
                None => {
                    self.tasks.remove(&request_id);
                    vec![PublishEffect::Updated(PublishUpdate {
                        request_id,
                        task_id: None,
                        state: PublishTaskState::Stopped,
                        code,
                        message: message.to_string(),
                    })]
                }
            },
            _ => Vec::new(),
        }
    }

    /// Update an active task's destinations, encoding or mixing layout.
    pub fn update(
        &mut self,
        task_id: &TaskId,
        target: PublishTarget,
        encoder: Option<StreamEncoderParams>,
        mixing: Option<StreamMixingConfig>,
    ) -> Result<Vec<PublishEffect>, RtcError> {
        let request_id = self
            .find_by_task_id(task_id)
            .ok_or(StateConflict::UnknownTask)?;
        validate_request(&target, encoder.as_ref(), mixing.as_ref())?;

        let claimed = self.claimed_destinations(Some(request_id));
        let task = self
            .tasks
            .get_mut(&request_id)
            .ok_or(StateConflict::UnknownTask)?;

        if task.state != PublishTaskState::Active {
            return Err(StateConflict::TaskNotUpdatable.into());
        }
        // A relay may switch between CDN modes, but not to or from a room mix.
        let into_room = |mode: PublishMode| mode == PublishMode::MixStreamToRoom;
        if into_room(task.request.target.mode) != into_room(target.mode)
            || output_kind_of(task.request.encoder.as_ref()) != output_kind_of(encoder.as_ref())
        {
            return Err(StateConflict::IncompatibleModeSwitch.into());
        }
        if target.destinations().iter().any(|d| claimed.contains(d)) {
            return Err(StateConflict::DuplicatePublishTarget.into());
        }

        let next = PublishRequest {
            target,
            encoder,
            mixing,
        };
        let intent = EngineIntent::UpdatePublishMediaStream {
            request_id,
            task_id: task_id.clone(),
            target: next.target.clone(),
            encoder: next.encoder,
            mixing: next.mixing.clone(),
        };
        task.rollback = Some(std::mem::replace(&mut task.request, next));
        task.state = PublishTaskState::Updating;
        Ok(vec![PublishEffect::Engine(intent)])
    }

    /// Apply the engine's answer to an update. Failure restores the previous request.
    pub fn complete_update(&mut self, task_id: &TaskId, code: i32, message: &str) -> Vec<PublishEffect> {
        let Some(request_id) = self.find_by_task_id(task_id) else {
            return Vec::new();
        };
        let Some(task) = self.tasks.get_mut(&request_id) else {
            return Vec::new();
        };
        if task.state != PublishTaskState::Updating {
            return Vec::new();
        }
        if code < 0 {
            if let Some(previous) = task.rollback.take() {
                task.request = previous;
            }
        }
        task.rollback = None;
        task.state = PublishTaskState::Active;
        vec![PublishEffect::Updated(PublishUpdate {
            request_id,
            task_id: Some(task_id.clone()),
            state: PublishTaskState::Active,
            code,
            message: message.to_string(),
        })]
    }

    /// Stop one task, or every task of this session when `task_id` is `None`.
    pub fn stop(&mut self, task_id: Option<&TaskId>) -> Result<Vec<PublishEffect>, StateConflict> {
        let targets: Vec<PublishRequestId> = match task_id {
            Some(id) => vec![self.find_by_task_id(id).ok_or(StateConflict::UnknownTask)?],
            None => self.tasks.keys().copied().collect(),
        };

        let mut effects = Vec::new();
        for request_id in targets {
            let Some(task) = self.tasks.get_mut(&request_id) else {
                continue;
            };
            match task.state {
                PublishTaskState::Stopping | PublishTaskState::Stopped => {}
                _ => {
                    task.state = PublishTaskState::Stopping;
                    if let Some(task_id) = task.task_id.clone() {
                        effects.push(PublishEffect::Engine(
                            EngineIntent::StopPublishMediaStream { task_id },
                        ));
                    }
                }
            }
        }
        Ok(effects)
    }

    /// Apply a stop acknowledgment, or an engine-initiated stop.
    pub fn complete_stop(&mut self, task_id: &TaskId, code: i32, message: &str) -> Vec<PublishEffect> {
        let Some(request_id) = self.find_by_task_id(task_id) else {
            return Vec::new();
        };
        self.tasks.remove(&request_id);
        vec![PublishEffect::Updated(PublishUpdate {
            request_id,
            task_id: Some(task_id.clone()),
            state: PublishTaskState::Stopped,
            code,
            message: message.to_string(),
        })]
    }

    /// Drop every task without waiting for the engine.
    ///
    /// Known task ids get a fire-and-forget stop. Observers see `Stopped`
    /// immediately. Requests still pending from an earlier abandon are
    /// forgotten, so the set only spans the room being left.
    pub fn abandon_all(&mut self) -> Vec<PublishEffect> {
        self.abandoned.clear();
        let mut effects = Vec::new();
        for (request_id, task) in self.tasks.drain() {
            match &task.task_id {
                Some(task_id) => effects.push(PublishEffect::Engine(
                    EngineIntent::StopPublishMediaStream {
                        task_id: task_id.clone(),
                    },
                )),
                None => {
                    self.abandoned.insert(request_id);
                }
            }
            effects.push(PublishEffect::Updated(PublishUpdate {
                request_id,
                task_id: task.task_id,
                state: PublishTaskState::Stopped,
                code: 0,
                message: String::new(),
            }));
        }
        effects
    }

    #[must_use]
    pub fn tasks(&self) -> Vec<PublishTaskView> {
        let mut views: Vec<PublishTaskView> = self
            .tasks
            .iter()
            .map(|(request_id, task)| PublishTaskView {
                request_id: *request_id,
                task_id: task.task_id.clone(),
                mode: task.request.target.mode,
                cdn_urls: task.request.target.cdn_urls.clone(),
                state: task.state,
            })
            .collect();
        views.sort_by_key(|v| v.request_id.0);
        views
    }

    #[must_use]
    pub fn state_of(&self, request_id: PublishRequestId) -> Option<PublishTaskState> {
        self.tasks.get(&request_id).map(|t| t.state)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
