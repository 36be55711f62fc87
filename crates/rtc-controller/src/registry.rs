//! Remote stream registry.
//!
//! Tracks subscription state per `(user_id, StreamType)` together with the
//! caller's render target. The registry is plain data owned by a session
//! actor: every operation returns the [`RegistryEffect`]s the actor must
//! apply, in order.
//!
//! Invariants:
//! - A user never has Big and Small subscribed at the same time.
//! - `clear` empties the registry in one step and resets every mute flag.

use crate::device::RenderTarget;
use crate::engine::EngineIntent;
use crate::errors::StateConflict;
use crate::params::{RecvMode, StreamType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionState {
    NotSubscribed,
    Subscribing,
    Active,
    /// Subscribed with remote video muted locally.
    Muted,
}

impl SubscriptionState {
    #[must_use]
    pub const fn is_subscribed(self) -> bool {
        !matches!(self, SubscriptionState::NotSubscribed)
    }
}

/// Scope of a remote mute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserScope {
    User(String),
    All,
}

/// A state transition to report to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChange {
    pub user_id: String,
    pub stream_type: StreamType,
    pub state: SubscriptionState,
    pub available: bool,
}

#[derive(Debug)]
pub enum RegistryEffect {
    Engine(EngineIntent),
    Changed(StreamChange),
}

/// Read-only view of one remote stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStreamView {
    pub state: SubscriptionState,
    pub available: bool,
    pub has_target: bool,
}

#[derive(Debug)]
struct StreamEntry {
    state: SubscriptionState,
    target: Option<RenderTarget>,
    available: bool,
}

type StreamKey = (String, StreamType);

#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: BTreeMap<StreamKey, StreamEntry>,
    remote_users: BTreeSet<String>,
    audio_available: BTreeSet<String>,
    video_muted: HashSet<StreamKey>,
    mute_all_video: bool,
    audio_mute_overrides: HashMap<String, bool>,
    mute_all_audio: bool,
}

impl StreamRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for a new room. Remote audio starts muted when auto-receive is off.
    pub fn reset_for_room(&mut self, recv: RecvMode) {
        self.streams.clear();
        self.remote_users.clear();
        self.audio_available.clear();
        self.video_muted.clear();
        self.mute_all_video = false;
        self.audio_mute_overrides.clear();
        self.mute_all_audio = !recv.auto_audio;
    }

    fn key(user_id: &str, stream_type: StreamType) -> StreamKey {
        (user_id.to_string(), stream_type)
    }

    fn video_is_muted(&self, key: &StreamKey) -> bool {
        self.mute_all_video || self.video_muted.contains(key)
    }

    fn change(key: &StreamKey, entry: &StreamEntry) -> RegistryEffect {
        RegistryEffect::Changed(StreamChange {
            user_id: key.0.clone(),
            stream_type: key.1,
            state: entry.state,
            available: entry.available,
        })
    }

    fn removed(key: &StreamKey) -> RegistryEffect {
        RegistryEffect::Changed(StreamChange {
            user_id: key.0.clone(),
            stream_type: key.1,
            state: SubscriptionState::NotSubscribed,
            available: false,
        })
    }

    /// Drop an entry that is neither subscribed nor available.
    fn prune(&mut self, key: &StreamKey) {
        if let Some(entry) = self.streams.get(key) {
            if !entry.available && !entry.state.is_subscribed() {
                self.streams.remove(key);
            }
        }
    }

    fn stop_view(&mut self, key: &StreamKey, effects: &mut Vec<RegistryEffect>) {
        if let Some(entry) = self.streams.get_mut(key) {
            if entry.state.is_subscribed() {
                entry.state = SubscriptionState::NotSubscribed;
                entry.target = None;
                effects.push(RegistryEffect::Engine(EngineIntent::StopRemoteView {
                    user_id: key.0.clone(),
                    stream_type: key.1,
                }));
                effects.push(Self::change(key, entry));
            }
        }
        self.prune(key);
    }

    /// Subscribe to a remote stream, or replace the render target of an
    /// existing subscription without re-subscribing.
    ///
    /// Subscribing to Big or Small drops a subscription to the other first.
    pub fn subscribe(
        &mut self,
        user_id: &str,
        stream_type: StreamType,
        target: Option<RenderTarget>,
    ) -> Vec<RegistryEffect> {
        let mut effects = Vec::new();
        let key = Self::key(user_id, stream_type);

        if let Some(entry) = self.streams.get_mut(&key) {
            if entry.state.is_subscribed() {
                entry.target = target.clone();
                effects.push(RegistryEffect::Engine(EngineIntent::UpdateRemoteView {
                    user_id: user_id.to_string(),
                    stream_type,
                    target,
                }));
                return effects;
            }
        }

        if let Some(peer) = stream_type.exclusive_peer() {
            let peer_key = Self::key(user_id, peer);
            self.stop_view(&peer_key, &mut effects);
        }

        let entry = self.streams.entry(key.clone()).or_insert(StreamEntry {
            state: SubscriptionState::NotSubscribed,
            target: None,
            available: false,
        });
        entry.state = SubscriptionState::Subscribing;
        entry.target = target.clone();
        effects.push(RegistryEffect::Engine(EngineIntent::StartRemoteView {
            user_id: user_id.to_string(),
            stream_type,
            target,
        }));
        effects.push(Self::change(&key, entry));
        effects
    }

    /// Apply the engine's answer to a pending subscription.
    pub fn complete_subscribe(
        &mut self,
        user_id: &str,
        stream_type: StreamType,
        code: i32,
    ) -> Vec<RegistryEffect> {
        let key = Self::key(user_id, stream_type);
        let muted = self.video_is_muted(&key);
        let mut effects = Vec::new();

        if let Some(entry) = self.streams.get_mut(&key) {
            if entry.state != SubscriptionState::Subscribing {
                return effects;
            }
            if code >= 0 {
                entry.state = if muted {
                    SubscriptionState::Muted
                } else {
                    SubscriptionState::Active
                };
            } else {
                entry.state = SubscriptionState::NotSubscribed;
                entry.target = None;
            }
            effects.push(Self::change(&key, entry));
        }
        self.prune(&key);
        effects
    }

    /// Unsubscribe one stream. Unsubscribed streams are left alone.
    pub fn unsubscribe(&mut self, user_id: &str, stream_type: StreamType) -> Vec<RegistryEffect> {
        let mut effects = Vec::new();
        self.stop_view(&Self::key(user_id, stream_type), &mut effects);
        effects
    }

    /// Unsubscribe every stream with a single engine intent.
    pub fn unsubscribe_all(&mut self) -> Vec<RegistryEffect> {
        let mut effects = vec![RegistryEffect::Engine(EngineIntent::StopAllRemoteView)];
        let keys: Vec<StreamKey> = self.streams.keys().cloned().collect();
        for key in keys {
            if let Some(entry) = self.streams.get_mut(&key) {
                if entry.state.is_subscribed() {
                    entry.state = SubscriptionState::NotSubscribed;
                    entry.target = None;
                    effects.push(Self::change(&key, entry));
                }
            }
            self.prune(&key);
        }
        effects
    }

    /// Replace the render target of a subscribed stream.
    pub fn update_target(
        &mut self,
        user_id: &str,
        stream_type: StreamType,
        target: Option<RenderTarget>,
    ) -> Result<Vec<RegistryEffect>, StateConflict> {
        let entry = self
            .streams
            .get_mut(&Self::key(user_id, stream_type))
            .filter(|e| e.state.is_subscribed())
            .ok_or(StateConflict::StreamNotSubscribed)?;
        entry.target = target.clone();
        Ok(vec![RegistryEffect::Engine(EngineIntent::UpdateRemoteView {
            user_id: user_id.to_string(),
            stream_type,
            target,
        })])
    }

    /// Switch a user's camera subscription between Big and Small, keeping
    /// its render target and state.
    pub fn switch_camera_stream(
        &mut self,
        user_id: &str,
        stream_type: StreamType,
    ) -> Result<Vec<RegistryEffect>, StateConflict> {
        let peer = stream_type
            .exclusive_peer()
            .ok_or(StateConflict::StreamNotSubscribed)?;
        let key = Self::key(user_id, stream_type);
        let peer_key = Self::key(user_id, peer);

        if self
            .streams
            .get(&key)
            .is_some_and(|e| e.state.is_subscribed())
        {
            return Ok(Vec::new());
        }
        let (state, target) = match self.streams.get_mut(&peer_key) {
            Some(entry) if entry.state.is_subscribed() => {
                let moved = (entry.state, entry.target.take());
                entry.state = SubscriptionState::NotSubscribed;
                moved
            }
            _ => return Err(StateConflict::StreamNotSubscribed),
        };

        let mut effects = vec![RegistryEffect::Engine(
            EngineIntent::SetRemoteVideoStreamType {
                user_id: user_id.to_string(),
                stream_type,
            },
        )];
        if let Some(entry) = self.streams.get(&peer_key) {
            effects.push(Self::change(&peer_key, entry));
        }
        self.prune(&peer_key);

        let available = self
            .streams
            .get(&key)
            .is_some_and(|e| e.available);
        let entry = self.streams.entry(key.clone()).or_insert(StreamEntry {
            state,
            target: None,
            available,
        });
        entry.state = state;
        entry.target = target;
        effects.push(Self::change(&key, entry));
        Ok(effects)
    }

    /// Mute or unmute remote video for one stream or for everyone.
    pub fn set_video_mute(
        &mut self,
        scope: UserScope,
        stream_type: StreamType,
        mute: bool,
    ) -> Vec<RegistryEffect> {
        let mut effects = Vec::new();
        match &scope {
            UserScope::User(user_id) => {
                let key = Self::key(user_id, stream_type);
                if mute {
                    self.video_muted.insert(key);
                } else {
                    self.video_muted.remove(&key);
                }
                effects.push(RegistryEffect::Engine(EngineIntent::MuteRemoteVideo {
                    user_id: user_id.clone(),
                    stream_type,
                    mute,
                }));
            }
            UserScope::All => {
                self.mute_all_video = mute;
                self.video_muted.clear();
                effects.push(RegistryEffect::Engine(EngineIntent::MuteAllRemoteVideo {
                    mute,
                }));
            }
        }

        let keys: Vec<StreamKey> = self
            .streams
            .keys()
            .filter(|(user, st)| match &scope {
                UserScope::User(target) => user == target && *st == stream_type,
                UserScope::All => true,
            })
            .cloned()
            .collect();
        for key in keys {
            let muted = self.video_is_muted(&key);
            if let Some(entry) = self.streams.get_mut(&key) {
                let next = match entry.state {
                    SubscriptionState::Active if muted => SubscriptionState::Muted,
                    SubscriptionState::Muted if !muted => SubscriptionState::Active,
                    other => other,
                };
                if next != entry.state {
                    entry.state = next;
                    effects.push(Self::change(&key, entry));
                }
            }
        }
        effects
    }

    /// Mute or unmute remote audio for one user or for everyone.
    pub fn set_audio_mute(&mut self, scope: UserScope, mute: bool) -> Vec<RegistryEffect> {
        match scope {
            UserScope::User(user_id) => {
                self.audio_mute_overrides.insert(user_id.clone(), mute);
                vec![RegistryEffect::Engine(EngineIntent::MuteRemoteAudio {
                    user_id,
                    mute,
                })]
            }
            UserScope::All => {
                self.mute_all_audio = mute;
                self.audio_mute_overrides.clear();
                vec![RegistryEffect::Engine(EngineIntent::MuteAllRemoteAudio {
                    mute,
                })]
            }
        }
    }

    #[must_use]
    pub fn is_audio_muted(&self, user_id: &str) -> bool {
        self.audio_mute_overrides
            .get(user_id)
            .copied()
            .unwrap_or(self.mute_all_audio)
    }

    #[must_use]
    pub fn mute_all_audio(&self) -> bool {
        self.mute_all_audio
    }

    #[must_use]
    pub fn mute_all_video(&self) -> bool {
        self.mute_all_video
    }

    /// Record a remote stream becoming available or unavailable.
    ///
    /// An unavailable stream is removed even if subscribed. Losing Big also
    /// removes Small since both come from the same camera.
    pub fn set_available(
        &mut self,
        user_id: &str,
        stream_type: StreamType,
        available: bool,
    ) -> Vec<RegistryEffect> {
        let mut effects = Vec::new();
        let key = Self::key(user_id, stream_type);
        if available {
            self.remote_users.insert(user_id.to_string());
            let entry = self.streams.entry(key.clone()).or_insert(StreamEntry {
                state: SubscriptionState::NotSubscribed,
                target: None,
                available: false,
            });
            if !entry.available {
                entry.available = true;
                effects.push(Self::change(&key, entry));
            }
            return effects;
        }

        let mut keys = vec![key];
        if stream_type == StreamType::Big {
            keys.push(Self::key(user_id, StreamType::Small));
        }
        for key in keys {
            if self.streams.remove(&key).is_some() {
                effects.push(Self::removed(&key));
            }
        }
        effects
    }

    pub fn set_audio_available(&mut self, user_id: &str, available: bool) {
        if available {
            self.remote_users.insert(user_id.to_string());
            self.audio_available.insert(user_id.to_string());
        } else {
            self.audio_available.remove(user_id);
        }
    }

    pub fn user_entered(&mut self, user_id: &str) {
        self.remote_users.insert(user_id.to_string());
    }

    /// Forget a user who left the room.
    pub fn remove_user(&mut self, user_id: &str) -> Vec<RegistryEffect> {
        self.remote_users.remove(user_id);
        self.audio_available.remove(user_id);
        self.audio_mute_overrides.remove(user_id);
        self.video_muted.retain(|(user, _)| user != user_id);

        let keys: Vec<StreamKey> = self
            .streams
            .keys()
            .filter(|(user, _)| user == user_id)
            .cloned()
            .collect();
        let mut effects = Vec::new();
        for key in keys {
            if self.streams.remove(&key).is_some() {
                effects.push(Self::removed(&key));
            }
        }
        effects
    }

    /// Clear everything for room exit. Render targets are released, not
    /// destroyed. No engine intents are produced: leaving the room already
    /// tears down every remote view.
    pub fn clear(&mut self) -> Vec<RegistryEffect> {
        let effects: Vec<RegistryEffect> = self.streams.keys().map(Self::removed).collect();
        self.streams.clear();
        self.remote_users.clear();
        self.audio_available.clear();
        self.video_muted.clear();
        self.mute_all_video = false;
        self.audio_mute_overrides.clear();
        self.mute_all_audio = false;
        effects
    }

    #[must_use]
    pub fn query(&self, user_id: &str, stream_type: StreamType) -> SubscriptionState {
        self.streams
            .get(&Self::key(user_id, stream_type))
            .map_or(SubscriptionState::NotSubscribed, |e| e.state)
    }

    #[must_use]
    pub fn stream(&self, user_id: &str, stream_type: StreamType) -> Option<RemoteStreamView> {
        self.streams
            .get(&Self::key(user_id, stream_type))
            .map(|e| RemoteStreamView {
                state: e.state,
                available: e.available,
                has_target: e.target.is_some(),
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    #[must_use]
    pub fn remote_users(&self) -> Vec<String> {
        self.remote_users.iter().cloned().collect()
    }

    /// Whether any mute flag differs from its default.
    #[must_use]
    pub fn has_mute_state(&self) -> bool {
        self.mute_all_video
            || self.mute_all_audio
            || !self.video_muted.is_empty()
            || !self.audio_mute_overrides.is_empty()
    }
}
