//! Per-subject tracking sessions.
//!
//! Everything the pipeline remembers between frames lives in a
//! [`Session`]: the stabilizer history and the freeze memory. The engine
//! holds none of it, so sessions for different subjects can be driven
//! from different threads against one shared engine.
//!
//! [`SessionRegistry`] is an optional caller-side map from
//! [`SessionId`] to session with explicit creation and eviction.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::config::OverlayConfig;
use crate::gate::StabilityState;
use crate::stabilizer::TemporalStabilizer;

/// Identifies one session in a [`SessionRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Frame-to-frame memory for one tracked subject.
///
/// Frames of a session must be processed in capture order.
#[derive(Debug, Clone)]
pub struct Session {
    stabilizer: TemporalStabilizer,
    state: StabilityState,
    frames: u64,
    last_active: Instant,
}

impl Session {
    /// A fresh session sized by `config`.
    #[must_use]
    pub fn new(config: &OverlayConfig) -> Self {
        Self {
            stabilizer: TemporalStabilizer::new(config.history_capacity, config.smoothing_window),
            state: StabilityState::new(),
            frames: 0,
            last_active: Instant::now(),
        }
    }

    /// The stabilizer history.
    #[must_use]
    pub const fn stabilizer(&self) -> &TemporalStabilizer {
        &self.stabilizer
    }

    /// The freeze memory.
    #[must_use]
    pub const fn state(&self) -> &StabilityState {
        &self.state
    }

    /// Frames processed so far.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// When the session last processed a frame.
    #[must_use]
    pub const fn last_active(&self) -> Instant {
        self.last_active
    }

    /// Drop history and freeze memory, as if newly created.
    pub fn reset(&mut self) {
        self.stabilizer.reset();
        self.state.clear();
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut TemporalStabilizer, &mut StabilityState) {
        (&mut self.stabilizer, &mut self.state)
    }

    pub(crate) const fn state_mut(&mut self) -> &mut StabilityState {
        &mut self.state
    }

    pub(crate) fn touch(&mut self) {
        self.frames = self.frames.saturating_add(1);
        self.last_active = Instant::now();
    }
}

/// Sessions keyed by id.
#[derive(Debug)]
pub struct SessionRegistry {
    config: OverlayConfig,
    sessions: HashMap<SessionId, Session>,
    next_id: u64,
}

impl SessionRegistry {
    /// An empty registry whose sessions are sized by `config`.
    #[must_use]
    pub fn new(config: &OverlayConfig) -> Self {
        Self {
            config: config.clone(),
            sessions: HashMap::new(),
            next_id: 0,
        }
    }

    /// Create a session under a fresh id.
    pub fn create(&mut self) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(id, Session::new(&self.config));
        tracing::info!(%id, active = self.sessions.len(), "session created");
        id
    }

    /// The session for `id`, created if missing.
    pub fn get_or_create(&mut self, id: SessionId) -> &mut Session {
        self.next_id = self.next_id.max(id.0.saturating_add(1));
        let config = &self.config;
        self.sessions.entry(id).or_insert_with(|| {
            tracing::info!(%id, "session created");
            Session::new(config)
        })
    }

    /// The session for `id`, if registered.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// The session for `id`, if registered.
    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Remove a session, returning it.
    pub fn evict(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        tracing::info!(%id, frames = session.frames(), "session evicted");
        Some(session)
    }

    /// Remove every session idle for longer than `max_idle`. Returns the
    /// number removed.
    pub fn evict_idle(&mut self, max_idle: Duration) -> usize {
        self.evict_idle_at(Instant::now(), max_idle)
    }

    /// [`evict_idle`](Self::evict_idle) against an explicit `now`.
    pub fn evict_idle_at(&mut self, now: Instant, max_idle: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|id, session| {
            let idle = now.saturating_duration_since(session.last_active());
            let keep = idle <= max_idle;
            if !keep {
                tracing::info!(%id, idle_ms = idle.as_millis(), "evicting idle session");
            }
            keep
        });
        before - self.sessions.len()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Registered ids, in ascending order.
    #[must_use]
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn create_hands_out_distinct_ids() {
        let mut registry = SessionRegistry::new(&OverlayConfig::default());
        let a = registry.create();
        let b = registry.create();
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec![a, b]);
        assert_eq!(a.to_string(), "session-0");
    }

    #[test]
    fn get_or_create_reserves_the_id() {
        let mut registry = SessionRegistry::new(&OverlayConfig::default());
        registry.get_or_create(SessionId(7)).touch();
        assert_eq!(registry.get(SessionId(7)).unwrap().frames(), 1);
        // Same id returns the same session.
        registry.get_or_create(SessionId(7)).touch();
        assert_eq!(registry.get(SessionId(7)).unwrap().frames(), 2);
        // Fresh ids never collide with it.
        assert_eq!(registry.create(), SessionId(8));
    }

    #[test]
    fn evict_removes_only_that_session() {
        let mut registry = SessionRegistry::new(&OverlayConfig::default());
        let a = registry.create();
        let b = registry.create();
        assert!(registry.evict(a).is_some());
        assert!(registry.evict(a).is_none());
        assert!(registry.get(a).is_none());
        assert!(registry.get_mut(b).is_some());
    }

    #[test]
    fn evict_idle_drops_stale_sessions() {
        let mut registry = SessionRegistry::new(&OverlayConfig::default());
        registry.create();
        registry.create();
        let now = Instant::now();

        assert_eq!(registry.evict_idle_at(now, Duration::from_secs(5)), 0);
        let later = now + Duration::from_secs(10);
        assert_eq!(registry.evict_idle_at(later, Duration::from_secs(5)), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn reset_clears_history_and_freeze_memory() {
        let config = OverlayConfig::default();
        let mut session = Session::new(&config);
        let render = std::sync::Arc::new(crate::types::RgbaImage::new(1, 1));
        let pose = std::sync::Arc::new(crate::sampler::PoseSample {
            landmarks: crate::sampler::Landmarks::default(),
            measurements: crate::sampler::Measurements::from_shoulders(
                crate::types::Point::new(0.0, 0.0),
                crate::types::Point::new(200.0, 0.0),
                200.0,
            ),
            confidence: 0.9,
            timestamp: 0.0,
        });
        session.state_mut().record_render(pose, render);
        assert!(session.state().last_stable_render().is_some());

        session.reset();
        assert!(session.state().last_stable_pose().is_none());
        assert!(session.stabilizer().is_empty());
    }
}
