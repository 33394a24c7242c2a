//! Terminal sessions and the registration/authentication state machine.
//!
//! ```text
//! INITIAL --registration--> REGISTERING --authentication--> AUTHENTICATING
//!                                                                 |
//!                                         heartbeat / location    v
//!                                                           AUTHENTICATED
//! ```
//!
//! `DISCONNECTED` is terminal and only reported for sessions removed by the
//! timeout sweep or an operator.

use crate::error::SessionError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jtgate_protocol::msg_id;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle state of a terminal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    #[default]
    Initial,
    Registering,
    Authenticating,
    Authenticated,
    Disconnected,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initial => "INITIAL",
            SessionState::Registering => "REGISTERING",
            SessionState::Authenticating => "AUTHENTICATING",
            SessionState::Authenticated => "AUTHENTICATED",
            SessionState::Disconnected => "DISCONNECTED",
        }
    }

    /// Returns the state after accepting `message_id`, or `None` when the
    /// message is not allowed in this state.
    pub fn next(self, message_id: u16) -> Option<SessionState> {
        use SessionState::*;

        match (self, message_id) {
            (Disconnected, _) => None,
            (_, msg_id::REGISTRATION) => Some(Registering),
            (Registering, msg_id::AUTHENTICATION) => Some(Authenticating),
            (Authenticated, msg_id::AUTHENTICATION) => Some(Authenticated),
            (Authenticating, msg_id::HEARTBEAT | msg_id::LOCATION_REPORT) => Some(Authenticated),
            (Authenticated, _) => Some(Authenticated),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-terminal session record.
#[derive(Debug, Clone)]
pub struct Session {
    pub terminal_id: String,
    pub state: SessionState,
    pub message_count: u64,
    created_at: Instant,
    last_activity: Instant,
    created_at_utc: DateTime<Utc>,
    last_activity_utc: DateTime<Utc>,
}

impl Session {
    fn new(terminal_id: &str, now: Instant) -> Self {
        let wall = Utc::now();
        Self {
            terminal_id: terminal_id.to_string(),
            state: SessionState::Initial,
            message_count: 0,
            created_at: now,
            last_activity: now,
            created_at_utc: wall,
            last_activity_utc: wall,
        }
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            terminal_id: self.terminal_id.clone(),
            state: self.state,
            message_count: self.message_count,
            created_at: self.created_at_utc,
            last_activity_at: self.last_activity_utc,
            idle_secs: self.idle_for(Instant::now()).as_secs(),
        }
    }
}

/// Read-only view of a session for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub terminal_id: String,
    pub state: SessionState,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub idle_secs: u64,
}

/// Concurrent map of terminal id to session.
///
/// Updates for one terminal are serialized on its map entry; different
/// terminals never contend on a registry-wide lock.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    timeout: Duration,
}

impl SessionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Records a message from `terminal_id` and applies its transition.
    ///
    /// The session is created on first contact and its activity is bumped
    /// even when the message is rejected; a rejected message leaves the
    /// state unchanged.
    pub fn touch(&self, terminal_id: &str, message_id: u16) -> Result<SessionState, SessionError> {
        let now = Instant::now();
        let mut session = self
            .sessions
            .entry(terminal_id.to_string())
            .or_insert_with(|| {
                tracing::debug!("New session for terminal {}", terminal_id);
                Session::new(terminal_id, now)
            });

        session.last_activity = now;
        session.last_activity_utc = Utc::now();
        session.message_count += 1;

        let current = session.state;
        match current.next(message_id) {
            Some(next) => {
                if next != current {
                    tracing::debug!(
                        "Terminal {} session {} -> {} on message {:#06x}",
                        terminal_id,
                        current,
                        next,
                        message_id
                    );
                }
                session.state = next;
                Ok(next)
            }
            None => Err(SessionError::IllegalTransition {
                terminal_id: terminal_id.to_string(),
                state: current,
                message_id,
            }),
        }
    }

    pub fn get(&self, terminal_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(terminal_id).map(|s| s.snapshot())
    }

    pub fn state(&self, terminal_id: &str) -> Option<SessionState> {
        self.sessions.get(terminal_id).map(|s| s.state)
    }

    /// Removes a session, returning its final snapshot as DISCONNECTED.
    pub fn remove(&self, terminal_id: &str) -> Option<SessionSnapshot> {
        self.sessions.remove(terminal_id).map(|(_, session)| {
            tracing::info!("Removed session for terminal {}", terminal_id);
            disconnected(&session)
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshots of every session, ordered by terminal id.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<_> = self.sessions.iter().map(|s| s.snapshot()).collect();
        sessions.sort_by(|a, b| a.terminal_id.cmp(&b.terminal_id));
        sessions
    }

    /// Number of sessions in `state`.
    pub fn count_in(&self, state: SessionState) -> usize {
        self.sessions.iter().filter(|s| s.state == state).count()
    }

    /// Removes sessions idle longer than the timeout.
    pub fn sweep_expired(&self) -> Vec<SessionSnapshot> {
        self.sweep_expired_at(Instant::now())
    }

    /// Removes sessions idle longer than the timeout as of `now`.
    ///
    /// Collects candidate ids first, then removes each one only if it is
    /// still idle, so a terminal that sent a message in between survives.
    pub fn sweep_expired_at(&self, now: Instant) -> Vec<SessionSnapshot> {
        let timeout = self.timeout;
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.idle_for(now) > timeout)
            .map(|s| s.key().clone())
            .collect();

        let removed: Vec<SessionSnapshot> = candidates
            .iter()
            .filter_map(|id| {
                self.sessions
                    .remove_if(id, |_, s| s.idle_for(now) > timeout)
                    .map(|(_, session)| disconnected(&session))
            })
            .collect();

        if !removed.is_empty() {
            tracing::info!("Swept {} idle sessions", removed.len());
        }
        removed
    }
}

fn disconnected(session: &Session) -> SessionSnapshot {
    let mut snapshot = session.snapshot();
    snapshot.state = SessionState::Disconnected;
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TERMINAL: &str = "13800138000";

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Duration::from_secs(1800))
    }

    #[test]
    fn test_transition_table() {
        use SessionState::*;

        assert_eq!(Initial.next(msg_id::REGISTRATION), Some(Registering));
        assert_eq!(Authenticated.next(msg_id::REGISTRATION), Some(Registering));
        assert_eq!(Registering.next(msg_id::AUTHENTICATION), Some(Authenticating));
        assert_eq!(Authenticated.next(msg_id::AUTHENTICATION), Some(Authenticated));
        assert_eq!(Authenticating.next(msg_id::HEARTBEAT), Some(Authenticated));
        assert_eq!(Authenticating.next(msg_id::LOCATION_REPORT), Some(Authenticated));
        assert_eq!(Authenticated.next(msg_id::BATCH_LOCATION), Some(Authenticated));

        assert_eq!(Initial.next(msg_id::AUTHENTICATION), None);
        assert_eq!(Initial.next(msg_id::HEARTBEAT), None);
        assert_eq!(Registering.next(msg_id::HEARTBEAT), None);
        assert_eq!(Authenticating.next(msg_id::BATCH_LOCATION), None);
        assert_eq!(Disconnected.next(msg_id::REGISTRATION), None);
    }

    #[test]
    fn test_unregistered_terminal_rejected() {
        let registry = registry();
        let err = registry.touch(TERMINAL, msg_id::LOCATION_REPORT).unwrap_err();
        assert!(matches!(
            err,
            SessionError::IllegalTransition {
                state: SessionState::Initial,
                message_id: msg_id::LOCATION_REPORT,
                ..
            }
        ));

        // The session exists and counted the message
        let session = registry.get(TERMINAL).unwrap();
        assert_eq!(session.state, SessionState::Initial);
        assert_eq!(session.message_count, 1);
    }

    #[test]
    fn test_full_login_sequence() {
        let registry = registry();
        assert_eq!(
            registry.touch(TERMINAL, msg_id::REGISTRATION).unwrap(),
            SessionState::Registering
        );
        assert_eq!(
            registry.touch(TERMINAL, msg_id::AUTHENTICATION).unwrap(),
            SessionState::Authenticating
        );
        assert_eq!(
            registry.touch(TERMINAL, msg_id::HEARTBEAT).unwrap(),
            SessionState::Authenticated
        );
        assert_eq!(
            registry.touch(TERMINAL, msg_id::BATCH_LOCATION).unwrap(),
            SessionState::Authenticated
        );
        assert_eq!(registry.get(TERMINAL).unwrap().message_count, 4);
        assert_eq!(registry.count_in(SessionState::Authenticated), 1);
    }

    #[test]
    fn test_remove_reports_disconnected() {
        let registry = registry();
        registry.touch(TERMINAL, msg_id::REGISTRATION).unwrap();

        let removed = registry.remove(TERMINAL).unwrap();
        assert_eq!(removed.state, SessionState::Disconnected);
        assert!(registry.get(TERMINAL).is_none());
        assert!(registry.remove(TERMINAL).is_none());
    }

    #[test]
    fn test_sweep_removes_only_idle_sessions() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        registry.touch("1001", msg_id::REGISTRATION).unwrap();
        registry.touch("1002", msg_id::REGISTRATION).unwrap();

        assert!(registry.sweep_expired_at(Instant::now()).is_empty());
        assert_eq!(registry.len(), 2);

        let later = Instant::now() + Duration::from_secs(61);
        let removed = registry.sweep_expired_at(later);
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|s| s.state == SessionState::Disconnected));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_sorted() {
        let registry = registry();
        registry.touch("3", msg_id::REGISTRATION).unwrap();
        registry.touch("1", msg_id::REGISTRATION).unwrap();
        registry.touch("2", msg_id::REGISTRATION).unwrap();

        let ids: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|s| s.terminal_id)
            .collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_snapshot_serializes_state_names() {
        let registry = registry();
        registry.touch(TERMINAL, msg_id::REGISTRATION).unwrap();
        let json = serde_json::to_value(registry.get(TERMINAL).unwrap()).unwrap();
        assert_eq!(json["state"], "REGISTERING");
        assert_eq!(json["terminal_id"], TERMINAL);
    }

    #[test]
    fn test_concurrent_touches_are_counted() {
        let registry = Arc::new(registry());
        registry.touch(TERMINAL, msg_id::REGISTRATION).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        registry.touch(TERMINAL, msg_id::REGISTRATION).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.get(TERMINAL).unwrap().message_count, 801);
    }
}
