//! Observable state snapshots for invariant checking.
//!
//! Invariants operate on snapshots rather than live sessions so that every
//! check sees one consistent point in time.

use voxroom_client::{RoomTransport, Session, SessionSnapshot};
use voxroom_core::{AgentSnapshot, ConnectionState, Environment};

/// Snapshot of every session under test.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-session observations.
    pub sessions: Vec<SessionObservation>,
}

impl SystemSnapshot {
    /// Snapshot with no sessions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot of a single session.
    pub fn single(session: SessionObservation) -> Self {
        Self { sessions: vec![session] }
    }

    /// Observe `session` now.
    pub fn of<T, E>(session: &Session<T, E>) -> Self
    where
        T: RoomTransport + ?Sized,
        E: Environment,
    {
        Self::single(SessionObservation::of(session))
    }

    /// Add an observation.
    pub fn add_session(&mut self, session: SessionObservation) {
        self.sessions.push(session);
    }
}

/// One session's observable state.
#[derive(Debug, Clone)]
pub struct SessionObservation {
    /// Mirrored room connection state
    pub connection_state: ConnectionState,
    /// Session snapshot
    pub session: SessionSnapshot,
    /// Agent snapshot
    pub agent: AgentSnapshot,
}

impl SessionObservation {
    /// Observe `session` now.
    pub fn of<T, E>(session: &Session<T, E>) -> Self
    where
        T: RoomTransport + ?Sized,
        E: Environment,
    {
        Self {
            connection_state: session.connection_state(),
            session: session.snapshot(),
            agent: session.agent().snapshot(),
        }
    }
}
