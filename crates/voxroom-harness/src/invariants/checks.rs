//! Standard invariant checks.

use voxroom_core::{AgentPhase, AgentState, ConnectionState};

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// The agent is failed exactly when failure reasons are outstanding.
pub struct FailedIffReasons;

impl Invariant for FailedIffReasons {
    fn name(&self) -> &'static str {
        "failed_iff_reasons"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (i, session) in state.sessions.iter().enumerate() {
            let failed = session.agent.state() == AgentState::Failed;
            let reasons = session.agent.failure_reasons();
            if failed == reasons.is_empty() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "session {i}: state {} with {} failure reason(s)",
                        session.agent.state(),
                        reasons.len()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Boolean projections agree with the state and the phase agrees with its
/// fields.
///
/// Each state is in exactly one of connected, finished, pending or
/// pre-connect buffering, and `Present` never carries a state owned by
/// another phase.
pub struct ProjectionConsistency;

impl Invariant for ProjectionConsistency {
    fn name(&self) -> &'static str {
        "projection_consistency"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (i, session) in state.sessions.iter().enumerate() {
            let agent = &session.agent;
            let buckets = [
                agent.is_connected(),
                agent.is_finished(),
                agent.is_pending(),
                agent.state() == AgentState::PreConnectBuffering,
            ];
            let violation = if buckets.iter().filter(|b| **b).count() != 1 {
                Some(format!("state {} is in {buckets:?}", agent.state()))
            } else if agent.is_connected() && !agent.can_listen() {
                Some(format!("state {} is connected but cannot listen", agent.state()))
            } else if let AgentPhase::Present { state, .. } = &agent.phase {
                matches!(
                    state,
                    AgentState::Disconnected | AgentState::Connecting | AgentState::Failed
                )
                .then(|| format!("present phase carries {state}"))
            } else {
                None
            };

            if let Some(message) = violation {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("session {i}: {message}"),
                });
            }
        }
        Ok(())
    }
}

/// The session snapshot is `Connected` exactly when the connection state
/// counts as connected, and reports the same state.
pub struct SessionConnectedVariant;

impl Invariant for SessionConnectedVariant {
    fn name(&self) -> &'static str {
        "session_connected_variant"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (i, session) in state.sessions.iter().enumerate() {
            if session.session.is_connected() != session.connection_state.is_connected()
                || session.session.connection_state() != session.connection_state
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "session {i}: snapshot {:?} for connection state {}",
                        session.session, session.connection_state
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The agent only reads `Disconnected` while the room is disconnected.
pub struct AgentDisconnectedWithRoom;

impl Invariant for AgentDisconnectedWithRoom {
    fn name(&self) -> &'static str {
        "agent_disconnected_with_room"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (i, session) in state.sessions.iter().enumerate() {
            if session.agent.state() == AgentState::Disconnected
                && session.connection_state != ConnectionState::Disconnected
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "session {i}: agent disconnected while room is {}",
                        session.connection_state
                    ),
                });
            }
        }
        Ok(())
    }
}
