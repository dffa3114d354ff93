//! Discrete lifecycle states.
//!
//! [`ConnectionState`] mirrors the transport's room connection state.
//! [`AgentState`] is derived from several independent signals (see
//! [`crate::agent`]) and carries a fixed set of boolean projections that every
//! consumer must agree on.

use std::fmt;

/// Room connection state as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected to a room
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Connected and media is flowing
    Connected,
    /// Media connection lost, transport is reconnecting
    Reconnecting,
    /// Signal connection lost, transport is reconnecting
    SignalReconnecting,
}

impl ConnectionState {
    /// `Connected`, `Reconnecting` and `SignalReconnecting` all count as
    /// connected for session logic.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnecting | Self::SignalReconnecting)
    }

    /// Lowercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::SignalReconnecting => "signalReconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AgentState {
    /// Room is disconnected
    #[default]
    Disconnected,
    /// Room is connecting or connected, agent has not reported a state
    Connecting,
    /// Agent reported it is starting up
    Initializing,
    /// Agent reported it is idle
    Idle,
    /// Local microphone is buffering audio before the agent is ready
    PreConnectBuffering,
    /// Agent is listening
    Listening,
    /// Agent is producing a response
    Thinking,
    /// Agent is speaking
    Speaking,
    /// At least one failure reason is outstanding
    Failed,
}

impl AgentState {
    /// Agent is ready for conversation.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Listening | Self::Thinking | Self::Speaking)
    }

    /// Audio sent now will be heard, either live or from the pre-connect
    /// buffer.
    pub fn can_listen(self) -> bool {
        matches!(self, Self::PreConnectBuffering) || self.is_connected()
    }

    /// No further progress will happen without a new session attempt.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }

    /// Progress is expected but the agent is not ready yet.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Connecting | Self::Initializing | Self::Idle)
    }

    /// Parse the value of the agent state attribute.
    ///
    /// Only the states an agent reports about itself are accepted; the
    /// session-side states (`connecting`, `failed`, ...) are never taken from
    /// a remote participant.
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value {
            "initializing" => Some(Self::Initializing),
            "idle" => Some(Self::Idle),
            "listening" => Some(Self::Listening),
            "thinking" => Some(Self::Thinking),
            "speaking" => Some(Self::Speaking),
            _ => None,
        }
    }

    /// Kebab-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::PreConnectBuffering => "pre-connect-buffering",
            Self::Listening => "listening",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cause of an agent failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No agent participant joined before the deadline
    TimeoutNoAgent,
    /// Agent joined but never reached a connected state before the deadline
    TimeoutNotReady,
    /// Agent left while the room was still connected
    UnexpectedDisconnect,
}

impl FailureKind {
    /// Human-readable description for this cause.
    pub fn message(self) -> &'static str {
        match self {
            Self::TimeoutNoAgent => "Agent did not join the room.",
            Self::TimeoutNotReady => "Agent joined the room but did not complete initializing.",
            Self::UnexpectedDisconnect => "Agent left the room unexpectedly.",
        }
    }
}

/// A human-readable failure tagged with its cause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FailureReason {
    /// Cause
    pub kind: FailureKind,
    /// Description shown to users
    pub message: String,
}

impl FailureReason {
    /// Failure with the default message for `kind`.
    pub fn new(kind: FailureKind) -> Self {
        Self { kind, message: kind.message().to_string() }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [AgentState; 9] = [
        AgentState::Disconnected,
        AgentState::Connecting,
        AgentState::Initializing,
        AgentState::Idle,
        AgentState::PreConnectBuffering,
        AgentState::Listening,
        AgentState::Thinking,
        AgentState::Speaking,
        AgentState::Failed,
    ];

    #[test]
    fn every_state_is_in_exactly_one_bucket() {
        for state in ALL {
            let buckets = [
                state.is_connected(),
                state.is_finished(),
                state.is_pending(),
                state == AgentState::PreConnectBuffering,
            ];
            assert_eq!(buckets.iter().filter(|b| **b).count(), 1, "{state}");
        }
    }

    #[test]
    fn connected_implies_can_listen() {
        for state in ALL {
            if state.is_connected() {
                assert!(state.can_listen());
            }
        }
        assert!(AgentState::PreConnectBuffering.can_listen());
        assert!(!AgentState::Idle.can_listen());
    }

    #[test]
    fn attribute_parsing_rejects_session_states() {
        assert_eq!(AgentState::from_attribute("thinking"), Some(AgentState::Thinking));
        assert_eq!(AgentState::from_attribute("failed"), None);
        assert_eq!(AgentState::from_attribute("pre-connect-buffering"), None);
        assert_eq!(AgentState::from_attribute(""), None);
    }

    #[test]
    fn reconnecting_counts_as_connected() {
        assert!(ConnectionState::Reconnecting.is_connected());
        assert!(ConnectionState::SignalReconnecting.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
    }

    #[test]
    fn failure_messages() {
        assert_eq!(
            FailureReason::new(FailureKind::TimeoutNoAgent).to_string(),
            "Agent did not join the room."
        );
    }
}
