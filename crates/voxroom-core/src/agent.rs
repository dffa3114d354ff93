//! Agent identification and lifecycle derivation.
//!
//! An agent is a remote participant of [`ParticipantKind::Agent`]. The
//! primary agent is the first such participant that does not publish on
//! behalf of anyone; its worker is an agent-kind participant whose
//! `lk.publish_on_behalf` attribute names the primary. Media tracks are
//! looked up on the primary first and fall back to the worker.
//!
//! [`derive_agent_state`] is a pure function of [`AgentInputs`]. Calling it
//! twice with the same inputs always yields the same state; the async layer
//! relies on this to recompute from scratch on every input change.
//!
//! # Derivation Order
//!
//! 1. `Disconnected`
//! 2. `Connecting` if the room is not disconnected
//! 3. `PreConnectBuffering` if a local microphone publication exists
//! 4. the agent's `lk.agent.state` attribute, if present and valid
//! 5. `Failed` if any failure reason is outstanding, overriding all of the
//!    above

use crate::{
    participant::{
        Attributes, Participant, ParticipantKind, TrackReference, TrackSource, attributes,
    },
    state::{AgentState, ConnectionState, FailureReason},
};

/// Primary agent and its worker, as found in a remote roster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentParticipants {
    /// Primary agent participant
    pub agent: Option<Participant>,
    /// Participant publishing media on behalf of the primary agent
    pub worker: Option<Participant>,
}

impl AgentParticipants {
    /// Identify the primary agent and its worker among `remote`.
    pub fn identify(remote: &[Participant]) -> Self {
        let agent = remote
            .iter()
            .find(|p| {
                p.kind == ParticipantKind::Agent
                    && !p.attributes.contains_key(attributes::PUBLISH_ON_BEHALF)
            })
            .cloned();

        let worker = agent.as_ref().and_then(|agent| {
            remote
                .iter()
                .find(|p| {
                    p.kind == ParticipantKind::Agent
                        && p.attributes.get(attributes::PUBLISH_ON_BEHALF) == Some(&agent.identity)
                })
                .cloned()
        });

        Self { agent, worker }
    }

    /// Whether a primary agent is present.
    pub fn exists(&self) -> bool {
        self.agent.is_some()
    }

    /// Agent camera, falling back to the worker's.
    pub fn camera_track(&self) -> Option<TrackReference> {
        self.track(TrackSource::Camera)
    }

    /// Agent microphone, falling back to the worker's.
    pub fn microphone_track(&self) -> Option<TrackReference> {
        self.track(TrackSource::Microphone)
    }

    fn track(&self, source: TrackSource) -> Option<TrackReference> {
        self.agent
            .as_ref()
            .and_then(|p| p.track_reference(source))
            .or_else(|| self.worker.as_ref().and_then(|p| p.track_reference(source)))
    }

    /// The primary agent or worker with `identity`, if either matches.
    pub fn find(&self, identity: &str) -> Option<&Participant> {
        self.agent
            .iter()
            .chain(self.worker.iter())
            .find(|p| p.identity == identity)
    }
}

/// Every input that agent state derivation depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentInputs {
    /// Room connection state
    pub connection_state: ConnectionState,
    /// Identified agent and worker
    pub participants: AgentParticipants,
    /// Whether the local participant has a microphone publication
    pub local_microphone_published: bool,
    /// Outstanding failures, timeout first
    pub failure_reasons: Vec<FailureReason>,
}

impl AgentInputs {
    /// Attributes of the primary agent, empty if there is none.
    pub fn agent_attributes(&self) -> Attributes {
        self.participants.agent.as_ref().map(|p| p.attributes.clone()).unwrap_or_default()
    }

    /// Derive the current agent state.
    pub fn state(&self) -> AgentState {
        derive_agent_state(self)
    }

    /// Build the externally visible snapshot.
    pub fn snapshot(&self) -> AgentSnapshot {
        let state = self.state();
        let phase = match state {
            AgentState::Disconnected => AgentPhase::Disconnected,
            AgentState::Connecting => AgentPhase::Connecting,
            AgentState::Failed => AgentPhase::Failed { reasons: self.failure_reasons.clone() },
            state => {
                let agent = self.participants.agent.as_ref();
                AgentPhase::Present {
                    state,
                    details: AgentDetails {
                        identity: agent.map(|p| p.identity.clone()),
                        name: agent.and_then(|p| p.name.clone()),
                        metadata: agent.and_then(|p| p.metadata.clone()),
                        camera_track: self.participants.camera_track(),
                        microphone_track: self.participants.microphone_track(),
                    },
                }
            },
        };

        AgentSnapshot { attributes: self.agent_attributes(), phase }
    }
}

/// Derive the agent lifecycle state from `inputs`.
pub fn derive_agent_state(inputs: &AgentInputs) -> AgentState {
    if !inputs.failure_reasons.is_empty() {
        return AgentState::Failed;
    }

    let mut state = AgentState::Disconnected;

    if inputs.connection_state != ConnectionState::Disconnected {
        state = AgentState::Connecting;
    }

    if inputs.local_microphone_published {
        state = AgentState::PreConnectBuffering;
    }

    // Unknown values are ignored rather than adopted.
    if let Some(reported) = inputs
        .participants
        .agent
        .as_ref()
        .and_then(|p| p.attributes.get(attributes::AGENT_STATE))
        .and_then(|value| AgentState::from_attribute(value))
    {
        state = reported;
    }

    state
}

/// Identity and media of a present agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentDetails {
    /// Agent identity. `None` while only the local pre-connect buffer is
    /// active.
    pub identity: Option<String>,
    /// Agent display name
    pub name: Option<String>,
    /// Agent metadata
    pub metadata: Option<String>,
    /// Agent (or worker) camera track
    pub camera_track: Option<TrackReference>,
    /// Agent (or worker) microphone track
    pub microphone_track: Option<TrackReference>,
}

/// Agent snapshot keyed by lifecycle phase.
///
/// Each variant carries only the fields valid for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentPhase {
    /// Room is disconnected
    Disconnected,
    /// Room is connecting or connected, no agent state known
    Connecting,
    /// Agent is initializing, idle, listening, thinking, speaking, or the
    /// local pre-connect buffer is active
    Present {
        /// Derived state
        state: AgentState,
        /// Agent identity and media
        details: AgentDetails,
    },
    /// One or more failures are outstanding
    Failed {
        /// Failure reasons, never empty
        reasons: Vec<FailureReason>,
    },
}

/// Externally visible agent state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSnapshot {
    /// Primary agent attributes
    pub attributes: Attributes,
    /// Phase-specific fields
    pub phase: AgentPhase,
}

impl Default for AgentSnapshot {
    fn default() -> Self {
        Self { attributes: Attributes::new(), phase: AgentPhase::Disconnected }
    }
}

impl AgentSnapshot {
    /// Lifecycle state.
    pub fn state(&self) -> AgentState {
        match &self.phase {
            AgentPhase::Disconnected => AgentState::Disconnected,
            AgentPhase::Connecting => AgentState::Connecting,
            AgentPhase::Present { state, .. } => *state,
            AgentPhase::Failed { .. } => AgentState::Failed,
        }
    }

    /// See [`AgentState::is_connected`].
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// See [`AgentState::can_listen`].
    pub fn can_listen(&self) -> bool {
        self.state().can_listen()
    }

    /// See [`AgentState::is_finished`].
    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// See [`AgentState::is_pending`].
    pub fn is_pending(&self) -> bool {
        self.state().is_pending()
    }

    /// Failure reasons; empty unless failed.
    pub fn failure_reasons(&self) -> &[FailureReason] {
        match &self.phase {
            AgentPhase::Failed { reasons } => reasons,
            _ => &[],
        }
    }

    /// Identity, name, metadata and tracks while an agent is present.
    pub fn details(&self) -> Option<&AgentDetails> {
        match &self.phase {
            AgentPhase::Present { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Agent identity, if present.
    pub fn identity(&self) -> Option<&str> {
        self.details().and_then(|d| d.identity.as_deref())
    }

    /// Agent camera track, if present.
    pub fn camera_track(&self) -> Option<&TrackReference> {
        self.details().and_then(|d| d.camera_track.as_ref())
    }

    /// Agent microphone track, if present.
    pub fn microphone_track(&self) -> Option<&TrackReference> {
        self.details().and_then(|d| d.microphone_track.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{participant::TrackPublication, state::FailureKind};

    fn agent_with_state(identity: &str, state: &str) -> Participant {
        Participant::agent(identity).with_attribute(attributes::AGENT_STATE, state)
    }

    #[test]
    fn primary_agent_skips_workers_and_standard_participants() {
        let roster = vec![
            Participant::new("alice"),
            Participant::agent("worker").with_attribute(attributes::PUBLISH_ON_BEHALF, "agent"),
            Participant::agent("agent"),
        ];

        let found = AgentParticipants::identify(&roster);
        assert_eq!(found.agent.as_ref().map(|p| p.identity.as_str()), Some("agent"));
        assert_eq!(found.worker.as_ref().map(|p| p.identity.as_str()), Some("worker"));
    }

    #[test]
    fn worker_for_another_agent_is_ignored() {
        let roster = vec![
            Participant::agent("agent"),
            Participant::agent("stray").with_attribute(attributes::PUBLISH_ON_BEHALF, "other"),
        ];

        let found = AgentParticipants::identify(&roster);
        assert!(found.worker.is_none());
    }

    #[test]
    fn tracks_fall_back_to_worker() {
        let roster = vec![
            Participant::agent("agent")
                .with_track(TrackPublication::new("TR_mic", TrackSource::Microphone)),
            Participant::agent("avatar")
                .with_attribute(attributes::PUBLISH_ON_BEHALF, "agent")
                .with_track(TrackPublication::new("TR_cam", TrackSource::Camera))
                .with_track(TrackPublication::new("TR_mic2", TrackSource::Microphone)),
        ];

        let found = AgentParticipants::identify(&roster);
        let camera = found.camera_track().map(|t| t.participant);
        let microphone = found.microphone_track().map(|t| t.publication.sid);
        assert_eq!(camera.as_deref(), Some("avatar"));
        assert_eq!(microphone.as_deref(), Some("TR_mic"));
    }

    #[test]
    fn derivation_follows_priority_order() {
        let mut inputs = AgentInputs::default();
        assert_eq!(inputs.state(), AgentState::Disconnected);

        inputs.connection_state = ConnectionState::Connecting;
        assert_eq!(inputs.state(), AgentState::Connecting);

        inputs.local_microphone_published = true;
        assert_eq!(inputs.state(), AgentState::PreConnectBuffering);

        inputs.participants = AgentParticipants::identify(&[agent_with_state("a", "thinking")]);
        assert_eq!(inputs.state(), AgentState::Thinking);

        inputs.failure_reasons.push(FailureReason::new(FailureKind::UnexpectedDisconnect));
        assert_eq!(inputs.state(), AgentState::Failed);
    }

    #[test]
    fn unknown_attribute_value_is_ignored() {
        let inputs = AgentInputs {
            connection_state: ConnectionState::Connected,
            participants: AgentParticipants::identify(&[agent_with_state("a", "dancing")]),
            ..AgentInputs::default()
        };
        assert_eq!(inputs.state(), AgentState::Connecting);
    }

    #[test]
    fn agent_attribute_applies_even_while_room_disconnected() {
        let inputs = AgentInputs {
            participants: AgentParticipants::identify(&[agent_with_state("a", "idle")]),
            ..AgentInputs::default()
        };
        assert_eq!(inputs.state(), AgentState::Idle);
    }

    #[test]
    fn snapshot_variants_carry_only_valid_fields() {
        let roster = [agent_with_state("a", "listening")
            .with_track(TrackPublication::new("TR_cam", TrackSource::Camera))];
        let mut inputs = AgentInputs {
            connection_state: ConnectionState::Connected,
            participants: AgentParticipants::identify(&roster),
            ..AgentInputs::default()
        };

        let snapshot = inputs.snapshot();
        assert!(snapshot.is_connected());
        assert_eq!(snapshot.identity(), Some("a"));
        assert!(snapshot.camera_track().is_some());
        assert_eq!(
            snapshot.attributes.get(attributes::AGENT_STATE).map(String::as_str),
            Some("listening")
        );

        inputs.failure_reasons.push(FailureReason::new(FailureKind::TimeoutNotReady));
        let failed = inputs.snapshot();
        assert!(failed.is_finished());
        assert!(failed.identity().is_none());
        assert!(failed.camera_track().is_none());
        assert_eq!(failed.failure_reasons().len(), 1);
    }

    #[test]
    fn pre_connect_buffering_without_agent_has_no_identity() {
        let inputs = AgentInputs {
            connection_state: ConnectionState::Connecting,
            local_microphone_published: true,
            ..AgentInputs::default()
        };
        let snapshot = inputs.snapshot();
        assert_eq!(snapshot.state(), AgentState::PreConnectBuffering);
        assert!(snapshot.can_listen());
        assert!(snapshot.identity().is_none());
    }
}
