//! Agent lifecycle state machine.
//!
//! [`AgentStateMachine`] listens to room events, keeps the latest inputs, and
//! recomputes the agent snapshot synchronously after every event with
//! [`AgentInputs::snapshot`]. Changes are announced through three notifiers:
//! state, camera track and microphone track.
//!
//! # Side Effects
//!
//! - The agent timeout starts when the room leaves `Disconnected` and is
//!   cleared when it returns.
//! - An agent participant appearing clears any timeout failure.
//! - The agent leaving while the room is not disconnected records an
//!   unexpected-disconnect failure, cleared when the room disconnects.
//! - Every recompute feeds the derived state and agent presence back into the
//!   timeout.
//!
//! # Locking
//!
//! Lock order is machine state, then timeout tracker. No lock is held while
//! notifiers emit.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use voxroom_core::{
    AgentInputs, AgentParticipants, AgentSnapshot, AgentState, ConnectionState, Environment,
    FailureKind, FailureReason, Notifier, SessionError, Subscription, TrackReference, TrackSource,
};

use crate::{
    timeout::AgentTimeout,
    transport::{RoomEvent, RoomTransport},
    wait::wait_for,
};

#[derive(Debug, Default)]
struct MachineState {
    connection_state: ConnectionState,
    participants: AgentParticipants,
    local_microphone_published: bool,
    disconnect_reason: Option<FailureReason>,
    snapshot: AgentSnapshot,
}

struct Inner<T: ?Sized, E: Environment> {
    room: Arc<T>,
    timeout: AgentTimeout<E>,
    timeout_duration: Option<std::time::Duration>,
    state: Mutex<MachineState>,
    state_changed: Notifier<AgentState>,
    camera_changed: Notifier<Option<TrackReference>>,
    microphone_changed: Notifier<Option<TrackReference>>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Derives and publishes the agent lifecycle for one room.
///
/// Cloning produces another handle to the same machine.
pub struct AgentStateMachine<T: ?Sized, E: Environment> {
    inner: Arc<Inner<T, E>>,
}

impl<T: ?Sized, E: Environment> Clone for AgentStateMachine<T, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Changes {
    state: Option<AgentState>,
    camera: Option<Option<TrackReference>>,
    microphone: Option<Option<TrackReference>>,
}

impl<T, E> AgentStateMachine<T, E>
where
    T: RoomTransport + ?Sized,
    E: Environment,
{
    /// Attach to `room`, driving `timeout`.
    ///
    /// `timeout_duration` overrides the timeout's default deadline each time
    /// it is started.
    pub fn new(
        room: Arc<T>,
        timeout: AgentTimeout<E>,
        timeout_duration: Option<std::time::Duration>,
    ) -> Self {
        let initial = MachineState {
            connection_state: room.connection_state(),
            participants: AgentParticipants::identify(&room.remote_participants()),
            local_microphone_published: room.track_publication(TrackSource::Microphone).is_some(),
            ..MachineState::default()
        };
        let already_started = initial.connection_state != ConnectionState::Disconnected;

        let inner = Arc::new(Inner {
            room,
            timeout,
            timeout_duration,
            state: Mutex::new(initial),
            state_changed: Notifier::new(),
            camera_changed: Notifier::new(),
            microphone_changed: Notifier::new(),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak: Weak<Inner<T, E>> = Arc::downgrade(&inner);
        let room_events = inner.room.events().subscribe({
            let weak = weak.clone();
            move |event| {
                if let Some(inner) = weak.upgrade() {
                    Self::handle_room_event(&inner, event);
                }
            }
        });
        let timeout_fired = inner.timeout.on_fire(move |reason| {
            if let Some(inner) = weak.upgrade() {
                tracing::debug!(reason = %reason, "agent timeout fired");
                Self::recompute(&inner);
            }
        });
        inner.subscriptions.lock().extend([room_events, timeout_fired]);

        if already_started {
            inner.timeout.start(inner.timeout_duration);
        }
        Self::recompute(&inner);

        Self { inner }
    }

    fn handle_room_event(inner: &Inner<T, E>, event: &RoomEvent) {
        let agent_appeared = {
            let mut state = inner.state.lock();

            match event {
                RoomEvent::ConnectionStateChanged(next) => {
                    let previous = state.connection_state;
                    state.connection_state = *next;

                    if *next == ConnectionState::Disconnected {
                        state.disconnect_reason = None;
                        if previous != ConnectionState::Disconnected {
                            inner.timeout.clear();
                        }
                    } else if previous == ConnectionState::Disconnected {
                        inner.timeout.start(inner.timeout_duration);
                    }
                },
                RoomEvent::ParticipantDisconnected(participant) => {
                    let was_agent = state
                        .participants
                        .agent
                        .as_ref()
                        .is_some_and(|agent| agent.identity == participant.identity);
                    if was_agent && state.connection_state != ConnectionState::Disconnected {
                        tracing::warn!(identity = %participant.identity, "agent left the room");
                        state.disconnect_reason =
                            Some(FailureReason::new(FailureKind::UnexpectedDisconnect));
                    }
                },
                RoomEvent::LocalTrackPublished(_) | RoomEvent::LocalTrackUnpublished(_) => {
                    state.local_microphone_published =
                        inner.room.track_publication(TrackSource::Microphone).is_some();
                },
                RoomEvent::MediaDevicesError(_) | RoomEvent::EncryptionError(_) => return,
                RoomEvent::ParticipantConnected(_)
                | RoomEvent::ParticipantAttributesChanged { .. }
                | RoomEvent::TrackPublished { .. }
                | RoomEvent::TrackUnpublished { .. } => {},
            }

            let previous = state.participants.agent.as_ref().map(|p| p.identity.clone());
            state.participants = AgentParticipants::identify(&inner.room.remote_participants());
            let current = state.participants.agent.as_ref().map(|p| p.identity.clone());
            current.is_some() && current != previous
        };

        if agent_appeared {
            tracing::debug!("agent participant appeared");
            inner.timeout.clear_failure_reason();
        }
        Self::recompute(inner);
    }

    fn recompute(inner: &Inner<T, E>) {
        let changes = {
            let mut state = inner.state.lock();

            let failure_reasons: Vec<FailureReason> = inner
                .timeout
                .failure_reason()
                .into_iter()
                .chain(state.disconnect_reason.clone())
                .collect();

            let inputs = AgentInputs {
                connection_state: state.connection_state,
                participants: state.participants.clone(),
                local_microphone_published: state.local_microphone_published,
                failure_reasons,
            };
            let snapshot = inputs.snapshot();
            let agent_state = snapshot.state();

            inner.timeout.update_tracked_state(agent_state);
            inner.timeout.update_participant_exists(inputs.participants.exists());

            let camera = snapshot.camera_track().cloned();
            let microphone = snapshot.microphone_track().cloned();
            let previous = std::mem::replace(&mut state.snapshot, snapshot);

            Changes {
                state: (previous.state() != agent_state).then_some(agent_state),
                camera: (previous.camera_track() != camera.as_ref()).then_some(camera),
                microphone: (previous.microphone_track() != microphone.as_ref())
                    .then_some(microphone),
            }
        };

        if let Some(agent_state) = changes.state {
            tracing::debug!(state = %agent_state, "agent state changed");
            inner.state_changed.emit(&agent_state);
        }
        if let Some(camera) = changes.camera {
            inner.camera_changed.emit(&camera);
        }
        if let Some(microphone) = changes.microphone {
            inner.microphone_changed.emit(&microphone);
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> AgentSnapshot {
        self.inner.state.lock().snapshot.clone()
    }

    /// Current state.
    pub fn state(&self) -> AgentState {
        self.inner.state.lock().snapshot.state()
    }

    /// Identified agent and worker.
    pub fn participants(&self) -> AgentParticipants {
        self.inner.state.lock().participants.clone()
    }

    /// Notifier for state changes.
    pub fn state_changes(&self) -> &Notifier<AgentState> {
        &self.inner.state_changed
    }

    /// Notifier for agent camera changes.
    pub fn camera_changes(&self) -> &Notifier<Option<TrackReference>> {
        &self.inner.camera_changed
    }

    /// Notifier for agent microphone changes.
    pub fn microphone_changes(&self) -> &Notifier<Option<TrackReference>> {
        &self.inner.microphone_changed
    }

    /// Resolve once the agent is listening, thinking or speaking.
    pub async fn wait_until_connected(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), SessionError> {
        self.wait_for_state(
            AgentState::is_connected,
            cancel,
            "AgentStateMachine::wait_until_connected",
        )
        .await
    }

    /// Resolve once audio sent now would be heard.
    pub async fn wait_until_could_be_listening(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), SessionError> {
        self.wait_for_state(
            AgentState::can_listen,
            cancel,
            "AgentStateMachine::wait_until_could_be_listening",
        )
        .await
    }

    /// Resolve once the agent is disconnected or failed.
    pub async fn wait_until_finished(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), SessionError> {
        self.wait_for_state(
            AgentState::is_finished,
            cancel,
            "AgentStateMachine::wait_until_finished",
        )
        .await
    }

    /// Resolve with the agent camera track once there is one.
    pub async fn wait_until_camera(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<TrackReference, SessionError> {
        let inner = &self.inner;
        wait_for(
            &inner.camera_changed,
            || inner.state.lock().snapshot.camera_track().cloned(),
            Option::clone,
            cancel,
            "AgentStateMachine::wait_until_camera",
        )
        .await
    }

    /// Resolve with the agent microphone track once there is one.
    pub async fn wait_until_microphone(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<TrackReference, SessionError> {
        let inner = &self.inner;
        wait_for(
            &inner.microphone_changed,
            || inner.state.lock().snapshot.microphone_track().cloned(),
            Option::clone,
            cancel,
            "AgentStateMachine::wait_until_microphone",
        )
        .await
    }

    async fn wait_for_state(
        &self,
        predicate: fn(AgentState) -> bool,
        cancel: Option<&CancellationToken>,
        operation: &'static str,
    ) -> Result<(), SessionError> {
        let inner = &self.inner;
        wait_for(
            &inner.state_changed,
            || predicate(inner.state.lock().snapshot.state()).then_some(()),
            move |state: &AgentState| predicate(*state).then_some(()),
            cancel,
            operation,
        )
        .await
    }
}
