//! Scripted in-memory room for deterministic testing.
//!
//! `SimTransport` implements [`RoomTransport`] entirely in memory. Transport
//! calls sleep for configurable latencies on the tokio clock, so tests running
//! under `#[tokio::test(start_paused = true)]` observe a reproducible
//! interleaving. Remote activity (participants joining, attribute changes,
//! transcriptions) is injected by the test through the scripting methods.
//!
//! Every mutation updates the room state first and emits afterwards, with no
//! lock held, as the transport contract requires.
//!
//! Connect and disconnect calls are tracked while in flight so tests can
//! assert that a serializer never lets them overlap.

use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use voxroom_client::{PublishOptions, RoomConnectOptions, RoomEvent, RoomTransport};
use voxroom_core::{
    Attributes, ConnectionState, EventSource, Notifier, Participant, TrackPublication,
    TrackSource, TransportError,
    transcript::{ChatMessage, TranscriptionSegment},
};

/// Latencies and injected failures.
#[derive(Debug, Clone, Default)]
pub struct SimConfig {
    /// Time spent in `connect` between `Connecting` and the outcome
    pub connect_latency: Duration,
    /// Time spent in `disconnect`
    pub disconnect_latency: Duration,
    /// Time spent enabling or disabling a local track
    pub publish_latency: Duration,
    /// Fail `connect` with this reason
    pub connect_failure: Option<String>,
    /// Fail `disconnect` with this reason, leaving the room connected
    pub disconnect_failure: Option<String>,
    /// Fail `prepare_connection` with this reason
    pub prepare_failure: Option<String>,
    /// Fail enabling these sources
    pub publish_failures: HashSet<TrackSource>,
    /// Fail `send_chat_message` with this reason
    pub chat_failure: Option<String>,
}

/// Transport call recorded by [`SimTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    /// `connect`
    Connect {
        /// Server URL passed in
        server_url: String,
    },
    /// `disconnect`
    Disconnect,
    /// `prepare_connection`
    Prepare {
        /// Server URL passed in
        server_url: String,
    },
    /// `set_track_enabled`
    SetTrackEnabled {
        /// Track source
        source: TrackSource,
        /// Requested state
        enabled: bool,
        /// Pre-connect buffer requested
        pre_connect_buffer: bool,
    },
    /// `send_chat_message`
    SendChat(String),
}

struct RoomState {
    connection_state: ConnectionState,
    local: Participant,
    remote: Vec<Participant>,
    transcriptions: Vec<TranscriptionSegment>,
    chat: Vec<ChatMessage>,
    next_id: u64,
}

impl RoomState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory room transport.
pub struct SimTransport {
    room: Mutex<RoomState>,
    config: Mutex<SimConfig>,
    calls: Mutex<Vec<SimCall>>,
    events: Notifier<RoomEvent>,
    transcriptions: Notifier<Vec<TranscriptionSegment>>,
    chat: Notifier<Vec<ChatMessage>>,
    lifecycle_in_flight: AtomicUsize,
    max_lifecycle_in_flight: AtomicUsize,
}

/// Decrements the lifecycle in-flight counter on drop.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    /// Disconnected room with local participant `local-user`.
    pub fn new() -> Self {
        Self::with_local_identity("local-user")
    }

    /// Disconnected room with the given local identity.
    pub fn with_local_identity(identity: &str) -> Self {
        Self {
            room: Mutex::new(RoomState {
                connection_state: ConnectionState::Disconnected,
                local: Participant::new(identity),
                remote: Vec::new(),
                transcriptions: Vec::new(),
                chat: Vec::new(),
                next_id: 0,
            }),
            config: Mutex::new(SimConfig::default()),
            calls: Mutex::new(Vec::new()),
            events: Notifier::new(),
            transcriptions: Notifier::new(),
            chat: Notifier::new(),
            lifecycle_in_flight: AtomicUsize::new(0),
            max_lifecycle_in_flight: AtomicUsize::new(0),
        }
    }

    /// Adjust latencies and failures.
    pub fn configure(&self, f: impl FnOnce(&mut SimConfig)) {
        f(&mut self.config.lock());
    }

    fn config(&self) -> SimConfig {
        self.config.lock().clone()
    }

    fn record(&self, call: SimCall) {
        self.calls.lock().push(call);
    }

    fn enter_lifecycle(&self) -> InFlight<'_> {
        let now = self.lifecycle_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_lifecycle_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.lifecycle_in_flight)
    }

    /// Every transport call so far, in call order.
    pub fn calls(&self) -> Vec<SimCall> {
        self.calls.lock().clone()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&SimCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| predicate(call)).count()
    }

    /// Highest number of connect/disconnect calls ever in flight at once.
    pub fn max_concurrent_lifecycle_calls(&self) -> usize {
        self.max_lifecycle_in_flight.load(Ordering::SeqCst)
    }

    /// Force the connection state, emitting if it changed.
    pub fn set_connection_state(&self, state: ConnectionState) {
        let changed = {
            let mut room = self.room.lock();
            let changed = room.connection_state != state;
            room.connection_state = state;
            if state == ConnectionState::Disconnected {
                room.remote.clear();
            }
            changed
        };
        if changed {
            self.events.emit(&RoomEvent::ConnectionStateChanged(state));
        }
    }

    /// Add a remote participant.
    pub fn join(&self, participant: Participant) {
        self.room.lock().remote.push(participant.clone());
        self.events.emit(&RoomEvent::ParticipantConnected(participant));
    }

    /// Remove a remote participant. Returns whether it was present.
    pub fn leave(&self, identity: &str) -> bool {
        let removed = {
            let mut room = self.room.lock();
            let index = room.remote.iter().position(|p| p.identity == identity);
            index.map(|i| room.remote.remove(i))
        };
        match removed {
            Some(participant) => {
                self.events.emit(&RoomEvent::ParticipantDisconnected(participant));
                true
            },
            None => false,
        }
    }

    /// Set one attribute on a remote participant.
    pub fn set_attribute(&self, identity: &str, key: &str, value: &str) {
        let attributes = {
            let mut room = self.room.lock();
            let Some(participant) = room.remote.iter_mut().find(|p| p.identity == identity) else {
                return;
            };
            participant.attributes.insert(key.to_string(), value.to_string());
            participant.attributes.clone()
        };
        self.events.emit(&RoomEvent::ParticipantAttributesChanged {
            identity: identity.to_string(),
            attributes,
        });
    }

    /// Replace all attributes of a remote participant.
    pub fn set_attributes(&self, identity: &str, attributes: Attributes) {
        {
            let mut room = self.room.lock();
            let Some(participant) = room.remote.iter_mut().find(|p| p.identity == identity) else {
                return;
            };
            participant.attributes = attributes.clone();
        }
        self.events.emit(&RoomEvent::ParticipantAttributesChanged {
            identity: identity.to_string(),
            attributes,
        });
    }

    /// Publish a track from a remote participant.
    pub fn publish_remote_track(&self, identity: &str, source: TrackSource) {
        let publication = {
            let mut room = self.room.lock();
            let sid = format!("TR_{}", room.next_id());
            let Some(participant) = room.remote.iter_mut().find(|p| p.identity == identity) else {
                return;
            };
            let publication = TrackPublication::new(sid, source);
            participant.tracks.push(publication.clone());
            publication
        };
        self.events
            .emit(&RoomEvent::TrackPublished { identity: identity.to_string(), publication });
    }

    /// Unpublish a remote participant's track.
    pub fn unpublish_remote_track(&self, identity: &str, source: TrackSource) {
        let publication = {
            let mut room = self.room.lock();
            let Some(participant) = room.remote.iter_mut().find(|p| p.identity == identity) else {
                return;
            };
            let Some(index) = participant.tracks.iter().position(|t| t.source == source) else {
                return;
            };
            participant.tracks.remove(index)
        };
        self.events
            .emit(&RoomEvent::TrackUnpublished { identity: identity.to_string(), publication });
    }

    /// Deliver a transcription segment. A segment with a known id replaces
    /// the earlier one in place.
    pub fn push_transcription(&self, segment: TranscriptionSegment) {
        let list = {
            let mut room = self.room.lock();
            match room.transcriptions.iter_mut().find(|s| s.id == segment.id) {
                Some(existing) => *existing = segment,
                None => room.transcriptions.push(segment),
            }
            room.transcriptions.clone()
        };
        self.transcriptions.emit(&list);
    }

    /// Deliver a chat message from a remote participant.
    pub fn push_chat(&self, message: ChatMessage) {
        let list = {
            let mut room = self.room.lock();
            room.chat.push(message);
            room.chat.clone()
        };
        self.chat.emit(&list);
    }

    /// Report a local media device failure.
    pub fn emit_media_error(&self, error: TransportError) {
        self.events.emit(&RoomEvent::MediaDevicesError(error));
    }

    /// Report an encryption failure.
    pub fn emit_encryption_error(&self, message: &str) {
        self.events.emit(&RoomEvent::EncryptionError(message.to_string()));
    }

    async fn sleep(duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[async_trait]
impl RoomTransport for SimTransport {
    async fn connect(
        &self,
        server_url: &str,
        _participant_token: &str,
        _options: &RoomConnectOptions,
    ) -> Result<(), TransportError> {
        self.record(SimCall::Connect { server_url: server_url.to_string() });
        let _in_flight = self.enter_lifecycle();

        if self.connection_state() != ConnectionState::Disconnected {
            return Ok(());
        }

        let config = self.config();
        self.set_connection_state(ConnectionState::Connecting);
        Self::sleep(config.connect_latency).await;

        if let Some(reason) = config.connect_failure {
            tracing::debug!(%reason, "sim connect failed");
            self.set_connection_state(ConnectionState::Disconnected);
            return Err(TransportError::Connection(reason));
        }
        self.set_connection_state(ConnectionState::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.record(SimCall::Disconnect);
        let _in_flight = self.enter_lifecycle();

        if self.connection_state() == ConnectionState::Disconnected {
            return Ok(());
        }

        let config = self.config();
        Self::sleep(config.disconnect_latency).await;

        if let Some(reason) = config.disconnect_failure {
            tracing::debug!(%reason, "sim disconnect failed");
            return Err(TransportError::Disconnect(reason));
        }
        tracing::debug!("sim room disconnected");

        let unpublished = {
            let mut room = self.room.lock();
            room.connection_state = ConnectionState::Disconnected;
            room.remote.clear();
            std::mem::take(&mut room.local.tracks)
        };
        for publication in unpublished {
            self.events.emit(&RoomEvent::LocalTrackUnpublished(publication));
        }
        self.events.emit(&RoomEvent::ConnectionStateChanged(ConnectionState::Disconnected));
        Ok(())
    }

    async fn prepare_connection(
        &self,
        server_url: &str,
        _participant_token: &str,
    ) -> Result<(), TransportError> {
        self.record(SimCall::Prepare { server_url: server_url.to_string() });
        match self.config().prepare_failure {
            Some(reason) => Err(TransportError::Connection(reason)),
            None => Ok(()),
        }
    }

    async fn set_track_enabled(
        &self,
        source: TrackSource,
        enabled: bool,
        options: &PublishOptions,
    ) -> Result<(), TransportError> {
        self.record(SimCall::SetTrackEnabled {
            source,
            enabled,
            pre_connect_buffer: options.pre_connect_buffer,
        });

        let config = self.config();
        Self::sleep(config.publish_latency).await;

        if enabled && config.publish_failures.contains(&source) {
            return Err(TransportError::Publish {
                track: source,
                reason: "permission denied".to_string(),
            });
        }

        let event = {
            let mut room = self.room.lock();
            let existing = room.local.tracks.iter().position(|t| t.source == source);
            match (enabled, existing) {
                (true, None) => {
                    let sid = format!("TR_{}", room.next_id());
                    let publication = TrackPublication::new(sid, source);
                    room.local.tracks.push(publication.clone());
                    Some(RoomEvent::LocalTrackPublished(publication))
                },
                (false, Some(index)) => {
                    Some(RoomEvent::LocalTrackUnpublished(room.local.tracks.remove(index)))
                },
                _ => None,
            }
        };
        if let Some(event) = event {
            self.events.emit(&event);
        }
        Ok(())
    }

    async fn send_chat_message(&self, text: &str) -> Result<ChatMessage, TransportError> {
        self.record(SimCall::SendChat(text.to_string()));
        if let Some(reason) = self.config().chat_failure {
            return Err(TransportError::Chat(reason));
        }

        let (message, list) = {
            let mut room = self.room.lock();
            let id = room.next_id();
            let message = ChatMessage {
                id: format!("chat-{id}"),
                message: text.to_string(),
                timestamp: i64::try_from(id).unwrap_or(i64::MAX),
                from: Some(room.local.clone()),
            };
            room.chat.push(message.clone());
            (message, room.chat.clone())
        };
        self.chat.emit(&list);
        Ok(message)
    }

    fn connection_state(&self) -> ConnectionState {
        self.room.lock().connection_state
    }

    fn local_participant(&self) -> Participant {
        self.room.lock().local.clone()
    }

    fn remote_participants(&self) -> Vec<Participant> {
        self.room.lock().remote.clone()
    }

    fn events(&self) -> &Notifier<RoomEvent> {
        &self.events
    }

    fn transcriptions(&self) -> &dyn EventSource<Vec<TranscriptionSegment>> {
        &self.transcriptions
    }

    fn transcription_snapshot(&self) -> Vec<TranscriptionSegment> {
        self.room.lock().transcriptions.clone()
    }

    fn chat_messages(&self) -> &dyn EventSource<Vec<ChatMessage>> {
        &self.chat
    }

    fn chat_snapshot(&self) -> Vec<ChatMessage> {
        self.room.lock().chat.clone()
    }
}
