//! Room transport and credential source abstractions.
//!
//! The media transport is an external collaborator. [`RoomTransport`] is the
//! narrow surface the orchestration layer consumes: connect, disconnect,
//! publish, a few synchronous reads, and push sources for room events, chat
//! and transcriptions.
//!
//! # Event Contract
//!
//! Implementations MUST update the state returned by the synchronous reads
//! (`connection_state`, `local_participant`, `remote_participants`) before
//! emitting the corresponding [`RoomEvent`], and MUST NOT hold internal locks
//! while emitting. Listeners re-read the transport from inside callbacks.

use std::time::Duration;

use async_trait::async_trait;
use voxroom_core::{
    Attributes, ConnectionState, EventSource, Notifier, Participant, SessionError, TrackPublication,
    TrackSource, TransportError,
    transcript::{ChatMessage, TranscriptionSegment},
};

/// Options forwarded to the transport on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomConnectOptions {
    /// Subscribe to remote tracks automatically
    pub auto_subscribe: bool,
    /// Maximum number of join attempts
    pub max_retries: u32,
    /// Time allowed for the signal connection to open
    pub peer_connection_timeout: Duration,
}

impl Default for RoomConnectOptions {
    fn default() -> Self {
        Self {
            auto_subscribe: true,
            max_retries: 1,
            peer_connection_timeout: Duration::from_secs(15),
        }
    }
}

/// Options applied when publishing a local track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Capture audio before the remote side is ready and flush it on join
    pub pre_connect_buffer: bool,
    /// Publish with redundant encoding where supported
    pub red: bool,
    /// Publish under this track name
    pub name: Option<String>,
}

/// Arguments of a queued connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectArgs {
    /// Server URL from the credentials
    pub server_url: String,
    /// Participant token from the credentials
    pub participant_token: String,
    /// Transport options
    pub options: RoomConnectOptions,
}

/// Notifications pushed by a [`RoomTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// Room connection state changed
    ConnectionStateChanged(ConnectionState),
    /// A remote participant joined
    ParticipantConnected(Participant),
    /// A remote participant left; carries its last known snapshot
    ParticipantDisconnected(Participant),
    /// A remote participant's attributes changed
    ParticipantAttributesChanged {
        /// Participant identity
        identity: String,
        /// Full attribute map after the change
        attributes: Attributes,
    },
    /// A remote participant published a track
    TrackPublished {
        /// Publishing participant
        identity: String,
        /// Publication
        publication: TrackPublication,
    },
    /// A remote participant unpublished a track
    TrackUnpublished {
        /// Publishing participant
        identity: String,
        /// Publication
        publication: TrackPublication,
    },
    /// The local participant published a track
    LocalTrackPublished(TrackPublication),
    /// The local participant unpublished a track
    LocalTrackUnpublished(TrackPublication),
    /// A local media device failed
    MediaDevicesError(TransportError),
    /// End-to-end encryption failed
    EncryptionError(String),
}

/// A connection to one real-time room.
#[async_trait]
pub trait RoomTransport: Send + Sync + 'static {
    /// Join the room.
    async fn connect(
        &self,
        server_url: &str,
        participant_token: &str,
        options: &RoomConnectOptions,
    ) -> Result<(), TransportError>;

    /// Leave the room. A no-op when already disconnected.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Warm up DNS, TLS and signalling ahead of `connect`.
    async fn prepare_connection(
        &self,
        server_url: &str,
        participant_token: &str,
    ) -> Result<(), TransportError>;

    /// Enable or disable a local track.
    async fn set_track_enabled(
        &self,
        source: TrackSource,
        enabled: bool,
        options: &PublishOptions,
    ) -> Result<(), TransportError>;

    /// Send a chat message from the local participant.
    async fn send_chat_message(&self, text: &str) -> Result<ChatMessage, TransportError>;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Local participant snapshot.
    fn local_participant(&self) -> Participant;

    /// Remote participant snapshots in join order.
    fn remote_participants(&self) -> Vec<Participant>;

    /// Room event source.
    fn events(&self) -> &Notifier<RoomEvent>;

    /// Source pushing the full transcription list on every change.
    fn transcriptions(&self) -> &dyn EventSource<Vec<TranscriptionSegment>>;

    /// Transcriptions received so far.
    fn transcription_snapshot(&self) -> Vec<TranscriptionSegment>;

    /// Source pushing the full chat history on every change.
    fn chat_messages(&self) -> &dyn EventSource<Vec<ChatMessage>>;

    /// Chat messages received so far.
    fn chat_snapshot(&self) -> Vec<ChatMessage>;

    /// Local publication for `source`, if any.
    fn track_publication(&self, source: TrackSource) -> Option<TrackPublication> {
        self.local_participant().track(source).cloned()
    }
}

/// Connection credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Server URL
    pub server_url: String,
    /// Participant token (JWT)
    pub participant_token: String,
}

/// Parameters for a credential fetch.
///
/// Fixed sources ignore these; configurable sources forward them to the
/// token endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenRequest {
    /// Room to join
    pub room_name: Option<String>,
    /// Participant display name
    pub participant_name: Option<String>,
    /// Participant identity
    pub participant_identity: Option<String>,
    /// Participant metadata
    pub participant_metadata: Option<String>,
    /// Participant attributes
    pub participant_attributes: Option<Attributes>,
    /// Agent to dispatch into the room
    pub agent_name: Option<String>,
    /// Metadata for the dispatched agent
    pub agent_metadata: Option<String>,
}

/// Produces connection credentials.
#[async_trait]
pub trait TokenSource: Send + Sync + 'static {
    /// Fetch fresh credentials.
    ///
    /// Failures should be reported as [`SessionError::Credentials`].
    async fn fetch(&self, request: &TokenRequest) -> Result<Credentials, SessionError>;
}

/// Token source returning the same credentials every time.
#[derive(Debug, Clone)]
pub struct FixedTokenSource {
    credentials: Credentials,
}

impl FixedTokenSource {
    /// Source always returning `credentials`.
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl TokenSource for FixedTokenSource {
    async fn fetch(&self, _request: &TokenRequest) -> Result<Credentials, SessionError> {
        Ok(self.credentials.clone())
    }
}

/// Local track choices for `Session::start`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackOptions {
    /// Enable the track
    pub enabled: bool,
    /// Publish options
    pub publish: PublishOptions,
}

impl TrackOptions {
    /// Enabled with default publish options.
    pub fn enabled() -> Self {
        Self { enabled: true, publish: PublishOptions::default() }
    }
}

/// Which local tracks `Session::start` enables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTracks {
    /// Microphone
    pub microphone: TrackOptions,
    /// Camera
    pub camera: TrackOptions,
    /// Screen share
    pub screen_share: TrackOptions,
}

impl Default for StartTracks {
    /// Microphone on with the pre-connect buffer; camera and screen share
    /// off.
    fn default() -> Self {
        Self {
            microphone: TrackOptions {
                enabled: true,
                publish: PublishOptions { pre_connect_buffer: true, ..PublishOptions::default() },
            },
            camera: TrackOptions::default(),
            screen_share: TrackOptions::default(),
        }
    }
}

/// Options for `Session::start`.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Local tracks to enable
    pub tracks: StartTracks,
    /// Options forwarded to the transport on connect
    pub room_connect_options: RoomConnectOptions,
    /// Aborts the start: pending waits reject and the room is disconnected
    pub cancel: Option<tokio_util::sync::CancellationToken>,
}
