//! Participant and track model.
//!
//! These are owned snapshots of what the transport reports. The core never
//! holds live transport objects; it re-reads them when notified of changes.

use std::collections::BTreeMap;

/// Participant attribute map.
pub type Attributes = BTreeMap<String, String>;

/// Well-known participant attribute keys.
pub mod attributes {
    /// Agent lifecycle state reported by the agent itself.
    pub const AGENT_STATE: &str = "lk.agent.state";

    /// Set on a worker participant to the identity of the agent it publishes
    /// media for.
    pub const PUBLISH_ON_BEHALF: &str = "lk.publish_on_behalf";

    /// Set on transcription streams to the track being transcribed.
    pub const TRANSCRIBED_TRACK_ID: &str = "lk.transcribed_track_id";
}

/// Participant kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParticipantKind {
    /// Regular client
    #[default]
    Standard,
    /// Programmatic agent
    Agent,
    /// Ingress bridge
    Ingress,
    /// Egress recorder
    Egress,
    /// Telephony bridge
    Sip,
}

/// Media source of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackSource {
    /// Camera video
    Camera,
    /// Microphone audio
    Microphone,
    /// Screen share video
    ScreenShare,
    /// Screen share audio
    ScreenShareAudio,
    /// Unclassified source
    Unknown,
}

/// A published track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackPublication {
    /// Track SID assigned by the server
    pub sid: String,
    /// Media source
    pub source: TrackSource,
    /// Whether the track is muted
    pub muted: bool,
}

impl TrackPublication {
    /// Unmuted publication.
    pub fn new(sid: impl Into<String>, source: TrackSource) -> Self {
        Self { sid: sid.into(), source, muted: false }
    }
}

/// Room participant snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Participant {
    /// Unique identity within the room
    pub identity: String,
    /// Display name
    pub name: Option<String>,
    /// Opaque application metadata
    pub metadata: Option<String>,
    /// Participant kind
    pub kind: ParticipantKind,
    /// Key/value attributes
    pub attributes: Attributes,
    /// Tracks this participant has published
    pub tracks: Vec<TrackPublication>,
}

impl Participant {
    /// Standard participant with no attributes or tracks.
    pub fn new(identity: impl Into<String>) -> Self {
        Self { identity: identity.into(), ..Self::default() }
    }

    /// Agent-kind participant with no attributes or tracks.
    pub fn agent(identity: impl Into<String>) -> Self {
        Self { identity: identity.into(), kind: ParticipantKind::Agent, ..Self::default() }
    }

    /// Builder: set an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builder: add a track publication.
    #[must_use]
    pub fn with_track(mut self, publication: TrackPublication) -> Self {
        self.tracks.push(publication);
        self
    }

    /// First publication for `source`, if any.
    pub fn track(&self, source: TrackSource) -> Option<&TrackPublication> {
        self.tracks.iter().find(|t| t.source == source)
    }

    /// Reference to this participant's `source` track, if published.
    pub fn track_reference(&self, source: TrackSource) -> Option<TrackReference> {
        self.track(source).map(|publication| TrackReference {
            participant: self.identity.clone(),
            source,
            publication: publication.clone(),
        })
    }
}

/// Identifies one published track: participant, source and publication.
///
/// Equality is by participant identity and source only; a republished track
/// with a new SID is the same reference.
#[derive(Debug, Clone)]
pub struct TrackReference {
    /// Identity of the publishing participant
    pub participant: String,
    /// Media source
    pub source: TrackSource,
    /// Publication details
    pub publication: TrackPublication,
}

impl PartialEq for TrackReference {
    fn eq(&self, other: &Self) -> bool {
        self.participant == other.participant && self.source == other.source
    }
}

impl Eq for TrackReference {}
