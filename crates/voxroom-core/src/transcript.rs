//! Chat and transcription feed merging.
//!
//! Transcription segments arrive from several participants and may be
//! re-delivered with revised text; chat messages arrive separately. The
//! [`TranscriptionMerger`] combines both into one feed whose order is fixed
//! the first time each message id is observed.
//!
//! # Ordering
//!
//! Each id is stamped once with `(first observed instant, sequence)`. The
//! sequence breaks ties between ids first seen in the same merge, so
//! re-feeding the same ids in any raw order never moves a message.
//!
//! # Memory
//!
//! The id map is append-only and lives as long as the merger. One merger is
//! owned per session, so growth is bounded by the messages of that session.

use std::collections::{HashMap, HashSet};

use crate::{
    agent::AgentParticipants,
    participant::{Attributes, Participant, attributes},
};

/// Origin classification of a feed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Transcription of the local participant's speech
    UserTranscript,
    /// Transcription of an agent (or other remote participant)
    AgentTranscript,
    /// Chat message
    Chat,
}

/// One transcription stream as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionSegment {
    /// Stream id, stable across re-deliveries
    pub id: String,
    /// Text received so far
    pub text: String,
    /// Sender timestamp in milliseconds since the epoch
    pub timestamp: i64,
    /// Identity of the participant the stream came from
    pub sender_identity: String,
    /// Stream attributes
    pub attributes: Attributes,
}

impl TranscriptionSegment {
    /// Segment with no attributes.
    pub fn new(
        id: impl Into<String>,
        sender_identity: impl Into<String>,
        text: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            timestamp,
            sender_identity: sender_identity.into(),
            attributes: Attributes::new(),
        }
    }

    /// Track SID this segment transcribes, if tagged.
    pub fn transcribed_track(&self) -> Option<&str> {
        self.attributes.get(attributes::TRANSCRIBED_TRACK_ID).map(String::as_str)
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Message id
    pub id: String,
    /// Message body
    pub message: String,
    /// Sender timestamp in milliseconds since the epoch
    pub timestamp: i64,
    /// Sender, if known
    pub from: Option<Participant>,
}

/// An entry in the merged feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Message or stream id
    pub id: String,
    /// Origin classification
    pub kind: MessageKind,
    /// Text content
    pub text: String,
    /// Sender timestamp in milliseconds since the epoch
    pub timestamp: i64,
    /// Attributed participant, if it could be resolved
    pub from: Option<Participant>,
}

impl From<&ChatMessage> for ReceivedMessage {
    fn from(chat: &ChatMessage) -> Self {
        Self {
            id: chat.id.clone(),
            kind: MessageKind::Chat,
            text: chat.message.clone(),
            timestamp: chat.timestamp,
            from: chat.from.clone(),
        }
    }
}

/// Restricts which transcription streams are accepted.
///
/// `None` accepts everything for that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptionFilter {
    /// Accept only streams sent by these participants
    pub participant_identities: Option<Vec<String>>,
    /// Accept only streams transcribing these track SIDs
    pub track_sids: Option<Vec<String>>,
}

impl TranscriptionFilter {
    /// Whether `segment` passes both dimensions.
    pub fn matches(&self, segment: &TranscriptionSegment) -> bool {
        let identity_ok = self
            .participant_identities
            .as_ref()
            .is_none_or(|ids| ids.iter().any(|id| *id == segment.sender_identity));
        let track_ok = self.track_sids.as_ref().is_none_or(|sids| {
            let track = segment.transcribed_track().unwrap_or("");
            sids.iter().any(|sid| sid == track)
        });
        identity_ok && track_ok
    }
}

/// Participants used to attribute transcriptions.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    /// Local participant
    pub local: &'a Participant,
    /// Identified agent and worker
    pub agents: &'a AgentParticipants,
    /// Full remote roster
    pub remote: &'a [Participant],
}

/// Attribute `segment` to a participant and classify it.
///
/// Local speech is a user transcript. Everything else is an agent
/// transcript, attributed to the agent or worker when the sender is one of
/// them, otherwise to whichever remote participant has the sender identity.
pub fn classify(segment: &TranscriptionSegment, ctx: &MergeContext<'_>) -> ReceivedMessage {
    let (kind, from) = if segment.sender_identity == ctx.local.identity {
        (MessageKind::UserTranscript, Some(ctx.local.clone()))
    } else if let Some(agent) = ctx.agents.find(&segment.sender_identity) {
        (MessageKind::AgentTranscript, Some(agent.clone()))
    } else {
        let from = ctx.remote.iter().find(|p| p.identity == segment.sender_identity).cloned();
        (MessageKind::AgentTranscript, from)
    };

    ReceivedMessage {
        id: segment.id.clone(),
        kind,
        text: segment.text.clone(),
        timestamp: segment.timestamp,
        from,
    }
}

/// Result of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Full feed in first-observed order
    pub messages: Vec<ReceivedMessage>,
    /// Entries whose id had never been reported before, in feed order
    pub newly_received: Vec<ReceivedMessage>,
}

/// Stable-order merge of transcriptions and chat.
#[derive(Debug, Clone)]
pub struct TranscriptionMerger<I> {
    first_seen: HashMap<String, (I, u64)>,
    reported: HashSet<String>,
    next_seq: u64,
}

impl<I> Default for TranscriptionMerger<I> {
    fn default() -> Self {
        Self { first_seen: HashMap::new(), reported: HashSet::new(), next_seq: 0 }
    }
}

impl<I: Copy + Ord> TranscriptionMerger<I> {
    /// Empty merger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the current transcription and chat lists at `now`.
    ///
    /// Transcriptions precede chat in the raw concatenation. Duplicate ids
    /// collapse into one entry holding the last content delivered.
    pub fn merge(
        &mut self,
        now: I,
        ctx: &MergeContext<'_>,
        transcriptions: &[TranscriptionSegment],
        chat: &[ChatMessage],
    ) -> MergeOutcome {
        let mut entries: Vec<ReceivedMessage> =
            Vec::with_capacity(transcriptions.len() + chat.len());
        let mut index: HashMap<String, usize> = HashMap::new();

        let raw = transcriptions
            .iter()
            .map(|s| classify(s, ctx))
            .chain(chat.iter().map(ReceivedMessage::from));
        for message in raw {
            match index.get(&message.id) {
                Some(&slot) => entries[slot] = message,
                None => {
                    index.insert(message.id.clone(), entries.len());
                    entries.push(message);
                },
            }
        }

        for message in &entries {
            if !self.first_seen.contains_key(&message.id) {
                self.first_seen.insert(message.id.clone(), (now, self.next_seq));
                self.next_seq += 1;
            }
        }

        let first_seen = &self.first_seen;
        entries.sort_by_key(|m| first_seen.get(&m.id).copied());

        let newly_received: Vec<ReceivedMessage> = entries
            .iter()
            .filter(|m| self.reported.insert(m.id.clone()))
            .cloned()
            .collect();

        if !newly_received.is_empty() {
            tracing::debug!(count = newly_received.len(), total = entries.len(), "new messages");
        }

        MergeOutcome { messages: entries, newly_received }
    }

    /// Number of ids ever observed.
    pub fn observed(&self) -> usize {
        self.first_seen.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    struct Fixture {
        local: Participant,
        agents: AgentParticipants,
        remote: Vec<Participant>,
    }

    impl Fixture {
        fn new() -> Self {
            let remote = vec![
                Participant::agent("agent"),
                Participant::agent("avatar").with_attribute(attributes::PUBLISH_ON_BEHALF, "agent"),
                Participant::new("bob"),
            ];
            Self { local: Participant::new("me"), agents: AgentParticipants::identify(&remote), remote }
        }

        fn ctx(&self) -> MergeContext<'_> {
            MergeContext { local: &self.local, agents: &self.agents, remote: &self.remote }
        }
    }

    fn ids(messages: &[ReceivedMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn classification_by_sender() {
        let fx = Fixture::new();
        let ctx = fx.ctx();

        let user = classify(&TranscriptionSegment::new("1", "me", "hi", 0), &ctx);
        assert_eq!(user.kind, MessageKind::UserTranscript);

        let worker = classify(&TranscriptionSegment::new("2", "avatar", "hello", 0), &ctx);
        assert_eq!(worker.kind, MessageKind::AgentTranscript);
        assert_eq!(worker.from.map(|p| p.identity).as_deref(), Some("avatar"));

        let other = classify(&TranscriptionSegment::new("3", "bob", "yo", 0), &ctx);
        assert_eq!(other.kind, MessageKind::AgentTranscript);
        assert_eq!(other.from.map(|p| p.identity).as_deref(), Some("bob"));

        let unknown = classify(&TranscriptionSegment::new("4", "ghost", "boo", 0), &ctx);
        assert_eq!(unknown.kind, MessageKind::AgentTranscript);
        assert!(unknown.from.is_none());
    }

    #[test]
    fn position_is_fixed_at_first_observation() {
        let fx = Fixture::new();
        let t0 = Instant::now();
        let mut merger = TranscriptionMerger::new();

        let a = TranscriptionSegment::new("a", "agent", "Hel", 0);
        let b = TranscriptionSegment::new("b", "me", "Hi", 0);
        let first = merger.merge(t0, &fx.ctx(), &[a.clone()], &[]);
        assert_eq!(ids(&first.messages), vec!["a"]);

        let second = merger.merge(t0 + Duration::from_millis(5), &fx.ctx(), &[b.clone(), a], &[]);
        assert_eq!(ids(&second.messages), vec!["a", "b"]);
        assert_eq!(ids(&second.newly_received), vec!["b"]);

        let revised = TranscriptionSegment::new("a", "agent", "Hello there", 0);
        let third = merger.merge(t0 + Duration::from_millis(9), &fx.ctx(), &[b, revised], &[]);
        assert_eq!(ids(&third.messages), vec!["a", "b"]);
        assert_eq!(third.messages[0].text, "Hello there");
        assert!(third.newly_received.is_empty());
    }

    #[test]
    fn ties_keep_first_merge_order_when_refed_reversed() {
        let fx = Fixture::new();
        let t0 = Instant::now();
        let mut merger = TranscriptionMerger::new();

        let x = TranscriptionSegment::new("x", "agent", "x", 0);
        let y = TranscriptionSegment::new("y", "agent", "y", 0);
        merger.merge(t0, &fx.ctx(), &[x.clone(), y.clone()], &[]);

        let again = merger.merge(t0, &fx.ctx(), &[y, x], &[]);
        assert_eq!(ids(&again.messages), vec!["x", "y"]);
    }

    #[test]
    fn chat_follows_transcriptions_and_is_reported_once() {
        let fx = Fixture::new();
        let t0 = Instant::now();
        let mut merger = TranscriptionMerger::new();
        let chat = ChatMessage { id: "c".into(), message: "typed".into(), timestamp: 3, from: None };

        let first =
            merger.merge(t0, &fx.ctx(), &[TranscriptionSegment::new("t", "me", "spoken", 1)], &[
                chat.clone(),
            ]);
        assert_eq!(ids(&first.messages), vec!["t", "c"]);
        assert_eq!(first.messages[1].kind, MessageKind::Chat);
        assert_eq!(first.newly_received.len(), 2);

        let second = merger.merge(t0, &fx.ctx(), &[], &[chat]);
        assert!(second.newly_received.is_empty());
        assert_eq!(merger.observed(), 2);
    }

    #[test]
    fn duplicate_ids_in_one_delivery_keep_last_content() {
        let fx = Fixture::new();
        let mut merger = TranscriptionMerger::new();
        let out = merger.merge(Instant::now(), &fx.ctx(), &[
            TranscriptionSegment::new("d", "agent", "one", 0),
            TranscriptionSegment::new("d", "agent", "one two", 0),
        ], &[]);
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].text, "one two");
    }

    #[test]
    fn filter_by_identity_and_track() {
        let mut tagged = TranscriptionSegment::new("1", "agent", "x", 0);
        tagged.attributes.insert(attributes::TRANSCRIBED_TRACK_ID.into(), "TR_a".into());
        let untagged = TranscriptionSegment::new("2", "bob", "y", 0);

        assert!(TranscriptionFilter::default().matches(&untagged));

        let by_track =
            TranscriptionFilter { track_sids: Some(vec!["TR_a".into()]), ..Default::default() };
        assert!(by_track.matches(&tagged));
        assert!(!by_track.matches(&untagged));

        let by_identity = TranscriptionFilter {
            participant_identities: Some(vec!["bob".into()]),
            ..Default::default()
        };
        assert!(!by_identity.matches(&tagged));
        assert!(by_identity.matches(&untagged));
    }
}
