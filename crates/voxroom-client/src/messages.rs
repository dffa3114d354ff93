//! Merged conversation feed.
//!
//! [`SessionMessages`] binds the room's transcription and chat streams and
//! keeps a single ordered list of [`ReceivedMessage`]s. The list is rebuilt
//! on every stream emission and on roster changes, which can re-attribute
//! transcriptions. Each id is announced on [`SessionMessages::received`]
//! exactly once.
//!
//! The transcription stream is only bound while the room is not
//! disconnected. Chat stays bound for the lifetime of the feed.
//!
//! Every id ever observed is remembered for ordering, so memory grows with
//! the number of distinct messages in the session.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use voxroom_core::{
    AgentParticipants, ConnectionState, Environment, Notifier, ObservableState, SessionError,
    Subscription,
    transcript::{
        ChatMessage, MergeContext, ReceivedMessage, TranscriptionFilter, TranscriptionMerger,
        TranscriptionSegment,
    },
};

use crate::transport::{RoomEvent, RoomTransport};

struct Inner<T: ?Sized, E: Environment> {
    env: E,
    room: Arc<T>,
    filter: TranscriptionFilter,
    transcriptions: ObservableState<Vec<TranscriptionSegment>>,
    chat: ObservableState<Vec<ChatMessage>>,
    merger: Mutex<TranscriptionMerger<E::Instant>>,
    messages: Mutex<Vec<ReceivedMessage>>,
    received: Notifier<ReceivedMessage>,
    is_sending: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Transcriptions and chat of one room, merged in arrival order.
pub struct SessionMessages<T: ?Sized, E: Environment> {
    inner: Arc<Inner<T, E>>,
}

impl<T: ?Sized, E: Environment> Clone for SessionMessages<T, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

/// Clears the sending flag when a send settles or is dropped.
struct SendingGuard<'a>(&'a AtomicBool);

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T, E> SessionMessages<T, E>
where
    T: RoomTransport + ?Sized,
    E: Environment,
{
    /// Feed over `room`, keeping only transcriptions accepted by `filter`.
    pub fn new(env: E, room: Arc<T>, filter: TranscriptionFilter) -> Self {
        let inner = Arc::new(Inner {
            env,
            filter,
            transcriptions: ObservableState::new(Vec::new()),
            chat: ObservableState::with_source(room.chat_snapshot(), Some(room.chat_messages())),
            room,
            merger: Mutex::new(TranscriptionMerger::new()),
            messages: Mutex::new(Vec::new()),
            received: Notifier::new(),
            is_sending: AtomicBool::new(false),
            subscriptions: Mutex::new(Vec::new()),
        });

        let on_transcriptions =
            inner.transcriptions.on_change(Self::recompute_on_change(Arc::downgrade(&inner)));
        let on_chat = inner.chat.on_change(Self::recompute_on_change(Arc::downgrade(&inner)));

        let weak = Arc::downgrade(&inner);
        let on_room = inner.room.events().subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                Self::handle_room_event(&inner, event);
            }
        });
        inner.subscriptions.lock().extend([on_transcriptions, on_chat, on_room]);

        let state = inner.room.connection_state();
        Self::sync_transcription_binding(&inner, state);
        Self::recompute(&inner);

        Self { inner }
    }

    fn recompute_on_change<V: 'static>(
        weak: Weak<Inner<T, E>>,
    ) -> impl Fn(&V) + Send + Sync + 'static {
        move |_| {
            if let Some(inner) = weak.upgrade() {
                Self::recompute(&inner);
            }
        }
    }

    fn handle_room_event(inner: &Inner<T, E>, event: &RoomEvent) {
        match event {
            RoomEvent::ConnectionStateChanged(state) => {
                Self::sync_transcription_binding(inner, *state);
            },
            RoomEvent::ParticipantConnected(_)
            | RoomEvent::ParticipantDisconnected(_)
            | RoomEvent::ParticipantAttributesChanged { .. } => Self::recompute(inner),
            _ => {},
        }
    }

    fn sync_transcription_binding(inner: &Inner<T, E>, state: ConnectionState) {
        let connected = state != ConnectionState::Disconnected;
        if connected == inner.transcriptions.is_bound() {
            return;
        }

        if connected {
            inner.transcriptions.bind(Some(inner.room.transcriptions()));
            // The source only pushes on change; seed what already arrived.
            inner.transcriptions.set(inner.room.transcription_snapshot());
        } else {
            tracing::debug!("room disconnected, unbinding transcriptions");
            inner.transcriptions.bind(None);
        }
    }

    fn recompute(inner: &Inner<T, E>) {
        let transcriptions: Vec<TranscriptionSegment> = inner
            .transcriptions
            .get()
            .into_iter()
            .filter(|segment| inner.filter.matches(segment))
            .collect();
        let chat = inner.chat.get();

        let local = inner.room.local_participant();
        let remote = inner.room.remote_participants();
        let agents = AgentParticipants::identify(&remote);
        let ctx = MergeContext { local: &local, agents: &agents, remote: &remote };

        let newly_received = {
            let mut merger = inner.merger.lock();
            let outcome = merger.merge(inner.env.now(), &ctx, &transcriptions, &chat);
            *inner.messages.lock() = outcome.messages;
            outcome.newly_received
        };

        for message in &newly_received {
            inner.received.emit(message);
        }
    }

    /// Messages in first-observed order.
    pub fn messages(&self) -> Vec<ReceivedMessage> {
        self.inner.messages.lock().clone()
    }

    /// Notifier announcing each message id once, in first-observed order.
    pub fn received(&self) -> &Notifier<ReceivedMessage> {
        &self.inner.received
    }

    /// Transcription filter in effect.
    pub fn filter(&self) -> &TranscriptionFilter {
        &self.inner.filter
    }

    /// Whether a [`SessionMessages::send`] is in flight.
    pub fn is_sending(&self) -> bool {
        self.inner.is_sending.load(Ordering::SeqCst)
    }

    /// Send a chat message as the local participant.
    ///
    /// The message joins the feed once the transport's chat stream echoes
    /// it.
    pub async fn send(&self, text: &str) -> Result<ChatMessage, SessionError> {
        self.inner.is_sending.store(true, Ordering::SeqCst);
        let _sending = SendingGuard(&self.inner.is_sending);

        let message = self.inner.room.send_chat_message(text).await?;
        tracing::debug!(id = %message.id, "chat message sent");
        Ok(message)
    }
}
