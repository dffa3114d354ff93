//! Session orchestration.
//!
//! A [`Session`] owns one room transport for its lifetime. It serializes
//! connect and disconnect through a [`ConnectDisconnectSerializer`], mirrors
//! the room connection state, re-emits device and encryption errors, and
//! owns the [`AgentStateMachine`] for the room.
//!
//! # Start Sequence
//!
//! [`Session::start`] waits for the room to be disconnected, then runs the
//! credential fetch and connect concurrently with the requested local track
//! enables. Once everything settles it waits for the room to connect and, if
//! the credentials dispatched an agent, for the agent to connect. Partial side
//! effects are not rolled back on failure.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voxroom_core::{
    ConnectionState, Environment, Notifier, SessionConfig, SessionError, Subscription,
    TrackReference, TrackSource, TransportError, token::decode_token_payload,
};

use crate::{
    agent::AgentStateMachine,
    serializer::ConnectDisconnectSerializer,
    timeout::AgentTimeout,
    transport::{
        ConnectArgs, RoomConnectOptions, RoomEvent, RoomTransport, StartOptions, StartTracks,
        TokenRequest, TokenSource, TrackOptions,
    },
    wait::wait_for,
};

/// Notifications emitted by a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Room connection state changed
    ConnectionStateChanged(ConnectionState),
    /// A local media device failed, or a track requested by `start` could
    /// not be enabled
    MediaDevicesError(TransportError),
    /// End-to-end encryption failed
    EncryptionError(String),
}

/// Local track references while connected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalTracks {
    /// Local camera
    pub camera: Option<TrackReference>,
    /// Local microphone
    pub microphone: Option<TrackReference>,
    /// Local screen share
    pub screen_share: Option<TrackReference>,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSnapshot {
    /// Joining the room
    Connecting,
    /// Connected, possibly recovering from a dropped link
    Connected {
        /// `Connected`, `Reconnecting` or `SignalReconnecting`
        state: ConnectionState,
        /// Local tracks
        local: LocalTracks,
    },
    /// Not in the room
    Disconnected,
}

impl SessionSnapshot {
    /// Underlying connection state.
    pub fn connection_state(&self) -> ConnectionState {
        match self {
            Self::Connecting => ConnectionState::Connecting,
            Self::Connected { state, .. } => *state,
            Self::Disconnected => ConnectionState::Disconnected,
        }
    }

    /// Whether the session counts as connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Local tracks; `None` unless connected.
    pub fn local(&self) -> Option<&LocalTracks> {
        match self {
            Self::Connected { local, .. } => Some(local),
            Self::Connecting | Self::Disconnected => None,
        }
    }
}

struct Inner<T: ?Sized, E: Environment> {
    room: Arc<T>,
    token_source: Arc<dyn TokenSource>,
    request: TokenRequest,
    serializer: ConnectDisconnectSerializer<T, E>,
    agent: AgentStateMachine<T, E>,
    connection_state: Mutex<ConnectionState>,
    events: Notifier<SessionEvent>,
    subscription: Mutex<Option<Subscription>>,
    /// Cancelled and replaced by every `end`.
    ended: Mutex<CancellationToken>,
}

/// Connection lifecycle of one room with an optional agent participant.
///
/// Cloning produces another handle to the same session.
pub struct Session<T: ?Sized, E: Environment> {
    inner: Arc<Inner<T, E>>,
}

impl<T: ?Sized, E: Environment> Clone for Session<T, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T, E> Session<T, E>
where
    T: RoomTransport + ?Sized,
    E: Environment,
{
    /// Session over `room`.
    ///
    /// When `config.prepare_connection` is set and a tokio runtime is
    /// available, a transport pre-warm is spawned immediately.
    pub fn new(
        env: E,
        room: Arc<T>,
        token_source: Arc<dyn TokenSource>,
        config: SessionConfig,
        request: TokenRequest,
    ) -> Self {
        // The agent machine subscribes to room events first so its snapshot
        // is current by the time session listeners observe the same event.
        let timeout = AgentTimeout::new(env.clone(), config.agent_connect_timeout);
        let agent = AgentStateMachine::new(Arc::clone(&room), timeout, None);
        let serializer = ConnectDisconnectSerializer::new(
            env,
            Some(Arc::clone(&room)),
            config.drain_order,
            &config.serializer,
        );

        let inner = Arc::new(Inner {
            connection_state: Mutex::new(room.connection_state()),
            room,
            token_source,
            request,
            serializer,
            agent,
            events: Notifier::new(),
            subscription: Mutex::new(None),
            ended: Mutex::new(CancellationToken::new()),
        });

        let weak: Weak<Inner<T, E>> = Arc::downgrade(&inner);
        let subscription = inner.room.events().subscribe(move |event| {
            if let Some(inner) = weak.upgrade() {
                Self::handle_room_event(&inner, event);
            }
        });
        *inner.subscription.lock() = Some(subscription);

        let session = Self { inner };
        if config.prepare_connection {
            session.spawn_prepare();
        }
        session
    }

    fn handle_room_event(inner: &Inner<T, E>, event: &RoomEvent) {
        let forwarded = match event {
            RoomEvent::ConnectionStateChanged(state) => {
                let previous = std::mem::replace(&mut *inner.connection_state.lock(), *state);
                if previous == *state {
                    return;
                }
                tracing::debug!(from = %previous, to = %state, "connection state changed");
                SessionEvent::ConnectionStateChanged(*state)
            },
            RoomEvent::MediaDevicesError(error) => {
                tracing::warn!(error = %error, "media device error");
                SessionEvent::MediaDevicesError(error.clone())
            },
            RoomEvent::EncryptionError(error) => {
                tracing::warn!(error = %error, "encryption error");
                SessionEvent::EncryptionError(error.clone())
            },
            _ => return,
        };
        inner.events.emit(&forwarded);
    }

    /// Connect to the room, publish the requested local tracks, and wait
    /// until the room and any dispatched agent are connected.
    ///
    /// Cancelling `options.cancel` once the room is disconnected abandons the
    /// start and disconnects before returning. Calling [`Session::end`] in
    /// that span also abandons it; the disconnect is left to `end`. If the
    /// agent fails instead of connecting, the agent wait keeps waiting; pass a
    /// cancellation token to bound it.
    ///
    /// # Errors
    ///
    /// The first failure by priority: credentials, connect, microphone,
    /// camera, screen share. Track failures are also emitted as
    /// [`SessionEvent::MediaDevicesError`]. Cancellation and `end` yield
    /// [`SessionError::Cancelled`].
    pub async fn start(&self, options: StartOptions) -> Result<(), SessionError> {
        let StartOptions { tracks, room_connect_options, cancel } = options;

        self.wait_until_disconnected(cancel.as_ref()).await?;
        tracing::info!("starting session");

        let ended = self.inner.ended.lock().clone();
        let caller_cancelled = async {
            match &cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };

        // Waits inside the body observe the caller's token themselves; that
        // branch only wins while the body is in the uncancellable join.
        let outcome = tokio::select! {
            biased;
            result = self.run_start(tracks, room_connect_options, cancel.as_ref()) => result,
            () = caller_cancelled => Err(SessionError::Cancelled { operation: "Session::start" }),
            () = ended.cancelled() => {
                tracing::info!("session ended during start");
                return Err(SessionError::Cancelled { operation: "Session::start" });
            },
        };

        if outcome.as_ref().is_err_and(SessionError::is_cancelled) {
            tracing::info!("start aborted, disconnecting");
            if let Err(e) = self.inner.serializer.disconnect().await {
                tracing::warn!(error = %e, "disconnect after abort failed");
            }
        }
        outcome
    }

    async fn run_start(
        &self,
        tracks: StartTracks,
        room_connect_options: RoomConnectOptions,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), SessionError> {
        let (connected, microphone, camera, screen_share) = futures::join!(
            self.fetch_and_connect(room_connect_options),
            self.enable_track(TrackSource::Microphone, &tracks.microphone),
            self.enable_track(TrackSource::Camera, &tracks.camera),
            self.enable_track(TrackSource::ScreenShare, &tracks.screen_share),
        );

        let track_errors = [&microphone, &camera, &screen_share]
            .into_iter()
            .filter_map(|result| result.as_ref().err());
        for error in track_errors {
            self.inner.events.emit(&SessionEvent::MediaDevicesError(error.clone()));
        }

        let dispatched_agents = connected?;
        microphone?;
        camera?;
        screen_share?;

        self.wait_until_connected(cancel).await?;
        if dispatched_agents > 0 {
            tracing::debug!(count = dispatched_agents, "waiting for dispatched agent");
            self.inner.agent.wait_until_connected(cancel).await?;
        }

        tracing::info!("session started");
        Ok(())
    }

    /// Fetch credentials, decode the agent dispatch count, and connect.
    async fn fetch_and_connect(&self, options: RoomConnectOptions) -> Result<usize, SessionError> {
        let credentials = self.inner.token_source.fetch(&self.inner.request).await?;
        let payload = decode_token_payload(&credentials.participant_token)?;

        self.inner
            .serializer
            .connect(ConnectArgs {
                server_url: credentials.server_url,
                participant_token: credentials.participant_token,
                options,
            })
            .await?;

        Ok(payload.dispatched_agent_count())
    }

    async fn enable_track(
        &self,
        source: TrackSource,
        options: &TrackOptions,
    ) -> Result<(), TransportError> {
        if !options.enabled {
            return Ok(());
        }
        self.inner.room.set_track_enabled(source, true, &options.publish).await
    }

    /// Leave the room. Idempotent.
    ///
    /// A [`Session::start`] past its initial disconnected wait is abandoned
    /// and returns [`SessionError::Cancelled`].
    pub async fn end(&self) -> Result<(), SessionError> {
        tracing::info!("ending session");
        let ended = std::mem::replace(&mut *self.inner.ended.lock(), CancellationToken::new());
        ended.cancel();
        self.inner.serializer.disconnect().await
    }

    /// Fetch credentials and pre-warm the transport.
    pub async fn prepare_connection(&self) -> Result<(), SessionError> {
        let credentials = self.inner.token_source.fetch(&self.inner.request).await?;
        self.inner
            .room
            .prepare_connection(&credentials.server_url, &credentials.participant_token)
            .await?;
        Ok(())
    }

    /// Spawn [`Session::prepare_connection`] on the current runtime, logging
    /// failures.
    ///
    /// Returns `None` outside a tokio runtime.
    pub fn spawn_prepare(&self) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime, skipping prepare_connection");
            return None;
        };

        let session = self.clone();
        Some(runtime.spawn(async move {
            if let Err(e) = session.prepare_connection().await {
                tracing::warn!(error = %e, "prepare_connection failed");
            }
        }))
    }

    /// Resolve once the room is connected, reconnecting included.
    pub async fn wait_until_connected(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), SessionError> {
        self.wait_for_connection(
            ConnectionState::is_connected,
            cancel,
            "Session::wait_until_connected",
        )
        .await
    }

    /// Resolve once the room is disconnected.
    pub async fn wait_until_disconnected(
        &self,
        cancel: Option<&CancellationToken>,
    ) -> Result<(), SessionError> {
        self.wait_for_connection(
            |state| state == ConnectionState::Disconnected,
            cancel,
            "Session::wait_until_disconnected",
        )
        .await
    }

    async fn wait_for_connection(
        &self,
        predicate: fn(ConnectionState) -> bool,
        cancel: Option<&CancellationToken>,
        operation: &'static str,
    ) -> Result<(), SessionError> {
        let inner = &self.inner;
        wait_for(
            &inner.events,
            || predicate(*inner.connection_state.lock()).then_some(()),
            move |event: &SessionEvent| match event {
                SessionEvent::ConnectionStateChanged(state) => predicate(*state).then_some(()),
                SessionEvent::MediaDevicesError(_) | SessionEvent::EncryptionError(_) => None,
            },
            cancel,
            operation,
        )
        .await
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection_state.lock()
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        match self.connection_state() {
            ConnectionState::Disconnected => SessionSnapshot::Disconnected,
            ConnectionState::Connecting => SessionSnapshot::Connecting,
            state => {
                let local = self.inner.room.local_participant();
                SessionSnapshot::Connected {
                    state,
                    local: LocalTracks {
                        camera: local.track_reference(TrackSource::Camera),
                        microphone: local.track_reference(TrackSource::Microphone),
                        screen_share: local.track_reference(TrackSource::ScreenShare),
                    },
                }
            },
        }
    }

    /// Agent state machine for this room.
    pub fn agent(&self) -> &AgentStateMachine<T, E> {
        &self.inner.agent
    }

    /// Session event notifier.
    pub fn events(&self) -> &Notifier<SessionEvent> {
        &self.inner.events
    }

    /// Underlying transport.
    pub fn room(&self) -> &Arc<T> {
        &self.inner.room
    }

    /// Connect/disconnect serializer.
    pub fn serializer(&self) -> &ConnectDisconnectSerializer<T, E> {
        &self.inner.serializer
    }
}
