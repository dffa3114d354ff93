//! Session start/end orchestration against the simulated room.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use voxroom_client::{
    Session, SessionEvent, SessionSnapshot, StartOptions, StartTracks, TokenRequest, TokenSource,
    TokioEnv, TrackOptions,
};
use voxroom_core::{
    AgentState, ConnectionState, Participant, SessionConfig, SessionError, Subscription,
    TrackSource, TransportError, participant::attributes,
};
use voxroom_harness::{
    InvariantRegistry, SIM_SERVER_URL, SimCall, SimTokenSource, SimTransport, SystemSnapshot,
};

type SimSession = Session<SimTransport, TokioEnv>;

struct Fixture {
    room: Arc<SimTransport>,
    tokens: Arc<SimTokenSource>,
    session: SimSession,
}

impl Fixture {
    fn new(agent_count: usize) -> Self {
        Self::with_config(agent_count, SessionConfig { prepare_connection: false, ..SessionConfig::default() })
    }

    fn with_config(agent_count: usize, config: SessionConfig) -> Self {
        let room = Arc::new(SimTransport::new());
        let tokens = Arc::new(SimTokenSource::new(agent_count));
        let token_source: Arc<dyn TokenSource> = Arc::clone(&tokens) as Arc<dyn TokenSource>;
        let session = Session::new(
            TokioEnv,
            Arc::clone(&room),
            token_source,
            config,
            TokenRequest::default(),
        );
        Self { room, tokens, session }
    }

    fn check(&self, context: &str) {
        InvariantRegistry::standard().assert_all(&SystemSnapshot::of(&self.session), context);
    }

    fn record_events(&self) -> (Arc<Mutex<Vec<SessionEvent>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscription = {
            let seen = Arc::clone(&seen);
            self.session.events().subscribe(move |event| seen.lock().push(event.clone()))
        };
        (seen, subscription)
    }

    fn connect_calls(&self) -> usize {
        self.room.count_calls(|call| matches!(call, SimCall::Connect { .. }))
    }
}

fn listening_agent() -> Participant {
    Participant::agent("agent-0").with_attribute(attributes::AGENT_STATE, "listening")
}

#[tokio::test(start_paused = true)]
async fn start_without_agents_resolves_on_connect() {
    let f = Fixture::new(0);
    let (events, _sub) = f.record_events();
    f.check("before start");

    f.session.start(StartOptions::default()).await.expect("start");
    f.check("after start");

    assert_eq!(f.tokens.fetch_count(), 1);
    assert!(f.room.calls().contains(&SimCall::SetTrackEnabled {
        source: TrackSource::Microphone,
        enabled: true,
        pre_connect_buffer: true,
    }));
    assert_eq!(
        *events.lock(),
        vec![
            SessionEvent::ConnectionStateChanged(ConnectionState::Connecting),
            SessionEvent::ConnectionStateChanged(ConnectionState::Connected),
        ]
    );

    let SessionSnapshot::Connected { state, local } = f.session.snapshot() else {
        panic!("expected connected snapshot, got {:?}", f.session.snapshot());
    };
    assert_eq!(state, ConnectionState::Connected);
    assert!(local.microphone.is_some());
    assert!(local.camera.is_none());

    // No agent yet, but the local buffer means speech is not lost.
    assert_eq!(f.session.agent().state(), AgentState::PreConnectBuffering);
}

#[tokio::test(start_paused = true)]
async fn start_with_agent_waits_for_agent() {
    let f = Fixture::new(1);
    let start = {
        let session = f.session.clone();
        tokio::spawn(async move { session.start(StartOptions::default()).await })
    };

    f.session.wait_until_connected(None).await.expect("connected");
    f.check("room connected");
    tokio::task::yield_now().await;
    assert!(!start.is_finished());

    f.room.join(Participant::agent("agent-0").with_attribute(attributes::AGENT_STATE, "initializing"));
    f.check("agent initializing");
    tokio::task::yield_now().await;
    assert!(!start.is_finished());

    f.room.set_attribute("agent-0", attributes::AGENT_STATE, "listening");
    assert_eq!(start.await.expect("task"), Ok(()));
    f.check("agent listening");
    assert!(f.session.agent().snapshot().is_connected());
}

#[tokio::test(start_paused = true)]
async fn agent_that_never_joins_fails_and_cancel_disconnects() {
    let f = Fixture::new(1);
    let cancel = CancellationToken::new();
    let start = {
        let session = f.session.clone();
        let options = StartOptions { cancel: Some(cancel.clone()), ..StartOptions::default() };
        tokio::spawn(async move { session.start(options).await })
    };

    tokio::time::sleep(Duration::from_millis(21_000)).await;
    f.check("after deadline");
    assert_eq!(f.session.agent().state(), AgentState::Failed);
    assert_eq!(f.session.connection_state(), ConnectionState::Connected);
    assert!(!start.is_finished());

    cancel.cancel();
    assert_eq!(
        start.await.expect("task"),
        Err(SessionError::Cancelled { operation: "AgentStateMachine::wait_until_connected" })
    );

    f.session.wait_until_disconnected(None).await.expect("disconnected");
    f.check("after abort");
    assert_eq!(f.session.agent().state(), AgentState::Disconnected);
    assert_eq!(f.room.count_calls(|call| *call == SimCall::Disconnect), 1);
}

#[tokio::test(start_paused = true)]
async fn completed_start_ignores_later_cancel() {
    let f = Fixture::new(0);
    let cancel = CancellationToken::new();
    let options = StartOptions { cancel: Some(cancel.clone()), ..StartOptions::default() };

    f.session.start(options).await.expect("start");
    cancel.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(f.session.connection_state(), ConnectionState::Connected);
    assert_eq!(f.room.count_calls(|call| *call == SimCall::Disconnect), 0);
}

#[tokio::test(start_paused = true)]
async fn credential_error_outranks_track_error() {
    let f = Fixture::new(0);
    f.tokens.set_failure(Some("offline"));
    f.room.configure(|c| {
        c.publish_failures.insert(TrackSource::Microphone);
    });
    let (events, _sub) = f.record_events();

    let result = f.session.start(StartOptions::default()).await;
    assert_eq!(result, Err(SessionError::Credentials("offline".into())));

    assert_eq!(
        *events.lock(),
        vec![SessionEvent::MediaDevicesError(TransportError::Publish {
            track: TrackSource::Microphone,
            reason: "permission denied".into(),
        })]
    );
    assert_eq!(f.connect_calls(), 0);
    f.check("after failed start");
}

#[tokio::test(start_paused = true)]
async fn connect_error_outranks_camera_error() {
    let f = Fixture::new(0);
    f.room.configure(|c| {
        c.connect_failure = Some("refused".into());
        c.publish_failures.insert(TrackSource::Camera);
    });
    let options = StartOptions {
        tracks: StartTracks { camera: TrackOptions::enabled(), ..StartTracks::default() },
        ..StartOptions::default()
    };

    let result = f.session.start(options).await;
    assert_eq!(result, Err(SessionError::Transport(TransportError::Connection("refused".into()))));
    assert_eq!(f.session.connection_state(), ConnectionState::Disconnected);
    f.check("after refused connect");
}

#[tokio::test(start_paused = true)]
async fn track_failure_leaves_room_connected() {
    let f = Fixture::new(0);
    f.room.configure(|c| {
        c.publish_failures.insert(TrackSource::Microphone);
    });

    let result = f.session.start(StartOptions::default()).await;
    assert_eq!(
        result,
        Err(SessionError::Transport(TransportError::Publish {
            track: TrackSource::Microphone,
            reason: "permission denied".into(),
        }))
    );

    // Partial side effects are not rolled back.
    assert_eq!(f.session.connection_state(), ConnectionState::Connected);
    assert_eq!(f.session.agent().state(), AgentState::Connecting);
    f.check("after track failure");
}

#[tokio::test(start_paused = true)]
async fn start_waits_for_previous_session_to_disconnect() {
    let f = Fixture::new(0);
    f.room.set_connection_state(ConnectionState::Connected);

    let start = {
        let session = f.session.clone();
        tokio::spawn(async move { session.start(StartOptions::default()).await })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(f.tokens.fetch_count(), 0);
    assert!(!start.is_finished());

    f.room.set_connection_state(ConnectionState::Disconnected);
    assert_eq!(start.await.expect("task"), Ok(()));
    assert_eq!(f.tokens.fetch_count(), 1);
    assert_eq!(f.connect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_rejects_start_while_connected() {
    let f = Fixture::new(0);
    f.room.set_connection_state(ConnectionState::Connected);
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(
        f.session.wait_until_disconnected(Some(&cancel)).await,
        Err(SessionError::Cancelled { operation: "Session::wait_until_disconnected" })
    );

    let options = StartOptions { cancel: Some(cancel), ..StartOptions::default() };
    let err = f.session.start(options).await.expect_err("cancelled");
    assert!(err.is_cancelled());
    assert_eq!(f.tokens.fetch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn end_is_idempotent() {
    let f = Fixture::new(0);
    f.session.start(StartOptions::default()).await.expect("start");

    assert_eq!(f.session.end().await, Ok(()));
    f.check("after end");
    assert_eq!(f.session.connection_state(), ConnectionState::Disconnected);
    assert_eq!(f.session.snapshot(), SessionSnapshot::Disconnected);
    assert_eq!(f.session.agent().state(), AgentState::Disconnected);

    assert_eq!(f.session.end().await, Ok(()));
    assert_eq!(f.session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn end_during_start_abandons_it() {
    let f = Fixture::new(0);
    f.room.configure(|c| {
        c.connect_latency = Duration::from_millis(100);
        c.publish_latency = Duration::from_millis(300);
    });
    let start = {
        let session = f.session.clone();
        tokio::spawn(async move { session.start(StartOptions::default()).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.session.end().await, Ok(()));
    assert_eq!(f.session.connection_state(), ConnectionState::Disconnected);

    let result = tokio::time::timeout(Duration::from_secs(3600), start)
        .await
        .expect("start settles after end")
        .expect("task");
    assert_eq!(result, Err(SessionError::Cancelled { operation: "Session::start" }));
    assert_eq!(f.room.count_calls(|call| *call == SimCall::Disconnect), 1);
    f.check("after end during start");

    // The next start is not affected by the earlier end.
    f.session.start(StartOptions::default()).await.expect("restart");
    assert_eq!(f.session.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn end_while_waiting_for_agent_abandons_start() {
    let f = Fixture::new(1);
    let start = {
        let session = f.session.clone();
        tokio::spawn(async move { session.start(StartOptions::default()).await })
    };

    f.session.wait_until_connected(None).await.expect("connected");
    assert_eq!(f.session.end().await, Ok(()));

    assert_eq!(
        start.await.expect("task"),
        Err(SessionError::Cancelled { operation: "Session::start" })
    );
    assert_eq!(f.session.agent().state(), AgentState::Disconnected);
    f.check("after end while waiting for agent");
}

#[tokio::test(start_paused = true)]
async fn failed_disconnect_is_reported_and_room_stays_connected() {
    let f = Fixture::new(0);
    f.session.start(StartOptions::default()).await.expect("start");
    f.room.configure(|c| c.disconnect_failure = Some("socket busy".into()));

    assert_eq!(
        f.session.end().await,
        Err(SessionError::Transport(TransportError::Disconnect("socket busy".into())))
    );
    assert_eq!(f.session.connection_state(), ConnectionState::Connected);
    f.check("after failed end");

    f.room.configure(|c| c.disconnect_failure = None);
    assert_eq!(f.session.end().await, Ok(()));
    assert_eq!(f.session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn session_can_restart_after_end() {
    let f = Fixture::new(1);
    let start = {
        let session = f.session.clone();
        tokio::spawn(async move { session.start(StartOptions::default()).await })
    };
    f.session.wait_until_connected(None).await.expect("connected");
    f.room.join(listening_agent());
    start.await.expect("task").expect("first start");

    f.session.end().await.expect("end");
    f.check("between sessions");

    let start = {
        let session = f.session.clone();
        tokio::spawn(async move { session.start(StartOptions::default()).await })
    };
    f.session.wait_until_connected(None).await.expect("connected again");
    f.room.join(listening_agent());
    start.await.expect("task").expect("second start");

    assert_eq!(f.tokens.fetch_count(), 2);
    assert_eq!(f.connect_calls(), 2);
    f.check("second session");
}

#[tokio::test(start_paused = true)]
async fn prepare_failure_is_soft_in_background() {
    let f = Fixture::new(0);
    f.room.configure(|c| c.prepare_failure = Some("dns".into()));

    let handle = f.session.spawn_prepare().expect("runtime");
    handle.await.expect("prepare task");

    assert_eq!(
        f.session.prepare_connection().await,
        Err(SessionError::Transport(TransportError::Connection("dns".into())))
    );
    assert_eq!(
        f.room.calls(),
        vec![
            SimCall::Prepare { server_url: SIM_SERVER_URL.into() },
            SimCall::Prepare { server_url: SIM_SERVER_URL.into() },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn new_session_prepares_by_default() {
    let f = Fixture::with_config(0, SessionConfig::default());

    while f.room.count_calls(|call| matches!(call, SimCall::Prepare { .. })) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(f.tokens.fetch_count(), 1);
    assert_eq!(f.session.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn device_and_encryption_errors_are_forwarded() {
    let f = Fixture::new(0);
    let (events, _sub) = f.record_events();

    f.room.emit_encryption_error("bad key");
    f.room.emit_media_error(TransportError::Publish {
        track: TrackSource::Camera,
        reason: "unplugged".into(),
    });

    assert_eq!(
        *events.lock(),
        vec![
            SessionEvent::EncryptionError("bad key".into()),
            SessionEvent::MediaDevicesError(TransportError::Publish {
                track: TrackSource::Camera,
                reason: "unplugged".into(),
            }),
        ]
    );
}
