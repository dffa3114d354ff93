//! Voxroom demo binary.
//!
//! Runs one session against the in-memory room and logs every connection,
//! agent and feed transition.
//!
//! # Usage
//!
//! ```bash
//! # Agent joins, becomes ready and talks
//! voxroom-demo
//!
//! # Agent joins but never finishes initializing
//! voxroom-demo --scenario stall --agent-timeout-ms 3000
//!
//! # Load settings from a file, with debug logging
//! voxroom-demo --config session.toml --log-level debug
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use voxroom_client::{Session, SessionMessages, StartOptions, TokenRequest, TokenSource, TokioEnv};
use voxroom_core::{
    AgentState, DrainOrder, Participant, SessionConfig, TrackSource,
    participant::attributes,
    transcript::{TranscriptionFilter, TranscriptionSegment},
};
use voxroom_harness::{SimTokenSource, SimTransport};

const AGENT: &str = "agent-0";
const LOCAL: &str = "local-user";

/// How the simulated agent behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Joins, becomes ready and holds a short exchange
    Ready,
    /// Joins but never leaves `initializing`
    Stall,
    /// Becomes ready, then leaves mid-session
    Leave,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DrainArg {
    Fifo,
    Lifo,
}

impl From<DrainArg> for DrainOrder {
    fn from(arg: DrainArg) -> Self {
        match arg {
            DrainArg::Fifo => Self::Fifo,
            DrainArg::Lifo => Self::Lifo,
        }
    }
}

/// Voxroom scripted session
#[derive(Parser, Debug)]
#[command(name = "voxroom-demo")]
#[command(about = "Run a scripted voice-agent session against a simulated room")]
#[command(version)]
struct Args {
    /// Session config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Agent behavior
    #[arg(short, long, value_enum, default_value = "ready")]
    scenario: Scenario,

    /// Number of agents dispatched by the minted token
    #[arg(long, default_value = "1")]
    agents: usize,

    /// Override the agent connect timeout
    #[arg(long)]
    agent_timeout_ms: Option<u64>,

    /// Override the connect/disconnect drain order
    #[arg(long, value_enum)]
    drain_order: Option<DrainArg>,

    /// How long to stay in the room after starting
    #[arg(long, default_value = "3000")]
    run_for_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_config(args: &Args) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };
    if let Some(ms) = args.agent_timeout_ms {
        config.agent_connect_timeout = Duration::from_millis(ms);
    }
    if let Some(order) = args.drain_order {
        config.drain_order = order.into();
    }
    Ok(config)
}

/// Play the remote side: an agent that joins once the room is up.
async fn play_agent(
    room: Arc<SimTransport>,
    session: Session<SimTransport, TokioEnv>,
    scenario: Scenario,
) {
    if session.wait_until_connected(None).await.is_err() {
        return;
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    room.join(Participant::agent(AGENT).with_attribute(attributes::AGENT_STATE, "initializing"));
    if scenario == Scenario::Stall {
        return;
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    room.set_attribute(AGENT, attributes::AGENT_STATE, "listening");
    room.publish_remote_track(AGENT, TrackSource::Microphone);

    tokio::time::sleep(Duration::from_millis(300)).await;
    room.push_transcription(TranscriptionSegment::new("seg-user-1", LOCAL, "What's the", 1));
    room.push_transcription(TranscriptionSegment::new(
        "seg-user-1",
        LOCAL,
        "What's the weather like?",
        1,
    ));
    room.set_attribute(AGENT, attributes::AGENT_STATE, "thinking");

    tokio::time::sleep(Duration::from_millis(300)).await;
    room.set_attribute(AGENT, attributes::AGENT_STATE, "speaking");
    room.push_transcription(TranscriptionSegment::new("seg-agent-1", AGENT, "Sunny today.", 2));

    tokio::time::sleep(Duration::from_millis(300)).await;
    room.set_attribute(AGENT, attributes::AGENT_STATE, "listening");

    if scenario == Scenario::Leave {
        tokio::time::sleep(Duration::from_millis(300)).await;
        room.leave(AGENT);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = load_config(&args)?;
    tracing::info!(
        scenario = ?args.scenario,
        agents = args.agents,
        ?config,
        "voxroom demo starting"
    );

    let room = Arc::new(SimTransport::with_local_identity(LOCAL));
    room.configure(|c| {
        c.connect_latency = Duration::from_millis(150);
        c.disconnect_latency = Duration::from_millis(50);
        c.publish_latency = Duration::from_millis(20);
    });
    let tokens: Arc<dyn TokenSource> = Arc::new(SimTokenSource::new(args.agents));
    let request =
        TokenRequest { participant_identity: Some(LOCAL.to_string()), ..TokenRequest::default() };

    let session = Session::new(TokioEnv, Arc::clone(&room), tokens, config, request);
    let messages =
        SessionMessages::new(TokioEnv, Arc::clone(&room), TranscriptionFilter::default());
    let cancel = CancellationToken::new();

    let _session_events = session.events().subscribe(|event| {
        tracing::info!(?event, "session event");
    });
    let _agent_states = {
        let agent = session.agent().clone();
        let cancel = cancel.clone();
        session.agent().state_changes().subscribe(move |state| {
            tracing::info!(%state, "agent state");
            // A failed agent never connects; stop waiting for it.
            if *state == AgentState::Failed {
                for reason in agent.snapshot().failure_reasons() {
                    tracing::warn!(%reason, "agent failed");
                }
                cancel.cancel();
            }
        })
    };
    let _received = messages.received().subscribe(|message| {
        tracing::info!(kind = ?message.kind, text = %message.text, "message received");
    });

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted");
                cancel.cancel();
            }
        });
    }
    tokio::spawn(play_agent(Arc::clone(&room), session.clone(), args.scenario));

    let options = StartOptions { cancel: Some(cancel.clone()), ..StartOptions::default() };
    match session.start(options).await {
        Ok(()) => {
            let echo = messages.send("Thanks!").await?;
            tracing::info!(id = %echo.id, "chat sent");

            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(args.run_for_ms)) => {},
                () = cancel.cancelled() => {},
            }
        },
        Err(e) if e.is_cancelled() => tracing::warn!(error = %e, "start aborted"),
        Err(e) => {
            tracing::error!(error = %e, "start failed");
            session.end().await?;
            return Err(e.into());
        },
    }

    session.end().await?;

    for message in messages.messages() {
        let from = message.from.as_ref().map_or("?", |p| p.identity.as_str());
        tracing::info!(kind = ?message.kind, %from, text = %message.text, "transcript");
    }
    tracing::info!("voxroom demo finished");

    Ok(())
}
