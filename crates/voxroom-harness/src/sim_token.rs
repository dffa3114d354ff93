//! Simulated credential source.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use voxroom_client::{Credentials, TokenRequest, TokenSource};
use voxroom_core::{
    SessionError, TokenError,
    token::{AgentDispatch, RoomConfig, TokenPayload, encode_unsigned_token},
};

/// Server URL handed out by [`SimTokenSource`].
pub const SIM_SERVER_URL: &str = "wss://sim.voxroom.invalid";

/// Mint an unsigned participant token for `identity` dispatching
/// `agent_names`.
///
/// An empty `agent_names` produces a token with no room configuration.
pub fn mint_token(identity: &str, agent_names: &[&str]) -> Result<String, TokenError> {
    let room_config = (!agent_names.is_empty()).then(|| RoomConfig {
        agents: agent_names
            .iter()
            .map(|name| AgentDispatch { agent_name: Some((*name).to_string()), metadata: None })
            .collect(),
    });

    encode_unsigned_token(&TokenPayload {
        sub: Some(identity.to_string()),
        room_config,
        ..TokenPayload::default()
    })
}

/// Token source minting tokens locally.
///
/// Tracks how often it was asked and can be made slow or failing.
pub struct SimTokenSource {
    identity: String,
    agents: Vec<String>,
    latency: Mutex<Duration>,
    failure: Mutex<Option<String>>,
    token_override: Mutex<Option<String>>,
    fetches: AtomicUsize,
    last_request: Mutex<Option<TokenRequest>>,
}

impl SimTokenSource {
    /// Source for `local-user` dispatching `agent_count` agents.
    pub fn new(agent_count: usize) -> Self {
        Self {
            identity: "local-user".to_string(),
            agents: (0..agent_count).map(|i| format!("agent-{i}")).collect(),
            latency: Mutex::new(Duration::ZERO),
            failure: Mutex::new(None),
            token_override: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Delay every fetch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Fail every fetch with `reason`, or stop failing with `None`.
    pub fn set_failure(&self, reason: Option<&str>) {
        *self.failure.lock() = reason.map(str::to_string);
    }

    /// Hand out `token` verbatim instead of minting one.
    pub fn set_token_override(&self, token: Option<&str>) {
        *self.token_override.lock() = token.map(str::to_string);
    }

    /// Number of fetches so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Request passed to the most recent fetch.
    pub fn last_request(&self) -> Option<TokenRequest> {
        self.last_request.lock().clone()
    }
}

#[async_trait]
impl TokenSource for SimTokenSource {
    async fn fetch(&self, request: &TokenRequest) -> Result<Credentials, SessionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock() = Some(request.clone());

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if let Some(reason) = self.failure.lock().clone() {
            return Err(SessionError::Credentials(reason));
        }

        let participant_token = match self.token_override.lock().clone() {
            Some(token) => token,
            None => {
                let names: Vec<&str> = self.agents.iter().map(String::as_str).collect();
                mint_token(&self.identity, &names)?
            },
        };

        Ok(Credentials { server_url: SIM_SERVER_URL.to_string(), participant_token })
    }
}
