//! Voxroom client
//!
//! Async orchestration of a session against a real-time room, on tokio. The
//! room transport and the credential source are injected through the
//! [`RoomTransport`] and [`TokenSource`] traits; everything derived from
//! them is computed by the pure machines in `voxroom-core`.
//!
//! # Components
//!
//! - [`Session`]: start/end lifecycle, connection waits, session events
//! - [`AgentStateMachine`]: agent lifecycle derived from room events
//! - [`ConnectDisconnectSerializer`]: one transport call in flight at a time
//! - [`AgentTimeout`]: tokio timer driving the agent deadline
//! - [`SessionMessages`]: merged transcription and chat feed
//!
//! # Example
//!
//! ```ignore
//! let config = SessionConfig::default();
//! let session = Session::new(TokioEnv, room, token_source, config, TokenRequest::default());
//! session.start(StartOptions::default()).await?;
//! session.agent().wait_until_could_be_listening(None).await?;
//! session.end().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod env;
pub mod messages;
pub mod serializer;
pub mod session;
pub mod timeout;
pub mod transport;

mod wait;

pub use agent::AgentStateMachine;
pub use env::TokioEnv;
pub use messages::SessionMessages;
pub use serializer::{ConnectDisconnectSerializer, OperationKind};
pub use session::{LocalTracks, Session, SessionEvent, SessionSnapshot};
pub use timeout::AgentTimeout;
pub use transport::{
    ConnectArgs, Credentials, FixedTokenSource, PublishOptions, RoomConnectOptions, RoomEvent,
    RoomTransport, StartOptions, StartTracks, TokenRequest, TokenSource, TrackOptions,
};
