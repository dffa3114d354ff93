//! Voxroom core
//!
//! Pure state machines for orchestrating a session against a real-time room
//! that may contain an agent participant. Nothing in this crate performs I/O
//! or owns a timer: time is passed in by the caller, and every state
//! transition is a synchronous function of the latest inputs. The async layer
//! in `voxroom-client` drives these machines from transport events.
//!
//! # Components
//!
//! - [`notify::Notifier`]: explicit listener registry used for every
//!   internal notification
//! - [`observable::ObservableState`]: latest-value bridge from a push source
//! - [`timeout::AgentTimeoutTracker`]: restartable deadline for agent arrival
//!   and readiness
//! - [`agent`]: agent identification and lifecycle state derivation
//! - [`rate::RateMonitor`]: rolling-window instrumentation for call bursts
//! - [`transcript::TranscriptionMerger`]: stable-order merge of chat and
//!   transcriptions
//! - [`token`]: participant token payload decoding

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod config;
pub mod env;
pub mod error;
pub mod notify;
pub mod observable;
pub mod participant;
pub mod rate;
pub mod state;
pub mod timeout;
pub mod token;
pub mod transcript;

pub use agent::{AgentDetails, AgentInputs, AgentParticipants, AgentPhase, AgentSnapshot};
pub use config::{DrainOrder, SerializerConfig, SessionConfig};
pub use env::Environment;
pub use error::{SessionError, TokenError, TransportError};
pub use notify::{EventSource, Notifier, Subscription};
pub use observable::ObservableState;
pub use participant::{
    Attributes, Participant, ParticipantKind, TrackPublication, TrackReference, TrackSource,
};
pub use state::{AgentState, ConnectionState, FailureKind, FailureReason};
pub use timeout::{AgentTimeoutTracker, TimerArm};
