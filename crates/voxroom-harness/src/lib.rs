//! Deterministic simulation harness for voxroom session testing.
//!
//! In-memory implementations of the transport and credential traits, driven
//! on tokio's paused clock so that every interleaving of connects, agent
//! arrivals and timeouts is reproducible.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks behavioral properties of session and agent
//! snapshots after every simulated step. Use
//! [`InvariantRegistry::standard()`] for the common set.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_token;
pub mod sim_transport;

pub use invariants::{
    AgentDisconnectedWithRoom, FailedIffReasons, Invariant, InvariantRegistry, InvariantResult,
    ProjectionConsistency, SessionConnectedVariant, SessionObservation, SystemSnapshot, Violation,
};
pub use sim_token::{SIM_SERVER_URL, SimTokenSource, mint_token};
pub use sim_transport::{SimCall, SimConfig, SimTransport};
