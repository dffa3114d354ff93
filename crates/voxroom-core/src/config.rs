//! Session configuration.
//!
//! Durations are (de)serialized as integer milliseconds so configs read
//! naturally from TOML:
//!
//! ```toml
//! agent_connect_timeout = 20000
//! drain_order = "fifo"
//! prepare_connection = false
//!
//! [serializer]
//! enqueue_threshold = 2
//! enqueue_window = 400
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timeout::DEFAULT_AGENT_CONNECT_TIMEOUT;

/// Default number of handle changes tolerated per window.
pub const DEFAULT_HANDLE_CHANGE_THRESHOLD: usize = 3;
/// Default window for counting handle changes.
pub const DEFAULT_HANDLE_CHANGE_WINDOW: Duration = Duration::from_millis(1000);
/// Default number of connect/disconnect enqueues tolerated per window.
pub const DEFAULT_ENQUEUE_THRESHOLD: usize = 2;
/// Default window for counting enqueues.
pub const DEFAULT_ENQUEUE_WINDOW: Duration = Duration::from_millis(400);

/// Order in which queued connect/disconnect operations are drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainOrder {
    /// Oldest first, in call order
    #[default]
    Fifo,
    /// Newest first
    Lifo,
}

/// Instrumentation thresholds for the connect/disconnect serializer.
///
/// Exceeding a threshold only logs a warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Warn when more than this many handle changes fall in the window
    pub handle_change_threshold: usize,
    /// Handle change window
    #[serde(with = "millis")]
    pub handle_change_window: Duration,
    /// Warn when more than this many enqueues fall in the window
    pub enqueue_threshold: usize,
    /// Enqueue window
    #[serde(with = "millis")]
    pub enqueue_window: Duration,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            handle_change_threshold: DEFAULT_HANDLE_CHANGE_THRESHOLD,
            handle_change_window: DEFAULT_HANDLE_CHANGE_WINDOW,
            enqueue_threshold: DEFAULT_ENQUEUE_THRESHOLD,
            enqueue_window: DEFAULT_ENQUEUE_WINDOW,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time an agent has to join and become ready after the room starts
    /// connecting
    #[serde(with = "millis")]
    pub agent_connect_timeout: Duration,
    /// Drain order of queued connect/disconnect calls
    pub drain_order: DrainOrder,
    /// Serializer instrumentation
    pub serializer: SerializerConfig,
    /// Pre-warm the transport when the session is created
    pub prepare_connection: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agent_connect_timeout: DEFAULT_AGENT_CONNECT_TIMEOUT,
            drain_order: DrainOrder::default(),
            serializer: SerializerConfig::default(),
            prepare_connection: true,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
