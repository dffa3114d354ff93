//! Tokio-backed [`Environment`].

use std::time::Duration;

use voxroom_core::Environment;

/// Environment using the tokio clock.
///
/// `tokio::time::Instant` follows a paused test clock, so timers driven
/// through this environment are deterministic under
/// `#[tokio::test(start_paused = true)]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioEnv;

impl TokioEnv {
    /// Create a new tokio environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for TokioEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
