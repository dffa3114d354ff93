//! Environment abstraction for deterministic testing.
//!
//! Decouples orchestration logic from wall-clock time. Production code uses a
//! tokio-backed environment; tests use a paused tokio clock so timers fire in
//! a reproducible order.

use std::{
    fmt::Debug,
    future::Future,
    ops::{Add, Sub},
    time::Duration,
};

/// Abstract environment providing time and async sleeping.
///
/// Implementations MUST guarantee that `now()` never goes backwards.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `tokio::time::Instant`, which honours a
    /// paused test clock. Pure unit tests may use `std::time::Instant`.
    type Instant: Copy
        + Ord
        + Debug
        + Send
        + Sync
        + Sub<Output = Duration>
        + Add<Duration, Output = Self::Instant>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code sleeps. State machines take `now` as a parameter.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}
