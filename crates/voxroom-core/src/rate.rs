//! Rolling-window call counter.
//!
//! Used by the connect/disconnect serializer to flag pathological call
//! patterns (a connection handle that changes every render, connect and
//! disconnect issued in a tight loop). Purely observational: exceeding a
//! threshold never changes behavior.

use std::{collections::VecDeque, ops::Sub, time::Duration};

/// Counts events inside a sliding time window.
#[derive(Debug, Clone)]
pub struct RateMonitor<I> {
    threshold: usize,
    window: Duration,
    times: VecDeque<I>,
}

impl<I> RateMonitor<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Monitor that trips when more than `threshold` events fall inside
    /// `window`.
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self { threshold, window, times: VecDeque::new() }
    }

    /// Configured threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Configured window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Forget events older than the window and return how many remain.
    pub fn count_recent(&mut self, now: I) -> usize {
        let window = self.window;
        self.times.retain(|&t| t <= now && now - t < window);
        self.times.len()
    }

    /// Record an event at `now`.
    pub fn record(&mut self, now: I) {
        self.times.push_back(now);
    }

    /// Whether the events currently inside the window exceed the threshold.
    pub fn exceeded(&mut self, now: I) -> bool {
        self.count_recent(now) > self.threshold
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn trips_only_above_threshold() {
        let t0 = Instant::now();
        let mut monitor = RateMonitor::new(2, Duration::from_millis(400));

        monitor.record(t0);
        monitor.record(t0 + Duration::from_millis(100));
        assert!(!monitor.exceeded(t0 + Duration::from_millis(150)));

        monitor.record(t0 + Duration::from_millis(200));
        assert!(monitor.exceeded(t0 + Duration::from_millis(250)));
    }

    #[test]
    fn old_events_leave_the_window() {
        let t0 = Instant::now();
        let mut monitor = RateMonitor::new(1, Duration::from_millis(1000));

        monitor.record(t0);
        monitor.record(t0 + Duration::from_millis(10));
        assert!(monitor.exceeded(t0 + Duration::from_millis(20)));

        // Exactly one window later the first event no longer counts.
        assert_eq!(monitor.count_recent(t0 + Duration::from_millis(1000)), 1);
        assert!(!monitor.exceeded(t0 + Duration::from_millis(1000)));
    }
}
