//! Agent arrival and readiness deadline.
//!
//! [`AgentTimeoutTracker`] detects two failure modes within one deadline:
//! no agent participant ever appears, or one appears but never becomes ready.
//! It is a pure state machine. The caller owns the actual timer: `start`
//! returns a [`TimerArm`] describing when to call [`AgentTimeoutTracker::fire`].
//!
//! The tracked agent state and participant flag are passive inputs updated on
//! every agent recompute. They are read when the timer fires, not when it is
//! armed.
//!
//! # Timer Discipline
//!
//! Only one timer is armed at a time. Every `start` invalidates the previous
//! arm by bumping its id; a stale `fire` (same deadline, old id) is ignored.

use std::{ops::Add, time::Duration};

use crate::state::{AgentState, FailureKind, FailureReason};

/// Default time an agent has to join and become ready.
pub const DEFAULT_AGENT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// An armed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerArm<I> {
    /// Identifies this arm. Pass it back to [`AgentTimeoutTracker::fire`].
    pub id: u64,
    /// Instant at which the deadline expires
    pub deadline: I,
    /// Time from arming to expiry
    pub duration: Duration,
}

/// Restartable deadline tracker for agent readiness.
#[derive(Debug, Clone)]
pub struct AgentTimeoutTracker<I> {
    default_duration: Duration,
    armed: Option<TimerArm<I>>,
    next_arm_id: u64,
    tracked_state: AgentState,
    participant_exists: bool,
    failure_reason: Option<FailureReason>,
}

impl<I> AgentTimeoutTracker<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Tracker using `default_duration` when `start` is given no deadline.
    pub fn new(default_duration: Duration) -> Self {
        Self {
            default_duration,
            armed: None,
            next_arm_id: 1,
            tracked_state: AgentState::Connecting,
            participant_exists: false,
            failure_reason: None,
        }
    }

    /// Cancel any armed deadline, clear the failure reason, and arm a new
    /// deadline `duration` (or the default) from `now`.
    ///
    /// Tracked inputs reset to their initial values; the next agent recompute
    /// refreshes them.
    pub fn start(&mut self, now: I, duration: Option<Duration>) -> TimerArm<I> {
        let duration = duration.unwrap_or(self.default_duration);
        let arm = TimerArm { id: self.next_arm_id, deadline: now + duration, duration };
        self.next_arm_id += 1;

        self.armed = Some(arm);
        self.failure_reason = None;
        self.tracked_state = AgentState::Connecting;
        self.participant_exists = false;

        tracing::debug!(arm_id = arm.id, ?duration, "agent timeout armed");
        arm
    }

    /// Disarm, clear the failure reason, and reset tracked inputs.
    pub fn clear(&mut self) {
        if let Some(arm) = self.armed.take() {
            tracing::debug!(arm_id = arm.id, "agent timeout cleared");
        }
        self.failure_reason = None;
        self.tracked_state = AgentState::Connecting;
        self.participant_exists = false;
    }

    /// Clear only the failure reason. An armed deadline stays armed.
    pub fn clear_failure_reason(&mut self) {
        self.failure_reason = None;
    }

    /// Record the latest derived agent state.
    pub fn update_tracked_state(&mut self, state: AgentState) {
        self.tracked_state = state;
    }

    /// Record whether an agent participant is present.
    pub fn update_participant_exists(&mut self, exists: bool) {
        self.participant_exists = exists;
    }

    /// Evaluate the deadline for arm `arm_id` at `now`.
    ///
    /// Returns the failure recorded by this call, if any. Does nothing if
    /// `arm_id` is stale or the deadline has not passed. Once evaluated the
    /// arm is consumed whether or not it produced a failure.
    pub fn fire(&mut self, now: I, arm_id: u64) -> Option<FailureReason> {
        let arm = self.armed?;
        if arm.id != arm_id || now < arm.deadline {
            return None;
        }
        self.armed = None;

        let kind = if !self.participant_exists {
            FailureKind::TimeoutNoAgent
        } else if !self.tracked_state.is_connected() {
            FailureKind::TimeoutNotReady
        } else {
            tracing::debug!(arm_id, state = %self.tracked_state, "agent ready before deadline");
            return None;
        };

        let reason = FailureReason::new(kind);
        tracing::warn!(arm_id, reason = %reason, "agent timeout expired");
        self.failure_reason = Some(reason.clone());
        Some(reason)
    }

    /// Whether a deadline is armed.
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Outstanding timeout failure.
    pub fn failure_reason(&self) -> Option<&FailureReason> {
        self.failure_reason.as_ref()
    }

    /// Last agent state recorded with [`Self::update_tracked_state`].
    pub fn tracked_state(&self) -> AgentState {
        self.tracked_state
    }

    /// Last flag recorded with [`Self::update_participant_exists`].
    pub fn participant_exists(&self) -> bool {
        self.participant_exists
    }
}

impl<I> Default for AgentTimeoutTracker<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_CONNECT_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn no_agent_before_deadline() {
        let t0 = Instant::now();
        let mut tracker = AgentTimeoutTracker::default();
        let arm = tracker.start(t0, None);
        assert_eq!(arm.duration, DEFAULT_AGENT_CONNECT_TIMEOUT);

        assert!(tracker.fire(t0 + ms(19_999), arm.id).is_none());
        assert!(tracker.is_armed());

        let reason = tracker.fire(t0 + ms(20_000), arm.id);
        assert_eq!(reason.map(|r| r.kind), Some(FailureKind::TimeoutNoAgent));
        assert_eq!(
            tracker.failure_reason().map(|r| r.message.as_str()),
            Some("Agent did not join the room.")
        );
        assert!(!tracker.is_armed());
    }

    #[test]
    fn agent_present_but_not_ready() {
        let t0 = Instant::now();
        let mut tracker = AgentTimeoutTracker::default();
        let arm = tracker.start(t0, Some(ms(100)));

        tracker.update_participant_exists(true);
        tracker.update_tracked_state(AgentState::Initializing);

        let reason = tracker.fire(t0 + ms(100), arm.id);
        assert_eq!(reason.map(|r| r.kind), Some(FailureKind::TimeoutNotReady));
    }

    #[test]
    fn healthy_agent_expires_without_effect() {
        let t0 = Instant::now();
        let mut tracker = AgentTimeoutTracker::default();
        let arm = tracker.start(t0, Some(ms(100)));

        // Inputs are read at fire time, not arm time.
        tracker.update_participant_exists(true); // t = 50ms
        tracker.update_tracked_state(AgentState::Listening); // t = 80ms

        assert!(tracker.fire(t0 + ms(100), arm.id).is_none());
        assert!(tracker.failure_reason().is_none());
        assert!(!tracker.is_armed());
    }

    #[test]
    fn restart_invalidates_previous_arm() {
        let t0 = Instant::now();
        let mut tracker = AgentTimeoutTracker::default();
        let first = tracker.start(t0, Some(ms(100)));
        let second = tracker.start(t0 + ms(50), Some(ms(100)));
        assert_ne!(first.id, second.id);

        assert!(tracker.fire(t0 + ms(120), first.id).is_none());
        assert!(tracker.failure_reason().is_none());

        assert!(tracker.fire(t0 + ms(150), second.id).is_some());
    }

    #[test]
    fn start_clears_previous_failure() {
        let t0 = Instant::now();
        let mut tracker = AgentTimeoutTracker::default();
        let arm = tracker.start(t0, Some(ms(10)));
        assert!(tracker.fire(t0 + ms(10), arm.id).is_some());

        tracker.start(t0 + ms(20), Some(ms(10)));
        assert!(tracker.failure_reason().is_none());
    }

    #[test]
    fn clear_failure_reason_keeps_timer_armed() {
        let t0 = Instant::now();
        let mut tracker = AgentTimeoutTracker::default();
        let first = tracker.start(t0, Some(ms(10)));
        assert!(tracker.fire(t0 + ms(10), first.id).is_some());

        let second = tracker.start(t0 + ms(20), Some(ms(10)));
        tracker.update_participant_exists(true);
        tracker.clear_failure_reason();
        assert!(tracker.is_armed());
        assert!(tracker.fire(t0 + ms(30), second.id).is_some());
    }

    #[test]
    fn clear_resets_everything() {
        let t0 = Instant::now();
        let mut tracker = AgentTimeoutTracker::default();
        let arm = tracker.start(t0, Some(ms(10)));
        tracker.update_participant_exists(true);
        tracker.update_tracked_state(AgentState::Speaking);

        tracker.clear();
        assert!(!tracker.is_armed());
        assert!(!tracker.participant_exists());
        assert_eq!(tracker.tracked_state(), AgentState::Connecting);
        assert!(tracker.fire(t0 + ms(10), arm.id).is_none());
    }
}
