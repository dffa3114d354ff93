//! Timer-driven wrapper around [`AgentTimeoutTracker`].

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{runtime::Handle, task::JoinHandle};
use voxroom_core::{
    AgentState, AgentTimeoutTracker, Environment, FailureReason, Notifier, Subscription, TimerArm,
};

struct Inner<E: Environment> {
    env: E,
    runtime: Option<Handle>,
    tracker: Mutex<AgentTimeoutTracker<E::Instant>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    fired: Notifier<FailureReason>,
}

impl<E: Environment> Drop for Inner<E> {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

/// Agent deadline backed by a single tokio timer task.
///
/// Restarting aborts the previous timer before arming a new one. The tracker
/// also rejects stale arms, so a timer that wakes after being replaced has no
/// effect.
///
/// The runtime current at construction runs the timer, so `start` may be
/// called from any thread, including transport threads emitting room events.
pub struct AgentTimeout<E: Environment> {
    inner: Arc<Inner<E>>,
}

impl<E: Environment> Clone for AgentTimeout<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Environment> AgentTimeout<E> {
    /// Timeout that uses `default_duration` when started without one.
    pub fn new(env: E, default_duration: Duration) -> Self {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            tracing::debug!("agent timeout created outside a tokio runtime");
        }

        Self {
            inner: Arc::new(Inner {
                env,
                runtime,
                tracker: Mutex::new(AgentTimeoutTracker::new(default_duration)),
                timer: Mutex::new(None),
                fired: Notifier::new(),
            }),
        }
    }

    /// Arm the deadline, replacing any armed one.
    pub fn start(&self, duration: Option<Duration>) {
        let arm = self.inner.tracker.lock().start(self.inner.env.now(), duration);

        let runtime = self.inner.runtime.clone().or_else(|| Handle::try_current().ok());
        let Some(runtime) = runtime else {
            tracing::warn!(arm_id = arm.id, "no tokio runtime, agent timeout will not fire");
            if let Some(previous) = self.inner.timer.lock().take() {
                previous.abort();
            }
            return;
        };

        let weak: Weak<Inner<E>> = Arc::downgrade(&self.inner);
        let env = self.inner.env.clone();
        let task = runtime.spawn(async move {
            let mut wait = arm.duration;
            loop {
                env.sleep(wait).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match Self::fire(&inner, arm) {
                    Some(remaining) => wait = remaining,
                    None => return,
                }
            }
        });

        if let Some(previous) = self.inner.timer.lock().replace(task) {
            previous.abort();
        }
    }

    /// Fire `arm` once its deadline has passed, otherwise return the time
    /// left. An arm taken off the runtime reads a clock the timer may lag.
    fn fire(inner: &Inner<E>, arm: TimerArm<E::Instant>) -> Option<Duration> {
        let now = inner.env.now();
        if now < arm.deadline {
            return Some(arm.deadline - now);
        }

        let reason = inner.tracker.lock().fire(now, arm.id);
        if let Some(reason) = reason {
            inner.fired.emit(&reason);
        }
        None
    }

    /// Disarm and reset.
    pub fn clear(&self) {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }
        self.inner.tracker.lock().clear();
    }

    /// Clear the failure reason, leaving the deadline armed.
    pub fn clear_failure_reason(&self) {
        self.inner.tracker.lock().clear_failure_reason();
    }

    /// Feed the latest derived agent state.
    pub fn update_tracked_state(&self, state: AgentState) {
        self.inner.tracker.lock().update_tracked_state(state);
    }

    /// Feed whether an agent participant is present.
    pub fn update_participant_exists(&self, exists: bool) {
        self.inner.tracker.lock().update_participant_exists(exists);
    }

    /// Outstanding timeout failure.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        self.inner.tracker.lock().failure_reason().cloned()
    }

    /// Whether a deadline is armed.
    pub fn is_armed(&self) -> bool {
        self.inner.tracker.lock().is_armed()
    }

    /// Observe failures recorded when the deadline fires.
    pub fn on_fire<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&FailureReason) + Send + Sync + 'static,
    {
        self.inner.fired.subscribe(callback)
    }
}
