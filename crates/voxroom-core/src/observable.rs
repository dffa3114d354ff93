//! Latest-value bridge from a push source.
//!
//! [`ObservableState`] holds a value that is replaced synchronously every
//! time its bound [`EventSource`] pushes. It keeps no history: several pushes
//! between two reads collapse into the last one.
//!
//! At most one source subscription is active per instance. Rebinding (to a
//! new source or to `None`) drops the previous subscription before the new
//! one is registered, and dropping the state unsubscribes.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::notify::{EventSource, Notifier, Subscription};

/// Latest value observed from a push source.
pub struct ObservableState<T> {
    latest: Arc<Mutex<T>>,
    changes: Notifier<T>,
    subscription: Mutex<Option<Subscription>>,
}

impl<T> ObservableState<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Unbound state holding `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            latest: Arc::new(Mutex::new(initial)),
            changes: Notifier::new(),
            subscription: Mutex::new(None),
        }
    }

    /// State holding `initial`, bound to `source` if present.
    pub fn with_source(initial: T, source: Option<&dyn EventSource<T>>) -> Self {
        let state = Self::new(initial);
        state.bind(source);
        state
    }

    /// Replace the bound source.
    ///
    /// The current value is kept until the new source pushes.
    pub fn bind(&self, source: Option<&dyn EventSource<T>>) {
        // Take the old guard out first so it unsubscribes outside the lock.
        let previous = self.subscription.lock().take();
        drop(previous);

        let Some(source) = source else {
            return;
        };

        let latest = Arc::clone(&self.latest);
        let changes = self.changes.clone();
        let subscription = source.subscribe_boxed(Box::new(move |value: &T| {
            *latest.lock() = value.clone();
            changes.emit(value);
        }));
        *self.subscription.lock() = Some(subscription);
    }

    /// Bind to whatever `supplier` yields; `None` unbinds.
    pub fn bind_with<'a, F>(&self, supplier: F)
    where
        F: FnOnce() -> Option<&'a dyn EventSource<T>>,
    {
        self.bind(supplier());
    }

    /// Whether a source is currently bound.
    pub fn is_bound(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Clone of the latest value.
    pub fn get(&self) -> T {
        self.latest.lock().clone()
    }

    /// Store `value` as if the source had pushed it.
    ///
    /// Used to seed the current value when (re)binding to a source that only
    /// pushes on change.
    pub fn set(&self, value: T) {
        *self.latest.lock() = value.clone();
        self.changes.emit(&value);
    }

    /// Observe every update after it has been stored.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.changes.subscribe(callback)
    }
}
