//! Explicit listener registry.
//!
//! [`Notifier`] is the one broadcast primitive used for internal
//! notifications (state changed, camera changed, message received, room
//! events). Listeners are plain callbacks invoked synchronously by
//! [`Notifier::emit`]; a [`Subscription`] guard removes its listener when it
//! is dropped, so an abandoned wait can never leave a listener behind.
//!
//! # Re-entrancy
//!
//! `emit` snapshots the listener list and releases the registry lock before
//! invoking anything. Callbacks may therefore subscribe, unsubscribe or emit
//! on the same notifier. A listener removed during an emit may still receive
//! that one emit.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    listeners: Vec<(u64, Callback<T>)>,
}

/// A push source that can be subscribed to.
///
/// Object-safe so bridges can accept any source as `&dyn EventSource<T>`.
pub trait EventSource<T>: Send + Sync {
    /// Register `callback`; it is invoked for every value pushed until the
    /// returned [`Subscription`] is dropped.
    fn subscribe_boxed(&self, callback: Box<dyn Fn(&T) + Send + Sync>) -> Subscription;
}

/// Synchronous broadcast registry.
///
/// Cloning produces another handle to the same registry.
pub struct Notifier<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Notifier<T> {
    fn clone(&self) -> Self {
        Self { registry: Arc::clone(&self.registry) }
    }
}

impl<T: 'static> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.registry.lock().listeners.len())
            .finish()
    }
}

impl<T: 'static> Notifier<T> {
    /// Create a registry with no listeners.
    pub fn new() -> Self {
        Self { registry: Arc::new(Mutex::new(Registry { next_id: 0, listeners: Vec::new() })) }
    }

    /// Register a listener.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.push((id, Arc::new(callback)));
            id
        };

        let registry: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().listeners.retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    /// Invoke every listener registered at the time of the call, in
    /// registration order.
    pub fn emit(&self, value: &T) {
        let callbacks: Vec<Callback<T>> =
            self.registry.lock().listeners.iter().map(|(_, cb)| Arc::clone(cb)).collect();

        for callback in callbacks {
            callback(value);
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }
}

impl<T: 'static> EventSource<T> for Notifier<T> {
    fn subscribe_boxed(&self, callback: Box<dyn Fn(&T) + Send + Sync>) -> Subscription {
        self.subscribe(move |value| callback(value))
    }
}

/// Guard for a registered listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Guard that runs `unsubscribe` exactly once when dropped.
    pub fn new<F>(unsubscribe: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self { unsubscribe: Some(Box::new(unsubscribe)) }
    }

    /// Unsubscribe now.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("active", &self.unsubscribe.is_some()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn listeners_receive_values_in_registration_order() {
        let notifier = Notifier::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = {
            let seen = Arc::clone(&seen);
            notifier.subscribe(move |v| seen.lock().push(("first", *v)))
        };
        let s2 = {
            let seen = Arc::clone(&seen);
            notifier.subscribe(move |v| seen.lock().push(("second", *v)))
        };

        notifier.emit(&7);
        assert_eq!(*seen.lock(), vec![("first", 7), ("second", 7)]);
        drop((s1, s2));
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let notifier = Notifier::<()>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let sub = {
            let calls = Arc::clone(&calls);
            notifier.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(notifier.listener_count(), 1);

        notifier.emit(&());
        sub.cancel();
        notifier.emit(&());

        assert_eq!(notifier.listener_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_may_emit_reentrantly() {
        let notifier = Notifier::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        let _sub = {
            let inner = notifier.clone();
            let total = Arc::clone(&total);
            notifier.subscribe(move |v| {
                total.fetch_add(*v as usize, Ordering::SeqCst);
                if *v > 0 {
                    inner.emit(&(v - 1));
                }
            })
        };

        notifier.emit(&3);
        assert_eq!(total.load(Ordering::SeqCst), 3 + 2 + 1);
    }

    #[test]
    fn subscription_outlives_notifier() {
        let notifier = Notifier::<u8>::new();
        let sub = notifier.subscribe(|_| {});
        drop(notifier);
        drop(sub);
    }
}
