//! Connect/disconnect serialization.
//!
//! Overlapping connect and disconnect calls on one transport are unsafe: a
//! disconnect issued while a connect is still negotiating can leave the
//! transport half-joined. [`ConnectDisconnectSerializer`] queues every call
//! and drains the queue from a single task, so the transport sees at most one
//! call in flight.
//!
//! # Drain Loop
//!
//! Every enqueue spawns a drain task. Drain tasks serialize on an async
//! mutex held for the whole run, so at most one loop is popping at a time and
//! a task that finds the queue empty exits immediately. Each operation
//! settles its own caller; a failure never stops the loop.
//!
//! # Handle Changes
//!
//! Rebinding the handle clears operations that have not been popped yet.
//! Their callers receive [`SessionError::OperationDropped`]. An operation
//! already in flight completes against the handle it was queued with.
//!
//! # Instrumentation
//!
//! Bursts of handle changes or enqueues are logged, never rejected. Enqueue
//! bursts count only prior enqueues; handle-change bursts include the current
//! change.

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use voxroom_core::{
    DrainOrder, Environment, SerializerConfig, SessionError, TransportError, rate::RateMonitor,
};

use crate::transport::{ConnectArgs, RoomTransport};

/// Queued transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// Join with the given arguments
    Connect(ConnectArgs),
    /// Leave
    Disconnect,
}

impl OperationKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect => "disconnect",
        }
    }
}

struct PendingOperation<T: ?Sized> {
    kind: OperationKind,
    handle: Arc<T>,
    reply: oneshot::Sender<Result<(), SessionError>>,
}

struct QueueState<T: ?Sized, I> {
    handle: Option<Arc<T>>,
    queue: VecDeque<PendingOperation<T>>,
    handle_changes: RateMonitor<I>,
    enqueues: RateMonitor<I>,
}

struct Inner<T: ?Sized, E: Environment> {
    env: E,
    order: DrainOrder,
    state: Mutex<QueueState<T, E::Instant>>,
    drain_lock: tokio::sync::Mutex<()>,
    handle_change_warnings: AtomicUsize,
    enqueue_warnings: AtomicUsize,
}

/// Serializes connect/disconnect calls on one transport handle.
///
/// Cloning produces another handle to the same queue.
pub struct ConnectDisconnectSerializer<T: ?Sized, E: Environment> {
    inner: Arc<Inner<T, E>>,
}

impl<T: ?Sized, E: Environment> Clone for ConnectDisconnectSerializer<T, E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T, E> ConnectDisconnectSerializer<T, E>
where
    T: RoomTransport + ?Sized,
    E: Environment,
{
    /// Serializer bound to `handle`.
    pub fn new(
        env: E,
        handle: Option<Arc<T>>,
        order: DrainOrder,
        config: &SerializerConfig,
    ) -> Self {
        let state = QueueState {
            handle: None,
            queue: VecDeque::new(),
            handle_changes: RateMonitor::new(
                config.handle_change_threshold,
                config.handle_change_window,
            ),
            enqueues: RateMonitor::new(config.enqueue_threshold, config.enqueue_window),
        };

        let serializer = Self {
            inner: Arc::new(Inner {
                env,
                order,
                state: Mutex::new(state),
                drain_lock: tokio::sync::Mutex::new(()),
                handle_change_warnings: AtomicUsize::new(0),
                enqueue_warnings: AtomicUsize::new(0),
            }),
        };
        serializer.set_handle(handle);
        serializer
    }

    /// Rebind to `handle`, dropping operations not yet started.
    ///
    /// Rebinding to the handle already bound is a no-op.
    pub fn set_handle(&self, handle: Option<Arc<T>>) {
        let dropped = {
            let mut state = self.inner.state.lock();
            let unchanged = match (&state.handle, &handle) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return;
            }

            state.handle = handle;
            let now = self.inner.env.now();
            state.handle_changes.record(now);
            if state.handle_changes.exceeded(now) {
                self.inner.handle_change_warnings.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    threshold = state.handle_changes.threshold(),
                    window = ?state.handle_changes.window(),
                    "connection handle changed rapidly, this is not recommended"
                );
            }

            std::mem::take(&mut state.queue)
        };

        if !dropped.is_empty() {
            tracing::debug!(count = dropped.len(), "dropped pending operations on handle change");
        }
        // Dropping the reply senders settles the callers outside the lock.
        drop(dropped);
    }

    /// Whether a handle is bound.
    pub fn has_handle(&self) -> bool {
        self.inner.state.lock().handle.is_some()
    }

    /// Queue a connect and wait for it to run.
    pub async fn connect(&self, args: ConnectArgs) -> Result<(), SessionError> {
        self.submit(OperationKind::Connect(args)).await
    }

    /// Queue a disconnect and wait for it to run.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.submit(OperationKind::Disconnect).await
    }

    /// Operations queued and not yet started.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Times a handle-change burst was detected.
    pub fn handle_change_warnings(&self) -> usize {
        self.inner.handle_change_warnings.load(Ordering::Relaxed)
    }

    /// Times an enqueue burst was detected.
    pub fn enqueue_warnings(&self) -> usize {
        self.inner.enqueue_warnings.load(Ordering::Relaxed)
    }

    async fn submit(&self, kind: OperationKind) -> Result<(), SessionError> {
        let operation = kind.name();
        let reply = self.enqueue(kind)?;

        tokio::spawn(Self::drain(Arc::clone(&self.inner)));

        reply.await.unwrap_or(Err(SessionError::OperationDropped { operation }))
    }

    fn enqueue(
        &self,
        kind: OperationKind,
    ) -> Result<oneshot::Receiver<Result<(), SessionError>>, SessionError> {
        let mut state = self.inner.state.lock();
        let Some(handle) = state.handle.clone() else {
            return Err(SessionError::NoHandle { operation: kind.name() });
        };

        let now = self.inner.env.now();
        if state.enqueues.exceeded(now) {
            self.inner.enqueue_warnings.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                threshold = state.enqueues.threshold(),
                window = ?state.enqueues.window(),
                "connect / disconnect occurring in rapid sequence, \
                 this may be a sign of a caller re-running on every change"
            );
        }
        state.enqueues.record(now);

        let (reply, rx) = oneshot::channel();
        tracing::debug!(operation = kind.name(), queued = state.queue.len() + 1, "enqueued");
        state.queue.push_back(PendingOperation { kind, handle, reply });
        Ok(rx)
    }

    async fn drain(inner: Arc<Inner<T, E>>) {
        let _running = inner.drain_lock.lock().await;

        loop {
            let next = {
                let mut state = inner.state.lock();
                match inner.order {
                    DrainOrder::Fifo => state.queue.pop_front(),
                    DrainOrder::Lifo => state.queue.pop_back(),
                }
            };
            let Some(op) = next else {
                break;
            };

            let result: Result<(), TransportError> = match &op.kind {
                OperationKind::Connect(args) => {
                    op.handle
                        .connect(&args.server_url, &args.participant_token, &args.options)
                        .await
                },
                OperationKind::Disconnect => op.handle.disconnect().await,
            };

            if let Err(e) = &result {
                tracing::debug!(operation = op.kind.name(), error = %e, "operation failed");
            }
            // Caller may have gone away.
            let _ = op.reply.send(result.map_err(SessionError::from));
        }
    }
}
