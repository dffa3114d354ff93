//! Cancellable condition waits over a [`Notifier`].
//!
//! A wait resolves immediately, without subscribing, when the condition
//! already holds. Otherwise it registers one listener that completes a
//! oneshot on the first qualifying value. The listener is owned by the wait
//! future, so cancellation, completion and dropping the future all
//! unsubscribe.

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use voxroom_core::{Notifier, SessionError};

/// Wait until `check` accepts a value pushed by `notifier`.
///
/// `current` evaluates the condition against present state. It runs once
/// before subscribing and once more after, so a change that lands between the
/// two is not missed.
///
/// A token that is already cancelled rejects unless the condition already
/// holds.
pub(crate) async fn wait_for<T, R, C, F>(
    notifier: &Notifier<T>,
    current: C,
    check: F,
    cancel: Option<&CancellationToken>,
    operation: &'static str,
) -> Result<R, SessionError>
where
    T: 'static,
    R: Send + 'static,
    C: Fn() -> Option<R>,
    F: Fn(&T) -> Option<R> + Send + Sync + 'static,
{
    if let Some(ready) = current() {
        return Ok(ready);
    }
    if cancel.is_some_and(CancellationToken::is_cancelled) {
        return Err(SessionError::Cancelled { operation });
    }

    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let _subscription = notifier.subscribe(move |value| {
        if let Some(result) = check(value) {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(result);
            }
        }
    });

    if let Some(ready) = current() {
        return Ok(ready);
    }

    let dropped = |_: oneshot::error::RecvError| SessionError::OperationDropped { operation };
    match cancel {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!(operation, "wait cancelled");
                Err(SessionError::Cancelled { operation })
            },
            result = rx => result.map_err(dropped),
        },
        None => rx.await.map_err(dropped),
    }
}
