//! Subscription status: resolve once when a monitored signal makes a transition.
//!
//! A [`SubscriptionStatus`] subscribes to a [`Signal`] immediately, then runs an
//! observer task that evaluates a predicate on every `(old, new)` update. The
//! first time the predicate holds, the observer checks the cancellation token,
//! runs the one-shot side effect, and resolves. It never polls and has no
//! internal timeout; callers that need one wrap [`SubscriptionStatus::wait`] in
//! `tokio::time::timeout`.

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::signal::{Signal, SignalValue};
use crate::error::DaqError;

/// One-shot side effect run when the predicate first holds.
pub type OnDone = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Side effect that does nothing.
pub fn no_side_effect() -> OnDone {
    Box::new(|| async { Ok(()) }.boxed())
}

/// True when `old == from` and `new == to`, comparing as integers.
pub fn is_transition(old: Option<&SignalValue>, new: &SignalValue, from: i64, to: i64) -> bool {
    old.and_then(SignalValue::as_i64) == Some(from) && new.as_i64() == Some(to)
}

/// Pending completion of a signal transition.
pub struct SubscriptionStatus {
    signal: String,
    done_rx: oneshot::Receiver<Result<()>>,
    finished: Arc<AtomicBool>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionStatus {
    /// Subscribe to `signal` and start observing.
    ///
    /// The subscription is taken before this returns, so any update after the
    /// call is seen by the observer.
    pub fn spawn<P>(
        signal: &dyn Signal,
        mut predicate: P,
        on_done: OnDone,
        cancel: CancellationToken,
    ) -> Self
    where
        P: FnMut(Option<&SignalValue>, &SignalValue) -> bool + Send + 'static,
    {
        let mut rx = signal.subscribe();
        let name = signal.name().to_string();
        let (done_tx, done_rx) = oneshot::channel();
        let finished = Arc::new(AtomicBool::new(false));

        let token = cancel.clone();
        let observer_name = name.clone();
        let observer_finished = Arc::clone(&finished);
        let task = tokio::spawn(async move {
            let outcome = async {
                loop {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            return Err(DaqError::Cancelled(observer_name.clone()).into());
                        }
                        update = rx.recv() => match update {
                            Ok(update) => {
                                if predicate(update.old_value.as_ref(), &update.value) {
                                    break;
                                }
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(pv = %observer_name, skipped, "Monitor lagged");
                            }
                            Err(RecvError::Closed) => {
                                return Err(DaqError::SubscriptionClosed(observer_name.clone()).into());
                            }
                        }
                    }
                }

                if token.is_cancelled() {
                    return Err(DaqError::Cancelled(observer_name.clone()).into());
                }
                debug!(pv = %observer_name, "Transition observed");
                on_done().await
            }
            .await;

            if outcome.is_ok() {
                observer_finished.store(true, Ordering::SeqCst);
            }
            // Receiver may have been dropped; the side effect has already run.
            let _ = done_tx.send(outcome);
        });

        Self {
            signal: name,
            done_rx,
            finished,
            cancel,
            task,
        }
    }

    /// Cancel the wait. Has no effect once the side effect has started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token controlling this status
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once the observer has stopped (resolved, failed or cancelled)
    pub fn is_done(&self) -> bool {
        self.task.is_finished()
    }

    /// Flag set when the status resolves successfully
    pub fn finished_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.finished)
    }

    /// Wait for the transition and its side effect.
    pub async fn wait(self) -> Result<()> {
        match self.done_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(DaqError::SubscriptionClosed(self.signal).into()),
        }
    }
}

impl std::fmt::Debug for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionStatus")
            .field("signal", &self.signal)
            .field("done", &self.is_done())
            .finish()
    }
}
