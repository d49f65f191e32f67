//! Cancellation of in-flight work.
//!
//! Completion and cancellation race for a single atomic transition out of
//! `RUNNING`; exactly one of them wins. When cancel wins, the engine is
//! interrupted (if it can be) and the work is still awaited to the end so the
//! session is never handed back mid-statement. Its outcome is discarded.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use super::query::Outcome;
use super::session::Interrupt;

const RUNNING: u8 = 0;
const CANCELED: u8 = 1;
const DONE: u8 = 2;

struct Shared {
    state: AtomicU8,
    notify: Notify,
}

/// Cloneable handle that can cancel one query from any task.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(RUNNING),
                notify: Notify::new(),
            }),
        }
    }

    /// Request cancellation. Returns `true` when this call won the race,
    /// `false` when the work already completed or was already canceled.
    pub fn cancel(&self) -> bool {
        let won = self
            .shared
            .state
            .compare_exchange(RUNNING, CANCELED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.shared.notify.notify_waiters();
        }
        won
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.state.load(Ordering::Acquire) == CANCELED
    }

    /// Claim completion. `false` means cancel got there first.
    fn finish(&self) -> bool {
        self.shared
            .state
            .compare_exchange(RUNNING, DONE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Resolves once `cancel` has won.
    pub async fn canceled(&self) {
        loop {
            let notified = self.shared.notify.notified();
            if self.is_canceled() {
                return;
            }
            notified.await;
        }
    }
}

/// Drive `work` to completion unless `handle` is canceled first.
///
/// On cancel the interrupt fires, then `work` is drained and its output
/// dropped. On completion the result is delivered only if completion claims
/// the race; a cancel landing between the two yields `Canceled`.
pub async fn race<T, F>(
    work: F,
    handle: &CancelHandle,
    interrupt: Option<&dyn Interrupt>,
) -> Outcome<T>
where
    F: Future<Output = T>,
{
    tokio::pin!(work);

    let finished = tokio::select! {
        biased;
        value = &mut work => Some(value),
        _ = handle.canceled() => None,
    };

    match finished {
        Some(value) if handle.finish() => Outcome::Completed(value),
        Some(_) => Outcome::Canceled,
        None => {
            if let Some(interrupt) = interrupt {
                if let Err(e) = interrupt.interrupt().await {
                    warn!(error = %e, "failed to interrupt running statement");
                }
            }
            let _ = work.await;
            debug!("canceled statement drained");
            Outcome::Canceled
        }
    }
}
