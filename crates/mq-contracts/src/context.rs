//! Cooperative cancellation and deadlines.
//!
//! The design calls for "a context abstraction (a value carrying a
//! cancellation signal and a deadline)" that every blocking operation
//! accepts and honors. Built from the same primitives the rest of this
//! workspace already leans on for shutdown fan-out — a `broadcast`
//! channel plus an `AtomicBool` flag checked before blocking, the idiom
//! used throughout the background-task supervisors this crate's sibling
//! crates are grounded on — rather than pulling in a cancellation-token
//! crate for a single value type.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

struct Shared {
    done: AtomicBool,
    tx: broadcast::Sender<()>,
}

/// A cancellable, optionally deadlined context passed to every blocking
/// operation in the broker contracts.
#[derive(Clone)]
pub struct Context {
    shared: Arc<Shared>,
    deadline: Option<Instant>,
}

/// The cancelling half of a `Context`, held by whoever owns the lifecycle
/// (a `Manager`, a `Subscriber`) and never handed to operations that only
/// need to observe cancellation.
#[derive(Clone)]
pub struct Canceller {
    shared: Arc<Shared>,
}

/// Create a fresh, uncancelled context and its canceller.
pub fn background() -> (Context, Canceller) {
    let (tx, _rx) = broadcast::channel(1);
    let shared = Arc::new(Shared {
        done: AtomicBool::new(false),
        tx,
    });
    (
        Context {
            shared: shared.clone(),
            deadline: None,
        },
        Canceller { shared },
    )
}

impl Context {
    /// A context that is already cancelled — used where an operation must
    /// observe immediate cancellation without a live canceller (tests,
    /// default values).
    pub fn already_cancelled() -> Context {
        let (ctx, canceller) = background();
        canceller.cancel();
        ctx
    }

    /// Derive a child context sharing this context's cancellation signal
    /// but with its own deadline. Cancelling the parent cancels the
    /// child; the child's deadline does not affect the parent.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        Context {
            shared: self.shared.clone(),
            deadline: Some(deadline),
        }
    }

    /// Derive a child context with a deadline `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    /// True if cancelled or past the deadline.
    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolve once cancelled or once the deadline elapses, whichever is
    /// first. Resolves immediately if already done.
    pub async fn done(&self) {
        if self.is_done() {
            return;
        }

        let mut rx = self.shared.tx.subscribe();

        // Re-check after subscribing: cancel() sets the flag before
        // sending, so a cancellation racing with our subscribe() is
        // guaranteed to be observed either here or via rx.recv().
        if self.shared.done.load(Ordering::SeqCst) {
            return;
        }

        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = rx.recv() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => {
                let _ = rx.recv().await;
            }
        }
    }
}

impl Canceller {
    /// Signal cancellation to every context derived from this canceller.
    pub fn cancel(&self) {
        self.shared.done.store(true, Ordering::SeqCst);
        let _ = self.shared.tx.send(());
    }

    /// Mint another context sharing this canceller's signal.
    pub fn context(&self) -> Context {
        Context {
            shared: self.shared.clone(),
            deadline: None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.done.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn done_resolves_immediately_once_cancelled() {
        let (ctx, canceller) = background();
        assert!(!ctx.is_done());
        canceller.cancel();
        assert!(ctx.is_done());
        ctx.done().await;
    }

    #[tokio::test]
    async fn deadline_expires_independently_of_cancellation() {
        let (ctx, _canceller) = background();
        let child = ctx.with_timeout(Duration::from_millis(10));
        assert!(!child.is_done());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(child.is_done());
        assert!(!ctx.is_done());
    }

    #[tokio::test]
    async fn cancelling_parent_cancels_child() {
        let (ctx, canceller) = background();
        let child = ctx.with_timeout(Duration::from_secs(30));
        canceller.cancel();
        assert!(child.is_done());
    }

    #[tokio::test]
    async fn late_subscriber_still_observes_cancel_race() {
        let (ctx, canceller) = background();
        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.done().await }
        });
        tokio::task::yield_now().await;
        canceller.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("done() should resolve promptly")
            .unwrap();
    }
}
