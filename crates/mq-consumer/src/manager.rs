//! `Manager`: spawns one supervisor loop per configured `Subscription`,
//! each running a `Subscriber` to completion and reconnecting after
//! `reconnect_delay` until the manager is closed.
//!
//! Each supervisor loop builds a fresh `Subscriber`, runs it to
//! completion, sleeps `reconnect_delay`, and repeats until the shared
//! soft context is done — the same `tokio::select!` between recurring
//! work and a shutdown receiver used elsewhere in this runtime,
//! generalized from one periodic background task to N per-subscription
//! supervisor loops.

use std::sync::Arc;

use mq_contracts::{background, Canceller, Connector, Context, Handler, Subscription};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::ConsumerError;
use crate::pool::ConnectionPool;
use crate::subscriber::Subscriber;
use crate::Result;

/// Owns the pool's shared connection and the softContext every spawned
/// subscriber observes. `close` cancels that context and waits for every
/// subscriber loop to wind down.
pub struct Manager {
    pool: Arc<ConnectionPool>,
    ctx: Context,
    canceller: Canceller,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Manager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (ctx, canceller) = background();
        Self { pool: Arc::new(ConnectionPool::new(connector)), ctx, canceller, handles: Mutex::new(Vec::new()) }
    }

    /// Spawn one supervisor loop per `(Subscription, handlers)` pair.
    /// `handlers.len()` must equal the subscription's configured
    /// `handler_count` — one worker per handler.
    pub async fn listen(&self, subscriptions: Vec<(Subscription, Vec<Arc<dyn Handler>>)>) -> Result<()> {
        for (subscription, handlers) in &subscriptions {
            if handlers.is_empty() || handlers.len() != subscription.handler_count {
                return Err(ConsumerError::NoHandlers(subscription.name.clone()));
            }
        }

        let mut handles = self.handles.lock().await;
        for (subscription, handlers) in subscriptions {
            let pool = self.pool.clone();
            let ctx = self.ctx.clone();
            let name = subscription.name.clone();
            let reconnect_delay = subscription.reconnect_delay;

            handles.push(tokio::spawn(async move {
                let subscriber = Subscriber::new(subscription, handlers, pool);
                loop {
                    if ctx.is_done() {
                        break;
                    }
                    subscriber.listen(&ctx).await;
                    if ctx.is_done() {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(reconnect_delay) => {}
                        _ = ctx.done() => break,
                    }
                }
                info!(subscription = %name, "subscriber supervisor loop exited");
            }));
        }
        Ok(())
    }

    /// Cancel the shared context, wait for every subscriber loop to
    /// finish, then close the pool's connection.
    pub async fn close(&self) {
        self.canceller.cancel();
        let handles = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            let _ = handle.await;
        }
        let _ = self.pool.close().await;
    }
}
