//! `Worker`: moves `Delivery` values from a shared `Stream` through an
//! internal channel to the user `Handler` in bounded batches,
//! acknowledging each batch atomically.
//!
//! A reader task feeds deliveries into a bounded channel; a handler
//! loop drains it in batches (snapshotting the channel length once per
//! iteration so it doesn't spin waiting for more), runs the handler,
//! and acknowledges the batch. The pairing and channel-worker-task
//! structuring follows this runtime's other task-spawning code; the
//! three shutdown strategies below govern how the pair winds down.

use std::sync::Arc;
use std::time::Duration;

use mq_contracts::{Context, Delivery, Handler, ShutdownStrategy, Stream, Subscription};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// One worker: a reader task forwarding deliveries from the shared
/// stream into a bounded channel, and a handler loop batching and
/// acknowledging them. `Stream::read`/`acknowledge` both take `&self`
/// (implementers own whatever interior mutability each needs), so the
/// reader task and the handler loop's acks share the stream through a
/// plain `Arc` — never a lock that could serialize an in-flight read
/// behind an ack, or vice versa.
pub struct Worker {
    batch_capacity: usize,
    buffer_delay: Duration,
    buffer_capacity: usize,
    shutdown_strategy: ShutdownStrategy,
    handler: Arc<dyn Handler>,
    stream: Arc<dyn Stream>,
}

impl Worker {
    pub fn new(subscription: &Subscription, handler: Arc<dyn Handler>, stream: Arc<dyn Stream>) -> Self {
        Self {
            batch_capacity: subscription.batch_capacity,
            buffer_delay: subscription.buffer_delay_between_batches,
            buffer_capacity: subscription.buffer_capacity as usize,
            shutdown_strategy: subscription.shutdown_strategy,
            handler,
            stream,
        }
    }

    /// Run this worker to completion. `soft_ctx` governs the shutdown
    /// strategy's between-batch checks; `hard_ctx` is the absolute
    /// deadline every blocking call honors.
    pub async fn run(self, soft_ctx: Context, hard_ctx: Context) {
        let (tx, mut rx) = mpsc::channel::<Delivery>(self.buffer_capacity.max(1));

        let reader_stream = self.stream.clone();
        let reader_ctx = hard_ctx.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader_stream.read(&reader_ctx).await {
                    Ok(delivery) => {
                        if tx.send(delivery).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "stream read ended; reader loop exiting");
                        break;
                    }
                }
            }
        });

        self.handler_loop(&soft_ctx, &hard_ctx, &mut rx).await;

        // The handler loop may exit (ack failure, shutdown strategy) while
        // the reader is still blocked in Stream::read; abort it rather
        // than waiting on hard_ctx to fire.
        reader_task.abort();
    }

    async fn handler_loop(&self, soft_ctx: &Context, hard_ctx: &Context, rx: &mut mpsc::Receiver<Delivery>) {
        loop {
            if self.shutdown_strategy == ShutdownStrategy::Immediate && soft_ctx.is_done() {
                debug!("immediate shutdown: exiting before next batch, no final flush");
                return;
            }

            let mut batch = Vec::with_capacity(self.batch_capacity);
            match rx.recv().await {
                Some(delivery) => batch.push(delivery),
                None => {
                    debug!("delivery channel closed; stream exhausted, worker exiting");
                    return;
                }
            }

            // Snapshot the buffered length once; draining decrements it
            // rather than re-reading rx.len() each iteration, so a
            // producer racing ahead of us cannot keep this loop spinning.
            let mut remaining = rx.len();
            while batch.len() < self.batch_capacity && remaining > 0 {
                match rx.try_recv() {
                    Ok(delivery) => {
                        batch.push(delivery);
                        remaining -= 1;
                    }
                    Err(_) => break,
                }
            }

            if let Err(e) = self.handler.handle(hard_ctx, &batch).await {
                warn!(error = %e, batch_size = batch.len(), "handler returned an error");
            }

            let ack_result = self.stream.acknowledge(hard_ctx, &batch).await;
            if let Err(e) = ack_result {
                error!(error = %e, "acknowledge failed; remaining deliveries left unacked for broker redelivery");
                return;
            }

            if self.shutdown_strategy == ShutdownStrategy::CurrentBatch && soft_ctx.is_done() {
                debug!("current-batch shutdown: batch acknowledged, exiting before sleep");
                return;
            }

            if rx.is_empty() && !self.buffer_delay.is_zero() {
                tokio::time::sleep(self.buffer_delay).await;
            }
        }
    }
}
