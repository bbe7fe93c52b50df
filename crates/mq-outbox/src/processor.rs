//! `DispatchProcessor`: the background forwarder that drains the shared
//! `output` channel and a startup replay of unconfirmed rows, publishes
//! via the real broker's `Writer`, then marks rows confirmed.
//!
//! Two cooperating loops: a replay loop that walks unconfirmed rows from
//! storage once at startup, and a forward loop that fills its buffer
//! from the channel, publishes it, and confirms it — guarded by a
//! `sent` flag so a confirm failure alone never re-publishes.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use mq_contracts::{Canceller, Context, Dispatch, Monitor, NoopMonitor};

use crate::sender::DispatchSender;
use crate::store::MessageStore;

/// Background forwarder owning the single consumer end of the outbox's
/// `output` channel — the single-consumer invariant is load-bearing for
/// confirmation ordering and must not be relaxed. `DispatchProcessor::new`
/// also returns a `Canceller` — that is this processor's `close`:
/// cancelling it unblocks both the replay and forward loops inside
/// `listen`.
pub struct DispatchProcessor {
    ctx: Context,
    output_tx: mpsc::Sender<Dispatch>,
    output_rx: mpsc::Receiver<Dispatch>,
    store: Arc<dyn MessageStore>,
    sender: DispatchSender,
    retry_wait: std::time::Duration,
    monitor: Arc<dyn Monitor>,
}

impl DispatchProcessor {
    /// `output_tx` is a clone of the same `Sender` handed to every
    /// `OutboxConnection` (so replayed rows flow through the same
    /// pipeline as freshly committed ones); `output_rx` must be the
    /// channel's sole receiver.
    pub fn new(
        output_tx: mpsc::Sender<Dispatch>,
        output_rx: mpsc::Receiver<Dispatch>,
        store: Arc<dyn MessageStore>,
        sender: DispatchSender,
        retry_wait: std::time::Duration,
    ) -> (Self, Canceller) {
        let (ctx, canceller) = mq_contracts::background();
        (
            Self {
                ctx,
                output_tx,
                output_rx,
                store,
                sender,
                retry_wait,
                monitor: Arc::new(NoopMonitor),
            },
            canceller,
        )
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Run the replay and forward loops to completion. Returns once
    /// `close` cancels this processor's context; both loops exit and the
    /// output channel and sender are closed.
    pub async fn listen(mut self) {
        let mut latest_id = 0u64;

        let replay_ctx = self.ctx.clone();
        let replay_store = self.store.clone();
        let replay_tx = self.output_tx.clone();
        let retry_wait = self.retry_wait;
        let replay_monitor = self.monitor.clone();

        let replay = tokio::spawn(async move {
            loop {
                if replay_ctx.is_done() {
                    return;
                }

                match replay_store.load(latest_id).await {
                    Ok(dispatches) => {
                        let done = dispatches.is_empty();
                        for dispatch in dispatches {
                            latest_id = dispatch.message_id;
                            if replay_tx.send(dispatch).await.is_err() {
                                return;
                            }
                        }
                        if done {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "unable to load persisted messages from durable storage during replay");
                        replay_monitor.connection_opened(Some(&e.to_string()));
                        tokio::select! {
                            _ = tokio::time::sleep(retry_wait) => {}
                            _ = replay_ctx.done() => return,
                        }
                    }
                }
            }
        });

        self.forward_loop().await;

        let _ = replay.await;
        self.sender.shutdown().await;
    }

    async fn forward_loop(&mut self) {
        let mut buffer: Vec<Dispatch> = Vec::new();
        let mut sent = false;

        loop {
            if buffer.is_empty() {
                match self.fill_empty_buffer().await {
                    Some(filled) => buffer = filled,
                    None => return, // context cancelled
                }
            }

            if !sent {
                if let Err(e) = self.sender.write(&self.ctx, &buffer).await {
                    warn!(error = %e, "unable to publish buffered dispatches to broker");
                    if self.sleep_or_exit().await {
                        return;
                    }
                    continue;
                }
                self.monitor.message_published(buffer.len());
                sent = true;
            }

            if let Err(e) = self.store.confirm(&buffer).await {
                warn!(error = %e, "unable to mark messages as dispatched in durable storage");
                if self.sleep_or_exit().await {
                    return;
                }
                continue;
            }

            self.monitor.message_confirmed(buffer.len());
            buffer.clear();
            sent = false;
        }
    }

    /// Block for one dispatch, then drain whatever else is immediately
    /// queued without blocking again — mirrors `fillEmptyBuffer`'s single
    /// snapshot-and-drain.
    async fn fill_empty_buffer(&mut self) -> Option<Vec<Dispatch>> {
        tokio::select! {
            dispatch = self.output_rx.recv() => {
                let dispatch = dispatch?;
                let mut buffer = vec![dispatch];
                while let Ok(extra) = self.output_rx.try_recv() {
                    buffer.push(extra);
                }
                Some(buffer)
            }
            _ = self.ctx.done() => None,
        }
    }

    /// Sleep `retry_wait` or exit early if cancelled; returns `true` if
    /// the caller should stop (cancelled).
    async fn sleep_or_exit(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.retry_wait) => false,
            _ = self.ctx.done() => true,
        }
    }
}
