//! `DispatchReceiver`: the `CommitWriter` callers obtain from
//! `OutboxConnection::commit_writer` to enqueue `Dispatch`es atomically
//! with their own transaction.
//!
//! Buffers writes in memory; `commit` stores them, commits the
//! transaction, then pushes every buffered dispatch onto the output
//! channel. The transaction itself is exposed separately as an explicit
//! typed capability ([`TxHandle`]) so the surrounding handler can reuse
//! it for its own SQL work, rather than stashing it behind a side
//! channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use mq_contracts::{CommitWriter as CommitWriterTrait, Context, Dispatch, MessagingError, Writer as WriterTrait};

use crate::pool::OutboxTx;
use crate::store::MessageStore;

/// Shared, typed access to the transaction backing an in-flight
/// `DispatchReceiver`, handed to the surrounding handler factory so its
/// own SQL work can execute against the exact same transaction.
///
/// Empty once `commit`/`rollback` has consumed the transaction.
#[derive(Clone)]
pub struct TxHandle(Arc<Mutex<Option<OutboxTx>>>);

impl TxHandle {
    /// Exclusive access to the underlying transaction, if it hasn't
    /// already been committed or rolled back. Callers match on the
    /// concrete `OutboxTx` variant for their backend to run their own
    /// queries against `&mut **tx`.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Option<OutboxTx>> {
        self.0.lock().await
    }
}

/// Buffers `Dispatch`es in memory until `commit`, then persists them via
/// `MessageStore::store`, commits the transaction, and pushes each
/// dispatch onto the shared `output` channel — the single rendezvous
/// point the `DispatchProcessor` drains.
pub struct DispatchReceiver {
    ctx: Context,
    tx: TxHandle,
    store: Arc<dyn MessageStore>,
    output: mpsc::Sender<Dispatch>,
    buffer: Vec<Dispatch>,
}

impl DispatchReceiver {
    pub(crate) fn new(
        ctx: Context,
        tx: OutboxTx,
        store: Arc<dyn MessageStore>,
        output: mpsc::Sender<Dispatch>,
    ) -> (Self, TxHandle) {
        let handle = TxHandle(Arc::new(Mutex::new(Some(tx))));
        (
            Self { ctx, tx: handle.clone(), store, output, buffer: Vec::new() },
            handle,
        )
    }
}

#[async_trait]
impl WriterTrait for DispatchReceiver {
    async fn write(&mut self, ctx: &Context, dispatches: &[Dispatch]) -> Result<usize, MessagingError> {
        if ctx.is_done() {
            return Err(MessagingError::Cancelled);
        }
        self.buffer.extend_from_slice(dispatches);
        Ok(dispatches.len())
    }

    async fn close(&self) -> Result<(), MessagingError> {
        Ok(())
    }
}

#[async_trait]
impl CommitWriterTrait for DispatchReceiver {
    async fn commit(&mut self) -> Result<(), MessagingError> {
        let mut guard = self.tx.lock().await;
        let mut tx = guard.take().ok_or(MessagingError::Broker("transaction already consumed".into()))?;

        if let Err(e) = self.store.store(&mut tx, &mut self.buffer).await {
            drop(tx);
            return Err(e.into());
        }
        tx.commit().await.map_err(Into::<crate::error::OutboxError>::into)?;
        drop(guard);

        for dispatch in self.buffer.drain(..) {
            tokio::select! {
                result = self.output.send(dispatch) => {
                    result.map_err(|_| MessagingError::Broker("outbox output channel closed".into()))?;
                }
                _ = self.ctx.done() => return Err(MessagingError::Cancelled),
            }
        }

        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), MessagingError> {
        let mut guard = self.tx.lock().await;
        if let Some(tx) = guard.take() {
            tx.rollback().await.map_err(Into::<crate::error::OutboxError>::into)?;
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use mq_contracts::background;

    use crate::pool::{IsolationLevel, OutboxPool};
    use crate::store::SqlMessageStore;

    async fn memory_pool() -> OutboxPool {
        let pool = OutboxPool::connect("sqlite", "sqlite::memory:").await.unwrap();
        pool.ensure_schema().await.unwrap();
        pool
    }

    fn dispatch(message_type: &str) -> Dispatch {
        Dispatch { message_type: message_type.to_string(), payload: b"x".to_vec(), ..Default::default() }
    }

    #[tokio::test]
    async fn commit_stores_and_forwards_each_buffered_dispatch() {
        let pool = memory_pool().await;
        let store: Arc<dyn MessageStore> = Arc::new(SqlMessageStore::new(pool.clone()));
        let (ctx, _canceller) = background();
        let tx = pool.begin(IsolationLevel::default()).await.unwrap();
        let (output_tx, mut output_rx) = mpsc::channel(8);

        let (mut receiver, _handle) = DispatchReceiver::new(ctx.clone(), tx, store, output_tx);
        receiver.write(&ctx, &[dispatch("a"), dispatch("b")]).await.unwrap();
        receiver.commit().await.unwrap();

        let first = output_rx.recv().await.unwrap();
        let second = output_rx.recv().await.unwrap();
        assert_eq!(first.message_type, "a");
        assert_eq!(second.message_type, "b");
    }

    #[tokio::test]
    async fn rollback_discards_buffered_writes() {
        let pool = memory_pool().await;
        let store: Arc<dyn MessageStore> = Arc::new(SqlMessageStore::new(pool.clone()));
        let (ctx, _canceller) = background();
        let tx = pool.begin(IsolationLevel::default()).await.unwrap();
        let (output_tx, mut output_rx) = mpsc::channel(8);

        let (mut receiver, _handle) = DispatchReceiver::new(ctx.clone(), tx, store.clone(), output_tx);
        receiver.write(&ctx, &[dispatch("a")]).await.unwrap();
        receiver.rollback().await.unwrap();

        assert!(output_rx.try_recv().is_err());
        assert!(store.load(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_fails_if_transaction_already_consumed() {
        let pool = memory_pool().await;
        let store: Arc<dyn MessageStore> = Arc::new(SqlMessageStore::new(pool.clone()));
        let (ctx, _canceller) = background();
        let tx = pool.begin(IsolationLevel::default()).await.unwrap();
        let (output_tx, _output_rx) = mpsc::channel(8);

        let (mut receiver, handle) = DispatchReceiver::new(ctx.clone(), tx, store, output_tx);
        handle.lock().await.take();

        let result = receiver.commit().await;
        assert!(result.is_err());
    }
}
