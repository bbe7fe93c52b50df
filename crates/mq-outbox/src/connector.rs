//! `OutboxConnector`/`OutboxConnection`: the broker `Connector`/
//! `Connection` contracts implemented over the `Messages` table.
//!
//! `reader`/`writer` return `OutboxError::Unsupported` rather than
//! silently succeeding — the outbox is write-only from the
//! application's perspective, and core components never swallow errors.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use mq_contracts::{
    CommitWriter, Connection as ConnectionTrait, Connector as ConnectorTrait, Context, Dispatch, MessagingError,
    Reader, Writer,
};

use crate::error::OutboxError;
use crate::pool::{IsolationLevel, OutboxPool};
use crate::receiver::{DispatchReceiver, TxHandle};
use crate::store::MessageStore;

/// Opens `OutboxConnection`s against one SQL pool. Unlike `AmqpConnector`
/// there is no per-connection state to track — every connection shares
/// the same pool and output channel.
pub struct OutboxConnector {
    pool: OutboxPool,
    store: Arc<dyn MessageStore>,
    output: mpsc::Sender<Dispatch>,
    isolation: IsolationLevel,
}

impl OutboxConnector {
    pub fn new(pool: OutboxPool, store: Arc<dyn MessageStore>, output: mpsc::Sender<Dispatch>, isolation: IsolationLevel) -> Self {
        Self { pool, store, output, isolation }
    }
}

#[async_trait]
impl ConnectorTrait for OutboxConnector {
    async fn connect(&self, ctx: &Context) -> Result<Box<dyn ConnectionTrait>, MessagingError> {
        if ctx.is_done() {
            return Err(MessagingError::Cancelled);
        }
        Ok(Box::new(OutboxConnection {
            pool: self.pool.clone(),
            store: self.store.clone(),
            output: self.output.clone(),
            isolation: self.isolation,
        }))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.pool.close().await;
        Ok(())
    }
}

/// One logical outbox connection. `commit_writer` opens a fresh SQL
/// transaction and wraps it in a `DispatchReceiver`; `reader`/`writer`
/// are not meaningful for this connector (the outbox is write-only from
/// the application's perspective).
pub struct OutboxConnection {
    pool: OutboxPool,
    store: Arc<dyn MessageStore>,
    output: mpsc::Sender<Dispatch>,
    isolation: IsolationLevel,
}

impl OutboxConnection {
    /// Open a `CommitWriter` and also return the `TxHandle` capability so
    /// the caller's own transactional work can share the same SQL
    /// transaction before `commit`/`rollback` consumes it.
    pub async fn commit_writer_with_handle(&self, ctx: &Context) -> Result<(DispatchReceiver, TxHandle), OutboxError> {
        let tx = self.pool.begin(self.isolation).await?;
        Ok(DispatchReceiver::new(ctx.clone(), tx, self.store.clone(), self.output.clone()))
    }
}

#[async_trait]
impl ConnectionTrait for OutboxConnection {
    async fn reader(&self, _ctx: &Context) -> Result<Box<dyn Reader>, MessagingError> {
        Err(OutboxError::Unsupported("reader").into())
    }

    async fn writer(&self, _ctx: &Context) -> Result<Box<dyn Writer>, MessagingError> {
        Err(OutboxError::Unsupported("writer").into())
    }

    async fn commit_writer(&self, ctx: &Context) -> Result<Box<dyn CommitWriter>, MessagingError> {
        if ctx.is_done() {
            return Err(MessagingError::Cancelled);
        }
        let (receiver, _handle) = self.commit_writer_with_handle(ctx).await?;
        Ok(Box::new(receiver))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        Ok(())
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use mq_contracts::background;

    async fn memory_pool() -> OutboxPool {
        let pool = OutboxPool::connect("sqlite", "sqlite::memory:").await.unwrap();
        pool.ensure_schema().await.unwrap();
        pool
    }

    #[tokio::test]
    async fn connect_opens_a_fresh_connection_each_time() {
        let pool = memory_pool().await;
        let store: Arc<dyn MessageStore> = Arc::new(crate::store::SqlMessageStore::new(pool.clone()));
        let (output, _rx) = mpsc::channel(8);
        let connector = OutboxConnector::new(pool, store, output, IsolationLevel::default());
        let (ctx, _canceller) = background();

        let a = connector.connect(&ctx).await.unwrap();
        let b = connector.connect(&ctx).await.unwrap();
        assert!(a.commit_writer(&ctx).await.is_ok());
        assert!(b.commit_writer(&ctx).await.is_ok());
    }

    #[tokio::test]
    async fn reader_and_writer_are_unsupported() {
        let pool = memory_pool().await;
        let store: Arc<dyn MessageStore> = Arc::new(crate::store::SqlMessageStore::new(pool.clone()));
        let (output, _rx) = mpsc::channel(8);
        let connector = OutboxConnector::new(pool, store, output, IsolationLevel::default());
        let (ctx, _canceller) = background();
        let conn = connector.connect(&ctx).await.unwrap();

        assert!(conn.reader(&ctx).await.is_err());
        assert!(conn.writer(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn commit_writer_with_handle_exposes_the_live_transaction() {
        let pool = memory_pool().await;
        let store: Arc<dyn MessageStore> = Arc::new(crate::store::SqlMessageStore::new(pool.clone()));
        let (output, _rx) = mpsc::channel(8);
        let connector = OutboxConnector::new(pool, store, output, IsolationLevel::default());
        let (ctx, _canceller) = background();

        let (_receiver, handle) = connector.commit_writer_with_handle(&ctx).await.unwrap();
        assert!(handle.lock().await.is_some());
    }
}
