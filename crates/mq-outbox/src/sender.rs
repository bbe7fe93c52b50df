//! `DispatchSender`: a reconnecting `Writer` over the real broker,
//! lazily opening a `CommitWriter` and closing both handles on any
//! failure so the next `write` starts clean.

use async_trait::async_trait;

use mq_contracts::{CommitWriter, Connection, Connector, Context, Dispatch, MessagingError, Writer as WriterTrait};

/// Publishes confirmed outbox dispatches to the real broker, dialing a
/// `Connector` lazily and re-dialing after any publish or commit
/// failure.
pub struct DispatchSender {
    connector: std::sync::Arc<dyn Connector>,
    connection: Option<Box<dyn Connection>>,
    writer: Option<Box<dyn CommitWriter>>,
}

impl DispatchSender {
    pub fn new(connector: std::sync::Arc<dyn Connector>) -> Self {
        Self { connector, connection: None, writer: None }
    }

    async fn ensure_writer(&mut self, ctx: &Context) -> Result<(), MessagingError> {
        if self.writer.is_some() {
            return Ok(());
        }
        let connection = self.connector.connect(ctx).await?;
        let writer = connection.commit_writer(ctx).await?;
        self.connection = Some(connection);
        self.writer = Some(writer);
        Ok(())
    }

    async fn close_handles(&mut self) {
        if let Some(writer) = self.writer.take() {
            let _ = writer.close().await;
        }
        if let Some(connection) = self.connection.take() {
            let _ = connection.close().await;
        }
    }
}

#[async_trait]
impl WriterTrait for DispatchSender {
    async fn write(&mut self, ctx: &Context, dispatches: &[Dispatch]) -> Result<usize, MessagingError> {
        if dispatches.is_empty() {
            return Ok(0);
        }
        if ctx.is_done() {
            return Err(MessagingError::Cancelled);
        }

        match self.write_inner(ctx, dispatches).await {
            Ok(count) => Ok(count),
            Err(e) => {
                self.close_handles().await;
                Err(e)
            }
        }
    }

    async fn close(&self) -> Result<(), MessagingError> {
        Ok(())
    }
}

impl DispatchSender {
    async fn write_inner(&mut self, ctx: &Context, dispatches: &[Dispatch]) -> Result<usize, MessagingError> {
        self.ensure_writer(ctx).await?;
        let writer = self.writer.as_mut().expect("ensure_writer just populated it");
        writer.write(ctx, dispatches).await?;
        writer.commit().await?;
        Ok(dispatches.len())
    }

    /// Close any open handles; called by `DispatchProcessor::listen` on
    /// shutdown.
    pub async fn shutdown(&mut self) {
        self.close_handles().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use mq_contracts::{background, Reader};

    struct FakeCommitWriter {
        fail_write: bool,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl WriterTrait for FakeCommitWriter {
        async fn write(&mut self, _ctx: &Context, dispatches: &[Dispatch]) -> Result<usize, MessagingError> {
            if self.fail_write {
                return Err(MessagingError::Broker("publish failed".into()));
            }
            Ok(dispatches.len())
        }
        async fn close(&self) -> Result<(), MessagingError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl CommitWriter for FakeCommitWriter {
        async fn commit(&mut self) -> Result<(), MessagingError> {
            Ok(())
        }
        async fn rollback(&mut self) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    struct FakeConnection {
        fail_write: bool,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn reader(&self, _ctx: &Context) -> Result<Box<dyn Reader>, MessagingError> {
            unimplemented!()
        }
        async fn writer(&self, _ctx: &Context) -> Result<Box<dyn WriterTrait>, MessagingError> {
            unimplemented!()
        }
        async fn commit_writer(&self, _ctx: &Context) -> Result<Box<dyn CommitWriter>, MessagingError> {
            Ok(Box::new(FakeCommitWriter { fail_write: self.fail_write, closed: self.closed.clone() }))
        }
        async fn close(&self) -> Result<(), MessagingError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeConnector {
        fail_write: bool,
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, _ctx: &Context) -> Result<Box<dyn Connection>, MessagingError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeConnection { fail_write: self.fail_write, closed: self.closed.clone() }))
        }
        async fn close(&self) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn write_reuses_the_same_writer_across_calls() {
        let closed = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(FakeConnector { fail_write: false, opened: AtomicUsize::new(0), closed });
        let mut sender = DispatchSender::new(connector.clone());
        let (ctx, _canceller) = background();

        sender.write(&ctx, &[Dispatch::default()]).await.unwrap();
        sender.write(&ctx, &[Dispatch::default()]).await.unwrap();

        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn write_closes_handles_and_reopens_after_failure() {
        let closed = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(FakeConnector { fail_write: true, opened: AtomicUsize::new(0), closed: closed.clone() });
        let mut sender = DispatchSender::new(connector.clone());
        let (ctx, _canceller) = background();

        let result = sender.write(&ctx, &[Dispatch::default()]).await;
        assert!(result.is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 2); // writer + connection

        let _ = sender.write(&ctx, &[Dispatch::default()]).await;
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn write_is_a_noop_on_empty_slice() {
        let closed = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(FakeConnector { fail_write: false, opened: AtomicUsize::new(0), closed });
        let mut sender = DispatchSender::new(connector.clone());
        let (ctx, _canceller) = background();

        let count = sender.write(&ctx, &[]).await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(connector.opened.load(Ordering::SeqCst), 0);
    }
}
