//! `ConnectionPool`: a single shared broker connection, opened on demand
//! and released-and-reconnected on failure.
//!
//! No reference counting — subscribers own their reader/writer objects
//! and close them explicitly. The mutex-guarded single-slot
//! acquire/dispose/reconnect behavior here is distinct from
//! `mq-amqp::AmqpConnector`'s multi-connection tracking.

use std::sync::Arc;

use mq_contracts::{Connection, Connector, Context, MessagingError};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Holds at most one live connection at a time, shared by every
/// `Subscriber` spawned from the same `Manager`.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    current: Mutex<Option<Arc<dyn Connection>>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector, current: Mutex::new(None) }
    }

    /// Return the current connection, opening a new one if none is held.
    pub async fn active(&self, ctx: &Context) -> Result<Arc<dyn Connection>, MessagingError> {
        let mut guard = self.current.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn: Box<dyn Connection> = self.connector.connect(ctx).await?;
        let conn: Arc<dyn Connection> = Arc::from(conn);
        *guard = Some(conn.clone());
        info!("connection pool opened a new broker connection");
        Ok(conn)
    }

    /// Close `conn` and, if it was the currently-held connection, clear
    /// the slot so the next `active` call reconnects.
    pub async fn dispose(&self, conn: &Arc<dyn Connection>) {
        let mut guard = self.current.lock().await;
        if let Err(e) = conn.close().await {
            debug!(error = %e, "error closing disposed connection");
        }
        if let Some(current) = guard.as_ref() {
            if Arc::ptr_eq(current, conn) {
                *guard = None;
            }
        }
    }

    /// Close the currently-held connection, if any.
    pub async fn close(&self) -> Result<(), MessagingError> {
        let mut guard = self.current.lock().await;
        if let Some(conn) = guard.take() {
            conn.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use mq_contracts::{background, CommitWriter, Reader, Writer};

    struct FakeConnection {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn reader(&self, _ctx: &Context) -> Result<Box<dyn Reader>, MessagingError> {
            unimplemented!()
        }
        async fn writer(&self, _ctx: &Context) -> Result<Box<dyn Writer>, MessagingError> {
            unimplemented!()
        }
        async fn commit_writer(&self, _ctx: &Context) -> Result<Box<dyn CommitWriter>, MessagingError> {
            unimplemented!()
        }
        async fn close(&self) -> Result<(), MessagingError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeConnector {
        next_id: AtomicUsize,
        opened: AtomicUsize,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, _ctx: &Context) -> Result<Box<dyn Connection>, MessagingError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeConnection { closed: self.closed.clone() }))
        }
        async fn close(&self) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn active_reuses_existing_connection() {
        let closed = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(FakeConnector { next_id: AtomicUsize::new(0), opened: AtomicUsize::new(0), closed });
        let pool = ConnectionPool::new(connector.clone());
        let (ctx, _canceller) = background();

        let first = pool.active(&ctx).await.unwrap();
        let second = pool.active(&ctx).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispose_clears_slot_and_closes() {
        let closed = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(FakeConnector { next_id: AtomicUsize::new(0), opened: AtomicUsize::new(0), closed: closed.clone() });
        let pool = ConnectionPool::new(connector.clone());
        let (ctx, _canceller) = background();

        let conn = pool.active(&ctx).await.unwrap();
        pool.dispose(&conn).await;
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let next = pool.active(&ctx).await.unwrap();
        assert!(!Arc::ptr_eq(&conn, &next));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }
}
