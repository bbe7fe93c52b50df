//! `Subscriber`: per-invocation consumer lifecycle — acquire connection,
//! open reader, open stream, spawn one worker per handler, and run the
//! graceful-shutdown sequence.

use std::sync::Arc;

use mq_contracts::{background, Context, Handler, ShutdownStrategy, Stream, Subscription};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::pool::ConnectionPool;
use crate::worker::Worker;

pub struct Subscriber {
    subscription: Subscription,
    handlers: Vec<Arc<dyn Handler>>,
    pool: Arc<ConnectionPool>,
}

impl Subscriber {
    pub fn new(subscription: Subscription, handlers: Vec<Arc<dyn Handler>>, pool: Arc<ConnectionPool>) -> Self {
        Self { subscription, handlers, pool }
    }

    /// Run one connect→consume→shutdown cycle. Returns once the stream
    /// and all workers have wound down; `Manager` is responsible for
    /// looping this (with `reconnect_delay`) until its own context ends.
    pub async fn listen(&self, soft_ctx: &Context) {
        let conn = match self.pool.active(soft_ctx).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(subscription = %self.subscription.name, error = %e, "failed to acquire broker connection");
                return;
            }
        };

        let reader = match conn.reader(soft_ctx).await {
            Ok(reader) => reader,
            Err(e) => {
                warn!(subscription = %self.subscription.name, error = %e, "failed to open reader");
                self.pool.dispose(&conn).await;
                return;
            }
        };

        let stream = match reader.stream(soft_ctx, self.subscription.stream_config()).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(subscription = %self.subscription.name, error = %e, "failed to open stream");
                let _ = reader.close().await;
                return;
            }
        };
        let stream: Arc<dyn Stream> = Arc::from(stream);

        info!(subscription = %self.subscription.name, handlers = self.handlers.len(), "subscriber listening");

        let (hard_ctx, hard_canceller) = if self.subscription.shutdown_strategy == ShutdownStrategy::Immediate {
            (soft_ctx.clone(), None)
        } else {
            let (ctx, canceller) = background();
            (ctx, Some(canceller))
        };

        let mut workers = JoinSet::new();
        for handler in &self.handlers {
            let worker = Worker::new(&self.subscription, handler.clone(), stream.clone());
            let soft = soft_ctx.clone();
            let hard = hard_ctx.clone();
            workers.spawn(async move { worker.run(soft, hard).await });
        }

        tokio::select! {
            _ = drain(&mut workers) => {}
            _ = soft_ctx.done() => {
                debug!(subscription = %self.subscription.name, "soft shutdown: closing stream");
                let _ = stream.close().await;

                if let Some(hard_canceller) = hard_canceller {
                    tokio::select! {
                        _ = drain(&mut workers) => {}
                        _ = tokio::time::sleep(self.subscription.shutdown_timeout) => {
                            warn!(subscription = %self.subscription.name, "shutdown timeout elapsed; cancelling hard context");
                            hard_canceller.cancel();
                            drain(&mut workers).await;
                        }
                    }
                } else {
                    drain(&mut workers).await;
                }
            }
        }

        let _ = reader.close().await;
        info!(subscription = %self.subscription.name, "subscriber stopped");
    }
}

async fn drain(workers: &mut JoinSet<()>) {
    while workers.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use mq_contracts::{
        CommitWriter as CommitWriterTrait, Connection, Delivery, HandlerError, MessagingError, Reader as ReaderTrait,
        Writer as WriterTrait,
    };

    /// A stream that serves a handful of queued deliveries, then blocks
    /// until either the test cancels the context or `close` is called —
    /// mirroring a real AMQP consumer under `Drain`.
    struct FakeStream {
        pending: StdMutex<VecDeque<Delivery>>,
        closed: Arc<AtomicBool>,
        close_calls: Arc<AtomicUsize>,
        acked: Arc<StdMutex<Vec<u64>>>,
    }

    #[async_trait]
    impl mq_contracts::Stream for FakeStream {
        async fn read(&self, ctx: &Context) -> Result<Delivery, MessagingError> {
            loop {
                if let Some(d) = self.pending.lock().unwrap().pop_front() {
                    return Ok(d);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return Err(MessagingError::Broker("end of stream".to_string()));
                }
                if ctx.is_done() {
                    return Err(MessagingError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        async fn acknowledge(&self, _ctx: &Context, deliveries: &[Delivery]) -> Result<(), MessagingError> {
            self.acked.lock().unwrap().extend(deliveries.iter().map(|d| d.delivery_id));
            Ok(())
        }

        async fn close(&self) -> Result<(), MessagingError> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeReader {
        stream: StdMutex<Option<Box<dyn mq_contracts::Stream>>>,
    }

    #[async_trait]
    impl ReaderTrait for FakeReader {
        async fn stream(&self, _ctx: &Context, _config: mq_contracts::StreamConfig) -> Result<Box<dyn mq_contracts::Stream>, MessagingError> {
            Ok(self.stream.lock().unwrap().take().expect("stream already opened"))
        }
        async fn close(&self) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    struct FakeConnection {
        reader: StdMutex<Option<FakeReader>>,
    }

    #[async_trait]
    impl Connection for FakeConnection {
        async fn reader(&self, _ctx: &Context) -> Result<Box<dyn ReaderTrait>, MessagingError> {
            Ok(Box::new(self.reader.lock().unwrap().take().expect("reader already opened")))
        }
        async fn writer(&self, _ctx: &Context) -> Result<Box<dyn WriterTrait>, MessagingError> {
            unimplemented!()
        }
        async fn commit_writer(&self, _ctx: &Context) -> Result<Box<dyn CommitWriterTrait>, MessagingError> {
            unimplemented!()
        }
        async fn close(&self) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    struct FakeConnector {
        connection: StdMutex<Option<FakeConnection>>,
    }

    #[async_trait]
    impl mq_contracts::Connector for FakeConnector {
        async fn connect(&self, _ctx: &Context) -> Result<Box<dyn Connection>, MessagingError> {
            Ok(Box::new(self.connection.lock().unwrap().take().expect("connection already opened")))
        }
        async fn close(&self) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl Handler for NoopHandler {
        async fn handle(&self, _ctx: &Context, _deliveries: &[Delivery]) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn delivery(id: u64) -> Delivery {
        Delivery { delivery_id: id, ..Default::default() }
    }

    /// Soft-context cancellation closes the stream (stopping new
    /// deliveries) and the subscriber returns once all workers have
    /// drained the deliveries already in flight.
    #[tokio::test]
    async fn soft_cancel_closes_the_stream_and_waits_for_workers_to_drain() {
        let closed = Arc::new(AtomicBool::new(false));
        let close_calls = Arc::new(AtomicUsize::new(0));
        let acked = Arc::new(StdMutex::new(Vec::new()));

        let stream = FakeStream {
            pending: StdMutex::new(VecDeque::from(vec![delivery(1), delivery(2)])),
            closed: closed.clone(),
            close_calls: close_calls.clone(),
            acked: acked.clone(),
        };
        let reader = FakeReader { stream: StdMutex::new(Some(Box::new(stream))) };
        let connection = FakeConnection { reader: StdMutex::new(Some(reader)) };
        let connector = FakeConnector { connection: StdMutex::new(Some(connection)) };
        let pool = Arc::new(ConnectionPool::new(Arc::new(connector)));

        let subscription = Subscription::builder("orders", "orders.q")
            .handler_count(1)
            .batch_capacity(1)
            .shutdown_strategy(mq_contracts::ShutdownStrategy::Drain, Duration::from_millis(200))
            .build();
        let subscriber = Subscriber::new(subscription, vec![Arc::new(NoopHandler)], pool);

        let (soft_ctx, soft_canceller) = mq_contracts::background();

        let listen = tokio::spawn({
            let soft_ctx = soft_ctx.clone();
            async move { subscriber.listen(&soft_ctx).await }
        });

        for _ in 0..100 {
            if acked.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*acked.lock().unwrap(), vec![1, 2]);

        soft_canceller.cancel();
        tokio::time::timeout(Duration::from_secs(1), listen)
            .await
            .expect("subscriber should stop promptly after soft cancel")
            .unwrap();

        assert_eq!(close_calls.load(Ordering::SeqCst), 1);
    }
}
