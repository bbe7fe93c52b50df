//! `AmqpReader`/`AmqpStream`: topology declaration, consumer-tag
//! bookkeeping, exclusivity enforcement, and batched acknowledgment,
//! built on `lapin::Channel`'s `basic_consume`/`basic_qos`/
//! `queue_declare`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use mq_contracts::{Context, Delivery, MessagingError, Reader as ReaderTrait, Stream as StreamTrait, StreamConfig};

use crate::config::AmqpConfig;
use crate::error::AmqpError;
use crate::translate::delivery_from_amqp;

/// Opens `AmqpStream`s against one AMQP channel. Only one of them may be
/// exclusive; the AMQP-level enforcement of that rule lives here.
pub struct AmqpReader {
    channel: Channel,
    config: AmqpConfig,
    next_tag: AtomicU64,
    stream_count: Mutex<usize>,
    has_exclusive: AtomicBool,
}

impl AmqpReader {
    pub fn new(channel: Channel, config: AmqpConfig) -> Self {
        Self {
            channel,
            config,
            next_tag: AtomicU64::new(0),
            stream_count: Mutex::new(0),
            has_exclusive: AtomicBool::new(false),
        }
    }

    async fn declare_topology(&self, config: &StreamConfig) -> Result<(), AmqpError> {
        let declare_queue = self
            .channel
            .queue_declare(
                &config.stream_name,
                QueueDeclareOptions { durable: true, auto_delete: false, exclusive: false, ..Default::default() },
                FieldTable::default(),
            )
            .await;

        if let Err(e) = declare_queue {
            return Err(classify_topology_error(e));
        }

        for topic in &config.topics {
            let declare_exchange = self
                .channel
                .exchange_declare(
                    topic,
                    ExchangeKind::Fanout,
                    ExchangeDeclareOptions { durable: true, auto_delete: false, ..Default::default() },
                    FieldTable::default(),
                )
                .await;
            if let Err(e) = declare_exchange {
                return Err(classify_topology_error(e));
            }

            let bind = self
                .channel
                .queue_bind(&config.stream_name, topic, "", QueueBindOptions::default(), FieldTable::default())
                .await;
            if let Err(e) = bind {
                return Err(classify_topology_error(e));
            }
        }

        Ok(())
    }
}

fn classify_topology_error(e: lapin::Error) -> AmqpError {
    if is_amqp_reply_code(&e, 406) {
        AmqpError::TopologyConflict
    } else {
        AmqpError::from(e)
    }
}

/// lapin surfaces broker-side channel/connection closures (including the
/// AMQP reply code) only in the error's `Display` text; matching on that
/// text is the documented way to distinguish a 406 topology conflict from
/// any other channel failure.
fn is_amqp_reply_code(e: &lapin::Error, code: u16) -> bool {
    e.to_string().contains(&code.to_string())
}

#[async_trait]
impl ReaderTrait for AmqpReader {
    async fn stream(&self, ctx: &Context, config: StreamConfig) -> Result<Box<dyn StreamTrait>, MessagingError> {
        if ctx.is_done() {
            return Err(MessagingError::Cancelled);
        }

        {
            let count = self.stream_count.lock().await;
            if self.has_exclusive.load(Ordering::SeqCst) && *count > 0 {
                return Err(MessagingError::from(AmqpError::AlreadyExclusive));
            }
            if config.exclusive_stream && *count > 0 {
                return Err(MessagingError::from(AmqpError::MultipleStreams));
            }
        }

        if config.establish_topology {
            if let Err(e) = self.declare_topology(&config).await {
                if matches!(e, AmqpError::TopologyConflict) && self.config.panic_on_topology_error {
                    panic!("amqp topology declaration failed with 406 (topology conflict): {e}");
                }
                return Err(MessagingError::from(e));
            }
        }

        self.channel
            .basic_qos(config.buffer_capacity, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::from(AmqpError::from(e)))?;

        let consumer_tag = self.next_tag.fetch_add(1, Ordering::SeqCst).to_string();

        let consumer = self
            .channel
            .basic_consume(
                &config.stream_name,
                &consumer_tag,
                BasicConsumeOptions { no_local: false, no_ack: false, exclusive: false, nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::from(AmqpError::from(e)))?;

        *self.stream_count.lock().await += 1;
        if config.exclusive_stream {
            self.has_exclusive.store(true, Ordering::SeqCst);
        }

        // Spec §3: "A Stream owns a consumer tag and a buffer channel of
        // Deliveries." A background pump owns the `Consumer` and is the
        // only task that ever calls its blocking `next()`; `read` only
        // ever pops this channel, so it can never hold a lock the way a
        // direct `consumer.next()` under a shared mutex would — acks are
        // never blocked behind an in-flight read.
        let (tx, rx) = mpsc::channel(config.buffer_capacity.max(1) as usize);
        let pump_monitor = self.config.monitor.clone();
        tokio::spawn(pump(consumer, tx, pump_monitor));

        Ok(Box::new(AmqpStream {
            channel: self.channel.clone(),
            consumer_tag,
            exclusive: config.exclusive_stream,
            monitor: self.config.monitor.clone(),
            rx: Mutex::new(rx),
        }))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.channel
            .close(200, "reader closed")
            .await
            .map_err(|e| MessagingError::from(AmqpError::from(e)))
    }
}

/// Drains the AMQP `Consumer` into a bounded channel; the only task that
/// ever calls `Consumer::next()`. Exits once the consumer itself ends
/// (cancelled and drained) or the stream side drops the channel.
async fn pump(
    mut consumer: lapin::Consumer,
    tx: mpsc::Sender<Result<Delivery, MessagingError>>,
    monitor: Arc<dyn mq_contracts::Monitor>,
) {
    while let Some(next) = consumer.next().await {
        let message = match next {
            Ok(raw) => {
                monitor.delivery_received();
                Ok(delivery_from_amqp(&raw))
            }
            Err(e) => Err(MessagingError::from(AmqpError::from(e))),
        };
        if tx.send(message).await.is_err() {
            break;
        }
    }
}

/// A live consumer against one queue. `read` pops the channel a
/// background pump fills from the broker, so it never holds any lock
/// across a blocking network wait; `acknowledge` never contends with it.
pub struct AmqpStream {
    channel: Channel,
    consumer_tag: String,
    exclusive: bool,
    monitor: Arc<dyn mq_contracts::Monitor>,
    rx: Mutex<mpsc::Receiver<Result<Delivery, MessagingError>>>,
}

#[async_trait]
impl StreamTrait for AmqpStream {
    async fn read(&self, ctx: &Context) -> Result<Delivery, MessagingError> {
        if ctx.is_done() {
            return Err(MessagingError::Cancelled);
        }

        let mut rx = self.rx.lock().await;
        tokio::select! {
            message = rx.recv() => {
                match message {
                    Some(Ok(delivery)) => Ok(delivery),
                    Some(Err(e)) => Err(e),
                    None => Err(MessagingError::Broker("end of stream".to_string())),
                }
            }
            _ = ctx.done() => Err(MessagingError::Cancelled),
        }
    }

    async fn acknowledge(&self, ctx: &Context, deliveries: &[Delivery]) -> Result<(), MessagingError> {
        if ctx.is_done() {
            return Err(MessagingError::Cancelled);
        }
        if deliveries.is_empty() {
            return Ok(());
        }

        let result = if self.exclusive && deliveries.len() > 1 {
            let max_tag = deliveries.iter().map(|d| d.delivery_id).max().unwrap_or(0);
            self.channel.basic_ack(max_tag, BasicAckOptions { multiple: true }).await
        } else {
            let mut last_err = None;
            for delivery in deliveries {
                if let Err(e) = self.channel.basic_ack(delivery.delivery_id, BasicAckOptions { multiple: false }).await {
                    last_err = Some(e);
                    break;
                }
            }
            match last_err {
                Some(e) => Err(e),
                None => Ok(()),
            }
        };

        match &result {
            Ok(()) => self.monitor.delivery_acknowledged(deliveries.len(), None),
            Err(e) => self.monitor.delivery_acknowledged(0, Some(&e.to_string())),
        }

        result.map_err(|e| MessagingError::from(AmqpError::from(e)))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        if let Err(e) = self.channel.basic_cancel(&self.consumer_tag, BasicCancelOptions::default()).await {
            warn!(error = %e, tag = %self.consumer_tag, "error cancelling amqp consumer");
        } else {
            debug!(tag = %self.consumer_tag, "amqp consumer cancelled");
        }
        Ok(())
    }
}
