//! Transactional outbox: atomic application writes alongside a
//! `Messages` table, forwarded to the real broker by a background
//! [`processor::DispatchProcessor`].
//!
//! Layered the same way `mq-amqp` is: [`pool`]/[`store`] own the SQL
//! shape, [`receiver`]/[`connector`] implement the
//! `mq_contracts::Connector`/`Connection` contracts, and
//! [`sender`]/[`processor`] form the background forwarder that drains
//! the shared output channel. [`config`] exposes the same
//! construct-with-options pattern as `mq-amqp::config`.

pub mod config;
pub mod connector;
pub mod error;
pub mod pool;
pub mod processor;
pub mod receiver;
pub mod sender;
pub mod store;

pub use config::{options, DataSource, OutboxConfig};
pub use connector::{OutboxConnection, OutboxConnector};
pub use error::{OutboxError, Result};
pub use pool::{IsolationLevel, OutboxPool, OutboxTx};
pub use processor::DispatchProcessor;
pub use receiver::{DispatchReceiver, TxHandle};
pub use sender::DispatchSender;
pub use store::{MessageStore, SqlMessageStore};

use std::sync::Arc;

use tokio::sync::mpsc;

use mq_contracts::Dispatch;

/// Wire up an [`OutboxConnector`] and its paired [`DispatchProcessor`]
/// from an [`OutboxConfig`], sharing one `output` channel between them
/// so the processor remains its sole consumer.
///
/// `config.message_sender_target` must be set to the real broker's
/// `Connector` — this is the one required option beyond a data source.
pub async fn build(config: OutboxConfig) -> Result<(OutboxConnector, DispatchProcessor, mq_contracts::Canceller)> {
    let pool = match config.data_source {
        Some(DataSource::Pool(pool)) => pool,
        Some(DataSource::Dsn { driver, dsn }) => OutboxPool::connect(&driver, &dsn).await?,
        None => return Err(OutboxError::UnsupportedDriver("no data source configured".into())),
    };
    pool.ensure_schema().await?;

    let store: Arc<dyn MessageStore> = config.message_store.unwrap_or_else(|| Arc::new(SqlMessageStore::new(pool.clone())));

    let target = config
        .message_sender_target
        .ok_or_else(|| OutboxError::UnsupportedDriver("no message sender target configured".into()))?;

    let (output_tx, output_rx): (mpsc::Sender<Dispatch>, mpsc::Receiver<Dispatch>) = mpsc::channel(config.channel_buffer_size);

    let connector = OutboxConnector::new(pool, store.clone(), output_tx.clone(), config.isolation_level);

    let sender = DispatchSender::new(target);
    let (processor, canceller) = DispatchProcessor::new(output_tx, output_rx, store, sender, config.retry_timeout);
    let processor = processor.with_monitor(config.monitor);

    Ok((connector, processor, canceller))
}
