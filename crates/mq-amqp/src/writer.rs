//! `AmqpWriter`/`AmqpCommitWriter`: publish encoding and publisher-
//! transaction commit/rollback.
//!
//! `AmqpCommitWriter` wraps an `AmqpWriter` opened on a channel already
//! placed in Tx mode by `AmqpConnection::commit_writer`, sharing the
//! same `BasicProperties`/`basic_publish` encoding as a plain write.

use async_trait::async_trait;
use lapin::options::BasicPublishOptions;
use lapin::Channel;
use tracing::error;

use mq_contracts::{CommitWriter as CommitWriterTrait, Context, Dispatch, MessagingError, Writer as WriterTrait};

use crate::config::AmqpConfig;
use crate::error::AmqpError;
use crate::translate::{to_decimal, dispatch_to_properties};

/// Fire-and-forget publish over one AMQP channel.
pub struct AmqpWriter {
    channel: Channel,
    config: AmqpConfig,
}

impl AmqpWriter {
    pub fn new(channel: Channel, config: AmqpConfig) -> Self {
        Self { channel, config }
    }

    async fn publish_one(&self, dispatch: &Dispatch) -> Result<(), AmqpError> {
        let now = (self.config.now)();
        let properties = dispatch_to_properties(dispatch, now);
        let routing_key = to_decimal(dispatch.partition);

        self.channel
            .basic_publish(
                &dispatch.topic,
                routing_key.as_str(),
                BasicPublishOptions { mandatory: false, immediate: false },
                &dispatch.payload,
                properties,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WriterTrait for AmqpWriter {
    async fn write(&mut self, ctx: &Context, dispatches: &[Dispatch]) -> Result<usize, MessagingError> {
        if dispatches.is_empty() {
            return Ok(0);
        }

        let mut written = 0;
        for dispatch in dispatches {
            if ctx.is_done() {
                return Err(MessagingError::Cancelled);
            }
            match self.publish_one(dispatch).await {
                Ok(()) => {
                    written += 1;
                    self.config.monitor.dispatch_published(1);
                }
                Err(e) => {
                    error!(error = %e, written, "amqp publish failed mid-batch");
                    return Err(MessagingError::from(e));
                }
            }
        }
        Ok(written)
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.channel.close(200, "writer closed").await.map_err(|e| MessagingError::from(AmqpError::from(e)))
    }
}

/// An `AmqpWriter` over a channel already in Tx mode, adding
/// commit/rollback.
pub struct AmqpCommitWriter {
    inner: AmqpWriter,
}

impl AmqpCommitWriter {
    pub fn new(channel: Channel, config: AmqpConfig) -> Self {
        Self { inner: AmqpWriter::new(channel, config) }
    }
}

#[async_trait]
impl WriterTrait for AmqpCommitWriter {
    async fn write(&mut self, ctx: &Context, dispatches: &[Dispatch]) -> Result<usize, MessagingError> {
        self.inner.write(ctx, dispatches).await
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.inner.close().await
    }
}

#[async_trait]
impl CommitWriterTrait for AmqpCommitWriter {
    async fn commit(&mut self) -> Result<(), MessagingError> {
        let result = self.inner.channel.tx_commit().await;
        match &result {
            Ok(_) => self.inner.config.monitor.transaction_committed(None),
            Err(e) => self.inner.config.monitor.transaction_committed(Some(&e.to_string())),
        }
        result.map_err(|e| {
            if e.to_string().contains("404") {
                if self.inner.config.panic_on_topology_error {
                    panic!("amqp commit failed with 404 (topology missing): {e}");
                }
                MessagingError::TopologyConflict
            } else {
                MessagingError::from(AmqpError::from(e))
            }
        })
    }

    async fn rollback(&mut self) -> Result<(), MessagingError> {
        let result = self.inner.channel.tx_rollback().await;
        match &result {
            Ok(_) => self.inner.config.monitor.transaction_rolled_back(None),
            Err(e) => self.inner.config.monitor.transaction_rolled_back(Some(&e.to_string())),
        }
        result.map_err(|e| MessagingError::from(AmqpError::from(e)))
    }
}
