//! `AmqpConnector`/`AmqpConnection`: the broker `Connector`/`Connection`
//! contracts implemented over `lapin`.
//!
//! Opened connections are tracked in a mutex-guarded list so `close` can
//! tear all of them down at once.

use std::sync::Arc;

use async_trait::async_trait;
use lapin::ConnectionProperties;
use tokio::sync::Mutex;
use tracing::{info, warn};

use mq_contracts::{Connection as ConnectionTrait, Connector as ConnectorTrait, Context, MessagingError};

use crate::config::AmqpConfig;
use crate::dialer::Dialer;
use crate::error::AmqpError;
use crate::reader::AmqpReader;
use crate::writer::{AmqpCommitWriter, AmqpWriter};

/// Opens `AmqpConnection`s against the configured broker address and
/// tracks every connection it has opened so `close` can tear them all
/// down.
pub struct AmqpConnector {
    config: AmqpConfig,
    dialer: Dialer,
    active: Mutex<Vec<Arc<lapin::Connection>>>,
}

impl AmqpConnector {
    pub fn new(config: AmqpConfig) -> Self {
        let dialer = Dialer::new(config.tls_config.clone(), config.tls_server_name.clone());
        Self { config, dialer, active: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl ConnectorTrait for AmqpConnector {
    async fn connect(&self, ctx: &Context) -> Result<Box<dyn ConnectionTrait>, MessagingError> {
        if ctx.is_done() {
            return Err(MessagingError::Cancelled);
        }

        let address = self.config.address.resolve();
        self.dialer.preflight(&address).await.map_err(MessagingError::from)?;

        let conn = lapin::Connection::connect(&address, ConnectionProperties::default())
            .await
            .map_err(|e| MessagingError::from(AmqpError::from(e)))?;
        let conn = Arc::new(conn);

        self.active.lock().await.push(conn.clone());
        self.config.monitor.connection_opened(None);
        info!(address = %address, "amqp connection opened");

        Ok(Box::new(AmqpConnection {
            conn,
            config: self.config.clone(),
        }))
    }

    async fn close(&self) -> Result<(), MessagingError> {
        let mut active = self.active.lock().await;
        for conn in active.drain(..) {
            if let Err(e) = conn.close(200, "connector shutdown").await {
                warn!(error = %e, "error closing amqp connection");
            }
            self.config.monitor.connection_closed();
        }
        Ok(())
    }
}

/// One logical AMQP connection. Each `reader`/`writer`/`commit_writer`
/// call opens its own channel.
pub struct AmqpConnection {
    conn: Arc<lapin::Connection>,
    config: AmqpConfig,
}

#[async_trait]
impl ConnectionTrait for AmqpConnection {
    async fn reader(&self, ctx: &Context) -> Result<Box<dyn mq_contracts::Reader>, MessagingError> {
        if ctx.is_done() {
            return Err(MessagingError::Cancelled);
        }
        let channel = self
            .conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::from(AmqpError::from(e)))?;
        Ok(Box::new(AmqpReader::new(channel, self.config.clone())))
    }

    async fn writer(&self, ctx: &Context) -> Result<Box<dyn mq_contracts::Writer>, MessagingError> {
        if ctx.is_done() {
            return Err(MessagingError::Cancelled);
        }
        let channel = self
            .conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::from(AmqpError::from(e)))?;
        Ok(Box::new(AmqpWriter::new(channel, self.config.clone())))
    }

    async fn commit_writer(&self, ctx: &Context) -> Result<Box<dyn mq_contracts::CommitWriter>, MessagingError> {
        if ctx.is_done() {
            return Err(MessagingError::Cancelled);
        }
        let channel = self
            .conn
            .create_channel()
            .await
            .map_err(|e| MessagingError::from(AmqpError::from(e)))?;
        match channel.tx_select().await {
            Ok(_) => Ok(Box::new(AmqpCommitWriter::new(channel, self.config.clone()))),
            Err(e) => {
                let _ = channel.close(200, "tx_select failed").await;
                Err(MessagingError::from(AmqpError::from(e)))
            }
        }
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.conn
            .close(200, "connection closed")
            .await
            .map_err(|e| MessagingError::from(AmqpError::from(e)))
    }
}
