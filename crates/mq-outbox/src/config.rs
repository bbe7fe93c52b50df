//! Outbox configuration: data source, channel sizing, isolation level,
//! retry timeout, and pluggable `MessageStore`/`MessageSender`
//! overrides.
//!
//! Follows the same construct-with-options pattern as `mq-amqp::config`
//! — a namespace of pure constructor functions returning option
//! closures, rather than a process-wide mutable options singleton.

use std::sync::Arc;
use std::time::Duration;

use mq_contracts::{Connector, Monitor};

use crate::pool::{IsolationLevel, OutboxPool};
use crate::store::MessageStore;

/// Where the outbox's `Messages` table lives.
pub enum DataSource {
    /// `DataSource(driver, dsn)`: connect lazily when the connector is
    /// built.
    Dsn { driver: String, dsn: String },
    /// `StorageHandle(pool)`: use an already-open pool.
    Pool(OutboxPool),
}

pub struct OutboxConfig {
    pub data_source: Option<DataSource>,
    pub channel_buffer_size: usize,
    pub isolation_level: IsolationLevel,
    pub retry_timeout: Duration,
    pub message_store: Option<Arc<dyn MessageStore>>,
    pub message_sender_target: Option<Arc<dyn Connector>>,
    pub monitor: Arc<dyn Monitor>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            data_source: None,
            channel_buffer_size: 1024,
            isolation_level: IsolationLevel::default(),
            retry_timeout: Duration::from_secs(5),
            message_store: None,
            message_sender_target: None,
            monitor: Arc::new(mq_contracts::NoopMonitor),
        }
    }
}

pub type Option_ = Box<dyn FnOnce(&mut OutboxConfig)>;

impl OutboxConfig {
    pub fn new(options: impl IntoIterator<Item = Option_>) -> Self {
        let mut config = Self::default();
        for opt in options {
            opt(&mut config);
        }
        config
    }
}

pub mod options {
    use super::*;

    pub fn data_source(driver: impl Into<String>, dsn: impl Into<String>) -> Option_ {
        let driver = driver.into();
        let dsn = dsn.into();
        Box::new(move |c| c.data_source = Some(DataSource::Dsn { driver, dsn }))
    }

    pub fn storage_handle(pool: OutboxPool) -> Option_ {
        Box::new(move |c| c.data_source = Some(DataSource::Pool(pool)))
    }

    pub fn channel_buffer_size(n: usize) -> Option_ {
        Box::new(move |c| c.channel_buffer_size = n)
    }

    pub fn isolation_level(level: IsolationLevel) -> Option_ {
        Box::new(move |c| c.isolation_level = level)
    }

    pub fn retry_timeout(d: Duration) -> Option_ {
        Box::new(move |c| c.retry_timeout = d)
    }

    pub fn message_store(store: Arc<dyn MessageStore>) -> Option_ {
        Box::new(move |c| c.message_store = Some(store))
    }

    /// `MessageSender`: the real broker's `Connector`, wrapped by a
    /// `DispatchSender` when the processor is built.
    pub fn message_sender(target: Arc<dyn Connector>) -> Option_ {
        Box::new(move |c| c.message_sender_target = Some(target))
    }

    pub fn monitor(monitor: Arc<dyn Monitor>) -> Option_ {
        Box::new(move |c| c.monitor = monitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = OutboxConfig::default();
        assert!(config.data_source.is_none());
        assert_eq!(config.channel_buffer_size, 1024);
        assert_eq!(config.isolation_level, IsolationLevel::ReadCommitted);
        assert_eq!(config.retry_timeout, Duration::from_secs(5));
        assert!(config.message_store.is_none());
        assert!(config.message_sender_target.is_none());
    }

    #[test]
    fn options_override_defaults() {
        let config = OutboxConfig::new([
            options::data_source("sqlite", "sqlite::memory:"),
            options::channel_buffer_size(64),
            options::isolation_level(IsolationLevel::Serializable),
            options::retry_timeout(Duration::from_secs(1)),
        ]);

        assert!(matches!(config.data_source, Some(DataSource::Dsn { ref driver, ref dsn }) if driver == "sqlite" && dsn == "sqlite::memory:"));
        assert_eq!(config.channel_buffer_size, 64);
        assert_eq!(config.isolation_level, IsolationLevel::Serializable);
        assert_eq!(config.retry_timeout, Duration::from_secs(1));
    }
}
