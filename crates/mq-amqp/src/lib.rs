//! AMQP 0-9-1 adapter: the canonical implementation of the
//! `mq-contracts` broker traits over `lapin` — dialing (TCP + optional
//! TLS), topology declaration, publisher transactions, consumer
//! channels, and batched acknowledgment.

pub mod config;
pub mod connector;
pub mod dialer;
pub mod error;
pub mod reader;
pub mod translate;
pub mod writer;

pub use config::{options, AmqpConfig, BrokerAddress};
pub use connector::{AmqpConnection, AmqpConnector};
pub use error::{AmqpError, Result};
pub use reader::{AmqpReader, AmqpStream};
pub use writer::{AmqpCommitWriter, AmqpWriter};
