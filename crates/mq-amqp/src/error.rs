use thiserror::Error;
use mq_contracts::MessagingError;

/// Internal failure modes for the AMQP adapter. Converts into
/// `mq_contracts::MessagingError` at the L1 trait boundary.
#[derive(Error, Debug)]
pub enum AmqpError {
    #[error("amqp i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls handshake failed: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),

    #[error("invalid broker address: {0}")]
    InvalidAddress(String),

    #[error("amqp client error: {0}")]
    Lapin(#[from] lapin::Error),

    #[error("topology conflict declaring broker resources (406)")]
    TopologyConflict,

    #[error("cannot open a second exclusive stream while other streams exist")]
    MultipleStreams,

    #[error("cannot open a stream while an exclusive stream already exists")]
    AlreadyExclusive,

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AmqpError>;

impl From<AmqpError> for MessagingError {
    fn from(e: AmqpError) -> Self {
        match e {
            AmqpError::TopologyConflict => MessagingError::TopologyConflict,
            AmqpError::MultipleStreams => MessagingError::ErrMultipleStreams,
            AmqpError::AlreadyExclusive => MessagingError::ErrAlreadyExclusive,
            AmqpError::Cancelled => MessagingError::Cancelled,
            AmqpError::Io(e) => MessagingError::Io(e),
            other => MessagingError::Broker(other.to_string()),
        }
    }
}
