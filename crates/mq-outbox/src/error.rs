use thiserror::Error;
use mq_contracts::MessagingError;

/// Internal failure modes for the outbox store, receiver, and processor.
/// Converts into `mq_contracts::MessagingError` at the L1 trait boundary.
#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("unsupported data source: {0}")]
    UnsupportedDriver(String),

    #[error("storage assertion failed: rows affected did not match dispatch count")]
    RowsAffected,

    #[error("storage assertion failed: no identity assigned on insert")]
    IdentityFailure,

    #[error("operation cancelled")]
    Cancelled,

    #[error("outbox connection does not support {0}; use commit_writer")]
    Unsupported(&'static str),

    #[error("broker error: {0}")]
    Broker(String),
}

pub type Result<T> = std::result::Result<T, OutboxError>;

impl From<OutboxError> for MessagingError {
    fn from(e: OutboxError) -> Self {
        match e {
            OutboxError::RowsAffected => MessagingError::ErrRowsAffected,
            OutboxError::IdentityFailure => MessagingError::ErrIdentityFailure,
            OutboxError::Cancelled => MessagingError::Cancelled,
            OutboxError::Sql(e) => MessagingError::Database(e.to_string()),
            other => MessagingError::Broker(other.to_string()),
        }
    }
}
