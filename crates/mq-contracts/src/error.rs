//! Crate-wide error taxonomy.
//!
//! Mirrors the error kinds in the design's error-handling table: transient
//! network failures, topology conflicts, the multiple-stream rule,
//! cancellation, and storage assertions. Each downstream crate (`mq-amqp`,
//! `mq-consumer`, `mq-outbox`) defines its own narrower `thiserror` enum for
//! internal failure modes and converts into `MessagingError` at the L1
//! trait boundary.

use thiserror::Error;

/// Errors surfaced across the broker contract boundary (L1).
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("topology conflict declaring broker resources")]
    TopologyConflict,

    #[error("cannot open a second exclusive stream while other streams exist")]
    ErrMultipleStreams,

    #[error("cannot open a stream while an exclusive stream already exists")]
    ErrAlreadyExclusive,

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage assertion failed: rows affected did not match dispatch count")]
    ErrRowsAffected,

    #[error("storage assertion failed: no identity assigned on insert")]
    ErrIdentityFailure,

    #[error("database error: {0}")]
    Database(String),
}

pub type Result<T> = std::result::Result<T, MessagingError>;
