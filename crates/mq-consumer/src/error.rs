use thiserror::Error;
use mq_contracts::MessagingError;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("subscription '{0}' has no configured handlers")]
    NoHandlers(String),
}

pub type Result<T> = std::result::Result<T, ConsumerError>;
