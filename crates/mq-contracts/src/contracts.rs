//! The five polymorphic broker contracts. Every implementation — the
//! AMQP adapter, the outbox's SQL-backed connector, a serialization
//! decorator, a test fake — implements the same shapes.
//!
//! Context cancellation is checked at entry to every method here; every
//! blocking operation honors it.

use crate::context::Context;
use crate::error::MessagingError;
use crate::model::{Delivery, Dispatch, StreamConfig};
use async_trait::async_trait;

/// Opens broker connections and tracks every connection it has opened so
/// `close` can tear them all down.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, ctx: &Context) -> Result<Box<dyn Connection>, MessagingError>;
    async fn close(&self) -> Result<(), MessagingError>;
}

/// One logical connection to the broker. A `Writer` is fire-and-forget;
/// a `CommitWriter` adds transactional `commit`/`rollback` semantics —
/// that is the sole distinction between the two.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn reader(&self, ctx: &Context) -> Result<Box<dyn Reader>, MessagingError>;
    async fn writer(&self, ctx: &Context) -> Result<Box<dyn Writer>, MessagingError>;
    async fn commit_writer(&self, ctx: &Context) -> Result<Box<dyn CommitWriter>, MessagingError>;
    async fn close(&self) -> Result<(), MessagingError>;
}

/// Opens `Stream`s against one broker channel. Closing the reader closes
/// all streams it opened.
#[async_trait]
pub trait Reader: Send + Sync {
    async fn stream(&self, ctx: &Context, config: StreamConfig) -> Result<Box<dyn Stream>, MessagingError>;
    async fn close(&self) -> Result<(), MessagingError>;
}

/// A live subscription delivering a bounded-buffered sequence of
/// `Delivery` values. `read` blocks until a delivery arrives, the
/// producer closes (end-of-stream sentinel), or `ctx` is cancelled.
#[async_trait]
pub trait Stream: Send + Sync {
    /// Implementers own whatever interior mutability `read` needs (e.g.
    /// a mutex around a buffer channel receiver) so that `read` and
    /// `acknowledge` never contend for the same lock — a worker's
    /// in-flight read must never block its own ack of an earlier batch.
    async fn read(&self, ctx: &Context) -> Result<Delivery, MessagingError>;
    async fn acknowledge(&self, ctx: &Context, deliveries: &[Delivery]) -> Result<(), MessagingError>;
    async fn close(&self) -> Result<(), MessagingError>;
}

/// Fire-and-forget publish. `write` returns the count successfully
/// written before any error — a partial count on failure, never an
/// all-or-nothing guarantee at this layer.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn write(&mut self, ctx: &Context, dispatches: &[Dispatch]) -> Result<usize, MessagingError>;
    async fn close(&self) -> Result<(), MessagingError>;
}

/// A `Writer` with transactional commit/rollback, opened in place of a
/// plain `Writer` when the caller needs atomicity (the outbox's
/// `DispatchReceiver` is the primary consumer of this contract).
#[async_trait]
pub trait CommitWriter: Writer {
    async fn commit(&mut self) -> Result<(), MessagingError>;
    async fn rollback(&mut self) -> Result<(), MessagingError>;
}

/// User-supplied message handler. Retry and transactional middlewares
/// that might wrap a handler are out of scope here; what this crate
/// defines is only the seam they'd wrap — an explicit `Result` return,
/// never panic/recover.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &Context, deliveries: &[Delivery]) -> Result<(), HandlerError>;
}

#[derive(Debug, thiserror::Error)]
#[error("handler failed: {0}")]
pub struct HandlerError(pub String);
