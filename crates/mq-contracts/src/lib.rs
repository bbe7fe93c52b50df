//! Broker-agnostic contracts for the messaging client library (L1).
//!
//! This crate defines the shapes every broker adapter, the outbox, and a
//! test fake implement: `Connector` → `Connection` → `{Reader, Writer,
//! CommitWriter}`; `Reader` → `Stream`; the `Dispatch`/`Delivery` value
//! types; `Subscription`/`StreamConfig`; the cooperative-cancellation
//! `Context`; and the `Monitor` observer hook. It carries no broker- or
//! storage-specific code — that lives in `mq-amqp` and `mq-outbox`.

pub mod context;
pub mod contracts;
pub mod error;
pub mod logging;
pub mod model;
pub mod monitor;

pub use context::{background, Canceller, Context};
pub use contracts::{CommitWriter, Connection, Connector, Handler, HandlerError, Reader, Stream, Writer};
pub use error::{MessagingError, Result};
pub use model::{Delivery, Dispatch, ShutdownStrategy, StreamConfig, Subscription, SubscriptionBuilder};
pub use monitor::{Monitor, NoopMonitor};
