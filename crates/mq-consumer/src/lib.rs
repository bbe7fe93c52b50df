//! Streaming consumer runtime: subscribes to a broker's streams and
//! dispatches deliveries to application `Handler`s.
//!
//! - [`manager::Manager`] spawns one supervisor loop per `Subscription`,
//!   reconnecting after a delay until it is closed.
//! - [`pool::ConnectionPool`] holds the single shared `Connection`,
//!   reconnecting it on demand.
//! - [`subscriber::Subscriber`] opens one stream per handler and runs
//!   the soft/hard shutdown sequence.
//! - [`worker::Worker`] pairs a reader loop with a handler loop per
//!   `ShutdownStrategy`.

pub mod error;
pub mod manager;
pub mod pool;
pub mod subscriber;
pub mod worker;

pub use error::ConsumerError;
pub use manager::Manager;
pub use pool::ConnectionPool;
pub use subscriber::Subscriber;
pub use worker::Worker;

pub type Result<T> = std::result::Result<T, ConsumerError>;
