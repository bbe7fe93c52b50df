//! Core value types: `Dispatch` (outbound), `Delivery` (inbound),
//! `Subscription` (consumer configuration), and `StreamConfig` (the
//! subset of a `Subscription` a `Reader` needs to open a `Stream`).

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// An outbound message headed for the broker (or the outbox).
///
/// Created by producer code; `message_type`/`content_type`/`payload`/
/// `topic` may be filled in later by an encoder when left empty — this
/// crate does not implement that encoder, it only carries the fields it
/// would populate.
#[derive(Debug, Clone, Default)]
pub struct Dispatch {
    pub source_id: u64,
    pub message_id: u64,
    pub correlation_id: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub expiration: Option<Duration>,
    pub durable: bool,
    pub topic: String,
    pub partition: u64,
    pub message_type: String,
    pub content_type: String,
    pub content_encoding: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, serde_json::Value>,
}

/// An inbound message read from a `Stream`, carrying everything needed to
/// acknowledge it exactly once.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    /// Monotonic within the stream that produced it; the handle used to
    /// acknowledge this delivery.
    pub delivery_id: u64,
    pub source_id: u64,
    pub message_id: u64,
    pub correlation_id: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub durable: bool,
    pub message_type: String,
    pub content_type: String,
    pub content_encoding: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, serde_json::Value>,
}

/// Governs how a `Subscriber`'s workers drain on shutdown. Enforced
/// between batches in the worker's handler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownStrategy {
    /// Exit before the next batch; no final flush.
    Immediate,
    /// Finish and acknowledge the batch currently being built, then exit.
    CurrentBatch,
    /// Keep reading and delivering until the stream itself ends.
    #[default]
    Drain,
}

/// Immutable configuration for one consumer group. `worker_count` is
/// implicit in `handler_count` — the design's "one handler, one worker"
/// rule: a `Subscription` with N handlers spawns N workers sharing one
/// stream.
#[derive(Clone)]
pub struct Subscription {
    pub name: String,
    pub stream_name: String,
    pub topics: Vec<String>,
    pub handler_count: usize,
    pub buffer_capacity: u16,
    pub batch_capacity: usize,
    pub full_delivery_to_handler: bool,
    pub buffer_delay_between_batches: Duration,
    pub shutdown_strategy: ShutdownStrategy,
    pub shutdown_timeout: Duration,
    pub establish_topology: bool,
    pub reconnect_delay: Duration,
}

impl Subscription {
    pub fn builder(name: impl Into<String>, stream_name: impl Into<String>) -> SubscriptionBuilder {
        SubscriptionBuilder::new(name, stream_name)
    }

    /// Whether the stream this subscription opens is the sole consumer
    /// of its queue — exactly when there is at most one handler.
    pub fn is_exclusive(&self) -> bool {
        self.handler_count <= 1
    }

    /// Derive the `StreamConfig` a `Reader` needs to open this
    /// subscription's stream. `buffer_capacity` is silently raised to the
    /// handler count when smaller, so every handler has room for at
    /// least one in-flight delivery.
    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            establish_topology: self.establish_topology,
            exclusive_stream: self.is_exclusive(),
            buffer_capacity: self.buffer_capacity.max(self.handler_count as u16),
            stream_name: self.stream_name.clone(),
            topics: self.topics.clone(),
        }
    }
}

/// Builder for `Subscription`, built up via chained setters rather than
/// a variadic options list.
pub struct SubscriptionBuilder {
    name: String,
    stream_name: String,
    topics: Vec<String>,
    handler_count: usize,
    buffer_capacity: u16,
    batch_capacity: usize,
    full_delivery_to_handler: bool,
    buffer_delay_between_batches: Duration,
    shutdown_strategy: ShutdownStrategy,
    shutdown_timeout: Duration,
    establish_topology: bool,
    reconnect_delay: Duration,
}

impl SubscriptionBuilder {
    pub fn new(name: impl Into<String>, stream_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream_name: stream_name.into(),
            topics: Vec::new(),
            handler_count: 1,
            buffer_capacity: 1,
            batch_capacity: 1,
            full_delivery_to_handler: false,
            buffer_delay_between_batches: Duration::ZERO,
            shutdown_strategy: ShutdownStrategy::default(),
            shutdown_timeout: Duration::from_secs(5),
            establish_topology: false,
            reconnect_delay: Duration::from_secs(1),
        }
    }

    pub fn topics(mut self, topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Number of worker handlers (= parallelism) sharing the stream.
    pub fn handler_count(mut self, count: usize) -> Self {
        self.handler_count = count.max(1);
        self
    }

    pub fn buffer_capacity(mut self, capacity: u16) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn batch_capacity(mut self, capacity: usize) -> Self {
        self.batch_capacity = capacity.max(1);
        self
    }

    pub fn full_delivery_to_handler(mut self, value: bool) -> Self {
        self.full_delivery_to_handler = value;
        self
    }

    pub fn buffer_delay_between_batches(mut self, delay: Duration) -> Self {
        self.buffer_delay_between_batches = delay;
        self
    }

    pub fn shutdown_strategy(mut self, strategy: ShutdownStrategy, timeout: Duration) -> Self {
        self.shutdown_strategy = strategy;
        self.shutdown_timeout = timeout;
        self
    }

    pub fn establish_topology(mut self, value: bool) -> Self {
        self.establish_topology = value;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn build(self) -> Subscription {
        Subscription {
            name: self.name,
            stream_name: self.stream_name,
            topics: self.topics,
            handler_count: self.handler_count,
            buffer_capacity: self.buffer_capacity,
            batch_capacity: self.batch_capacity,
            full_delivery_to_handler: self.full_delivery_to_handler,
            buffer_delay_between_batches: self.buffer_delay_between_batches,
            shutdown_strategy: self.shutdown_strategy,
            shutdown_timeout: self.shutdown_timeout,
            establish_topology: self.establish_topology,
            reconnect_delay: self.reconnect_delay,
        }
    }
}

/// What a `Reader` needs to open a `Stream`; derived from a `Subscription`
/// via [`Subscription::stream_config`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub establish_topology: bool,
    pub exclusive_stream: bool,
    pub buffer_capacity: u16,
    pub stream_name: String,
    pub topics: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_when_single_handler() {
        let sub = Subscription::builder("orders", "orders.q").handler_count(1).build();
        assert!(sub.is_exclusive());
        assert!(sub.stream_config().exclusive_stream);
    }

    #[test]
    fn shared_when_multiple_handlers() {
        let sub = Subscription::builder("orders", "orders.q").handler_count(3).build();
        assert!(!sub.is_exclusive());
        assert!(!sub.stream_config().exclusive_stream);
    }

    #[test]
    fn buffer_capacity_auto_expands_to_handler_count() {
        let sub = Subscription::builder("orders", "orders.q")
            .handler_count(4)
            .buffer_capacity(1)
            .build();
        assert_eq!(sub.stream_config().buffer_capacity, 4);
    }

    #[test]
    fn buffer_capacity_not_shrunk_when_already_larger() {
        let sub = Subscription::builder("orders", "orders.q")
            .handler_count(2)
            .buffer_capacity(10)
            .build();
        assert_eq!(sub.stream_config().buffer_capacity, 10);
    }

    #[test]
    fn default_shutdown_strategy_is_drain() {
        let sub = Subscription::builder("orders", "orders.q").build();
        assert_eq!(sub.shutdown_strategy, ShutdownStrategy::Drain);
    }
}
