//! Observer callbacks injected at construction, separate from `tracing`.
//!
//! A callback surface for connection/dispatch/acknowledgment lifecycle
//! events, distinct from structured logging. Every method has a no-op
//! default so callers only override what they care about.

/// Lifecycle observer for the AMQP adapter and the outbox forwarder.
pub trait Monitor: Send + Sync {
    fn connection_opened(&self, _err: Option<&str>) {}
    fn connection_closed(&self) {}
    fn dispatch_published(&self, _count: usize) {}
    fn delivery_received(&self) {}
    fn delivery_acknowledged(&self, _count: usize, _err: Option<&str>) {}
    fn transaction_committed(&self, _err: Option<&str>) {}
    fn transaction_rolled_back(&self, _err: Option<&str>) {}
    fn message_published(&self, _count: usize) {}
    fn message_confirmed(&self, _count: usize) {}
}

/// Default monitor that observes nothing; used where no `Monitor` was
/// supplied at construction.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl Monitor for NoopMonitor {}
