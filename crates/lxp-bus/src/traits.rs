use async_trait::async_trait;
use lxp_commons::Envelope;

use crate::error::TransportResult;

/// Opaque handle a transport hands back with each delivery so the adapter
/// can ack it later without the transport exposing its own delivery-tag
/// type. Deliberately `Copy` — acking happens after the handler returns,
/// well past any borrow of the delivery itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckToken(pub u64);

/// A message as it arrives off the bus, before header parsing.
///
/// `headers` is left as a raw JSON value rather than pre-parsed into
/// `lxp_commons::MessageHeaders` because spec.md §4.6 step 1 ("parse
/// headers, failure => ValidationError") is part of the adapter's own
/// contract, not the transport's — a transport that handed back an
/// already-typed `MessageHeaders` would make that failure mode
/// unreachable. `content_type`, `reply_to`, `correlation_id`, and
/// `user_id` mirror AMQP's `BasicProperties`, the delivery properties the
/// Python original reads directly off `properties.*` rather than out of
/// the headers map.
#[derive(Debug, Clone)]
pub struct RawDelivery {
    pub headers: serde_json::Value,
    pub content_type: String,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub user_id: Option<String>,
    pub body: serde_json::Value,
    pub ack: AckToken,
}

/// Generic message-bus transport. spec.md §1 treats the bus transport
/// itself as an external collaborator ("out of scope"); `BusAdapter` is
/// written only against this trait so the transport can be a real broker
/// client or, in tests, `InMemoryTransport`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Waits for the next delivery. `Ok(None)` means the transport drained
    /// cleanly with nothing fatal (used by tests and graceful shutdown);
    /// `Err(Fatal)` means the consumer must be torn down and recreated via
    /// `reconnect`.
    async fn recv(&self) -> TransportResult<Option<RawDelivery>>;

    /// Sends `envelope` back to whichever reply destination `delivery`
    /// carries (its `reply_to`/`correlation_id`).
    async fn reply(&self, delivery: &RawDelivery, envelope: Envelope) -> TransportResult<()>;

    /// Publishes `envelope` on `routing_key` for downstream consumers
    /// (spec.md §6's `instance-creation` event).
    async fn publish(&self, routing_key: &str, envelope: Envelope) -> TransportResult<()>;

    /// Acknowledges the delivery. At-least-once semantics: every delivery
    /// must eventually be acked exactly once per consumer session
    /// (spec.md §8).
    async fn ack(&self, ack: AckToken) -> TransportResult<()>;

    /// Tears down and recreates the underlying consumer/connection after a
    /// fatal error. No in-flight delivery is acknowledged across this call.
    async fn reconnect(&self) -> TransportResult<()>;
}
