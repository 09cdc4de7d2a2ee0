use std::collections::VecDeque;
use std::sync::atomic::{
    AtomicU64,
    Ordering,
};
use std::sync::Mutex;

use async_trait::async_trait;
use lxp_commons::Envelope;

use crate::error::{
    TransportError,
    TransportResult,
};
use crate::traits::{
    AckToken,
    RawDelivery,
    Transport,
};

/// In-process fake `Transport`, the way `kftray-server`'s proxy tests
/// substitute a hand-written `MockHandler` for `ProxyHandler` instead of a
/// mocking framework. Deliveries are queued with `enqueue`/`enqueue_fatal`;
/// replies, publications, and acks are captured for assertions.
#[derive(Default)]
pub struct InMemoryTransport {
    inbox: Mutex<VecDeque<TransportResult<RawDelivery>>>,
    next_ack: AtomicU64,
    replies: Mutex<Vec<(AckToken, Envelope)>>,
    publications: Mutex<Vec<(String, Envelope)>>,
    acked: Mutex<Vec<AckToken>>,
    reconnects: AtomicU64,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a fresh ack token for a delivery about to be enqueued.
    pub fn next_ack_token(&self) -> AckToken {
        AckToken(self.next_ack.fetch_add(1, Ordering::SeqCst))
    }

    pub fn enqueue(&self, delivery: RawDelivery) {
        self.inbox.lock().unwrap().push_back(Ok(delivery));
    }

    /// Queues a fatal error to be returned by the next `recv()`, simulating
    /// a dropped connection that the adapter must reconnect past.
    pub fn enqueue_fatal(&self, reason: impl Into<String>) {
        self.inbox
            .lock()
            .unwrap()
            .push_back(Err(TransportError::Fatal(reason.into())));
    }

    pub fn replies(&self) -> Vec<(AckToken, Envelope)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn publications(&self) -> Vec<(String, Envelope)> {
        self.publications.lock().unwrap().clone()
    }

    pub fn acked(&self) -> Vec<AckToken> {
        self.acked.lock().unwrap().clone()
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn recv(&self) -> TransportResult<Option<RawDelivery>> {
        match self.inbox.lock().unwrap().pop_front() {
            Some(Ok(delivery)) => Ok(Some(delivery)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn reply(&self, delivery: &RawDelivery, envelope: Envelope) -> TransportResult<()> {
        self.replies.lock().unwrap().push((delivery.ack, envelope));
        Ok(())
    }

    async fn publish(&self, routing_key: &str, envelope: Envelope) -> TransportResult<()> {
        self.publications
            .lock()
            .unwrap()
            .push((routing_key.to_string(), envelope));
        Ok(())
    }

    async fn ack(&self, ack: AckToken) -> TransportResult<()> {
        self.acked.lock().unwrap().push(ack);
        Ok(())
    }

    async fn reconnect(&self) -> TransportResult<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
