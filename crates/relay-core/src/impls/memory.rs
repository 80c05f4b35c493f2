//! InMemoryBroker - in-process queue for development and tests.
//!
//! - `InMemoryBroker` is the publishing handle; cloning it shares the queue.
//! - `InMemoryConnector` opens `InMemorySource`s on that queue. The queue
//!   outlives every source, so messages not yet received survive a reconnect.
//! - Every settlement lands in a [`Ledger`] that tests can inspect.
//!
//! Dropping every `InMemoryBroker` handle closes the channel; a source waiting
//! on it then fails with [`ReceiveError::ChannelClosed`].
//!
//! `RecordingForwarder` is the matching in-memory sink.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::domain::{AckError, ConnectError, ForwardError, ForwardResult, InboundMessage, ReceiveError};
use crate::ports::{Forwarder, MessageSource, SourceConnector};

enum Scripted {
    Message { seq: u64, payload: Bytes },
    Fail(ReceiveError),
}

/// What happened to the messages on the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    pub received: Vec<u64>,
    pub acknowledged: Vec<u64>,
    pub rejected: Vec<u64>,
    /// Settlements the broker refused (scripted with [`InMemoryBroker::fail_settlement`]).
    pub refused: Vec<u64>,
    pub sources_opened: usize,
    pub sources_closed: usize,
}

#[derive(Default)]
struct Shared {
    ledger: Ledger,
    next_seq: u64,
    refuse: HashSet<u64>,
    connect_failures: VecDeque<ConnectError>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct InMemoryBroker {
    tx: mpsc::UnboundedSender<Scripted>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Scripted>>>,
    shared: Arc<Mutex<Shared>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    /// Enqueue a message and return the sequence number it will carry.
    pub fn publish(&self, payload: impl Into<Bytes>) -> u64 {
        let seq = {
            let mut shared = lock(&self.shared);
            shared.next_seq += 1;
            shared.next_seq
        };
        // Cannot fail: `self` holds a receiver handle.
        let _ = self.tx.send(Scripted::Message {
            seq,
            payload: payload.into(),
        });
        seq
    }

    /// Make the receive that reaches this point of the queue fail.
    pub fn fail_receive(&self, err: ReceiveError) {
        let _ = self.tx.send(Scripted::Fail(err));
    }

    /// Make the broker refuse the disposition of message `seq`.
    pub fn fail_settlement(&self, seq: u64) {
        lock(&self.shared).refuse.insert(seq);
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_connects(&self, n: usize) {
        let mut shared = lock(&self.shared);
        for _ in 0..n {
            shared.connect_failures.push_back(ConnectError::Connection {
                endpoint: "memory".to_string(),
                reason: "connection refused".to_string(),
            });
        }
    }

    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector {
            rx: Arc::clone(&self.rx),
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn ledger(&self) -> Ledger {
        lock(&self.shared).ledger.clone()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens [`InMemorySource`]s. Holds no sender, so it does not keep the channel open.
#[derive(Clone)]
pub struct InMemoryConnector {
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Scripted>>>,
    shared: Arc<Mutex<Shared>>,
}

impl InMemoryConnector {
    /// Open a source without going through the port (for tests).
    pub fn open(&self) -> InMemorySource {
        lock(&self.shared).ledger.sources_opened += 1;
        InMemorySource {
            rx: Arc::clone(&self.rx),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Same ledger as [`InMemoryBroker::ledger`], without keeping the queue open.
    pub fn ledger(&self) -> Ledger {
        lock(&self.shared).ledger.clone()
    }
}

#[async_trait]
impl SourceConnector for InMemoryConnector {
    type Source = InMemorySource;

    async fn connect(&self) -> Result<InMemorySource, ConnectError> {
        if let Some(err) = lock(&self.shared).connect_failures.pop_front() {
            return Err(err);
        }
        Ok(self.open())
    }
}

/// Token for one in-memory message. Not `Clone`, so it settles once.
#[derive(Debug)]
pub struct MemoryAck {
    seq: u64,
}

pub struct InMemorySource {
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Scripted>>>,
    shared: Arc<Mutex<Shared>>,
}

impl InMemorySource {
    fn settle(&self, seq: u64, accept: bool) -> Result<(), AckError> {
        let mut shared = lock(&self.shared);
        if shared.refuse.remove(&seq) {
            shared.ledger.refused.push(seq);
            return Err(AckError::Disposition {
                seq,
                reason: "disposition refused".to_string(),
            });
        }
        if accept {
            shared.ledger.acknowledged.push(seq);
        } else {
            shared.ledger.rejected.push(seq);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    type Ack = MemoryAck;

    async fn receive_next(&mut self) -> Result<InboundMessage<MemoryAck>, ReceiveError> {
        let next = self.rx.lock().await.recv().await;
        match next {
            Some(Scripted::Message { seq, payload }) => {
                lock(&self.shared).ledger.received.push(seq);
                Ok(InboundMessage::new(seq, payload, MemoryAck { seq }))
            }
            Some(Scripted::Fail(err)) => Err(err),
            None => Err(ReceiveError::ChannelClosed),
        }
    }

    async fn acknowledge(&mut self, ack: MemoryAck) -> Result<(), AckError> {
        self.settle(ack.seq, true)
    }

    async fn reject(&mut self, ack: MemoryAck) -> Result<(), AckError> {
        self.settle(ack.seq, false)
    }

    async fn close(self) {
        lock(&self.shared).ledger.sources_closed += 1;
    }
}

#[derive(Default)]
struct Recorded {
    frames: Vec<Bytes>,
    failures: VecDeque<ForwardError>,
    attempts: usize,
}

/// Forwarder that keeps every delivered payload in memory.
///
/// Clones share the same recording, so a test can keep one handle while the
/// delivery loop owns another.
#[derive(Clone, Default)]
pub struct RecordingForwarder {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next forward call with `err` (queued, one per call).
    pub fn fail_next(&self, err: ForwardError) {
        self.recorded().failures.push_back(err);
    }

    /// Payloads delivered so far, in order.
    pub fn frames(&self) -> Vec<Bytes> {
        self.recorded().frames.clone()
    }

    /// Forward calls made so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.recorded().attempts
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(&self, payload: &[u8]) -> ForwardResult {
        let mut recorded = self.recorded();
        recorded.attempts += 1;
        if let Some(err) = recorded.failures.pop_front() {
            return Err(err);
        }
        recorded.frames.push(Bytes::copy_from_slice(payload));
        Ok(())
    }

    fn destination(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_receive_acknowledge() {
        let broker = InMemoryBroker::new();
        let mut source = broker.connector().open();

        let seq = broker.publish(&b"hello"[..]);
        let message = source.receive_next().await.unwrap();
        assert_eq!(message.seq(), seq);
        assert_eq!(message.payload().as_ref(), b"hello");

        let (_, ack) = message.into_parts();
        source.acknowledge(ack).await.unwrap();
        assert_eq!(broker.ledger().acknowledged, vec![seq]);
    }

    #[tokio::test]
    async fn receive_waits_for_publish() {
        let broker = InMemoryBroker::new();
        let mut source = broker.connector().open();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            publisher.publish(&b"late"[..]);
        });

        let message = source.receive_next().await.unwrap();
        assert_eq!(message.payload().as_ref(), b"late");
    }

    #[tokio::test]
    async fn dropping_every_broker_handle_closes_the_channel() {
        let broker = InMemoryBroker::new();
        let mut source = broker.connector().open();
        broker.publish(&b"last"[..]);
        drop(broker);

        assert!(source.receive_next().await.is_ok());
        assert_eq!(
            source.receive_next().await.unwrap_err(),
            ReceiveError::ChannelClosed
        );
    }

    #[tokio::test]
    async fn refused_settlement_is_reported_once() {
        let broker = InMemoryBroker::new();
        let mut source = broker.connector().open();
        let seq = broker.publish(&b"x"[..]);
        broker.fail_settlement(seq);

        let (_, ack) = source.receive_next().await.unwrap().into_parts();
        let err = source.acknowledge(ack).await.unwrap_err();
        assert_eq!(err, AckError::Disposition { seq, reason: "disposition refused".into() });

        let ledger = broker.ledger();
        assert_eq!(ledger.refused, vec![seq]);
        assert!(ledger.acknowledged.is_empty());
    }

    #[tokio::test]
    async fn queue_survives_reconnect() {
        let broker = InMemoryBroker::new();
        let connector = broker.connector();
        broker.publish(&b"one"[..]);
        broker.fail_receive(ReceiveError::Link("detached".into()));
        broker.publish(&b"two"[..]);

        let mut first = connector.connect().await.unwrap();
        assert!(first.receive_next().await.is_ok());
        assert!(first.receive_next().await.is_err());
        first.close().await;

        let mut second = connector.connect().await.unwrap();
        let message = second.receive_next().await.unwrap();
        assert_eq!(message.payload().as_ref(), b"two");

        let ledger = broker.ledger();
        assert_eq!(ledger.sources_opened, 2);
        assert_eq!(ledger.sources_closed, 1);
    }

    #[tokio::test]
    async fn recording_forwarder_replays_scripted_failures() {
        let forwarder = RecordingForwarder::new();
        forwarder.fail_next(ForwardError::DialTimeout {
            addr: "memory".into(),
            timeout: Duration::from_secs(1),
        });

        assert!(forwarder.forward(b"a").await.is_err());
        assert!(forwarder.forward(b"b").await.is_ok());
        assert_eq!(forwarder.attempts(), 2);
        assert_eq!(forwarder.frames(), vec![Bytes::from_static(b"b")]);
    }

    #[tokio::test]
    async fn scripted_connect_failures_are_consumed_in_order() {
        let broker = InMemoryBroker::new();
        broker.fail_connects(1);
        let connector = broker.connector();

        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_ok());
    }
}
