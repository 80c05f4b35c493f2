//! Relay - owns the broker connector and the delivery loop for the process
//! lifetime, and decides what happens when the broker side fails.
//!
//! With the default reconnect policy (no attempts) a connect failure or a
//! receive failure ends [`Relay::run`] with an error, and the process is
//! expected to be restarted by its supervisor. With attempts configured, the
//! failed consumption context is closed and a new one (connection, session,
//! receiver) is built from scratch after an exponential backoff.

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::delivery_loop::{DeliveryLoop, shutdown_requested};
use super::retry::RetryPolicy;
use crate::domain::{DeliveryCounts, RelayError};
use crate::ports::{Forwarder, MessageSource, SourceConnector};

pub struct Relay<C, F> {
    connector: C,
    delivery: DeliveryLoop<F>,
    reconnect: RetryPolicy,
}

enum Backoff {
    Elapsed,
    Shutdown,
}

impl<C, F> Relay<C, F>
where
    C: SourceConnector,
    F: Forwarder,
{
    pub fn new(connector: C, delivery: DeliveryLoop<F>) -> Self {
        Self {
            connector,
            delivery,
            reconnect: RetryPolicy::none(),
        }
    }

    /// Allow up to `policy.max_attempts` consecutive reconnects.
    pub fn with_reconnect(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn counts(&self) -> &DeliveryCounts {
        self.delivery.counts()
    }

    /// Run until shutdown (`Ok`) or a broker failure that the reconnect policy
    /// does not cover (`Err`).
    ///
    /// The consecutive failure counter is reset once a consumption context has
    /// delivered at least one message.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<DeliveryCounts, RelayError> {
        let mut failures = 0;

        loop {
            let connected = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => None,
                connected = self.connector.connect() => Some(connected),
            };
            let Some(connected) = connected else {
                return Ok(self.finish());
            };

            let mut source = match connected {
                Ok(source) => source,
                Err(e) => {
                    match self.backoff(&mut failures, e.into(), &mut shutdown).await? {
                        Backoff::Elapsed => continue,
                        Backoff::Shutdown => return Ok(self.finish()),
                    }
                }
            };
            info!("connected to broker");

            let received_before = self.delivery.counts().received;
            let result = self.delivery.run(&mut source, &mut shutdown).await;
            source.close().await;

            if self.delivery.counts().received > received_before {
                failures = 0;
            }

            match result {
                Ok(()) => return Ok(self.finish()),
                Err(e) => {
                    error!(error = %e, "broker channel failed");
                    match self.backoff(&mut failures, e.into(), &mut shutdown).await? {
                        Backoff::Elapsed => {}
                        Backoff::Shutdown => return Ok(self.finish()),
                    }
                }
            }
        }
    }

    /// Wait before the next reconnect, or give `err` back when the policy is used up.
    async fn backoff(
        &mut self,
        failures: &mut u32,
        err: RelayError,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Backoff, RelayError> {
        if !self.reconnect.allows(*failures) {
            return Err(err);
        }
        *failures += 1;
        self.delivery.record_reconnect();

        let delay = self.reconnect.next_delay_jittered(*failures);
        warn!(
            error = %err,
            attempt = *failures,
            max_attempts = self.reconnect.max_attempts,
            ?delay,
            "reconnecting to broker"
        );

        tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => Ok(Backoff::Shutdown),
            _ = sleep(delay) => Ok(Backoff::Elapsed),
        }
    }

    fn finish(&self) -> DeliveryCounts {
        let counts = self.delivery.counts().clone();
        let summary = serde_json::to_string(&counts).unwrap_or_default();
        info!(counts = %summary, "relay stopped");
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConnectError, ReceiveError};
    use crate::impls::{InMemoryBroker, RecordingForwarder};
    use std::time::Duration;

    fn relay(broker: &InMemoryBroker) -> Relay<crate::impls::InMemoryConnector, RecordingForwarder> {
        Relay::new(broker.connector(), DeliveryLoop::new(RecordingForwarder::new()))
    }

    #[tokio::test]
    async fn connect_failure_is_fatal_without_reconnect() {
        let broker = InMemoryBroker::new();
        broker.fail_connects(1);
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let err = relay(&broker).run(shutdown).await.unwrap_err();
        assert!(matches!(err, RelayError::Connect(ConnectError::Connection { .. })));
        assert_eq!(broker.ledger().sources_opened, 0);
    }

    #[tokio::test]
    async fn receive_failure_is_fatal_without_reconnect() {
        let broker = InMemoryBroker::new();
        let seq = broker.publish(&b"only"[..]);
        broker.fail_receive(ReceiveError::Link("detached".into()));
        broker.publish(&b"never"[..]);
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let err = relay(&broker).run(shutdown).await.unwrap_err();
        assert!(matches!(err, RelayError::Receive(ReceiveError::Link(_))));

        let ledger = broker.ledger();
        assert_eq!(ledger.acknowledged, vec![seq]);
        assert_eq!(ledger.sources_opened, 1);
        assert_eq!(ledger.sources_closed, 1);
    }

    #[tokio::test]
    async fn reconnects_with_a_fresh_source_after_receive_failure() {
        let broker = InMemoryBroker::new();
        let first = broker.publish(&b"one"[..]);
        broker.fail_receive(ReceiveError::Link("detached".into()));
        let second = broker.publish(&b"two"[..]);
        broker.fail_connects(1);

        let connector = broker.connector();
        let forwarder = RecordingForwarder::new();
        let mut relay = Relay::new(connector.clone(), DeliveryLoop::new(forwarder.clone()))
            .with_reconnect(RetryPolicy::exponential(2, Duration::from_millis(1)));

        // Once the queue is closed every fresh context fails at once and
        // receives nothing, so the remaining two reconnects are spent on it.
        drop(broker);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        let err = relay.run(shutdown).await.unwrap_err();
        assert!(matches!(err, RelayError::Receive(ReceiveError::ChannelClosed)));

        let ledger = connector.ledger();
        assert_eq!(ledger.acknowledged, vec![first, second]);
        assert_eq!(ledger.sources_opened, 4);
        assert_eq!(ledger.sources_closed, 4);
        assert_eq!(forwarder.frames().len(), 2);
        assert_eq!(relay.counts().reconnects, 4);
    }

    #[tokio::test]
    async fn reconnect_attempts_are_bounded() {
        let broker = InMemoryBroker::new();
        broker.fail_connects(5);
        let mut relay = relay(&broker).with_reconnect(RetryPolicy::exponential(3, Duration::from_millis(1)));
        let (_shutdown_tx, shutdown) = watch::channel(false);

        let err = relay.run(shutdown).await.unwrap_err();
        assert!(matches!(err, RelayError::Connect(_)));
        assert_eq!(relay.counts().reconnects, 3);
    }

    #[tokio::test]
    async fn shutdown_returns_counts() {
        let broker = InMemoryBroker::new();
        broker.publish(&b"a"[..]);
        broker.publish(&b"b"[..]);
        let mut relay = relay(&broker);
        let (shutdown_tx, shutdown) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            let _ = shutdown_tx.send(true);
        });

        let counts = relay.run(shutdown).await.unwrap();
        stopper.await.unwrap();

        assert_eq!(counts.received, 2);
        assert_eq!(counts.acknowledged, 2);
        assert_eq!(broker.ledger().sources_closed, 1);
    }
}
