//! DeliveryLoop - receive → forward → acknowledge, one message at a time.
//!
//! # Flow
//! 1. `MessageSource::receive_next()`. A `ReceiveError` ends the loop.
//! 2. `Forwarder::forward()` with the payload. The outcome is logged.
//! 3. `MessageSource::acknowledge()`. An `AckError` is logged and the loop goes on
//!    (the broker may redeliver the message later).
//!
//! Under [`AckPolicy::Always`] step 3 does not depend on step 2: a message whose
//! forward failed is still acknowledged and its payload never reaches the sink.

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::domain::{DeliveryCounts, InboundMessage, ReceiveError};
use crate::ports::{Forwarder, MessageSource};

/// When a received message is acknowledged.
#[derive(Debug, Clone, PartialEq)]
pub enum AckPolicy {
    /// Forward once, then acknowledge whatever happened.
    Always,

    /// Forward up to `max_attempts` times with backoff; acknowledge on success,
    /// reject (dead-letter) once the attempts are used up.
    OnSuccess(RetryPolicy),
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self::Always
    }
}

/// How one message was settled on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acknowledged,
    Rejected,
    /// The broker did not confirm the disposition.
    Refused,
}

/// Resolves once shutdown was requested or the shutdown sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

pub struct DeliveryLoop<F> {
    forwarder: F,
    policy: AckPolicy,
    counts: DeliveryCounts,
}

impl<F: Forwarder> DeliveryLoop<F> {
    pub fn new(forwarder: F) -> Self {
        Self {
            forwarder,
            policy: AckPolicy::Always,
            counts: DeliveryCounts::default(),
        }
    }

    pub fn with_policy(mut self, policy: AckPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn counts(&self) -> &DeliveryCounts {
        &self.counts
    }

    pub(crate) fn record_reconnect(&mut self) {
        self.counts.reconnects += 1;
    }

    /// Drain `source` until it fails or shutdown is requested.
    ///
    /// Shutdown is only observed while waiting for a message; a message already
    /// received always finishes its iteration. Dropping the shutdown sender
    /// counts as a shutdown request.
    pub async fn run<S: MessageSource>(
        &mut self,
        source: &mut S,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ReceiveError> {
        loop {
            let received = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => None,
                received = source.receive_next() => Some(received),
            };

            let Some(received) = received else {
                debug!("shutdown requested, leaving delivery loop");
                return Ok(());
            };

            self.deliver(source, received?).await;
        }
    }

    /// Forward and settle one message.
    pub async fn deliver<S: MessageSource>(
        &mut self,
        source: &mut S,
        message: InboundMessage<S::Ack>,
    ) -> Settlement {
        let seq = message.seq();
        let (payload, ack) = message.into_parts();
        self.counts.received += 1;
        info!(seq, bytes = payload.len(), "received message");
        debug!(seq, payload = %String::from_utf8_lossy(&payload), "message payload");

        match self.policy.clone() {
            AckPolicy::Always => {
                self.forward_once(seq, &payload).await;
                self.acknowledge(source, seq, ack).await
            }
            AckPolicy::OnSuccess(retry) => {
                if self.forward_with_retry(seq, &payload, &retry).await {
                    self.acknowledge(source, seq, ack).await
                } else {
                    self.dead_letter(source, seq, ack).await
                }
            }
        }
    }

    async fn forward_once(&mut self, seq: u64, payload: &Bytes) -> bool {
        match self.forwarder.forward(payload).await {
            Ok(()) => {
                self.counts.forwarded += 1;
                info!(seq, sink = self.forwarder.destination(), "forwarded message");
                true
            }
            Err(e) => {
                self.counts.forward_failed += 1;
                if e.is_dial() {
                    warn!(seq, sink = self.forwarder.destination(), error = %e, "failed to connect to sink");
                } else {
                    warn!(seq, sink = self.forwarder.destination(), error = %e, "failed to send data to sink");
                }
                false
            }
        }
    }

    async fn forward_with_retry(&mut self, seq: u64, payload: &Bytes, retry: &RetryPolicy) -> bool {
        let mut attempts = 0;
        loop {
            attempts += 1;
            if self.forward_once(seq, payload).await {
                return true;
            }
            if !retry.allows(attempts) {
                return false;
            }
            let delay = retry.next_delay_jittered(attempts);
            debug!(seq, attempt = attempts, ?delay, "retrying forward");
            sleep(delay).await;
        }
    }

    async fn acknowledge<S: MessageSource>(&mut self, source: &mut S, seq: u64, ack: S::Ack) -> Settlement {
        match source.acknowledge(ack).await {
            Ok(()) => {
                self.counts.acknowledged += 1;
                debug!(seq, "acknowledged message");
                Settlement::Acknowledged
            }
            Err(e) => {
                self.counts.ack_failed += 1;
                warn!(seq, error = %e, "failed to accept message, broker may redeliver it");
                Settlement::Refused
            }
        }
    }

    async fn dead_letter<S: MessageSource>(&mut self, source: &mut S, seq: u64, ack: S::Ack) -> Settlement {
        match source.reject(ack).await {
            Ok(()) => {
                self.counts.dead_lettered += 1;
                warn!(seq, "forwarding attempts exhausted, message rejected");
                Settlement::Rejected
            }
            Err(e) => {
                self.counts.ack_failed += 1;
                warn!(seq, error = %e, "failed to reject message, broker may redeliver it");
                Settlement::Refused
            }
        }
    }
}
