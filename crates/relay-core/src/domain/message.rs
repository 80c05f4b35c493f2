//! InboundMessage - one message taken off the broker queue.

use bytes::Bytes;

use super::errors::ForwardError;

/// Outcome of forwarding one payload to the downstream sink.
///
/// Only logged by the delivery loop under the default acknowledgment policy.
pub type ForwardResult = Result<(), ForwardError>;

/// A message received from a [`MessageSource`](crate::ports::MessageSource).
///
/// The source creates both the payload and the acknowledgment token `A`.
/// The token is moved back into the source when the message is settled, so a
/// message cannot be acknowledged twice.
#[derive(Debug)]
pub struct InboundMessage<A> {
    seq: u64,
    payload: Bytes,
    ack: A,
}

impl<A> InboundMessage<A> {
    pub fn new(seq: u64, payload: impl Into<Bytes>, ack: A) -> Self {
        Self {
            seq,
            payload: payload.into(),
            ack,
        }
    }

    /// Per-source sequence number, starting at 1.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Split into payload and acknowledgment token.
    pub fn into_parts(self) -> (Bytes, A) {
        (self.payload, self.ack)
    }
}
