//! MessageSource port - one consumption context on a broker queue.

use async_trait::async_trait;

use crate::domain::{AckError, ConnectError, InboundMessage, ReceiveError};

/// An open receiver on a queue.
///
/// # Lifecycle
/// `Unopened -> Open -> Closed`. A source is `Open` once returned by
/// [`SourceConnector::connect`], and `Closed` after [`MessageSource::close`] or
/// after `receive_next` has failed. A source that returned a `ReceiveError` is
/// never polled again.
///
/// # Settlement
/// Each token handed out with an [`InboundMessage`] is moved back into exactly
/// one of `acknowledge` or `reject`.
#[async_trait]
pub trait MessageSource: Send {
    /// Acknowledgment token tied to this consumption context.
    type Ack: Send;

    /// Wait for the next message. No timeout; cancellation is only by dropping
    /// the future between messages.
    async fn receive_next(&mut self) -> Result<InboundMessage<Self::Ack>, ReceiveError>;

    /// Tell the broker the message was consumed and may be removed.
    async fn acknowledge(&mut self, ack: Self::Ack) -> Result<(), AckError>;

    /// Tell the broker the message could not be processed (dead-letter).
    async fn reject(&mut self, ack: Self::Ack) -> Result<(), AckError>;

    /// Release the receiver and everything it holds on the broker.
    async fn close(self)
    where
        Self: Sized;
}

/// Opens fresh consumption contexts against a configured queue.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    type Source: MessageSource;

    /// Dial once. No retry, no backoff.
    async fn connect(&self) -> Result<Self::Source, ConnectError>;
}
