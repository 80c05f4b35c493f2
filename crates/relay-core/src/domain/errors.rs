//! Errors - failure classes of the relay.
//!
//! Fatal: [`ConfigError`], [`ConnectError`] at startup, [`ReceiveError`].
//! Everything else is logged by the delivery loop and the loop moves on.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Broker connection could not be established.
#[derive(Debug, Clone, Error)]
pub enum ConnectError {
    #[error("failed to open connection to {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    #[error("failed to begin session: {reason}")]
    Session { reason: String },

    #[error("failed to attach receiver to queue '{queue}': {reason}")]
    Receiver { queue: String, reason: String },

    #[error("failed to attach sender to address '{address}': {reason}")]
    Sender { address: String, reason: String },
}

/// The broker channel failed while waiting for the next message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    #[error("broker channel closed")]
    ChannelClosed,

    #[error("failed to receive message: {0}")]
    Link(String),
}

/// A disposition (accept or reject) was not confirmed by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AckError {
    #[error("broker refused disposition for message {seq}: {reason}")]
    Disposition { seq: u64, reason: String },
}

/// Forwarding one payload to the downstream sink failed.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to connect to sink {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to sink {addr} after {timeout:?}")]
    DialTimeout { addr: String, timeout: Duration },

    #[error("failed to send data to sink {addr}: {source}")]
    Write {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out writing to sink {addr} after {timeout:?}")]
    WriteTimeout { addr: String, timeout: Duration },
}

impl ForwardError {
    /// True when no connection to the sink was established.
    pub fn is_dial(&self) -> bool {
        matches!(self, Self::Dial { .. } | Self::DialTimeout { .. })
    }
}

/// The one-shot publisher failed.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("failed to encode message body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to send message: {0}")]
    Send(String),

    #[error("broker did not accept message: {0}")]
    NotAccepted(String),

    #[error("publish did not complete within {0:?}")]
    Timeout(Duration),
}

/// Invalid process configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Fatal errors that end [`Relay::run`](crate::app::Relay::run).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Receive(#[from] ReceiveError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::dial(ForwardError::Dial { addr: "sink:1".into(), source: io::ErrorKind::ConnectionRefused.into() }, true)]
    #[case::dial_timeout(ForwardError::DialTimeout { addr: "sink:1".into(), timeout: Duration::from_secs(5) }, true)]
    #[case::write(ForwardError::Write { addr: "sink:1".into(), source: io::ErrorKind::BrokenPipe.into() }, false)]
    #[case::write_timeout(ForwardError::WriteTimeout { addr: "sink:1".into(), timeout: Duration::from_secs(5) }, false)]
    fn forward_error_classification(#[case] err: ForwardError, #[case] dial: bool) {
        assert_eq!(err.is_dial(), dial);
        assert!(err.to_string().contains("sink:1"));
    }

    #[test]
    fn relay_error_is_transparent() {
        let err = RelayError::from(ReceiveError::ChannelClosed);
        assert_eq!(err.to_string(), "broker channel closed");
    }
}
