//! Impls - adapters behind the ports.
//!
//! - **AmqpConnector / AmqpSource**: AMQP 1.0 queue receiver (production input)
//! - **AmqpPublisher**: one-shot AMQP sender used by the `publish` command
//! - **TcpForwarder**: newline-framed TCP sink (production output)
//! - **InMemoryBroker / RecordingForwarder**: in-process queue and sink (tests, local runs)

pub mod amqp;
pub mod memory;
pub mod tcp;

pub use self::amqp::{AmqpConnector, AmqpPublisher, AmqpSource};
pub use self::memory::{InMemoryBroker, InMemoryConnector, InMemorySource, Ledger, RecordingForwarder};
pub use self::tcp::TcpForwarder;
