//! Ports - traits at the seams between the delivery loop and the outside world.
//!
//! - [`MessageSource`] / [`SourceConnector`]: the broker side (AMQP or in-memory)
//! - [`Forwarder`]: the downstream sink (TCP or a test double)
//! - [`Publisher`]: one-shot sender used by the `publish` command

pub mod forwarder;
pub mod message_source;
pub mod publisher;

pub use self::forwarder::Forwarder;
pub use self::message_source::{MessageSource, SourceConnector};
pub use self::publisher::Publisher;
