//! App - application layer: ports wired into the relay's behaviour.
//!
//! # Components
//! - **DeliveryLoop**: receive → forward → acknowledge, one message at a time
//! - **Relay**: owns connector + loop, optional reconnect with backoff
//! - **RetryPolicy**: exponential backoff shared by forwarding and reconnects
//! - **publisher**: one-shot publish of a sample record

pub mod delivery_loop;
pub mod publisher;
pub mod relay;
pub mod retry;

pub use self::delivery_loop::{AckPolicy, DeliveryLoop, Settlement};
pub use self::publisher::{PUBLISH_TIMEOUT, publish_user};
pub use self::relay::Relay;
pub use self::retry::RetryPolicy;
