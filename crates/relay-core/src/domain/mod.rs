//! Domain model (messages, errors, counters, published records).

pub mod counts;
pub mod errors;
pub mod message;
pub mod user;

pub use self::counts::DeliveryCounts;
pub use self::errors::{
    AckError, ConfigError, ConnectError, ForwardError, PublishError, ReceiveError, RelayError,
};
pub use self::message::{ForwardResult, InboundMessage};
pub use self::user::{User, UserView};
