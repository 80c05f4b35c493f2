//! relay-core
//!
//! Building blocks for a one-way relay from a broker queue to a TCP line sink.
//!
//! # Modules
//! - **domain**: message, error taxonomy, counters, published record
//! - **ports**: traits at the seams (`MessageSource`, `SourceConnector`, `Forwarder`, `Publisher`)
//! - **impls**: AMQP 1.0, TCP and in-memory adapters
//! - **app**: delivery loop, relay supervisor, retry policy, publisher
//! - **config**: environment configuration
//! - **observability**: logging setup

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use self::app::{AckPolicy, DeliveryLoop, Relay, RetryPolicy};
pub use self::config::RelayConfig;
