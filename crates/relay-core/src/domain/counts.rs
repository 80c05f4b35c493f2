use serde::Serialize;

/// Running totals kept by the delivery loop and the relay supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryCounts {
    pub received: u64,
    pub forwarded: u64,
    pub forward_failed: u64,
    pub acknowledged: u64,
    pub ack_failed: u64,
    pub dead_lettered: u64,
    pub reconnects: u64,
}
