//! Forwarder port - delivery of one payload to the downstream sink.

use async_trait::async_trait;

use crate::domain::ForwardResult;

#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Deliver `payload` as a single frame. No retry.
    async fn forward(&self, payload: &[u8]) -> ForwardResult;

    /// Human readable destination, used in log fields.
    fn destination(&self) -> &str;
}
