//! Publisher port - one-shot send of a message body to a broker address.

use async_trait::async_trait;

use crate::domain::PublishError;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Send `body` and wait until the broker accepted it.
    async fn publish(&self, body: Vec<u8>) -> Result<(), PublishError>;

    /// Target address (queue or topic), used in log fields.
    fn address(&self) -> &str;
}
