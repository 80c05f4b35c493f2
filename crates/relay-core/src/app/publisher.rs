//! One-shot publish of a [`User`] record, used to exercise a running relay.

use std::time::Duration;

use tokio::time::timeout;
use tracing::info;

use crate::domain::{PublishError, User};
use crate::ports::Publisher;

/// Overall deadline for dial + send + close.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Encode `user` through its wire view and send it as a single message.
pub async fn publish_user<P: Publisher>(
    publisher: &P,
    user: &User,
    deadline: Duration,
) -> Result<(), PublishError> {
    let body = user.to_wire_json()?;
    info!(
        address = publisher.address(),
        body = %String::from_utf8_lossy(&body),
        "publishing message"
    );

    timeout(deadline, publisher.publish(body))
        .await
        .map_err(|_| PublishError::Timeout(deadline))??;

    info!("message published");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingPublisher {
        bodies: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Publisher for CapturingPublisher {
        async fn publish(&self, body: Vec<u8>) -> Result<(), PublishError> {
            self.bodies.lock().unwrap().push(body);
            Ok(())
        }

        fn address(&self) -> &str {
            "logstash_ingest_queue"
        }
    }

    struct StalledPublisher;

    #[async_trait]
    impl Publisher for StalledPublisher {
        async fn publish(&self, _body: Vec<u8>) -> Result<(), PublishError> {
            std::future::pending::<()>().await;
            Ok(())
        }

        fn address(&self) -> &str {
            "nowhere"
        }
    }

    #[tokio::test]
    async fn publishes_the_wire_view_only() {
        let publisher = CapturingPublisher::default();
        publish_user(&publisher, &User::sample(), PUBLISH_TIMEOUT).await.unwrap();

        let bodies = publisher.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        let body = String::from_utf8(bodies[0].clone()).unwrap();
        assert_eq!(body, r#"{"name":"Alice","age":30,"email":"alice@example.com"}"#);
        assert!(!body.contains("xyz-123"));
    }

    #[tokio::test]
    async fn stalled_publish_times_out() {
        let err = publish_user(&StalledPublisher, &User::sample(), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Timeout(d) if d == Duration::from_millis(20)));
    }
}
