//! In-process broadcast publisher.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use super::traits::{PublishError, Publisher};
use super::types::ProductNotification;

/// Fans notifications out to any number of in-process subscribers.
///
/// With no subscriber attached, notifications are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<ProductNotification>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProductNotification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn publish(&self, notification: ProductNotification) -> Result<(), PublishError> {
        if self.tx.send(notification).is_err() {
            debug!("No subscribers for product notification");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    #[tokio::test]
    async fn test_subscribers_receive_notifications() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 1);

        let n = fixtures::notification("decode", "/out/a.L1A_LAC");
        publisher.publish(n.clone()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), n);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let publisher = BroadcastPublisher::new(8);
        let n = fixtures::notification("decode", "/out/a.L1A_LAC");
        assert!(publisher.publish(n).await.is_ok());
    }
}
