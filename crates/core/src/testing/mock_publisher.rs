//! Mock publisher for testing.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::publisher::{ProductNotification, PublishError, Publisher};

/// Mock implementation of the Publisher trait.
///
/// Records every notification it accepts. `set_fail_next` makes the next
/// publishes fail without recording them.
#[derive(Debug, Default)]
pub struct MockPublisher {
    published: Arc<RwLock<Vec<ProductNotification>>>,
    fail_next: Arc<RwLock<usize>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn published(&self) -> Vec<ProductNotification> {
        self.published.read().await.clone()
    }

    pub async fn publish_count(&self) -> usize {
        self.published.read().await.len()
    }

    /// Fails the next `n` publishes.
    pub async fn set_fail_next(&self, n: usize) {
        *self.fail_next.write().await = n;
    }

    pub async fn clear(&self) {
        self.published.write().await.clear();
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn publish(&self, notification: ProductNotification) -> Result<(), PublishError> {
        {
            let mut fail_next = self.fail_next.write().await;
            if *fail_next > 0 {
                *fail_next -= 1;
                return Err(PublishError::Rejected {
                    reason: "mock failure".to_string(),
                });
            }
        }
        self.published.write().await.push(notification);
        Ok(())
    }
}
