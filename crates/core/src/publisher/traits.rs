//! Trait definitions for the publisher module.

use async_trait::async_trait;
use thiserror::Error;

use super::types::ProductNotification;

/// Errors from an outbound sink.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publisher is closed")]
    Closed,

    #[error("publish rejected: {reason}")]
    Rejected { reason: String },
}

/// Outbound channel for product notifications.
///
/// Delivery is at-least-once; consumers must tolerate duplicates.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Returns the name of this publisher implementation.
    fn name(&self) -> &str;

    async fn publish(&self, notification: ProductNotification) -> Result<(), PublishError>;
}
