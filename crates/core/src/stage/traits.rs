//! Trait definitions for the stage module.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::types::{StageOutcome, StageRequest};

/// Executes one attempt of one processing stage.
///
/// Implementations never return errors: every way an attempt can end is a
/// [`StageOutcome`]. Cancelling the token must stop the attempt promptly and
/// yield [`StageOutcome::Cancelled`].
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Returns the name of this runner implementation.
    fn name(&self) -> &str;

    async fn run(&self, request: StageRequest, cancel: CancellationToken) -> StageOutcome;
}
