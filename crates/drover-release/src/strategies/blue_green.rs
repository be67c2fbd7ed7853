//! Blue-green strategy
//!
//! Deploys the new version to every target concurrently; the release
//! succeeds only if none failed. The traffic-cutover step is not modeled
//! here; operators switch traffic once the green side reports success.

use super::{StrategyExecutor, StrategyOutcome};
use crate::context::ReleaseContext;
use crate::error::Result;
use async_trait::async_trait;
use drover_types::Target;
use futures::future::join_all;
use tracing::info;

/// Blue-green executor: all targets at once, all-or-nothing
pub struct BlueGreenExecutor;

impl BlueGreenExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BlueGreenExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StrategyExecutor for BlueGreenExecutor {
    async fn execute(&self, ctx: &ReleaseContext, targets: &[Target]) -> Result<StrategyOutcome> {
        if ctx.is_cancelled() {
            return Ok(StrategyOutcome::Cancelled);
        }

        info!(target_count = targets.len(), "Starting blue-green rollout");

        join_all(targets.iter().map(|target| ctx.run_target(target))).await;

        if ctx.has_failed_targets().await {
            return Ok(StrategyOutcome::Aborted(
                "blue-green deployment failed".to_string(),
            ));
        }

        Ok(StrategyOutcome::Completed)
    }

    fn name(&self) -> &str {
        "blue-green"
    }
}
