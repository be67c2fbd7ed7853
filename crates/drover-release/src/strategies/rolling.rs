//! Rolling strategy
//!
//! Targets are split into fixed-size batches. All targets of a batch execute
//! concurrently and the batch is fully awaited before the next one starts;
//! batches are strictly sequential relative to each other.

use super::{StrategyExecutor, StrategyOutcome};
use crate::context::ReleaseContext;
use crate::error::Result;
use async_trait::async_trait;
use drover_types::Target;
use futures::future::join_all;
use std::time::Duration;
use tracing::info;

/// Rolling executor: batched, join-synchronized rollout
pub struct RollingExecutor {
    batch_size: usize,
    /// Seconds to sleep between batches
    batch_interval: u64,
}

impl RollingExecutor {
    pub fn new(batch_size: usize, batch_interval: u64) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batch_interval,
        }
    }
}

#[async_trait]
impl StrategyExecutor for RollingExecutor {
    async fn execute(&self, ctx: &ReleaseContext, targets: &[Target]) -> Result<StrategyOutcome> {
        let batches: Vec<&[Target]> = targets.chunks(self.batch_size).collect();

        info!(
            batch_count = batches.len(),
            batch_size = self.batch_size,
            target_count = targets.len(),
            "Starting rolling rollout"
        );

        for (index, batch) in batches.iter().enumerate() {
            if ctx.is_cancelled() {
                return Ok(StrategyOutcome::Cancelled);
            }

            join_all(batch.iter().map(|target| ctx.run_target(target))).await;

            // Abort before the next batch ever dispatches
            if ctx.has_failed_targets().await && ctx.auto_rollback_enabled().await {
                return Ok(StrategyOutcome::Aborted(
                    "auto rollback triggered due to failed targets".to_string(),
                ));
            }

            if self.batch_interval > 0 && index + 1 < batches.len() {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(self.batch_interval)) => {}
                    _ = ctx.cancel_token().cancelled() => return Ok(StrategyOutcome::Cancelled),
                }
            }
        }

        Ok(StrategyOutcome::Completed)
    }

    fn name(&self) -> &str {
        "rolling"
    }
}
