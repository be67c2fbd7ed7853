//! Canary strategy
//!
//! A small subset validates the release before full rollout. Canary targets
//! execute strictly sequentially to bound blast radius and allow the
//! earliest possible abort; any canary failure fails the release without
//! touching the normal targets.

use super::{StrategyExecutor, StrategyOutcome};
use crate::context::ReleaseContext;
use crate::error::Result;
use async_trait::async_trait;
use drover_types::Target;
use std::time::Duration;
use tracing::info;

/// Canary executor: sequential subset, verification window, optional pause
pub struct CanaryExecutor {
    canary_percent: u32,
    canary_targets: Vec<String>,
    /// Seconds to observe after a clean canary phase
    verify_duration: u64,
    auto_promote: bool,
}

impl CanaryExecutor {
    pub fn new(
        canary_percent: u32,
        canary_targets: Vec<String>,
        verify_duration: u64,
        auto_promote: bool,
    ) -> Self {
        Self {
            canary_percent,
            canary_targets,
            verify_duration,
            auto_promote,
        }
    }

    /// Split targets into the canary subset and the rest
    ///
    /// Priority order: explicit id list; else a percentage of the total
    /// (floor, minimum one); else the first target alone.
    fn split<'a>(&self, targets: &'a [Target]) -> (Vec<&'a Target>, Vec<&'a Target>) {
        if !self.canary_targets.is_empty() {
            let (canary, normal) = targets
                .iter()
                .partition(|t| self.canary_targets.contains(&t.id));
            return (canary, normal);
        }

        let count = if self.canary_percent > 0 {
            (targets.len() * self.canary_percent as usize / 100).max(1)
        } else {
            1
        };
        let count = count.min(targets.len());
        let (canary, normal) = targets.split_at(count);
        (canary.iter().collect(), normal.iter().collect())
    }
}

#[async_trait]
impl StrategyExecutor for CanaryExecutor {
    async fn execute(&self, ctx: &ReleaseContext, targets: &[Target]) -> Result<StrategyOutcome> {
        let (canary, normal) = self.split(targets);

        // On a resumed (promoted) release the canary subset is already
        // terminal; only fresh targets run and the pause gate is skipped.
        let mut fresh_canary = Vec::new();
        for target in &canary {
            if ctx.target_is_pending(&target.id).await {
                fresh_canary.push(*target);
            }
        }

        info!(
            canary_count = canary.len(),
            normal_count = normal.len(),
            fresh_canary = fresh_canary.len(),
            "Starting canary rollout"
        );

        if !fresh_canary.is_empty() {
            for target in fresh_canary {
                if ctx.is_cancelled() {
                    return Ok(StrategyOutcome::Cancelled);
                }
                ctx.run_target(target).await;

                if ctx.has_failed_targets().await {
                    return Ok(StrategyOutcome::Aborted(
                        "canary deployment failed".to_string(),
                    ));
                }
            }

            if self.verify_duration > 0 {
                info!(
                    verify_secs = self.verify_duration,
                    "Canary verification window"
                );
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(self.verify_duration)) => {}
                    _ = ctx.cancel_token().cancelled() => return Ok(StrategyOutcome::Cancelled),
                }
            }

            if !self.auto_promote {
                return Ok(StrategyOutcome::Paused);
            }
        }

        for target in normal {
            if ctx.is_cancelled() {
                return Ok(StrategyOutcome::Cancelled);
            }
            if !ctx.target_is_pending(&target.id).await {
                continue;
            }
            ctx.run_target(target).await;
        }

        Ok(StrategyOutcome::Completed)
    }

    fn name(&self) -> &str {
        "canary"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use drover_types::TargetConfig;

    fn target(id: &str) -> Target {
        Target {
            id: id.to_string(),
            environment_id: "env".to_string(),
            client_id: format!("client-{id}"),
            name: id.to_string(),
            labels: Default::default(),
            config: TargetConfig::default(),
            priority: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ids(targets: &[&Target]) -> Vec<String> {
        targets.iter().map(|t| t.id.clone()).collect()
    }

    #[test]
    fn twenty_percent_of_ten_targets_is_two() {
        let targets: Vec<Target> = (0..10).map(|i| target(&format!("t{i}"))).collect();
        let executor = CanaryExecutor::new(20, Vec::new(), 0, false);
        let (canary, normal) = executor.split(&targets);
        assert_eq!(ids(&canary), vec!["t0", "t1"]);
        assert_eq!(normal.len(), 8);
    }

    #[test]
    fn percentage_floor_has_minimum_one() {
        let targets: Vec<Target> = (0..5).map(|i| target(&format!("t{i}"))).collect();
        let executor = CanaryExecutor::new(10, Vec::new(), 0, false);
        let (canary, _) = executor.split(&targets);
        assert_eq!(canary.len(), 1); // floor(0.5) bumped to 1
    }

    #[test]
    fn explicit_target_list_takes_precedence() {
        let targets: Vec<Target> = (0..4).map(|i| target(&format!("t{i}"))).collect();
        let executor = CanaryExecutor::new(50, vec!["t3".to_string()], 0, false);
        let (canary, normal) = executor.split(&targets);
        assert_eq!(ids(&canary), vec!["t3"]);
        assert_eq!(normal.len(), 3);
    }

    #[test]
    fn no_configuration_picks_the_first_target() {
        let targets: Vec<Target> = (0..3).map(|i| target(&format!("t{i}"))).collect();
        let executor = CanaryExecutor::new(0, Vec::new(), 0, false);
        let (canary, _) = executor.split(&targets);
        assert_eq!(ids(&canary), vec!["t0"]);
    }
}
