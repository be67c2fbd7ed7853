//! Rollout strategy implementations

pub mod blue_green;
pub mod canary;
pub mod rolling;

pub use blue_green::BlueGreenExecutor;
pub use canary::CanaryExecutor;
pub use rolling::RollingExecutor;

use crate::context::ReleaseContext;
use crate::error::Result;
use async_trait::async_trait;
use drover_types::{ReleaseStrategy, StrategyType, Target};

/// How a strategy run ended; the engine maps this onto the release status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    /// Every target was driven to a terminal state
    Completed,
    /// Canary phase succeeded; awaiting an explicit promote
    Paused,
    /// The strategy stopped early; the release fails with this reason
    Aborted(String),
    /// The release's cancellation token fired mid-run
    Cancelled,
}

/// A rollout algorithm: sequences target execution, nothing else
#[async_trait]
pub trait StrategyExecutor: Send + Sync {
    async fn execute(&self, ctx: &ReleaseContext, targets: &[Target]) -> Result<StrategyOutcome>;

    /// Strategy name for logging
    fn name(&self) -> &str;
}

/// Factory for strategy executors
pub fn create_executor(strategy: &ReleaseStrategy) -> Box<dyn StrategyExecutor> {
    match strategy.strategy_type {
        StrategyType::Rolling => Box::new(RollingExecutor::new(
            strategy.batch_size,
            strategy.batch_interval,
        )),
        StrategyType::Canary => Box::new(CanaryExecutor::new(
            strategy.canary_percent,
            strategy.canary_targets.clone(),
            strategy.verify_duration,
            strategy.auto_promote,
        )),
        StrategyType::BlueGreen => Box::new(BlueGreenExecutor::new()),
    }
}
