//! Release types
//!
//! A Release is one deployment attempt of a version to a fixed set of
//! targets under a rollout strategy. Its per-target outcomes live in the
//! `results` array, whose length is fixed at creation and always equals the
//! target count.

use crate::ids::ReleaseId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// How a project is deployed on its targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployType {
    Container,
    Kubernetes,
    Script,
    GitPull,
}

/// Deployment operation requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Deploy: resolved to install or update depending on the target state
    #[default]
    Deploy,
    Install,
    Update,
    Rollback,
    Uninstall,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deploy => "deploy",
            Self::Install => "install",
            Self::Update => "update",
            Self::Rollback => "rollback",
            Self::Uninstall => "uninstall",
        };
        f.write_str(s)
    }
}

/// Release lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    /// Created, not yet started
    Pending,
    /// Has a future start time
    Scheduled,
    /// Waiting for an approval record to be approved
    Approving,
    /// A strategy is executing
    Running,
    /// Canary phase succeeded, waiting for an explicit promote
    Paused,
    /// Every target reached a terminal state with no disqualifying failure
    Success,
    /// A strategy aborted
    Failed,
    /// Explicitly cancelled
    Cancelled,
}

impl ReleaseStatus {
    /// Whether no further transition can occur
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Approving => "approving",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Rollout strategy kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Rolling,
    BlueGreen,
    Canary,
}

/// Rollout strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseStrategy {
    #[serde(rename = "type")]
    pub strategy_type: StrategyType,

    /// Rolling: targets per batch
    pub batch_size: usize,
    /// Rolling: seconds to sleep between batches
    pub batch_interval: u64,

    /// Canary: percentage of targets in the canary subset
    pub canary_percent: u32,
    /// Canary: explicit target ids, takes precedence over the percentage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub canary_targets: Vec<String>,
    /// Canary: seconds to observe after a clean canary phase
    pub verify_duration: u64,
    /// Canary: continue to the remaining targets without a manual promote
    pub auto_promote: bool,

    /// Blue-green: seconds allowed for the traffic switch
    pub switch_timeout: u64,
    /// Blue-green: keep the previous version around after switching
    pub keep_old_version: bool,
}

impl Default for ReleaseStrategy {
    fn default() -> Self {
        Self {
            strategy_type: StrategyType::Rolling,
            batch_size: 1,
            batch_interval: 0,
            canary_percent: 0,
            canary_targets: Vec::new(),
            verify_duration: 0,
            auto_promote: false,
            switch_timeout: 0,
            keep_old_version: false,
        }
    }
}

/// Rollback scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackGranularity {
    All,
    Single,
}

/// Rollback behavior attached to a release
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    pub granularity: RollbackGranularity,
    /// Abort the release as soon as any target fails
    pub auto_rollback: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_version: String,
}

/// Per-target status within a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetReleaseStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl TargetReleaseStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Outcome of one target within a release, mutated in place as it executes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    pub target_id: String,
    pub target_name: String,
    pub status: TargetReleaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl TargetResult {
    /// Fresh pending result for a target
    pub fn pending(target_id: impl Into<String>, target_name: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            target_name: target_name.into(),
            status: TargetReleaseStatus::Pending,
            started_at: None,
            finished_at: None,
            error: String::new(),
        }
    }
}

/// A release record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,
    pub project_id: String,
    pub environment_id: String,
    pub pipeline_id: String,
    pub version: String,
    pub operation: OperationType,
    pub status: ReleaseStatus,

    pub strategy: ReleaseStrategy,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_ids: Vec<String>,
    #[serde(rename = "rollback_config", skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<chrono::DateTime<chrono::Utc>>,

    /// One entry per target, fixed length, set once at creation
    pub results: Vec<TargetResult>,

    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,

    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Release {
    /// Whether any target in the release has failed
    pub fn has_failed_targets(&self) -> bool {
        self.results
            .iter()
            .any(|r| r.status == TargetReleaseStatus::Failed)
    }

    /// Find the result slot for a target
    pub fn result_mut(&mut self, target_id: &str) -> Option<&mut TargetResult> {
        self.results.iter_mut().find(|r| r.target_id == target_id)
    }
}
