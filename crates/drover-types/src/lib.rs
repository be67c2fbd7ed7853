//! Drover Types - Core types for remote deployment orchestration
//!
//! Drover coordinates deployment operations across many remote agents over an
//! asynchronous channel. This crate holds the shared data model:
//!
//! - **Command**: one unit of work dispatched to a single agent, with a
//!   tracked lifecycle (`command`)
//! - **Wire records**: the JSON payload/result pairs exchanged with agents
//!   per deploy type (`wire`)
//! - **Release**: one deployment attempt of a version to a set of targets
//!   under a rollout strategy (`release`)
//! - **Records**: project/environment/target/pipeline/approval rows backing
//!   the release engine (`records`)
//!
//! ## Architectural Boundaries
//!
//! - `drover-command` owns: command dispatch, tracking, fan-out
//! - `drover-release` owns: operation translation, rollout strategies
//! - This crate owns: the types both sides agree on

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod command;
pub mod events;
pub mod ids;
pub mod records;
pub mod release;
pub mod wire;

// Re-export main types
pub use command::{
    Command, CommandStatus, CMD_CONTAINER_DEPLOY, CMD_GITPULL_DEPLOY, CMD_GIT_VERSIONS,
    CMD_K8S_DEPLOY, CMD_RELEASE_CHECK, CMD_RELEASE_EXECUTE,
};
pub use events::ReleaseEvent;
pub use ids::{CommandId, ReleaseId, TaskId};
pub use records::{
    Approval, ApprovalStatus, ContainerDeployConfig, Environment, GitPullDeployConfig,
    KubernetesDeployConfig, Pipeline, Project, ScriptDeployConfig, ScriptTimeouts, Target,
    TargetConfig,
};
pub use release::{
    DeployType, OperationType, Release, ReleaseStatus, ReleaseStrategy, RollbackConfig,
    RollbackGranularity, StrategyType, TargetReleaseStatus, TargetResult,
};
