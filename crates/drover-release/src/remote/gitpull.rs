//! Git-pull deploy path and repository version queries

use super::{command_error_message, dispatch_budget, wait_budget, RemoteExecutor};
use crate::error::{ReleaseError, Result};
use chrono::Utc;
use drover_types::wire::{GitPullDeployParams, GitPullDeployResult, GitVersionsParams, GitVersionsResult};
use drover_types::{CommandStatus, GitPullDeployConfig, OperationType, CMD_GITPULL_DEPLOY, CMD_GIT_VERSIONS};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// One git-pull deployment on one target
pub struct GitPullDeployRequest<'a> {
    pub release_id: &'a str,
    pub target_id: &'a str,
    pub client_id: &'a str,
    pub operation: OperationType,
    pub version: &'a str,
    pub config: &'a GitPullDeployConfig,
    /// Repository URL, variables already resolved
    pub repo_url: String,
    /// Branch, variables already resolved
    pub branch: String,
    /// Work directory, variables already resolved
    pub work_dir: String,
    /// Pre-deploy script, variables already resolved
    pub pre_script: String,
    /// Post-deploy script, variables already resolved
    pub post_script: String,
    /// Environment, variables already resolved
    pub environment: HashMap<String, String>,
}

/// Interpreted outcome of a git-pull deployment
#[derive(Debug, Clone)]
pub struct GitPullOutcome {
    pub success: bool,
    pub git_output: String,
    pub script_output: String,
    pub commit: String,
    pub branch: String,
    pub backup_path: String,
    pub cleaned_before: bool,
    pub backed_up_before: bool,
    pub error: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub duration: Duration,
}

/// Version query against a repository, via one agent
pub struct GitVersionsRequest<'a> {
    pub client_id: &'a str,
    pub config: Option<&'a GitPullDeployConfig>,
    pub repo_url: String,
    pub work_dir: String,
    pub max_tags: i64,
    pub max_commits: i64,
    pub include_branches: bool,
}

impl RemoteExecutor {
    /// Run a git-pull deployment remotely and wait for its outcome
    #[instrument(skip(self, req, cancel), fields(release_id = %req.release_id, target_id = %req.target_id))]
    pub async fn execute_gitpull_deploy(
        &self,
        req: &GitPullDeployRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<GitPullOutcome> {
        let started_at = Utc::now();
        let config = req.config;

        let params = GitPullDeployParams {
            release_id: req.release_id.to_string(),
            target_id: req.target_id.to_string(),
            operation: req.operation,
            version: req.version.to_string(),
            repo_url: req.repo_url.clone(),
            branch: req.branch.clone(),
            tag: config.tag.clone(),
            commit: config.commit.clone(),
            depth: config.depth,
            submodules: config.submodules,
            auth_type: config.auth_type.clone(),
            ssh_key: config.ssh_key.clone(),
            token: config.token.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            work_dir: req.work_dir.clone(),
            clean_before: config.clean_before,
            backup_before: config.backup_before,
            backup_dir: config.backup_dir.clone(),
            pre_script: req.pre_script.clone(),
            post_script: req.post_script.clone(),
            environment: req.environment.clone(),
            interpreter: config.interpreter.clone(),
            clone_timeout: config.clone_timeout,
            script_timeout: config.script_timeout,
            timeout: 0,
        };

        // Clone budget plus script budget, else ten minutes
        let mut timeout = if config.clone_timeout > 0 {
            config.clone_timeout as u64
        } else {
            600
        };
        if config.script_timeout > 0 {
            timeout += config.script_timeout as u64;
        }

        let command = self
            .sender
            .send_command(
                req.client_id,
                CMD_GITPULL_DEPLOY,
                serde_json::to_value(&params)?,
                dispatch_budget(timeout),
            )
            .await?;

        let final_cmd = self
            .wait_for_completion(&command.id, wait_budget(timeout), cancel)
            .await?;

        let finished_at = Utc::now();
        let duration = (finished_at - started_at).to_std().unwrap_or_default();

        if final_cmd.status == CommandStatus::Completed {
            let deploy: GitPullDeployResult =
                serde_json::from_value(final_cmd.result.unwrap_or_default())?;
            Ok(GitPullOutcome {
                success: deploy.success,
                git_output: deploy.git_output,
                script_output: deploy.script_output,
                commit: deploy.commit,
                branch: deploy.branch,
                backup_path: deploy.backup_path,
                cleaned_before: deploy.cleaned_before,
                backed_up_before: deploy.backed_up_before,
                error: deploy.error,
                started_at,
                finished_at,
                duration,
            })
        } else {
            Ok(GitPullOutcome {
                success: false,
                git_output: String::new(),
                script_output: String::new(),
                commit: String::new(),
                branch: req.branch.clone(),
                backup_path: String::new(),
                cleaned_before: false,
                backed_up_before: false,
                error: command_error_message(&final_cmd),
                started_at,
                finished_at,
                duration,
            })
        }
    }

    /// Query tags/branches/commits of a repository through one agent
    pub async fn fetch_git_versions(
        &self,
        req: &GitVersionsRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<GitVersionsResult> {
        let max_tags = if req.max_tags > 0 { req.max_tags } else { 20 };
        let max_commits = if req.max_commits > 0 {
            req.max_commits
        } else {
            10
        };

        let mut params = GitVersionsParams {
            repo_url: req.repo_url.clone(),
            work_dir: req.work_dir.clone(),
            max_tags,
            max_commits,
            include_branches: req.include_branches,
            ..Default::default()
        };
        if let Some(config) = req.config {
            params.auth_type = config.auth_type.clone();
            params.ssh_key = config.ssh_key.clone();
            params.token = config.token.clone();
            params.username = config.username.clone();
            params.password = config.password.clone();
        }

        let command = self
            .sender
            .send_command(
                req.client_id,
                CMD_GIT_VERSIONS,
                serde_json::to_value(&params)?,
                Duration::from_secs(60),
            )
            .await?;

        let final_cmd = self
            .wait_for_completion(&command.id, Duration::from_secs(90), cancel)
            .await?;

        if final_cmd.status != CommandStatus::Completed {
            return Err(ReleaseError::RemoteExecution(command_error_message(
                &final_cmd,
            )));
        }

        let versions: GitVersionsResult =
            serde_json::from_value(final_cmd.result.unwrap_or_default())?;
        if !versions.success {
            return Err(ReleaseError::RemoteExecution(versions.error));
        }
        Ok(versions)
    }
}
